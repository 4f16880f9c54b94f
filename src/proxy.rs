//! License Proxy: owns the single asset session and routes license
//! challenges to the matching upstream endpoint.
//!
//! State moves `Idle -> Preparing -> Active`, and a request for another
//! asset goes back through `Preparing` after tearing the old session down.
//! The state lives behind one mutex. Renewals hold it across the upstream
//! call so the rotated license-session token is written back atomically.
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::asset::{AssetSession, ContentLicense};
use crate::auth::TokenService;
use crate::challenge::{Challenge, DecodedRequest};
use crate::device::DeviceSessionManager;
use crate::error::{Error, Result};
use crate::token;
use crate::upstream::UpstreamClient;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyState {
    Idle,
    Preparing { asset_id: String },
    Active(AssetSession),
}

impl ProxyState {
    #[must_use]
    pub fn asset_id(&self) -> Option<&str> {
        match self {
            Self::Idle => None,
            Self::Preparing { asset_id } => Some(asset_id),
            Self::Active(session) => Some(&session.asset_id),
        }
    }

    #[must_use]
    pub fn active(&self) -> Option<&AssetSession> {
        match self {
            Self::Active(session) => Some(session),
            _ => None,
        }
    }
}

pub struct LicenseProxy {
    tokens: Arc<TokenService>,
    device: Arc<DeviceSessionManager>,
    upstream: UpstreamClient,
    state: Mutex<ProxyState>,
    // Serializes asset preparation so two play requests never interleave
    // their teardown and setup.
    prepare_lock: Mutex<()>,
}

impl LicenseProxy {
    pub fn new(
        tokens: Arc<TokenService>,
        device: Arc<DeviceSessionManager>,
        upstream: UpstreamClient,
    ) -> Self {
        Self {
            tokens,
            device,
            upstream,
            state: Mutex::new(ProxyState::Idle),
            prepare_lock: Mutex::new(()),
        }
    }

    /// Copy of the current state.
    pub async fn snapshot(&self) -> ProxyState {
        self.state.lock().await.clone()
    }

    /// Prepare `asset_id` for playback and return its manifest verbatim.
    ///
    /// Any active session is torn down first, even one for the same asset.
    pub async fn request_asset(&self, asset_id: &str) -> Result<Vec<u8>> {
        let prepare = self.prepare_lock.lock().await;

        let previous = std::mem::replace(
            &mut *self.state.lock().await,
            ProxyState::Preparing {
                asset_id: asset_id.to_string(),
            },
        );
        if let ProxyState::Active(old) = previous {
            info!("[Proxy] Releasing license session for {}", old.asset_id);
            self.teardown(&old.license_session_token).await;
        }

        let session = match self.prepare(asset_id).await {
            Ok(session) => session,
            Err(e) => {
                *self.state.lock().await = ProxyState::Idle;
                warn!("[Proxy] Could not prepare {}: {}", asset_id, e);
                return Err(e);
            }
        };

        let manifest_url = session.manifest_url.clone();
        let heartbeat = session.heartbeat();
        *self.state.lock().await = ProxyState::Active(session);
        drop(prepare);
        match heartbeat {
            Some(seconds) => info!("[Proxy] Asset {} is active (heartbeat {}s)", asset_id, seconds),
            None => info!("[Proxy] Asset {} is active", asset_id),
        }

        self.upstream.fetch_manifest(&manifest_url).await
    }

    async fn prepare(&self, asset_id: &str) -> Result<AssetSession> {
        let access_token = self.tokens.bearer()?;
        let (device, signature) = self.device.sign().await?;

        debug!("[Proxy] Fetching descriptor for {}", asset_id);
        let descriptor = self
            .upstream
            .fetch_asset(asset_id, &access_token, &device, &signature)
            .await?;

        // The content license is passed upstream opaquely; its claims only
        // feed diagnostics.
        match ContentLicense::parse(&descriptor.clm_token) {
            Ok(license) => {
                debug!(
                    "[Proxy] Content license {} for account {} valid until {}",
                    license.jti, license.account_id, license.expiration
                );
                if license.is_expired(Utc::now()) {
                    warn!("[Proxy] Content license for {} is already expired", asset_id);
                }
            }
            Err(e) => warn!(
                "[Proxy] Could not decode content license for {}: {}",
                asset_id, e
            ),
        }

        let setup = self
            .upstream
            .setup_license_session(&descriptor.clm_token)
            .await?;
        debug!(
            "[Proxy] License session {} (heartbeat {:?})",
            token::preview(&setup.session_token),
            setup.heartbeat
        );

        Ok(AssetSession {
            asset_id: asset_id.to_string(),
            content_license_token: descriptor.clm_token,
            license_session_token: setup.session_token,
            manifest_url: descriptor.path,
        })
    }

    /// Forward a raw license challenge and return the raw license.
    pub async fn submit_challenge(&self, raw: &[u8]) -> Result<Vec<u8>> {
        if raw.is_empty() {
            return Err(Error::InvalidChallenge("empty challenge".to_string()));
        }
        let challenge = Challenge::new(raw);

        let mut state = self.state.lock().await;
        let ProxyState::Active(session) = &mut *state else {
            return Err(Error::NoActiveSession);
        };

        match DecodedRequest::decode(raw) {
            Some(decoded) if !decoded.agrees_with(challenge.kind) => warn!(
                "[Proxy] Challenge decodes as {:?} but is routed as {}",
                decoded, challenge.kind
            ),
            Some(decoded) => debug!("[Proxy] {} ({:?})", challenge.kind, decoded),
            None => debug!("[Proxy] {} (undecodable)", challenge.kind),
        }

        if challenge.kind.uses_new_license_route() {
            let content_license_token = session.content_license_token.clone();
            let license_session_token = session.license_session_token.clone();
            drop(state);
            return self
                .upstream
                .new_license(
                    &content_license_token,
                    &license_session_token,
                    &challenge.encoded,
                )
                .await;
        }

        let renewal = self
            .upstream
            .renew_license(&session.license_session_token, &challenge.encoded)
            .await?;
        debug!(
            "[Proxy] License session rotated to {}",
            token::preview(&renewal.session_token)
        );
        session.license_session_token = renewal.session_token;
        Ok(renewal.license)
    }

    /// Ask upstream to close a license session. Failures are only logged.
    pub async fn teardown(&self, license_session_token: &str) {
        match self.upstream.teardown(license_session_token).await {
            Ok(()) => info!(
                "[Proxy] Tore down license session {}",
                token::preview(license_session_token)
            ),
            Err(e) => warn!(
                "[Proxy] Teardown of license session {} failed: {}",
                token::preview(license_session_token),
                e
            ),
        }
    }
}
