//! Token Service: exchanges the identity assertion for access sessions.
//!
//! The current [`AccessSession`] is published through a `watch` channel.
//! Readers get a cheap `Arc` snapshot, and a failed refresh never touches
//! what was published before it.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{watch, Mutex};

use crate::config::{ClientProfile, Config};
use crate::error::{Error, Result};
use crate::session::{AccessSession, TokenResponse};
use crate::store::{CredentialStore, ACCESS_RECORD, IDENTITY_RECORD};

/// OAuth grant used for the assertion exchange.
pub const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
/// Scope requested on every exchange.
pub const TOKEN_SCOPE: &str = "openid profile customer_info offline_access";

pub struct TokenService {
    http: reqwest::Client,
    token_endpoint: String,
    client: ClientProfile,
    store: Arc<dyn CredentialStore>,
    current: watch::Sender<Option<Arc<AccessSession>>>,
    refresh_lock: Mutex<()>,
}

impl TokenService {
    pub fn new(
        http: reqwest::Client,
        token_endpoint: impl Into<String>,
        client: ClientProfile,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            http,
            token_endpoint: token_endpoint.into(),
            client,
            store,
            current,
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn from_config(
        config: &Config,
        http: reqwest::Client,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        Self::new(
            http,
            config.endpoints.token.clone(),
            config.profile.client.clone(),
            store,
        )
    }

    /// Snapshot of the current access session, if any refresh succeeded.
    #[must_use]
    pub fn current(&self) -> Option<Arc<AccessSession>> {
        self.current.borrow().clone()
    }

    /// Current bearer token or [`Error::NoAccessSession`].
    pub fn bearer(&self) -> Result<String> {
        self.current()
            .map(|session| session.access_token.clone())
            .ok_or(Error::NoAccessSession)
    }

    /// Subscribe to session changes.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<AccessSession>>> {
        self.current.subscribe()
    }

    /// Wait until at least one refresh has succeeded.
    pub async fn wait_ready(&self) -> Result<Arc<AccessSession>> {
        let mut rx = self.current.subscribe();
        let session = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| Error::NoAccessSession)?;
        session.clone().ok_or(Error::NoAccessSession)
    }

    /// Exchange the identity assertion for a fresh access session, persist
    /// it, and publish it.
    pub async fn refresh(&self) -> Result<Arc<AccessSession>> {
        // Overlapping refreshes would race on the persisted record.
        let _guard = self.refresh_lock.lock().await;

        let identity = self
            .store
            .load_identity()
            .await?
            .ok_or(Error::MissingCredential(IDENTITY_RECORD))?;
        let previous = self
            .store
            .load_access()
            .await?
            .ok_or(Error::MissingCredential(ACCESS_RECORD))?;

        let now = Utc::now();
        match previous.expires() {
            Some(exp) => info!("[Token] Current access session was valid until {}", exp),
            None => warn!("[Token] Current access session has no usable expiry"),
        }
        if identity.is_expired(now) {
            warn!(
                "[Token] Identity assertion expired at {:?}; the exchange will likely be refused",
                identity.expires()
            );
        }

        info!("[Token] Retrieving new access session");
        let form = [
            ("client_id", self.client.authz_id.as_str()),
            ("grant_type", JWT_BEARER_GRANT),
            ("assertion", identity.id_token.as_str()),
            ("scope", TOKEN_SCOPE),
        ];
        let response = self
            .http
            .post(&self.token_endpoint)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Basic {}", self.client.authz_basic),
            )
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::Upstream {
                status: status.as_u16(),
                message,
            });
        }
        let body: TokenResponse = response.json().await?;
        let session = AccessSession::from_response(body)?;

        self.store.save_access(&session).await?;

        let session = Arc::new(session);
        self.current.send_replace(Some(Arc::clone(&session)));
        match session.expires() {
            Some(exp) => info!("[Token] New access session is valid until {}", exp),
            None => info!("[Token] New access session published"),
        }
        Ok(session)
    }
}
