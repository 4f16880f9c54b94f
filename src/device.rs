//! Device Session Manager: the one-time device sign-in handshake and the
//! request signing it enables.
//!
//! Sign-in runs at most once per process. It waits for the first published
//! access session, then:
//! 1. opens a device session on the [`SigningAgent`],
//! 2. asks the agent for a challenge bound to that session,
//! 3. posts the challenge to the sign-in endpoint with the device metadata,
//! 4. imports the returned encrypted key material into the agent.
//!
//! The resulting [`DeviceSession`] is immutable for the rest of the process.
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::auth::TokenService;
use crate::config::{Config, DeviceProfile, Profile};
use crate::error::{Error, Result};
use crate::signing::{SigningAgent, STRING_ENCODING};
use crate::utils::iso8601_millis;

/// Device descriptor returned by the sign-in endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceDescriptor {
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub model: String,
    /// Key material imported into the signing agent.
    pub das_encripted_key: String,
    pub sign_key_id: String,
    pub sign_algo: String,
    /// Sent verbatim as `X-Core-SignKey`.
    pub encrypted_sign_key: String,
}

/// Result of a successful sign-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSession {
    pub session_id: String,
    pub descriptor: DeviceDescriptor,
}

/// A signature together with the timestamp it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSignature {
    /// Goes out unchanged as `X-Core-AuthorizationTime`.
    pub authorization_time: String,
    pub signature: Vec<u8>,
}

impl RequestSignature {
    /// Header form of the signature: decimal byte values joined by commas.
    #[must_use]
    pub fn header_value(&self) -> String {
        self.signature
            .iter()
            .map(u8::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Canonical string covered by a request signature.
#[must_use]
pub fn canonical_message(account_id: &str, authorization_time: &str, profile_id: &str) -> String {
    format!(
        "x-core-accountid={},x-core-authorizationtime={},x-core-profileid={}",
        account_id, authorization_time, profile_id
    )
}

#[derive(Debug, Serialize)]
struct SignInRequest<'a> {
    #[serde(rename = "Challenge")]
    challenge: &'a str,
    #[serde(rename = "DasScheme")]
    das_scheme: &'a str,
}

pub struct DeviceSessionManager {
    http: reqwest::Client,
    sign_in_endpoint: String,
    profile: Profile,
    agent: Arc<dyn SigningAgent>,
    tokens: Arc<TokenService>,
    session: OnceCell<DeviceSession>,
    attempted: std::sync::atomic::AtomicBool,
}

impl DeviceSessionManager {
    pub fn new(
        http: reqwest::Client,
        sign_in_endpoint: impl Into<String>,
        profile: Profile,
        agent: Arc<dyn SigningAgent>,
        tokens: Arc<TokenService>,
    ) -> Self {
        Self {
            http,
            sign_in_endpoint: sign_in_endpoint.into(),
            profile,
            agent,
            tokens,
            session: OnceCell::new(),
            attempted: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn from_config(
        config: &Config,
        http: reqwest::Client,
        agent: Arc<dyn SigningAgent>,
        tokens: Arc<TokenService>,
    ) -> Self {
        Self::new(
            http,
            config.endpoints.sign_in.clone(),
            config.profile.clone(),
            agent,
            tokens,
        )
    }

    /// The signed-in device session, if sign-in completed.
    #[must_use]
    pub fn session(&self) -> Option<&DeviceSession> {
        self.session.get()
    }

    /// Perform the sign-in handshake. Only the first call does any work; a
    /// failed attempt leaves the manager without a session for the rest of
    /// the process.
    pub async fn sign_in(&self) -> Result<DeviceSession> {
        if let Some(session) = self.session.get() {
            return Ok(session.clone());
        }
        if self
            .attempted
            .swap(true, std::sync::atomic::Ordering::SeqCst)
        {
            return Err(Error::SignInAlreadyAttempted);
        }

        let access = self.tokens.wait_ready().await?;
        info!("[Device] Signing in device");

        let session_id = self.agent.open_device_session().await?;
        debug!("[Device] Opened device session {}", session_id);

        let challenge = self.agent.get_challenge(&session_id).await?;

        let descriptor = self.post_sign_in(&challenge, &access.access_token).await?;
        debug!(
            "[Device] Signed in as {} ({}), key {} / {}",
            descriptor.device_id, descriptor.model, descriptor.sign_key_id, descriptor.sign_algo
        );

        self.agent
            .import_signing_key(&session_id, &descriptor.das_encripted_key)
            .await?;

        let session = DeviceSession {
            session_id,
            descriptor,
        };
        // `attempted` admits a single caller, so the cell is still empty.
        let _ = self.session.set(session.clone());
        info!("[Device] Device signed in");
        Ok(session)
    }

    async fn post_sign_in(&self, challenge: &str, access_token: &str) -> Result<DeviceDescriptor> {
        let device = &self.profile.device;
        let response = self
            .http
            .post(&self.sign_in_endpoint)
            .header(reqwest::header::USER_AGENT, &self.profile.user_agent)
            .header("x-apikey", &self.profile.client.authz_id)
            .headers(device_headers(device)?)
            .bearer_auth(access_token)
            .json(&SignInRequest {
                challenge,
                das_scheme: "web",
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Upstream {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }
        Ok(response.json().await?)
    }

    /// Sign the canonical account/time/profile string. The timestamp is
    /// captured before the agent is called and must be sent unchanged.
    pub async fn sign(&self) -> Result<(DeviceSession, RequestSignature)> {
        let session = self.session.get().ok_or(Error::NotSignedIn)?;
        let authorization_time = iso8601_millis(Utc::now());
        let message = canonical_message(
            &self.profile.client.account_id,
            &authorization_time,
            &self.profile.client.profile_id,
        );

        let signature = self
            .agent
            .sign(
                &session.session_id,
                &session.descriptor.sign_key_id,
                &message,
                STRING_ENCODING,
            )
            .await?;

        Ok((
            session.clone(),
            RequestSignature {
                authorization_time,
                signature,
            },
        ))
    }
}

/// `X-Core-Device*` headers describing the impersonated device.
pub(crate) fn device_headers(device: &DeviceProfile) -> Result<reqwest::header::HeaderMap> {
    use reqwest::header::{HeaderMap, HeaderValue};

    let mut headers = HeaderMap::new();
    for (name, value) in [
        ("x-core-devicesubtype", &device.sub_type),
        ("x-core-devicebrandid", &device.brand_id),
        ("x-core-devicemodelid", &device.model_id),
        ("x-core-devicename", &device.name),
        ("x-core-devicetype", &device.device_type),
    ] {
        let value = HeaderValue::from_str(value)
            .map_err(|e| Error::InvalidConfig(format!("device header {}: {}", name, e)))?;
        headers.insert(name, value);
    }
    Ok(headers)
}
