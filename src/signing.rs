//! Device Signing Agent capability.
//!
//! The vendor's device-signing primitives live outside this crate (a
//! headless browser page in practice). [`SigningAgent`] is the seam the
//! core talks to; [`RemoteSigningAgent`] reaches an HTTP bridge in front of
//! whatever realizes it.
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Encoding hint passed with every canonical message.
pub const STRING_ENCODING: &str = "String";

#[async_trait]
pub trait SigningAgent: Send + Sync {
    /// Open a device session and return its opaque id.
    async fn open_device_session(&self) -> Result<String>;

    /// Produce a sign-in challenge bound to a device session.
    async fn get_challenge(&self, session_id: &str) -> Result<String>;

    /// Import the encrypted signing key returned by device sign-in.
    async fn import_signing_key(&self, session_id: &str, encrypted_key: &str) -> Result<()>;

    /// Sign `message` with the imported key.
    async fn sign(
        &self,
        session_id: &str,
        key_id: &str,
        message: &str,
        encoding: &str,
    ) -> Result<Vec<u8>>;
}

/// Client for an HTTP bridge exposing the four agent operations.
#[derive(Debug, Clone)]
pub struct RemoteSigningAgent {
    base_url: String,
    client: reqwest::Client,
}

impl RemoteSigningAgent {
    pub fn new(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, client }
    }

    /// Confirm the bridge answers before anything depends on it.
    pub async fn ping(&self) -> Result<()> {
        let response = self.client.get(&self.base_url).send().await.map_err(|e| {
            Error::MissingSigningCapability(format!(
                "signing agent at {} is unreachable: {}",
                self.base_url, e
            ))
        })?;
        if response.status().is_server_error() {
            return Err(Error::MissingSigningCapability(format!(
                "signing agent at {} answered {}",
                self.base_url,
                response.status()
            )));
        }
        Ok(())
    }

    async fn call<B, T>(&self, operation: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .client
            .post(format!("{}/{}", self.base_url, operation))
            .json(body)
            .send()
            .await
            .map_err(|e| Error::SigningAgent(format!("{} failed: {}", operation, e)))?;

        let status = response.status();
        let envelope: AgentResponse<T> = response
            .json()
            .await
            .map_err(|e| Error::SigningAgent(format!("{} returned an invalid response: {}", operation, e)))?;

        match envelope.data {
            Some(data) if status.is_success() => Ok(data),
            _ => Err(Error::SigningAgent(format!(
                "{} failed [{}]: {} {}",
                operation,
                status,
                envelope.status.unwrap_or_default(),
                envelope.message.unwrap_or_default()
            ))),
        }
    }
}

#[async_trait]
impl SigningAgent for RemoteSigningAgent {
    async fn open_device_session(&self) -> Result<String> {
        self.call("openSession", &serde_json::json!({})).await
    }

    async fn get_challenge(&self, session_id: &str) -> Result<String> {
        self.call(
            "getChallenge",
            &serde_json::json!({ "dasSessionId": session_id }),
        )
        .await
    }

    async fn import_signing_key(&self, session_id: &str, encrypted_key: &str) -> Result<()> {
        let _: serde_json::Value = self
            .call(
                "importLicense",
                &serde_json::json!({
                    "dasSessionId": session_id,
                    "dasEncriptedKey": encrypted_key,
                }),
            )
            .await?;
        Ok(())
    }

    async fn sign(
        &self,
        session_id: &str,
        key_id: &str,
        message: &str,
        encoding: &str,
    ) -> Result<Vec<u8>> {
        self.call(
            "sign",
            &serde_json::json!({
                "dasSessionId": session_id,
                "deviceSignKeyId": key_id,
                "data": message,
                "type": encoding,
            }),
        )
        .await
    }
}

/// Response envelope used by every bridge operation.
#[derive(Debug, Deserialize)]
struct AgentResponse<T> {
    data: Option<T>,
    message: Option<String>,
    status: Option<String>,
}
