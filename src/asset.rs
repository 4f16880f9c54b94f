//! Asset descriptors and the single live asset session.
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use crate::error::Result;
use crate::token::{self, ContentLicenseClaims, LicenseSessionClaims};

/// Descriptor returned by the entitlement endpoint for one asset.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AssetResponse {
    /// Manifest URL.
    pub path: String,
    /// Content-license token.
    pub clm_token: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<AssetMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AssetMetadata {
    #[serde(default)]
    pub asset_id: Option<String>,
    /// `EPGC` for live channels.
    #[serde(default)]
    pub service: Option<String>,
}

/// Error envelope the entitlement endpoint uses on failure.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AssetErrorResponse {
    pub error: AssetError,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AssetError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
}

impl AssetErrorResponse {
    #[must_use]
    pub fn describe(&self) -> String {
        format!("{} {}: {}", self.error.code, self.error.title, self.error.message)
    }
}

/// Parsed content-license token.
#[derive(Debug, Clone)]
pub struct ContentLicense {
    pub jti: String,
    pub account_id: String,
    pub expiration: DateTime<Utc>,
}

impl ContentLicense {
    pub fn parse(token: &str) -> Result<Self> {
        let claims: ContentLicenseClaims = token::decode_claims(token)?;
        Ok(Self {
            jti: claims.jti,
            account_id: claims.device.account_id,
            expiration: Utc
                .timestamp_opt(claims.exp, 0)
                .single()
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
        })
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration <= now
    }
}

/// The asset currently prepared for playback.
///
/// Only the license-session token changes after creation; it rotates on
/// every renewal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetSession {
    pub asset_id: String,
    pub content_license_token: String,
    pub license_session_token: String,
    pub manifest_url: String,
}

impl AssetSession {
    /// Heartbeat interval advertised by the license-session token, seconds.
    #[must_use]
    pub fn heartbeat(&self) -> Option<u64> {
        token::decode_claims::<LicenseSessionClaims>(&self.license_session_token)
            .ok()
            .and_then(|claims| claims.heartbeat)
    }
}
