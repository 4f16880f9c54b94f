//! Credential records: the long-lived identity assertion and the
//! short-lived access session exchanged for it.
//!
//! Both are persisted by a [`CredentialStore`](crate::store::CredentialStore)
//! in the same JSON shapes the streaming application keeps in its own
//! storage, so records can be provisioned by copying them out of a signed-in
//! browser.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::token::{self, IdentityClaims};
use crate::utils::iso8601_millis;

/// Long-lived identity assertion (`identity` record). Read, never written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityAssertion {
    /// Bearer assertion presented to the token endpoint.
    pub id_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    /// Issuance time, seconds since the epoch.
    pub issued_at: i64,
    /// Expiry time, seconds since the epoch.
    pub expires_at: i64,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub profile: IdentityProfile,
}

/// Subject claims stored alongside the identity assertion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityProfile {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub session_guid: Option<String>,
    #[serde(default)]
    pub user_ca: Option<String>,
    #[serde(default)]
    pub user_sa: Option<String>,
}

impl IdentityAssertion {
    #[must_use]
    pub fn expires(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.expires_at, 0).single()
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires().map_or(true, |exp| exp <= now)
    }
}

/// Short-lived bearer credential (`access` record).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AccessSession {
    pub access_token: String,
    /// Lifetime in seconds.
    pub expires_in: u64,
    pub access_token_expiration_date: String,
    pub id_token: String,
    /// Issuance time, milliseconds since the epoch.
    pub issued_at: i64,
    pub scope: String,
    pub status: String,
    pub token_type: String,
    #[serde(rename = "UserSA", default)]
    pub user_sa: Option<String>,
    #[serde(rename = "UserCA", default)]
    pub user_ca: Option<String>,
}

/// Token endpoint response body.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    #[serde(default)]
    pub scope: String,
    pub expires_in: u64,
    pub issued_at: i64,
    #[serde(default)]
    pub status: String,
    pub id_token: String,
}

impl AccessSession {
    /// Build a session from a token response, deriving the subject
    /// identifiers from the returned `id_token`.
    pub fn from_response(response: TokenResponse) -> Result<Self> {
        let claims: IdentityClaims = token::decode_claims(&response.id_token)?;
        let expiration = expiry_instant(response.issued_at, response.expires_in);

        Ok(Self {
            access_token: response.access_token,
            expires_in: response.expires_in,
            access_token_expiration_date: expiration.map(iso8601_millis).unwrap_or_default(),
            id_token: response.id_token,
            issued_at: response.issued_at,
            scope: response.scope,
            status: response.status,
            token_type: response.token_type,
            user_sa: claims.user_sa,
            user_ca: claims.user_ca,
        })
    }

    #[must_use]
    pub fn expires(&self) -> Option<DateTime<Utc>> {
        expiry_instant(self.issued_at, self.expires_in)
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires().map_or(true, |exp| exp <= now)
    }
}

fn expiry_instant(issued_at_ms: i64, expires_in_secs: u64) -> Option<DateTime<Utc>> {
    let lifetime_ms = i64::try_from(expires_in_secs).ok()?.checked_mul(1000)?;
    Utc.timestamp_millis_opt(issued_at_ms.checked_add(lifetime_ms)?).single()
}
