//! Unverified claim decoding for the opaque JWT-like tokens handed out by
//! the identity provider and the DRM servers.
//!
//! Nothing here checks a signature. A successful decode only means the
//! middle segment is well-formed JSON; the upstream servers remain the
//! authority on whether a token is acceptable.
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};

// Tokens from different issuers disagree on padding.
const SEGMENT_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decode the raw payload segment of a token without verifying it.
pub fn decode_payload(token: &str) -> Result<Vec<u8>> {
    let mut parts = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::InvalidToken("expected three dot-separated segments".into()));
    };
    if payload.is_empty() {
        return Err(Error::InvalidToken("empty payload segment".into()));
    }
    SEGMENT_ENGINE
        .decode(payload)
        .map_err(|e| Error::InvalidToken(format!("payload is not base64url: {}", e)))
}

/// Decode a token's claims into `T` without verifying it.
pub fn decode_claims<T: DeserializeOwned>(token: &str) -> Result<T> {
    let payload = decode_payload(token)?;
    serde_json::from_slice(&payload)
        .map_err(|e| Error::InvalidToken(format!("payload is not valid claims: {}", e)))
}

/// Decode a token's claims as free-form JSON.
pub fn decode_json(token: &str) -> Result<JsonValue> {
    decode_claims(token)
}

/// Expiry instant of a token, if it carries an `exp` claim.
pub fn expires_at(token: &str) -> Result<Option<DateTime<Utc>>> {
    #[derive(Deserialize)]
    struct Exp {
        exp: Option<i64>,
    }
    let claims: Exp = decode_claims(token)?;
    Ok(claims.exp.and_then(|exp| Utc.timestamp_opt(exp, 0).single()))
}

/// Whether the token's `exp` claim lies in the past. Tokens without `exp`
/// count as expired.
pub fn is_expired(token: &str, now: DateTime<Utc>) -> Result<bool> {
    Ok(expires_at(token)?.map_or(true, |exp| exp <= now))
}

/// Short, log-safe preview of a token.
#[must_use]
pub fn preview(token: &str) -> String {
    let head: String = token.chars().take(12).collect();
    if head.len() < token.len() {
        format!("{}…", head)
    } else {
        head
    }
}

/// Subject claims carried by the identity provider's `id_token`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdentityClaims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub user_ca: Option<String>,
    #[serde(default)]
    pub user_sa: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
}

/// Claims of the content-license (CLM) token embedded in an asset descriptor.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentLicenseClaims {
    pub jti: String,
    pub device: ContentLicenseDevice,
    pub exp: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentLicenseDevice {
    #[serde(rename = "accountId")]
    pub account_id: String,
}

/// Claims of the DRM license-session token.
#[derive(Debug, Clone, Deserialize)]
pub struct LicenseSessionClaims {
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub heartbeat: Option<u64>,
    pub exp: i64,
}

#[cfg(test)]
mod tests {
    use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
    use base64::Engine;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::*;

    fn token_with(payload: serde_json::Value) -> String {
        format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256"}"#),
            URL_SAFE_NO_PAD.encode(payload.to_string())
        )
    }

    #[test]
    fn decodes_content_license_claims() {
        let token = token_with(json!({
            "typ": "ContentAuthZ",
            "jti": "abc",
            "device": { "accountId": "acc-1" },
            "exp": 1_700_000_000
        }));
        let claims: ContentLicenseClaims = decode_claims(&token).expect("claims");
        assert_eq!(claims.jti, "abc");
        assert_eq!(claims.device.account_id, "acc-1");
        assert_eq!(
            expires_at(&token).expect("exp"),
            Utc.timestamp_opt(1_700_000_000, 0).single()
        );
    }

    #[test]
    fn accepts_padded_segments() {
        let payload = json!({ "exp": 1 }).to_string();
        let token = format!("h.{}.s", URL_SAFE.encode(payload));
        assert!(decode_json(&token).is_ok());
    }

    #[test]
    fn rejects_malformed_tokens() {
        assert!(matches!(decode_json("nodots"), Err(Error::InvalidToken(_))));
        assert!(matches!(decode_json("a..c"), Err(Error::InvalidToken(_))));
        assert!(matches!(decode_json("a.b.c.d"), Err(Error::InvalidToken(_))));
        assert!(matches!(decode_json("a.!!!.c"), Err(Error::InvalidToken(_))));
    }

    #[test]
    fn missing_exp_counts_as_expired() {
        let token = token_with(json!({ "sub": "x" }));
        assert!(is_expired(&token, Utc::now()).expect("decode"));

        let future = token_with(json!({ "exp": Utc::now().timestamp() + 600 }));
        assert!(!is_expired(&future, Utc::now()).expect("decode"));
    }

    #[test]
    fn preview_truncates_long_tokens() {
        assert_eq!(preview("short"), "short");
        assert_eq!(preview("abcdefghijklmnop"), "abcdefghijkl…");
    }
}
