//! License challenge classification.
//!
//! Routing is decided on the base64 form of the challenge with two fixed
//! thresholds the upstream license server expects; they are heuristics and
//! must stay exactly as they are. The protobuf view is only used for logging.
use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use prost::Message;

/// Service certificate request payload emitted by Widevine CDMs.
pub const SERVICE_CERTIFICATE_CHALLENGE: &[u8] = b"\x08\x04";
/// Base64 form of [`SERVICE_CERTIFICATE_CHALLENGE`].
pub const SERVICE_CERTIFICATE_CHALLENGE_B64: &str = "CAQ=";
/// Encoded challenges longer than this are new-license requests.
pub const NEW_LICENSE_MIN_ENCODED_LEN: usize = 2000;

/// Which upstream route a challenge takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LicenseRequestKind {
    Certificate,
    New,
    Renewal,
}

impl LicenseRequestKind {
    /// Classify a base64-encoded challenge.
    #[must_use]
    pub fn classify(challenge_b64: &str) -> Self {
        if challenge_b64 == SERVICE_CERTIFICATE_CHALLENGE_B64 {
            Self::Certificate
        } else if challenge_b64.len() > NEW_LICENSE_MIN_ENCODED_LEN {
            Self::New
        } else {
            Self::Renewal
        }
    }

    /// Certificate and new-license requests share the new-license endpoint.
    #[must_use]
    pub fn uses_new_license_route(self) -> bool {
        matches!(self, Self::Certificate | Self::New)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Certificate => "SERVICE_CERTIFICATE_REQUEST",
            Self::New => "LICENSE_REQUEST_NEW",
            Self::Renewal => "LICENSE_REQUEST_RENEWAL",
        }
    }
}

impl fmt::Display for LicenseRequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw challenge and its base64 form, classified once.
#[derive(Debug, Clone)]
pub struct Challenge {
    pub encoded: String,
    pub kind: LicenseRequestKind,
}

impl Challenge {
    #[must_use]
    pub fn new(raw: &[u8]) -> Self {
        let encoded = STANDARD.encode(raw);
        let kind = LicenseRequestKind::classify(&encoded);
        Self { encoded, kind }
    }
}

// Minimal views of the license protocol messages, enough to name a
// challenge in logs.

#[derive(Clone, PartialEq, Message)]
struct SignedMessage {
    #[prost(int32, optional, tag = "1")]
    r#type: Option<i32>,
    #[prost(bytes = "vec", optional, tag = "2")]
    msg: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
struct LicenseRequest {
    #[prost(int32, optional, tag = "3")]
    r#type: Option<i32>,
}

/// What the challenge says it is, according to its protobuf encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodedRequest {
    ServiceCertificate,
    LicenseNew,
    LicenseRenewal,
    LicenseRelease,
    Other(i32),
}

impl DecodedRequest {
    /// Decode `raw` as a `SignedMessage`. `None` if it does not parse.
    #[must_use]
    pub fn decode(raw: &[u8]) -> Option<Self> {
        let signed = SignedMessage::decode(raw).ok()?;
        match signed.r#type? {
            // SERVICE_CERTIFICATE_REQUEST
            4 => Some(Self::ServiceCertificate),
            // LICENSE_REQUEST
            1 => {
                let request = LicenseRequest::decode(signed.msg.as_deref().unwrap_or_default()).ok()?;
                match request.r#type.unwrap_or(1) {
                    1 => Some(Self::LicenseNew),
                    2 => Some(Self::LicenseRenewal),
                    3 => Some(Self::LicenseRelease),
                    other => Some(Self::Other(other)),
                }
            }
            other => Some(Self::Other(other)),
        }
    }

    /// Whether the heuristic classification agrees with the decoded type.
    #[must_use]
    pub fn agrees_with(self, kind: LicenseRequestKind) -> bool {
        match self {
            Self::ServiceCertificate => kind == LicenseRequestKind::Certificate,
            Self::LicenseNew => kind == LicenseRequestKind::New,
            Self::LicenseRenewal | Self::LicenseRelease => kind == LicenseRequestKind::Renewal,
            Self::Other(_) => true,
        }
    }
}
