//! Error types for wvrelay.

use thiserror::Error;

/// Main error type for wvrelay operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A persisted credential record is absent. Provisioned out-of-band.
    #[error("Missing persisted credential record '{0}'")]
    MissingCredential(&'static str),

    /// The configuration is unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No Device Signing Agent is configured or reachable.
    #[error("No signing capability: {0}")]
    MissingSigningCapability(String),

    /// No access session has been obtained yet.
    #[error("No access session available")]
    NoAccessSession,

    /// The one-time device sign-in has not completed.
    #[error("Device is not signed in")]
    NotSignedIn,

    /// The device sign-in already ran for this process.
    #[error("Device sign-in already attempted")]
    SignInAlreadyAttempted,

    /// A license call arrived before any asset was prepared.
    #[error("No active asset session")]
    NoActiveSession,

    /// A token could not be decoded into claims.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// The challenge payload is unusable.
    #[error("Invalid challenge: {0}")]
    InvalidChallenge(String),

    /// The Device Signing Agent reported a failure.
    #[error("Signing agent error: {0}")]
    SigningAgent(String),

    /// An upstream server answered with a non-success status.
    #[error("Upstream error [{status}]: {message}")]
    Upstream { status: u16, message: String },

    /// An upstream response was well-formed HTTP but missing expected data.
    #[error("Unexpected upstream response: {0}")]
    UnexpectedResponse(String),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Base64 decode error.
    #[error("Base64 decode error: {0}")]
    Base64DecodeError(#[from] base64::DecodeError),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Generic error.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Errors that must abort startup.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::MissingCredential(_) | Self::InvalidConfig(_) | Self::MissingSigningCapability(_)
        )
    }

    /// Errors that a later scheduled tick or request may not hit again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Http(_)
                | Self::Upstream { .. }
                | Self::UnexpectedResponse(_)
                | Self::Json(_)
                | Self::InvalidToken(_)
                | Self::SigningAgent(_)
        )
    }
}

/// Result type alias for wvrelay operations.
pub type Result<T> = std::result::Result<T, Error>;
