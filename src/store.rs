//! Credential persistence.
//!
//! The Token Service only needs two named records, `identity` and `access`.
//! [`FileCredentialStore`] keeps each as a JSON document in one directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::CredentialsConfig;
use crate::error::{Error, Result};
use crate::session::{AccessSession, IdentityAssertion};
use crate::utils::ensure_parent_dir;

/// Record name of the identity assertion.
pub const IDENTITY_RECORD: &str = "identity";
/// Record name of the access session.
pub const ACCESS_RECORD: &str = "access";

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load the identity assertion; `Ok(None)` when it was never provisioned.
    async fn load_identity(&self) -> Result<Option<IdentityAssertion>>;

    /// Load the last persisted access session.
    async fn load_access(&self) -> Result<Option<AccessSession>>;

    /// Replace the persisted access session.
    async fn save_access(&self, session: &AccessSession) -> Result<()>;

    /// Fail with [`Error::MissingCredential`] unless both records exist.
    async fn ensure_provisioned(&self) -> Result<()> {
        if self.load_identity().await?.is_none() {
            return Err(Error::MissingCredential(IDENTITY_RECORD));
        }
        if self.load_access().await?.is_none() {
            return Err(Error::MissingCredential(ACCESS_RECORD));
        }
        Ok(())
    }
}

/// JSON files in a single directory.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    identity_path: PathBuf,
    access_path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(identity_path: impl Into<PathBuf>, access_path: impl Into<PathBuf>) -> Self {
        Self {
            identity_path: identity_path.into(),
            access_path: access_path.into(),
        }
    }

    pub fn from_config(config: &CredentialsConfig) -> Self {
        Self::new(
            config.dir.join(&config.identity_file),
            config.dir.join(&config.access_file),
        )
    }

    pub fn identity_path(&self) -> &Path {
        &self.identity_path
    }

    pub fn access_path(&self) -> &Path {
        &self.access_path
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load_identity(&self) -> Result<Option<IdentityAssertion>> {
        debug!("[Store] Reading identity record from {}", self.identity_path.display());
        read_record(&self.identity_path).await
    }

    async fn load_access(&self) -> Result<Option<AccessSession>> {
        debug!("[Store] Reading access record from {}", self.access_path.display());
        read_record(&self.access_path).await
    }

    async fn save_access(&self, session: &AccessSession) -> Result<()> {
        info!("[Store] Saving access record to {}", self.access_path.display());
        write_record(&self.access_path, session).await
    }
}

async fn read_record<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

// Write-then-rename so a crash never leaves a truncated record behind.
async fn write_record<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    ensure_parent_dir(path)?;
    let bytes = serde_json::to_vec_pretty(record)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
