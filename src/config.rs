//! Configuration loaded from YAML, with environment overrides.
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Placeholder substituted with the asset id in [`Endpoints::asset`].
pub const ASSET_PLACEHOLDER: &str = "{asset}";

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Application version advertised in `X-Core-AppVersion`.
    pub app_version: String,
    /// User agent used only when fetching manifests.
    pub manifest_user_agent: String,
    /// Per-call timeout for every upstream request.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    pub profile: Profile,
    #[serde(default)]
    pub signing_agent: Option<SigningAgentConfig>,
    #[serde(default)]
    pub services: ServicesConfig,
    #[serde(default)]
    pub endpoints: Endpoints,
}

/// Where the two credential records live.
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialsConfig {
    pub dir: PathBuf,
    #[serde(default = "default_identity_file")]
    pub identity_file: String,
    #[serde(default = "default_access_file")]
    pub access_file: String,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("files"),
            identity_file: default_identity_file(),
            access_file: default_access_file(),
        }
    }
}

/// The impersonated application client, account and device.
#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    pub user_agent: String,
    pub client: ClientProfile,
    #[serde(default)]
    pub device: DeviceProfile,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientProfile {
    /// Identity (AuthN) client id; informational.
    #[serde(default)]
    pub authn_id: Option<String>,
    /// Authorization (AuthZ) client id, also the API key.
    pub authz_id: String,
    /// Pre-encoded `Basic` credential for the token endpoint.
    pub authz_basic: String,
    pub account_id: String,
    pub profile_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceProfile {
    #[serde(default)]
    pub id: String,
    pub sub_type: String,
    pub brand_id: String,
    pub model_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: String,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            id: String::new(),
            sub_type: "PC".to_string(),
            brand_id: "PC".to_string(),
            model_id: "Firefox".to_string(),
            name: "PC Firefox".to_string(),
            device_type: "web".to_string(),
        }
    }
}

/// HTTP bridge realizing the Device Signing Agent.
#[derive(Debug, Clone, Deserialize)]
pub struct SigningAgentConfig {
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServicesConfig {
    #[serde(default)]
    pub proxy: ProxyServiceConfig,
    #[serde(default)]
    pub session: SessionServiceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyServiceConfig {
    #[serde(default)]
    pub disabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ProxyServiceConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionServiceConfig {
    #[serde(default)]
    pub disabled: bool,
    /// Six-field cron expression (seconds first).
    #[serde(default = "default_cron")]
    pub cron: String,
}

impl Default for SessionServiceConfig {
    fn default() -> Self {
        Self {
            disabled: false,
            cron: default_cron(),
        }
    }
}

/// Upstream endpoints. Defaults point at production.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub token: String,
    pub sign_in: String,
    /// Descriptor URL template containing [`ASSET_PLACEHOLDER`].
    pub asset: String,
    pub license_setup: String,
    pub license_new: String,
    pub license_renewal: String,
    pub license_teardown: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            token: "https://apigee.nos.pt/nosid/oauth2/v3/token".to_string(),
            sign_in: "https://tyr-prod.apigee.net/nostv/ott/devices/signin".to_string(),
            asset: "https://tyr-prod.apigee.net/nostv/ott/v2/assets/{asset}/video/DASH/path"
                .to_string(),
            license_setup:
                "https://nos71zv1-ssm.anycast.nagra.com/NOS71ZV1/ssm/v1/sessions/setup".to_string(),
            license_new: "https://nos71zv1-ssm.anycast.nagra.com/NOS71ZV1/wvls/contentlicenseservice/v1/licenses".to_string(),
            license_renewal:
                "https://nos71zv1-ssm.anycast.nagra.com/NOS71ZV1/ssm/v1/renewal-license-wv"
                    .to_string(),
            license_teardown:
                "https://nos71zv1-ssm.anycast.nagra.com/NOS71ZV1/ssm/v1/sessions/teardown"
                    .to_string(),
        }
    }
}

impl Endpoints {
    /// Descriptor URL for one asset.
    #[must_use]
    pub fn asset_url(&self, asset_id: &str) -> String {
        self.asset.replace(ASSET_PLACEHOLDER, asset_id)
    }
}

impl Config {
    /// Parse a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Read, override from the environment, and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let yaml = std::fs::read_to_string(path.as_ref())?;
        let mut config = Self::from_yaml(&yaml)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `WVRELAY_*` overrides from `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("WVRELAY_PROXY_DISABLED") {
            self.services.proxy.disabled = parse_flag(&v);
        }
        if let Some(v) = lookup("WVRELAY_PROXY_HOST") {
            self.services.proxy.host = v;
        }
        if let Some(v) = lookup("WVRELAY_PROXY_PORT") {
            self.services.proxy.port = v
                .parse()
                .map_err(|_| Error::InvalidConfig(format!("WVRELAY_PROXY_PORT '{}' is not a port", v)))?;
        }
        if let Some(v) = lookup("WVRELAY_SESSION_DISABLED") {
            self.services.session.disabled = parse_flag(&v);
        }
        if let Some(v) = lookup("WVRELAY_SESSION_CRON") {
            self.services.session.cron = v;
        }
        if let Some(v) = lookup("WVRELAY_SIGNING_AGENT_URL") {
            self.signing_agent = Some(SigningAgentConfig { url: v });
        }
        if let Some(v) = lookup("WVRELAY_CREDENTIALS_DIR") {
            self.credentials.dir = PathBuf::from(v);
        }
        Ok(())
    }

    /// Reject settings that would only fail later at runtime.
    pub fn validate(&self) -> Result<()> {
        self.session_schedule()?;
        if !self.endpoints.asset.contains(ASSET_PLACEHOLDER) {
            return Err(Error::InvalidConfig(format!(
                "asset endpoint '{}' lacks the {} placeholder",
                self.endpoints.asset, ASSET_PLACEHOLDER
            )));
        }
        if self.profile.client.account_id.is_empty() || self.profile.client.profile_id.is_empty() {
            return Err(Error::InvalidConfig(
                "profile.client.account_id and profile_id are required".to_string(),
            ));
        }
        Ok(())
    }

    /// Parsed refresh schedule.
    pub fn session_schedule(&self) -> Result<cron::Schedule> {
        cron::Schedule::from_str(&self.services.session.cron).map_err(|e| {
            Error::InvalidConfig(format!(
                "invalid session cron '{}': {}",
                self.services.session.cron, e
            ))
        })
    }

    /// Per-call upstream timeout.
    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// The signing agent settings, or the fatal configuration error.
    pub fn require_signing_agent(&self) -> Result<&SigningAgentConfig> {
        self.signing_agent
            .as_ref()
            .filter(|agent| !agent.url.is_empty())
            .ok_or_else(|| {
                Error::MissingSigningCapability("signing_agent.url is not configured".to_string())
            })
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_identity_file() -> String {
    "identity.json".to_string()
}

fn default_access_file() -> String {
    "access.json".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8786
}

fn default_cron() -> String {
    "0 */30 * * * *".to_string()
}
