//! HTTP client for the entitlement, DRM session and license endpoints.
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Response;
use serde::{Deserialize, Serialize};

use crate::asset::{AssetErrorResponse, AssetResponse};
use crate::config::{Config, Endpoints, Profile};
use crate::device::{device_headers, DeviceSession, RequestSignature};
use crate::error::{Error, Result};

/// Header carrying DRM authorization tokens.
pub const NV_AUTHORIZATIONS: &str = "nv-authorizations";

/// Response of the session-setup endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupResponse {
    #[serde(default)]
    pub heartbeat: Option<u64>,
    pub session_token: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewLicenseResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    license: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenewalLicenseResponse {
    license: String,
    session_token: String,
    #[serde(default)]
    error_code: Option<i64>,
}

#[derive(Debug, Serialize)]
struct LicenseRequestBody<'a> {
    challenge: &'a str,
}

/// A renewed license and the rotated license-session token.
#[derive(Debug, Clone)]
pub struct Renewal {
    pub license: Vec<u8>,
    pub session_token: String,
}

#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    endpoints: Endpoints,
    profile: Profile,
    app_version: String,
    manifest_user_agent: String,
}

impl UpstreamClient {
    pub fn new(
        http: reqwest::Client,
        endpoints: Endpoints,
        profile: Profile,
        app_version: impl Into<String>,
        manifest_user_agent: impl Into<String>,
    ) -> Self {
        Self {
            http,
            endpoints,
            profile,
            app_version: app_version.into(),
            manifest_user_agent: manifest_user_agent.into(),
        }
    }

    pub fn from_config(config: &Config, http: reqwest::Client) -> Self {
        Self::new(
            http,
            config.endpoints.clone(),
            config.profile.clone(),
            config.app_version.clone(),
            config.manifest_user_agent.clone(),
        )
    }

    /// Fetch the signed entitlement descriptor for an asset.
    pub async fn fetch_asset(
        &self,
        asset_id: &str,
        access_token: &str,
        device: &DeviceSession,
        signature: &RequestSignature,
    ) -> Result<AssetResponse> {
        let client = &self.profile.client;
        let signature_header = signature.header_value();
        let mut headers = device_headers(&self.profile.device)?;
        for (name, value) in [
            ("x-core-authorizationtime", signature.authorization_time.as_str()),
            ("x-core-signalgo", device.descriptor.sign_algo.as_str()),
            ("x-core-signkey", device.descriptor.encrypted_sign_key.as_str()),
            ("x-core-signature", signature_header.as_str()),
            ("x-core-deviceid", self.profile.device.id.as_str()),
            ("x-core-profileid", client.profile_id.as_str()),
            ("x-core-appversion", self.app_version.as_str()),
            ("x-core-contentratinglimit", "0"),
            ("x-apikey", client.authz_id.as_str()),
        ] {
            headers.insert(name, header_value(name, value)?);
        }

        let response = self
            .http
            .get(self.endpoints.asset_url(asset_id))
            .query(&[
                ("sessionType", "view"),
                ("access_token", access_token),
                ("client_id", client.authz_id.as_str()),
            ])
            .headers(headers)
            .header(USER_AGENT, &self.profile.user_agent)
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<AssetErrorResponse>(&body)
                .map(|e| e.describe())
                .unwrap_or(body);
            return Err(Error::Upstream {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }

    /// Open a DRM license session for a content-license token.
    pub async fn setup_license_session(&self, content_license_token: &str) -> Result<SetupResponse> {
        let response = self
            .http
            .post(&self.endpoints.license_setup)
            .headers(self.drm_headers(content_license_token)?)
            .send()
            .await?;
        Ok(ensure_success(response).await?.json().await?)
    }

    /// Request a new license (or the service certificate).
    pub async fn new_license(
        &self,
        content_license_token: &str,
        license_session_token: &str,
        challenge_b64: &str,
    ) -> Result<Vec<u8>> {
        let authorization = format!("{},{}", content_license_token, license_session_token);
        let response = self
            .http
            .post(&self.endpoints.license_new)
            .headers(self.drm_headers(&authorization)?)
            .json(&LicenseRequestBody {
                challenge: challenge_b64,
            })
            .send()
            .await?;

        let body: NewLicenseResponse = ensure_success(response).await?.json().await?;
        let license = body.license.into_iter().next().ok_or_else(|| {
            Error::UnexpectedResponse(format!(
                "new license response without license (status {:?}, error code {:?})",
                body.status, body.error_code
            ))
        })?;
        Ok(STANDARD.decode(license)?)
    }

    /// Renew the license; the response carries a rotated session token.
    pub async fn renew_license(
        &self,
        license_session_token: &str,
        challenge_b64: &str,
    ) -> Result<Renewal> {
        let response = self
            .http
            .post(&self.endpoints.license_renewal)
            .headers(self.drm_headers(license_session_token)?)
            .json(&LicenseRequestBody {
                challenge: challenge_b64,
            })
            .send()
            .await?;

        let body: RenewalLicenseResponse = ensure_success(response).await?.json().await?;
        if let Some(code) = body.error_code.filter(|code| *code != 0) {
            debug!("[Upstream] Renewal answered with error code {}", code);
        }
        Ok(Renewal {
            license: STANDARD.decode(body.license)?,
            session_token: body.session_token,
        })
    }

    /// Close a DRM license session.
    pub async fn teardown(&self, license_session_token: &str) -> Result<()> {
        let response = self
            .http
            .post(&self.endpoints.license_teardown)
            .headers(self.drm_headers(license_session_token)?)
            .send()
            .await?;
        ensure_success(response).await?;
        Ok(())
    }

    /// Fetch a manifest verbatim with the manifest-specific user agent.
    pub async fn fetch_manifest(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .header(USER_AGENT, &self.manifest_user_agent)
            .send()
            .await?;
        Ok(ensure_success(response).await?.bytes().await?.to_vec())
    }

    fn drm_headers(&self, authorization: &str) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(NV_AUTHORIZATIONS, header_value(NV_AUTHORIZATIONS, authorization)?);
        headers.insert(USER_AGENT, header_value("User-Agent", &self.profile.user_agent)?);
        Ok(headers)
    }
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| Error::Other(format!("Invalid value for header {}: {}", name, e)))
}

async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    Err(Error::Upstream {
        status: status.as_u16(),
        message: response.text().await.unwrap_or_default(),
    })
}
