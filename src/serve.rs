//! HTTP surface of the license proxy.
//!
//! Endpoints:
//! - `GET /` ping.
//! - `GET /asset?id=<asset>` prepares an asset and returns its DASH manifest.
//! - `POST /licenses` forwards a raw license challenge, returns the raw license.
//! - `POST /teardown` closes a license session named by `{"sessionToken"}`.
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::error::{Error, Result};
use crate::proxy::LicenseProxy;

pub const DASH_CONTENT_TYPE: &str = "application/dash+xml";
pub const LICENSE_CONTENT_TYPE: &str = "application/octet-stream";

/// Build the router. CORS is wide open since players call it cross-origin.
pub fn router(proxy: Arc<LicenseProxy>) -> Router {
    Router::new()
        .route("/", get(ping))
        .route("/asset", get(asset))
        .route("/licenses", post(licenses))
        .route("/teardown", post(teardown))
        .layer(CorsLayer::permissive())
        .with_state(proxy)
}

/// Serve until `cancel` fires, then shut down gracefully.
pub async fn run(
    proxy: Arc<LicenseProxy>,
    host: &str,
    port: u16,
    cancel: CancellationToken,
) -> Result<()> {
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::Other(format!("Server bind error: {}", e)))?;
    info!("[Serve] Listening on {}", addr);

    axum::serve(listener, router(proxy).into_make_service())
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| Error::Other(format!("Server error: {}", e)))?;
    info!("[Serve] Stopped");
    Ok(())
}

async fn ping() -> Response {
    with_server_header(
        StatusCode::OK,
        Json(json!({
            "status": 200,
            "message": "Pong!"
        })),
    )
}

#[derive(Debug, Deserialize)]
struct AssetQuery {
    id: Option<String>,
}

async fn asset(State(proxy): State<Arc<LicenseProxy>>, Query(query): Query<AssetQuery>) -> Response {
    let Some(asset_id) = query.id.filter(|id| !id.is_empty()) else {
        return bad_request("Missing asset id");
    };

    match proxy.request_asset(&asset_id).await {
        Ok(manifest) => body_response(DASH_CONTENT_TYPE, manifest),
        Err(e) => {
            error!("[Serve] Asset {} failed: {}", asset_id, e);
            bad_request(&format!("Could not prepare asset '{}': {}", asset_id, e))
        }
    }
}

async fn licenses(State(proxy): State<Arc<LicenseProxy>>, body: Bytes) -> Response {
    if body.is_empty() {
        return bad_request("Missing license challenge");
    }

    match proxy.submit_challenge(&body).await {
        Ok(license) => body_response(LICENSE_CONTENT_TYPE, license),
        Err(e) => {
            error!("[Serve] License request failed: {}", e);
            bad_request(&e.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TeardownRequest {
    session_token: String,
}

async fn teardown(
    State(proxy): State<Arc<LicenseProxy>>,
    body: std::result::Result<Json<TeardownRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) if !request.session_token.is_empty() => request,
        Ok(_) => return bad_request("Missing sessionToken"),
        Err(rejection) => return bad_request(&rejection.body_text()),
    };

    proxy.teardown(&request.session_token).await;
    with_server_header(
        StatusCode::OK,
        Json(json!({
            "status": 200,
            "message": "Teardown attempted"
        })),
    )
}

fn bad_request(message: &str) -> Response {
    with_server_header(
        StatusCode::BAD_REQUEST,
        Json(json!({
            "status": 400,
            "message": message
        })),
    )
}

fn body_response(content_type: &'static str, body: Vec<u8>) -> Response {
    let mut response = with_server_header(StatusCode::OK, body);
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn with_server_header(status: StatusCode, body: impl IntoResponse) -> Response {
    let mut response = body.into_response();
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::SERVER,
        HeaderValue::from_static(concat!("wvrelay/", env!("CARGO_PKG_VERSION"))),
    );
    response
}
