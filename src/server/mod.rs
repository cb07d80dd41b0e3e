//! Same-origin image proxy. Browsers refuse to read pixel data from
//! cross-origin card images, so the CLI's companion server fetches them
//! upstream and re-serves the bytes with permissive CORS.

use crate::core::assemble::sniff_format;
use crate::utils::error::Result;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use image::ImageFormat;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use url::Url;

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(15);

/// Bodies under this size are broken upstream responses dressed as 200s.
const MIN_BODY_BYTES: usize = 1000;

/// Hosts the proxy will fetch from when no allowlist is given.
pub const DEFAULT_ALLOWED_HOSTS: &[&str] = &[
    "cards.scryfall.io",
    "api.scryfall.com",
    "svc.edhrec.com",
];

#[derive(Clone)]
struct ProxyState {
    client: reqwest::Client,
    allowed_hosts: Arc<Vec<String>>,
}

#[derive(Deserialize)]
struct ImageQuery {
    url: Option<String>,
}

pub fn build_router(allowed_hosts: Vec<String>) -> Result<Router> {
    build_router_with_timeout(allowed_hosts, UPSTREAM_TIMEOUT)
}

pub fn build_router_with_timeout(
    allowed_hosts: Vec<String>,
    upstream_timeout: Duration,
) -> Result<Router> {
    let client = reqwest::Client::builder()
        .timeout(upstream_timeout)
        .build()?;
    let state = ProxyState {
        client,
        allowed_hosts: Arc::new(
            allowed_hosts.into_iter().map(|h| h.to_lowercase()).collect(),
        ),
    };

    Ok(Router::new()
        .route("/image-proxy", get(proxy_image))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http()))
}

pub async fn run(port: u16, allowed_hosts: Vec<String>) -> Result<()> {
    let app = build_router(allowed_hosts)?;
    let addr = format!("0.0.0.0:{port}");
    tracing::info!("🖼️  image proxy listening on http://{addr}/image-proxy");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn proxy_image(State(state): State<ProxyState>, Query(q): Query<ImageQuery>) -> Response {
    let Some(raw) = q.url else {
        return error_json(StatusCode::BAD_REQUEST, "missing url parameter");
    };
    let target = match Url::parse(&raw) {
        Ok(u) if matches!(u.scheme(), "http" | "https") => u,
        _ => return error_json(StatusCode::BAD_REQUEST, "url parameter is not a valid http(s) URL"),
    };
    let Some(host) = target.host_str() else {
        return error_json(StatusCode::BAD_REQUEST, "url has no hostname");
    };
    if !host_allowed(host, &state.allowed_hosts) {
        tracing::warn!("refusing to proxy non-allowlisted host {host}");
        return error_json(StatusCode::FORBIDDEN, "host is not on the allowlist");
    }

    tracing::debug!("proxying {target}");
    let upstream = match state.client.get(target.clone()).send().await {
        Ok(resp) => resp,
        Err(e) if e.is_timeout() => {
            return error_json(StatusCode::GATEWAY_TIMEOUT, "upstream fetch timed out");
        }
        Err(e) => {
            tracing::warn!("upstream fetch failed: {e}");
            return error_json(StatusCode::INTERNAL_SERVER_ERROR, "upstream fetch failed");
        }
    };

    let status = upstream.status();
    if !status.is_success() {
        let passthrough = StatusCode::from_u16(status.as_u16())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return error_json(passthrough, &format!("upstream returned {status}"));
    }

    let declared_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let body = match upstream.bytes().await {
        Ok(b) => b,
        Err(e) if e.is_timeout() => {
            return error_json(StatusCode::GATEWAY_TIMEOUT, "upstream fetch timed out");
        }
        Err(e) => {
            tracing::warn!("upstream body read failed: {e}");
            return error_json(StatusCode::INTERNAL_SERVER_ERROR, "upstream body read failed");
        }
    };
    if body.len() < MIN_BODY_BYTES {
        return error_json(
            StatusCode::INTERNAL_SERVER_ERROR,
            "upstream body too small to be a card image",
        );
    }

    let content_type = declared_type
        .filter(|t| t.starts_with("image/"))
        .unwrap_or_else(|| sniffed_content_type(&body).to_string());

    (
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_LENGTH, body.len().to_string()),
            (
                header::CACHE_CONTROL,
                "public, max-age=0, must-revalidate".to_string(),
            ),
        ],
        body,
    )
        .into_response()
}

fn host_allowed(host: &str, allowed: &[String]) -> bool {
    let host = host.to_lowercase();
    allowed
        .iter()
        .any(|a| host == *a || host.ends_with(&format!(".{a}")))
}

fn sniffed_content_type(bytes: &[u8]) -> &'static str {
    match sniff_format(bytes) {
        Some(ImageFormat::Jpeg) => "image/jpeg",
        Some(ImageFormat::Png) => "image/png",
        _ => "application/octet-stream",
    }
}

fn error_json(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
