use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use sha2::{Digest, Sha256};

use crate::api::error::ApiError;
use crate::api::http_routes::AppState;
use crate::domain::entities::Merchant;
use crate::infrastructure::cache::rate_limiter::RateLimitDecision;

/// Hash del API key tal como se persiste (SHA-256 hex).
pub fn hash_api_key(api_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Autenticación de comercio: `Authorization: Bearer <api_key>`.
///
/// Solo comercios activos y con KYC aprobado pasan; el comercio resuelto
/// viaja en las extensiones del request.
pub async fn merchant_auth(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let api_key = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::unauthorized("Missing bearer API key"))?;

    let merchant = state
        .merchant_repo
        .find_by_api_key_hash(&hash_api_key(api_key))
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::unauthorized("Unknown API key"))?;

    if !merchant.can_transact() {
        return Err(ApiError::new(
            axum::http::StatusCode::FORBIDDEN,
            "VALIDATION_FAILED",
            "Merchant is not active or not KYC-approved",
        ));
    }

    // Per-api-key sliding window
    let decision = state
        .limiter
        .check_or_allow(
            &format!("key:{}", merchant.id),
            state.key_rate_limit_per_minute,
            Duration::from_secs(60),
        )
        .await;
    if !decision.allowed {
        return Ok(rate_limited_response(&decision));
    }

    request.extensions_mut().insert::<Merchant>(merchant);
    let mut response = next.run(request).await;
    attach_rate_limit_headers(&mut response, &decision);
    Ok(response)
}

/// Límite global por IP, antes de autenticar.
pub async fn ip_rate_limit(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let decision = state
        .limiter
        .check_or_allow(
            &format!("ip:{}", addr.ip()),
            state.ip_rate_limit_per_minute,
            Duration::from_secs(60),
        )
        .await;

    if !decision.allowed {
        return rate_limited_response(&decision);
    }

    let mut response = next.run(request).await;
    attach_rate_limit_headers(&mut response, &decision);
    response
}

fn rate_limited_response(decision: &RateLimitDecision) -> Response {
    let mut response = ApiError::new(
        axum::http::StatusCode::TOO_MANY_REQUESTS,
        "RATE_LIMITED",
        "Rate limit exceeded",
    )
    .into_response();
    attach_rate_limit_headers(&mut response, decision);
    if let Ok(value) = HeaderValue::from_str(&decision.retry_in_seconds.to_string()) {
        response.headers_mut().insert(header::RETRY_AFTER, value);
    }
    response
}

fn attach_rate_limit_headers(response: &mut Response, decision: &RateLimitDecision) {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&decision.limit.to_string()) {
        headers.insert("X-RateLimit-Limit", value);
    }
    if let Ok(value) = HeaderValue::from_str(&decision.remaining.to_string()) {
        headers.insert("X-RateLimit-Remaining", value);
    }
    if let Ok(value) = HeaderValue::from_str(&decision.retry_in_seconds.to_string()) {
        headers.insert("X-RateLimit-Reset", value);
    }
}
