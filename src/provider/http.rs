//! Shared HTTP client construction, auth headers, and status mapping.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};

use crate::error::DelveError;

/// Build a client with the configured request timeout.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, DelveError> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(10)
        .build()?)
}

/// Build default headers for a Bearer-token API.
pub fn bearer_headers(api_key: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(val) = HeaderValue::from_str(&format!("Bearer {api_key}")) {
        headers.insert(AUTHORIZATION, val);
    }
    headers
}

/// Build Anthropic-style headers (x-api-key), with optional beta flags.
pub fn anthropic_headers(api_key: &str, version: &str, beta: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(val) = HeaderValue::from_str(api_key) {
        headers.insert("x-api-key", val);
    }
    if let Ok(val) = HeaderValue::from_str(version) {
        headers.insert("anthropic-version", val);
    }
    if let Some(val) = beta.and_then(|b| HeaderValue::from_str(b).ok()) {
        headers.insert("anthropic-beta", val);
    }
    headers
}

/// Build Gemini-style headers (x-goog-api-key).
pub fn google_headers(api_key: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(val) = HeaderValue::from_str(api_key) {
        headers.insert("x-goog-api-key", val);
    }
    headers
}

/// Pass a successful response through; turn anything else into an error.
pub async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, DelveError> {
    let status = resp.status().as_u16();
    if (200..300).contains(&status) {
        return Ok(resp);
    }
    let header_retry = resp
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .map(|secs| (secs * 1000.0) as u64);
    let body = resp.text().await.unwrap_or_default();
    Err(match status_to_error(status, &body) {
        DelveError::RateLimited { retry_after_ms } => DelveError::RateLimited {
            retry_after_ms: retry_after_ms.or(header_retry),
        },
        other => other,
    })
}

/// Map an HTTP error status to an error.
pub fn status_to_error(status: u16, body: &str) -> DelveError {
    match status {
        401 | 403 => DelveError::Authentication(body.to_string()),
        429 => DelveError::RateLimited {
            retry_after_ms: extract_retry_after(body),
        },
        _ => DelveError::api(status, body),
    }
}

fn extract_retry_after(body: &str) -> Option<u64> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("retry_after"))
                .and_then(|r| r.as_f64())
                .map(|s| (s * 1000.0) as u64)
        })
}
