// utils.rs - request helpers used across handlers

use super::error::ApiError;
use actix_web::{
    cookie::{time::Duration, Cookie, SameSite},
    http::header::USER_AGENT,
    web::{Bytes, BytesMut},
    HttpRequest,
};
use futures::{Stream, StreamExt};
use std::fmt::Display;
use tracing::debug;
use uuid::Uuid;

pub const VIEWER_COOKIE: &str = "viewer_id";

fn is_valid_viewer_id(value: &str) -> bool {
    (8..=64).contains(&value.len())
        && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Returns the viewer id from the cookie, or a fresh one when absent or malformed.
/// The flag tells the caller whether the cookie must be (re)issued.
pub fn viewer_id(req: &HttpRequest) -> (String, bool) {
    match req.cookie(VIEWER_COOKIE) {
        Some(cookie) if is_valid_viewer_id(cookie.value()) => (cookie.value().to_string(), false),
        _ => {
            debug!("No usable viewer cookie, issuing a new one");
            (Uuid::new_v4().to_string(), true)
        }
    }
}

pub fn viewer_cookie(id: &str) -> Cookie<'static> {
    Cookie::build(VIEWER_COOKIE, id.to_string())
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(Duration::days(365))
        .finish()
}

pub fn user_agent(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Collects a request body, failing as soon as it grows past `limit` bytes.
pub async fn read_limited<S, E>(mut body: S, limit: usize) -> Result<Bytes, ApiError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    let mut buf = BytesMut::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| ApiError::BadRequest(e.to_string()))?;
        if buf.len() + chunk.len() > limit {
            return Err(ApiError::PayloadTooLarge(limit));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}
