//! Minimal HTTP plumbing shared by the warehouse clients.
//!
//! Everything goes through the [`HttpClient`] trait so that request
//! decoration (authentication) stays a wrapper concern.

mod basic;
mod client;
pub mod auth;

pub use basic::BasicClient;
pub use client::HttpClient;

use reqwest::header::{CONTENT_TYPE, HeaderValue};
use reqwest::{Method, Request, StatusCode, Url};

/// A response reduced to what callers inspect: status and body text.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub body: String,
}

impl RawResponse {
    /// Body parsed as JSON; empty or non-JSON bodies become `Null`.
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap_or(serde_json::Value::Null)
    }
}

/// Builds a request with an optional body of the given content type.
pub fn build_request(
    method: Method,
    url: Url,
    body: Option<(&'static str, Vec<u8>)>,
) -> Request {
    let mut req = Request::new(method, url);
    if let Some((content_type, bytes)) = body {
        req.headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        *req.body_mut() = Some(bytes.into());
    }
    req
}

/// Sends `req` and reads the whole body.
pub async fn send<C: HttpClient + ?Sized>(client: &C, req: Request) -> reqwest::Result<RawResponse> {
    let resp = client.execute(req).await?;
    let status = resp.status();
    let body = resp.text().await?;
    Ok(RawResponse { status, body })
}
