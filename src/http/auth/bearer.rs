use crate::http::client::HttpClient;
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderValue, InvalidHeaderValue};

/// An [`HttpClient`] wrapper that sends `Authorization: Bearer <token>` on
/// every request.
///
/// The header value is built once and marked sensitive so it never shows up
/// in debug output.
pub struct Bearer<C> {
    inner: C,
    header: HeaderValue,
}

impl<C> Bearer<C> {
    pub fn new(inner: C, token: &str) -> Result<Self, InvalidHeaderValue> {
        let mut header = HeaderValue::from_str(&format!("Bearer {token}"))?;
        header.set_sensitive(true);
        Ok(Self { inner, header })
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for Bearer<C> {
    async fn execute(&self, mut req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        req.headers_mut().insert(AUTHORIZATION, self.header.clone());
        self.inner.execute(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_is_sensitive() {
        let bearer = Bearer::new((), "ya29.token").unwrap();
        assert!(bearer.header.is_sensitive());
        assert_eq!(bearer.header.to_str().unwrap(), "Bearer ya29.token");
    }

    #[test]
    fn test_rejects_newlines_in_token() {
        assert!(Bearer::new((), "bad\ntoken").is_err());
    }
}
