use crate::fetch::client::HttpClient;
use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};

/// An [`HttpClient`] wrapper that sends a credential as an HTTP header.
///
/// The header name and value are validated when the wrapper is built, so a
/// bad configuration fails at startup instead of on every request.
pub struct ApiKey<C> {
    inner: C,
    header_name: HeaderName,
    key: HeaderValue,
}

impl<C> ApiKey<C> {
    pub fn new(inner: C, header_name: &str, key: &str) -> anyhow::Result<Self> {
        let header_name = HeaderName::from_bytes(header_name.as_bytes())
            .with_context(|| format!("invalid header name {:?}", header_name))?;
        let mut key = HeaderValue::from_str(key).context("invalid header value")?;
        key.set_sensitive(true);
        Ok(Self {
            inner,
            header_name,
            key,
        })
    }

    /// `Authorization: Bearer <key>`
    pub fn bearer(inner: C, key: &str) -> anyhow::Result<Self> {
        Self::new(inner, "Authorization", &format!("Bearer {key}"))
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for ApiKey<C> {
    async fn execute(&self, mut req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        req.headers_mut()
            .insert(self.header_name.clone(), self.key.clone());
        self.inner.execute(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::BasicClient;

    #[test]
    fn test_invalid_header_name_is_rejected() {
        assert!(ApiKey::new(BasicClient::new().unwrap(), "bad header", "k").is_err());
        assert!(ApiKey::new(BasicClient::new().unwrap(), "x-api-key", "k").is_ok());
    }

    #[test]
    fn test_bearer_value() {
        let client = ApiKey::bearer(BasicClient::new().unwrap(), "abc").unwrap();
        assert_eq!(client.header_name, "authorization");
        assert_eq!(client.key, "Bearer abc");
    }
}
