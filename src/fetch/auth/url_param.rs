use crate::fetch::client::HttpClient;
use async_trait::async_trait;
use reqwest::Request;

/// An [`HttpClient`] wrapper for feeds that take their credential as a query
/// parameter, e.g. `?api_key=...`.
pub struct UrlParam<C> {
    inner: C,
    name: String,
    value: String,
}

impl<C> UrlParam<C> {
    pub fn new(inner: C, name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            inner,
            name: name.into(),
            value: value.into(),
        }
    }

    fn authorize(&self, req: &mut Request) {
        req.url_mut()
            .query_pairs_mut()
            .append_pair(&self.name, &self.value);
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for UrlParam<C> {
    async fn execute(&self, mut req: Request) -> reqwest::Result<reqwest::Response> {
        self.authorize(&mut req);
        self.inner.execute(req).await
    }
}
