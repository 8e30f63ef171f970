use super::client::HttpClient;
use async_trait::async_trait;
use std::time::Duration;

/// Feeds that take longer than this are treated as failed cycles.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct BasicClient(reqwest::Client);

impl BasicClient {
    pub fn new() -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self(client))
    }
}

#[async_trait]
impl HttpClient for BasicClient {
    async fn execute(&self, req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        self.0.execute(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_builds_client() {
        assert!(BasicClient::new().is_ok());
    }
}
