//! HTTP retrieval of realtime feeds.
//!
//! Clients are layered: [`BasicClient`] does the request and the wrappers in
//! [`auth`] add credentials on the way through.

mod basic;
mod client;
pub mod auth;

pub use basic::BasicClient;
pub use client::HttpClient;

use anyhow::{Context, Result};
use bytes::Bytes;

/// Fetches `url` and returns the response body. Non-success statuses are errors.
pub async fn fetch_bytes<C: HttpClient + ?Sized>(client: &C, url: &str) -> Result<Bytes> {
    let req = reqwest::Request::new(
        reqwest::Method::GET,
        url.parse().with_context(|| format!("invalid feed URL {}", url))?,
    );

    let resp = client.execute(req).await?.error_for_status()?;
    Ok(resp.bytes().await?)
}

/// Reads a local file or fetches a URL.
pub async fn read_source(source: &str) -> Result<Bytes> {
    if source.starts_with("http://") || source.starts_with("https://") {
        fetch_bytes(&BasicClient::new()?, source).await
    } else {
        let raw = tokio::fs::read(source)
            .await
            .with_context(|| format!("failed to read {}", source))?;
        Ok(Bytes::from(raw))
    }
}
