mod api_key;
mod url_param;

pub use api_key::ApiKey;
pub use url_param::UrlParam;

use super::{BasicClient, HttpClient};
use crate::config::FeedAuth;

/// Builds the client stack for one feed's credentials.
pub fn client_for(auth: &FeedAuth) -> anyhow::Result<Box<dyn HttpClient>> {
    Ok(match auth {
        FeedAuth::None => Box::new(BasicClient::new()?),
        FeedAuth::UrlParam { name, value } => Box::new(UrlParam::new(BasicClient::new()?, name, value)),
        FeedAuth::Header { name, value } => Box::new(ApiKey::new(BasicClient::new()?, name, value)?),
    })
}
