use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_ENCODING};
use reqwest::Client;

use crate::core::state::EngineSettings;

const APP_USER_AGENT: &str = concat!("LauncherEngine/", env!("CARGO_PKG_VERSION"));

/// Shared client for every transfer. Identity encoding keeps
/// `Content-Length` equal to the bytes that reach the disk.
pub fn build_http_client(settings: &EngineSettings) -> Result<Client, reqwest::Error> {
    let mut default_headers = HeaderMap::new();
    default_headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));

    Client::builder()
        .user_agent(APP_USER_AGENT)
        .default_headers(default_headers)
        .connect_timeout(Duration::from_secs(settings.connect_timeout_secs.max(1)))
        .build()
}
