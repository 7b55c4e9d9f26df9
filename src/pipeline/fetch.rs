//! Fetching: bring the remote file's bytes home.
//!
//! The fetcher never touches the cache. It returns the bytes exactly as the
//! server sent them and leaves the commit to the controller, so a failed or
//! timed-out download can never leave a half-written artifact behind.
//!
//! No retries happen here. A retry policy wraps the whole `preview` call.

use crate::codec::has_traversal;
use crate::config::PreviewConfig;
use crate::error::{PreviewError, Stage};
use async_trait::async_trait;
use percent_encoding::percent_decode_str;
use reqwest::{StatusCode, Url};
use std::time::Duration;
use tracing::{debug, info};

/// Retrieves the bytes behind a source URL.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, source_url: &str) -> Result<Vec<u8>, PreviewError>;
}

/// Validate a source URL before anything is fetched or cached for it.
///
/// Rejects unparsable URLs, schemes outside `allowed_schemes`, URLs without
/// a host, and file names that are empty or could escape a directory.
pub fn validate_source_url(source_url: &str, allowed_schemes: &[String]) -> Result<Url, PreviewError> {
    let url = Url::parse(source_url)
        .map_err(|e| PreviewError::name_invalid(source_url, format!("not a valid URL: {e}")))?;

    let scheme = url.scheme();
    if !allowed_schemes.iter().any(|s| s.eq_ignore_ascii_case(scheme)) {
        return Err(PreviewError::name_invalid(
            source_url,
            format!("scheme '{scheme}' is not allowed"),
        ));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(PreviewError::name_invalid(source_url, "URL has no host"));
    }

    let raw_name = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or("");
    let name = percent_decode(raw_name);
    if name.is_empty() {
        return Err(PreviewError::name_invalid(source_url, "URL has no file name"));
    }
    if name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || has_traversal(&name)
        || name.chars().any(char::is_control)
    {
        return Err(PreviewError::name_invalid(
            source_url,
            format!("file name '{name}' is illegal"),
        ));
    }

    Ok(url)
}

/// Decode `%XX` escapes; malformed escapes are kept verbatim and invalid
/// UTF-8 becomes U+FFFD.
fn percent_decode(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

/// [`Fetcher`] over HTTP(S) using a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout_secs: u64,
    allowed_schemes: Vec<String>,
}

impl HttpFetcher {
    /// Build a fetcher whose client enforces the configured fetch deadline.
    pub fn new(config: &PreviewConfig) -> Result<Self, PreviewError> {
        let timeout = Duration::from_secs(config.fetch_timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| PreviewError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            timeout_secs: config.fetch_timeout_secs,
            allowed_schemes: config.allowed_schemes.clone(),
        })
    }

    fn map_reqwest_error(&self, url: &str, e: reqwest::Error) -> PreviewError {
        if e.is_timeout() {
            PreviewError::Timeout {
                stage: Stage::Fetch,
                secs: self.timeout_secs,
            }
        } else {
            PreviewError::NetworkError {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, source_url: &str) -> Result<Vec<u8>, PreviewError> {
        let url = validate_source_url(source_url, &self.allowed_schemes)?;
        info!("Downloading file from: {}", source_url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(source_url, e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Err(PreviewError::NotFound {
                url: source_url.to_string(),
            });
        }
        if !status.is_success() {
            return Err(PreviewError::NetworkError {
                url: source_url.to_string(),
                reason: format!("HTTP {status}"),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.map_reqwest_error(source_url, e))?;

        debug!("Downloaded {} bytes from {}", bytes.len(), source_url);
        Ok(bytes.to_vec())
    }
}
