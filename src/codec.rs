//! URL codec: client tokens in, source URLs and cache keys out.
//!
//! Clients never send a raw URL. They send the URL as URL-safe base64
//! (`+` → `-`, `/` → `_`, padding stripped), which survives query strings
//! untouched. [`decode`] reverses that and rejects anything that could be
//! used to escape the cache directory.
//!
//! [`derive_cache_key`] turns a URL into a file name that is safe on every
//! filesystem yet still shows where it came from: a sanitised stem, a
//! SHA-256 fragment for uniqueness, and the original extension so the
//! classifier can still fall back on it.

use crate::error::PreviewError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Hex characters of the URL digest kept in the key (128 bits).
const HASH_HEX_LEN: usize = 32;
const MAX_STEM_CHARS: usize = 48;
const MAX_EXT_CHARS: usize = 10;

/// A `..` segment delimited by start/end or any slash flavour.
static RE_TRAVERSAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(^|[/\\])\.\.([/\\]|$)").unwrap());

/// Deterministic, filesystem-safe name for everything cached for one URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercase extension recovered from the source URL, if any.
    pub fn extension(&self) -> Option<&str> {
        let (_, ext) = self.0.rsplit_once('.')?;
        Some(ext)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Encode a source URL as a client token.
pub fn encode(source_url: &str) -> String {
    URL_SAFE_NO_PAD.encode(source_url.as_bytes())
}

/// Decode a client token into the source URL it carries.
///
/// Accepts padded and unpadded tokens, and tolerates the standard base64
/// alphabet (`+`, `/`) as well as the URL-safe one.
pub fn decode(token: &str) -> Result<String, PreviewError> {
    let normalised: String = token
        .trim()
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect();

    if normalised.is_empty() {
        return Err(PreviewError::malformed("token is empty"));
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(normalised.as_bytes())
        .map_err(|e| PreviewError::malformed(format!("not valid base64: {e}")))?;
    let url = String::from_utf8(bytes)
        .map_err(|_| PreviewError::malformed("decoded bytes are not UTF-8"))?;
    check_source_url(&url)
}

/// Apply the checks [`decode`] runs on a decoded URL to one that arrived
/// without a token. Returns the trimmed URL.
pub fn check_source_url(url: &str) -> Result<String, PreviewError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(PreviewError::malformed("URL is empty"));
    }
    if url.chars().any(char::is_control) {
        return Err(PreviewError::malformed("URL contains control characters"));
    }
    if has_traversal(url) {
        return Err(PreviewError::malformed("URL contains a path traversal segment"));
    }
    Ok(url.to_string())
}

/// True if `s` contains a `..` path segment.
pub fn has_traversal(s: &str) -> bool {
    RE_TRAVERSAL.is_match(s)
}

/// Last path segment of a URL, without query string or fragment.
///
/// Still percent-encoded; callers that need the decoded form use
/// [`crate::pipeline::fetch::validate_source_url`].
pub fn file_name(source_url: &str) -> &str {
    let without_fragment = source_url.split('#').next().unwrap_or(source_url);
    let without_query = without_fragment
        .split('?')
        .next()
        .unwrap_or(without_fragment);
    let path = match without_query.split_once("://") {
        Some((_, rest)) => rest.split_once('/').map(|(_, p)| p).unwrap_or(""),
        None => without_query,
    };
    path.rsplit('/').next().unwrap_or("")
}

/// Lowercase extension of the URL's file name, if it has one.
pub fn url_extension(source_url: &str) -> Option<String> {
    split_name(file_name(source_url)).1
}

/// Derive the cache key for a source URL. Pure and deterministic.
pub fn derive_cache_key(source_url: &str) -> CacheKey {
    let digest = hex::encode(Sha256::digest(source_url.as_bytes()));
    let (stem, ext) = split_name(file_name(source_url));

    let mut key = format!("{}-{}", sanitise_stem(stem), &digest[..HASH_HEX_LEN]);
    if let Some(ext) = ext {
        key.push('.');
        key.push_str(&ext);
    }
    CacheKey(key)
}

/// Split a file name into stem and normalised extension.
fn split_name(name: &str) -> (&str, Option<String>) {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
            let ext: String = ext
                .chars()
                .filter(char::is_ascii_alphanumeric)
                .take(MAX_EXT_CHARS)
                .collect::<String>()
                .to_ascii_lowercase();
            if ext.is_empty() {
                (stem, None)
            } else {
                (stem, Some(ext))
            }
        }
        _ => (name, None),
    }
}

fn sanitise_stem(stem: &str) -> String {
    let cleaned: String = stem
        .chars()
        .take(MAX_STEM_CHARS)
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}
