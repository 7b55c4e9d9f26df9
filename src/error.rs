//! Error types for the filepreview library.
//!
//! Two layers reflect two different audiences:
//!
//! * [`PreviewError`]: the rich internal error every pipeline stage returns.
//!   It carries paths, URLs and underlying causes so logs are actionable.
//!
//! * [`ErrorKind`]: the closed, serialisable classification of a failure.
//!   It is what ends up inside [`crate::output::PipelineOutcome::Failed`] and
//!   what a front end switches on to choose an error page.
//!
//! Non-error terminal results (archives, unsupported formats, password
//! protected documents) are not errors at all; they are modelled as
//! [`crate::output::PipelineOutcome`] variants.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the preview pipeline.
///
/// Every variant maps onto exactly one [`ErrorKind`] via [`PreviewError::kind`].
#[derive(Debug, Error)]
pub enum PreviewError {
    // ── Request errors ────────────────────────────────────────────────────
    /// The client token is not valid URL-safe base64 or decodes to something unsafe.
    #[error("Malformed preview token: {reason}")]
    MalformedToken { reason: String },

    /// The source URL failed validation (scheme, host or file name).
    #[error("Illegal source '{url}': {reason}")]
    NameInvalid { url: String, reason: String },

    // ── Fetch errors ──────────────────────────────────────────────────────
    /// The remote server reported that the resource does not exist.
    #[error("Remote file not found: '{url}'")]
    NotFound { url: String },

    /// Connection failure, unexpected HTTP status or a broken body stream.
    #[error("Failed to download '{url}': {reason}")]
    NetworkError { url: String, reason: String },

    /// A fetch or conversion exceeded its deadline.
    #[error("{stage} timed out after {secs}s")]
    Timeout { stage: Stage, secs: u64 },

    // ── Store errors ──────────────────────────────────────────────────────
    /// Writing an artifact into the cache failed; the prior entry is intact.
    #[error("Failed to write cache artifact '{path}': {source}")]
    StoreWriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading cache metadata failed for a reason other than absence.
    #[error("Failed to read cache artifact '{path}': {source}")]
    StoreReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Document errors ───────────────────────────────────────────────────
    /// The document container is damaged (distinct from password protection).
    #[error("File '{path}' is corrupted or unrecognizable: {detail}")]
    CorruptedDocument { path: PathBuf, detail: String },

    /// The external converter reported an error.
    #[error("Conversion failed: {detail}")]
    ConversionFailed { detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error (task panic, illegal state transition).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// The suspension point that hit its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Conversion,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Fetch => f.write_str("Fetch"),
            Stage::Conversion => f.write_str("Conversion"),
        }
    }
}

/// Closed classification of pipeline failures, carried by `Failed` outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MalformedToken,
    NotFound,
    NetworkError,
    NameInvalid,
    StoreWriteError,
    StoreReadError,
    CorruptedDocument,
    ConversionFailed,
    Timeout,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::MalformedToken => "malformed_token",
            ErrorKind::NotFound => "not_found",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::NameInvalid => "name_invalid",
            ErrorKind::StoreWriteError => "store_write_error",
            ErrorKind::StoreReadError => "store_read_error",
            ErrorKind::CorruptedDocument => "corrupted_document",
            ErrorKind::ConversionFailed => "conversion_failed",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

impl PreviewError {
    /// Classify this error for the outcome surface.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PreviewError::MalformedToken { .. } => ErrorKind::MalformedToken,
            PreviewError::NameInvalid { .. } => ErrorKind::NameInvalid,
            PreviewError::NotFound { .. } => ErrorKind::NotFound,
            PreviewError::NetworkError { .. } => ErrorKind::NetworkError,
            PreviewError::Timeout { .. } => ErrorKind::Timeout,
            PreviewError::StoreWriteError { .. } => ErrorKind::StoreWriteError,
            PreviewError::StoreReadError { .. } => ErrorKind::StoreReadError,
            PreviewError::CorruptedDocument { .. } => ErrorKind::CorruptedDocument,
            PreviewError::ConversionFailed { .. } => ErrorKind::ConversionFailed,
            PreviewError::InvalidConfig(_) | PreviewError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        PreviewError::MalformedToken {
            reason: reason.into(),
        }
    }

    pub(crate) fn name_invalid(url: &str, reason: impl Into<String>) -> Self {
        PreviewError::NameInvalid {
            url: url.to_string(),
            reason: reason.into(),
        }
    }
}
