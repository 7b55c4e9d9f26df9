//! Request and outcome types shared by the pipeline and its callers.
//!
//! A [`PipelineOutcome`] is the only thing the controller returns. It fully
//! determines what a front end has to render: the served artifact, a password
//! prompt, a fallback page, or an error page.

use crate::error::{ErrorKind, PreviewError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Caller preference for how office content is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewMode {
    /// Let the pipeline choose (web rendering for spreadsheets, PDF otherwise). (default)
    #[default]
    Auto,
    /// Prefer a web-native rendering where one exists.
    Web,
    /// Always go through PDF conversion.
    Pdf,
}

impl FromStr for PreviewMode {
    type Err = PreviewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(PreviewMode::Auto),
            "web" | "html" => Ok(PreviewMode::Web),
            "pdf" => Ok(PreviewMode::Pdf),
            other => Err(PreviewError::InvalidConfig(format!(
                "unknown preview mode '{other}' (expected auto, web or pdf)"
            ))),
        }
    }
}

impl fmt::Display for PreviewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreviewMode::Auto => f.write_str("auto"),
            PreviewMode::Web => f.write_str("web"),
            PreviewMode::Pdf => f.write_str("pdf"),
        }
    }
}

/// One preview request. Immutable for the duration of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewRequest {
    pub source_url: String,
    pub force_refresh: bool,
    pub mode: PreviewMode,
}

impl PreviewRequest {
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            force_refresh: false,
            mode: PreviewMode::Auto,
        }
    }

    pub fn force_refresh(mut self, v: bool) -> Self {
        self.force_refresh = v;
        self
    }

    pub fn mode(mut self, mode: PreviewMode) -> Self {
        self.mode = mode;
        self
    }
}

/// What kind of artifact a `Served` outcome points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// A PDF, either converted or the original file.
    Pdf,
    /// A web-native (HTML) rendering, used for spreadsheets.
    Web,
    /// The original image.
    Image,
    /// The original plain-text file.
    Text,
}

impl ArtifactKind {
    /// File extension used for converted artifacts of this kind.
    pub fn extension(self) -> &'static str {
        match self {
            ArtifactKind::Pdf => "pdf",
            ArtifactKind::Web => "html",
            ArtifactKind::Image => "img",
            ArtifactKind::Text => "txt",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Pdf => f.write_str("pdf"),
            ArtifactKind::Web => f.write_str("web"),
            ArtifactKind::Image => f.write_str("image"),
            ArtifactKind::Text => f.write_str("text"),
        }
    }
}

/// Why a request was turned away without being an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Archives are reported, never previewed.
    ArchiveNotPreviewable,
    /// The format has no previewer; the front end shows its generic fallback page.
    UnsupportedFormat,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::ArchiveNotPreviewable => f.write_str("archive files cannot be previewed"),
            RejectReason::UnsupportedFormat => f.write_str("file format is not supported"),
        }
    }
}

/// Terminal result of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PipelineOutcome {
    /// The artifact at `path` can be shown to the client.
    Served { path: PathBuf, kind: ArtifactKind },
    /// The document is encrypted; the original stays cached but unconverted.
    PasswordRequired { original: PathBuf },
    /// Not an error: the front end renders a normal page explaining why.
    Rejected { reason: RejectReason },
    /// The pipeline failed; `detail` is the human-readable cause.
    Failed { kind: ErrorKind, detail: String },
}

impl PipelineOutcome {
    /// The `Failed` outcome describing `err`.
    pub fn failed(err: &PreviewError) -> Self {
        PipelineOutcome::Failed {
            kind: err.kind(),
            detail: err.to_string(),
        }
    }

    pub fn is_served(&self) -> bool {
        matches!(self, PipelineOutcome::Served { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, PipelineOutcome::Failed { .. })
    }

    /// The failure classification, if this outcome is a failure.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            PipelineOutcome::Failed { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Status a transport layer should answer with.
    ///
    /// Only a token that cannot be decoded is a request-level fault; every
    /// other outcome, failures included, is a well-formed 200 page.
    pub fn status_code(&self) -> u16 {
        match self {
            PipelineOutcome::Failed {
                kind: ErrorKind::MalformedToken,
                ..
            } => 400,
            _ => 200,
        }
    }
}

impl fmt::Display for PipelineOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineOutcome::Served { path, kind } => {
                write!(f, "served {kind}: {}", path.display())
            }
            PipelineOutcome::PasswordRequired { original } => {
                write!(f, "password required: {}", original.display())
            }
            PipelineOutcome::Rejected { reason } => write!(f, "rejected: {reason}"),
            PipelineOutcome::Failed { kind, detail } => write!(f, "failed ({kind}): {detail}"),
        }
    }
}
