//! Converter dispatch: decide what a category becomes, then run the converter.
//!
//! [`plan`] is a pure table from `(category, mode)` to a [`ConversionPlan`].
//! [`dispatch`] runs a [`Converter`] in a scratch directory and hands back
//! the produced bytes; the controller commits them to the cache. Nothing is
//! written under the cache root from here, so a failed or cancelled
//! conversion leaves no artifact behind.

use crate::error::PreviewError;
use crate::output::{ArtifactKind, PreviewMode};
use crate::pipeline::classify::FormatCategory;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Output format of a real conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertTarget {
    Pdf,
    Web,
}

impl ConvertTarget {
    pub fn kind(self) -> ArtifactKind {
        match self {
            ConvertTarget::Pdf => ArtifactKind::Pdf,
            ConvertTarget::Web => ArtifactKind::Web,
        }
    }

    /// Filter name understood by `--convert-to`.
    fn soffice_filter(self) -> &'static str {
        match self {
            ConvertTarget::Pdf => "pdf",
            ConvertTarget::Web => "html",
        }
    }
}

/// What the pipeline does with a classified original.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionPlan {
    /// Serve the original as-is.
    Passthrough(ArtifactKind),
    /// Convert, then serve the result.
    Convert(ConvertTarget),
}

/// The plan for `category` under `mode`, or `None` when it cannot be previewed.
pub fn plan(category: FormatCategory, mode: PreviewMode) -> Option<ConversionPlan> {
    use ConversionPlan::*;
    match (category, mode) {
        (FormatCategory::OfficeDocLegacy | FormatCategory::OfficeDocModern, _) => {
            Some(Convert(ConvertTarget::Pdf))
        }
        (FormatCategory::Spreadsheet, PreviewMode::Auto | PreviewMode::Web) => {
            Some(Convert(ConvertTarget::Web))
        }
        (FormatCategory::Spreadsheet, PreviewMode::Pdf) => Some(Convert(ConvertTarget::Pdf)),
        (FormatCategory::Image, _) => Some(Passthrough(ArtifactKind::Image)),
        (FormatCategory::PlainText, _) => Some(Passthrough(ArtifactKind::Text)),
        (FormatCategory::Pdf, _) => Some(Passthrough(ArtifactKind::Pdf)),
        (FormatCategory::Archive | FormatCategory::Unsupported, _) => None,
    }
}

/// Turns an office document into a previewable rendering.
///
/// Implementations write their output somewhere under `out_dir` and return
/// its path. They must not touch `input`.
#[async_trait]
pub trait Converter: Send + Sync {
    async fn convert_to_pdf(&self, input: &Path, out_dir: &Path) -> Result<PathBuf, PreviewError>;

    async fn convert_to_web(&self, input: &Path, out_dir: &Path) -> Result<PathBuf, PreviewError>;
}

/// [`Converter`] backed by a headless LibreOffice (`soffice`) process.
#[derive(Debug, Clone)]
pub struct SofficeConverter {
    program: String,
}

impl SofficeConverter {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    async fn run(
        &self,
        input: &Path,
        out_dir: &Path,
        target: ConvertTarget,
    ) -> Result<PathBuf, PreviewError> {
        let filter = target.soffice_filter();
        // A private profile per run: soffice refuses to start twice on one profile.
        let profile = format!("-env:UserInstallation=file://{}", out_dir.join("profile").display());

        debug!("{} --convert-to {} {}", self.program, filter, input.display());
        let output = Command::new(&self.program)
            .arg(profile)
            .arg("--headless")
            .arg("--norestore")
            .arg("--convert-to")
            .arg(filter)
            .arg("--outdir")
            .arg(out_dir)
            .arg(input)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| PreviewError::ConversionFailed {
                detail: format!("could not start '{}': {e}", self.program),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PreviewError::ConversionFailed {
                detail: format!("'{}' exited with {}: {}", self.program, output.status, stderr.trim()),
            });
        }

        let stem = input.file_stem().unwrap_or(input.as_os_str());
        let produced = out_dir.join(stem).with_extension(filter);
        if !tokio::fs::try_exists(&produced).await.unwrap_or(false) {
            return Err(PreviewError::ConversionFailed {
                detail: format!("'{}' produced no {} output", self.program, filter),
            });
        }
        Ok(produced)
    }
}

impl Default for SofficeConverter {
    fn default() -> Self {
        Self::new("soffice")
    }
}

#[async_trait]
impl Converter for SofficeConverter {
    async fn convert_to_pdf(&self, input: &Path, out_dir: &Path) -> Result<PathBuf, PreviewError> {
        self.run(input, out_dir, ConvertTarget::Pdf).await
    }

    async fn convert_to_web(&self, input: &Path, out_dir: &Path) -> Result<PathBuf, PreviewError> {
        self.run(input, out_dir, ConvertTarget::Web).await
    }
}

/// Convert `input` to `target` and return the produced bytes.
///
/// The converter works in a scratch directory that is removed on return,
/// including when the future is dropped mid-conversion.
pub async fn dispatch(
    converter: &dyn Converter,
    input: &Path,
    target: ConvertTarget,
) -> Result<Vec<u8>, PreviewError> {
    let scratch = tempfile::Builder::new()
        .prefix("filepreview-convert-")
        .tempdir()
        .map_err(|e| PreviewError::Internal(format!("scratch directory: {e}")))?;

    info!("Converting {} to {}", input.display(), target.kind());
    let produced = match target {
        ConvertTarget::Pdf => converter.convert_to_pdf(input, scratch.path()).await?,
        ConvertTarget::Web => converter.convert_to_web(input, scratch.path()).await?,
    };

    tokio::fs::read(&produced)
        .await
        .map_err(|e| PreviewError::ConversionFailed {
            detail: format!("cannot read converter output {}: {e}", produced.display()),
        })
}
