//! Configuration for the preview pipeline.
//!
//! All pipeline behaviour is controlled through [`PreviewConfig`], built via
//! its [`PreviewConfigBuilder`]. One struct for every knob keeps the CLI,
//! tests and embedding front ends on the same defaults.

use crate::error::PreviewError;
use crate::observer::PipelineObserver;
use crate::output::PreviewMode;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for a [`crate::PreviewPipeline`].
///
/// # Example
/// ```rust
/// use filepreview::{PreviewConfig, PreviewMode};
///
/// let config = PreviewConfig::builder()
///     .cache_dir("/var/cache/filepreview")
///     .fetch_timeout_secs(30)
///     .default_mode(PreviewMode::Pdf)
///     .build()
///     .unwrap();
/// assert_eq!(config.fetch_timeout_secs, 30);
/// ```
#[derive(Clone)]
pub struct PreviewConfig {
    /// Directory holding originals and converted artifacts, one set per cache key.
    /// Default: `$TMPDIR/filepreview-cache`.
    pub cache_dir: PathBuf,

    /// Connect + transfer deadline for one fetch, in seconds. Default: 120.
    pub fetch_timeout_secs: u64,

    /// Deadline for one conversion, in seconds. Default: 180.
    ///
    /// Office-to-PDF conversion of a large deck can legitimately take a
    /// minute or more; a hung converter process must still not pin a worker.
    pub conversion_timeout_secs: u64,

    /// URL schemes the fetcher accepts. Default: `http`, `https`.
    pub allowed_schemes: Vec<String>,

    /// Mode used when the caller's hint is empty or unrecognised. Default: `Auto`.
    pub default_mode: PreviewMode,

    /// Reject URLs with an archive extension before downloading them. Default: true.
    ///
    /// Archives are never previewed, so fetching them only wastes bandwidth
    /// and disk. Disable to force content-based classification of every file.
    pub reject_archives_before_fetch: bool,

    /// Converter executable (LibreOffice). Default: `soffice`.
    pub converter_program: String,

    /// Maximum requests in flight for [`crate::PreviewPipeline::preview_batch`]. Default: 4.
    pub max_concurrency: usize,

    /// `User-Agent` header sent by the HTTP fetcher.
    pub user_agent: String,

    /// Optional observer notified of state transitions and outcomes.
    pub observer: Option<Arc<dyn PipelineObserver>>,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            cache_dir: std::env::temp_dir().join("filepreview-cache"),
            fetch_timeout_secs: 120,
            conversion_timeout_secs: 180,
            allowed_schemes: vec!["http".to_string(), "https".to_string()],
            default_mode: PreviewMode::Auto,
            reject_archives_before_fetch: true,
            converter_program: "soffice".to_string(),
            max_concurrency: 4,
            user_agent: concat!("filepreview/", env!("CARGO_PKG_VERSION")).to_string(),
            observer: None,
        }
    }
}

impl fmt::Debug for PreviewConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreviewConfig")
            .field("cache_dir", &self.cache_dir)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("conversion_timeout_secs", &self.conversion_timeout_secs)
            .field("allowed_schemes", &self.allowed_schemes)
            .field("default_mode", &self.default_mode)
            .field("reject_archives_before_fetch", &self.reject_archives_before_fetch)
            .field("converter_program", &self.converter_program)
            .field("max_concurrency", &self.max_concurrency)
            .field("observer", &self.observer.as_ref().map(|_| "<dyn PipelineObserver>"))
            .finish()
    }
}

impl PreviewConfig {
    /// Create a new builder for `PreviewConfig`.
    pub fn builder() -> PreviewConfigBuilder {
        PreviewConfigBuilder {
            config: Self::default(),
        }
    }

    /// Resolve a caller-supplied mode hint, falling back to the default mode.
    pub fn resolve_mode(&self, hint: &str) -> PreviewMode {
        if hint.trim().is_empty() {
            return self.default_mode;
        }
        match hint.parse() {
            Ok(mode) => mode,
            Err(_) => {
                tracing::warn!(
                    "Unknown preview mode hint '{}', using '{}'",
                    hint,
                    self.default_mode
                );
                self.default_mode
            }
        }
    }
}

/// Builder for [`PreviewConfig`].
#[derive(Debug)]
pub struct PreviewConfigBuilder {
    config: PreviewConfig,
}

impl PreviewConfigBuilder {
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.cache_dir = dir.into();
        self
    }

    pub fn fetch_timeout_secs(mut self, secs: u64) -> Self {
        self.config.fetch_timeout_secs = secs;
        self
    }

    pub fn conversion_timeout_secs(mut self, secs: u64) -> Self {
        self.config.conversion_timeout_secs = secs;
        self
    }

    pub fn allowed_schemes<I, S>(mut self, schemes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.allowed_schemes = schemes
            .into_iter()
            .map(|s| s.into().to_ascii_lowercase())
            .collect();
        self
    }

    pub fn default_mode(mut self, mode: PreviewMode) -> Self {
        self.config.default_mode = mode;
        self
    }

    pub fn reject_archives_before_fetch(mut self, v: bool) -> Self {
        self.config.reject_archives_before_fetch = v;
        self
    }

    pub fn converter_program(mut self, program: impl Into<String>) -> Self {
        self.config.converter_program = program.into();
        self
    }

    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.config.max_concurrency = n.max(1);
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.config.user_agent = ua.into();
        self
    }

    pub fn observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.config.observer = Some(observer);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PreviewConfig, PreviewError> {
        let c = &self.config;
        if c.cache_dir.as_os_str().is_empty() {
            return Err(PreviewError::InvalidConfig("cache_dir must not be empty".into()));
        }
        if c.fetch_timeout_secs == 0 {
            return Err(PreviewError::InvalidConfig(
                "fetch timeout must be ≥ 1 second".into(),
            ));
        }
        if c.conversion_timeout_secs == 0 {
            return Err(PreviewError::InvalidConfig(
                "conversion timeout must be ≥ 1 second".into(),
            ));
        }
        if c.allowed_schemes.is_empty() {
            return Err(PreviewError::InvalidConfig(
                "at least one URL scheme must be allowed".into(),
            ));
        }
        if c.converter_program.trim().is_empty() {
            return Err(PreviewError::InvalidConfig(
                "converter program must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}
