//! # filepreview
//!
//! On-demand document preview: fetch a remote file once, cache it, and turn
//! it into something a browser can show.
//!
//! ## Pipeline Overview
//!
//! ```text
//! token
//!  │
//!  ├─ 1. Decode    URL-safe base64 → source URL, traversal checks
//!  ├─ 2. Cache     per-key lock, lookup; hit skips the download
//!  ├─ 3. Fetch     HTTP(S) download, committed atomically
//!  ├─ 4. Classify  extension first, magic bytes as a fallback
//!  ├─ 5. Protect   encrypted office documents stop here
//!  └─ 6. Convert   soffice → PDF or HTML, cached next to the original
//! ```
//!
//! Every request ends in exactly one [`PipelineOutcome`]: the artifact to
//! serve, a password prompt, a rejection (archives, unknown formats), or a
//! failure with an [`ErrorKind`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use filepreview::{codec, PreviewConfig, PreviewPipeline};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PreviewConfig::builder()
//!         .cache_dir("/var/cache/filepreview")
//!         .build()?;
//!     let pipeline = PreviewPipeline::from_config(config)?;
//!
//!     let token = codec::encode("http://localhost:8012/Sample1.docx");
//!     let outcome = pipeline.preview(&token, false, "").await;
//!     println!("{outcome}");
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `filepreview` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when embedding the library:
//! ```toml
//! filepreview = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod codec;
pub mod config;
pub mod controller;
pub mod error;
pub mod observer;
pub mod output;
pub mod pipeline;
pub mod state;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use codec::CacheKey;
pub use config::{PreviewConfig, PreviewConfigBuilder};
pub use controller::{preview_sync, PreviewPipeline};
pub use error::{ErrorKind, PreviewError, Stage};
pub use observer::{NoopObserver, PipelineObserver};
pub use output::{ArtifactKind, PipelineOutcome, PreviewMode, PreviewRequest, RejectReason};
pub use pipeline::classify::FormatCategory;
pub use pipeline::dispatch::{Converter, ConvertTarget, SofficeConverter};
pub use pipeline::fetch::{Fetcher, HttpFetcher};
pub use pipeline::store::{CacheEntry, CacheStore, ConvertedArtifact, FsCacheStore};
pub use state::PipelineState;
