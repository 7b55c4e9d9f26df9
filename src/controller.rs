//! The preview controller: sequences every stage for one request.
//!
//! ## Flow of one request
//!
//! 1. Decode the client token into a source URL
//! 2. Validate the URL and derive its cache key; archives named by the URL
//!    are rejected before any download
//! 3. Take the key lock and look the key up in the cache
//! 4. Fetch on a miss (or when forced) and commit the bytes atomically
//! 5. Classify the cached original
//! 6. Check convertible documents for password protection
//! 7. Serve the original, a cached conversion, or a fresh conversion
//!
//! The key lock is held for the whole run, so concurrent requests for one URL
//! coalesce: the first fetches and converts, the rest find a cache hit.

use crate::codec::{self, derive_cache_key, url_extension, CacheKey};
use crate::config::PreviewConfig;
use crate::error::{PreviewError, Stage};
use crate::output::{PipelineOutcome, PreviewRequest, RejectReason};
use crate::pipeline::classify::{classify, FormatCategory};
use crate::pipeline::dispatch::{self, plan, ConversionPlan, Converter, ConvertTarget, SofficeConverter};
use crate::pipeline::fetch::{validate_source_url, Fetcher, HttpFetcher};
use crate::pipeline::protect::is_protected;
use crate::pipeline::store::{needs_fetch, CacheEntry, CacheStore, FsCacheStore, KeyLocks};
use crate::state::{PipelineState, StateTracker};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A configured preview pipeline.
///
/// Cheap to share: wrap it in an [`Arc`] and call [`PreviewPipeline::run`]
/// from as many tasks as needed.
pub struct PreviewPipeline {
    config: PreviewConfig,
    store: Arc<dyn CacheStore>,
    fetcher: Arc<dyn Fetcher>,
    converter: Arc<dyn Converter>,
    locks: KeyLocks,
}

impl std::fmt::Debug for PreviewPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreviewPipeline")
            .field("config", &self.config)
            .field("active_keys", &self.locks.len())
            .finish_non_exhaustive()
    }
}

impl PreviewPipeline {
    /// Assemble a pipeline from explicit collaborators.
    pub fn new(
        config: PreviewConfig,
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn Fetcher>,
        converter: Arc<dyn Converter>,
    ) -> Self {
        Self {
            config,
            store,
            fetcher,
            converter,
            locks: KeyLocks::new(),
        }
    }

    /// The production wiring: filesystem cache, HTTP fetcher and `soffice`.
    pub fn from_config(config: PreviewConfig) -> Result<Self, PreviewError> {
        let store = FsCacheStore::new(&config.cache_dir)?;
        let fetcher = HttpFetcher::new(&config)?;
        let converter = SofficeConverter::new(config.converter_program.clone());
        info!(
            "Preview pipeline ready: cache {}, converter '{}'",
            store.root().display(),
            converter.program()
        );
        Ok(Self::new(
            config,
            Arc::new(store),
            Arc::new(fetcher),
            Arc::new(converter),
        ))
    }

    pub fn config(&self) -> &PreviewConfig {
        &self.config
    }

    /// Preview the document behind a client token.
    ///
    /// `mode_hint` may be empty or unknown; both fall back to the configured
    /// default mode. Never returns an error: failures are
    /// [`PipelineOutcome::Failed`].
    pub async fn preview(&self, token: &str, force_refresh: bool, mode_hint: &str) -> PipelineOutcome {
        let started = Instant::now();
        let mode = self.config.resolve_mode(mode_hint);
        match codec::decode(token) {
            Ok(source_url) => {
                let request = PreviewRequest::new(source_url)
                    .force_refresh(force_refresh)
                    .mode(mode);
                self.run(request).await
            }
            Err(e) => {
                warn!("Rejecting preview token: {}", e);
                let tracker = StateTracker::new(self.config.observer.clone());
                self.conclude(tracker, PipelineOutcome::failed(&e), started)
            }
        }
    }

    /// Run the pipeline for an already-decoded request.
    pub async fn run(&self, request: PreviewRequest) -> PipelineOutcome {
        let started = Instant::now();
        let mut tracker = StateTracker::new(self.config.observer.clone());
        let outcome = match self.drive(&mut tracker, &request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    "Preview of {} failed in state {}: {}",
                    request.source_url,
                    tracker.current(),
                    e
                );
                PipelineOutcome::failed(&e)
            }
        };
        self.conclude(tracker, outcome, started)
    }

    /// Run many requests concurrently, bounded by `max_concurrency`.
    ///
    /// Outcomes are returned in the order of `requests`.
    pub async fn preview_batch(&self, requests: Vec<PreviewRequest>) -> Vec<PipelineOutcome> {
        let mut outcomes: Vec<(usize, PipelineOutcome)> = stream::iter(requests.into_iter().enumerate())
            .map(|(idx, request)| async move { (idx, self.run(request).await) })
            .buffer_unordered(self.config.max_concurrency.max(1))
            .collect()
            .await;
        outcomes.sort_by_key(|(idx, _)| *idx);
        outcomes.into_iter().map(|(_, outcome)| outcome).collect()
    }

    fn conclude(
        &self,
        mut tracker: StateTracker,
        outcome: PipelineOutcome,
        started: Instant,
    ) -> PipelineOutcome {
        tracker.finish();
        let elapsed = started.elapsed();
        info!("Preview finished in {}ms: {}", elapsed.as_millis(), outcome);
        debug!(
            "State path: {}",
            tracker
                .history()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" → ")
        );
        if let Some(ref obs) = self.config.observer {
            obs.on_outcome(&outcome, elapsed);
        }
        outcome
    }

    async fn drive(
        &self,
        tracker: &mut StateTracker,
        request: &PreviewRequest,
    ) -> Result<PipelineOutcome, PreviewError> {
        let source_url = request.source_url.trim();
        if let Some(ref obs) = self.config.observer {
            obs.on_request_start(source_url);
        }
        info!(
            "Preview requested: {} (mode {}, force_refresh {})",
            source_url, request.mode, request.force_refresh
        );
        tracker.advance(PipelineState::Decoded)?;

        // ── Validate and key ─────────────────────────────────────────────
        validate_source_url(source_url, &self.config.allowed_schemes)?;
        let key = derive_cache_key(source_url);

        if self.config.reject_archives_before_fetch
            && url_extension(source_url).as_deref().and_then(FormatCategory::from_extension)
                == Some(FormatCategory::Archive)
        {
            info!("Not downloading archive {}", source_url);
            tracker.advance(PipelineState::Rejected)?;
            return Ok(PipelineOutcome::Rejected {
                reason: RejectReason::ArchiveNotPreviewable,
            });
        }

        // ── Cache ────────────────────────────────────────────────────────
        let _guard = self.locks.lock(&key).await;
        let cached = self.store.lookup(&key).await?;
        tracker.advance(PipelineState::CacheChecked)?;

        let entry = match cached {
            Some(entry) if !needs_fetch(Some(&entry), request.force_refresh) => {
                debug!("Cache hit for {}", key);
                tracker.advance(PipelineState::CacheHit)?;
                entry
            }
            _ => {
                tracker.advance(PipelineState::Fetching)?;
                let bytes = self.fetch(source_url).await?;
                let entry = self.store.commit_fetch(&key, &bytes, source_url).await?;
                tracker.advance(PipelineState::Fetched)?;
                entry
            }
        };

        // ── Classify ─────────────────────────────────────────────────────
        let original = entry.original_path.clone();
        let category = blocking(move || classify(&original)).await?;
        tracker.advance(PipelineState::Classified)?;

        let Some(plan) = plan(category, request.mode) else {
            let reason = match category {
                FormatCategory::Archive => RejectReason::ArchiveNotPreviewable,
                _ => RejectReason::UnsupportedFormat,
            };
            info!("Rejected {} ({}): {}", source_url, category, reason);
            tracker.advance(PipelineState::Rejected)?;
            return Ok(PipelineOutcome::Rejected { reason });
        };

        match plan {
            ConversionPlan::Passthrough(kind) => Ok(PipelineOutcome::Served {
                path: entry.original_path,
                kind,
            }),
            ConversionPlan::Convert(target) => {
                self.convert(tracker, &key, entry, category, target).await
            }
        }
    }

    async fn fetch(&self, source_url: &str) -> Result<Vec<u8>, PreviewError> {
        let secs = self.config.fetch_timeout_secs;
        tokio::time::timeout(Duration::from_secs(secs), self.fetcher.fetch(source_url))
            .await
            .map_err(|_| PreviewError::Timeout {
                stage: Stage::Fetch,
                secs,
            })?
    }

    async fn convert(
        &self,
        tracker: &mut StateTracker,
        key: &CacheKey,
        entry: CacheEntry,
        category: FormatCategory,
        target: ConvertTarget,
    ) -> Result<PipelineOutcome, PreviewError> {
        let original = entry.original_path.clone();
        let protected = blocking(move || is_protected(&original, category)).await??;
        tracker.advance(PipelineState::ProtectionChecked)?;
        if protected {
            info!("{} is password protected", entry.original_path.display());
            tracker.advance(PipelineState::PasswordRequired)?;
            return Ok(PipelineOutcome::PasswordRequired {
                original: entry.original_path,
            });
        }

        let kind = target.kind();
        if let Some(existing) = entry.converted(kind) {
            debug!("Reusing cached {} conversion for {}", kind, key);
            return Ok(PipelineOutcome::Served {
                path: existing.path.clone(),
                kind,
            });
        }

        tracker.advance(PipelineState::Dispatching)?;
        let secs = self.config.conversion_timeout_secs;
        let converted = tokio::time::timeout(
            Duration::from_secs(secs),
            dispatch::dispatch(self.converter.as_ref(), &entry.original_path, target),
        )
        .await
        .unwrap_or(Err(PreviewError::Timeout {
            stage: Stage::Conversion,
            secs,
        }));
        let bytes = match converted {
            Ok(bytes) => bytes,
            Err(e) => {
                tracker.advance(PipelineState::ConversionFailed)?;
                return Err(e);
            }
        };

        let updated = self.store.commit_conversion(key, kind, &bytes).await?;
        tracker.advance(PipelineState::Converted)?;
        let path = updated
            .converted(kind)
            .map(|c| c.path.clone())
            .ok_or_else(|| PreviewError::Internal(format!("{kind} conversion of {key} not visible after commit")))?;
        Ok(PipelineOutcome::Served { path, kind })
    }
}

/// Run blocking file inspection off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, PreviewError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PreviewError::Internal(format!("blocking task failed: {e}")))
}

/// Synchronous wrapper around [`PreviewPipeline::preview`].
///
/// Builds the production pipeline and a temporary tokio runtime internally.
pub fn preview_sync(
    config: PreviewConfig,
    token: &str,
    force_refresh: bool,
    mode_hint: &str,
) -> Result<PipelineOutcome, PreviewError> {
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| PreviewError::Internal(format!("Failed to create tokio runtime: {e}")))?;
    let pipeline = PreviewPipeline::from_config(config)?;
    Ok(runtime.block_on(pipeline.preview(token, force_refresh, mode_hint)))
}
