//! Cache store: one artifact set per cache key.
//!
//! The filesystem is the index. An entry exists when `<root>/<key>` exists;
//! its fetch time is that file's mtime. Converted artifacts live next to it
//! as `<root>/<key>.pdf` and `<root>/<key>.html` and only count while they
//! are at least as new as the original, so a re-fetch invalidates them even
//! if deleting the stale file fails.
//!
//! ## Atomicity
//!
//! Every write goes to a hidden temp file in the cache directory, is synced,
//! and is then renamed over the destination. Readers see either the old file
//! or the new one, never a torn write, and a failed write leaves the prior
//! entry exactly as it was.

use crate::codec::CacheKey;
use crate::error::PreviewError;
use crate::output::ArtifactKind;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// Kinds of artifact a conversion can produce.
const CONVERTED_KINDS: [ArtifactKind; 2] = [ArtifactKind::Pdf, ArtifactKind::Web];

/// A converted rendering attached to a cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedArtifact {
    pub path: PathBuf,
    pub kind: ArtifactKind,
    pub converted_at: SystemTime,
}

/// Everything cached for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub original_path: PathBuf,
    pub last_fetched_at: SystemTime,
    /// Fresh conversions only; stale ones are never reported.
    pub converted: Vec<ConvertedArtifact>,
}

impl CacheEntry {
    /// The fresh conversion of the given kind, if any.
    pub fn converted(&self, kind: ArtifactKind) -> Option<&ConvertedArtifact> {
        self.converted.iter().find(|c| c.kind == kind)
    }

    pub fn last_converted_at(&self) -> Option<SystemTime> {
        self.converted.iter().map(|c| c.converted_at).max()
    }
}

/// Storage for originals and their conversions.
///
/// Implementations must make each commit atomic with respect to concurrent
/// readers. Writers for the same key are serialised by the caller through
/// [`KeyLocks`].
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Look up the entry for `key`. Never blocks on other keys.
    async fn lookup(&self, key: &CacheKey) -> Result<Option<CacheEntry>, PreviewError>;

    /// Store freshly fetched bytes as the original and invalidate conversions.
    async fn commit_fetch(
        &self,
        key: &CacheKey,
        bytes: &[u8],
        source_url: &str,
    ) -> Result<CacheEntry, PreviewError>;

    /// Attach a converted artifact to an existing entry.
    async fn commit_conversion(
        &self,
        key: &CacheKey,
        kind: ArtifactKind,
        bytes: &[u8],
    ) -> Result<CacheEntry, PreviewError>;
}

/// Whether the pipeline must fetch before it can continue.
///
/// Presence alone is a cache hit; only `force_refresh` overrides it.
pub fn needs_fetch(entry: Option<&CacheEntry>, force_refresh: bool) -> bool {
    force_refresh || entry.is_none()
}

/// Filesystem-backed [`CacheStore`].
#[derive(Debug, Clone)]
pub struct FsCacheStore {
    root: PathBuf,
}

impl FsCacheStore {
    /// Open (and create if needed) a cache rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, PreviewError> {
        let root = root.as_ref().to_path_buf();
        // Runs once at start-up; not worth an async constructor.
        std::fs::create_dir_all(&root).map_err(|source| PreviewError::StoreWriteError {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn original_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.as_str())
    }

    pub fn converted_path(&self, key: &CacheKey, kind: ArtifactKind) -> PathBuf {
        self.root
            .join(format!("{}.{}", key.as_str(), kind.extension()))
    }

    async fn write_atomic(&self, dest: PathBuf, bytes: &[u8]) -> Result<(), PreviewError> {
        let dir = self.root.clone();
        let data = bytes.to_vec();
        let target = dest.clone();
        tokio::task::spawn_blocking(move || write_atomic_blocking(&dir, &target, &data))
            .await
            .map_err(|e| PreviewError::Internal(format!("cache write task panicked: {e}")))?
            .map_err(|source| PreviewError::StoreWriteError { path: dest, source })
    }

    async fn modified(path: &Path) -> Result<Option<SystemTime>, PreviewError> {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => {
                let at = meta.modified().map_err(|source| PreviewError::StoreReadError {
                    path: path.to_path_buf(),
                    source,
                })?;
                Ok(Some(at))
            }
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(PreviewError::StoreReadError {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

/// Temp file in `dir`, synced, then renamed over `dest`.
fn write_atomic_blocking(dir: &Path, dest: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp = tempfile::Builder::new()
        .prefix(".tmp-")
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl CacheStore for FsCacheStore {
    async fn lookup(&self, key: &CacheKey) -> Result<Option<CacheEntry>, PreviewError> {
        let original_path = self.original_path(key);
        let Some(last_fetched_at) = Self::modified(&original_path).await? else {
            return Ok(None);
        };

        let mut converted = Vec::new();
        for kind in CONVERTED_KINDS {
            let path = self.converted_path(key, kind);
            match Self::modified(&path).await? {
                Some(at) if at >= last_fetched_at => converted.push(ConvertedArtifact {
                    path,
                    kind,
                    converted_at: at,
                }),
                Some(_) => debug!("Ignoring stale {} conversion for {}", kind, key),
                None => {}
            }
        }

        Ok(Some(CacheEntry {
            key: key.clone(),
            original_path,
            last_fetched_at,
            converted,
        }))
    }

    async fn commit_fetch(
        &self,
        key: &CacheKey,
        bytes: &[u8],
        source_url: &str,
    ) -> Result<CacheEntry, PreviewError> {
        let original_path = self.original_path(key);
        self.write_atomic(original_path.clone(), bytes).await?;
        debug!(
            "Cached {} bytes from {} as {}",
            bytes.len(),
            source_url,
            original_path.display()
        );

        // Conversions belong to the previous fetch. A failed delete is harmless:
        // lookup ignores conversions older than the original.
        for kind in CONVERTED_KINDS {
            let path = self.converted_path(key, kind);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!("Invalidated {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Could not remove stale {}: {}", path.display(), e),
            }
        }

        self.lookup(key).await?.ok_or_else(|| {
            PreviewError::Internal(format!("entry for {key} vanished right after commit"))
        })
    }

    async fn commit_conversion(
        &self,
        key: &CacheKey,
        kind: ArtifactKind,
        bytes: &[u8],
    ) -> Result<CacheEntry, PreviewError> {
        let path = self.converted_path(key, kind);
        self.write_atomic(path, bytes).await?;
        self.lookup(key).await?.ok_or_else(|| {
            PreviewError::Internal(format!("no original cached for {key} after conversion"))
        })
    }
}

/// Per-key writer serialisation.
///
/// Requests for the same key queue behind one async mutex; different keys
/// never touch each other's slot. Slots nobody holds or waits on are pruned
/// whenever a new lock is taken.
#[derive(Debug, Default)]
pub struct KeyLocks {
    slots: Mutex<HashMap<CacheKey, Arc<AsyncMutex<()>>>>,
}

/// Held for as long as a request works on its key.
#[derive(Debug)]
pub struct KeyGuard {
    _guard: OwnedMutexGuard<()>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &CacheKey) -> KeyGuard {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.retain(|_, m| Arc::strong_count(m) > 1);
            Arc::clone(slots.entry(key.clone()).or_default())
        };
        KeyGuard {
            _guard: slot.lock_owned().await,
        }
    }

    /// Number of live slots (held or awaited).
    pub fn len(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.values().filter(|m| Arc::strong_count(m) > 1).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
