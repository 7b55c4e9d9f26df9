//! Observer trait for pipeline progress events.
//!
//! Inject an [`Arc<dyn PipelineObserver>`] via
//! [`crate::config::PreviewConfigBuilder::observer`] to receive events as a
//! request moves through the state machine. Callers can forward them to a
//! progress bar, a metrics counter or a websocket without the library
//! knowing how the host application communicates.
//!
//! # Example
//!
//! ```rust
//! use filepreview::{PipelineObserver, PipelineState, PreviewConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct FetchCounter(AtomicUsize);
//!
//! impl PipelineObserver for FetchCounter {
//!     fn on_transition(&self, _from: PipelineState, to: PipelineState) {
//!         if to == PipelineState::Fetching {
//!             self.0.fetch_add(1, Ordering::SeqCst);
//!         }
//!     }
//! }
//!
//! let config = PreviewConfig::builder()
//!     .observer(Arc::new(FetchCounter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::output::PipelineOutcome;
use crate::state::PipelineState;
use std::time::Duration;

/// Called by the pipeline as each request progresses.
///
/// Implementations must be `Send + Sync`: requests for different URLs run
/// concurrently and may call the same observer from several threads. All
/// methods default to no-ops so implementors only override what they need.
pub trait PipelineObserver: Send + Sync {
    /// Called once the source URL has been decoded, before any I/O.
    fn on_request_start(&self, source_url: &str) {
        let _ = source_url;
    }

    /// Called on every state machine transition.
    fn on_transition(&self, from: PipelineState, to: PipelineState) {
        let _ = (from, to);
    }

    /// Called once per request with its terminal outcome.
    fn on_outcome(&self, outcome: &PipelineOutcome, elapsed: Duration) {
        let _ = (outcome, elapsed);
    }
}

/// An observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<PipelineState>>);

    impl PipelineObserver for Recorder {
        fn on_transition(&self, _from: PipelineState, to: PipelineState) {
            self.0.lock().unwrap().push(to);
        }
    }

    #[test]
    fn default_methods_are_no_ops() {
        let obs = NoopObserver;
        obs.on_request_start("http://host/a.txt");
        obs.on_transition(PipelineState::Idle, PipelineState::Decoded);
    }

    #[test]
    fn overridden_method_receives_events() {
        let rec = Recorder::default();
        rec.on_transition(PipelineState::Idle, PipelineState::Decoded);
        rec.on_transition(PipelineState::Decoded, PipelineState::CacheChecked);
        assert_eq!(
            *rec.0.lock().unwrap(),
            vec![PipelineState::Decoded, PipelineState::CacheChecked]
        );
    }
}
