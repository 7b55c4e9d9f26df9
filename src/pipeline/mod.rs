//! Pipeline stages for document preview.
//!
//! Each submodule implements exactly one step. The controller in
//! [`crate::controller`] sequences them and owns every state transition.
//!
//! ## Data Flow
//!
//! ```text
//! fetch ──▶ store ──▶ classify ──▶ protect ──▶ dispatch
//! (HTTP)   (cache)   (ext/magic)  (encrypted?) (soffice)
//! ```
//!
//! 1. [`fetch`]: validate the source URL and download its bytes
//! 2. [`store`]: atomic cache commits and per-key write serialisation
//! 3. [`classify`]: map the cached original to a [`classify::FormatCategory`]
//! 4. [`protect`]: detect password protection without decrypting anything;
//!    blocking, runs in `spawn_blocking`
//! 5. [`dispatch`]: plan the conversion and drive the external converter

pub mod classify;
pub mod dispatch;
pub mod fetch;
pub mod protect;
pub mod store;
