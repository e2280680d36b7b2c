//! Keeps editor field values in sync with an asynchronous generation service
//! through one durable JSON store.
//!
//! [`sync::SyncFacade`] is the entry point: it submits a job through the
//! [`generation::Correlator`], writes the outcome to the [`store::RecordStore`]
//! and wakes the [`watcher::ChangeWatcher`], whose callback hands the document
//! to the editor integration.

pub mod config;
pub mod error;
pub mod generation;
pub mod store;
pub mod sync;
pub mod utils;
pub mod watcher;

pub use config::{SyncConfig, WatchConfig};
pub use error::{Result, SyncError};
pub use generation::{Correlator, GenerationTransport, HttpTransport, ScriptedTransport};
pub use store::{Document, ElementKey, FieldRecord, RecordStore, ValidationReport};
pub use sync::{GenerationRequest, SyncFacade};
pub use watcher::{ChangeCallback, ChangeWatcher, WatchMode, WatchSnapshot, WatchStatus};

/// Installs `env_logger` at `info`, overridable through `RUST_LOG`. Safe to
/// call more than once; later calls do nothing.
pub fn init_logging() {
    let _ = env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .try_init();
}
