use std::sync::Arc;

use crate::store::Document;

pub mod controller;
mod loop_worker;
pub mod state;

pub use controller::ChangeWatcher;
pub use state::{WatchMode, WatchSnapshot, WatchState, WatchStatus};

/// Receives the full document on each observed change. Runs on the watcher's
/// task, so it must not block for long.
pub type ChangeCallback = Arc<dyn Fn(&Document) + Send + Sync>;
