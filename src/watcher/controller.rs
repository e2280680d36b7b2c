use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::{debug, info};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::WatchConfig;
use crate::store::RecordStore;

use super::loop_worker::{watch_loop, WatchContext};
use super::state::{WatchSnapshot, WatchState};
use super::ChangeCallback;

struct Running {
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Polls the store on an adaptive schedule and hands the full document to the
/// registered callback whenever the latest timestamp moves.
#[derive(Clone)]
pub struct ChangeWatcher {
    store: Arc<RecordStore>,
    on_change: ChangeCallback,
    config: WatchConfig,
    state: Arc<Mutex<WatchState>>,
    wake: Arc<Notify>,
    running: Arc<Mutex<Option<Running>>>,
}

impl ChangeWatcher {
    pub fn new(store: Arc<RecordStore>, config: WatchConfig, on_change: ChangeCallback) -> Self {
        Self {
            store,
            on_change,
            config,
            state: Arc::new(Mutex::new(WatchState::new())),
            wake: Arc::new(Notify::new()),
            running: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    /// Enters Idle watching and polls once right away.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            bail!("watcher already active");
        }

        self.state.lock().await.begin();

        let cancel_token = CancellationToken::new();
        let ctx = WatchContext {
            store: Arc::clone(&self.store),
            state: Arc::clone(&self.state),
            on_change: Arc::clone(&self.on_change),
            config: self.config,
            wake: Arc::clone(&self.wake),
        };
        let handle = tokio::spawn(watch_loop(ctx, cancel_token.clone()));

        *running = Some(Running {
            cancel_token,
            handle,
        });
        info!("watching {}", self.store.path().display());
        Ok(())
    }

    /// Cancels the loop and waits for it, so no callback runs after this
    /// returns. Stopping a stopped watcher is a no-op.
    pub async fn stop(&self) -> Result<()> {
        let Some(Running {
            cancel_token,
            handle,
        }) = self.running.lock().await.take()
        else {
            return Ok(());
        };

        cancel_token.cancel();
        let joined = handle.await.context("watch loop task failed to join");
        self.state.lock().await.end();
        info!("stopped watching {}", self.store.path().display());
        joined
    }

    /// Forces Active mode and an out-of-band poll.
    pub async fn trigger_immediate_check(&self) {
        {
            let mut state = self.state.lock().await;
            if !state.is_watching() {
                debug!("immediate check requested while stopped; ignoring");
                return;
            }
            state.mark_active(Instant::now());
        }
        self.wake.notify_one();
    }

    pub async fn is_watching(&self) -> bool {
        self.running.lock().await.is_some()
    }

    pub async fn snapshot(&self) -> WatchSnapshot {
        self.state.lock().await.snapshot()
    }
}
