use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::WatchConfig;
use crate::store::RecordStore;

use super::state::{WatchMode, WatchState};
use super::ChangeCallback;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info};

/// Everything the loop needs, moved into the spawned task.
pub(super) struct WatchContext {
    pub store: Arc<RecordStore>,
    pub state: Arc<Mutex<WatchState>>,
    pub on_change: ChangeCallback,
    pub config: WatchConfig,
    pub wake: Arc<Notify>,
}

pub(super) async fn watch_loop(ctx: WatchContext, cancel_token: CancellationToken) {
    poll_once(&ctx, &cancel_token).await;
    let mut next_poll = Instant::now() + ctx.state.lock().await.interval(&ctx.config);

    loop {
        let decay_at = ctx.state.lock().await.decay_deadline(ctx.config.quiet_period);

        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log_info!("watch loop shutting down");
                break;
            }
            _ = ctx.wake.notified() => {
                log_debug!("out-of-band poll requested");
                poll_once(&ctx, &cancel_token).await;
                next_poll = Instant::now() + ctx.state.lock().await.interval(&ctx.config);
            }
            _ = sleep_until(next_poll) => {
                poll_once(&ctx, &cancel_token).await;
                next_poll = Instant::now() + ctx.state.lock().await.interval(&ctx.config);
            }
            _ = sleep_until_some(decay_at) => {
                let mut state = ctx.state.lock().await;
                if state.decay(Instant::now(), ctx.config.quiet_period) {
                    log_info!("watcher mode active -> idle after {:?} without changes", ctx.config.quiet_period);
                }
            }
        }
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn poll_once(ctx: &WatchContext, cancel_token: &CancellationToken) {
    let store = Arc::clone(&ctx.store);
    let document = match tokio::task::spawn_blocking(move || store.read()).await {
        Ok(document) => document,
        Err(err) => {
            log_error!("store poll failed, retrying on the next tick: {err}");
            return;
        }
    };

    let changed = {
        let mut state = ctx.state.lock().await;
        let was = state.mode;
        let changed = state.record_poll(document.latest_timestamp(), Instant::now());
        if was == WatchMode::Idle && state.mode == WatchMode::Active {
            log_info!("watcher mode idle -> active");
        }
        changed
    };

    if !changed || cancel_token.is_cancelled() {
        return;
    }

    log_debug!(
        "store changed, latest timestamp {:?}",
        document.latest_timestamp()
    );
    if catch_unwind(AssertUnwindSafe(|| (ctx.on_change)(&document))).is_err() {
        log_error!("change callback panicked; watching continues");
    }
}
