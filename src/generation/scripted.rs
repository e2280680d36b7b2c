//! In-process [`GenerationTransport`] driven by the caller.
//!
//! Lines pushed before a stream is opened are buffered and delivered to the
//! next stream; lines pushed while a stream is open go straight to it. An
//! optional responder answers every accepted job on the stream, which is
//! enough to drive the facade without a real service.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::channel::mpsc::{unbounded, UnboundedSender};
use futures::StreamExt;
use serde_json::json;

use crate::error::{Result, SyncError};

use super::transport::{GenerationTransport, JobAck, JobRequest, LineStream};

type Responder = Box<dyn Fn(&JobRequest) -> Option<String> + Send + Sync>;

/// How the scripted job endpoint answers a submission.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    Accept,
    /// 2xx with an acknowledgement that does not confirm the job.
    NotAccepted,
    Fail(SyncError),
}

#[derive(Default)]
struct StreamSide {
    current: Option<UnboundedSender<Result<String>>>,
    backlog: Vec<String>,
}

pub struct ScriptedTransport {
    configured: bool,
    outcome: Mutex<SubmitOutcome>,
    responder: Option<Responder>,
    submitted: Mutex<Vec<JobRequest>>,
    stream: Mutex<StreamSide>,
    open_failure: Mutex<Option<SyncError>>,
    opens: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTransport {
    /// Accepts every job and never answers on its own.
    pub fn new() -> Self {
        Self {
            configured: true,
            outcome: Mutex::new(SubmitOutcome::Accept),
            responder: None,
            submitted: Mutex::new(Vec::new()),
            stream: Mutex::new(StreamSide::default()),
            open_failure: Mutex::new(None),
            opens: AtomicUsize::new(0),
        }
    }

    /// Answers each accepted job with the responder's output, keyed by the
    /// submitted request id. `None` leaves the job unanswered.
    pub fn responding<F>(responder: F) -> Self
    where
        F: Fn(&JobRequest) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            responder: Some(Box::new(responder)),
            ..Self::new()
        }
    }

    /// A transport with no endpoints.
    pub fn unconfigured() -> Self {
        Self {
            configured: false,
            ..Self::new()
        }
    }

    pub fn set_submit_outcome(&self, outcome: SubmitOutcome) {
        *lock(&self.outcome) = outcome;
    }

    /// Makes the next `open_stream` call fail with `err`.
    pub fn fail_next_open(&self, err: SyncError) {
        *lock(&self.open_failure) = Some(err);
    }

    /// Sends a raw stream line.
    pub fn push_line(&self, line: impl Into<String>) {
        let line = line.into();
        let mut side = lock(&self.stream);
        if let Some(tx) = side.current.take() {
            match tx.unbounded_send(Ok(line)) {
                Ok(()) => side.current = Some(tx),
                // Reader went away; keep the line for the next stream.
                Err(err) => {
                    if let Ok(line) = err.into_inner() {
                        side.backlog.push(line);
                    }
                }
            }
            return;
        }
        side.backlog.push(line);
    }

    /// Sends a `data:` line carrying `{"id", "output"}`.
    pub fn push_result(&self, id: &str, output: &str) {
        self.push_line(format!("data: {}", json!({ "id": id, "output": output })));
    }

    /// Ends the open stream as if the server hung up.
    pub fn close_stream(&self) {
        lock(&self.stream).current = None;
    }

    /// Fails the open stream with a connection error.
    pub fn break_stream(&self, reason: &str) {
        let mut side = lock(&self.stream);
        if let Some(tx) = side.current.take() {
            let _ = tx.unbounded_send(Err(SyncError::Stream(reason.to_string())));
        }
    }

    pub fn submitted(&self) -> Vec<JobRequest> {
        lock(&self.submitted).clone()
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationTransport for ScriptedTransport {
    fn ensure_configured(&self) -> Result<()> {
        if self.configured {
            Ok(())
        } else {
            Err(SyncError::Configuration("no generation endpoint".into()))
        }
    }

    async fn submit(&self, job: &JobRequest) -> Result<JobAck> {
        lock(&self.submitted).push(job.clone());
        let outcome = lock(&self.outcome).clone();
        match outcome {
            SubmitOutcome::Accept => {
                if let Some(output) = self.responder.as_ref().and_then(|respond| respond(job)) {
                    self.push_result(&job.request_id, &output);
                }
                Ok(JobAck::accepted())
            }
            SubmitOutcome::NotAccepted => Ok(JobAck::default()),
            SubmitOutcome::Fail(err) => Err(err),
        }
    }

    async fn open_stream(&self) -> Result<LineStream> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = lock(&self.open_failure).take() {
            return Err(err);
        }

        let (tx, rx) = unbounded();
        let mut side = lock(&self.stream);
        for line in side.backlog.drain(..) {
            let _ = tx.unbounded_send(Ok(line));
        }
        side.current = Some(tx);
        Ok(rx.boxed())
    }
}
