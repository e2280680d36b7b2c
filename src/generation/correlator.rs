use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::oneshot;
use tokio::time::{timeout_at, Instant};

use crate::config::DEFAULT_REQUEST_TIMEOUT;
use crate::error::{Result, SyncError};

use super::sse::{SseDecoder, StreamEvent};
use super::transport::{GenerationTransport, JobRequest, LineStream};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

struct Waiter {
    /// Distinguishes this registration from a later one under the same id.
    ticket: u64,
    reply: oneshot::Sender<Result<String>>,
}

#[derive(Default)]
struct Pending {
    waiters: HashMap<String, Waiter>,
    streaming: bool,
    next_ticket: u64,
}

struct Shared {
    transport: Arc<dyn GenerationTransport>,
    pending: Mutex<Pending>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, request_id: &str) -> Result<(u64, oneshot::Receiver<Result<String>>)> {
        let mut pending = self.lock();
        if pending.waiters.contains_key(request_id) {
            return Err(SyncError::DuplicateRequest(request_id.to_string()));
        }

        pending.next_ticket += 1;
        let ticket = pending.next_ticket;
        let (reply, rx) = oneshot::channel();
        pending
            .waiters
            .insert(request_id.to_string(), Waiter { ticket, reply });
        Ok((ticket, rx))
    }

    /// Removes the registration if it is still the one identified by `ticket`.
    fn withdraw(&self, request_id: &str, ticket: u64) -> bool {
        let mut pending = self.lock();
        match pending.waiters.get(request_id) {
            Some(waiter) if waiter.ticket == ticket => {
                pending.waiters.remove(request_id);
                true
            }
            _ => false,
        }
    }

    fn resolve(&self, request_id: &str, result: Result<String>) -> bool {
        let waiter = self.lock().waiters.remove(request_id);
        match waiter {
            Some(waiter) => {
                let _ = waiter.reply.send(result);
                true
            }
            None => false,
        }
    }

    /// Resolves every waiter with the error built for its id and marks the
    /// stream as gone.
    fn fail_all(&self, error_for: impl Fn(&str) -> SyncError) {
        let drained: Vec<(String, Waiter)> = {
            let mut pending = self.lock();
            pending.streaming = false;
            pending.waiters.drain().collect()
        };

        if !drained.is_empty() {
            log_warn!("failing {} pending request(s)", drained.len());
        }
        for (request_id, waiter) in drained {
            let _ = waiter.reply.send(Err(error_for(&request_id)));
        }
    }

    fn release_if_idle(&self) -> bool {
        let mut pending = self.lock();
        if pending.waiters.is_empty() {
            pending.streaming = false;
            true
        } else {
            false
        }
    }

    fn dispatch(&self, event: StreamEvent) {
        match event {
            StreamEvent::Heartbeat | StreamEvent::Status => {}
            StreamEvent::Result { id, output } => {
                let result = if output.trim().is_empty() {
                    Err(SyncError::MalformedResponse(format!("empty output for {id}")))
                } else {
                    Ok(output)
                };
                if !self.resolve(&id, result) {
                    log_debug!("discarding result for {id}: nothing pending under that id");
                }
            }
            StreamEvent::Failure { id, message } => {
                let err = SyncError::Service {
                    request_id: id.clone(),
                    message,
                };
                if !self.resolve(&id, Err(err)) {
                    log_debug!("discarding failure for {id}: nothing pending under that id");
                }
            }
            StreamEvent::Malformed(reason) => {
                log_warn!("skipping malformed stream payload: {reason}");
            }
        }
    }
}

/// Withdraws a registration when `submit` returns or its future is dropped.
struct Registration<'a> {
    shared: &'a Shared,
    request_id: &'a str,
    ticket: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.shared.withdraw(self.request_id, self.ticket);
    }
}

/// Turns "submit a job, receive its result later on a shared stream" into one
/// awaitable call per request.
///
/// Results are routed by exact request id. One reader task owns the stream at a
/// time; it is opened on the first submission that needs it and released as
/// soon as nothing is pending.
#[derive(Clone)]
pub struct Correlator {
    shared: Arc<Shared>,
    request_timeout: Duration,
}

impl Correlator {
    pub fn new(transport: Arc<dyn GenerationTransport>) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                pending: Mutex::new(Pending::default()),
            }),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn pending_count(&self) -> usize {
        self.shared.lock().waiters.len()
    }

    pub fn is_streaming(&self) -> bool {
        self.shared.lock().streaming
    }

    pub async fn submit(&self, job: JobRequest) -> Result<String> {
        self.submit_with_timeout(job, self.request_timeout).await
    }

    pub async fn submit_with_timeout(&self, job: JobRequest, timeout: Duration) -> Result<String> {
        if job.request_id.trim().is_empty() {
            return Err(SyncError::Configuration("request id must not be empty".into()));
        }
        self.shared.transport.ensure_configured()?;

        // One deadline covers the POST, the stream open and the wait.
        let deadline = Instant::now() + timeout;
        let request_id = job.request_id.as_str();
        let timed_out = || {
            log_warn!("no result for {request_id} after {timeout:?}");
            SyncError::Timeout {
                request_id: request_id.to_string(),
                after: timeout,
            }
        };

        // Registered before the POST so a fast result on an open stream is not lost.
        let (ticket, mut reply) = self.shared.register(request_id)?;
        let _registration = Registration {
            shared: &self.shared,
            request_id,
            ticket,
        };

        let ack = timeout_at(deadline, self.shared.transport.submit(&job))
            .await
            .map_err(|_| timed_out())?
            .map_err(|err| {
                log_warn!("submission for {request_id} failed: {err}");
                err
            })?;
        if !ack.is_accepted() {
            let reason = ack
                .error
                .unwrap_or_else(|| "acknowledgement did not confirm the job".into());
            log_warn!("submission for {request_id} not accepted: {reason}");
            return Err(SyncError::Submission(format!("{request_id}: {reason}")));
        }

        ensure_stream(&self.shared, self.request_timeout);

        match timeout_at(deadline, &mut reply).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SyncError::StreamClosed {
                request_id: request_id.to_string(),
            }),
            Err(_) => {
                // The reader may have resolved us between the deadline and now.
                if !self.shared.withdraw(request_id, ticket) {
                    if let Ok(result) = reply.try_recv() {
                        return result;
                    }
                }
                Err(timed_out())
            }
        }
    }
}

/// Starts a reader task for the shared stream unless one is already running
/// or nobody is waiting. Callers never wait on the open itself.
fn ensure_stream(shared: &Arc<Shared>, open_timeout: Duration) {
    {
        let mut pending = shared.lock();
        if pending.streaming || pending.waiters.is_empty() {
            return;
        }
        pending.streaming = true;
    }

    tokio::spawn(read_stream(Arc::clone(shared), open_timeout));
}

async fn open_stream(shared: &Shared, open_timeout: Duration) -> Result<LineStream> {
    match tokio::time::timeout(open_timeout, shared.transport.open_stream()).await {
        Ok(opened) => opened,
        Err(_) => Err(SyncError::Stream(format!(
            "result stream did not open within {open_timeout:?}"
        ))),
    }
}

async fn read_stream(shared: Arc<Shared>, open_timeout: Duration) {
    let mut lines = match open_stream(&shared, open_timeout).await {
        Ok(lines) => {
            log_info!("result stream opened");
            lines
        }
        Err(err) => {
            log_warn!("failed to open result stream: {err}");
            shared.fail_all(|_| err.clone());
            return;
        }
    };

    let mut decoder = SseDecoder::default();

    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                log_warn!("result stream failed: {err}");
                shared.fail_all(|_| err.clone());
                return;
            }
        };

        if let Some(event) = decoder.decode(&line) {
            shared.dispatch(event);
        }
        if shared.release_if_idle() {
            log_info!("no pending requests, releasing result stream");
            return;
        }
    }

    log_info!("result stream closed by the server");
    shared.fail_all(|request_id| SyncError::StreamClosed {
        request_id: request_id.to_string(),
    });
}
