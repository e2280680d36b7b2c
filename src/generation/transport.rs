use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};

use super::sse::split_lines;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Lines of the shared result stream, terminators stripped.
pub type LineStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Body of a job submission, in the field names the generation service reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobRequest {
    #[serde(rename = "elementid")]
    pub request_id: String,
    #[serde(rename = "field")]
    pub field_name: String,
    #[serde(rename = "business_description")]
    pub business_context: String,
    pub prompt: String,
}

/// Acknowledgement returned by the job endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobAck {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub queued: bool,
    #[serde(default)]
    pub accepted: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl JobAck {
    pub fn accepted() -> Self {
        Self {
            ok: true,
            queued: true,
            ..Self::default()
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.accepted || (self.ok && self.queued)
    }
}

/// The two network operations the correlator needs: submit a job, and open the
/// shared result stream.
#[async_trait]
pub trait GenerationTransport: Send + Sync {
    /// `Err(Configuration)` when the transport has nowhere to send jobs.
    fn ensure_configured(&self) -> Result<()>;

    /// Non-2xx responses and unreachable endpoints are `Submission` errors.
    async fn submit(&self, job: &JobRequest) -> Result<JobAck>;

    async fn open_stream(&self) -> Result<LineStream>;
}

/// reqwest-backed transport talking to the generation service over HTTP.
pub struct HttpTransport {
    client: Client,
    generate_endpoint: Option<String>,
    stream_endpoint: Option<String>,
}

impl HttpTransport {
    pub fn new(generate_endpoint: Option<String>, stream_endpoint: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|err| SyncError::Configuration(format!("failed to build HTTP client: {err}")))?;

        Ok(Self {
            client,
            generate_endpoint,
            stream_endpoint,
        })
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        Self::new(
            config.generate_endpoint.clone(),
            config.resolved_stream_endpoint(),
        )
    }

    fn generate_endpoint(&self) -> Result<&str> {
        self.generate_endpoint.as_deref().ok_or_else(|| {
            SyncError::Configuration("generation endpoint is not configured (AI_API_ENDPOINT)".into())
        })
    }

    fn stream_endpoint(&self) -> Result<&str> {
        self.stream_endpoint.as_deref().ok_or_else(|| {
            SyncError::Configuration("stream endpoint is not configured (AI_STREAM_ENDPOINT)".into())
        })
    }
}

fn describe(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("request timed out: {err}")
    } else if err.is_connect() {
        format!("cannot connect: {err}")
    } else {
        err.to_string()
    }
}

#[async_trait]
impl GenerationTransport for HttpTransport {
    fn ensure_configured(&self) -> Result<()> {
        self.generate_endpoint()?;
        self.stream_endpoint()?;
        Ok(())
    }

    async fn submit(&self, job: &JobRequest) -> Result<JobAck> {
        let endpoint = self.generate_endpoint()?;
        let response = self
            .client
            .post(endpoint)
            .json(job)
            .timeout(SUBMIT_TIMEOUT)
            .send()
            .await
            .map_err(|err| SyncError::Submission(describe(&err)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Submission(format!("HTTP {status}: {}", body.trim())));
        }

        response
            .json::<JobAck>()
            .await
            .map_err(|err| SyncError::Submission(format!("unreadable acknowledgement: {err}")))
    }

    async fn open_stream(&self) -> Result<LineStream> {
        let endpoint = self.stream_endpoint()?;
        let response = self
            .client
            .get(endpoint)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|err| SyncError::Stream(describe(&err)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Stream(format!("HTTP {status} from {endpoint}")));
        }

        let bytes = Box::pin(response.bytes_stream());
        Ok(Box::pin(split_lines(bytes)))
    }
}
