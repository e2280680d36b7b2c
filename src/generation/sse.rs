//! Line framing and event decoding for the generation result stream.
//!
//! The service sends server-sent events: `event:` names the kind of the next
//! `data:` line, `ping …`/`connected` data are keepalives, and results carry a
//! JSON object with the request id and its output.

use std::collections::VecDeque;
use std::fmt::Display;

use bytes::Bytes;
use futures::{stream, Stream, StreamExt};
use serde::Deserialize;

use crate::error::{Result, SyncError};

/// One decoded stream message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Heartbeat,
    /// Informational progress message; carries nothing to deliver.
    Status,
    Result { id: String, output: String },
    Failure { id: String, message: String },
    /// A data line that could not be turned into a usable event.
    Malformed(String),
}

#[derive(Debug, Deserialize)]
struct Payload {
    #[serde(alias = "elementid")]
    id: Option<String>,
    output: Option<String>,
    message: Option<String>,
}

/// Stateful decoder: remembers the last `event:` name until the blank line
/// that ends the event.
#[derive(Debug, Default)]
pub struct SseDecoder {
    event: Option<String>,
}

impl SseDecoder {
    pub fn decode(&mut self, line: &str) -> Option<StreamEvent> {
        if line.is_empty() {
            self.event = None;
            return None;
        }
        if let Some(name) = line.strip_prefix("event:") {
            self.event = Some(name.trim().to_string());
            return None;
        }
        let data = line.strip_prefix("data:")?;
        let data = data.strip_prefix(' ').unwrap_or(data).trim();
        Some(self.classify(data))
    }

    fn classify(&self, data: &str) -> StreamEvent {
        let event = self.event.as_deref();
        if event == Some("ping") || data == "connected" || data == "ping" || data.starts_with("ping ") {
            return StreamEvent::Heartbeat;
        }

        let payload: Payload = match serde_json::from_str(data) {
            Ok(payload) => payload,
            Err(err) => return StreamEvent::Malformed(format!("unparsable data {data:?}: {err}")),
        };

        match (event, payload) {
            (Some("status"), _) => StreamEvent::Status,
            (Some("error"), Payload { id: Some(id), message, .. }) => StreamEvent::Failure {
                id,
                message: message.unwrap_or_else(|| "unspecified error".into()),
            },
            (Some("error"), _) => StreamEvent::Malformed(format!("error event without id: {data}")),
            (_, Payload { id: Some(id), output: Some(output), .. }) => {
                StreamEvent::Result { id, output }
            }
            _ => StreamEvent::Malformed(format!("payload missing id/output: {data}")),
        }
    }
}

/// Accumulates raw bytes and yields complete lines without their terminator.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// Whatever is left once the byte stream ends.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string())
    }
}

/// Turns a byte stream into a stream of lines. A transport error is yielded
/// once as [`SyncError::Stream`] and ends the stream.
pub fn split_lines<S, E>(bytes: S) -> impl Stream<Item = Result<String>> + Send + 'static
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + Unpin + 'static,
    E: Display + Send + 'static,
{
    let state = (bytes, LineBuffer::default(), VecDeque::new(), false);
    stream::unfold(state, |(mut bytes, mut buffer, mut ready, mut done)| async move {
        loop {
            if let Some(line) = ready.pop_front() {
                return Some((Ok(line), (bytes, buffer, ready, done)));
            }
            if done {
                return None;
            }
            match bytes.next().await {
                Some(Ok(chunk)) => ready.extend(buffer.push(&chunk)),
                Some(Err(err)) => {
                    done = true;
                    let err = SyncError::Stream(err.to_string());
                    return Some((Err(err), (bytes, buffer, ready, done)));
                }
                None => {
                    done = true;
                    ready.extend(buffer.finish());
                }
            }
        }
    })
}
