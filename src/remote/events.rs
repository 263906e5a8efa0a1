//! Streamed run lifecycle events.

use serde::Deserialize;

use crate::error::{DriverError, Result};

use super::types::{MessageDeltaEvent, RunObject, ThreadMessage};

/// A lifecycle event from a streamed run, parsed at the wire boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum RunStreamEvent {
    /// Any `thread.run.*` status event; carries the full run object.
    RunUpdated(RunObject),
    MessageCreated(ThreadMessage),
    MessageDelta(MessageDeltaEvent),
    MessageCompleted(ThreadMessage),
    /// Server-reported stream error.
    Error(String),
    /// End of stream.
    Done,
    /// Heartbeats, step progress and anything not recognised.
    Ignored(String),
}

#[derive(Deserialize)]
struct StreamErrorPayload {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<Box<StreamErrorPayload>>,
}

impl StreamErrorPayload {
    fn into_message(self) -> Option<String> {
        self.message.or_else(|| self.error.and_then(|e| e.into_message()))
    }
}

impl RunStreamEvent {
    /// Parse one SSE frame.
    pub fn parse(event: &str, data: &str) -> Result<Self> {
        let parsed = match event {
            "thread.run.created"
            | "thread.run.queued"
            | "thread.run.in_progress"
            | "thread.run.requires_action"
            | "thread.run.completed"
            | "thread.run.incomplete"
            | "thread.run.failed"
            | "thread.run.cancelling"
            | "thread.run.cancelled"
            | "thread.run.expired" => Self::RunUpdated(decode(event, data)?),
            "thread.message.created" => Self::MessageCreated(decode(event, data)?),
            "thread.message.delta" => Self::MessageDelta(decode(event, data)?),
            "thread.message.completed" | "thread.message.incomplete" => {
                Self::MessageCompleted(decode(event, data)?)
            }
            "error" => {
                let message = serde_json::from_str::<StreamErrorPayload>(data)
                    .ok()
                    .and_then(StreamErrorPayload::into_message)
                    .unwrap_or_else(|| data.to_string());
                Self::Error(message)
            }
            "done" => Self::Done,
            other => Self::Ignored(other.to_string()),
        };
        Ok(parsed)
    }
}

fn decode<T: for<'de> Deserialize<'de>>(event: &str, data: &str) -> Result<T> {
    serde_json::from_str(data).map_err(|e| {
        DriverError::Stream(format!("malformed `{event}` payload: {e}"))
    })
}
