//! Streamed output-message assembly.

use std::sync::Arc;

use tracing::{trace, warn};

use crate::error::DriverError;
use crate::host::CommunicationSink;
use crate::message::{MessageRef, MessageStatus, Role};

use super::RunProgressSink;

/// Builds output messages from `created` / `delta` / `completed` signals.
///
/// Deltas only ever extend the currently open message. Completed messages
/// are held back and handed over as one batch when the run finishes.
pub struct MessageAssembler {
    sink: Arc<dyn CommunicationSink>,
    progress: Option<RunProgressSink>,
    open: Option<MessageRef>,
    finished: Vec<MessageRef>,
}

impl MessageAssembler {
    pub fn new(sink: Arc<dyn CommunicationSink>, progress: Option<RunProgressSink>) -> Self {
        Self {
            sink,
            progress,
            open: None,
            finished: Vec::new(),
        }
    }

    /// Open a new, empty output message authored by `agent`.
    pub fn open(&mut self, agent: &str, reply_to: &str) {
        if let Some(previous) = self.open.take() {
            warn!(
                message_id = %previous.id(),
                "message created while another was open; closing the previous one"
            );
            self.finished.push(previous);
        }
        let message = self.sink.create_message(Role::Agent, agent, "");
        message.set_target(reply_to);
        message.set_status(MessageStatus::Processing);
        self.open = Some(message);
    }

    /// Append a text fragment to the open message.
    pub fn delta(&mut self, text: &str) -> Result<(), DriverError> {
        let Some(message) = &self.open else {
            return Err(DriverError::ProtocolViolation(
                "content delta received with no open message".into(),
            ));
        };
        if text.is_empty() {
            return Ok(());
        }
        message.append(text);
        trace!(message_id = %message.id(), len = text.len(), "delta appended");
        if let Some(progress) = &self.progress {
            progress(&message.snapshot());
        }
        Ok(())
    }

    /// Close the open message without emitting it.
    pub fn close(&mut self) -> Result<(), DriverError> {
        match self.open.take() {
            Some(message) => {
                self.finished.push(message);
                Ok(())
            }
            None => Err(DriverError::ProtocolViolation(
                "message completed with no open message".into(),
            )),
        }
    }

    pub fn has_open(&self) -> bool {
        self.open.is_some()
    }

    /// Hand over every message produced, still-open ones last.
    pub fn finish(&mut self) -> Vec<MessageRef> {
        if let Some(open) = self.open.take() {
            trace!(message_id = %open.id(), "flushing message that never completed");
            self.finished.push(open);
        }
        std::mem::take(&mut self.finished)
    }

    /// Build a message directly from already complete text (polling model).
    pub fn push_complete(&mut self, agent: &str, reply_to: &str, text: &str) {
        let message = self.sink.create_message(Role::Agent, agent, text);
        message.set_target(reply_to);
        message.set_status(MessageStatus::Processing);
        self.finished.push(message);
    }
}
