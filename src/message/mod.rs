//! Conversation messages exchanged between the host and the driver.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Source name the host uses for the human end-user.
pub const USER_SOURCE: &str = "user";

/// Lifecycle of a message as it moves through the driver.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MessageStatus {
    Queued,
    Processing,
    Complete,
    Error,
    Cancelled,
}

impl MessageStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Cancelled)
    }

    /// Forward-only transitions. Leaving a terminal state requires
    /// [`MessageRef::requeue`].
    fn can_advance_to(self, next: MessageStatus) -> bool {
        use MessageStatus::*;
        match (self, next) {
            (a, b) if a == b => true,
            (Queued, Processing) => true,
            (Queued | Processing, Complete | Error | Cancelled) => true,
            _ => false,
        }
    }
}

/// Who authored a message, from the host's point of view.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Role {
    User,
    Agent,
    System,
}

/// Message type tag carried through to remote metadata.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Chat,
    Command,
    Notification,
}

/// One unit of conversation input or output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub source: String,
    pub target: String,
    pub content: String,
    pub status: MessageStatus,
    pub kind: MessageKind,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Build a fresh queued message.
    pub fn new(
        role: Role,
        source: impl Into<String>,
        target: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            source: source.into(),
            target: target.into(),
            content: content.into(),
            status: MessageStatus::Queued,
            kind: MessageKind::Chat,
            timestamp: Utc::now(),
        }
    }

    /// A message from the human end-user to `target`.
    pub fn from_user(target: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(Role::User, USER_SOURCE, target, content)
    }

    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn is_from_user(&self) -> bool {
        self.source == USER_SOURCE
    }

    /// Content as forwarded to the remote thread: other agents are
    /// attributed so the model can tell who is speaking.
    pub fn remote_content(&self) -> String {
        if self.is_from_user() {
            self.content.clone()
        } else {
            format!("From {}: {}", self.source, self.content)
        }
    }

    /// Correlation metadata attached to the remote copy of this message.
    pub fn remote_metadata(&self) -> serde_json::Value {
        serde_json::json!({
            "source": self.source,
            "target": self.target,
            "id": self.id.to_string(),
            "timestamp": self.timestamp.timestamp_millis().to_string(),
            "type": self.kind.to_string(),
        })
    }
}

/// Shared, mutable handle to a [`Message`].
///
/// The host and the driver hold clones of the same handle, so status
/// changes and streamed content are visible to both without copying.
#[derive(Debug, Clone)]
pub struct MessageRef(Arc<RwLock<Message>>);

impl MessageRef {
    pub fn new(message: Message) -> Self {
        Self(Arc::new(RwLock::new(message)))
    }

    fn read(&self) -> RwLockReadGuard<'_, Message> {
        self.0.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Message> {
        self.0.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn id(&self) -> Uuid {
        self.read().id
    }

    pub fn status(&self) -> MessageStatus {
        self.read().status
    }

    pub fn content(&self) -> String {
        self.read().content.clone()
    }

    pub fn source(&self) -> String {
        self.read().source.clone()
    }

    /// Point-in-time copy of the message.
    pub fn snapshot(&self) -> Message {
        self.read().clone()
    }

    /// Grow the content (used while a reply streams in).
    pub fn append(&self, text: &str) {
        self.write().content.push_str(text);
    }

    pub fn set_target(&self, target: &str) {
        self.write().target = target.to_string();
    }

    /// Advance the status. Backward moves are refused and logged.
    pub fn set_status(&self, next: MessageStatus) -> bool {
        let mut message = self.write();
        if !message.status.can_advance_to(next) {
            tracing::warn!(
                message_id = %message.id,
                from = %message.status,
                to = %next,
                "refusing backward message status transition"
            );
            return false;
        }
        message.status = next;
        true
    }

    /// Return a message to the queue, even from a terminal state.
    pub fn requeue(&self) {
        self.write().status = MessageStatus::Queued;
    }

    /// Whether both handles point at the same message.
    pub fn same_as(&self, other: &MessageRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<Message> for MessageRef {
    fn from(message: Message) -> Self {
        Self::new(message)
    }
}
