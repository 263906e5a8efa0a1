//! Assistants v2 wire types.

use serde::{Deserialize, Serialize};
use strum::Display;

use crate::message::Message;

/// Remote run status, mirrored as-is.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Incomplete,
    Expired,
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::Failed | Self::Completed | Self::Incomplete | Self::Expired
        )
    }

    /// Terminal states that count as a failed turn.
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::Incomplete | Self::Expired)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AssistantObject {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ThreadObject {
    pub id: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RunObject {
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub required_action: Option<RequiredAction>,
    #[serde(default)]
    pub last_error: Option<RunLastError>,
    #[serde(default)]
    pub incomplete_details: Option<IncompleteDetails>,
}

impl RunObject {
    pub fn new(id: impl Into<String>, status: RunStatus) -> Self {
        Self {
            id: id.into(),
            status,
            ..Default::default()
        }
    }

    pub fn with_required_action(mut self, action: RequiredAction) -> Self {
        self.required_action = Some(action);
        self
    }

    pub fn with_last_error(mut self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.last_error = Some(RunLastError {
            code: code.into(),
            message: message.into(),
        });
        self
    }

    /// Best available explanation for a failed, expired or incomplete run.
    pub fn failure_reason(&self) -> String {
        if let Some(err) = &self.last_error {
            if !err.message.is_empty() {
                return err.message.clone();
            }
            if !err.code.is_empty() {
                return err.code.clone();
            }
        }
        if let Some(details) = &self.incomplete_details {
            if let Some(reason) = &details.reason {
                return reason.clone();
            }
        }
        format!("run {}", self.status)
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RunLastError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct IncompleteDetails {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Action a run is blocked on.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequiredAction {
    SubmitToolOutputs {
        submit_tool_outputs: SubmitToolOutputs,
    },
    #[serde(other)]
    Unsupported,
}

impl RequiredAction {
    pub fn submit_tool_outputs(tool_calls: Vec<ToolCall>) -> Self {
        Self::SubmitToolOutputs {
            submit_tool_outputs: SubmitToolOutputs { tool_calls },
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct SubmitToolOutputs {
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    #[serde(flatten)]
    pub kind: ToolCallKind,
}

impl ToolCall {
    pub fn function(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: ToolCallKind::Function {
                function: FunctionCall {
                    name: name.into(),
                    arguments: arguments.into(),
                },
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolCallKind {
    Function {
        function: FunctionCall,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments, exactly as the model produced them.
    #[serde(default)]
    pub arguments: String,
}

/// One entry of a `submit_tool_outputs` batch.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub output: String,
}

/// Request body for a new thread message.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CreateMessage {
    pub role: &'static str,
    pub content: String,
    pub metadata: serde_json::Value,
}

impl CreateMessage {
    /// Remote copy of a host message, attributed when not from the end-user.
    pub fn from_message(message: &Message) -> Self {
        Self {
            role: "user",
            content: message.remote_content(),
            metadata: message.remote_metadata(),
        }
    }
}

/// Request body for a new assistant.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CreateAssistant {
    pub name: String,
    pub instructions: String,
    pub model: String,
    pub tools: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ThreadMessage {
    pub id: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: Vec<MessageContent>,
    #[serde(default)]
    pub run_id: Option<String>,
}

impl ThreadMessage {
    pub fn assistant(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: "assistant".into(),
            content: vec![MessageContent::Text {
                text: TextContent { value: text.into() },
            }],
            run_id: None,
        }
    }

    pub fn is_assistant(&self) -> bool {
        self.role == "assistant"
    }

    /// Concatenated text parts.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                MessageContent::Text { text } => Some(text.value.as_str()),
                MessageContent::Unsupported => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text {
        text: TextContent,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct TextContent {
    #[serde(default)]
    pub value: String,
}

/// Payload of a `thread.message.delta` event.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct MessageDeltaEvent {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub delta: MessageDelta,
}

impl MessageDeltaEvent {
    pub fn text(id: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            delta: MessageDelta {
                content: vec![DeltaContent::Text {
                    text: Some(DeltaText {
                        value: Some(value.into()),
                    }),
                }],
            },
        }
    }

    /// Text fragments carried by this delta, concatenated.
    pub fn text_fragment(&self) -> String {
        self.delta
            .content
            .iter()
            .filter_map(|part| match part {
                DeltaContent::Text { text: Some(text) } => text.value.as_deref(),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct MessageDelta {
    #[serde(default)]
    pub content: Vec<DeltaContent>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeltaContent {
    Text {
        #[serde(default)]
        text: Option<DeltaText>,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct DeltaText {
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ListResponse<T> {
    pub data: Vec<T>,
}
