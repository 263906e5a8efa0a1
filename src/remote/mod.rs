//! The remote assistant job service.

pub mod events;
pub mod http;
pub mod openai;
pub mod types;

pub use events::RunStreamEvent;
pub use openai::OpenAiAssistantsClient;
pub use types::{
    AssistantObject, CreateAssistant, CreateMessage, RequiredAction, RunObject, RunStatus,
    ThreadMessage, ThreadObject, ToolCall, ToolCallKind, ToolOutput,
};

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;

/// Ordered lifecycle events of one streamed run segment.
pub type RunEventStream = BoxStream<'static, Result<RunStreamEvent>>;

/// Operations the driver needs from the assistant service.
#[async_trait]
pub trait AssistantsApi: Send + Sync {
    async fn create_assistant(&self, request: &CreateAssistant) -> Result<AssistantObject>;

    async fn delete_assistant(&self, assistant_id: &str) -> Result<()>;

    async fn create_thread(&self) -> Result<ThreadObject>;

    async fn delete_thread(&self, thread_id: &str) -> Result<()>;

    async fn create_message(&self, thread_id: &str, request: &CreateMessage)
        -> Result<ThreadMessage>;

    /// Messages on a thread in ascending order, optionally only those a run produced.
    async fn list_messages(&self, thread_id: &str, run_id: Option<&str>)
        -> Result<Vec<ThreadMessage>>;

    async fn create_run(&self, thread_id: &str, assistant_id: &str) -> Result<RunObject>;

    async fn create_run_stream(&self, thread_id: &str, assistant_id: &str)
        -> Result<RunEventStream>;

    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<RunObject>;

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<RunObject>;

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<RunObject>;

    async fn submit_tool_outputs_stream(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<RunEventStream>;
}
