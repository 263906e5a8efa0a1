//! Shared test helpers: a scripted assistants API, recording sink and skills.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;
use tokio::sync::{mpsc, Notify};

use assistant_driver::error::{DriverError, Result};
use assistant_driver::host::{CommunicationSink, HostContext, SkillDescriptor, SkillRegistry};
use assistant_driver::message::{Message, MessageRef};
use assistant_driver::remote::types::MessageDeltaEvent;
use assistant_driver::remote::{
    AssistantObject, AssistantsApi, CreateAssistant, CreateMessage, RequiredAction, RunEventStream,
    RunObject, RunStatus, RunStreamEvent, ThreadMessage, ThreadObject, ToolCall, ToolOutput,
};

pub const ASSISTANT_ID: &str = "asst_1";
pub const THREAD_ID: &str = "thread_1";

/// Sender side of a stream the test feeds by hand.
pub type LiveStream = mpsc::UnboundedSender<Result<RunStreamEvent>>;

enum StreamScript {
    Scripted(Vec<Result<RunStreamEvent>>),
    Live(mpsc::UnboundedReceiver<Result<RunStreamEvent>>),
}

impl StreamScript {
    fn into_stream(self) -> RunEventStream {
        match self {
            Self::Scripted(events) => futures::stream::iter(events).boxed(),
            Self::Live(rx) => {
                futures::stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|event| (event, rx))
                })
                .boxed()
            }
        }
    }
}

/// In-memory [`AssistantsApi`] that replays scripted responses and
/// records every call it receives.
#[derive(Default)]
pub struct ScriptedApi {
    calls: Mutex<Vec<String>>,
    assistants: Mutex<Vec<CreateAssistant>>,
    messages: Mutex<Vec<CreateMessage>>,
    submitted: Mutex<Vec<Vec<ToolOutput>>>,
    streams: Mutex<VecDeque<StreamScript>>,
    runs: Mutex<VecDeque<RunObject>>,
    run_messages: Mutex<Vec<ThreadMessage>>,
    holds: Mutex<HashMap<&'static str, Arc<Notify>>>,
    pub fail_create_thread: AtomicBool,
    pub fail_cancel: AtomicBool,
    pub fail_delete_thread: AtomicBool,
    message_count: AtomicUsize,
}

impl ScriptedApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a stream that yields `events` and then ends.
    pub fn push_stream(&self, events: Vec<RunStreamEvent>) {
        self.streams
            .lock()
            .unwrap()
            .push_back(StreamScript::Scripted(events.into_iter().map(Ok).collect()));
    }

    /// Queue a stream that yields `events`, then fails with `error`.
    pub fn push_failing_stream(&self, events: Vec<RunStreamEvent>, error: DriverError) {
        let mut items: Vec<Result<RunStreamEvent>> = events.into_iter().map(Ok).collect();
        items.push(Err(error));
        self.streams
            .lock()
            .unwrap()
            .push_back(StreamScript::Scripted(items));
    }

    /// Queue a stream the test drives event by event.
    pub fn push_live_stream(&self) -> LiveStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.streams
            .lock()
            .unwrap()
            .push_back(StreamScript::Live(rx));
        tx
    }

    /// Queue a run object for `create_run` / `retrieve_run` / `submit_tool_outputs`.
    pub fn push_run(&self, run: RunObject) {
        self.runs.lock().unwrap().push_back(run);
    }

    /// Messages `list_messages` returns.
    pub fn set_run_messages(&self, messages: Vec<ThreadMessage>) {
        *self.run_messages.lock().unwrap() = messages;
    }

    /// Make `call` (e.g. `"create_thread"`) wait, after being recorded,
    /// until the returned handle is notified.
    pub fn hold(&self, call: &'static str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.holds.lock().unwrap().insert(call, gate.clone());
        gate
    }

    async fn pass(&self, call: &str) {
        let gate = self.holds.lock().unwrap().get(call).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn assistants(&self) -> Vec<CreateAssistant> {
        self.assistants.lock().unwrap().clone()
    }

    pub fn posted_messages(&self) -> Vec<CreateMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn posted_contents(&self) -> Vec<String> {
        self.posted_messages()
            .into_iter()
            .map(|m| m.content)
            .collect()
    }

    pub fn submitted(&self) -> Vec<Vec<ToolOutput>> {
        self.submitted.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn next_stream(&self) -> RunEventStream {
        match self.streams.lock().unwrap().pop_front() {
            Some(script) => script.into_stream(),
            None => futures::stream::empty().boxed(),
        }
    }

    fn next_run(&self) -> Result<RunObject> {
        self.runs
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| DriverError::api(500, "no scripted run left"))
    }
}

#[async_trait]
impl AssistantsApi for ScriptedApi {
    async fn create_assistant(&self, request: &CreateAssistant) -> Result<AssistantObject> {
        self.record("create_assistant");
        self.assistants.lock().unwrap().push(request.clone());
        Ok(AssistantObject {
            id: ASSISTANT_ID.into(),
        })
    }

    async fn delete_assistant(&self, assistant_id: &str) -> Result<()> {
        self.record(format!("delete_assistant:{assistant_id}"));
        Ok(())
    }

    async fn create_thread(&self) -> Result<ThreadObject> {
        self.record("create_thread");
        self.pass("create_thread").await;
        if self.fail_create_thread.load(Ordering::SeqCst) {
            return Err(DriverError::api(500, "thread creation failed"));
        }
        Ok(ThreadObject {
            id: THREAD_ID.into(),
        })
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        self.record(format!("delete_thread:{thread_id}"));
        if self.fail_delete_thread.load(Ordering::SeqCst) {
            return Err(DriverError::api(404, "no such thread"));
        }
        Ok(())
    }

    async fn create_message(
        &self,
        thread_id: &str,
        request: &CreateMessage,
    ) -> Result<ThreadMessage> {
        self.record(format!("create_message:{thread_id}"));
        self.messages.lock().unwrap().push(request.clone());
        let n = self.message_count.fetch_add(1, Ordering::SeqCst);
        Ok(ThreadMessage {
            id: format!("msg_in_{n}"),
            role: "user".into(),
            ..Default::default()
        })
    }

    async fn list_messages(
        &self,
        thread_id: &str,
        run_id: Option<&str>,
    ) -> Result<Vec<ThreadMessage>> {
        self.record(format!("list_messages:{thread_id}:{}", run_id.unwrap_or("")));
        self.pass("list_messages").await;
        Ok(self.run_messages.lock().unwrap().clone())
    }

    async fn create_run(&self, thread_id: &str, assistant_id: &str) -> Result<RunObject> {
        self.record(format!("create_run:{thread_id}:{assistant_id}"));
        self.next_run()
    }

    async fn create_run_stream(
        &self,
        thread_id: &str,
        assistant_id: &str,
    ) -> Result<RunEventStream> {
        self.record(format!("create_run_stream:{thread_id}:{assistant_id}"));
        Ok(self.next_stream())
    }

    async fn retrieve_run(&self, _thread_id: &str, run_id: &str) -> Result<RunObject> {
        self.record(format!("retrieve_run:{run_id}"));
        self.next_run()
    }

    async fn cancel_run(&self, _thread_id: &str, run_id: &str) -> Result<RunObject> {
        self.record(format!("cancel_run:{run_id}"));
        if self.fail_cancel.load(Ordering::SeqCst) {
            return Err(DriverError::api(400, "run already finished"));
        }
        Ok(RunObject::new(run_id, RunStatus::Cancelling))
    }

    async fn submit_tool_outputs(
        &self,
        _thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<RunObject> {
        self.record(format!("submit_tool_outputs:{run_id}"));
        self.submitted.lock().unwrap().push(outputs.to_vec());
        self.next_run()
    }

    async fn submit_tool_outputs_stream(
        &self,
        _thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<RunEventStream> {
        self.record(format!("submit_tool_outputs_stream:{run_id}"));
        self.submitted.lock().unwrap().push(outputs.to_vec());
        Ok(self.next_stream())
    }
}

/// Sink that keeps every emitted message.
#[derive(Default)]
pub struct RecordingSink {
    emitted: Mutex<Vec<MessageRef>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn emitted(&self) -> Vec<Message> {
        self.emitted
            .lock()
            .unwrap()
            .iter()
            .map(MessageRef::snapshot)
            .collect()
    }

    pub fn contents(&self) -> Vec<String> {
        self.emitted().into_iter().map(|m| m.content).collect()
    }
}

impl CommunicationSink for RecordingSink {
    fn emit(&self, message: MessageRef) {
        self.emitted.lock().unwrap().push(message);
    }
}

/// Skills: `add` sums `a` and `b`, `fail` always errors.
#[derive(Default)]
pub struct TestSkills {
    executed: Mutex<Vec<(String, serde_json::Value, String)>>,
}

impl TestSkills {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn executed(&self) -> Vec<(String, serde_json::Value, String)> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl SkillRegistry for TestSkills {
    fn get(&self, name: &str) -> Option<SkillDescriptor> {
        match name {
            "add" => Some(SkillDescriptor {
                description: "Add two integers".into(),
                parameters: json!({
                    "a": { "type": "integer" },
                    "b": { "type": "integer" }
                })
                .as_object()
                .cloned()
                .unwrap_or_default(),
                required: vec!["a".into(), "b".into()],
            }),
            "fail" => Some(SkillDescriptor {
                description: "Always fails".into(),
                ..Default::default()
            }),
            _ => None,
        }
    }

    async fn execute(
        &self,
        name: &str,
        args: serde_json::Value,
        agent: &str,
    ) -> Result<serde_json::Value> {
        self.executed
            .lock()
            .unwrap()
            .push((name.to_string(), args.clone(), agent.to_string()));
        match name {
            "add" => {
                let a = args["a"].as_i64().unwrap_or_default();
                let b = args["b"].as_i64().unwrap_or_default();
                Ok(json!(a + b))
            }
            _ => Err(DriverError::skill(name, "skill exploded")),
        }
    }
}

pub fn host(sink: Arc<RecordingSink>, skills: Arc<TestSkills>) -> HostContext {
    HostContext::new(sink, skills)
}

pub fn run_event(id: &str, status: RunStatus) -> RunStreamEvent {
    RunStreamEvent::RunUpdated(RunObject::new(id, status))
}

pub fn tool_call_event(id: &str, calls: Vec<ToolCall>) -> RunStreamEvent {
    RunStreamEvent::RunUpdated(
        RunObject::new(id, RunStatus::RequiresAction)
            .with_required_action(RequiredAction::submit_tool_outputs(calls)),
    )
}

pub fn message_created(id: &str) -> RunStreamEvent {
    RunStreamEvent::MessageCreated(ThreadMessage {
        id: id.into(),
        role: "assistant".into(),
        ..Default::default()
    })
}

pub fn delta(id: &str, text: &str) -> RunStreamEvent {
    RunStreamEvent::MessageDelta(MessageDeltaEvent::text(id, text))
}

pub fn message_completed(id: &str, text: &str) -> RunStreamEvent {
    RunStreamEvent::MessageCompleted(ThreadMessage::assistant(id, text))
}

/// A full streamed reply: created, one delta, completed, run completed.
pub fn reply(run_id: &str, text: &str) -> Vec<RunStreamEvent> {
    let msg_id = format!("msg_{run_id}");
    vec![
        run_event(run_id, RunStatus::InProgress),
        message_created(&msg_id),
        delta(&msg_id, text),
        message_completed(&msg_id, text),
        run_event(run_id, RunStatus::Completed),
        RunStreamEvent::Done,
    ]
}

/// Yield to the runtime until `cond` holds (bounded).
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}
