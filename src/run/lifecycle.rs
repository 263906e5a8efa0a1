//! Lifecycle consumption: streamed events or polled status.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, trace, warn};

use crate::config::LifecycleMode;
use crate::error::{DriverError, Result};
use crate::host::SkillRegistry;
use crate::remote::{
    AssistantsApi, RequiredAction, RunEventStream, RunObject, RunStatus, RunStreamEvent,
    ToolOutput,
};
use crate::session::Session;

use super::assembler::MessageAssembler;
use super::tooling::execute_tool_calls;
use super::{DetachHandle, RunControl, RunOutcome, RunSnapshot};

/// What a run status asks of the loop.
enum Phase {
    Pending,
    NeedsAction,
    Completed,
    Failed(RunOutcome),
    Cancelled,
}

impl Phase {
    fn of(run: &RunObject) -> Self {
        match run.status {
            RunStatus::Queued
            | RunStatus::InProgress
            | RunStatus::Cancelling
            | RunStatus::Unknown => Self::Pending,
            RunStatus::RequiresAction => Self::NeedsAction,
            RunStatus::Completed => Self::Completed,
            RunStatus::Failed | RunStatus::Expired | RunStatus::Incomplete => {
                let reason = run.failure_reason();
                Self::Failed(RunOutcome::Error {
                    message: reason.clone(),
                    cause: Some(DriverError::RunFailed {
                        status: run.status.to_string(),
                        reason,
                    }),
                })
            }
            RunStatus::Cancelled => Self::Cancelled,
        }
    }
}

enum Step {
    Continue,
    /// Keep consuming on a fresh stream (after tool outputs were submitted).
    Resume(RunEventStream),
    Finished(RunOutcome),
}

enum Tick<T> {
    Control(Option<RunControl>),
    Event(T),
}

/// The single lifecycle-consumption loop of one run.
pub(super) struct RunLoop {
    pub(super) api: Arc<dyn AssistantsApi>,
    pub(super) session: Arc<Session>,
    pub(super) agent: String,
    pub(super) reply_to: String,
    pub(super) skills: Arc<dyn SkillRegistry>,
    pub(super) assembler: MessageAssembler,
    pub(super) snapshot_tx: watch::Sender<RunSnapshot>,
    pub(super) control_rx: mpsc::UnboundedReceiver<RunControl>,
    pub(super) detach: DetachHandle,
    pub(super) control_open: bool,
    pub(super) cancel_requested: bool,
    pub(super) cancel_sent: bool,
}

impl RunLoop {
    pub(super) async fn drive(self, lifecycle: LifecycleMode) -> RunOutcome {
        let outcome = match lifecycle.poll_interval() {
            None => self.stream().await,
            Some(interval) => self.poll(interval).await,
        };
        match &outcome {
            RunOutcome::Complete(messages) => debug!(count = messages.len(), "run completed"),
            RunOutcome::Error { message, .. } => error!(error = %message, "run failed"),
            RunOutcome::Cancelled => debug!("run cancelled"),
        }
        outcome
    }

    async fn stream(mut self) -> RunOutcome {
        if self.detach.is_abandoned() {
            return self.abandoned();
        }
        let api = self.api.clone();
        let mut stream = match api
            .create_run_stream(self.session.thread_id(), self.session.assistant_id())
            .await
        {
            Ok(stream) => stream,
            Err(e) => return RunOutcome::from_error(e),
        };
        debug!(agent = %self.agent, thread_id = %self.session.thread_id(), "streaming run started");

        loop {
            let tick = tokio::select! {
                control = self.control_rx.recv(), if self.control_open => Tick::Control(control),
                event = stream.next() => Tick::Event(event),
            };

            match tick {
                Tick::Control(None) => self.control_open = false,
                // Without a run id, keep reading until the run shows up so it can be cancelled.
                Tick::Control(Some(RunControl::Abandon)) if self.run_id().is_some() => {
                    return self.abandoned()
                }
                Tick::Control(Some(RunControl::Abandon)) => {}
                Tick::Control(Some(RunControl::Stop)) => self.request_cancel().await,
                Tick::Event(None) => {
                    return RunOutcome::failure(
                        "event stream ended before the run reached a terminal state",
                    )
                }
                Tick::Event(Some(Err(e))) => return RunOutcome::from_error(e),
                Tick::Event(Some(Ok(event))) => match self.on_event(event).await {
                    Step::Continue => {}
                    Step::Resume(next) => stream = next,
                    Step::Finished(outcome) => return outcome,
                },
            }
        }
    }

    async fn on_event(&mut self, event: RunStreamEvent) -> Step {
        match event {
            RunStreamEvent::RunUpdated(run) => {
                self.observe(&run).await;
                if self.detach.is_abandoned() {
                    return Step::Finished(self.abandoned());
                }
                match Phase::of(&run) {
                    Phase::Pending => Step::Continue,
                    Phase::NeedsAction => {
                        let outputs = match self.tool_outputs(&run).await {
                            Ok(outputs) => outputs,
                            Err(e) => return Step::Finished(RunOutcome::from_error(e)),
                        };
                        match self
                            .api
                            .submit_tool_outputs_stream(self.session.thread_id(), &run.id, &outputs)
                            .await
                        {
                            Ok(stream) => Step::Resume(stream),
                            Err(e) => Step::Finished(RunOutcome::from_error(e)),
                        }
                    }
                    Phase::Completed => Step::Finished(RunOutcome::Complete(self.assembler.finish())),
                    Phase::Failed(outcome) => Step::Finished(outcome),
                    Phase::Cancelled => Step::Finished(RunOutcome::Cancelled),
                }
            }
            RunStreamEvent::MessageCreated(_) => {
                self.assembler.open(&self.agent, &self.reply_to);
                Step::Continue
            }
            RunStreamEvent::MessageDelta(delta) => {
                if let Err(e) = self.assembler.delta(&delta.text_fragment()) {
                    warn!(agent = %self.agent, error = %e, "dropping content delta");
                }
                Step::Continue
            }
            RunStreamEvent::MessageCompleted(_) => {
                if let Err(e) = self.assembler.close() {
                    warn!(agent = %self.agent, error = %e, "ignoring message completion");
                }
                Step::Continue
            }
            RunStreamEvent::Error(message) => {
                Step::Finished(RunOutcome::from_error(DriverError::Stream(message)))
            }
            RunStreamEvent::Done => Step::Finished(RunOutcome::failure(
                "event stream closed before the run reached a terminal state",
            )),
            RunStreamEvent::Ignored(name) => {
                trace!(event = %name, "ignoring lifecycle event");
                Step::Continue
            }
        }
    }

    async fn poll(mut self, interval: Duration) -> RunOutcome {
        if self.detach.is_abandoned() {
            return self.abandoned();
        }
        let api = self.api.clone();
        let thread_id = self.session.thread_id().to_string();

        let mut run = match api
            .create_run(&thread_id, self.session.assistant_id())
            .await
        {
            Ok(run) => run,
            Err(e) => return RunOutcome::from_error(e),
        };
        debug!(agent = %self.agent, run_id = %run.id, ?interval, "polled run started");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            self.observe(&run).await;
            if self.detach.is_abandoned() {
                return self.abandoned();
            }
            match Phase::of(&run) {
                Phase::Pending => {}
                Phase::NeedsAction => {
                    let outputs = match self.tool_outputs(&run).await {
                        Ok(outputs) => outputs,
                        Err(e) => return RunOutcome::from_error(e),
                    };
                    run = match api.submit_tool_outputs(&thread_id, &run.id, &outputs).await {
                        Ok(next) => next,
                        Err(e) => return RunOutcome::from_error(e),
                    };
                    ticker.reset();
                    continue;
                }
                Phase::Completed => return self.collect_output(&thread_id, &run.id).await,
                Phase::Failed(outcome) => return outcome,
                Phase::Cancelled => return RunOutcome::Cancelled,
            }

            loop {
                let tick = tokio::select! {
                    control = self.control_rx.recv(), if self.control_open => Tick::Control(control),
                    _ = ticker.tick() => Tick::Event(()),
                };
                match tick {
                    Tick::Event(()) => break,
                    Tick::Control(None) => self.control_open = false,
                    Tick::Control(Some(RunControl::Abandon)) => return self.abandoned(),
                    Tick::Control(Some(RunControl::Stop)) => self.request_cancel().await,
                }
            }

            run = match api.retrieve_run(&thread_id, &run.id).await {
                Ok(run) => run,
                Err(e) => return RunOutcome::from_error(e),
            };
        }
    }

    /// Fetch the messages a polled run produced, oldest first.
    async fn collect_output(&mut self, thread_id: &str, run_id: &str) -> RunOutcome {
        let messages = match self.api.list_messages(thread_id, Some(run_id)).await {
            Ok(messages) => messages,
            Err(e) => return RunOutcome::from_error(e),
        };
        for message in messages.iter().filter(|m| m.is_assistant()) {
            self.assembler
                .push_complete(&self.agent, &self.reply_to, &message.text());
        }
        RunOutcome::Complete(self.assembler.finish())
    }

    /// Record the latest remote state; issue a deferred cancel once the run id is known.
    async fn observe(&mut self, run: &RunObject) {
        trace!(run_id = %run.id, status = %run.status, "run status");
        if self.detach.record(&run.id) {
            debug!(agent = %self.agent, run_id = %run.id, "run appeared after it was abandoned; cancelling");
            self.cancel_requested = true;
        }
        self.snapshot_tx.send_replace(RunSnapshot {
            run_id: Some(run.id.clone()),
            status: run.status,
        });
        if self.cancel_requested && !self.cancel_sent && !run.status.is_terminal() {
            self.send_cancel(&run.id).await;
        }
    }

    fn run_id(&self) -> Option<String> {
        self.snapshot_tx.borrow().run_id.clone()
    }

    async fn request_cancel(&mut self) {
        if self.cancel_requested {
            return;
        }
        self.cancel_requested = true;
        match self.run_id() {
            Some(run_id) => self.send_cancel(&run_id).await,
            None => debug!(agent = %self.agent, "cancel requested before the remote run exists; deferring"),
        }
    }

    async fn send_cancel(&mut self, run_id: &str) {
        self.cancel_sent = true;
        match self.api.cancel_run(self.session.thread_id(), run_id).await {
            Ok(run) => debug!(run_id, status = %run.status, "cancel requested"),
            Err(e) => warn!(run_id, error = %e, "cancel request failed"),
        }
    }

    async fn tool_outputs(&self, run: &RunObject) -> Result<Vec<ToolOutput>> {
        match &run.required_action {
            Some(RequiredAction::SubmitToolOutputs {
                submit_tool_outputs,
            }) => Ok(execute_tool_calls(
                &submit_tool_outputs.tool_calls,
                self.skills.as_ref(),
                &self.agent,
            )
            .await),
            Some(RequiredAction::Unsupported) => {
                error!(run_id = %run.id, "run requires an unsupported action");
                Err(DriverError::UnsupportedAction(format!(
                    "run {} requires an action other than submit_tool_outputs",
                    run.id
                )))
            }
            None => Err(DriverError::ProtocolViolation(format!(
                "run {} requires action but reported none",
                run.id
            ))),
        }
    }

    fn abandoned(&self) -> RunOutcome {
        debug!(agent = %self.agent, "run abandoned");
        RunOutcome::Cancelled
    }
}
