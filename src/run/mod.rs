//! One conversational turn against the remote job service.
//!
//! A [`Run`] is single-use: attach the turn's input messages with
//! [`Run::add_message`], then [`Run::start`] it. The returned [`RunHandle`]
//! resolves to exactly one [`RunOutcome`]. Status and cancellation are
//! reachable through a cloneable [`RunController`] that can be taken before
//! the run starts.

mod assembler;
mod lifecycle;
mod tooling;

pub use assembler::MessageAssembler;
pub use tooling::execute_tool_calls;

use std::sync::{Arc, Mutex, MutexGuard};

use bon::Builder;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

use crate::config::LifecycleMode;
use crate::error::{DriverError, Result};
use crate::host::{CommunicationSink, HostContext, SkillRegistry};
use crate::message::{Message, MessageRef};
use crate::remote::{CreateMessage, RunStatus};
use crate::session::Session;

use lifecycle::RunLoop;

/// Callback fired with the partially assembled message on every streamed delta.
pub type RunProgressSink = Arc<dyn Fn(&Message) + Send + Sync>;

/// Per-run behaviour.
#[derive(Clone, Default, Builder)]
pub struct RunOptions {
    #[builder(default)]
    pub lifecycle: LifecycleMode,
    pub progress: Option<RunProgressSink>,
}

impl std::fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOptions")
            .field("lifecycle", &self.lifecycle)
            .field("progress", &self.progress.as_ref().map(|_| ".."))
            .finish()
    }
}

/// Terminal result of a run. Delivered exactly once.
#[derive(Debug)]
pub enum RunOutcome {
    /// Output messages in the order the remote service completed them.
    Complete(Vec<MessageRef>),
    Error {
        message: String,
        cause: Option<DriverError>,
    },
    Cancelled,
}

impl RunOutcome {
    pub fn from_error(err: DriverError) -> Self {
        Self::Error {
            message: err.to_string(),
            cause: Some(err),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            cause: None,
        }
    }
}

/// Last observed remote state of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSnapshot {
    pub run_id: Option<String>,
    pub status: RunStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunControl {
    /// Ask the remote side to cancel; keep consuming until it confirms.
    Stop,
    /// The session is being torn down; stop without starting anything new.
    Abandon,
}

/// Who owes the remote side a cancel once a run is abandoned.
///
/// Whichever of [`RunController::abandon`] and the run loop's first sight of
/// the run id comes second takes the cancel, so it is issued exactly once.
#[derive(Debug, Default)]
struct Detach {
    abandoned: bool,
    run_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct DetachHandle(Arc<Mutex<Detach>>);

impl DetachHandle {
    fn lock(&self) -> MutexGuard<'_, Detach> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn is_abandoned(&self) -> bool {
        self.lock().abandoned
    }

    /// Mark abandoned; returns the run id the caller must now cancel, if any.
    fn abandon(&self) -> Option<String> {
        let mut detach = self.lock();
        detach.abandoned = true;
        detach.run_id.clone()
    }

    /// Record the run id on first sight. `true` when the run was already
    /// abandoned, leaving the cancel to the loop.
    pub(crate) fn record(&self, run_id: &str) -> bool {
        let mut detach = self.lock();
        if detach.run_id.is_some() {
            return false;
        }
        detach.run_id = Some(run_id.to_string());
        detach.abandoned
    }
}

/// Cloneable view of a run: status plus cancellation.
#[derive(Debug, Clone)]
pub struct RunController {
    snapshot: watch::Receiver<RunSnapshot>,
    control: mpsc::UnboundedSender<RunControl>,
    detach: DetachHandle,
}

impl RunController {
    pub fn status(&self) -> RunStatus {
        self.snapshot.borrow().status
    }

    pub fn run_id(&self) -> Option<String> {
        self.snapshot.borrow().run_id.clone()
    }

    pub fn watch(&self) -> watch::Receiver<RunSnapshot> {
        self.snapshot.clone()
    }

    /// Request cancellation. Asynchronous: the run only ends as
    /// `Cancelled` once the remote side confirms it.
    pub fn stop(&self) -> bool {
        self.control.send(RunControl::Stop).is_ok()
    }

    /// Detach from the run ahead of session teardown.
    ///
    /// Returns the remote run id when it is already known; the caller is
    /// then responsible for cancelling it. Otherwise the run never reaches
    /// the remote side, or its loop cancels it as soon as the id appears.
    pub(crate) fn abandon(&self) -> Option<String> {
        let run_id = self.detach.abandon();
        let _ = self.control.send(RunControl::Abandon);
        run_id
    }

    pub(crate) fn is_abandoned(&self) -> bool {
        self.detach.is_abandoned()
    }
}

/// A single conversational turn, not yet started.
pub struct Run {
    session: Arc<Session>,
    agent: String,
    sink: Arc<dyn CommunicationSink>,
    skills: Arc<dyn SkillRegistry>,
    options: RunOptions,
    inputs: Vec<MessageRef>,
    snapshot_tx: watch::Sender<RunSnapshot>,
    control_tx: mpsc::UnboundedSender<RunControl>,
    control_rx: mpsc::UnboundedReceiver<RunControl>,
    detach: DetachHandle,
}

impl Run {
    pub fn new(
        session: Arc<Session>,
        agent: impl Into<String>,
        host: &HostContext,
        options: RunOptions,
    ) -> Self {
        let (snapshot_tx, _) = watch::channel(RunSnapshot::default());
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        Self {
            session,
            agent: agent.into(),
            sink: host.sink.clone(),
            skills: host.skills.clone(),
            options,
            inputs: Vec::new(),
            snapshot_tx,
            control_tx,
            control_rx,
            detach: DetachHandle::default(),
        }
    }

    pub fn status(&self) -> RunStatus {
        self.snapshot_tx.borrow().status
    }

    pub fn controller(&self) -> RunController {
        RunController {
            snapshot: self.snapshot_tx.subscribe(),
            control: self.control_tx.clone(),
            detach: self.detach.clone(),
        }
    }

    /// Messages attached so far, in order.
    pub fn inputs(&self) -> &[MessageRef] {
        &self.inputs
    }

    /// Post one input message to the remote thread. Must complete for every
    /// input, in order, before [`Run::start`].
    pub async fn add_message(&mut self, message: &MessageRef) -> Result<()> {
        let snapshot = message.snapshot();
        self.session
            .api()
            .create_message(self.session.thread_id(), &CreateMessage::from_message(&snapshot))
            .await?;
        debug!(agent = %self.agent, message_id = %snapshot.id, "attached message to thread");
        self.inputs.push(message.clone());
        Ok(())
    }

    /// Begin the remote job and consume its lifecycle on a background task.
    pub fn start(self) -> RunHandle {
        let controller = self.controller();
        let (outcome_tx, outcome_rx) = oneshot::channel();

        // Replies go back to whoever spoke last.
        let reply_to = self
            .inputs
            .last()
            .map(|m| m.source())
            .unwrap_or_default();

        let run_loop = RunLoop {
            api: self.session.api().clone(),
            session: self.session,
            agent: self.agent,
            reply_to,
            skills: self.skills,
            assembler: MessageAssembler::new(self.sink, self.options.progress.clone()),
            snapshot_tx: self.snapshot_tx,
            control_rx: self.control_rx,
            detach: self.detach,
            control_open: true,
            cancel_requested: false,
            cancel_sent: false,
        };
        let lifecycle = self.options.lifecycle;

        tokio::spawn(async move {
            let outcome = run_loop.drive(lifecycle).await;
            let _ = outcome_tx.send(outcome);
        });

        RunHandle {
            controller,
            outcome_rx,
        }
    }
}

/// Handle to a started run.
#[derive(Debug)]
pub struct RunHandle {
    controller: RunController,
    outcome_rx: oneshot::Receiver<RunOutcome>,
}

impl RunHandle {
    pub fn controller(&self) -> &RunController {
        &self.controller
    }

    pub fn status(&self) -> RunStatus {
        self.controller.status()
    }

    pub fn stop(&self) -> bool {
        self.controller.stop()
    }

    /// Wait for the terminal outcome.
    pub async fn wait(self) -> RunOutcome {
        self.outcome_rx
            .await
            .unwrap_or_else(|_| RunOutcome::failure("run task ended without an outcome"))
    }
}
