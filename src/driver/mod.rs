//! Per-agent driver: session ownership and serialized run execution.
//!
//! Exactly one [`Run`] is live per driver at any time. Instructions that
//! arrive while a run is active (or while the driver is paused or still
//! creating its session) are queued and combined, in arrival order, into
//! the next run.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use strum::Display;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::config::DriverConfig;
use crate::error::{DriverError, Result};
use crate::host::HostContext;
use crate::message::{MessageRef, MessageStatus};
use crate::remote::AssistantsApi;
use crate::run::{Run, RunController, RunOptions, RunOutcome, RunProgressSink};
use crate::session::{Session, TeardownReport};
use crate::tools::translate_skills;

/// Derived driver status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum DriverStatus {
    /// No active run, nothing queued.
    Idle,
    /// No active run, messages waiting.
    Queued,
    /// A run is active.
    Busy,
    /// A run is active but the driver is unavailable.
    Paused,
    /// The active run's last observed remote status is a failure.
    Error,
}

/// Session setup progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Pending,
    Ready,
    Failed(String),
}

struct ActiveRun {
    generation: u64,
    controller: RunController,
    in_flight: Vec<MessageRef>,
}

#[derive(Default)]
struct DriverState {
    session: Option<Arc<Session>>,
    ready: bool,
    paused: bool,
    removed: bool,
    queue: VecDeque<MessageRef>,
    active: Option<ActiveRun>,
    next_generation: u64,
}

impl DriverState {
    fn available(&self) -> bool {
        self.ready && !self.paused && !self.removed
    }
}

struct DriverInner {
    agent: String,
    host: HostContext,
    config: DriverConfig,
    progress: Option<RunProgressSink>,
    state: Mutex<DriverState>,
    readiness: watch::Sender<Readiness>,
    idle: watch::Sender<bool>,
}

/// Cheaply cloneable handle to one agent's driver.
#[derive(Clone)]
pub struct Driver {
    inner: Arc<DriverInner>,
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("agent", &self.inner.agent)
            .field("status", &self.status())
            .finish()
    }
}

impl Driver {
    /// Create a driver and start building its session in the background.
    ///
    /// The driver accepts instructions immediately; they queue until the
    /// session exists. If session creation fails the error is logged and
    /// the driver stays unavailable.
    pub fn spawn(
        host: HostContext,
        agent: impl Into<String>,
        config: DriverConfig,
        api: Arc<dyn AssistantsApi>,
    ) -> Self {
        Self::spawn_with_progress(host, agent, config, api, None)
    }

    /// Like [`Driver::spawn`], with a callback for streamed partial messages.
    pub fn spawn_with_progress(
        host: HostContext,
        agent: impl Into<String>,
        config: DriverConfig,
        api: Arc<dyn AssistantsApi>,
        progress: Option<RunProgressSink>,
    ) -> Self {
        let (readiness, _) = watch::channel(Readiness::Pending);
        let (idle, _) = watch::channel(true);
        let driver = Self {
            inner: Arc::new(DriverInner {
                agent: agent.into(),
                host,
                config,
                progress,
                state: Mutex::new(DriverState::default()),
                readiness,
                idle,
            }),
        };

        let inner = driver.inner.clone();
        tokio::spawn(async move { inner.establish_session(api).await });
        driver
    }

    pub fn agent_name(&self) -> &str {
        &self.inner.agent
    }

    pub fn config(&self) -> &DriverConfig {
        &self.inner.config
    }

    /// Wait until session setup finishes.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut rx = self.inner.readiness.subscribe();
        let state = rx
            .wait_for(|r| *r != Readiness::Pending)
            .await
            .map_err(|_| DriverError::InvalidState("driver dropped during setup".into()))?
            .clone();
        match state {
            Readiness::Ready => Ok(()),
            Readiness::Failed(reason) => Err(DriverError::InvalidState(format!(
                "session creation failed: {reason}"
            ))),
            Readiness::Pending => Err(DriverError::InvalidState("session still pending".into())),
        }
    }

    /// Hand an instruction to the agent.
    ///
    /// Queues it when a run is active or the driver is unavailable.
    /// Otherwise starts a run with every queued message plus this one, in
    /// arrival order.
    pub fn instruct(&self, message: MessageRef) {
        let mut state = self.inner.lock();
        if message.status() != MessageStatus::Queued {
            message.requeue();
        }

        if state.active.is_some() || !state.available() {
            debug!(
                agent = %self.inner.agent,
                message_id = %message.id(),
                queued = state.queue.len() + 1,
                "queueing instruction"
            );
            state.queue.push_back(message);
            return;
        }

        let mut batch: Vec<MessageRef> = state.queue.drain(..).collect();
        batch.push(message);
        self.inner.start_run(&mut state, batch);
    }

    pub fn status(&self) -> DriverStatus {
        let state = self.inner.lock();
        match &state.active {
            Some(active) if active.controller.status().is_failure() => DriverStatus::Error,
            Some(_) if state.available() => DriverStatus::Busy,
            Some(_) => DriverStatus::Paused,
            None if !state.queue.is_empty() => DriverStatus::Queued,
            None => DriverStatus::Idle,
        }
    }

    pub fn queued_len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn has_active_run(&self) -> bool {
        self.inner.lock().active.is_some()
    }

    /// Remote id of the active run, once the service has assigned one.
    pub fn active_run_id(&self) -> Option<String> {
        self.inner
            .lock()
            .active
            .as_ref()
            .and_then(|active| active.controller.run_id())
    }

    /// Stop accepting new runs. The active run, if any, continues.
    pub fn pause(&self) {
        self.inner.lock().paused = true;
        debug!(agent = %self.inner.agent, "driver paused");
    }

    /// Accept runs again; starts one run with the whole queue if idle.
    pub fn resume(&self) {
        let mut state = self.inner.lock();
        state.paused = false;
        debug!(agent = %self.inner.agent, queued = state.queue.len(), "driver resumed");
        self.inner.drain(&mut state);
    }

    /// Ask the active run to cancel. Returns `false` when nothing is running.
    pub fn stop(&self) -> bool {
        let state = self.inner.lock();
        match &state.active {
            Some(active) => active.controller.stop(),
            None => false,
        }
    }

    /// Resolve once no run is active.
    pub async fn wait_for_idle(&self) {
        let mut rx = self.inner.idle.subscribe();
        let _ = rx.wait_for(|idle| *idle).await;
    }

    /// Tear the driver down: cancel the active run, delete the thread and
    /// the assistant (each unless kept). Steps are independent and
    /// best-effort; later calls are no-ops.
    pub async fn remove(&self) -> TeardownReport {
        let (session, active_run) = {
            let mut state = self.inner.lock();
            if state.removed {
                return TeardownReport::default();
            }
            state.removed = true;

            // A run without a remote id yet is cancelled by its own loop.
            let active_run = state.active.take().and_then(|active| {
                for message in &active.in_flight {
                    message.set_status(MessageStatus::Cancelled);
                }
                active.controller.abandon()
            });
            for message in state.queue.drain(..) {
                message.set_status(MessageStatus::Cancelled);
            }
            self.inner.idle.send_replace(true);
            (state.session.take(), active_run)
        };

        info!(agent = %self.inner.agent, "removing driver");
        match session {
            Some(session) => session.release(active_run.as_deref()).await,
            None => TeardownReport::default(),
        }
    }
}

impl DriverInner {
    fn lock(&self) -> MutexGuard<'_, DriverState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn establish_session(self: Arc<Self>, api: Arc<dyn AssistantsApi>) {
        let tools = translate_skills(&self.config.skills, self.host.skills.as_ref());
        let session = match Session::create(api, &self.agent, &self.config, &tools).await {
            Ok(session) => Arc::new(session),
            Err(e) => {
                error!(agent = %self.agent, error = %e, "failed to create session; driver unavailable");
                self.readiness.send_replace(Readiness::Failed(e.to_string()));
                return;
            }
        };

        let orphaned = {
            let mut state = self.lock();
            if state.removed {
                Some(session)
            } else {
                state.session = Some(session);
                state.ready = true;
                self.drain(&mut state);
                None
            }
        };
        // Removed while setting up: nobody else will release it.
        match orphaned {
            Some(session) => {
                session.release(None).await;
                self.readiness
                    .send_replace(Readiness::Failed("driver removed during setup".into()));
            }
            None => {
                self.readiness.send_replace(Readiness::Ready);
            }
        }
    }

    /// Start one run with the whole queue when possible.
    fn drain(self: &Arc<Self>, state: &mut DriverState) {
        if state.active.is_some() || !state.available() || state.queue.is_empty() {
            return;
        }
        let batch: Vec<MessageRef> = state.queue.drain(..).collect();
        self.start_run(state, batch);
    }

    fn start_run(self: &Arc<Self>, state: &mut DriverState, batch: Vec<MessageRef>) {
        let Some(session) = state.session.clone() else {
            state.queue.extend(batch);
            return;
        };
        for message in &batch {
            message.set_status(MessageStatus::Processing);
        }

        let options = RunOptions {
            lifecycle: self.config.lifecycle,
            progress: self.progress.clone(),
        };
        let run = Run::new(session, self.agent.clone(), &self.host, options);
        let generation = state.next_generation;
        state.next_generation += 1;
        state.active = Some(ActiveRun {
            generation,
            controller: run.controller(),
            in_flight: batch.clone(),
        });
        self.idle.send_replace(false);
        debug!(agent = %self.agent, generation, messages = batch.len(), "starting run");

        let inner = self.clone();
        tokio::spawn(async move {
            let outcome = execute(run, &batch).await;
            inner.finish_run(generation, outcome);
        });
    }

    fn finish_run(self: &Arc<Self>, generation: u64, outcome: RunOutcome) {
        let active = {
            let mut state = self.lock();
            match state.active.take() {
                Some(active) if active.generation == generation => active,
                other => {
                    // Superseded (e.g. the driver was removed); nothing to settle.
                    state.active = other;
                    return;
                }
            }
        };

        // Outputs reach the host before the inputs settle and the queue moves on.
        if let RunOutcome::Complete(messages) = &outcome {
            for message in messages {
                message.set_status(MessageStatus::Complete);
                self.host.sink.emit(message.clone());
            }
        }

        let mut state = self.lock();
        match outcome {
            RunOutcome::Complete(_) => {
                for message in &active.in_flight {
                    message.set_status(MessageStatus::Complete);
                }
                self.drain(&mut state);
            }
            RunOutcome::Error { message, .. } => {
                error!(agent = %self.agent, error = %message, "run failed; marking messages as errored");
                for message in &active.in_flight {
                    message.set_status(MessageStatus::Error);
                }
                self.drain(&mut state);
            }
            RunOutcome::Cancelled => {
                for message in &active.in_flight {
                    message.set_status(MessageStatus::Cancelled);
                }
            }
        }

        if state.active.is_none() {
            self.idle.send_replace(true);
        }
    }
}

/// Attach every input in order, then start the run and wait for it.
async fn execute(mut run: Run, batch: &[MessageRef]) -> RunOutcome {
    let controller = run.controller();
    for message in batch {
        if controller.is_abandoned() {
            return RunOutcome::Cancelled;
        }
        if let Err(e) = run.add_message(message).await {
            return RunOutcome::from_error(e);
        }
    }
    run.start().wait().await
}
