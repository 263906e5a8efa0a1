//! Remote session: one assistant plus one conversation thread per agent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::DriverConfig;
use crate::error::{DriverError, Result};
use crate::remote::{AssistantsApi, CreateAssistant};
use crate::tools::ToolDefinition;

/// Outcome of a best-effort teardown. Every step is attempted regardless
/// of earlier failures.
#[derive(Debug, Default)]
pub struct TeardownReport {
    pub errors: Vec<DriverError>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    fn record(&mut self, step: &'static str, result: Result<()>) {
        if let Err(e) = result {
            warn!(step, error = %e, "session teardown step failed");
            self.errors.push(DriverError::Teardown {
                step,
                message: e.to_string(),
            });
        }
    }
}

/// Everything needed to release a session, detached from the session
/// itself so it can run from `Drop`.
#[derive(Clone)]
struct ReleasePlan {
    api: Arc<dyn AssistantsApi>,
    assistant_id: String,
    thread_id: String,
    keep_assistant: bool,
    keep_thread: bool,
}

impl ReleasePlan {
    async fn execute(self, active_run: Option<String>) -> TeardownReport {
        let mut report = TeardownReport::default();

        if let Some(run_id) = active_run {
            let result = self
                .api
                .cancel_run(&self.thread_id, &run_id)
                .await
                .map(|_| ());
            report.record("cancel_run", result);
        }
        if !self.keep_thread {
            let result = self.api.delete_thread(&self.thread_id).await;
            report.record("delete_thread", result);
        }
        if !self.keep_assistant {
            let result = self.api.delete_assistant(&self.assistant_id).await;
            report.record("delete_assistant", result);
        }

        debug!(
            assistant_id = %self.assistant_id,
            thread_id = %self.thread_id,
            failures = report.errors.len(),
            "session released"
        );
        report
    }
}

/// A remote assistant and its conversation thread, exclusively owned by
/// one driver.
///
/// Call [`Session::release`] to tear it down. A session dropped without
/// being released schedules the same best-effort teardown on the current
/// tokio runtime, if there is one.
pub struct Session {
    plan: ReleasePlan,
    released: AtomicBool,
}

impl Session {
    /// Create the assistant, then the thread. If thread creation fails the
    /// fresh assistant is deleted again (unless it is meant to be kept).
    pub async fn create(
        api: Arc<dyn AssistantsApi>,
        agent_name: &str,
        config: &DriverConfig,
        tools: &[ToolDefinition],
    ) -> Result<Self> {
        let request = CreateAssistant {
            name: agent_name.to_string(),
            instructions: config.instructions.clone(),
            model: config.model.clone(),
            tools: tools.iter().map(ToolDefinition::to_remote).collect(),
        };
        let assistant = api.create_assistant(&request).await?;

        let thread = match api.create_thread().await {
            Ok(thread) => thread,
            Err(e) => {
                if !config.keep_assistant {
                    if let Err(cleanup) = api.delete_assistant(&assistant.id).await {
                        warn!(assistant_id = %assistant.id, error = %cleanup, "failed to delete orphaned assistant");
                    }
                }
                return Err(e);
            }
        };

        info!(
            agent = agent_name,
            assistant_id = %assistant.id,
            thread_id = %thread.id,
            "session created"
        );

        Ok(Self {
            plan: ReleasePlan {
                api,
                assistant_id: assistant.id,
                thread_id: thread.id,
                keep_assistant: config.keep_assistant,
                keep_thread: config.keep_thread,
            },
            released: AtomicBool::new(false),
        })
    }

    pub fn api(&self) -> &Arc<dyn AssistantsApi> {
        &self.plan.api
    }

    pub fn assistant_id(&self) -> &str {
        &self.plan.assistant_id
    }

    pub fn thread_id(&self) -> &str {
        &self.plan.thread_id
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Cancel `active_run` (if any), then delete the thread and assistant
    /// unless configured to keep them. Only the first call does anything.
    pub async fn release(&self, active_run: Option<&str>) -> TeardownReport {
        if self.released.swap(true, Ordering::SeqCst) {
            return TeardownReport::default();
        }
        self.plan
            .clone()
            .execute(active_run.map(str::to_string))
            .await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let plan = self.plan.clone();
                handle.spawn(plan.execute(None));
            }
            Err(_) => warn!(
                assistant_id = %self.plan.assistant_id,
                thread_id = %self.plan.thread_id,
                "session dropped outside a runtime; remote resources not released"
            ),
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("assistant_id", &self.plan.assistant_id)
            .field("thread_id", &self.plan.thread_id)
            .field("released", &self.is_released())
            .finish()
    }
}
