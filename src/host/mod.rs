//! Interfaces the orchestration host provides to the driver.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{DriverError, Result};
use crate::message::{Message, MessageRef, Role};

/// Outbound channel for finished messages.
pub trait CommunicationSink: Send + Sync {
    /// Deliver a finished message to the rest of the system.
    fn emit(&self, message: MessageRef);

    /// Construct a new mutable message. Content grows via [`MessageRef::append`].
    fn create_message(&self, role: Role, author: &str, content: &str) -> MessageRef {
        MessageRef::new(Message::new(role, author, "", content))
    }
}

/// Schema-relevant parts of a host skill.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SkillDescriptor {
    pub description: String,
    /// JSON Schema `properties` object.
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub required: Vec<String>,
}

/// The host's skill registry: schema lookup plus execution.
#[async_trait]
pub trait SkillRegistry: Send + Sync {
    fn get(&self, name: &str) -> Option<SkillDescriptor>;

    /// Run a skill on behalf of `agent`. Failures are reported back to the
    /// model as that call's output.
    async fn execute(
        &self,
        name: &str,
        args: serde_json::Value,
        agent: &str,
    ) -> Result<serde_json::Value>;
}

/// Registry with no skills.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSkills;

#[async_trait]
impl SkillRegistry for NoSkills {
    fn get(&self, _name: &str) -> Option<SkillDescriptor> {
        None
    }

    async fn execute(
        &self,
        name: &str,
        _args: serde_json::Value,
        _agent: &str,
    ) -> Result<serde_json::Value> {
        Err(DriverError::skill(name, "no such skill"))
    }
}

/// Handles to the host collaborators a driver needs.
#[derive(Clone)]
pub struct HostContext {
    pub sink: Arc<dyn CommunicationSink>,
    pub skills: Arc<dyn SkillRegistry>,
}

impl HostContext {
    pub fn new(sink: Arc<dyn CommunicationSink>, skills: Arc<dyn SkillRegistry>) -> Self {
        Self { sink, skills }
    }
}

impl std::fmt::Debug for HostContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostContext").finish_non_exhaustive()
    }
}
