//! Convenience re-exports for common use.

pub use crate::config::{DriverConfig, LifecycleMode};
pub use crate::driver::{Driver, DriverStatus};
pub use crate::error::{DriverError, Result};
pub use crate::host::{CommunicationSink, HostContext, NoSkills, SkillDescriptor, SkillRegistry};
pub use crate::message::{Message, MessageKind, MessageRef, MessageStatus, Role};
pub use crate::registry::{DriverFactory, DriverRegistry, OPENAI_DRIVER};
pub use crate::run::{Run, RunHandle, RunOptions, RunOutcome};
pub use crate::session::{Session, TeardownReport};
