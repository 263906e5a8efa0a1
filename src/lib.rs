//! Assistant Driver: drives the OpenAI Assistants API on behalf of agents
//! in a multi-agent orchestration host.
//!
//! Each agent gets a [`Driver`](driver::Driver) that owns one remote
//! assistant plus one conversation thread, serializes the host's
//! instructions into runs, executes tool calls through the host's skill
//! registry, and reports replies back through the host's communication sink.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use assistant_driver::prelude::*;
//!
//! struct Stdout;
//!
//! impl CommunicationSink for Stdout {
//!     fn emit(&self, message: MessageRef) {
//!         println!("{}", message.content());
//!     }
//! }
//!
//! # async fn example() -> assistant_driver::error::Result<()> {
//! let registry = DriverRegistry::with_defaults();
//! let host = HostContext::new(Arc::new(Stdout), Arc::new(NoSkills));
//! let driver = registry.create_driver(
//!     "openai",
//!     host,
//!     "planner",
//!     &serde_json::json!({ "instructions": "Plan the work." }),
//! )?;
//! driver.wait_ready().await?;
//! driver.instruct(Message::from_user("planner", "Hello!").into());
//! driver.wait_for_idle().await;
//! registry.shutdown_all().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod host;
pub mod message;
pub mod prelude;
pub mod registry;
pub mod remote;
pub mod run;
pub mod session;
pub mod tools;

#[cfg(feature = "cli")]
pub mod cli;
