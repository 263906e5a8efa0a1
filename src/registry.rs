//! Driver-type registration and process-level shutdown.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::join_all;
use tracing::{info, warn};

use crate::config::DriverConfig;
use crate::driver::Driver;
use crate::error::{DriverError, Result};
use crate::host::HostContext;
use crate::remote::OpenAiAssistantsClient;
use crate::session::TeardownReport;

/// Key the OpenAI assistants driver registers under.
pub const OPENAI_DRIVER: &str = "openai";

/// Builds drivers of one type.
pub trait DriverFactory: Send + Sync {
    fn create(&self, host: HostContext, agent: &str, config: DriverConfig) -> Result<Driver>;
}

/// Factory for drivers backed by the OpenAI Assistants API.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiDriverFactory;

impl DriverFactory for OpenAiDriverFactory {
    fn create(&self, host: HostContext, agent: &str, config: DriverConfig) -> Result<Driver> {
        let api = Arc::new(OpenAiAssistantsClient::from_config(&config)?);
        Ok(Driver::spawn(host, agent, config, api))
    }
}

/// Register the built-in driver types.
pub fn register_defaults(registry: &DriverRegistry) {
    registry.register(OPENAI_DRIVER, Arc::new(OpenAiDriverFactory));
}

/// Driver types by key, plus every driver created through the registry.
#[derive(Default)]
pub struct DriverRegistry {
    factories: Mutex<HashMap<String, Arc<dyn DriverFactory>>>,
    drivers: Mutex<HashMap<String, Driver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in driver types already registered.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        register_defaults(&registry);
        registry
    }

    pub fn register(&self, kind: impl Into<String>, factory: Arc<dyn DriverFactory>) {
        let kind = kind.into();
        if lock(&self.factories).insert(kind.clone(), factory).is_some() {
            warn!(kind = %kind, "replacing registered driver factory");
        }
    }

    /// Registered driver-type keys, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = lock(&self.factories).keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Create and track a driver for `agent`.
    ///
    /// `overrides` is the host's per-agent options object; it is merged over
    /// the defaults before the factory sees it.
    pub fn create_driver(
        &self,
        kind: &str,
        host: HostContext,
        agent: &str,
        overrides: &serde_json::Value,
    ) -> Result<Driver> {
        let factory = lock(&self.factories)
            .get(kind)
            .cloned()
            .ok_or_else(|| DriverError::Configuration(format!("unknown driver type: {kind}")))?;

        let mut drivers = lock(&self.drivers);
        if drivers.contains_key(agent) {
            return Err(DriverError::InvalidState(format!(
                "a driver for agent {agent} already exists"
            )));
        }

        let config = DriverConfig::merged(overrides)?;
        let driver = factory.create(host, agent, config)?;
        info!(kind, agent, "driver created");
        drivers.insert(agent.to_string(), driver.clone());
        Ok(driver)
    }

    pub fn driver(&self, agent: &str) -> Option<Driver> {
        lock(&self.drivers).get(agent).cloned()
    }

    pub fn drivers(&self) -> Vec<Driver> {
        lock(&self.drivers).values().cloned().collect()
    }

    /// Stop tracking `agent`'s driver and tear it down.
    pub async fn remove_driver(&self, agent: &str) -> Option<TeardownReport> {
        let driver = lock(&self.drivers).remove(agent)?;
        Some(driver.remove().await)
    }

    /// Tear down every tracked driver concurrently. Each driver cancels its
    /// active run before deleting its remote resources.
    pub async fn shutdown_all(&self) -> Vec<(String, TeardownReport)> {
        let drivers: Vec<(String, Driver)> = lock(&self.drivers).drain().collect();
        if drivers.is_empty() {
            return Vec::new();
        }
        info!(count = drivers.len(), "shutting down drivers");

        join_all(drivers.into_iter().map(|(agent, driver)| async move {
            let report = driver.remove().await;
            if !report.is_clean() {
                warn!(agent = %agent, failures = report.errors.len(), "driver teardown incomplete");
            }
            (agent, report)
        }))
        .await
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("kinds", &self.kinds())
            .field("drivers", &lock(&self.drivers).len())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Wait for an interrupt signal, then shut every driver down.
pub async fn run_until_shutdown(registry: &DriverRegistry) -> Result<Vec<(String, TeardownReport)>> {
    tokio::signal::ctrl_c().await?;
    info!("interrupt received");
    Ok(registry.shutdown_all().await)
}
