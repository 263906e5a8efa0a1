//! Driver configuration (layered: host overrides > defaults > environment).

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DriverError, Result};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

/// How a run's remote lifecycle is observed.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum LifecycleMode {
    /// Consume server-sent run events as they happen.
    #[default]
    Streaming,
    /// Fetch the run status on a fixed interval.
    Polling {
        #[serde(rename = "intervalMs", default = "default_poll_interval_ms")]
        interval_ms: u64,
    },
}

impl LifecycleMode {
    /// Polling at the default interval.
    pub fn polling() -> Self {
        Self::Polling {
            interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }

    /// Never zero; a zero interval is treated as one millisecond.
    pub fn poll_interval(&self) -> Option<Duration> {
        match self {
            Self::Streaming => None,
            Self::Polling { interval_ms } => Some(Duration::from_millis((*interval_ms).max(1))),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Polling { interval_ms: 0 } => Err(DriverError::Configuration(
                "lifecycle.polling.intervalMs must be greater than zero".into(),
            )),
            _ => Ok(()),
        }
    }
}

/// Options recognised by the driver.
///
/// Field names are camelCase on the wire so host-provided JSON such as
/// `{"apiKey": "...", "keepThread": true}` deserializes directly.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct DriverConfig {
    /// Falls back to `OPENAI_API_KEY` when unset.
    pub api_key: Option<String>,
    pub model: String,
    /// Falls back to `OPENAI_BASE_URL`, then the public endpoint.
    pub base_url: Option<String>,
    /// Skip deleting the remote assistant on teardown.
    pub keep_assistant: bool,
    /// Skip deleting the remote thread on teardown.
    pub keep_thread: bool,
    /// Host skill names exposed to the model as function tools.
    pub skills: Vec<String>,
    /// System instructions for the remote assistant.
    pub instructions: String,
    pub lifecycle: LifecycleMode,
    pub request_timeout_secs: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            base_url: None,
            keep_assistant: false,
            keep_thread: false,
            skills: Vec::new(),
            instructions: String::new(),
            lifecycle: LifecycleMode::Streaming,
            request_timeout_secs: 120,
        }
    }
}

impl fmt::Debug for DriverConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| ".."))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("keep_assistant", &self.keep_assistant)
            .field("keep_thread", &self.keep_thread)
            .field("skills", &self.skills)
            .field("lifecycle", &self.lifecycle)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl DriverConfig {
    /// Layer a host-provided JSON object over the defaults.
    ///
    /// Nested objects are merged key by key; any other value replaces the
    /// default outright. `null` leaves the default in place.
    pub fn merged(overrides: &serde_json::Value) -> Result<Self> {
        let mut base = serde_json::to_value(Self::default())?;
        merge_json(&mut base, overrides);
        let config: Self = serde_json::from_value(base)
            .map_err(|e| DriverError::Configuration(format!("invalid driver options: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document using the same keys as the JSON form.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|e| DriverError::Configuration(format!("invalid TOML config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would only fail once a run is under way.
    pub fn validate(&self) -> Result<()> {
        self.lifecycle.validate()
    }

    /// Resolve the credential, consulting the environment (and `.env`) last.
    pub fn resolve_api_key(&self) -> Result<String> {
        let key = self.api_key.clone().or_else(|| {
            let _ = dotenvy::dotenv(); // load .env if present, ignore error
            std::env::var("OPENAI_API_KEY").ok()
        });
        key.filter(|k| !k.trim().is_empty()).ok_or_else(|| {
            DriverError::Configuration(
                "no API key: set `apiKey` or the OPENAI_API_KEY environment variable".into(),
            )
        })
    }

    pub fn resolve_base_url(&self) -> String {
        self.base_url
            .clone()
            .or_else(|| std::env::var("OPENAI_BASE_URL").ok())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn merge_json(base: &mut serde_json::Value, overrides: &serde_json::Value) {
    match (base, overrides) {
        (serde_json::Value::Object(base), serde_json::Value::Object(overrides)) => {
            for (key, value) in overrides {
                match base.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge_json(existing, value)
                    }
                    _ if value.is_null() => {}
                    _ => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (_, serde_json::Value::Null) => {}
        (base, overrides) => *base = overrides.clone(),
    }
}
