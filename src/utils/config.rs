// src/utils/config.rs
//! Host configuration
//!
//! Loaded in layers with the `config` crate:
//!
//! 1. Built-in defaults ([`HostConfig::default`])
//! 2. Optional file (`polyhost.toml` / `.yaml` / `.json`, or the path in `POLYHOST_CONFIG`)
//! 3. Environment overrides with the `POLYHOST__` prefix, `__` as separator
//!    (e.g. `POLYHOST__MEMORY__MAX_SHARED_MEMORY=4096`)

use crate::utils::errors::{HostError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

/// Pool size used when a runtime config leaves `max_concurrency` at zero
pub const DEFAULT_POOL_SIZE: usize = 4;

/// Top-level host configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Application metadata
    pub app: AppConfig,

    /// Runtime name -> runtime settings, iterated in name order
    pub languages: BTreeMap<String, RuntimeConfig>,

    /// Shared memory coordinator settings
    pub memory: MemoryConfig,
}

/// Application metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    pub license: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "polyglot-app".to_string(),
            version: "0.1.0".to_string(),
            description: String::new(),
            author: String::new(),
            license: "MIT".to_string(),
        }
    }
}

/// Per-adapter settings, read-only once handed to `Runtime::initialize`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Runtime identifier (python, javascript, ...)
    pub name: String,

    /// Version constraint (e.g. "3.11", ">=1.70")
    pub version: String,

    /// Whether `Orchestrator::initialize` should bring this runtime up
    pub enabled: bool,

    /// Adapter-specific options
    pub options: HashMap<String, serde_json::Value>,

    /// Worker pool size (0 = adapter default)
    pub max_concurrency: usize,

    /// Initialization timeout in seconds (0 = no timeout)
    pub timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            version: String::new(),
            enabled: false,
            options: HashMap::new(),
            max_concurrency: 10,
            timeout_secs: 30,
        }
    }
}

impl RuntimeConfig {
    /// Enabled config for `name` with default limits
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            enabled: true,
            ..Default::default()
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Effective pool size
    pub fn pool_size(&self) -> usize {
        if self.max_concurrency == 0 {
            DEFAULT_POOL_SIZE
        } else {
            self.max_concurrency
        }
    }

    /// Initialization timeout, `None` when unbounded
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(|v| v.as_str())
    }

    pub fn option_u64(&self, key: &str) -> Option<u64> {
        self.options.get(key).and_then(|v| v.as_u64())
    }
}

/// How region reader/writer declarations exclude each other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessPolicy {
    /// Writers exclude writers only; readers are never checked against writers
    Cooperative,

    /// Writers exclude readers and writers; readers exclude writers
    #[default]
    Exclusive,
}

/// Memory coordinator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Global budget for all shared regions, in bytes
    pub max_shared_memory: u64,

    /// Reader/writer exclusion rule
    pub access_policy: AccessPolicy,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_shared_memory: 1024 * 1024 * 1024, // 1GB
            access_policy: AccessPolicy::default(),
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            app: AppConfig::default(),
            languages: BTreeMap::new(),
            memory: MemoryConfig::default(),
        }
    }
}

impl HostConfig {
    /// Load from the default locations plus environment overrides
    pub fn load() -> Result<Self> {
        let path = std::env::var("POLYHOST_CONFIG").unwrap_or_else(|_| "polyhost".to_string());
        Self::load_from(path)
    }

    /// Load from `path` (extension optional) plus environment overrides
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_string_lossy().into_owned();

        let settings = config::Config::builder()
            .add_source(config::File::with_name(&path).required(false))
            .add_source(
                config::Environment::with_prefix("POLYHOST")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .map_err(|e| HostError::ConfigInvalid(format!("failed to read {}: {}", path, e)))?;

        let mut loaded: HostConfig = settings
            .try_deserialize()
            .map_err(|e| HostError::ConfigInvalid(e.to_string()))?;

        // Map keys are authoritative for runtime names
        for (name, runtime) in loaded.languages.iter_mut() {
            if runtime.name.is_empty() {
                runtime.name = name.clone();
            }
        }

        loaded.validate()?;
        Ok(loaded)
    }

    /// Check invariants the orchestrator relies on
    pub fn validate(&self) -> Result<()> {
        if self.app.name.is_empty() {
            return Err(HostError::ConfigInvalid("app name is required".into()));
        }

        if self.memory.max_shared_memory == 0 {
            return Err(HostError::ConfigInvalid(
                "max shared memory must be positive".into(),
            ));
        }

        for (name, runtime) in &self.languages {
            if !runtime.name.is_empty() && runtime.name != *name {
                return Err(HostError::ConfigInvalid(format!(
                    "runtime entry {} declares mismatched name {}",
                    name, runtime.name
                )));
            }
        }

        Ok(())
    }

    /// Enable a runtime with default limits, replacing any existing entry
    pub fn enable_runtime(&mut self, name: &str, version: &str) {
        self.languages
            .insert(name.to_string(), RuntimeConfig::new(name, version));
    }

    /// Disable a runtime if present
    pub fn disable_runtime(&mut self, name: &str) {
        if let Some(runtime) = self.languages.get_mut(name) {
            runtime.enabled = false;
        }
    }

    pub fn is_runtime_enabled(&self, name: &str) -> bool {
        self.languages.get(name).map(|r| r.enabled).unwrap_or(false)
    }

    /// Enabled runtime entries in name order
    pub fn enabled_runtimes(&self) -> impl Iterator<Item = (&String, &RuntimeConfig)> {
        self.languages.iter().filter(|(_, cfg)| cfg.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = HostConfig::default();
        assert_eq!(config.app.name, "polyglot-app");
        assert!(config.memory.max_shared_memory > 0);
        assert_eq!(config.memory.access_policy, AccessPolicy::Exclusive);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut config = HostConfig::default();
        config.memory.max_shared_memory = 0;
        assert!(matches!(config.validate(), Err(HostError::ConfigInvalid(_))));

        let mut config = HostConfig::default();
        config.app.name.clear();
        assert!(matches!(config.validate(), Err(HostError::ConfigInvalid(_))));
    }

    #[test]
    fn test_enable_disable_runtime() {
        let mut config = HostConfig::default();

        config.enable_runtime("python", "3.11");
        assert!(config.is_runtime_enabled("python"));
        assert_eq!(config.languages["python"].version, "3.11");
        assert_eq!(config.languages["python"].max_concurrency, 10);

        config.disable_runtime("python");
        assert!(!config.is_runtime_enabled("python"));
        assert!(!config.is_runtime_enabled("ruby"));
    }

    #[test]
    fn test_runtime_config_defaults() {
        let runtime = RuntimeConfig::new("lua", "5.4").with_max_concurrency(0);
        assert_eq!(runtime.pool_size(), DEFAULT_POOL_SIZE);
        assert_eq!(runtime.timeout(), Some(Duration::from_secs(30)));

        let runtime = RuntimeConfig {
            timeout_secs: 0,
            ..runtime
        };
        assert_eq!(runtime.timeout(), None);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[app]
name = "demo"

[memory]
max_shared_memory = 2048
access_policy = "cooperative"

[languages.python]
enabled = true
max_concurrency = 2
options = {{ exec_timeout_secs = 5 }}

[languages.ruby]
enabled = false
"#
        )
        .unwrap();

        let config = HostConfig::load_from(file.path()).unwrap();
        assert_eq!(config.app.name, "demo");
        assert_eq!(config.memory.max_shared_memory, 2048);
        assert_eq!(config.memory.access_policy, AccessPolicy::Cooperative);

        let python = &config.languages["python"];
        assert_eq!(python.name, "python");
        assert_eq!(python.pool_size(), 2);
        assert_eq!(python.option_u64("exec_timeout_secs"), Some(5));

        let enabled: Vec<_> = config.enabled_runtimes().map(|(n, _)| n.as_str()).collect();
        assert_eq!(enabled, vec!["python"]);
    }

    #[test]
    fn test_load_rejects_zero_memory() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[memory]\nmax_shared_memory = 0").unwrap();

        let result = HostConfig::load_from(file.path());
        assert!(matches!(result, Err(HostError::ConfigInvalid(_))));
    }
}
