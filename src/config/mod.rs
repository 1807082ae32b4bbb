//! Host configuration
//!
//! Loaded from a TOML file; every section and field has a default so an
//! empty file (or no file at all) is a valid configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::module::scheduler::DEFAULT_MAX_PASSES;

/// Module system configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Enable module system
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory scanned for module subdirectories
    #[serde(default = "default_modules_dir")]
    pub modules_dir: String,

    /// List of enabled modules (empty = auto-discover all)
    #[serde(default)]
    pub enabled_modules: Vec<String>,

    /// Module-specific configuration overrides
    #[serde(default)]
    pub module_configs: HashMap<String, HashMap<String, String>>,
}

fn default_true() -> bool {
    true
}

fn default_modules_dir() -> String {
    "modules".to_string()
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            modules_dir: default_modules_dir(),
            enabled_modules: Vec::new(),
            module_configs: HashMap::new(),
        }
    }
}

impl ModuleConfig {
    /// Whether a discovered module should be loaded
    pub fn is_enabled(&self, module_name: &str) -> bool {
        self.enabled_modules.is_empty() || self.enabled_modules.iter().any(|m| m == module_name)
    }
}

/// Batch scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Consecutive passes without progress before a batch gives up
    #[serde(default = "default_max_passes")]
    pub max_passes: u32,
}

fn default_max_passes() -> u32 {
    DEFAULT_MAX_PASSES
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_passes: DEFAULT_MAX_PASSES,
        }
    }
}

/// Process backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessBackendConfig {
    /// Timeout for a single request to a module process (milliseconds)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Time a module process gets to exit after `shutdown` (milliseconds)
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// Artifact used when a module does not name one in `additional.location`
    #[serde(default = "default_location")]
    pub default_location: String,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_shutdown_grace_ms() -> u64 {
    5_000
}

fn default_location() -> String {
    "module.bin".to_string()
}

impl Default for ProcessBackendConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            default_location: default_location(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log filter (e.g. "info", "module_host=debug"); RUST_LOG takes precedence
    #[serde(default)]
    pub filter: Option<String>,

    /// Emit JSON lines (requires the `json-logging` feature)
    #[serde(default)]
    pub json_format: bool,
}

/// Host configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub modules: ModuleConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub process: ProcessBackendConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl HostConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {:?}: {}", path, e))?;
        Self::from_toml_str(&contents)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let config: HostConfig = toml::from_str(contents)
            .map_err(|e| anyhow::anyhow!("Failed to parse config TOML: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.modules.modules_dir.trim().is_empty() {
            return Err(anyhow::anyhow!("modules.modules_dir must not be empty"));
        }

        if self.scheduler.max_passes == 0 {
            return Err(anyhow::anyhow!(
                "scheduler.max_passes must be at least 1"
            ));
        }

        if self.process.request_timeout_ms == 0 {
            return Err(anyhow::anyhow!(
                "process.request_timeout_ms must be greater than 0"
            ));
        }
        if self.process.shutdown_grace_ms == 0 {
            return Err(anyhow::anyhow!(
                "process.shutdown_grace_ms must be greater than 0"
            ));
        }
        if self.process.default_location.trim().is_empty() {
            return Err(anyhow::anyhow!("process.default_location must not be empty"));
        }

        Ok(())
    }
}
