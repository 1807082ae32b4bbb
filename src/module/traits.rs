//! Module system traits and interfaces
//!
//! Defines the backend contract the registry delegates to, the in-memory
//! module record, and the error taxonomy shared by the whole module system.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::module::descriptor::ModuleDescriptor;

/// A module known to the host: its manifest, its directory and whether it runs.
///
/// Created by [`ModuleRegistry::create_module`](crate::module::registry::ModuleRegistry::create_module)
/// and owned by the registry once loaded. Only the registry flips `running`.
#[derive(Debug, Clone)]
pub struct Module {
    descriptor: Arc<ModuleDescriptor>,
    data_dir: PathBuf,
    running: bool,
    config: HashMap<String, String>,
}

impl Module {
    /// Create a module record from a parsed descriptor and its directory
    pub fn new(descriptor: ModuleDescriptor, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            data_dir: data_dir.into(),
            running: false,
            config: HashMap::new(),
        }
    }

    /// Attach key/value configuration handed to the backend on start
    pub fn with_config(mut self, config: HashMap<String, String>) -> Self {
        self.config = config;
        self
    }

    /// Module name (unique registry key)
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Parsed manifest
    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    /// Module directory (where `module.json` lives)
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Whether the module has been started and not stopped since
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Module configuration (flattened key/value pairs)
    pub fn config(&self) -> &HashMap<String, String> {
        &self.config
    }

    pub(crate) fn set_running(&mut self, running: bool) {
        self.running = running;
    }
}

/// Context handed to a module entry point when it is instantiated
///
/// These are the entry point's constructor parameters; they cross the
/// process boundary inside the `start` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleContext {
    /// Module name
    pub module_name: String,
    /// Module version
    pub version: String,
    /// Module data directory (where module can store its state)
    pub data_dir: PathBuf,
    /// Module configuration (key-value pairs from config file)
    #[serde(default)]
    pub config: HashMap<String, String>,
}

impl ModuleContext {
    /// Build the context for a module record
    pub fn for_module(module: &Module) -> Self {
        Self {
            module_name: module.name().to_string(),
            version: module.descriptor().version.clone(),
            data_dir: module.data_dir().to_path_buf(),
            config: module.config().clone(),
        }
    }

    /// Get a configuration value
    pub fn get_config(&self, key: &str) -> Option<&String> {
        self.config.get(key)
    }

    /// Get a configuration value with default
    pub fn get_config_or(&self, key: &str, default: &str) -> String {
        self.config
            .get(key)
            .map(|s| s.as_str())
            .unwrap_or(default)
            .to_string()
    }
}

/// Language backend ("interpreter") that executes module code
///
/// The registry guarantees ordering: `start_module` is only called after a
/// successful `load_module`, `stop_module` only on a running module, and
/// `unload_module` only on a loaded, stopped module. Backends keep their own
/// per-module state keyed by module name, hence `&self`.
#[async_trait]
pub trait ModuleBackend: Send + Sync {
    /// Check backend-specific manifest keys and bring the module's code in
    async fn load_module(&self, module: &Module) -> Result<(), ModuleError>;

    /// Instantiate the module's entry point and run its start hook
    async fn start_module(&self, module: &Module) -> Result<(), ModuleError>;

    /// Run the stop hook and drop the live instance
    async fn stop_module(&self, module: &Module) -> Result<(), ModuleError>;

    /// Release everything `load_module` acquired
    async fn unload_module(&self, module: &Module) -> Result<(), ModuleError>;
}

/// Whether a dependency relationship is hard or advisory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DependencyKind {
    /// Transition fails if unmet
    Hard,
    /// Transition proceeds with a warning
    Soft,
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyKind::Hard => f.write_str("dependency"),
            DependencyKind::Soft => f.write_str("soft-dependency"),
        }
    }
}

/// State a dependency (or dependent) is required to be in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequiredState {
    Loaded,
    Started,
    Stopped,
    Unloaded,
}

impl fmt::Display for RequiredState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequiredState::Loaded => "loaded",
            RequiredState::Started => "started",
            RequiredState::Stopped => "stopped",
            RequiredState::Unloaded => "unloaded",
        };
        f.write_str(s)
    }
}

/// Why a manifest field was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorFault {
    /// Field is required but absent
    Required,
    /// Field is present with the wrong JSON type
    WrongType { expected: &'static str },
    /// Field has the right type but content fails validation
    WrongContent { expected: &'static str },
    /// The document itself is not valid JSON (or not an object)
    Malformed(String),
}

impl fmt::Display for DescriptorFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptorFault::Required => f.write_str("is required"),
            DescriptorFault::WrongType { expected } => write!(f, "needs to be of type {}", expected),
            DescriptorFault::WrongContent { expected } => write!(f, "needs to be {}", expected),
            DescriptorFault::Malformed(reason) => write!(f, "is malformed: {}", reason),
        }
    }
}

/// A soft-dependency condition that did not block a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyWarning {
    /// Module undergoing the transition
    pub module: String,
    /// The soft dependency (or soft dependent) that is not in the wanted state
    pub dependency: String,
    /// State the dependency should have been in
    pub required: RequiredState,
}

impl fmt::Display for DependencyWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "The soft-dependency {} (used by {}) isn't {}",
            self.dependency, self.module, self.required
        )
    }
}

/// Outcome of a successful single-module transition
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionReport {
    /// Soft-dependency conditions that were not met
    pub warnings: Vec<DependencyWarning>,
}

impl TransitionReport {
    /// Whether the transition completed without any soft warnings
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Module system errors
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("{0:?} is not a directory")]
    NotADirectory(PathBuf),

    #[error("The module.json of {0:?} wasn't found")]
    DescriptorNotFound(PathBuf),

    #[error("The module.json of {module} isn't correct: {field} {fault}")]
    InvalidDescriptor {
        module: String,
        field: String,
        fault: DescriptorFault,
    },

    #[error("The {kind} {dependency} (used by {module}) isn't {required}")]
    DependencyUnmet {
        module: String,
        dependency: String,
        kind: DependencyKind,
        required: RequiredState,
    },

    #[error("No interpreter registered for language {language} (module {module})")]
    NoInterpreterRegistered { module: String, language: String },

    #[error("Interpreter failed for module {module}: {reason}")]
    InterpreterFailure { module: String, reason: String },

    #[error("An interpreter for {0} is already registered")]
    AlreadyRegistered(String),

    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    #[error("Module {0} is already loaded")]
    AlreadyLoaded(String),

    #[error("Module {0} is already running")]
    AlreadyRunning(String),

    #[error("Module {0} is not running")]
    NotRunning(String),

    #[error("Module {0} is still running")]
    ModuleRunning(String),

    #[error("Symbol {symbol} requested by {module} is already exported by {owner}")]
    SymbolConflict {
        symbol: String,
        module: String,
        owner: String,
    },

    #[error("IPC communication error: {0}")]
    IpcError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Timeout waiting for module response")]
    Timeout,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ModuleError {
    /// Wrap a backend error for `module` as an interpreter failure
    ///
    /// Interpreter failures and symbol conflicts pass through unchanged.
    pub fn interpreter_failure(module: &str, error: ModuleError) -> Self {
        match error {
            e @ (ModuleError::InterpreterFailure { .. } | ModuleError::SymbolConflict { .. }) => e,
            other => ModuleError::InterpreterFailure {
                module: module.to_string(),
                reason: other.to_string(),
            },
        }
    }

    /// Convenience constructor for a failure with a plain message
    pub fn backend(module: &str, reason: impl Into<String>) -> Self {
        ModuleError::InterpreterFailure {
            module: module.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether this error is a hard dependency violation for `required`
    pub fn is_dependency_unmet(&self, required: RequiredState) -> bool {
        matches!(
            self,
            ModuleError::DependencyUnmet { kind: DependencyKind::Hard, required: r, .. } if *r == required
        )
    }
}

impl From<serde_json::Error> for ModuleError {
    fn from(e: serde_json::Error) -> Self {
        ModuleError::SerializationError(e.to_string())
    }
}

impl From<anyhow::Error> for ModuleError {
    fn from(e: anyhow::Error) -> Self {
        ModuleError::IpcError(e.to_string())
    }
}
