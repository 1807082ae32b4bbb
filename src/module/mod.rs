//! Module system
//!
//! Discovers modules (directories holding a `module.json`), resolves their
//! dependencies and drives them through load → start → stop → unload.
//!
//! ## Architecture
//!
//! - **Descriptor**: typed, validated `module.json`
//! - **Interpreters**: language name (and aliases) → backend
//! - **Registry**: the loaded modules plus the dependency guard for each transition
//! - **Scheduler**: orders a batch of modules for one phase, bounded even for cycles
//! - **Process backend**: each module runs as an isolated child process speaking
//!   JSON lines; exports are shared through one table

pub mod descriptor;
pub mod discovery;
pub mod guest;
pub mod interpreter;
pub mod ipc;
pub mod manager;
pub mod module_config;
pub mod process;
pub mod registry;
pub mod scheduler;
pub mod symbols;
pub mod traits;

pub use descriptor::ModuleDescriptor;
pub use discovery::ModuleDiscovery;
pub use interpreter::InterpreterRegistry;
pub use manager::{LifecycleReport, ModuleManager};
pub use process::{ProcessBackend, PROCESS_ALIASES, PROCESS_LANGUAGE};
pub use registry::ModuleRegistry;
pub use scheduler::{BatchFailure, BatchReport, DependencyOrderedLoader, PassCounter, Phase, Readiness};
pub use symbols::{SymbolOwner, SymbolTable};
pub use traits::{
    DependencyKind, DependencyWarning, DescriptorFault, Module, ModuleBackend, ModuleContext,
    ModuleError, RequiredState, TransitionReport,
};
