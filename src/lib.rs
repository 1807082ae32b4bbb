//! Module Host - embeddable module runtime
//!
//! Discovers self-describing modules, resolves their declared dependencies
//! and drives them through a load → start → stop → unload lifecycle. Actual
//! code execution is delegated to a backend selected by the module's declared
//! language; the built-in backend runs every module as an isolated child
//! process.
//!
//! ## Design Principles
//!
//! 1. **Dependency-aware transitions**: a module never starts before its hard
//!    dependencies or stops/unloads while a hard dependent needs it
//! 2. **Bounded batch scheduling**: cyclic or unsatisfiable batches terminate
//!    and report what could not be processed
//! 3. **Isolation**: unloading a module reaps its process, so its artifact can
//!    be replaced while the host keeps running

pub mod config;
pub mod module;
pub mod utils;

pub use config::HostConfig;
pub use module::{ModuleError, ModuleManager};
