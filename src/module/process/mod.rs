//! Process management for modules
//!
//! Handles spawning module processes and the backend that drives their
//! lifecycle.

pub mod backend;
pub mod spawner;

pub use backend::{ProcessBackend, PROCESS_ALIASES, PROCESS_LANGUAGE};
pub use spawner::{ModuleProcess, ModuleProcessSpawner};
