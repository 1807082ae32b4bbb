//! IPC (Inter-Process Communication) layer for modules
//!
//! Handles communication between the host and module processes using
//! newline-delimited JSON over the child's stdin/stdout.

pub mod channel;
pub mod client;
pub mod protocol;

pub use channel::JsonLines;
pub use client::ModuleIpcClient;
pub use protocol::{HostMessage, HostRequest, ModuleReply, ReplyPayload, BASE_CONTRACT};
