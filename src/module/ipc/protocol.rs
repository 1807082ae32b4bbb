//! IPC message protocol
//!
//! Messages exchanged between the host and a module process. Each message is
//! one JSON object on one line:
//!
//! ```text
//! host   -> module  {"id":1,"type":"resolve","entry":"pkg.Core"}
//! module -> host    {"id":1,"type":"resolved","contract":"module-host/1","exports":["pkg.Api"]}
//! host   -> module  {"id":2,"type":"start","module_name":"core","version":"1.0","data_dir":"...","config":{}}
//! module -> host    {"id":2,"type":"ok"}
//! ```

use serde::{Deserialize, Serialize};

use crate::module::traits::ModuleContext;

/// Correlation ID for matching requests with responses
pub type CorrelationId = u64;

/// Contract every entry point must implement (start/stop hooks over this protocol)
pub const BASE_CONTRACT: &str = "module-host/1";

/// Request from host to module, with its correlation id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostMessage {
    pub id: CorrelationId,
    #[serde(flatten)]
    pub request: HostRequest,
}

/// Request payload types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostRequest {
    /// Resolve the entry point and report the contract it implements
    Resolve { entry: String },
    /// Instantiate the entry point with these constructor parameters and run its start hook
    Start(ModuleContext),
    /// Run the stop hook and drop the instance
    Stop,
    /// Release everything and exit
    Shutdown,
}

impl HostRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            HostRequest::Resolve { .. } => "resolve",
            HostRequest::Start(_) => "start",
            HostRequest::Stop => "stop",
            HostRequest::Shutdown => "shutdown",
        }
    }
}

/// Reply from module to host, echoing the request id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleReply {
    pub id: CorrelationId,
    #[serde(flatten)]
    pub payload: ReplyPayload,
}

/// Reply payload types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplyPayload {
    /// Entry point resolved
    Resolved {
        contract: String,
        /// Symbols this module offers to others
        #[serde(default)]
        exports: Vec<String>,
    },
    /// Request handled
    Ok,
    /// Request failed inside the module
    Error { message: String },
}
