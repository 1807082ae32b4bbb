//! Module-side runtime
//!
//! A module binary registers its entry points and hands control to
//! [`GuestRuntime::run`], which answers the host's requests on stdin/stdout
//! until the host sends `shutdown` or closes the pipe.
//!
//! ```no_run
//! use async_trait::async_trait;
//! use module_host::module::guest::{GuestRuntime, ModuleEntry};
//! use module_host::module::ModuleContext;
//!
//! struct Core;
//!
//! #[async_trait]
//! impl ModuleEntry for Core {
//!     async fn start(&mut self) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     GuestRuntime::new()
//!         .entry("pkg.Core", |_ctx: ModuleContext| Ok(Box::new(Core) as Box<dyn ModuleEntry>))
//!         .run()
//!         .await
//! }
//! ```

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::module::ipc::channel::JsonLines;
use crate::module::ipc::protocol::{HostMessage, HostRequest, ModuleReply, ReplyPayload, BASE_CONTRACT};
use crate::module::traits::ModuleContext;

/// A module's entry point, instantiated on `start`
#[async_trait]
pub trait ModuleEntry: Send {
    /// Start hook
    async fn start(&mut self) -> anyhow::Result<()>;

    /// Stop hook
    async fn stop(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

type EntryFactory = Box<dyn Fn(ModuleContext) -> anyhow::Result<Box<dyn ModuleEntry>> + Send + Sync>;

/// Serves the module protocol for a set of entry points
#[derive(Default)]
pub struct GuestRuntime {
    entries: HashMap<String, EntryFactory>,
    exports: Vec<String>,
    resolved: Option<String>,
    instance: Option<Box<dyn ModuleEntry>>,
}

impl GuestRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entry point; `factory` receives the constructor parameters
    pub fn entry<F>(mut self, name: &str, factory: F) -> Self
    where
        F: Fn(ModuleContext) -> anyhow::Result<Box<dyn ModuleEntry>> + Send + Sync + 'static,
    {
        self.entries.insert(name.to_string(), Box::new(factory));
        self
    }

    /// Offer `symbol` to other modules through the host's export table
    pub fn export(mut self, symbol: &str) -> Self {
        self.exports.push(symbol.to_string());
        self
    }

    /// Serve the protocol on stdin/stdout
    pub async fn run(self) -> anyhow::Result<()> {
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve the protocol over any reader/writer pair
    pub async fn serve<R, W>(mut self, reader: R, writer: W) -> anyhow::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut channel = JsonLines::new(reader, writer);

        while let Some(message) = channel.recv::<HostMessage>().await? {
            debug!("Received {} request ({})", message.request.kind(), message.id);
            let shutdown = matches!(message.request, HostRequest::Shutdown);
            let payload = self.handle(message.request).await;
            channel
                .send(&ModuleReply {
                    id: message.id,
                    payload,
                })
                .await?;
            if shutdown {
                return Ok(());
            }
        }

        // Host went away without a shutdown request
        self.stop_instance().await;
        Ok(())
    }

    async fn handle(&mut self, request: HostRequest) -> ReplyPayload {
        match request {
            HostRequest::Resolve { entry } => {
                if !self.entries.contains_key(&entry) {
                    return error(format!("unknown entry point {}", entry));
                }
                self.resolved = Some(entry);
                ReplyPayload::Resolved {
                    contract: BASE_CONTRACT.to_string(),
                    exports: self.exports.clone(),
                }
            }
            HostRequest::Start(context) => {
                if self.instance.is_some() {
                    return error("entry point already started");
                }
                let Some(factory) = self.resolved.as_ref().and_then(|e| self.entries.get(e)) else {
                    return error("no entry point resolved");
                };
                let module_name = context.module_name.clone();
                let mut instance = match factory(context) {
                    Ok(instance) => instance,
                    Err(e) => return error(format!("failed to instantiate entry point: {}", e)),
                };
                if let Err(e) = instance.start().await {
                    return error(format!("start hook failed: {}", e));
                }
                info!("Module {} started", module_name);
                self.instance = Some(instance);
                ReplyPayload::Ok
            }
            HostRequest::Stop => {
                let Some(mut instance) = self.instance.take() else {
                    return error("entry point not started");
                };
                match instance.stop().await {
                    Ok(()) => ReplyPayload::Ok,
                    Err(e) => {
                        // Still running as far as the host is concerned
                        self.instance = Some(instance);
                        error(format!("stop hook failed: {}", e))
                    }
                }
            }
            HostRequest::Shutdown => {
                self.stop_instance().await;
                ReplyPayload::Ok
            }
        }
    }

    async fn stop_instance(&mut self) {
        if let Some(mut instance) = self.instance.take() {
            if let Err(e) = instance.stop().await {
                warn!("Stop hook failed during shutdown: {}", e);
            }
        }
    }
}

fn error(message: impl Into<String>) -> ReplyPayload {
    ReplyPayload::Error {
        message: message.into(),
    }
}
