//! Process-isolated module backend
//!
//! Runs each module's artifact as a child process. Loading opens the
//! namespace (spawns the process and resolves the entry point), starting and
//! stopping drive the entry point's hooks, and unloading shuts the process
//! down and reaps it so the artifact on disk can be replaced.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::{debug, info, warn};

use crate::config::ProcessBackendConfig;
use crate::module::ipc::protocol::{HostRequest, ReplyPayload, BASE_CONTRACT};
use crate::module::process::spawner::{ModuleProcess, ModuleProcessSpawner};
use crate::module::symbols::{SymbolOwner, SymbolTable};
use crate::module::traits::{Module, ModuleBackend, ModuleContext, ModuleError};

/// Language name the backend registers under
pub const PROCESS_LANGUAGE: &str = "process";
/// Aliases for [`PROCESS_LANGUAGE`]
pub const PROCESS_ALIASES: [&str; 2] = ["native", "exec"];

/// `additional` key naming the entry point
pub const MAIN_KEY: &str = "main";
/// `additional` key naming the artifact, relative to the module directory
pub const LOCATION_KEY: &str = "location";

/// A loaded module: its process plus the live instance, if started
struct Namespace {
    process: ModuleProcess,
    entry: String,
    instance: Option<String>,
    /// Set once the module's state can no longer be known (a hook timed out
    /// and could not be rolled back); only unload is meaningful afterwards
    poisoned: bool,
}

/// Backend running modules as isolated child processes
pub struct ProcessBackend {
    spawner: ModuleProcessSpawner,
    default_location: String,
    shutdown_grace: Duration,
    namespaces: Mutex<HashMap<String, Namespace>>,
    symbols: Arc<SymbolTable>,
}

impl ProcessBackend {
    pub fn new(config: &ProcessBackendConfig) -> Self {
        Self::with_symbols(config, Arc::new(SymbolTable::new()))
    }

    /// Create a backend sharing an existing export table
    pub fn with_symbols(config: &ProcessBackendConfig, symbols: Arc<SymbolTable>) -> Self {
        Self {
            spawner: ModuleProcessSpawner::new(Duration::from_millis(config.request_timeout_ms)),
            default_location: config.default_location.clone(),
            shutdown_grace: Duration::from_millis(config.shutdown_grace_ms),
            namespaces: Mutex::new(HashMap::new()),
            symbols,
        }
    }

    /// Shared export table
    pub fn symbols(&self) -> Arc<SymbolTable> {
        Arc::clone(&self.symbols)
    }

    /// Who exports `symbol`, if anyone
    pub fn resolve_symbol(&self, symbol: &str) -> Option<SymbolOwner> {
        self.symbols.resolve(symbol)
    }

    /// Symbols exported by `module`
    pub fn exports_of(&self, module: &str) -> Vec<String> {
        self.symbols.exports_of(module)
    }

    /// Whether `module` has an open namespace
    pub async fn is_loaded(&self, module: &str) -> bool {
        self.namespaces.lock().await.contains_key(module)
    }

    /// Whether `module` has a live instance
    pub async fn is_running(&self, module: &str) -> bool {
        self.namespaces
            .lock()
            .await
            .get(module)
            .is_some_and(|ns| ns.instance.is_some())
    }

    /// Process id of `module`'s namespace
    pub async fn process_id(&self, module: &str) -> Option<u32> {
        self.namespaces.lock().await.get(module).and_then(|ns| ns.process.id())
    }

    /// Shut down every namespace still open
    pub async fn shutdown_all(&self) {
        let drained: Vec<(String, Namespace)> = self.namespaces.lock().await.drain().collect();
        for (name, mut ns) in drained {
            warn!("Module {} still loaded at shutdown, releasing it", name);
            self.release(&mut ns).await;
        }
    }

    /// Resolve the entry point in a fresh process and claim its exports
    async fn open_namespace(
        &self,
        module: &Module,
        process: &mut ModuleProcess,
        entry: &str,
    ) -> Result<(), ModuleError> {
        let name = module.name();
        let reply = process
            .request(HostRequest::Resolve {
                entry: entry.to_string(),
            })
            .await?;

        let exports = match reply {
            ReplyPayload::Resolved { contract, exports } if contract == BASE_CONTRACT => exports,
            ReplyPayload::Resolved { contract, .. } => {
                return Err(ModuleError::backend(
                    name,
                    format!(
                        "entry point {} implements {}, expected {}",
                        entry, contract, BASE_CONTRACT
                    ),
                ))
            }
            ReplyPayload::Error { message } => {
                return Err(ModuleError::backend(
                    name,
                    format!("entry point {} could not be resolved: {}", entry, message),
                ))
            }
            ReplyPayload::Ok => {
                return Err(ModuleError::IpcError(format!(
                    "Unexpected reply to resolve from module {}",
                    name
                )))
            }
        };

        let owner = SymbolOwner {
            module: name.to_string(),
            namespace: process.namespace.clone(),
        };
        self.symbols.claim(&owner, &exports)
    }

    /// Undo a start whose reply did not arrive in time
    ///
    /// The module handles requests in order, so `stop` is answered once the
    /// late start finished. An `error` reply means it never got an instance.
    async fn roll_back_start(&self, ns: &mut Namespace) {
        let name = ns.process.module_name.clone();
        let reply = ns.process.request_within(HostRequest::Stop, self.shutdown_grace).await;
        match reply {
            Ok(ReplyPayload::Ok) => info!("Rolled back timed-out start of module {}", name),
            Ok(ReplyPayload::Error { message }) => {
                debug!("Module {} was not started, nothing to roll back: {}", name, message)
            }
            Ok(other) => {
                warn!("Unexpected rollback reply from module {}: {:?}", name, other);
                ns.poisoned = true;
            }
            Err(e) => {
                warn!("Failed to roll back start of module {}: {}", name, e);
                ns.poisoned = true;
            }
        }
    }

    async fn release(&self, ns: &mut Namespace) {
        if let Err(e) = ns.process.shutdown(self.shutdown_grace).await {
            warn!("Failed to shut down module {}: {}", ns.process.module_name, e);
        }
        let purged = self.symbols.release_namespace(&ns.process.namespace);
        debug!(
            "Released namespace {} of module {} ({} symbol(s))",
            ns.process.namespace, ns.process.module_name, purged
        );
    }
}

#[async_trait]
impl ModuleBackend for ProcessBackend {
    async fn load_module(&self, module: &Module) -> Result<(), ModuleError> {
        let name = module.name();
        let descriptor = module.descriptor();

        let entry = descriptor
            .additional_str(MAIN_KEY)
            .ok_or_else(|| ModuleError::backend(name, "additional.main is required"))?
            .to_string();
        let location = descriptor
            .additional_str(LOCATION_KEY)
            .unwrap_or(self.default_location.as_str());
        let artifact = module.data_dir().join(location);
        if !artifact.is_file() {
            return Err(ModuleError::backend(
                name,
                format!("artifact {:?} does not exist", artifact),
            ));
        }

        let mut namespaces = self.namespaces.lock().await;
        if namespaces.contains_key(name) {
            return Err(ModuleError::AlreadyLoaded(name.to_string()));
        }

        let mut process = self.spawner.spawn(name, &artifact, module.data_dir()).await?;
        if let Err(e) = self.open_namespace(module, &mut process, &entry).await {
            let mut ns = Namespace {
                process,
                entry,
                instance: None,
                poisoned: false,
            };
            self.release(&mut ns).await;
            return Err(e);
        }

        info!("Module {} resolved entry point {}", name, entry);
        namespaces.insert(
            name.to_string(),
            Namespace {
                process,
                entry,
                instance: None,
                poisoned: false,
            },
        );
        Ok(())
    }

    async fn start_module(&self, module: &Module) -> Result<(), ModuleError> {
        let name = module.name();
        let mut namespaces = self.namespaces.lock().await;
        let ns = namespaces
            .get_mut(name)
            .ok_or_else(|| ModuleError::backend(name, "module is not loaded"))?;
        if ns.poisoned {
            return Err(ModuleError::backend(
                name,
                "module process is in an unknown state, unload or reload it",
            ));
        }
        if ns.instance.is_some() {
            return Err(ModuleError::AlreadyRunning(name.to_string()));
        }

        let started = ns
            .process
            .request_ok(HostRequest::Start(ModuleContext::for_module(module)))
            .await;
        match started {
            Ok(()) => {}
            Err(ModuleError::Timeout) => {
                warn!("Start of module {} timed out, rolling back", name);
                self.roll_back_start(ns).await;
                return Err(ModuleError::Timeout);
            }
            Err(e) => return Err(e),
        }

        let instance = uuid::Uuid::new_v4().to_string();
        debug!("Module {} instance {} of {} started", name, instance, ns.entry);
        ns.instance = Some(instance);
        Ok(())
    }

    async fn stop_module(&self, module: &Module) -> Result<(), ModuleError> {
        let name = module.name();
        let mut namespaces = self.namespaces.lock().await;
        let ns = namespaces
            .get_mut(name)
            .ok_or_else(|| ModuleError::backend(name, "module is not loaded"))?;
        if ns.instance.is_none() {
            return Err(ModuleError::NotRunning(name.to_string()));
        }
        if ns.poisoned {
            warn!("Module {} is in an unknown state, dropping its instance without a stop hook", name);
            ns.instance = None;
            return Ok(());
        }

        let stopped = ns.process.request_ok(HostRequest::Stop).await;
        match stopped {
            Ok(()) => {
                ns.instance = None;
                Ok(())
            }
            Err(ModuleError::Timeout) => {
                warn!("Stop of module {} timed out", name);
                ns.poisoned = true;
                Err(ModuleError::Timeout)
            }
            Err(e) => Err(e),
        }
    }

    async fn unload_module(&self, module: &Module) -> Result<(), ModuleError> {
        let name = module.name();
        let mut ns = self
            .namespaces
            .lock()
            .await
            .remove(name)
            .ok_or_else(|| ModuleError::backend(name, "module is not loaded"))?;

        self.release(&mut ns).await;
        Ok(())
    }
}
