//! Module manager for orchestrating all modules
//!
//! Wires discovery, the registry and the batch scheduler together. The
//! registry sits behind a single lock: cross-module dependency checks read
//! the whole map, so ad-hoc transitions and batch runs exclude each other.

use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::{HostConfig, ModuleConfig, ProcessBackendConfig};
use crate::module::discovery::ModuleDiscovery;
use crate::module::module_config::merge_module_config;
use crate::module::process::{ProcessBackend, PROCESS_ALIASES, PROCESS_LANGUAGE};
use crate::module::registry::ModuleRegistry;
use crate::module::scheduler::{BatchReport, DependencyOrderedLoader};
use crate::module::traits::{Module, ModuleBackend, ModuleError, TransitionReport};

/// Reports of every batch run by a startup or shutdown
#[derive(Debug, Default)]
pub struct LifecycleReport {
    pub batches: Vec<BatchReport>,
}

impl LifecycleReport {
    /// Modules that failed in any batch, in order of failure
    pub fn failed_modules(&self) -> Vec<&str> {
        self.batches.iter().flat_map(|b| b.failed_modules()).collect()
    }

    pub fn is_success(&self) -> bool {
        self.batches.iter().all(BatchReport::is_success)
    }
}

/// Module manager coordinates all loaded modules
pub struct ModuleManager {
    registry: Arc<Mutex<ModuleRegistry>>,
    discovery: ModuleDiscovery,
    config: ModuleConfig,
    scheduler: DependencyOrderedLoader,
}

impl ModuleManager {
    /// Create a manager with no language backends registered
    pub fn new(config: &HostConfig) -> Self {
        Self {
            registry: Arc::new(Mutex::new(ModuleRegistry::new())),
            discovery: ModuleDiscovery::new(&config.modules.modules_dir),
            config: config.modules.clone(),
            scheduler: DependencyOrderedLoader::new(config.scheduler.max_passes),
        }
    }

    /// Create a manager with the process backend registered
    pub async fn with_process_backend(config: &HostConfig) -> Result<(Self, Arc<ProcessBackend>), ModuleError> {
        let manager = Self::new(config);
        let backend = manager.register_process_backend(&config.process).await?;
        Ok((manager, backend))
    }

    /// Register the process backend under `process` and its aliases
    pub async fn register_process_backend(
        &self,
        config: &ProcessBackendConfig,
    ) -> Result<Arc<ProcessBackend>, ModuleError> {
        let backend = Arc::new(ProcessBackend::new(config));
        self.register_interpreter(PROCESS_LANGUAGE, backend.clone(), &PROCESS_ALIASES)
            .await?;
        Ok(backend)
    }

    /// Register a language backend
    pub async fn register_interpreter<S: AsRef<str>>(
        &self,
        language: &str,
        backend: Arc<dyn ModuleBackend>,
        aliases: &[S],
    ) -> Result<(), ModuleError> {
        self.registry
            .lock()
            .await
            .register_interpreter(language, backend, aliases)
    }

    /// Shared handle to the registry
    pub fn registry(&self) -> Arc<Mutex<ModuleRegistry>> {
        Arc::clone(&self.registry)
    }

    /// Names of all loaded modules
    pub async fn list_modules(&self) -> Vec<String> {
        self.registry.lock().await.names()
    }

    /// Whether `name` is loaded and running
    pub async fn is_running(&self, name: &str) -> bool {
        self.registry.lock().await.is_running(name)
    }

    /// Load the module in `dir` at runtime
    pub async fn load_module(&self, dir: &Path) -> Result<TransitionReport, ModuleError> {
        let module = self.prepare(ModuleRegistry::create_module(dir)?);
        self.registry.lock().await.load_with_interpreter(module).await
    }

    pub async fn start_module(&self, name: &str) -> Result<TransitionReport, ModuleError> {
        self.registry.lock().await.start_module(name).await
    }

    pub async fn stop_module(&self, name: &str) -> Result<TransitionReport, ModuleError> {
        self.registry.lock().await.stop_module(name).await
    }

    pub async fn unload_module(&self, name: &str) -> Result<TransitionReport, ModuleError> {
        self.registry.lock().await.unload_module(name).await
    }

    /// Unload a module and load it again from its directory
    ///
    /// Picks up a replaced artifact or manifest. A module that was running is
    /// started again.
    pub async fn reload_module(&self, name: &str) -> Result<TransitionReport, ModuleError> {
        let mut registry = self.registry.lock().await;
        let (dir, was_running) = match registry.get(name) {
            Some(module) => (module.data_dir().to_path_buf(), module.is_running()),
            None => return Err(ModuleError::ModuleNotFound(name.to_string())),
        };

        info!("Reloading module: {}", name);
        if was_running {
            registry.stop_module(name).await?;
        }
        registry.unload_module(name).await?;

        let module = self.prepare(ModuleRegistry::create_module(&dir)?);
        let mut report = registry.load_with_interpreter(module).await?;
        if was_running {
            report.warnings.extend(registry.start_module(name).await?.warnings);
        }
        Ok(report)
    }

    /// Discover, load and start every enabled module
    pub async fn startup(&self) -> Result<LifecycleReport, ModuleError> {
        let mut report = LifecycleReport::default();
        if !self.config.enabled {
            info!("Module system disabled");
            return Ok(report);
        }

        let modules: Vec<Module> = self
            .discovery
            .discover_modules()?
            .into_iter()
            .filter(|m| self.config.is_enabled(m.name()))
            .map(|m| self.prepare(m))
            .collect();

        let mut registry = self.registry.lock().await;
        report.batches.push(self.scheduler.load_all(&mut registry, modules).await);

        let names = registry.names();
        report.batches.push(self.scheduler.start_all(&mut registry, names).await);

        info!("Module startup complete: {} module(s) loaded", registry.len());
        Ok(report)
    }

    /// Stop every running module, then unload every loaded module
    pub async fn shutdown(&self) -> LifecycleReport {
        let mut report = LifecycleReport::default();
        let mut registry = self.registry.lock().await;

        let running: Vec<String> = registry
            .get_all()
            .into_iter()
            .filter(|m| m.is_running())
            .map(|m| m.name().to_string())
            .collect();
        report.batches.push(self.scheduler.stop_all(&mut registry, running).await);

        let loaded = registry.names();
        report.batches.push(self.scheduler.unload_all(&mut registry, loaded).await);

        if !registry.is_empty() {
            warn!("Modules still loaded after shutdown: {:?}", registry.names());
        }
        report
    }

    /// Overlay host-level config overrides onto a module's own config
    fn prepare(&self, module: Module) -> Module {
        match self.config.module_configs.get(module.name()) {
            Some(overrides) => {
                let merged = merge_module_config(module.config().clone(), overrides);
                module.with_config(merged)
            }
            None => module,
        }
    }
}
