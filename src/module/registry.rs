//! Module registry
//!
//! Authoritative name → module map. Every single-module lifecycle transition
//! goes through here: the registry checks the dependency rules against the
//! live map, delegates the actual work to the backend registered for the
//! module's language, and only records the new state once the backend
//! succeeded.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::module::descriptor::{ModuleDescriptor, DESCRIPTOR_FILE};
use crate::module::interpreter::InterpreterRegistry;
use crate::module::module_config::load_module_config;
use crate::module::traits::{
    DependencyKind, DependencyWarning, Module, ModuleBackend, ModuleError, RequiredState,
    TransitionReport,
};

/// Registry of loaded modules
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: HashMap<String, Module>,
    interpreters: InterpreterRegistry,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry around an existing set of interpreters
    pub fn with_interpreters(interpreters: InterpreterRegistry) -> Self {
        Self {
            modules: HashMap::new(),
            interpreters,
        }
    }

    /// Read a module directory into a (not yet registered) module record
    ///
    /// Parses `module.json` and picks up `config.toml` if present.
    pub fn create_module(dir: &Path) -> Result<Module, ModuleError> {
        if !dir.is_dir() {
            return Err(ModuleError::NotADirectory(dir.to_path_buf()));
        }

        let descriptor_path = dir.join(DESCRIPTOR_FILE);
        if !descriptor_path.is_file() {
            return Err(ModuleError::DescriptorNotFound(descriptor_path));
        }

        let descriptor = ModuleDescriptor::from_file(&descriptor_path)?;
        let config = load_module_config(dir)?;
        Ok(Module::new(descriptor, dir).with_config(config))
    }

    /// Create a module from `dir` and load it
    pub async fn load_from_dir(&mut self, dir: &Path) -> Result<TransitionReport, ModuleError> {
        let module = Self::create_module(dir)?;
        self.load_with_interpreter(module).await
    }

    /// Register `module` and hand it to its language backend
    pub async fn load_with_interpreter(
        &mut self,
        module: Module,
    ) -> Result<TransitionReport, ModuleError> {
        let name = module.name().to_string();
        if self.modules.contains_key(&name) {
            return Err(ModuleError::AlreadyLoaded(name));
        }

        let descriptor = module.descriptor();
        if let Some(missing) = descriptor
            .dependencies
            .iter()
            .find(|dep| !self.modules.contains_key(dep.as_str()))
        {
            return Err(hard_unmet(&name, missing, RequiredState::Loaded));
        }

        let mut report = TransitionReport::default();
        for dep in &descriptor.soft_dependencies {
            if !self.modules.contains_key(dep) {
                soft_unmet(&mut report, &name, dep, RequiredState::Loaded);
            }
        }

        let backend = self.backend_for(&module)?;

        info!("Loading module: {}", name);
        self.modules.insert(name.clone(), module);
        let loaded = match self.modules.get(&name) {
            Some(module) => backend.load_module(module).await,
            None => Err(ModuleError::ModuleNotFound(name.clone())),
        };
        if let Err(e) = loaded {
            self.modules.remove(&name);
            return Err(ModuleError::interpreter_failure(&name, e));
        }

        info!("Module {} loaded", name);
        Ok(report)
    }

    /// Start a loaded module; its hard dependencies must be running
    pub async fn start_module(&mut self, name: &str) -> Result<TransitionReport, ModuleError> {
        let module = self.require(name)?;
        if module.is_running() {
            return Err(ModuleError::AlreadyRunning(name.to_string()));
        }

        let descriptor = module.descriptor();
        if let Some(dep) = descriptor
            .dependencies
            .iter()
            .find(|dep| !self.is_running(dep))
        {
            return Err(hard_unmet(name, dep, RequiredState::Started));
        }

        let mut report = TransitionReport::default();
        for dep in &descriptor.soft_dependencies {
            if !self.is_running(dep) {
                soft_unmet(&mut report, name, dep, RequiredState::Started);
            }
        }

        let backend = self.backend_for(module)?;
        info!("Starting module: {}", name);
        backend
            .start_module(module)
            .await
            .map_err(|e| ModuleError::interpreter_failure(name, e))?;

        self.set_running(name, true);
        info!("Module {} started", name);
        Ok(report)
    }

    /// Stop a running module; no running module may hard-depend on it
    pub async fn stop_module(&mut self, name: &str) -> Result<TransitionReport, ModuleError> {
        let module = self.require(name)?;
        if !module.is_running() {
            return Err(ModuleError::NotRunning(name.to_string()));
        }

        if let Some(dependent) = self
            .dependents(name, DependencyKind::Hard)
            .find(|m| m.is_running())
        {
            return Err(hard_unmet(name, dependent.name(), RequiredState::Stopped));
        }

        let mut report = TransitionReport::default();
        let soft: Vec<String> = self
            .dependents(name, DependencyKind::Soft)
            .filter(|m| m.is_running())
            .map(|m| m.name().to_string())
            .collect();
        for dependent in &soft {
            soft_unmet(&mut report, name, dependent, RequiredState::Stopped);
        }

        let backend = self.backend_for(module)?;
        info!("Stopping module: {}", name);
        backend
            .stop_module(module)
            .await
            .map_err(|e| ModuleError::interpreter_failure(name, e))?;

        self.set_running(name, false);
        info!("Module {} stopped", name);
        Ok(report)
    }

    /// Unload a stopped module; no registered module may hard-depend on it
    pub async fn unload_module(&mut self, name: &str) -> Result<TransitionReport, ModuleError> {
        let module = self.require(name)?;
        if module.is_running() {
            return Err(ModuleError::ModuleRunning(name.to_string()));
        }

        if let Some(dependent) = self.dependents(name, DependencyKind::Hard).next() {
            return Err(hard_unmet(name, dependent.name(), RequiredState::Unloaded));
        }

        let mut report = TransitionReport::default();
        let soft: Vec<String> = self
            .dependents(name, DependencyKind::Soft)
            .map(|m| m.name().to_string())
            .collect();
        for dependent in &soft {
            soft_unmet(&mut report, name, dependent, RequiredState::Unloaded);
        }

        let backend = self.backend_for(module)?;
        info!("Unloading module: {}", name);
        backend
            .unload_module(module)
            .await
            .map_err(|e| ModuleError::interpreter_failure(name, e))?;

        self.modules.remove(name);
        info!("Module {} unloaded", name);
        Ok(report)
    }

    /// Get a module by name
    pub fn get(&self, name: &str) -> Option<&Module> {
        self.modules.get(name)
    }

    /// All registered modules, sorted by name
    pub fn get_all(&self) -> Vec<&Module> {
        let mut all: Vec<&Module> = self.modules.values().collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }

    /// Names of all registered modules, sorted
    pub fn names(&self) -> Vec<String> {
        self.get_all().into_iter().map(|m| m.name().to_string()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Whether `name` is registered and running
    pub fn is_running(&self, name: &str) -> bool {
        self.modules.get(name).is_some_and(Module::is_running)
    }

    /// Other registered modules that declare a `kind` dependency on `name`
    pub fn dependents<'a>(
        &'a self,
        name: &'a str,
        kind: DependencyKind,
    ) -> impl Iterator<Item = &'a Module> + 'a {
        self.modules.values().filter(move |m| {
            let descriptor = m.descriptor();
            let deps = match kind {
                DependencyKind::Hard => &descriptor.dependencies,
                DependencyKind::Soft => &descriptor.soft_dependencies,
            };
            m.name() != name && deps.contains(name)
        })
    }

    /// Language backends
    pub fn interpreters(&self) -> &InterpreterRegistry {
        &self.interpreters
    }

    /// Language backends, for registering new ones
    pub fn interpreters_mut(&mut self) -> &mut InterpreterRegistry {
        &mut self.interpreters
    }

    /// Register a language backend
    pub fn register_interpreter<S: AsRef<str>>(
        &mut self,
        language: &str,
        backend: Arc<dyn ModuleBackend>,
        aliases: &[S],
    ) -> Result<(), ModuleError> {
        self.interpreters.register(language, backend, aliases)
    }

    fn require(&self, name: &str) -> Result<&Module, ModuleError> {
        self.modules
            .get(name)
            .ok_or_else(|| ModuleError::ModuleNotFound(name.to_string()))
    }

    fn backend_for(&self, module: &Module) -> Result<Arc<dyn ModuleBackend>, ModuleError> {
        let language = &module.descriptor().language;
        self.interpreters
            .resolve(language)
            .ok_or_else(|| ModuleError::NoInterpreterRegistered {
                module: module.name().to_string(),
                language: language.clone(),
            })
    }

    fn set_running(&mut self, name: &str, running: bool) {
        if let Some(module) = self.modules.get_mut(name) {
            module.set_running(running);
        } else {
            debug!("Module {} vanished before its state could be recorded", name);
        }
    }
}

fn hard_unmet(module: &str, dependency: &str, required: RequiredState) -> ModuleError {
    ModuleError::DependencyUnmet {
        module: module.to_string(),
        dependency: dependency.to_string(),
        kind: DependencyKind::Hard,
        required,
    }
}

fn soft_unmet(report: &mut TransitionReport, module: &str, dependency: &str, required: RequiredState) {
    let warning = DependencyWarning {
        module: module.to_string(),
        dependency: dependency.to_string(),
        required,
    };
    warn!("{}", warning);
    report.warnings.push(warning);
}
