//! Dependency-ordered batch loader
//!
//! Drives a batch of modules through one lifecycle phase without assuming
//! the batch is acyclic or even satisfiable. Each remaining item gets a
//! readiness rank; a pass admits every item whose rank is at most the pass
//! counter. A pass that admits something resets the counter, a pass that
//! admits nothing raises it, and once the counter exceeds the cap the batch
//! ends. Every admitted item leaves the batch whether its transition worked
//! or not, so the loop is bounded by `max_passes × items` passes.

use std::fmt;
use tracing::{error, info, warn};

use crate::module::registry::ModuleRegistry;
use crate::module::traits::{DependencyKind, Module, ModuleError, TransitionReport};

/// Default stagnation cap: number of consecutive passes without progress
pub const DEFAULT_MAX_PASSES: u32 = 3;

/// Lifecycle phase a batch is driven through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Load,
    Start,
    Stop,
    Unload,
}

impl Phase {
    /// Forward phases look at the item's own dependencies, backward phases at its dependents
    pub fn is_forward(self) -> bool {
        matches!(self, Phase::Load | Phase::Start)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Load => "load",
            Phase::Start => "start",
            Phase::Stop => "stop",
            Phase::Unload => "unload",
        };
        f.write_str(s)
    }
}

/// Readiness rank of a batch item
///
/// Ordered so that a lower rank is admitted earlier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Readiness {
    /// Every condition for the phase holds
    Ready = 1,
    /// Only soft-dependency conditions are unmet
    SoftBlocked = 2,
    /// A hard condition is unmet, or no backend handles the language
    HardBlocked = 3,
}

impl Readiness {
    pub fn rank(self) -> u32 {
        self as u32
    }
}

/// Pass bookkeeping for the bounded scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassCounter {
    current: u32,
    max_passes: u32,
}

impl PassCounter {
    /// `max_passes` is clamped to at least 1
    pub fn new(max_passes: u32) -> Self {
        Self {
            current: 1,
            max_passes: max_passes.max(1),
        }
    }

    /// Current pass number
    pub fn current(&self) -> u32 {
        self.current
    }

    /// Whether an item of this rank is admitted in the current pass
    pub fn admits(&self, readiness: Readiness) -> bool {
        readiness.rank() <= self.current
    }

    /// Finish a pass; returns false once the cap is exceeded
    pub fn finish_pass(&mut self, progressed: bool) -> bool {
        if progressed {
            self.current = 1;
        } else {
            self.current += 1;
        }
        self.current <= self.max_passes
    }
}

impl Default for PassCounter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PASSES)
    }
}

/// Why a module did not reach the target phase
#[derive(Debug)]
pub enum BatchFailure {
    /// The transition was attempted and failed
    Transition { module: String, error: ModuleError },
    /// The scheduler gave up before the module was attempted
    Unscheduled { module: String },
}

impl BatchFailure {
    pub fn module(&self) -> &str {
        match self {
            BatchFailure::Transition { module, .. } | BatchFailure::Unscheduled { module } => module,
        }
    }
}

impl fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchFailure::Transition { module, error } => write!(f, "{}: {}", module, error),
            BatchFailure::Unscheduled { module } => write!(f, "{}: never scheduled", module),
        }
    }
}

/// Outcome of a batch run
#[derive(Debug)]
pub struct BatchReport {
    pub phase: Phase,
    /// Modules that reached the phase, in processing order
    pub completed: Vec<String>,
    pub failures: Vec<BatchFailure>,
    /// Soft-dependency warnings raised by completed transitions
    pub warnings: Vec<TransitionReport>,
}

impl BatchReport {
    fn new(phase: Phase) -> Self {
        Self {
            phase,
            completed: Vec::new(),
            failures: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Modules that never reached the target phase
    pub fn failed_modules(&self) -> Vec<&str> {
        self.failures.iter().map(BatchFailure::module).collect()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    fn log_summary(&self) {
        if self.failures.is_empty() {
            info!(
                "Batch {} finished: {} module(s)",
                self.phase,
                self.completed.len()
            );
            return;
        }
        error!("Not all modules could be processed ({})", self.phase);
        for failure in &self.failures {
            error!("- {}", failure);
        }
    }
}

/// Something that can be ranked and driven through a phase
enum BatchItem {
    /// Not yet registered (load phase)
    Pending(Module),
    /// Registered, addressed by name
    Registered(String),
}

impl BatchItem {
    fn name(&self) -> &str {
        match self {
            BatchItem::Pending(module) => module.name(),
            BatchItem::Registered(name) => name,
        }
    }
}

/// Bounded batch scheduler over a [`ModuleRegistry`]
#[derive(Debug, Clone, Copy)]
pub struct DependencyOrderedLoader {
    max_passes: u32,
}

impl Default for DependencyOrderedLoader {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PASSES)
    }
}

impl DependencyOrderedLoader {
    pub fn new(max_passes: u32) -> Self {
        Self {
            max_passes: max_passes.max(1),
        }
    }

    pub fn max_passes(&self) -> u32 {
        self.max_passes
    }

    /// Load a batch of unregistered modules
    pub async fn load_all(&self, registry: &mut ModuleRegistry, modules: Vec<Module>) -> BatchReport {
        let items = modules.into_iter().map(BatchItem::Pending).collect();
        self.run(registry, Phase::Load, items).await
    }

    /// Start the named modules
    pub async fn start_all(&self, registry: &mut ModuleRegistry, names: Vec<String>) -> BatchReport {
        self.run_registered(registry, Phase::Start, names).await
    }

    /// Stop the named modules, dependents first
    pub async fn stop_all(&self, registry: &mut ModuleRegistry, names: Vec<String>) -> BatchReport {
        self.run_registered(registry, Phase::Stop, names).await
    }

    /// Unload the named modules, dependents first
    pub async fn unload_all(&self, registry: &mut ModuleRegistry, names: Vec<String>) -> BatchReport {
        self.run_registered(registry, Phase::Unload, names).await
    }

    async fn run_registered(
        &self,
        registry: &mut ModuleRegistry,
        phase: Phase,
        names: Vec<String>,
    ) -> BatchReport {
        let items = names.into_iter().map(BatchItem::Registered).collect();
        self.run(registry, phase, items).await
    }

    async fn run(&self, registry: &mut ModuleRegistry, phase: Phase, items: Vec<BatchItem>) -> BatchReport {
        let mut report = BatchReport::new(phase);
        let mut remaining = items;
        let mut counter = PassCounter::new(self.max_passes);

        while !remaining.is_empty() {
            let mut progressed = false;
            let mut index = 0;
            while index < remaining.len() {
                let readiness = match &remaining[index] {
                    BatchItem::Pending(module) => readiness_for_load(registry, module),
                    BatchItem::Registered(name) => readiness(registry, phase, name),
                };
                if !counter.admits(readiness) {
                    index += 1;
                    continue;
                }

                let item = remaining.remove(index);
                let name = item.name().to_string();
                progressed = true;
                match apply(registry, phase, item).await {
                    Ok(transition) => {
                        if !transition.is_clean() {
                            report.warnings.push(transition);
                        }
                        report.completed.push(name);
                    }
                    Err(e) => {
                        error!("An error occurred while trying to {} the module {}: {}", phase, name, e);
                        report.failures.push(BatchFailure::Transition { module: name, error: e });
                    }
                }
            }

            if !counter.finish_pass(progressed) {
                break;
            }
        }

        for item in remaining {
            warn!("Module {} was never scheduled for {}", item.name(), phase);
            report.failures.push(BatchFailure::Unscheduled {
                module: item.name().to_string(),
            });
        }

        report.log_summary();
        report
    }
}

async fn apply(
    registry: &mut ModuleRegistry,
    phase: Phase,
    item: BatchItem,
) -> Result<TransitionReport, ModuleError> {
    match (phase, item) {
        (_, BatchItem::Pending(module)) => registry.load_with_interpreter(module).await,
        (Phase::Load, BatchItem::Registered(name)) => Err(ModuleError::AlreadyLoaded(name)),
        (Phase::Start, BatchItem::Registered(name)) => registry.start_module(&name).await,
        (Phase::Stop, BatchItem::Registered(name)) => registry.stop_module(&name).await,
        (Phase::Unload, BatchItem::Registered(name)) => registry.unload_module(&name).await,
    }
}

/// Rank a not-yet-registered module for loading
pub fn readiness_for_load(registry: &ModuleRegistry, module: &Module) -> Readiness {
    let descriptor = module.descriptor();
    if !registry.interpreters().supports(&descriptor.language)
        || descriptor.dependencies.iter().any(|dep| !registry.contains(dep))
    {
        return Readiness::HardBlocked;
    }
    if descriptor.soft_dependencies.iter().any(|dep| !registry.contains(dep)) {
        return Readiness::SoftBlocked;
    }
    Readiness::Ready
}

/// Rank a registered module for `phase`
///
/// Unknown modules rank as hard-blocked; the registry reports them as
/// not found once they are admitted.
pub fn readiness(registry: &ModuleRegistry, phase: Phase, name: &str) -> Readiness {
    let Some(module) = registry.get(name) else {
        return Readiness::HardBlocked;
    };
    let descriptor = module.descriptor();

    match phase {
        Phase::Load => Readiness::HardBlocked,
        Phase::Start => {
            if !registry.interpreters().supports(&descriptor.language)
                || descriptor.dependencies.iter().any(|dep| !registry.is_running(dep))
            {
                Readiness::HardBlocked
            } else if descriptor.soft_dependencies.iter().any(|dep| !registry.is_running(dep)) {
                Readiness::SoftBlocked
            } else {
                Readiness::Ready
            }
        }
        Phase::Stop => worst_dependent(registry, name, |m| m.is_running()),
        Phase::Unload => worst_dependent(registry, name, |_| true),
    }
}

fn worst_dependent(registry: &ModuleRegistry, name: &str, blocks: impl Fn(&Module) -> bool) -> Readiness {
    if registry.dependents(name, DependencyKind::Hard).any(&blocks) {
        Readiness::HardBlocked
    } else if registry.dependents(name, DependencyKind::Soft).any(&blocks) {
        Readiness::SoftBlocked
    } else {
        Readiness::Ready
    }
}
