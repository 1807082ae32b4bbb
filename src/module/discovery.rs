//! Module discovery
//!
//! Scans the modules directory: every immediate subdirectory holding a
//! `module.json` is a candidate module. Candidates whose manifest cannot be
//! read are logged and skipped.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::module::descriptor::DESCRIPTOR_FILE;
use crate::module::registry::ModuleRegistry;
use crate::module::traits::{Module, ModuleError};

/// Module discovery scanner
#[derive(Debug, Clone)]
pub struct ModuleDiscovery {
    /// Base directory to scan for modules
    modules_dir: PathBuf,
}

impl ModuleDiscovery {
    /// Create a new module discovery scanner
    pub fn new<P: AsRef<Path>>(modules_dir: P) -> Self {
        Self {
            modules_dir: modules_dir.as_ref().to_path_buf(),
        }
    }

    pub fn modules_dir(&self) -> &Path {
        &self.modules_dir
    }

    /// Discover all modules in the modules directory, sorted by directory name
    ///
    /// A missing modules directory is created and yields no modules.
    pub fn discover_modules(&self) -> Result<Vec<Module>, ModuleError> {
        info!("Discovering modules in {:?}", self.modules_dir);

        if !self.modules_dir.exists() {
            debug!("Modules directory does not exist, creating: {:?}", self.modules_dir);
            fs::create_dir_all(&self.modules_dir)?;
            return Ok(Vec::new());
        }
        if !self.modules_dir.is_dir() {
            return Err(ModuleError::NotADirectory(self.modules_dir.clone()));
        }

        let mut candidates = Vec::new();
        for entry in fs::read_dir(&self.modules_dir)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            if !path.join(DESCRIPTOR_FILE).exists() {
                debug!("No {} found in {:?}, skipping", DESCRIPTOR_FILE, path);
                continue;
            }
            candidates.push(path);
        }
        candidates.sort();

        let mut modules = Vec::new();
        for path in candidates {
            match ModuleRegistry::create_module(&path) {
                Ok(module) => {
                    info!("Module {} found", module.name());
                    modules.push(module);
                }
                Err(e) => {
                    warn!("Failed to read module in {:?}: {}", path, e);
                }
            }
        }

        info!("Discovered {} modules", modules.len());
        Ok(modules)
    }

    /// Discover a specific module by directory name
    pub fn discover_module(&self, dir_name: &str) -> Result<Module, ModuleError> {
        ModuleRegistry::create_module(&self.modules_dir.join(dir_name))
    }
}
