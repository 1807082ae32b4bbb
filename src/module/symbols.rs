//! Shared export table
//!
//! Modules opt into sharing by listing exports in their `resolved` reply.
//! Each symbol has exactly one owner at a time: the first namespace to claim
//! it. Releasing a namespace drops only the symbols that namespace claimed.

use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

use crate::module::traits::ModuleError;

/// Owner of an exported symbol
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolOwner {
    /// Module that exported the symbol
    pub module: String,
    /// Namespace (module process instance) the export belongs to
    pub namespace: String,
}

/// Process-wide table of exported symbols
#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: Mutex<HashMap<String, SymbolOwner>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim every symbol in `exports` for `owner`, all or nothing
    ///
    /// A symbol already held by another namespace is a `SymbolConflict`;
    /// nothing is claimed in that case.
    pub fn claim(&self, owner: &SymbolOwner, exports: &[String]) -> Result<(), ModuleError> {
        let mut symbols = self.lock();

        for symbol in exports {
            if let Some(existing) = symbols.get(symbol) {
                if existing.namespace != owner.namespace {
                    return Err(ModuleError::SymbolConflict {
                        symbol: symbol.clone(),
                        module: owner.module.clone(),
                        owner: existing.module.clone(),
                    });
                }
            }
        }

        for symbol in exports {
            symbols.insert(symbol.clone(), owner.clone());
        }
        debug!("Module {} exports {} symbol(s)", owner.module, exports.len());
        Ok(())
    }

    /// Drop every symbol claimed by `namespace`; returns how many were removed
    pub fn release_namespace(&self, namespace: &str) -> usize {
        let mut symbols = self.lock();
        let before = symbols.len();
        symbols.retain(|_, owner| owner.namespace != namespace);
        before - symbols.len()
    }

    /// Who exports `symbol`, if anyone
    pub fn resolve(&self, symbol: &str) -> Option<SymbolOwner> {
        self.lock().get(symbol).cloned()
    }

    /// Symbols currently exported by `module`, sorted
    pub fn exports_of(&self, module: &str) -> Vec<String> {
        let mut exports: Vec<String> = self
            .lock()
            .iter()
            .filter(|(_, owner)| owner.module == module)
            .map(|(symbol, _)| symbol.clone())
            .collect();
        exports.sort();
        exports
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, SymbolOwner>> {
        // A panic while holding the lock cannot leave the map half-updated
        self.symbols.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
