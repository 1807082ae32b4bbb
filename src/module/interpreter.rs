//! Interpreter registry
//!
//! Maps language identifiers (and their aliases) to the backend that runs
//! modules written in that language. Lookups ignore ASCII case.

use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::module::traits::{ModuleBackend, ModuleError};

/// A backend plus every language name it answers to
struct InterpreterBinding {
    language: String,
    aliases: Vec<String>,
    backend: Arc<dyn ModuleBackend>,
}

impl InterpreterBinding {
    fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.language.as_str()).chain(self.aliases.iter().map(String::as_str))
    }

    fn answers_to(&self, name: &str) -> bool {
        self.names().any(|n| n.eq_ignore_ascii_case(name))
    }
}

/// Append-only table of language backends
#[derive(Default)]
pub struct InterpreterRegistry {
    bindings: Vec<InterpreterBinding>,
}

impl InterpreterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `backend` for `language` and `aliases`
    ///
    /// Fails with `AlreadyRegistered` if the language or any alias matches
    /// (case-insensitively) a name that is already claimed, or if the new
    /// names collide among themselves.
    pub fn register<S: AsRef<str>>(
        &mut self,
        language: &str,
        backend: Arc<dyn ModuleBackend>,
        aliases: &[S],
    ) -> Result<(), ModuleError> {
        let aliases: Vec<String> = aliases.iter().map(|a| a.as_ref().to_string()).collect();

        let mut claimed: Vec<&str> = Vec::with_capacity(aliases.len() + 1);
        for name in std::iter::once(language).chain(aliases.iter().map(String::as_str)) {
            if self.bindings.iter().any(|b| b.answers_to(name))
                || claimed.iter().any(|c| c.eq_ignore_ascii_case(name))
            {
                return Err(ModuleError::AlreadyRegistered(name.to_string()));
            }
            claimed.push(name);
        }

        debug!("Registered interpreter {} (aliases: {:?})", language, aliases);
        self.bindings.push(InterpreterBinding {
            language: language.to_string(),
            aliases,
            backend,
        });
        Ok(())
    }

    /// Backend for `language`, matched case-insensitively against names and aliases
    pub fn resolve(&self, language: &str) -> Option<Arc<dyn ModuleBackend>> {
        self.bindings
            .iter()
            .find(|b| b.answers_to(language))
            .map(|b| Arc::clone(&b.backend))
    }

    /// Whether some backend answers to `language`
    pub fn supports(&self, language: &str) -> bool {
        self.bindings.iter().any(|b| b.answers_to(language))
    }

    /// Every claimed language name and alias
    pub fn languages(&self) -> Vec<String> {
        self.bindings
            .iter()
            .flat_map(|b| b.names().map(str::to_string).collect::<Vec<_>>())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl fmt::Debug for InterpreterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterpreterRegistry")
            .field("languages", &self.languages())
            .finish()
    }
}
