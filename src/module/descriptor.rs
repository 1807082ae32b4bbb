//! Module descriptor parsing and validation
//!
//! Parses `module.json` manifests field by field so that every rejection
//! names the offending field and whether it was missing, mistyped or
//! malformed.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::warn;

use crate::module::traits::{DescriptorFault, ModuleError};

/// Manifest file name inside every module directory
pub const DESCRIPTOR_FILE: &str = "module.json";

const NAME_PATTERN: &str = "[A-Za-z_-]+";
const VERSION_PATTERN: &str = "[A-Za-z0-9._+-]+";

/// Parsed module manifest (`module.json`)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDescriptor {
    /// Module name, unique registry key
    pub name: String,
    /// Module version
    pub version: String,
    /// Language identifier, selects the backend
    pub language: String,
    /// Human-readable description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Modules that must be present (and running, for start) first
    pub dependencies: BTreeSet<String>,
    /// Advisory ordering; only warns when unmet
    pub soft_dependencies: BTreeSet<String>,
    /// Module authors
    pub authors: BTreeSet<String>,
    /// Backend-specific keys, passed through untouched
    pub additional: Map<String, Value>,
}

impl ModuleDescriptor {
    /// Load descriptor from a `module.json` file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ModuleError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ModuleError::DescriptorNotFound(path.to_path_buf())
            } else {
                ModuleError::Io(e)
            }
        })?;

        let origin = path
            .parent()
            .and_then(|dir| dir.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Self::from_json_str(&contents, &origin)
    }

    /// Parse a descriptor from JSON text; `origin` names it in errors
    pub fn from_json_str(source: &str, origin: &str) -> Result<Self, ModuleError> {
        let value: Value = serde_json::from_str(source).map_err(|e| ModuleError::InvalidDescriptor {
            module: origin.to_string(),
            field: DESCRIPTOR_FILE.to_string(),
            fault: DescriptorFault::Malformed(e.to_string()),
        })?;
        Self::from_value(value, origin)
    }

    /// Build a descriptor from an already-parsed JSON document
    pub fn from_value(value: Value, origin: &str) -> Result<Self, ModuleError> {
        let Value::Object(mut object) = value else {
            return Err(ModuleError::InvalidDescriptor {
                module: origin.to_string(),
                field: DESCRIPTOR_FILE.to_string(),
                fault: DescriptorFault::Malformed("top level is not an object".to_string()),
            });
        };
        let fields = Fields { object: &object, origin };

        let name = fields.required_string("name", NAME_PATTERN, is_name)?;
        let version = fields.required_string("version", VERSION_PATTERN, is_version)?;
        let language = fields.required_string("language", NAME_PATTERN, is_name)?;
        let description = fields.optional_string("description")?;
        let dependencies = fields.string_set("dependencies")?;
        let soft_dependencies = fields.string_set("softDependencies")?;
        let authors = fields.string_set("authors")?;

        let additional = match object.remove("additional") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(invalid(origin, "additional", DescriptorFault::WrongType { expected: "object" }))
            }
        };

        Ok(Self {
            name,
            version,
            language,
            description,
            dependencies,
            soft_dependencies,
            authors,
            additional,
        })
    }

    /// Serialize back to manifest JSON
    pub fn to_json(&self) -> Result<String, ModuleError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Backend-specific string key from `additional`
    pub fn additional_str(&self, key: &str) -> Option<&str> {
        self.additional.get(key).and_then(Value::as_str)
    }
}

struct Fields<'a> {
    object: &'a Map<String, Value>,
    origin: &'a str,
}

impl Fields<'_> {
    fn required_string(
        &self,
        field: &str,
        pattern: &'static str,
        check: fn(&str) -> bool,
    ) -> Result<String, ModuleError> {
        match self.object.get(field) {
            None | Some(Value::Null) => Err(invalid(self.origin, field, DescriptorFault::Required)),
            Some(Value::String(s)) if check(s) => Ok(s.clone()),
            Some(Value::String(_)) => Err(invalid(
                self.origin,
                field,
                DescriptorFault::WrongContent { expected: pattern },
            )),
            Some(_) => Err(invalid(self.origin, field, DescriptorFault::WrongType { expected: "string" })),
        }
    }

    fn optional_string(&self, field: &str) -> Result<Option<String>, ModuleError> {
        match self.object.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(invalid(self.origin, field, DescriptorFault::WrongType { expected: "string" })),
        }
    }

    fn string_set(&self, field: &str) -> Result<BTreeSet<String>, ModuleError> {
        let items = match self.object.get(field) {
            None | Some(Value::Null) => return Ok(BTreeSet::new()),
            Some(Value::Array(items)) => items,
            Some(_) => return Err(invalid(self.origin, field, DescriptorFault::WrongType { expected: "array" })),
        };

        let mut set = BTreeSet::new();
        for item in items {
            match item {
                Value::String(s) => {
                    set.insert(s.clone());
                }
                Value::Number(n) => {
                    set.insert(n.to_string());
                }
                Value::Bool(b) => {
                    set.insert(b.to_string());
                }
                other => {
                    warn!(
                        "Skipping non-string entry {} in {} of module {}",
                        other, field, self.origin
                    );
                }
            }
        }
        Ok(set)
    }
}

fn invalid(origin: &str, field: &str, fault: DescriptorFault) -> ModuleError {
    ModuleError::InvalidDescriptor {
        module: origin.to_string(),
        field: field.to_string(),
        fault,
    }
}

/// Whether `s` matches `[A-Za-z_-]+`
pub fn is_name(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphabetic() || c == '_' || c == '-')
}

/// Whether `s` matches `[A-Za-z0-9._+-]+`
pub fn is_version(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '+' | '-'))
}
