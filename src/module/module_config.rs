//! Per-module configuration
//!
//! A module directory may carry a `config.toml`. It is flattened into plain
//! key/value pairs (nested tables become dotted keys) because that is all the
//! module process receives in its `start` request.

use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

use crate::module::traits::ModuleError;

/// Config file name inside a module directory
pub const MODULE_CONFIG_FILE: &str = "config.toml";

/// Load `config.toml` from a module directory
///
/// Missing file means empty config. Content that is not valid TOML is read
/// as `key=value` lines instead.
pub fn load_module_config(module_dir: &Path) -> Result<HashMap<String, String>, ModuleError> {
    let config_path = module_dir.join(MODULE_CONFIG_FILE);
    if !config_path.exists() {
        debug!("No config file in {:?}, using defaults", module_dir);
        return Ok(HashMap::new());
    }

    let contents = std::fs::read_to_string(&config_path)?;
    Ok(parse_module_config(&contents))
}

/// Parse config text into flattened key/value pairs
pub fn parse_module_config(contents: &str) -> HashMap<String, String> {
    if let Ok(table) = contents.parse::<toml::Table>() {
        let mut result = HashMap::new();
        for (key, value) in &table {
            flatten_toml_value(key.clone(), value, &mut result);
        }
        return result;
    }

    let mut config = HashMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some((key, value)) = line.split_once('=') {
            config.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    config
}

/// Overlay `overrides` onto `base`; override keys win
pub fn merge_module_config(
    mut base: HashMap<String, String>,
    overrides: &HashMap<String, String>,
) -> HashMap<String, String> {
    for (key, value) in overrides {
        base.insert(key.clone(), value.clone());
    }
    base
}

fn flatten_toml_value(prefix: String, value: &toml::Value, result: &mut HashMap<String, String>) {
    use toml::Value;

    match value {
        Value::String(s) => {
            result.insert(prefix, s.clone());
        }
        Value::Integer(i) => {
            result.insert(prefix, i.to_string());
        }
        Value::Float(f) => {
            result.insert(prefix, f.to_string());
        }
        Value::Boolean(b) => {
            result.insert(prefix, b.to_string());
        }
        Value::Datetime(dt) => {
            result.insert(prefix, dt.to_string());
        }
        Value::Array(items) => {
            let joined = items
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(",");
            result.insert(prefix, joined);
        }
        Value::Table(table) => {
            for (key, nested) in table {
                flatten_toml_value(format!("{}.{}", prefix, key), nested, result);
            }
        }
    }
}
