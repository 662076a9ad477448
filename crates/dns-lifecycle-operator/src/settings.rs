//! Controller configuration loading
//!
//! The YAML file is read first; command-line and environment overrides are
//! laid over it before the result is deserialized, so a flag always wins
//! and validation sees the merged settings.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use dns_lifecycle_common::Error;
use dns_lifecycle_controller::{ControllerConfig, MigrationMode};

/// Settings given on the command line or through the environment
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Overrides {
    /// Behavior of Migrate
    pub migration_mode: Option<MigrationMode>,
    /// Worker pool size
    pub workers: Option<usize>,
    /// Resync period in seconds
    pub resync_interval_secs: Option<u64>,
    /// Ignore the user-facing operation annotation
    pub ignore_operation_annotation: Option<bool>,
    /// Template directory
    pub template_dir: Option<PathBuf>,
    /// Handled extension type
    pub extension_type: Option<String>,
}

impl Overrides {
    fn apply(&self, map: &mut Map<String, Value>) {
        if let Some(mode) = self.migration_mode {
            map.insert("migrationMode".into(), Value::String(mode.to_string()));
        }
        if let Some(workers) = self.workers {
            map.insert("workers".into(), Value::from(workers));
        }
        if let Some(secs) = self.resync_interval_secs {
            map.insert("resyncIntervalSeconds".into(), Value::from(secs));
        }
        if let Some(ignore) = self.ignore_operation_annotation {
            map.insert("ignoreOperationAnnotation".into(), Value::Bool(ignore));
        }
        if let Some(dir) = &self.template_dir {
            map.insert(
                "templateDir".into(),
                Value::String(dir.display().to_string()),
            );
        }
        if let Some(ty) = &self.extension_type {
            map.insert("extensionType".into(), Value::String(ty.clone()));
        }
    }
}

/// Load and validate the controller configuration
pub fn load_config(path: Option<&Path>, overrides: &Overrides) -> Result<ControllerConfig, Error> {
    let text = match path {
        Some(path) => std::fs::read_to_string(path).map_err(|e| {
            Error::permanent_config(format!("cannot read config {}: {}", path.display(), e))
        })?,
        None => String::new(),
    };
    parse_config(&text, overrides)
}

/// Parse YAML `text` (possibly empty) with `overrides` applied
pub fn parse_config(text: &str, overrides: &Overrides) -> Result<ControllerConfig, Error> {
    let mut map = if text.trim().is_empty() {
        Map::new()
    } else {
        match serde_yaml::from_str::<Value>(text) {
            Ok(Value::Object(map)) => map,
            Ok(Value::Null) => Map::new(),
            Ok(_) => return Err(Error::permanent_config("config file must be a mapping")),
            Err(e) => return Err(Error::permanent_config(format!("invalid config file: {}", e))),
        }
    };
    overrides.apply(&mut map);

    let config: ControllerConfig = serde_json::from_value(Value::Object(map))
        .map_err(|e| Error::permanent_config(format!("invalid configuration: {}", e)))?;
    config.validate()?;
    Ok(config)
}
