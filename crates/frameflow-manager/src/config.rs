//! Manager configuration parsing.
//!
//! The manager accepts a raw JSON object and validates it before any UDF is
//! loaded; malformed configuration fails construction.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Worker pool size when the config does not specify one.
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Top-level UDF manager configuration.
///
/// ```json
/// {
///   "udfs": [ { "name": "resize", "width": 320, "height": 240 } ],
///   "max_workers": 4
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ManagerConfig {
    /// Ordered UDF chain; may be empty for a pass-through pipeline.
    pub udfs: Vec<UdfEntry>,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

/// One element of the `udfs` array. Every key other than `name` passes
/// through to the UDF untouched (including the advisory `type` key read by
/// the loader).
#[derive(Debug, Clone, Deserialize)]
pub struct UdfEntry {
    pub name: String,
    #[serde(flatten)]
    pub config: Map<String, Value>,
}

fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

impl ManagerConfig {
    /// Parse and validate a raw JSON configuration value.
    pub fn from_value(value: Value) -> Result<Self> {
        let config: ManagerConfig =
            serde_json::from_value(value).context("invalid UDF manager configuration")?;
        if config.max_workers == 0 {
            bail!("\"max_workers\" must be at least 1");
        }
        for entry in &config.udfs {
            if entry.name.is_empty() {
                bail!("UDF entries require a non-empty \"name\"");
            }
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn minimal_config_defaults_max_workers() {
        let config = ManagerConfig::from_value(json!({ "udfs": [] })).unwrap();
        assert!(config.udfs.is_empty());
        assert_eq!(config.max_workers, DEFAULT_MAX_WORKERS);
    }

    #[test]
    fn extra_udf_keys_pass_through() {
        let config = ManagerConfig::from_value(json!({
            "udfs": [
                { "name": "resize", "type": "native", "width": 320 },
                { "name": "classify" }
            ],
            "max_workers": 2
        }))
        .unwrap();

        assert_eq!(config.max_workers, 2);
        assert_eq!(config.udfs[0].name, "resize");
        assert_eq!(config.udfs[0].config["type"], json!("native"));
        assert_eq!(config.udfs[0].config["width"], json!(320));
        assert!(config.udfs[1].config.is_empty());
    }

    #[test]
    fn missing_udfs_key_is_fatal() {
        assert!(ManagerConfig::from_value(json!({ "max_workers": 2 })).is_err());
    }

    #[test]
    fn non_array_udfs_is_fatal() {
        assert!(ManagerConfig::from_value(json!({ "udfs": "resize" })).is_err());
    }

    #[test]
    fn entry_without_name_is_fatal() {
        assert!(ManagerConfig::from_value(json!({ "udfs": [{ "width": 320 }] })).is_err());
    }

    #[test]
    fn zero_workers_is_fatal() {
        let err =
            ManagerConfig::from_value(json!({ "udfs": [], "max_workers": 0 })).unwrap_err();
        assert!(err.to_string().contains("max_workers"));
    }
}
