//! Global framework configuration: the built-in default for the GETOPT
//! callback id (§4.4), loadable from a JSON file with the teacher's
//! `OnceLock`-guarded `init`/`init_from_path`/`get` pattern.

use serde::Deserialize;
use std::fs;
use std::sync::OnceLock;

use crate::error::{SaslError, Status};

/// Default compiled-in plugin search path, used by the built-in GETPATH
/// callback default (§4.4) when no app callback overrides it.
const DEFAULT_PLUGIN_PATH: &str = "/usr/lib/sasl2";

/// Default `CANON_BUF_SIZE` (§4.5): the maximum canonicalized identity length.
const DEFAULT_CANON_BUF_SIZE: usize = 255;

/// Default `maxoutbuf` (§4.7) when a mechanism does not negotiate one.
const DEFAULT_MAX_OUT_BUF: usize = 8192;

static CONFIG: OnceLock<FrameworkConfig> = OnceLock::new();

#[derive(Debug, Clone, Deserialize)]
pub struct FrameworkConfig {
    #[serde(default = "default_plugin_path")]
    pub plugin_path: String,
    #[serde(default = "default_canon_buf_size")]
    pub canon_buf_size: usize,
    #[serde(default = "default_max_out_buf")]
    pub default_max_out_buf: usize,
    #[serde(default)]
    pub app_name: String,
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        Self {
            plugin_path: default_plugin_path(),
            canon_buf_size: default_canon_buf_size(),
            default_max_out_buf: default_max_out_buf(),
            app_name: String::new(),
        }
    }
}

fn default_plugin_path() -> String {
    DEFAULT_PLUGIN_PATH.to_string()
}

fn default_canon_buf_size() -> usize {
    DEFAULT_CANON_BUF_SIZE
}

fn default_max_out_buf() -> usize {
    DEFAULT_MAX_OUT_BUF
}

impl FrameworkConfig {
    /// Initialize the global config from the default compiled-in location,
    /// falling back to built-in defaults if the file is absent. Called once
    /// from `server_init`/`client_init` (§3 Lifecycles).
    pub fn init() -> Result<(), SaslError> {
        CONFIG.get_or_init(FrameworkConfig::default);
        Ok(())
    }

    /// Initialize from a specific path (used by tests and by applications
    /// that ship an explicit config file).
    pub fn init_from_path(path: &str) -> Result<(), SaslError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| SaslError::with_detail(Status::Fail, format!("read {}: {}", path, e)))?;
        let parsed: FrameworkConfig = serde_json::from_str(&contents)
            .map_err(|e| SaslError::with_detail(Status::Fail, format!("parse {}: {}", path, e)))?;
        let _ = CONFIG.set(parsed);
        Ok(())
    }

    /// Get the global config, initializing it with defaults if this is the
    /// first call (idempotent init, per §3 Lifecycles).
    pub fn get() -> &'static FrameworkConfig {
        CONFIG.get_or_init(FrameworkConfig::default)
    }

    pub fn is_initialized() -> bool {
        CONFIG.get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_without_any_file() {
        let cfg = FrameworkConfig::default();
        assert_eq!(cfg.plugin_path, DEFAULT_PLUGIN_PATH);
        assert_eq!(cfg.canon_buf_size, 255);
        assert_eq!(cfg.default_max_out_buf, 8192);
    }

    #[test]
    fn parse_full_config() {
        let json = r#"{
            "plugin_path": "/opt/sasl/plugins",
            "canon_buf_size": 128,
            "default_max_out_buf": 4096,
            "app_name": "imapd"
        }"#;
        let cfg: FrameworkConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.plugin_path, "/opt/sasl/plugins");
        assert_eq!(cfg.canon_buf_size, 128);
        assert_eq!(cfg.default_max_out_buf, 4096);
        assert_eq!(cfg.app_name, "imapd");
    }

    #[test]
    fn parse_minimal_config_fills_defaults() {
        let json = r#"{ "app_name": "smtpd" }"#;
        let cfg: FrameworkConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.plugin_path, DEFAULT_PLUGIN_PATH);
        assert_eq!(cfg.canon_buf_size, 255);
        assert_eq!(cfg.app_name, "smtpd");
    }

    #[test]
    fn init_from_file_succeeds() {
        let mut f = NamedTempFile::new().unwrap();
        write!(f, r#"{{ "app_name": "from-file" }}"#).unwrap();
        assert!(FrameworkConfig::init_from_path(f.path().to_str().unwrap()).is_ok());
    }

    #[test]
    fn init_from_missing_file_fails() {
        let result = FrameworkConfig::init_from_path("/nonexistent/path/config.json");
        assert!(result.is_err());
    }
}
