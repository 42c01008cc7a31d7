//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory,
//! then applies `SERFER_LOG_LEVEL`, `SERFER_LOG_FILE` and
//! `SERFER_LOG_PREFER_ENV` env overrides.

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::error::AppError;

/// Event source configuration.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Capacity of the subscription channel between reader and serve loop.
    pub buffer: usize,
}

/// Fully-resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub node_name: String,
    /// `tracing` filter directives, e.g. `"info"` or `"serfer=debug,info"`.
    pub log_level: String,
    /// Let a valid `RUST_LOG` win over `log_level`.
    pub log_prefer_env: bool,
    /// Append logs here instead of stderr (already expanded, no `~`).
    pub log_file: Option<PathBuf>,
    pub source: SourceConfig,
}

/// Raw TOML shape — `serde` target before resolution.
#[derive(Deserialize)]
struct RawConfig {
    node: RawNode,
    #[serde(default)]
    source: RawSource,
}

#[derive(Deserialize)]
struct RawNode {
    name: String,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    log_file: Option<String>,
    #[serde(default)]
    log_prefer_env: bool,
}

#[derive(Deserialize)]
struct RawSource {
    #[serde(default = "default_buffer")]
    buffer: usize,
}

impl Default for RawSource {
    fn default() -> Self {
        Self { buffer: default_buffer() }
    }
}

fn default_log_level() -> String { "info".to_string() }
fn default_buffer() -> usize { 64 }

/// Values taken from the environment, applied over the TOML file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub log_level: Option<String>,
    pub log_file: Option<String>,
    pub log_prefer_env: Option<String>,
}

impl Overrides {
    pub fn from_env() -> Self {
        Self {
            log_level: env::var("SERFER_LOG_LEVEL").ok(),
            log_file: env::var("SERFER_LOG_FILE").ok(),
            log_prefer_env: env::var("SERFER_LOG_PREFER_ENV").ok(),
        }
    }
}

/// Load config from `config/default.toml`, then apply env-var overrides.
pub fn load() -> Result<Config, AppError> {
    load_from(Path::new("config/default.toml"), &Overrides::from_env())
}

/// Internal loader — accepts an explicit path and overrides.
/// Tests pass overrides directly instead of mutating env vars.
pub fn load_from(path: &Path, overrides: &Overrides) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;

    let parsed: RawConfig = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    let n = parsed.node;

    if parsed.source.buffer == 0 {
        return Err(AppError::Config("source.buffer must be at least 1".into()));
    }

    let log_level = overrides.log_level.clone().unwrap_or(n.log_level);
    let log_prefer_env = match overrides.log_prefer_env.as_deref() {
        Some(v) => parse_flag(v).ok_or_else(|| {
            AppError::Config(format!("SERFER_LOG_PREFER_ENV must be true or false, got '{v}'"))
        })?,
        None => n.log_prefer_env,
    };
    let log_file = overrides
        .log_file
        .clone()
        .or(n.log_file)
        .filter(|p| !p.is_empty())
        .map(|p| expand_home(&p));

    Ok(Config {
        node_name: n.name,
        log_level,
        log_prefer_env,
        log_file,
        source: SourceConfig {
            buffer: parsed.source.buffer,
        },
    })
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL_TOML: &str = r#"
[node]
name = "test-node"
"#;

    fn write_toml(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parse_minimal_config_uses_defaults() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), &Overrides::default()).unwrap();
        assert_eq!(cfg.node_name, "test-node");
        assert_eq!(cfg.log_level, "info");
        assert!(cfg.log_file.is_none());
        assert_eq!(cfg.source.buffer, 64);
    }

    #[test]
    fn parse_full_config() {
        let f = write_toml(
            r#"
[node]
name = "edge-1"
log_level = "debug"
log_file = "/var/log/serfer.log"

[source]
buffer = 8
"#,
        );
        let cfg = load_from(f.path(), &Overrides::default()).unwrap();
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.log_file, Some(PathBuf::from("/var/log/serfer.log")));
        assert_eq!(cfg.source.buffer, 8);
    }

    #[test]
    fn zero_buffer_rejected() {
        let f = write_toml("[node]\nname = \"x\"\n[source]\nbuffer = 0\n");
        let msg = load_from(f.path(), &Overrides::default()).unwrap_err().to_string();
        assert!(msg.contains("source.buffer"));
    }

    #[test]
    fn missing_node_section_errors() {
        let f = write_toml("[source]\nbuffer = 4\n");
        let msg = load_from(f.path(), &Overrides::default()).unwrap_err().to_string();
        assert!(msg.contains("parse error"));
    }

    #[test]
    fn missing_file_errors() {
        let result = load_from(Path::new("/nonexistent/config.toml"), &Overrides::default());
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("config error"));
    }

    #[test]
    fn env_log_level_override() {
        let f = write_toml(MINIMAL_TOML);
        let overrides = Overrides {
            log_level: Some("serfer=trace,warn".into()),
            ..Default::default()
        };
        let cfg = load_from(f.path(), &overrides).unwrap();
        assert_eq!(cfg.log_level, "serfer=trace,warn");
    }

    #[test]
    fn log_prefer_env_from_file_and_env() {
        let f = write_toml("[node]\nname = \"x\"\nlog_prefer_env = true\n");
        assert!(load_from(f.path(), &Overrides::default()).unwrap().log_prefer_env);

        let overrides = Overrides {
            log_prefer_env: Some("off".into()),
            ..Default::default()
        };
        assert!(!load_from(f.path(), &overrides).unwrap().log_prefer_env);

        let f = write_toml(MINIMAL_TOML);
        assert!(!load_from(f.path(), &Overrides::default()).unwrap().log_prefer_env);
    }

    #[test]
    fn invalid_log_prefer_env_rejected() {
        let f = write_toml(MINIMAL_TOML);
        let overrides = Overrides {
            log_prefer_env: Some("sometimes".into()),
            ..Default::default()
        };
        let msg = load_from(f.path(), &overrides).unwrap_err().to_string();
        assert!(msg.contains("SERFER_LOG_PREFER_ENV"));
    }

    #[test]
    fn env_log_file_override_expands_home() {
        let home = dirs::home_dir().expect("home dir must exist in test env");
        let f = write_toml(MINIMAL_TOML);
        let overrides = Overrides {
            log_file: Some("~/serfer.log".into()),
            ..Default::default()
        };
        let cfg = load_from(f.path(), &overrides).unwrap();
        assert_eq!(cfg.log_file, Some(home.join("serfer.log")));
    }

    #[test]
    fn absolute_path_unchanged() {
        assert_eq!(expand_home("/absolute/path"), PathBuf::from("/absolute/path"));
    }

    #[test]
    fn relative_path_unchanged() {
        assert_eq!(expand_home("relative/path"), PathBuf::from("relative/path"));
    }
}
