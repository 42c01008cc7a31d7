//! Logging initialisation via tracing-subscriber.
//!
//! Call [`init`] once at startup, after config is resolved.  Output goes to
//! stderr (or a file) because stdout carries query responses.

use std::env;
use std::path::Path;

use tracing::Subscriber;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::Config;
use crate::error::AppError;

/// Initialise the global tracing subscriber from `config`.
///
/// `config.log_level` is a full `EnvFilter` directive string, so both `"debug"`
/// and `"serfer=debug,info"` are accepted.  With `config.log_prefer_env` set,
/// a valid `RUST_LOG` replaces it.
pub fn init(config: &Config) -> Result<(), AppError> {
    subscriber(config)?
        .try_init()
        .map_err(|e| AppError::Logger(format!("failed to set subscriber: {e}")))
}

fn subscriber(config: &Config) -> Result<impl Subscriber + Send + Sync + 'static, AppError> {
    let rust_log = if config.log_prefer_env {
        env::var("RUST_LOG").ok()
    } else {
        None
    };
    let filter = filter(&config.log_level, rust_log.as_deref())?;
    let log_file = config.log_file.as_deref();

    Ok(tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer(log_file)?)
        .with_ansi(log_file.is_none())
        .finish())
}

/// Build the filter: `rust_log` when it parses, otherwise `directives`.
///
/// An unparsable `rust_log` is ignored; unparsable `directives` are an error.
pub fn filter(directives: &str, rust_log: Option<&str>) -> Result<EnvFilter, AppError> {
    if let Some(filter) = rust_log.and_then(|env| EnvFilter::try_new(env).ok()) {
        return Ok(filter);
    }
    EnvFilter::try_new(directives)
        .map_err(|e| AppError::Logger(format!("invalid log level '{directives}': {e}")))
}

fn writer(log_file: Option<&Path>) -> Result<BoxMakeWriter, AppError> {
    let Some(path) = log_file else {
        return Ok(BoxMakeWriter::new(std::io::stderr));
    };
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| {
            AppError::Logger(format!("failed to open log file '{}': {e}", path.display()))
        })?;
    Ok(BoxMakeWriter::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceConfig;

    fn config(log_level: &str) -> Config {
        Config {
            node_name: "test".into(),
            log_level: log_level.into(),
            log_prefer_env: false,
            log_file: None,
            source: SourceConfig { buffer: 1 },
        }
    }

    #[test]
    fn levels_and_directives_accepted() {
        for l in ["error", "warn", "info", "debug", "trace", "serfer=debug,info"] {
            assert!(filter(l, None).is_ok(), "expected '{l}' to be valid");
        }
    }

    #[test]
    fn invalid_directives_error() {
        match filter("serfer=verbose", None) {
            Err(AppError::Logger(msg)) => assert!(msg.contains("serfer=verbose")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn valid_rust_log_wins() {
        let f = filter("warn", Some("serfer=trace")).unwrap();
        assert!(f.to_string().contains("serfer=trace"));
    }

    #[test]
    fn invalid_rust_log_falls_back_to_directives() {
        let f = filter("warn", Some("serfer=verbose")).unwrap().to_string();
        assert!(f.contains("warn") && !f.contains("serfer"));
    }

    #[test]
    fn unopenable_log_file_errors() {
        let mut cfg = config("info");
        cfg.log_file = Some("/nonexistent/dir/serfer.log".into());
        match init(&cfg) {
            Err(AppError::Logger(msg)) => assert!(msg.contains("log file")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn log_file_gets_plain_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("serfer.log");
        let mut cfg = config("info");
        cfg.log_file = Some(path.clone());

        tracing::subscriber::with_default(subscriber(&cfg).unwrap(), || {
            tracing::info!(query_id = 42, "query released unanswered");
        });

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("query released unanswered"));
        assert!(written.contains("query_id=42"));
        assert!(!written.contains('\x1b'));
    }

    #[test]
    fn init_info_succeeds_or_already_init() {
        // May already be set by a prior test in the same process; both outcomes are fine.
        match init(&config("info")) {
            Ok(()) => {}
            Err(AppError::Logger(msg)) if msg.contains("set subscriber") => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
}
