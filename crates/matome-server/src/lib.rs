//! Console demo server for matome.
//!
//! Reads `key: text` lines from stdin, runs each through the coalescing
//! coordinator with an echo model, and prints replies as `[key] chunk`.

pub mod console;
pub mod constants;
pub mod handler;

use std::path::{Path, PathBuf};

use matome_kernel::{ConfigError, MatomeConfig};

pub use console::{Command, ConsoleEvent, ConsoleTransport, parse_line};
pub use handler::{EventHandler, Outcome};

/// Pick the config file: `--config` first, then the environment.
pub fn config_path(flag: Option<PathBuf>, env: Option<String>) -> Option<PathBuf> {
    flag.or_else(|| env.filter(|p| !p.is_empty()).map(PathBuf::from))
}

/// Load the config at `path`, or the defaults when there is none.
pub fn load_config(path: Option<&Path>) -> Result<MatomeConfig, ConfigError> {
    match path {
        Some(path) => MatomeConfig::load(path),
        None => Ok(MatomeConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matome_kernel::InterruptPolicy;
    use std::io::Write;

    #[test]
    fn test_flag_beats_environment() {
        let path = config_path(Some("a.ron".into()), Some("b.ron".into()));
        assert_eq!(path, Some(PathBuf::from("a.ron")));

        let path = config_path(None, Some("b.ron".into()));
        assert_eq!(path, Some(PathBuf::from("b.ron")));

        assert_eq!(config_path(None, Some(String::new())), None);
    }

    #[test]
    fn test_load_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "(coalesce: (interrupt_policy: Abort), delivery: (chunk_limit: 100))"
        )
        .unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.coalesce.interrupt_policy, InterruptPolicy::Abort);
        assert_eq!(config.delivery.chunk_limit, 100);
        assert_eq!(config.activity.interval_ms, 3_000);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(&dir.path().join("absent.ron"))).is_err());
        assert!(load_config(None).is_ok());
    }
}
