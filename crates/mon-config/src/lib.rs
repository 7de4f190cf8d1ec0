//! Per-daemon file-based configuration.
//!
//! Each daemon reads a single JSON config file into a struct with matching
//! field names. Duration fields use `humantime_serde` rather than a
//! hand-rolled parser.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

fn default_workers() -> usize {
    25
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_wait() -> Duration {
    Duration::from_secs(30)
}

/// Configuration for the check-executor daemon (`moncheck`).
///
/// `checker_id` has no default: a daemon that doesn't know which worker
/// pool it belongs to cannot safely claim anything, so a missing
/// `checker_id` is a fatal startup error rather than a silent guess.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    pub db: String,

    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    #[serde(default = "default_wait", with = "humantime_serde")]
    pub wait: Duration,

    /// Directories prepended to each spawned check's PATH, in order.
    #[serde(default)]
    pub path: Vec<String>,

    pub checker_id: i32,
}

/// Configuration for the config-materializer daemon (`monwork`).
#[derive(Debug, Clone, Deserialize)]
pub struct MaterializerConfig {
    pub db: String,

    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

/// Read and parse a daemon config file, wrapping both failure modes with
/// the path so operators can tell a missing file from a malformed one.
pub fn load_json_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("could not read config: {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("could not parse config: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn executor_config_applies_defaults() {
        let f = write_temp(r#"{"db":"postgres://x","checker_id":7}"#);
        let cfg: ExecutorConfig = load_json_config(f.path()).unwrap();
        assert_eq!(cfg.db, "postgres://x");
        assert_eq!(cfg.checker_id, 7);
        assert_eq!(cfg.workers, 25);
        assert_eq!(cfg.timeout, Duration::from_secs(30));
        assert_eq!(cfg.wait, Duration::from_secs(30));
        assert!(cfg.path.is_empty());
    }

    #[test]
    fn executor_config_overrides_are_honored() {
        let f = write_temp(
            r#"{"db":"postgres://x","checker_id":1,"workers":4,"timeout":"5s","wait":"1m","path":["/usr/local/bin","/usr/bin"]}"#,
        );
        let cfg: ExecutorConfig = load_json_config(f.path()).unwrap();
        assert_eq!(cfg.workers, 4);
        assert_eq!(cfg.timeout, Duration::from_secs(5));
        assert_eq!(cfg.wait, Duration::from_secs(60));
        assert_eq!(cfg.path, vec!["/usr/local/bin", "/usr/bin"]);
    }

    #[test]
    fn executor_config_missing_checker_id_is_fatal() {
        let f = write_temp(r#"{"db":"postgres://x"}"#);
        let err = load_json_config::<ExecutorConfig>(f.path()).unwrap_err();
        assert!(format!("{err:#}").contains("checker_id"));
    }

    #[test]
    fn materializer_config_requires_interval() {
        let f = write_temp(r#"{"db":"postgres://x","interval":"30s"}"#);
        let cfg: MaterializerConfig = load_json_config(f.path()).unwrap();
        assert_eq!(cfg.interval, Duration::from_secs(30));
    }

    #[test]
    fn unreadable_path_is_a_context_wrapped_error() {
        let missing = Path::new("/nonexistent/mon-config-test.json");
        let err = load_json_config::<MaterializerConfig>(missing).unwrap_err();
        assert!(format!("{err:#}").contains("could not read config"));
    }
}
