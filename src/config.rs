use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Optional settings file; every field falls back to the built-in default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub api_url: Option<String>,
    pub token: Option<String>,
    pub limit: Option<u32>,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub measurement_timeout: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Option<Duration>,
    pub anycast_threshold_ms: Option<f64>,
    pub log_level: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("parsing config: {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Load `explicit` if given (it must exist), otherwise the per-user file if present.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(p) = explicit {
            return Self::load(p);
        }
        match default_path() {
            Some(p) if p.exists() => Self::load(&p),
            _ => Ok(Self::default()),
        }
    }
}

pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("geolocate").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_file() {
        let cfg = FileConfig::parse(
            r#"
            api_url = "https://example.test/v1/"
            token = "secret"
            limit = 80
            request_timeout = "10s"
            measurement_timeout = "3m"
            poll_interval = "500ms"
            anycast_threshold_ms = 5.0
            log_level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.api_url.as_deref(), Some("https://example.test/v1/"));
        assert_eq!(cfg.limit, Some(80));
        assert_eq!(cfg.request_timeout, Some(Duration::from_secs(10)));
        assert_eq!(cfg.measurement_timeout, Some(Duration::from_secs(180)));
        assert_eq!(cfg.poll_interval, Some(Duration::from_millis(500)));
        assert_eq!(cfg.anycast_threshold_ms, Some(5.0));
    }

    #[test]
    fn empty_file_is_all_defaults() {
        assert_eq!(FileConfig::parse("").unwrap(), FileConfig::default());
    }

    #[test]
    fn rejects_unknown_keys_and_bad_durations() {
        assert!(FileConfig::parse("limt = 5").is_err());
        assert!(FileConfig::parse("poll_interval = \"soon\"").is_err());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let missing = std::env::temp_dir().join("geolocate-no-such-config.toml");
        assert!(FileConfig::resolve(Some(&missing)).is_err());
    }

    #[test]
    fn explicit_file_is_loaded() {
        let path = std::env::temp_dir().join(format!(
            "geolocate-config-{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "limit = 12\n").unwrap();
        let cfg = FileConfig::resolve(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(cfg.limit, Some(12));
    }
}
