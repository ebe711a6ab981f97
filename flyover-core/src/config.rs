//! Configuration file management for flyover.
//!
//! Reads/writes `~/.flyover/config.yaml` with feed, prediction, polling,
//! database, notification and ingest-server settings.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::FlyoverError;

/// Shortest accepted polling interval.
pub const MIN_POLL_INTERVAL_SECS: f64 = 1.0;

/// Full configuration structure.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub feed: FeedConfig,
    pub prediction: PredictionConfig,
    pub poll: PollConfig,
    pub database: DatabaseConfig,
    pub notify: NotifyConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedConfig {
    pub base_url: String,
    /// Fastest aircraft we expect to see; widens the feed query radius.
    pub max_speed_kts: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PredictionConfig {
    pub horizon_minutes: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollConfig {
    pub interval_secs: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotifyConfig {
    pub base_url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            feed: FeedConfig {
                base_url: "https://opendata.adsb.fi/api/v2".into(),
                max_speed_kts: 500.0,
            },
            prediction: PredictionConfig {
                horizon_minutes: 3.0,
            },
            poll: PollConfig {
                interval_secs: 60.0,
            },
            database: DatabaseConfig {
                path: "data/flyover.db".into(),
            },
            notify: NotifyConfig {
                base_url: "https://ntfy.sh".into(),
            },
            server: ServerConfig {
                host: "0.0.0.0".into(),
                port: 7878,
            },
        }
    }
}

impl Config {
    /// Reject settings the polling loop cannot work with.
    pub fn validate(&self) -> Result<(), FlyoverError> {
        let positive = |name: &str, v: f64| {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(FlyoverError::Config(format!("{name} must be positive, got {v}")))
            }
        };
        positive("prediction.horizon_minutes", self.prediction.horizon_minutes)?;
        positive("poll.interval_secs", self.poll.interval_secs)?;
        positive("feed.max_speed_kts", self.feed.max_speed_kts)?;

        let interval = self.poll.interval_secs;
        if interval < MIN_POLL_INTERVAL_SECS || Duration::try_from_secs_f64(interval).is_err() {
            return Err(FlyoverError::Config(format!(
                "poll.interval_secs must be between {MIN_POLL_INTERVAL_SECS} and a representable duration, got {interval}"
            )));
        }
        Ok(())
    }
}

/// Get the config directory path (`~/.flyover/`).
pub fn config_dir() -> PathBuf {
    dirs_home().join(".flyover")
}

/// Get the config file path.
pub fn config_file() -> PathBuf {
    config_dir().join("config.yaml")
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

/// Load config from `~/.flyover/config.yaml`.
///
/// Returns default config if the file doesn't exist.
pub fn load_config() -> Result<Config, FlyoverError> {
    load_config_from(&config_file())
}

/// Load config from an explicit path, falling back to defaults when the
/// file is absent.
pub fn load_config_from(path: &Path) -> Result<Config, FlyoverError> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let text = std::fs::read_to_string(path)?;
    let config = parse_config(&text);
    config.validate()?;
    Ok(config)
}

/// Save config to `~/.flyover/config.yaml`.
pub fn save_config(config: &Config) -> Result<PathBuf, FlyoverError> {
    let path = config_file();
    save_config_to(config, &path)?;
    Ok(path)
}

pub fn save_config_to(config: &Config, path: &Path) -> Result<(), FlyoverError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| FlyoverError::Config(e.to_string()))?;
    }
    std::fs::write(path, serialize_config(config))
        .map_err(|e| FlyoverError::Config(e.to_string()))
}

/// Parse simple YAML-like config text. Unknown keys are ignored.
fn parse_config(text: &str) -> Config {
    let mut config = Config::default();
    let mut current_section: Option<String> = None;

    for line in text.lines() {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }

        let is_indented = line.starts_with("  ") || line.starts_with('\t');
        let Some((key, val)) = stripped.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let val = val.trim();

        if !is_indented {
            current_section = val.is_empty().then(|| key.to_string());
            continue;
        }
        let Some(section) = current_section.as_deref() else {
            continue;
        };

        match (section, key) {
            ("feed", "base_url") => set_string(&mut config.feed.base_url, val),
            ("feed", "max_speed_kts") => set_float(&mut config.feed.max_speed_kts, val),
            ("prediction", "horizon_minutes") => {
                set_float(&mut config.prediction.horizon_minutes, val)
            }
            ("poll", "interval_secs") => set_float(&mut config.poll.interval_secs, val),
            ("database", "path") => set_string(&mut config.database.path, val),
            ("notify", "base_url") => set_string(&mut config.notify.base_url, val),
            ("server", "host") => set_string(&mut config.server.host, val),
            ("server", "port") => {
                if let Ok(v) = val.parse::<u16>() {
                    config.server.port = v;
                }
            }
            _ => {}
        }
    }

    config
}

fn set_string(slot: &mut String, val: &str) {
    if let Some(v) = parse_string_value(val) {
        *slot = v;
    }
}

fn set_float(slot: &mut f64, val: &str) {
    if let Some(v) = parse_float_value(val) {
        *slot = v;
    }
}

fn parse_string_value(val: &str) -> Option<String> {
    if val == "null" || val == "~" || val.is_empty() {
        return None;
    }
    // Strip quotes
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        return Some(val[1..val.len() - 1].to_string());
    }
    Some(val.to_string())
}

fn parse_float_value(val: &str) -> Option<f64> {
    if val == "null" || val == "~" || val.is_empty() {
        return None;
    }
    val.parse().ok()
}

/// Serialize config to YAML-like text.
fn serialize_config(config: &Config) -> String {
    let lines = [
        "# flyover configuration".to_string(),
        String::new(),
        "feed:".into(),
        format!("  base_url: \"{}\"", config.feed.base_url),
        format!("  max_speed_kts: {}", config.feed.max_speed_kts),
        String::new(),
        "prediction:".into(),
        format!("  horizon_minutes: {}", config.prediction.horizon_minutes),
        String::new(),
        "poll:".into(),
        format!("  interval_secs: {}", config.poll.interval_secs),
        String::new(),
        "database:".into(),
        format!("  path: \"{}\"", config.database.path),
        String::new(),
        "notify:".into(),
        format!("  base_url: \"{}\"", config.notify.base_url),
        String::new(),
        "server:".into(),
        format!("  host: \"{}\"", config.server.host),
        format!("  port: {}", config.server.port),
    ];
    lines.join("\n") + "\n"
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.prediction.horizon_minutes, 3.0);
        assert_eq!(config.poll.interval_secs, 60.0);
        assert_eq!(config.feed.max_speed_kts, 500.0);
        assert_eq!(config.server.port, 7878);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let text = r#"
feed:
  base_url: "http://localhost:9000/v2"
  max_speed_kts: 600

prediction:
  horizon_minutes: 4.5

poll:
  interval_secs: 30

database:
  path: "/tmp/flyover-test.db"

notify:
  base_url: 'https://ntfy.example.org'

server:
  host: "127.0.0.1"
  port: 9090
"#;
        let config = parse_config(text);
        assert_eq!(config.feed.base_url, "http://localhost:9000/v2");
        assert_eq!(config.feed.max_speed_kts, 600.0);
        assert_eq!(config.prediction.horizon_minutes, 4.5);
        assert_eq!(config.poll.interval_secs, 30.0);
        assert_eq!(config.database.path, "/tmp/flyover-test.db");
        assert_eq!(config.notify.base_url, "https://ntfy.example.org");
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9090);
    }

    #[test]
    fn test_parse_config_partial_and_null() {
        let text = r#"
# only the poll rate
poll:
  interval_secs: ~
prediction:
  horizon_minutes: 2
unknown:
  thing: 1
"#;
        let config = parse_config(text);
        assert_eq!(config.poll.interval_secs, 60.0);
        assert_eq!(config.prediction.horizon_minutes, 2.0);
        assert_eq!(config.database.path, "data/flyover.db");
    }

    #[test]
    fn test_validate_rejects_non_positive() {
        let mut config = Config::default();
        config.poll.interval_secs = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.prediction.horizon_minutes = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unusable_interval() {
        let mut config = Config::default();
        config.poll.interval_secs = 1e20;
        assert!(config.validate().is_err());

        config.poll.interval_secs = 1e-10;
        assert!(config.validate().is_err());

        config.poll.interval_secs = 0.5;
        assert!(config.validate().is_err());

        config.poll.interval_secs = f64::INFINITY;
        assert!(config.validate().is_err());

        config.poll.interval_secs = MIN_POLL_INTERVAL_SECS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let mut config = Config::default();
        config.poll.interval_secs = 45.0;
        config.notify.base_url = "https://push.example.com".into();
        save_config_to(&config, &path).unwrap();

        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_config_from(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(loaded, Config::default());
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "poll:\n  interval_secs: -5\n").unwrap();
        assert!(load_config_from(&path).is_err());
    }
}
