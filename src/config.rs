//! Daemon configuration.
//!
//! Loaded from `.kestrel/config.toml`, discovered by walking up from the
//! working directory. Defaults apply when no file exists.
//!
//! ```toml
//! [monitor]
//! poll_interval_ms = 2000
//! max_retries = 3
//! auto_restart = true
//!
//! [registry]
//! path = ".kestrel/sessions.json"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::monitor::MonitorConfig;

const CONFIG_DIR: &str = ".kestrel";
const CONFIG_FILENAME: &str = "config.toml";

#[derive(Debug, Deserialize)]
pub struct MonitorSection {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_auto_restart")]
    pub auto_restart: bool,
}

#[derive(Debug, Deserialize)]
pub struct RegistrySection {
    #[serde(default = "default_registry_path")]
    pub path: PathBuf,
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_max_retries() -> u32 {
    3
}

fn default_auto_restart() -> bool {
    true
}

fn default_registry_path() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("sessions.json")
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_retries: default_max_retries(),
            auto_restart: default_auto_restart(),
        }
    }
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            path: default_registry_path(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub monitor: MonitorSection,
    #[serde(default)]
    pub registry: RegistrySection,
}

impl DaemonConfig {
    /// Search upward from `start` for `.kestrel/config.toml` and load it.
    /// Returns the default config if no file is found.
    pub fn load(start: &Path) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = Self::find_config_file(start) {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let config: DaemonConfig = toml::from_str(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            Ok((config, Some(path)))
        } else {
            Ok((DaemonConfig::default(), None))
        }
    }

    fn find_config_file(start: &Path) -> Option<PathBuf> {
        let mut dir = start.to_path_buf();
        loop {
            let candidate = dir.join(CONFIG_DIR).join(CONFIG_FILENAME);
            if candidate.is_file() {
                return Some(candidate);
            }
            if !dir.pop() {
                return None;
            }
        }
    }

    /// Engine configuration with out-of-range values clamped.
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            poll_interval: Duration::from_millis(self.monitor.poll_interval_ms),
            max_retries: self.monitor.max_retries,
            auto_restart: self.monitor.auto_restart,
            ..MonitorConfig::default()
        }
        .clamped()
    }

    /// Registry path resolved against `base` when relative.
    pub fn registry_path(&self, base: &Path) -> PathBuf {
        if self.registry.path.is_absolute() {
            self.registry.path.clone()
        } else {
            base.join(&self.registry.path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn default_config_values() {
        let config = DaemonConfig::default();
        assert_eq!(config.monitor.poll_interval_ms, 2000);
        assert_eq!(config.monitor.max_retries, 3);
        assert!(config.monitor.auto_restart);
        assert_eq!(config.registry.path, default_registry_path());
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[monitor]
poll_interval_ms = 500
max_retries = 5
auto_restart = false

[registry]
path = "/var/lib/kestrel/sessions.json"
"#;
        let config: DaemonConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.monitor.poll_interval_ms, 500);
        assert_eq!(config.monitor.max_retries, 5);
        assert!(!config.monitor.auto_restart);
        assert!(config.registry.path.is_absolute());
    }

    #[test]
    fn parse_partial_config_keeps_defaults() {
        let toml = r#"
[monitor]
max_retries = 7
"#;
        let config: DaemonConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.monitor.poll_interval_ms, 2000);
        assert_eq!(config.monitor.max_retries, 7);
    }

    #[test]
    fn monitor_config_clamps_low_values() {
        let toml = r#"
[monitor]
poll_interval_ms = 50
max_retries = 0
"#;
        let config: DaemonConfig = toml::from_str(toml).unwrap();
        let monitor = config.monitor_config();
        assert_eq!(monitor.poll_interval, Duration::from_millis(250));
        assert_eq!(monitor.max_retries, 1);
    }

    #[test]
    fn load_walks_up_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join(CONFIG_DIR);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join(CONFIG_FILENAME),
            "[monitor]\npoll_interval_ms = 750\n",
        )
        .unwrap();

        let nested = tmp.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();

        let (config, path) = DaemonConfig::load(&nested).unwrap();
        assert!(path.is_some());
        assert_eq!(config.monitor.poll_interval_ms, 750);
    }

    #[test]
    fn load_returns_default_when_no_file() {
        let tmp = tempfile::tempdir().unwrap();
        let (config, path) = DaemonConfig::load(tmp.path()).unwrap();
        assert!(path.is_none());
        assert_eq!(config.monitor.poll_interval_ms, 2000);
    }

    #[test]
    fn registry_path_resolution() {
        let config = DaemonConfig::default();
        let resolved = config.registry_path(Path::new("/work"));
        assert_eq!(resolved, Path::new("/work/.kestrel/sessions.json"));
    }
}
