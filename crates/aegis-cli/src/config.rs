use std::{
    fs,
    path::{Path, PathBuf},
};

use aegis_storage::KdfParams;
use aegis_vault::{AuditRetention, LockoutPolicy, VaultOptions};
use chrono::Duration;
use color_eyre::Result;
use dirs::config_dir;
use serde::{Deserialize, Serialize};

/// User-level configuration loaded from `~/.config/aegis/config.toml` (platform-specific).
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct Config {
    /// Override for the data directory (encrypted store).
    pub data_dir: Option<PathBuf>,
    /// Default identity when `--user` is not given.
    pub user: Option<String>,
    /// PBKDF2 rounds; values below 310000 are rejected.
    pub kdf_iterations: Option<u32>,
    pub audit: Option<AuditConfig>,
    pub lockout: Option<LockoutConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct AuditConfig {
    /// Cap on retained audit events; 0 keeps everything.
    pub max_events: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct LockoutConfig {
    pub max_attempts: Option<u32>,
    pub lockout_minutes: Option<i64>,
    pub reset_minutes: Option<i64>,
}

impl Config {
    /// Library options with config overrides applied over the defaults.
    pub fn vault_options(&self) -> Result<VaultOptions> {
        let mut options = VaultOptions::default();
        if let Some(iterations) = self.kdf_iterations {
            options.kdf = KdfParams::new(iterations)?;
        }
        if let Some(max_events) = self.audit.as_ref().and_then(|a| a.max_events) {
            options.audit = AuditRetention {
                max_events: (max_events > 0).then_some(max_events),
            };
        }
        if let Some(lockout) = &self.lockout {
            let defaults = LockoutPolicy::default();
            options.lockout = LockoutPolicy {
                max_attempts: lockout.max_attempts.unwrap_or(defaults.max_attempts),
                lockout: lockout
                    .lockout_minutes
                    .map(Duration::minutes)
                    .unwrap_or(defaults.lockout),
                reset_window: lockout
                    .reset_minutes
                    .map(Duration::minutes)
                    .unwrap_or(defaults.reset_window),
            };
        }
        Ok(options)
    }
}

/// Load config from the default path; if missing, return defaults.
pub fn load() -> Result<Config> {
    let path = default_path()?;
    load_from_path(path)
}

/// Load config from a given path; if missing or empty, return defaults.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Config::default());
    }
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    let cfg: Config = toml::from_str(&contents)?;
    Ok(cfg)
}

/// Resolve the default config path (platform aware).
pub fn default_path() -> Result<PathBuf> {
    let base = config_dir().ok_or_else(|| color_eyre::eyre::eyre!("no config dir available"))?;
    Ok(base.join("aegis").join("config.toml"))
}

/// Write the given config unless a file already exists; never clobbers user edits.
pub fn write_default_if_missing(config: &Config) -> Result<PathBuf> {
    write_to_path_if_missing(config, &default_path()?)
}

fn write_to_path_if_missing(config: &Config, path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = toml::to_string_pretty(config)?;
    fs::write(path, body)?;
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_default_when_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = load_from_path(dir.path().join("config.toml")).expect("load");
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn parses_custom_config() {
        let contents = r#"
            data_dir = "/tmp/aegis-data"
            user = "ana@example.com"
            kdf_iterations = 600000
            [audit]
            max_events = 500
            [lockout]
            max_attempts = 3
            lockout_minutes = 60
        "#;
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, contents).expect("write temp config");

        let cfg = load_from_path(&path).expect("load");
        assert_eq!(
            cfg,
            Config {
                data_dir: Some(PathBuf::from("/tmp/aegis-data")),
                user: Some("ana@example.com".into()),
                kdf_iterations: Some(600_000),
                audit: Some(AuditConfig {
                    max_events: Some(500)
                }),
                lockout: Some(LockoutConfig {
                    max_attempts: Some(3),
                    lockout_minutes: Some(60),
                    reset_minutes: None,
                }),
            }
        );

        let options = cfg.vault_options().expect("options");
        assert_eq!(options.kdf.iterations(), 600_000);
        assert_eq!(options.audit.max_events, Some(500));
        assert_eq!(options.lockout.max_attempts, 3);
        assert_eq!(options.lockout.lockout, Duration::minutes(60));
        assert_eq!(options.lockout.reset_window, Duration::minutes(30));
    }

    #[test]
    fn weak_iteration_count_is_rejected() {
        let cfg = Config {
            kdf_iterations: Some(1_000),
            ..Config::default()
        };
        assert!(cfg.vault_options().is_err());
    }

    #[test]
    fn zero_max_events_means_unbounded() {
        let cfg = Config {
            audit: Some(AuditConfig {
                max_events: Some(0),
            }),
            ..Config::default()
        };
        assert_eq!(cfg.vault_options().expect("options").audit.max_events, None);
    }

    #[test]
    fn write_default_creates_file_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");
        let cfg = Config {
            data_dir: Some(PathBuf::from("/tmp/aegis-data")),
            ..Config::default()
        };

        write_to_path_if_missing(&cfg, &path).expect("write should succeed");
        let other = Config {
            user: Some("someone-else".into()),
            ..Config::default()
        };
        let second = write_to_path_if_missing(&other, &path).expect("second write ok");
        assert_eq!(second, path);
        let loaded: Config =
            toml::from_str(&fs::read_to_string(&path).expect("read")).expect("parse");
        assert_eq!(loaded, cfg);
    }
}
