use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::autorange::{RangeCode, PROBE_RANGE};
use super::constants::{
    DEFAULT_BACKOFF_CAP_MS, DEFAULT_BACKOFF_START_MS, DEFAULT_CHANNEL_SETTLE_MS,
    DEFAULT_CYCLE_PAUSE_MS, DEFAULT_EXECUTE_TIMEOUT_MS, DEFAULT_INTERLEAVED_SCAN_WIDTH,
    DEFAULT_POLL_PERIOD_MS, DEFAULT_SCAN_POLL_MS, DEFAULT_SESSION_TIMEOUT_MS,
    DEFAULT_UDP_TIMEOUT_MS,
};
use super::error::ConfigError;
use super::instrument::Generation;
use super::poller::PollerSettings;
use super::saver::SaverSettings;
use super::scheduler::SchedulerSettings;
use super::store::is_valid_identifier;

/// SQL login. The password never appears in `Debug` output.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    /// Defaults to the chamber name when empty
    #[serde(default)]
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    /// Database name. The bundled SQLite backend uses it as the database file path.
    pub name: String,
    pub credentials: Option<Credentials>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SaverConfig {
    pub execute_timeout_ms: u64,
    pub backoff_start_ms: u64,
    pub backoff_cap_ms: u64,
    pub session_timeout_ms: u64,
}

impl Default for SaverConfig {
    fn default() -> Self {
        Self {
            execute_timeout_ms: DEFAULT_EXECUTE_TIMEOUT_MS,
            backoff_start_ms: DEFAULT_BACKOFF_START_MS,
            backoff_cap_ms: DEFAULT_BACKOFF_CAP_MS,
            session_timeout_ms: DEFAULT_SESSION_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub generation: Generation,
    pub channel_settle_ms: u64,
    pub cycle_pause_ms: u64,
    pub scan_poll_ms: u64,
    pub scan_range: RangeCode,
    pub interleaved_scan_width: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            generation: Generation::default(),
            channel_settle_ms: DEFAULT_CHANNEL_SETTLE_MS,
            cycle_pause_ms: DEFAULT_CYCLE_PAUSE_MS,
            scan_poll_ms: DEFAULT_SCAN_POLL_MS,
            scan_range: PROBE_RANGE,
            interleaved_scan_width: DEFAULT_INTERLEAVED_SCAN_WIDTH,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    pub period_ms: u64,
    pub udp_timeout_ms: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            period_ms: DEFAULT_POLL_PERIOD_MS,
            udp_timeout_ms: DEFAULT_UDP_TIMEOUT_MS,
        }
    }
}

/// Structure representing the deployment configuration of one chamber.
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub chamber: String,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub saver: SaverConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub pollers: PollerConfig,
    #[serde(default)]
    pub channel_list: Option<PathBuf>,
}

impl Default for Config {
    /// Generate a template Config. The chamber and credentials are placeholders.
    fn default() -> Self {
        Self {
            chamber: String::from("dummy"),
            database: DatabaseConfig {
                host: String::from("localhost"),
                name: String::from("lablogger.sqlite"),
                credentials: Some(Credentials {
                    username: String::from("dummy"),
                    password: String::from("dummy"),
                }),
            },
            saver: SaverConfig::default(),
            scheduler: SchedulerConfig::default(),
            pollers: PollerConfig::default(),
            channel_list: Some(PathBuf::from("channel_list.txt")),
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// Check everything that would otherwise fail half way through startup
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_identifier(&self.chamber) {
            return Err(ConfigError::InvalidChamber(self.chamber.clone()));
        }
        match &self.database.credentials {
            Some(credentials) if !credentials.password.is_empty() => Ok(()),
            _ => Err(ConfigError::MissingCredentials),
        }
    }

    /// The SQL user, falling back to the chamber name
    pub fn username(&self) -> &str {
        match &self.database.credentials {
            Some(credentials) if !credentials.username.is_empty() => &credentials.username,
            _ => &self.chamber,
        }
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.saver.session_timeout_ms)
    }

    pub fn saver_settings(&self) -> SaverSettings {
        SaverSettings {
            execute_timeout: Duration::from_millis(self.saver.execute_timeout_ms),
            backoff_start: Duration::from_millis(self.saver.backoff_start_ms),
            backoff_cap: Duration::from_millis(self.saver.backoff_cap_ms),
        }
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            channel_settle: Duration::from_millis(self.scheduler.channel_settle_ms),
            cycle_pause: Duration::from_millis(self.scheduler.cycle_pause_ms),
            scan_poll: Duration::from_millis(self.scheduler.scan_poll_ms),
            scan_range: self.scheduler.scan_range,
            interleaved_scan_width: self.scheduler.interleaved_scan_width,
        }
    }

    pub fn poller_settings(&self) -> PollerSettings {
        PollerSettings {
            period: Duration::from_millis(self.pollers.period_ms),
            udp_timeout: Duration::from_millis(self.pollers.udp_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.saver_settings().execute_timeout, Duration::from_secs(3));
        assert_eq!(config.poller_settings().period, Duration::from_secs(5));
        assert_eq!(
            config.scheduler_settings().channel_settle,
            Duration::from_millis(250)
        );
    }

    #[test]
    fn test_invalid_chamber() {
        let config = Config {
            chamber: String::from("tof; drop"),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidChamber(_))
        ));
    }

    #[test]
    fn test_missing_credentials() {
        let mut config = Config::default();
        config.database.credentials = None;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingCredentials)
        ));
    }

    #[test]
    fn test_username_falls_back_to_chamber() {
        let mut config = Config::default();
        config.chamber = String::from("microreactor");
        config.database.credentials = Some(Credentials {
            username: String::new(),
            password: String::from("secret"),
        });
        assert_eq!(config.username(), "microreactor");
    }

    #[test]
    fn test_debug_redacts_password() {
        let credentials = Credentials {
            username: String::from("stm312"),
            password: String::from("hunter2"),
        };
        let printed = format!("{credentials:?}");
        assert!(printed.contains("stm312"));
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn test_minimal_yaml() {
        let yaml = "\
chamber: stm312
database:
  host: servcinf
  name: cinfdata.sqlite
  credentials:
    password: pw
";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.username(), "stm312");
        assert_eq!(config.scheduler.generation, Generation::Qmg422);
        assert_eq!(config.channel_list, None);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Config::read_config_file(Path::new("/nonexistent/lablogger.yml")),
            Err(ConfigError::BadFilePath(_))
        ));
    }
}
