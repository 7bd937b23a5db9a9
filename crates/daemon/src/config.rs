//! Configuration for wardend

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use warden_enrollment::{
    DEFAULT_CACHE_CAPACITY, DEFAULT_CLOCK_SKEW_SECS, DEFAULT_VALIDITY_DAYS,
};
use warden_flow_engine::EngineConfig;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Flow engine configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Enrolment configuration
    #[serde(default)]
    pub enrollment: EnrollmentConfig,

    /// Flow state persistence
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Enrolment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentConfig {
    /// Recently enrolled clients remembered for deduplication
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Session id agents send their CSRs to
    #[serde(default = "default_well_known_session")]
    pub well_known_session: String,

    /// How far back certificates are dated to tolerate client clock skew
    #[serde(default = "default_clock_skew")]
    pub clock_skew_secs: i64,

    /// Certificate lifetime
    #[serde(default = "default_validity_days")]
    pub validity_days: i64,

    /// Hex-encoded CA key seed. Absent means a throwaway key per run.
    #[serde(default)]
    pub ca_key_path: Option<PathBuf>,

    /// Common name of the CA certificate
    #[serde(default = "default_ca_name")]
    pub ca_name: String,
}

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self {
            cache_capacity: default_cache_capacity(),
            well_known_session: default_well_known_session(),
            clock_skew_secs: default_clock_skew(),
            validity_days: default_validity_days(),
            ca_key_path: None,
            ca_name: default_ca_name(),
        }
    }
}

/// Flow state persistence configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Flow journal file. Absent keeps flow state in memory only.
    #[serde(default)]
    pub journal_path: Option<PathBuf>,

    /// fsync the journal after every write
    #[serde(default)]
    pub sync: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

fn default_well_known_session() -> String {
    "CA:Enrol".to_string()
}

fn default_clock_skew() -> i64 {
    DEFAULT_CLOCK_SKEW_SECS
}

fn default_validity_days() -> i64 {
    DEFAULT_VALIDITY_DAYS
}

fn default_ca_name() -> String {
    "Warden CA".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration: defaults, then the optional file, then
    /// `WARDEN_`-prefixed environment variables.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        // WARDEN_ENGINE__MAX_RETRIES=5
        builder = builder.add_source(
            config::Environment::with_prefix("WARDEN")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.engine, EngineConfig::default());
        assert_eq!(config.enrollment.cache_capacity, 500);
        assert_eq!(config.enrollment.well_known_session, "CA:Enrol");
        assert_eq!(config.enrollment.clock_skew_secs, 10);
        assert_eq!(config.enrollment.validity_days, 365);
        assert!(config.persistence.journal_path.is_none());
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let config: DaemonConfig = serde_json::from_str(
            r#"{"enrollment": {"cache_capacity": 8}, "persistence": {"journal_path": "/tmp/flows"}}"#,
        )
        .unwrap();
        assert_eq!(config.enrollment.cache_capacity, 8);
        assert_eq!(config.enrollment.well_known_session, "CA:Enrol");
        assert_eq!(
            config.persistence.journal_path,
            Some(PathBuf::from("/tmp/flows"))
        );
        assert_eq!(config.engine.max_retries, 3);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wardend.toml");
        std::fs::write(
            &path,
            "[engine]\nreply_timeout_secs = 60\n\n[logging]\njson = true\n",
        )
        .unwrap();

        let config = DaemonConfig::load(path.to_str()).unwrap();
        assert_eq!(config.engine.reply_timeout_secs, 60);
        assert_eq!(config.engine.max_retries, 3);
        assert!(config.logging.json);
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = DaemonConfig::load(None).unwrap();
        assert_eq!(config.enrollment.ca_name, "Warden CA");
    }
}
