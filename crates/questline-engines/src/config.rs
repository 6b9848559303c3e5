//! Configuration loading and typed config structures.
//!
//! The canonical configuration lives in `questline-config.yaml`. Every
//! section and field has a default, so an empty file (or no file at all when
//! the default path is used) yields a working configuration.

use std::path::{Path, PathBuf};

use questline_bus::AnalyticsConfig;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::rules::XpConfig;

/// Config file read when `QUESTLINE_CONFIG` is not set.
pub const DEFAULT_CONFIG_PATH: &str = "questline-config.yaml";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// The file that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level progression configuration.
///
/// Mirrors the structure of `questline-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ProgressionConfig {
    /// XP rules table.
    #[serde(default)]
    pub xp: XpConfig,

    /// Airdrop score weights, multipliers, and cap.
    #[serde(default)]
    pub airdrop: AirdropConfig,

    /// District lists referenced by achievement conditions.
    #[serde(default)]
    pub achievements: AchievementConfig,

    /// Analytics export.
    #[serde(default)]
    pub analytics: AnalyticsConfig,

    /// Session lifecycle timing.
    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    /// Snapshot persistence.
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl ProgressionConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if it contains invalid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.analytics.apply_env_overrides();
        Ok(config)
    }

    /// Load from `QUESTLINE_CONFIG` if set, otherwise from
    /// [`DEFAULT_CONFIG_PATH`].
    ///
    /// A missing file at the default path yields the defaults; a missing
    /// file named by the environment variable is an error.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a file exists but cannot be read or
    /// parsed, or if `QUESTLINE_CONFIG` names a file that does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var("QUESTLINE_CONFIG") {
            return Self::from_file(Path::new(&path));
        }
        let path = Path::new(DEFAULT_CONFIG_PATH);
        if path.exists() {
            Self::from_file(path)
        } else {
            Self::parse("")
        }
    }
}

/// Per-statistic weights of the airdrop score.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ScoreWeights {
    /// Weight per XP point.
    #[serde(default = "default_weight_xp")]
    pub xp: Decimal,

    /// Weight per unlocked achievement.
    #[serde(default = "default_weight_achievements")]
    pub achievements: Decimal,

    /// Weight per distinct district visited.
    #[serde(default = "default_weight_districts")]
    pub districts: Decimal,

    /// Weight per distinct parcel visited.
    #[serde(default = "default_weight_parcels")]
    pub parcels: Decimal,

    /// Weight per whole minute of ended sessions.
    #[serde(default = "default_weight_session_minutes")]
    pub session_minutes: Decimal,

    /// Weight per creator terminal use.
    #[serde(default = "default_weight_creator_terminal_uses")]
    pub creator_terminal_uses: Decimal,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            xp: default_weight_xp(),
            achievements: default_weight_achievements(),
            districts: default_weight_districts(),
            parcels: default_weight_parcels(),
            session_minutes: default_weight_session_minutes(),
            creator_terminal_uses: default_weight_creator_terminal_uses(),
        }
    }
}

/// Airdrop scoring parameters.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AirdropConfig {
    /// Per-statistic weights.
    #[serde(default)]
    pub weights: ScoreWeights,

    /// Applied when the wallet owns an on-chain profile.
    #[serde(default = "default_mainnet_profile_multiplier")]
    pub mainnet_profile_multiplier: Decimal,

    /// Applied when the wallet is enrolled in the beta program.
    #[serde(default = "default_beta_user_multiplier")]
    pub beta_user_multiplier: Decimal,

    /// Scores are clamped to this value.
    #[serde(default = "default_max_score")]
    pub max_score: Decimal,

    /// Minimum seconds between event-triggered recomputations.
    #[serde(default = "default_throttle_seconds")]
    pub throttle_seconds: u64,
}

impl Default for AirdropConfig {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            mainnet_profile_multiplier: default_mainnet_profile_multiplier(),
            beta_user_multiplier: default_beta_user_multiplier(),
            max_score: default_max_score(),
            throttle_seconds: default_throttle_seconds(),
        }
    }
}

/// District lists used by achievement conditions.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AchievementConfig {
    /// Every district in the world. `all_districts` is never satisfied when
    /// this is empty.
    #[serde(default = "default_districts")]
    pub districts: Vec<String>,

    /// Allow-list of landmark district ids.
    #[serde(default = "default_landmarks")]
    pub landmarks: Vec<String>,
}

impl Default for AchievementConfig {
    fn default() -> Self {
        Self {
            districts: default_districts(),
            landmarks: default_landmarks(),
        }
    }
}

/// Session lifecycle timing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LifecycleConfig {
    /// Milliseconds between gameplay ticks.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Seconds without movement or interaction before the session ends
    /// with reason `inactivity`. 0 disables the timeout.
    #[serde(default = "default_idle_timeout_seconds")]
    pub idle_timeout_seconds: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            idle_timeout_seconds: default_idle_timeout_seconds(),
        }
    }
}

/// Snapshot persistence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PersistenceConfig {
    /// Directory holding the snapshot file. Without one, state lives in
    /// memory only.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

const fn default_weight_xp() -> Decimal {
    Decimal::from_parts(1, 0, 0, false, 1)
}

const fn default_weight_achievements() -> Decimal {
    Decimal::from_parts(50, 0, 0, false, 0)
}

const fn default_weight_districts() -> Decimal {
    Decimal::from_parts(25, 0, 0, false, 0)
}

const fn default_weight_parcels() -> Decimal {
    Decimal::from_parts(2, 0, 0, false, 0)
}

const fn default_weight_session_minutes() -> Decimal {
    Decimal::from_parts(5, 0, 0, false, 1)
}

const fn default_weight_creator_terminal_uses() -> Decimal {
    Decimal::from_parts(10, 0, 0, false, 0)
}

const fn default_mainnet_profile_multiplier() -> Decimal {
    Decimal::from_parts(15, 0, 0, false, 1)
}

const fn default_beta_user_multiplier() -> Decimal {
    Decimal::from_parts(12, 0, 0, false, 1)
}

const fn default_max_score() -> Decimal {
    Decimal::from_parts(1_000_000, 0, 0, false, 0)
}

const fn default_throttle_seconds() -> u64 {
    30
}

fn default_districts() -> Vec<String> {
    [
        "genesis-plaza",
        "old-town",
        "harbor",
        "market-row",
        "creator-quarter",
        "skyline",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect()
}

fn default_landmarks() -> Vec<String> {
    ["genesis-plaza", "harbor", "skyline"]
        .into_iter()
        .map(str::to_owned)
        .collect()
}

const fn default_tick_interval_ms() -> u64 {
    10_000
}

const fn default_idle_timeout_seconds() -> u64 {
    900
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = ProgressionConfig::parse("").unwrap();
        assert_eq!(config.xp, XpConfig::default());
        assert_eq!(config.lifecycle.tick_interval_ms, 10_000);
        assert_eq!(config.analytics.max_queue, 1_000);
        assert_eq!(config.airdrop.throttle_seconds, 30);
        assert!(config.persistence.directory.is_none());
    }

    #[test]
    fn default_weights_have_expected_values() {
        let weights = ScoreWeights::default();
        assert_eq!(weights.xp, Decimal::new(1, 1));
        assert_eq!(weights.session_minutes, Decimal::new(5, 1));
        assert_eq!(
            AirdropConfig::default().mainnet_profile_multiplier,
            Decimal::new(15, 1)
        );
    }

    #[test]
    fn sections_override_independently() {
        let yaml = r"
xp:
  parcel_first_visit: 1
  max_xp_per_minute: 50
airdrop:
  max_score: 500
  weights:
    parcels: 3
achievements:
  landmarks: [harbor]
lifecycle:
  idle_timeout_seconds: 0
persistence:
  directory: /tmp/questline
";
        let config = ProgressionConfig::parse(yaml).unwrap();
        assert_eq!(config.xp.parcel_first_visit, 1);
        assert_eq!(config.xp.district_first_visit, 50);
        assert_eq!(config.airdrop.max_score, Decimal::new(500, 0));
        assert_eq!(config.airdrop.weights.parcels, Decimal::new(3, 0));
        assert_eq!(config.airdrop.weights.districts, Decimal::new(25, 0));
        assert_eq!(config.achievements.landmarks, vec!["harbor"]);
        assert_eq!(config.achievements.districts.len(), 6);
        assert_eq!(config.lifecycle.idle_timeout_seconds, 0);
        assert_eq!(
            config.persistence.directory,
            Some(PathBuf::from("/tmp/questline"))
        );
    }

    #[test]
    fn invalid_yaml_is_an_error() {
        assert!(matches!(
            ProgressionConfig::parse("xp: [unterminated"),
            Err(ConfigError::Yaml { .. })
        ));
    }
}
