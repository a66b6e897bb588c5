use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::external_load::ExternalLoadConfig;
use crate::internal_load::InternalLoadConfig;
use crate::logging::LogConfig;
use crate::pipeline::UserPipeline;
use crate::recalc::{BatchConfig, RecalculationOrchestrator};
use crate::rollout::RolloutPlan;
use crate::rolling::DecayConfig;
use crate::thresholds::TierTable;

/// Engine configuration, one TOML section per concern.
///
/// Every section is optional in the file; missing sections take built-in
/// defaults, so a config holding only `[rollout]` is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Configuration metadata
    pub metadata: ConfigMetadata,

    /// Acute/chronic half-lives and minimum history
    pub decay: DecayConfig,

    /// Heart rate weighting constants
    pub internal_load: InternalLoadConfig,

    /// Distance/elevation weighting
    pub external_load: ExternalLoadConfig,

    /// Per-tier thresholds keyed by tier name
    pub tiers: TierTable,

    /// Enhanced method rollout state
    pub rollout: RolloutPlan,

    /// Batch recalculation settings
    pub batch: BatchConfig,

    pub logging: LogConfig,
}

/// Configuration metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigMetadata {
    /// Configuration format version
    pub version: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last modification timestamp
    pub updated_at: DateTime<Utc>,
}

impl Default for ConfigMetadata {
    fn default() -> Self {
        let now = Utc::now();
        ConfigMetadata {
            version: "1.0".to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            metadata: ConfigMetadata::default(),
            decay: DecayConfig::default(),
            internal_load: InternalLoadConfig::default(),
            external_load: ExternalLoadConfig::default(),
            tiers: TierTable::builtin(),
            rollout: RolloutPlan::default(),
            batch: BatchConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| "Failed to parse TOML configuration")
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.metadata.updated_at = Utc::now();

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let toml_content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize configuration to TOML")?;

        fs::write(&path, toml_content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Get default configuration file path
    pub fn default_config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".trainrisk")
            .join("config.toml")
    }

    /// Load the file at `path`, or the default path, falling back to defaults
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let default_path = Self::default_config_path();
        let config_path = path.unwrap_or(&default_path);

        if !config_path.exists() {
            if path.is_some() {
                warn!(path = %config_path.display(), "Config file not found, using defaults");
            }
            return Self::default();
        }

        match Self::load_from_file(config_path) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %config_path.display(), error = %format!("{:#}", e), "Config file unreadable, using defaults");
                Self::default()
            }
        }
    }

    /// Pipeline built from the calculation sections
    pub fn pipeline(&self) -> UserPipeline {
        UserPipeline::new(
            self.decay.clone(),
            self.internal_load.clone(),
            self.external_load.clone(),
            self.tiers.clone(),
        )
    }

    pub fn orchestrator(&self) -> RecalculationOrchestrator {
        RecalculationOrchestrator::with_config(self.pipeline(), self.batch.clone())
    }
}
