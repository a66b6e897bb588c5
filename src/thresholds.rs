//! Per-user risk tiers and the numeric cutoffs they map to
//!
//! Tiers come from the profile service as free-form names and their numbers
//! come from the configuration store. Neither source is trusted to be
//! complete: unknown names resolve to [`RiskTier::Balanced`] and missing
//! numbers resolve to the built-in value for the tier, each with a warning.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::rolling::DecayConfig;

/// Risk tolerance tier chosen by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Conservative,
    Balanced,
    Aggressive,
}

impl Default for RiskTier {
    fn default() -> Self {
        RiskTier::Balanced
    }
}

impl RiskTier {
    pub const ALL: [RiskTier; 3] = [
        RiskTier::Conservative,
        RiskTier::Balanced,
        RiskTier::Aggressive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Conservative => "conservative",
            RiskTier::Balanced => "balanced",
            RiskTier::Aggressive => "aggressive",
        }
    }

    /// Resolve a tier name from the profile service.
    ///
    /// Absent names quietly use the default tier; unrecognised names use it too
    /// but are logged, since they indicate drift between services.
    pub fn resolve(name: Option<&str>) -> RiskTier {
        match name {
            None => RiskTier::default(),
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!(
                    tier = raw,
                    fallback = RiskTier::default().as_str(),
                    "Unknown risk tier, using default"
                );
                RiskTier::default()
            }),
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "conservative" => Ok(RiskTier::Conservative),
            "balanced" | "moderate" => Ok(RiskTier::Balanced),
            "aggressive" => Ok(RiskTier::Aggressive),
            _ => Err(format!("Invalid risk tier: {}", s)),
        }
    }
}

/// Fully resolved thresholds for one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserThresholdConfig {
    /// Tier these numbers were resolved for
    pub tier: RiskTier,

    /// ACWR below this is treated as detraining
    pub acwr_undertrained: Decimal,

    /// Upper edge of the optimal ACWR band
    pub acwr_optimal_max: Decimal,

    /// External ACWR at or above this is high risk on its own
    pub acwr_high_risk: Decimal,

    /// |divergence| at or above this is worth flagging
    pub divergence_caution: Decimal,

    /// |divergence| at or above this is a strong imbalance
    pub divergence_high: Decimal,

    /// Consecutive training days after which a rest day is due
    pub max_days_rest: u16,

    /// Decay constants used by the rolling-ratio engine for this user
    pub decay: DecayConfig,
}

impl UserThresholdConfig {
    /// Built-in thresholds for a tier
    pub fn for_tier(tier: RiskTier) -> Self {
        let decay = DecayConfig::default();
        match tier {
            RiskTier::Conservative => UserThresholdConfig {
                tier,
                acwr_undertrained: dec!(0.8),
                acwr_optimal_max: dec!(1.2),
                acwr_high_risk: dec!(1.4),
                divergence_caution: dec!(0.10),
                divergence_high: dec!(0.25),
                max_days_rest: 5,
                decay,
            },
            RiskTier::Balanced => UserThresholdConfig {
                tier,
                acwr_undertrained: dec!(0.8),
                acwr_optimal_max: dec!(1.3),
                acwr_high_risk: dec!(1.5),
                divergence_caution: dec!(0.15),
                divergence_high: dec!(0.30),
                max_days_rest: 6,
                decay,
            },
            RiskTier::Aggressive => UserThresholdConfig {
                tier,
                acwr_undertrained: dec!(0.8),
                acwr_optimal_max: dec!(1.4),
                acwr_high_risk: dec!(1.7),
                divergence_caution: dec!(0.20),
                divergence_high: dec!(0.40),
                max_days_rest: 7,
                decay,
            },
        }
    }

    /// Sanity-check the cutoffs are ordered; returns a description of the first problem
    pub fn validate(&self) -> Result<(), String> {
        if self.acwr_undertrained >= self.acwr_optimal_max {
            return Err("acwr_undertrained must be below acwr_optimal_max".to_string());
        }
        if self.acwr_optimal_max >= self.acwr_high_risk {
            return Err("acwr_optimal_max must be below acwr_high_risk".to_string());
        }
        if self.divergence_caution <= Decimal::ZERO
            || self.divergence_caution >= self.divergence_high
        {
            return Err("divergence_caution must be positive and below divergence_high".to_string());
        }
        Ok(())
    }
}

impl Default for UserThresholdConfig {
    fn default() -> Self {
        Self::for_tier(RiskTier::default())
    }
}

/// Tier entry as it appears in the configuration store; every field optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TierOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acwr_undertrained: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acwr_optimal_max: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acwr_high_risk: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub divergence_caution: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub divergence_high: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_days_rest: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acute_half_life_days: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chronic_half_life_days: Option<f64>,
}

impl TierOverrides {
    /// Full set of values for a tier, useful when writing a starter config
    pub fn from_resolved(config: &UserThresholdConfig) -> Self {
        TierOverrides {
            acwr_undertrained: Some(config.acwr_undertrained),
            acwr_optimal_max: Some(config.acwr_optimal_max),
            acwr_high_risk: Some(config.acwr_high_risk),
            divergence_caution: Some(config.divergence_caution),
            divergence_high: Some(config.divergence_high),
            max_days_rest: Some(config.max_days_rest),
            acute_half_life_days: Some(config.decay.acute_half_life_days),
            chronic_half_life_days: Some(config.decay.chronic_half_life_days),
        }
    }
}

/// Table of tier thresholds keyed by tier name, as loaded from configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TierTable {
    pub tiers: HashMap<String, TierOverrides>,
}

/// Fill one missing threshold, logging which fallback fired
fn fill<T: Copy + fmt::Debug>(tier: RiskTier, field: &'static str, value: Option<T>, default: T) -> T {
    match value {
        Some(v) => v,
        None => {
            warn!(
                tier = tier.as_str(),
                field,
                default = ?default,
                "Missing threshold in configuration, using built-in value"
            );
            default
        }
    }
}

impl TierTable {
    /// Table holding every built-in tier in full
    pub fn builtin() -> Self {
        let tiers = RiskTier::ALL
            .iter()
            .map(|tier| {
                (
                    tier.as_str().to_string(),
                    TierOverrides::from_resolved(&UserThresholdConfig::for_tier(*tier)),
                )
            })
            .collect();
        TierTable { tiers }
    }

    /// Resolve the thresholds for a tier name.
    ///
    /// `decay` supplies the engine-wide decay defaults; a tier entry may
    /// override the half-lives. A tier with no entry at all uses the
    /// built-in numbers silently; partial entries warn per missing field.
    pub fn resolve(&self, tier_name: Option<&str>, decay: &DecayConfig) -> UserThresholdConfig {
        let tier = RiskTier::resolve(tier_name);
        let mut builtin = UserThresholdConfig::for_tier(tier);
        builtin.decay = decay.clone().sanitized();

        let Some(entry) = self.tiers.get(tier.as_str()) else {
            return builtin;
        };

        let mut resolved = UserThresholdConfig {
            tier,
            acwr_undertrained: fill(tier, "acwr_undertrained", entry.acwr_undertrained, builtin.acwr_undertrained),
            acwr_optimal_max: fill(tier, "acwr_optimal_max", entry.acwr_optimal_max, builtin.acwr_optimal_max),
            acwr_high_risk: fill(tier, "acwr_high_risk", entry.acwr_high_risk, builtin.acwr_high_risk),
            divergence_caution: fill(tier, "divergence_caution", entry.divergence_caution, builtin.divergence_caution),
            divergence_high: fill(tier, "divergence_high", entry.divergence_high, builtin.divergence_high),
            max_days_rest: fill(tier, "max_days_rest", entry.max_days_rest, builtin.max_days_rest),
            decay: DecayConfig {
                acute_half_life_days: entry
                    .acute_half_life_days
                    .unwrap_or(decay.acute_half_life_days),
                chronic_half_life_days: entry
                    .chronic_half_life_days
                    .unwrap_or(decay.chronic_half_life_days),
                min_history_days: decay.min_history_days,
            }
            .sanitized(),
        };

        if let Err(problem) = resolved.validate() {
            warn!(
                tier = tier.as_str(),
                problem = problem.as_str(),
                "Configured thresholds are inconsistent, using built-in values"
            );
            resolved = builtin;
        }

        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_parsing() {
        assert_eq!("Conservative".parse::<RiskTier>().unwrap(), RiskTier::Conservative);
        assert_eq!(" aggressive ".parse::<RiskTier>().unwrap(), RiskTier::Aggressive);
        assert!("reckless".parse::<RiskTier>().is_err());
    }

    #[test]
    fn test_unknown_tier_falls_back_to_balanced() {
        assert_eq!(RiskTier::resolve(Some("reckless")), RiskTier::Balanced);
        assert_eq!(RiskTier::resolve(None), RiskTier::Balanced);
    }

    #[test]
    fn test_builtin_tiers_are_valid_and_ordered() {
        for tier in RiskTier::ALL {
            assert!(UserThresholdConfig::for_tier(tier).validate().is_ok());
        }

        let conservative = UserThresholdConfig::for_tier(RiskTier::Conservative);
        let aggressive = UserThresholdConfig::for_tier(RiskTier::Aggressive);
        assert!(conservative.acwr_high_risk < aggressive.acwr_high_risk);
        assert!(conservative.divergence_caution < aggressive.divergence_caution);
    }

    #[test]
    fn test_missing_threshold_uses_builtin_value() {
        let mut table = TierTable::default();
        table.tiers.insert(
            "balanced".to_string(),
            TierOverrides {
                acwr_high_risk: Some(dec!(1.6)),
                ..TierOverrides::default()
            },
        );

        let resolved = table.resolve(Some("balanced"), &DecayConfig::default());
        assert_eq!(resolved.acwr_high_risk, dec!(1.6));
        assert_eq!(resolved.acwr_optimal_max, dec!(1.3));
        assert_eq!(resolved.divergence_caution, dec!(0.15));
    }

    #[test]
    fn test_inconsistent_thresholds_rejected() {
        let mut table = TierTable::default();
        table.tiers.insert(
            "aggressive".to_string(),
            TierOverrides {
                acwr_optimal_max: Some(dec!(2.0)),
                ..TierOverrides::default()
            },
        );

        let resolved = table.resolve(Some("aggressive"), &DecayConfig::default());
        assert_eq!(resolved, UserThresholdConfig::for_tier(RiskTier::Aggressive));
    }

    #[test]
    fn test_tier_half_life_override() {
        let mut table = TierTable::default();
        table.tiers.insert(
            "conservative".to_string(),
            TierOverrides {
                acute_half_life_days: Some(5.0),
                ..TierOverrides::from_resolved(&UserThresholdConfig::for_tier(RiskTier::Conservative))
            },
        );

        let resolved = table.resolve(Some("conservative"), &DecayConfig::default());
        assert_eq!(resolved.decay.acute_half_life_days, 5.0);
        assert_eq!(resolved.decay.chronic_half_life_days, 28.0);
    }

    #[test]
    fn test_builtin_table_round_trip() {
        let table = TierTable::builtin();
        for tier in RiskTier::ALL {
            let resolved = table.resolve(Some(tier.as_str()), &DecayConfig::default());
            assert_eq!(resolved, UserThresholdConfig::for_tier(tier));
        }
    }
}
