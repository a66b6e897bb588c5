use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::Activity;

/// External load model constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalLoadConfig {
    /// Flat-distance kilometres added per metre of climbing
    pub elevation_weight: Decimal,
}

impl Default for ExternalLoadConfig {
    fn default() -> Self {
        ExternalLoadConfig {
            // 100 m of climbing costs about as much as 1 km on the flat
            elevation_weight: dec!(0.01),
        }
    }
}

/// External load of one activity plus what was missing when it was computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalLoad {
    pub load: Decimal,
    pub missing_distance: bool,
}

/// Converts distance and elevation into a mechanical demand scalar.
///
/// `load = distance_km + elevation_gain_m × elevation_weight`, with negative
/// or missing inputs counted as zero. Monotonic in both inputs.
#[derive(Debug, Clone, Default)]
pub struct ExternalLoadEstimator {
    config: ExternalLoadConfig,
}

impl ExternalLoadEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ExternalLoadConfig) -> Self {
        let elevation_weight = config.elevation_weight.max(Decimal::ZERO);
        ExternalLoadEstimator {
            config: ExternalLoadConfig { elevation_weight },
        }
    }

    pub fn load(&self, distance_km: Decimal, elevation_gain_m: Decimal) -> Decimal {
        distance_km.max(Decimal::ZERO) + elevation_gain_m.max(Decimal::ZERO) * self.config.elevation_weight
    }

    pub fn estimate(&self, activity: &Activity) -> ExternalLoad {
        if activity.distance_km.is_none() {
            debug!(activity = activity.id.as_str(), "No distance recorded, counting as zero");
        }

        ExternalLoad {
            load: self.load(
                activity.distance_km.unwrap_or(Decimal::ZERO),
                activity.elevation_gain_m.unwrap_or(Decimal::ZERO),
            ),
            missing_distance: activity.distance_km.is_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Sport;
    use chrono::NaiveDate;

    fn activity(distance: Option<Decimal>, elevation: Option<Decimal>) -> Activity {
        Activity {
            id: "ext".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            sport: Sport::TrailRunning,
            duration_seconds: 3600,
            distance_km: distance,
            elevation_gain_m: elevation,
            hr_samples: None,
            avg_hr: None,
        }
    }

    #[test]
    fn test_distance_plus_weighted_elevation() {
        let estimator = ExternalLoadEstimator::new();
        let result = estimator.estimate(&activity(Some(dec!(5)), Some(dec!(50))));
        assert_eq!(result.load, dec!(5.5));
        assert!(!result.missing_distance);
    }

    #[test]
    fn test_missing_inputs_count_as_zero() {
        let estimator = ExternalLoadEstimator::new();
        let result = estimator.estimate(&activity(None, Some(dec!(200))));
        assert_eq!(result.load, dec!(2));
        assert!(result.missing_distance);

        assert_eq!(estimator.estimate(&activity(None, None)).load, Decimal::ZERO);
    }

    #[test]
    fn test_negative_inputs_clamped() {
        let estimator = ExternalLoadEstimator::new();
        assert_eq!(estimator.load(dec!(-3), dec!(-100)), Decimal::ZERO);
    }

    #[test]
    fn test_custom_elevation_weight() {
        let estimator = ExternalLoadEstimator::with_config(ExternalLoadConfig {
            elevation_weight: dec!(0.02),
        });
        assert_eq!(estimator.load(dec!(10), dec!(100)), dec!(12));
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_monotonic_in_both_inputs(
            d in 0u32..100_000u32,
            e in 0u32..5_000u32,
            dd in 0u32..1_000u32,
            de in 0u32..1_000u32,
        ) {
            let estimator = ExternalLoadEstimator::new();
            let distance = Decimal::new(d as i64, 3);
            let elevation = Decimal::from(e);
            let base = estimator.load(distance, elevation);

            prop_assert!(estimator.load(distance + Decimal::new(dd as i64, 3), elevation) >= base);
            prop_assert!(estimator.load(distance, elevation + Decimal::from(de)) >= base);
        }
    }
}
