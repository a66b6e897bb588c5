//! Divergence between mechanical and physiological workload ratios
//!
//! `divergence = (ext − int) / ((ext + int) / 2)`, a signed relative
//! difference bounded to [-2, 2]. Positive values mean the legs are doing more
//! than the heart reports (mechanical overload); negative values mean the
//! heart is working harder than the mechanical load explains (fatigue,
//! illness, heat).
//!
//! Risk classification is relative to the user's tier, so the same divergence
//! may be `Low` for an aggressive user and `Moderate` for a conservative one.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::daily::DailyLoadRecord;
use crate::models::{CalculationMethod, UserId};
use crate::rolling::RollingRatioRecord;
use crate::thresholds::{RiskTier, UserThresholdConfig};

/// Largest magnitude divergence can take
pub const DIVERGENCE_LIMIT: Decimal = dec!(2);

/// Discrete risk classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    InsufficientData,
    Low,
    Moderate,
    High,
}

impl RiskLevel {
    pub fn description(&self) -> &'static str {
        match self {
            RiskLevel::InsufficientData => "Not enough history to assess",
            RiskLevel::Low => "Load and response are in balance",
            RiskLevel::Moderate => "Load is outpacing adaptation, monitor closely",
            RiskLevel::High => "Injury risk elevated, reduce load",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RiskLevel::InsufficientData => "insufficient_data",
            RiskLevel::Low => "low",
            RiskLevel::Moderate => "moderate",
            RiskLevel::High => "high",
        };
        f.write_str(label)
    }
}

/// Direction of the imbalance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DivergenceSignal {
    Balanced,
    /// External ACWR ahead of internal
    MechanicalOverload,
    /// Internal ACWR ahead of external
    PhysiologicalStrain,
}

/// Where an ACWR sits relative to the user's bands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcwrZone {
    Undertrained,
    Optimal,
    Caution,
    HighRisk,
}

impl AcwrZone {
    pub fn classify(acwr: Decimal, thresholds: &UserThresholdConfig) -> Self {
        if acwr < thresholds.acwr_undertrained {
            AcwrZone::Undertrained
        } else if acwr <= thresholds.acwr_optimal_max {
            AcwrZone::Optimal
        } else if acwr < thresholds.acwr_high_risk {
            AcwrZone::Caution
        } else {
            AcwrZone::HighRisk
        }
    }
}

/// Outcome of classifying one day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub signal: DivergenceSignal,
    pub external_zone: Option<AcwrZone>,
}

/// Divergence and risk for one user-day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DivergenceRecord {
    pub user_id: UserId,
    pub date: NaiveDate,

    /// Zero when either ACWR is insufficient
    pub divergence_value: Decimal,

    pub risk_level: RiskLevel,
    pub signal: DivergenceSignal,

    pub external_acwr: Option<Decimal>,
    pub internal_acwr: Option<Decimal>,

    /// Consecutive training days ending on this date exceed the tier's limit
    pub rest_day_due: bool,

    /// Tier the stored classification was computed under
    pub tier: RiskTier,

    pub calculation_method: CalculationMethod,
}

impl DivergenceRecord {
    /// Reclassify against the tier active now; stored records keep the tier
    /// they were written under.
    pub fn classify_with(&self, thresholds: &UserThresholdConfig) -> RiskAssessment {
        match (self.external_acwr, self.internal_acwr) {
            (Some(ext), Some(_)) => DivergenceCalculator::classify(self.divergence_value, ext, thresholds),
            _ => RiskAssessment {
                level: RiskLevel::InsufficientData,
                signal: DivergenceSignal::Balanced,
                external_zone: None,
            },
        }
    }
}

/// Combines external and internal ACWR into divergence and risk
pub struct DivergenceCalculator;

impl DivergenceCalculator {
    /// Normalized signed difference; never NaN, never raises.
    ///
    /// Both zero gives 0. One zero saturates at ±2. Negative inputs are
    /// treated as zero.
    pub fn divergence(external_acwr: Decimal, internal_acwr: Decimal) -> Decimal {
        let ext = external_acwr.max(Decimal::ZERO);
        let int = internal_acwr.max(Decimal::ZERO);

        match (ext.is_zero(), int.is_zero()) {
            (true, true) => Decimal::ZERO,
            (false, true) => DIVERGENCE_LIMIT,
            (true, false) => -DIVERGENCE_LIMIT,
            (false, false) => {
                if ext == int {
                    return Decimal::ZERO;
                }
                let mean = (ext + int) / Decimal::TWO;
                ((ext - int) / mean)
                    .round_dp(6)
                    .clamp(-DIVERGENCE_LIMIT, DIVERGENCE_LIMIT)
            }
        }
    }

    /// Classify a divergence together with the external ACWR magnitude
    pub fn classify(divergence: Decimal, external_acwr: Decimal, thresholds: &UserThresholdConfig) -> RiskAssessment {
        let signal = if divergence >= thresholds.divergence_caution {
            DivergenceSignal::MechanicalOverload
        } else if divergence <= -thresholds.divergence_caution {
            DivergenceSignal::PhysiologicalStrain
        } else {
            DivergenceSignal::Balanced
        };

        let level = if external_acwr >= thresholds.acwr_high_risk
            || divergence >= thresholds.divergence_high
        {
            RiskLevel::High
        } else if external_acwr > thresholds.acwr_optimal_max
            || divergence >= thresholds.divergence_caution
            || divergence <= -thresholds.divergence_high
        {
            RiskLevel::Moderate
        } else {
            RiskLevel::Low
        };

        RiskAssessment {
            level,
            signal,
            external_zone: Some(AcwrZone::classify(external_acwr, thresholds)),
        }
    }

    /// Build one record from a rolling ratio record
    pub fn evaluate(
        ratio: &RollingRatioRecord,
        consecutive_training_days: u32,
        thresholds: &UserThresholdConfig,
    ) -> DivergenceRecord {
        let external = ratio.external_acwr.value();
        let internal = ratio.internal_acwr.value();

        let (divergence_value, assessment) = match (external, internal) {
            (Some(ext), Some(int)) => {
                let divergence = Self::divergence(ext, int);
                (divergence, Self::classify(divergence, ext, thresholds))
            }
            _ => (
                Decimal::ZERO,
                RiskAssessment {
                    level: RiskLevel::InsufficientData,
                    signal: DivergenceSignal::Balanced,
                    external_zone: None,
                },
            ),
        };

        DivergenceRecord {
            user_id: ratio.user_id.clone(),
            date: ratio.date,
            divergence_value,
            risk_level: assessment.level,
            signal: assessment.signal,
            external_acwr: external,
            internal_acwr: internal,
            rest_day_due: consecutive_training_days > u32::from(thresholds.max_days_rest),
            tier: thresholds.tier,
            calculation_method: ratio.calculation_method,
        }
    }

    /// Evaluate a whole series. `daily` and `ratios` must be index-aligned.
    pub fn evaluate_series(
        daily: &[DailyLoadRecord],
        ratios: &[RollingRatioRecord],
        thresholds: &UserThresholdConfig,
    ) -> Vec<DivergenceRecord> {
        let mut streak = 0u32;
        daily
            .iter()
            .zip(ratios.iter())
            .map(|(day, ratio)| {
                streak = if day.is_rest_day { 0 } else { streak + 1 };
                Self::evaluate(ratio, streak, thresholds)
            })
            .collect()
    }
}
