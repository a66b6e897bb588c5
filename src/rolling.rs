use chrono::NaiveDate;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::daily::DailyLoadRecord;
use crate::models::{CalculationMethod, UserId};

/// Decay constants for the acute and chronic aggregates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayConfig {
    /// Days for an acute contribution to lose half its weight (default: 7)
    pub acute_half_life_days: f64,

    /// Days for a chronic contribution to lose half its weight (default: 28)
    pub chronic_half_life_days: f64,

    /// Days of history, counted from the first record, before an ACWR is reported
    pub min_history_days: u16,
}

impl Default for DecayConfig {
    fn default() -> Self {
        DecayConfig {
            acute_half_life_days: 7.0,
            chronic_half_life_days: 28.0,
            min_history_days: 28,
        }
    }
}

impl DecayConfig {
    /// Replace unusable half-lives with the defaults, logging each replacement
    pub fn sanitized(mut self) -> Self {
        let defaults = DecayConfig::default();
        if !(self.acute_half_life_days.is_finite() && self.acute_half_life_days > 0.0) {
            warn!(
                value = self.acute_half_life_days,
                default = defaults.acute_half_life_days,
                "Invalid acute half-life, using default"
            );
            self.acute_half_life_days = defaults.acute_half_life_days;
        }
        if !(self.chronic_half_life_days.is_finite() && self.chronic_half_life_days > 0.0) {
            warn!(
                value = self.chronic_half_life_days,
                default = defaults.chronic_half_life_days,
                "Invalid chronic half-life, using default"
            );
            self.chronic_half_life_days = defaults.chronic_half_life_days;
        }
        if self.acute_half_life_days >= self.chronic_half_life_days {
            warn!(
                acute = self.acute_half_life_days,
                chronic = self.chronic_half_life_days,
                "Acute half-life is not shorter than chronic half-life"
            );
        }
        self
    }

    /// Per-day retention factor `0.5^(1 / half_life)`
    pub fn decay_factor(half_life_days: f64) -> Decimal {
        let factor = 0.5f64.powf(1.0 / half_life_days);
        Decimal::from_f64(factor).unwrap_or(Decimal::ZERO)
    }
}

/// Why an ACWR was not reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum InsufficientReason {
    /// Fewer days since the first record than `min_history_days`
    ShortHistory { days: u32, required: u16 },
    /// Chronic load is zero; the ratio is undefined
    ZeroChronic,
}

/// Acute:chronic workload ratio, or an explicit marker that it is undefined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Acwr {
    Value { ratio: Decimal },
    InsufficientData(InsufficientReason),
}

impl Acwr {
    pub fn value(&self) -> Option<Decimal> {
        match self {
            Acwr::Value { ratio } => Some(*ratio),
            Acwr::InsufficientData(_) => None,
        }
    }

    pub fn is_sufficient(&self) -> bool {
        matches!(self, Acwr::Value { .. })
    }
}

/// Acute, chronic and their ratio for one series on one day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesRatio {
    pub acute: Decimal,
    pub chronic: Decimal,
    pub acwr: Acwr,
}

/// Rolling loads for both series on one day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollingRatioRecord {
    pub user_id: UserId,
    pub date: NaiveDate,

    /// Days since the first record, inclusive
    pub history_days: u32,

    pub external_acute: Decimal,
    pub external_chronic: Decimal,
    pub external_acwr: Acwr,

    pub internal_acute: Decimal,
    pub internal_chronic: Decimal,
    pub internal_acwr: Acwr,

    /// Method tag of the underlying daily record
    pub calculation_method: CalculationMethod,
}

/// Weight-normalized exponentially decayed average.
///
/// Keeps the decayed load sum and the decayed weight sum separately so the
/// average is unbiased from the first day: a constant load yields exactly that
/// load rather than ramping up from zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecayAccumulator {
    factor: Decimal,
    numerator: Decimal,
    denominator: Decimal,
}

impl DecayAccumulator {
    pub fn new(half_life_days: f64) -> Self {
        DecayAccumulator {
            factor: DecayConfig::decay_factor(half_life_days),
            numerator: Decimal::ZERO,
            denominator: Decimal::ZERO,
        }
    }

    /// Decay by `days` elapsed then add today's load
    pub fn advance(&mut self, days: u32, load: Decimal) {
        for _ in 0..days {
            self.numerator *= self.factor;
            self.denominator *= self.factor;
        }
        self.numerator += load;
        self.denominator += Decimal::ONE;
    }

    pub fn value(&self) -> Decimal {
        if self.denominator.is_zero() {
            Decimal::ZERO
        } else {
            self.numerator / self.denominator
        }
    }
}

/// Reported loads and ratios are rounded; accumulators keep full precision
const OUTPUT_DP: u32 = 6;

/// Paired acute/chronic accumulators for one series
#[derive(Debug, Clone, Copy)]
struct SeriesState {
    acute: DecayAccumulator,
    chronic: DecayAccumulator,
}

impl SeriesState {
    fn new(config: &DecayConfig) -> Self {
        SeriesState {
            acute: DecayAccumulator::new(config.acute_half_life_days),
            chronic: DecayAccumulator::new(config.chronic_half_life_days),
        }
    }

    fn advance(&mut self, days: u32, load: Decimal, history_days: u32, min_history: u16) -> SeriesRatio {
        self.acute.advance(days, load);
        self.chronic.advance(days, load);

        let raw_acute = self.acute.value();
        let raw_chronic = self.chronic.value();

        let acwr = if history_days < u32::from(min_history) {
            Acwr::InsufficientData(InsufficientReason::ShortHistory {
                days: history_days,
                required: min_history,
            })
        } else if raw_chronic <= Decimal::ZERO {
            Acwr::InsufficientData(InsufficientReason::ZeroChronic)
        } else {
            Acwr::Value {
                ratio: (raw_acute / raw_chronic).round_dp(OUTPUT_DP),
            }
        };

        SeriesRatio {
            acute: raw_acute.round_dp(OUTPUT_DP),
            chronic: raw_chronic.round_dp(OUTPUT_DP),
            acwr,
        }
    }
}

/// Decay-weighted rolling-ratio engine
#[derive(Debug, Clone, Default)]
pub struct RollingRatioEngine {
    config: DecayConfig,
}

impl RollingRatioEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: DecayConfig) -> Self {
        RollingRatioEngine {
            config: config.sanitized(),
        }
    }

    pub fn config(&self) -> &DecayConfig {
        &self.config
    }

    /// Run one load series through the engine.
    ///
    /// The series must be in date order. Each entry decays the state by the
    /// calendar distance to the previous entry, so a missing day still ages
    /// the history but adds no weight. Rest days should be present as zero
    /// loads; gaps are logged.
    pub fn compute_series(&self, series: &[(NaiveDate, Decimal)]) -> Vec<SeriesRatio> {
        self.run_series(series, true)
    }

    /// Compute rolling ratios for a user's contiguous daily records
    pub fn compute(&self, records: &[DailyLoadRecord]) -> Vec<RollingRatioRecord> {
        let Some(first) = records.first() else {
            return Vec::new();
        };

        let external_series: Vec<(NaiveDate, Decimal)> =
            records.iter().map(|r| (r.date, r.external_load)).collect();
        let internal_series: Vec<(NaiveDate, Decimal)> =
            records.iter().map(|r| (r.date, r.internal_load)).collect();

        // Both series share dates; report gaps once
        let external = self.run_series(&external_series, true);
        let internal = self.run_series(&internal_series, false);

        records
            .iter()
            .zip(external)
            .zip(internal)
            .map(|((record, ext), int)| RollingRatioRecord {
                user_id: record.user_id.clone(),
                date: record.date,
                history_days: Self::history_days(first.date, record.date),
                external_acute: ext.acute,
                external_chronic: ext.chronic,
                external_acwr: ext.acwr,
                internal_acute: int.acute,
                internal_chronic: int.chronic,
                internal_acwr: int.acwr,
                calculation_method: record.calculation_method,
            })
            .collect()
    }

    fn run_series(&self, series: &[(NaiveDate, Decimal)], log_gaps: bool) -> Vec<SeriesRatio> {
        let Some((first, _)) = series.first() else {
            return Vec::new();
        };

        let mut state = SeriesState::new(&self.config);
        let mut previous: Option<NaiveDate> = None;

        series
            .iter()
            .map(|(date, load)| {
                let step = Self::step(previous, *date, log_gaps);
                previous = Some(*date);
                let history_days = Self::history_days(*first, *date);
                state.advance(step, *load, history_days, self.config.min_history_days)
            })
            .collect()
    }

    fn history_days(first: NaiveDate, date: NaiveDate) -> u32 {
        u32::try_from((date - first).num_days() + 1).unwrap_or(0)
    }

    /// Days to decay before adding the entry for `date`
    fn step(previous: Option<NaiveDate>, date: NaiveDate, log_gaps: bool) -> u32 {
        match previous {
            None => 0,
            Some(prev) => {
                let gap = (date - prev).num_days();
                if log_gaps && gap > 1 {
                    warn!(from = %prev, to = %date, gap, "Gap in daily load series");
                }
                u32::try_from(gap).unwrap_or(0)
            }
        }
    }
}
