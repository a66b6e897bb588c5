//! Physiological ("internal") load from heart rate data
//!
//! Each heart rate reading is expressed as a fraction of heart rate reserve and
//! weighted exponentially (Banister TRIMP), so a minute near max HR costs far
//! more than two minutes at half of it. The result is a tagged value recording
//! which data the number came from:
//!
//! - `Stream`: integrated sample by sample over the recorded stream
//! - `Average`: one weighted point times the activity duration
//! - `Unavailable`: no usable heart rate; excluded from daily sums
//!
//! Estimation never fails. Missing or thin data degrades to the next method
//! down and the reason travels with the result.

use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::models::{Activity, CalculationMethod, HrSample, Sex, UserProfile};

/// Which estimation method a pipeline run is allowed to use.
///
/// Selected per user by the rollout plan and passed in explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalculationStrategy {
    /// Prior method: average heart rate only
    Legacy,
    /// Stream integration when enough samples exist, average otherwise
    Enhanced,
}

impl fmt::Display for CalculationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalculationStrategy::Legacy => f.write_str("legacy"),
            CalculationStrategy::Enhanced => f.write_str("enhanced"),
        }
    }
}

/// Calibration constants for the internal load model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InternalLoadConfig {
    /// Linear multiplier applied to the weighted HRR fraction
    pub base_multiplier: f64,

    /// Exponential steepness for male profiles
    pub male_exponent: f64,

    /// Exponential steepness for female profiles
    pub female_exponent: f64,

    /// Steepness when sex is not reported; mean of the two when unset
    pub unspecified_exponent: Option<f64>,

    /// Minimum usable samples before stream mode is used
    pub min_stream_samples: usize,

    /// Longest interval a single sample may stand for, in seconds
    pub max_sample_gap_seconds: u32,

    /// Samples below this are treated as sensor dropouts
    pub hr_floor: u16,

    /// Samples above this are treated as sensor noise
    pub hr_ceiling: u16,
}

impl Default for InternalLoadConfig {
    fn default() -> Self {
        InternalLoadConfig {
            base_multiplier: 0.64,
            male_exponent: 1.92,
            female_exponent: 1.67,
            unspecified_exponent: None,
            min_stream_samples: 60,
            max_sample_gap_seconds: 30,
            hr_floor: 25,
            hr_ceiling: 250,
        }
    }
}

impl InternalLoadConfig {
    /// Exponent for a given sex
    pub fn exponent_for(&self, sex: Sex) -> f64 {
        match sex {
            Sex::Male => self.male_exponent,
            Sex::Female => self.female_exponent,
            Sex::Unspecified => self
                .unspecified_exponent
                .unwrap_or((self.male_exponent + self.female_exponent) / 2.0),
        }
    }

    fn is_plausible(&self, bpm: u16) -> bool {
        bpm >= self.hr_floor && bpm <= self.hr_ceiling
    }
}

/// Why an activity fell back to average mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AverageReason {
    /// Legacy strategy never integrates streams
    LegacyStrategy,
    /// Activity carries no stream at all
    NoStream,
    /// Stream too short after discarding implausible samples
    TooFewSamples { usable: usize, required: usize },
}

/// Where the average heart rate used in average mode came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AverageSource {
    /// Device-reported average
    Reported,
    /// Mean of the usable stream samples
    DerivedFromStream,
}

/// Why no internal load could be estimated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    /// Neither stream nor average present
    NoHeartRateData,
    /// Stream present but every sample implausible, and no average
    NoUsableSamples,
    /// Resting/max heart rate missing or inconsistent
    InvalidProfile,
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            UnavailableReason::NoHeartRateData => "no_heart_rate_data",
            UnavailableReason::NoUsableSamples => "no_usable_samples",
            UnavailableReason::InvalidProfile => "invalid_profile",
        };
        f.write_str(label)
    }
}

/// Internal load of one activity, tagged with its provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum InternalLoad {
    Stream {
        load: Decimal,
        sample_count: usize,
        covered_seconds: u32,
    },
    Average {
        load: Decimal,
        avg_hr: u16,
        source: AverageSource,
        reason: AverageReason,
    },
    Unavailable {
        reason: UnavailableReason,
    },
}

impl InternalLoad {
    /// Load value; zero when unavailable
    pub fn load(&self) -> Decimal {
        match self {
            InternalLoad::Stream { load, .. } | InternalLoad::Average { load, .. } => *load,
            InternalLoad::Unavailable { .. } => Decimal::ZERO,
        }
    }

    /// Load value only when it should count towards the daily sum
    pub fn contribution(&self) -> Option<Decimal> {
        match self {
            InternalLoad::Stream { load, .. } | InternalLoad::Average { load, .. } => Some(*load),
            InternalLoad::Unavailable { .. } => None,
        }
    }

    pub fn method(&self) -> CalculationMethod {
        match self {
            InternalLoad::Stream { .. } => CalculationMethod::Stream,
            InternalLoad::Average { .. } => CalculationMethod::Average,
            InternalLoad::Unavailable { .. } => CalculationMethod::Unavailable,
        }
    }

    /// Short description of the fallback that fired, if any
    pub fn fallback_reason(&self) -> Option<String> {
        match self {
            InternalLoad::Stream { .. } => None,
            InternalLoad::Average { reason, source, .. } => {
                let base = match reason {
                    AverageReason::LegacyStrategy => "legacy_strategy".to_string(),
                    AverageReason::NoStream => "no_stream".to_string(),
                    AverageReason::TooFewSamples { usable, required } => {
                        format!("too_few_samples({}/{})", usable, required)
                    }
                };
                match source {
                    AverageSource::Reported => Some(base),
                    AverageSource::DerivedFromStream => Some(format!("{}+derived_average", base)),
                }
            }
            InternalLoad::Unavailable { reason } => Some(reason.to_string()),
        }
    }
}

/// Validated heart rate parameters for one user
#[derive(Debug, Clone, PartialEq)]
pub struct HrProfile {
    pub resting_hr: f64,
    pub max_hr: f64,
    pub exponent: f64,
}

impl HrProfile {
    /// Validate a user profile for HR-based estimation
    pub fn from_user(profile: &UserProfile, config: &InternalLoadConfig) -> Result<Self, UnavailableReason> {
        let (resting, max) = match (profile.resting_hr, profile.max_hr) {
            (Some(r), Some(m)) => (r, m),
            _ => return Err(UnavailableReason::InvalidProfile),
        };

        if max <= resting || !config.is_plausible(resting) || !config.is_plausible(max) {
            return Err(UnavailableReason::InvalidProfile);
        }

        Ok(HrProfile {
            resting_hr: f64::from(resting),
            max_hr: f64::from(max),
            exponent: config.exponent_for(profile.sex),
        })
    }

    /// Heart rate reserve fraction, clamped to [0, 1]
    pub fn reserve_fraction(&self, hr: f64) -> f64 {
        ((hr - self.resting_hr) / (self.max_hr - self.resting_hr)).clamp(0.0, 1.0)
    }
}

/// Converts one activity's heart rate data into internal load
#[derive(Debug, Clone, Default)]
pub struct InternalLoadEstimator {
    config: InternalLoadConfig,
}

impl InternalLoadEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: InternalLoadConfig) -> Self {
        InternalLoadEstimator { config }
    }

    pub fn config(&self) -> &InternalLoadConfig {
        &self.config
    }

    /// Strain per minute at a given heart rate: `x · base · e^(k·x)`
    pub fn weighted_intensity(&self, profile: &HrProfile, hr: f64) -> f64 {
        let x = profile.reserve_fraction(hr);
        x * self.config.base_multiplier * (profile.exponent * x).exp()
    }

    /// Estimate the internal load of an activity.
    ///
    /// `profile` is the caller's already-validated HR profile, or the reason
    /// validation failed. Activities without any heart rate report
    /// `NoHeartRateData` even when the profile is also invalid.
    pub fn estimate(
        &self,
        activity: &Activity,
        profile: Result<&HrProfile, UnavailableReason>,
        strategy: CalculationStrategy,
    ) -> InternalLoad {
        if activity.has_no_hr() {
            debug!(activity = activity.id.as_str(), "No heart rate data, internal load unavailable");
            return InternalLoad::Unavailable {
                reason: UnavailableReason::NoHeartRateData,
            };
        }

        let profile = match profile {
            Ok(p) => p,
            Err(reason) => {
                debug!(activity = activity.id.as_str(), %reason, "Internal load unavailable");
                return InternalLoad::Unavailable { reason };
            }
        };

        let usable = self.usable_samples(activity.hr_samples.as_deref().unwrap_or(&[]));

        let reason = match strategy {
            CalculationStrategy::Legacy => AverageReason::LegacyStrategy,
            CalculationStrategy::Enhanced if usable.len() >= self.config.min_stream_samples.max(1) => {
                return self.stream_load(profile, &usable, activity.duration_seconds);
            }
            CalculationStrategy::Enhanced if activity.sample_count() == 0 => AverageReason::NoStream,
            CalculationStrategy::Enhanced => {
                debug!(
                    activity = activity.id.as_str(),
                    usable = usable.len(),
                    required = self.config.min_stream_samples,
                    "Stream too short, falling back to average heart rate"
                );
                AverageReason::TooFewSamples {
                    usable: usable.len(),
                    required: self.config.min_stream_samples,
                }
            }
        };

        let (avg_hr, source) = match activity.avg_hr.filter(|hr| self.config.is_plausible(*hr)) {
            Some(hr) => (hr, AverageSource::Reported),
            None => match Self::mean_bpm(&usable) {
                Some(hr) => (hr, AverageSource::DerivedFromStream),
                None => {
                    debug!(activity = activity.id.as_str(), "No usable heart rate samples");
                    return InternalLoad::Unavailable {
                        reason: UnavailableReason::NoUsableSamples,
                    };
                }
            },
        };

        InternalLoad::Average {
            load: self.average_load(profile, avg_hr, activity.duration_seconds),
            avg_hr,
            source,
            reason,
        }
    }

    /// Single weighted point times total duration
    pub fn average_load(&self, profile: &HrProfile, avg_hr: u16, duration_seconds: u32) -> Decimal {
        let minutes = f64::from(duration_seconds) / 60.0;
        to_decimal(self.weighted_intensity(profile, f64::from(avg_hr)) * minutes)
    }

    /// Integrate weighted intensity over the stream.
    ///
    /// Each sample stands for the interval until the next one (capped at
    /// `max_sample_gap_seconds`); the last sample takes the median interval.
    /// The time-weighted mean is then scaled to the activity duration, so a
    /// stream covering only part of the activity is extrapolated. With zero
    /// activity duration the covered stream time is used instead.
    fn stream_load(&self, profile: &HrProfile, samples: &[HrSample], duration_seconds: u32) -> InternalLoad {
        let cap = self.config.max_sample_gap_seconds.max(1);

        let mut intervals: Vec<u32> = samples
            .windows(2)
            .map(|pair| (pair[1].offset_seconds - pair[0].offset_seconds).min(cap))
            .collect();
        let last = median(&intervals).unwrap_or(1).max(1);
        intervals.push(last);

        let mut weighted_sum = 0.0;
        let mut covered: u32 = 0;
        for (sample, dt) in samples.iter().zip(intervals.iter()) {
            weighted_sum += self.weighted_intensity(profile, f64::from(sample.bpm)) * f64::from(*dt);
            covered = covered.saturating_add(*dt);
        }

        let effective_seconds = if duration_seconds > 0 { duration_seconds } else { covered };
        let load = if covered == 0 {
            0.0
        } else {
            (weighted_sum / f64::from(covered)) * (f64::from(effective_seconds) / 60.0)
        };

        InternalLoad::Stream {
            load: to_decimal(load),
            sample_count: samples.len(),
            covered_seconds: covered,
        }
    }

    /// Plausible samples in time order
    fn usable_samples(&self, samples: &[HrSample]) -> Vec<HrSample> {
        let mut usable: Vec<HrSample> = samples
            .iter()
            .copied()
            .filter(|s| self.config.is_plausible(s.bpm))
            .collect();
        usable.sort_by_key(|s| s.offset_seconds);
        usable
    }

    fn mean_bpm(samples: &[HrSample]) -> Option<u16> {
        if samples.is_empty() {
            return None;
        }
        let total: u64 = samples.iter().map(|s| u64::from(s.bpm)).sum();
        let mean = (total as f64 / samples.len() as f64).round();
        Some(mean as u16)
    }
}

fn median(values: &[u32]) -> Option<u32> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    Some(sorted[sorted.len() / 2])
}

fn to_decimal(value: f64) -> Decimal {
    if !value.is_finite() || value <= 0.0 {
        return Decimal::ZERO;
    }
    Decimal::from_f64(value)
        .map(|d| d.round_dp(6))
        .unwrap_or(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Sport;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn profile(sex: Sex) -> UserProfile {
        UserProfile {
            resting_hr: Some(50),
            max_hr: Some(180),
            sex,
            ..UserProfile::new("tester")
        }
    }

    fn hr_profile(sex: Sex) -> HrProfile {
        HrProfile::from_user(&profile(sex), &InternalLoadConfig::default()).unwrap()
    }

    fn activity(duration_seconds: u32, avg_hr: Option<u16>, samples: Option<Vec<HrSample>>) -> Activity {
        Activity {
            id: "act".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            sport: Sport::Running,
            duration_seconds,
            distance_km: Some(dec!(5)),
            elevation_gain_m: Some(dec!(50)),
            hr_samples: samples,
            avg_hr,
        }
    }

    fn constant_stream(bpm: u16, count: u32, step: u32) -> Vec<HrSample> {
        (0..count)
            .map(|i| HrSample {
                offset_seconds: i * step,
                bpm,
            })
            .collect()
    }

    #[test]
    fn test_average_mode_matches_trimp_formula() {
        let estimator = InternalLoadEstimator::new();
        let p = hr_profile(Sex::Male);
        let result = estimator.estimate(&activity(3600, Some(140), None), Ok(&p), CalculationStrategy::Enhanced);

        let x: f64 = 90.0 / 130.0;
        let expected = 60.0 * x * 0.64 * (1.92 * x).exp();
        let load = result.load().to_f64().unwrap();

        assert_eq!(result.method(), CalculationMethod::Average);
        assert!((load - expected).abs() < 1e-4);
        assert_eq!(result.fallback_reason().as_deref(), Some("no_stream"));
    }

    #[test]
    fn test_constant_stream_matches_average_mode() {
        let estimator = InternalLoadEstimator::new();
        let p = hr_profile(Sex::Female);

        let streamed = estimator.estimate(
            &activity(600, Some(150), Some(constant_stream(150, 600, 1))),
            Ok(&p),
            CalculationStrategy::Enhanced,
        );
        let averaged = estimator.estimate(&activity(600, Some(150), None), Ok(&p), CalculationStrategy::Enhanced);

        assert_eq!(streamed.method(), CalculationMethod::Stream);
        let diff = (streamed.load() - averaged.load()).abs();
        assert!(diff < dec!(0.001), "stream {} vs average {}", streamed.load(), averaged.load());
    }

    #[test]
    fn test_stream_captures_intensity_spikes() {
        let estimator = InternalLoadEstimator::new();
        let p = hr_profile(Sex::Male);

        // Alternating 120/170 averages to 145
        let samples: Vec<HrSample> = (0..600)
            .map(|i| HrSample {
                offset_seconds: i,
                bpm: if (i / 60) % 2 == 0 { 120 } else { 170 },
            })
            .collect();

        let streamed = estimator.estimate(&activity(600, Some(145), Some(samples)), Ok(&p), CalculationStrategy::Enhanced);
        let averaged = estimator.estimate(&activity(600, Some(145), None), Ok(&p), CalculationStrategy::Enhanced);

        assert!(streamed.load() > averaged.load());
    }

    #[test]
    fn test_too_few_samples_falls_back_to_average() {
        let estimator = InternalLoadEstimator::new();
        let p = hr_profile(Sex::Male);
        let result = estimator.estimate(
            &activity(1800, Some(140), Some(constant_stream(140, 10, 1))),
            Ok(&p),
            CalculationStrategy::Enhanced,
        );

        match result {
            InternalLoad::Average { reason, source, .. } => {
                assert_eq!(reason, AverageReason::TooFewSamples { usable: 10, required: 60 });
                assert_eq!(source, AverageSource::Reported);
            }
            other => panic!("expected average fallback, got {:?}", other),
        }
    }

    #[test]
    fn test_legacy_strategy_ignores_stream() {
        let estimator = InternalLoadEstimator::new();
        let p = hr_profile(Sex::Male);
        let result = estimator.estimate(
            &activity(1800, None, Some(constant_stream(140, 1800, 1))),
            Ok(&p),
            CalculationStrategy::Legacy,
        );

        match result {
            InternalLoad::Average { avg_hr, source, reason, .. } => {
                assert_eq!(avg_hr, 140);
                assert_eq!(source, AverageSource::DerivedFromStream);
                assert_eq!(reason, AverageReason::LegacyStrategy);
            }
            other => panic!("expected legacy average, got {:?}", other),
        }
    }

    #[test]
    fn test_no_heart_rate_is_unavailable() {
        let estimator = InternalLoadEstimator::new();
        let p = hr_profile(Sex::Male);
        let result = estimator.estimate(&activity(1800, None, None), Ok(&p), CalculationStrategy::Enhanced);

        assert_eq!(result.method(), CalculationMethod::Unavailable);
        assert_eq!(result.contribution(), None);
        assert_eq!(result.load(), Decimal::ZERO);
    }

    #[test]
    fn test_invalid_profile_is_unavailable() {
        let config = InternalLoadConfig::default();
        let mut bad = profile(Sex::Male);
        bad.max_hr = Some(45);
        let reason = HrProfile::from_user(&bad, &config).unwrap_err();
        assert_eq!(reason, UnavailableReason::InvalidProfile);

        let estimator = InternalLoadEstimator::with_config(config);
        let result = estimator.estimate(&activity(1800, Some(140), None), Err(reason), CalculationStrategy::Enhanced);
        assert_eq!(result, InternalLoad::Unavailable { reason: UnavailableReason::InvalidProfile });
    }

    #[test]
    fn test_implausible_samples_discarded() {
        let estimator = InternalLoadEstimator::new();
        let p = hr_profile(Sex::Male);
        let samples = vec![
            HrSample { offset_seconds: 0, bpm: 0 },
            HrSample { offset_seconds: 1, bpm: 255 },
        ];
        let result = estimator.estimate(&activity(600, None, Some(samples)), Ok(&p), CalculationStrategy::Enhanced);

        assert_eq!(result, InternalLoad::Unavailable { reason: UnavailableReason::NoUsableSamples });
    }

    #[test]
    fn test_recording_pauses_are_capped() {
        let estimator = InternalLoadEstimator::new();
        let p = hr_profile(Sex::Male);

        // 60 samples at 170 then a long pause, then 60 samples at 110
        let mut samples = constant_stream(170, 60, 1);
        samples.extend((0..60).map(|i| HrSample { offset_seconds: 3600 + i, bpm: 110 }));

        match estimator.estimate(&activity(0, None, Some(samples)), Ok(&p), CalculationStrategy::Enhanced) {
            InternalLoad::Stream { covered_seconds, sample_count, .. } => {
                assert_eq!(sample_count, 120);
                // 118 one-second gaps, one capped 30s gap, one median interval
                assert_eq!(covered_seconds, 118 + 30 + 1);
            }
            other => panic!("expected stream mode, got {:?}", other),
        }
    }

    #[test]
    fn test_unsorted_stream_is_ordered() {
        let estimator = InternalLoadEstimator::new();
        let p = hr_profile(Sex::Male);
        let mut samples = constant_stream(150, 120, 1);
        samples.reverse();

        let reversed = estimator.estimate(&activity(120, None, Some(samples)), Ok(&p), CalculationStrategy::Enhanced);
        let ordered = estimator.estimate(
            &activity(120, None, Some(constant_stream(150, 120, 1))),
            Ok(&p),
            CalculationStrategy::Enhanced,
        );
        assert_eq!(reversed, ordered);
    }

    #[test]
    fn test_female_curve_is_flatter() {
        let estimator = InternalLoadEstimator::new();
        let male = estimator.average_load(&hr_profile(Sex::Male), 160, 3600);
        let female = estimator.average_load(&hr_profile(Sex::Female), 160, 3600);
        let unspecified = estimator.average_load(&hr_profile(Sex::Unspecified), 160, 3600);

        assert!(female < unspecified);
        assert!(unspecified < male);
    }

    #[test]
    fn test_heart_rate_below_resting_clamps_to_zero() {
        let estimator = InternalLoadEstimator::new();
        let p = hr_profile(Sex::Male);
        assert_eq!(estimator.average_load(&p, 45, 3600), Decimal::ZERO);
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_near_constant_stream_consistency(
            base in 100u16..175u16,
            count in 60u32..900u32,
            jitter in prop::collection::vec(-1i16..=1i16, 900),
        ) {
            let estimator = InternalLoadEstimator::new();
            let p = hr_profile(Sex::Male);

            let samples: Vec<HrSample> = (0..count)
                .map(|i| HrSample {
                    offset_seconds: i,
                    bpm: (base as i16 + jitter[i as usize]) as u16,
                })
                .collect();

            let streamed = estimator.estimate(
                &activity(count, Some(base), Some(samples)),
                Ok(&p),
                CalculationStrategy::Enhanced,
            );
            let averaged = estimator.estimate(&activity(count, Some(base), None), Ok(&p), CalculationStrategy::Enhanced);

            prop_assert_eq!(streamed.method(), CalculationMethod::Stream);
            let s = streamed.load().to_f64().unwrap();
            let a = averaged.load().to_f64().unwrap();
            prop_assert!((s - a).abs() <= a * 0.05 + 1e-6, "stream {} vs average {}", s, a);
        }

        #[test]
        fn test_load_never_negative(
            avg_hr in 25u16..250u16,
            duration in 0u32..20_000u32,
        ) {
            let estimator = InternalLoadEstimator::new();
            let p = hr_profile(Sex::Unspecified);
            let result = estimator.estimate(&activity(duration, Some(avg_hr), None), Ok(&p), CalculationStrategy::Enhanced);
            prop_assert!(result.load() >= Decimal::ZERO);
        }
    }
}
