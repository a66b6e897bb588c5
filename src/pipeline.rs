//! Per-user load pipeline
//!
//! Runs the stages in order for one user's full history: per-activity
//! estimates, daily aggregation, rolling ratios, divergence. Pure in its
//! inputs, so users can be processed in parallel and re-runs are identical.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info_span, warn};

use crate::daily::{DailyAggregator, DailyLoadRecord, DateWindow};
use crate::divergence::{DivergenceCalculator, DivergenceRecord};
use crate::error::Result;
use crate::external_load::{ExternalLoadConfig, ExternalLoadEstimator};
use crate::internal_load::{CalculationStrategy, HrProfile, InternalLoadConfig, InternalLoadEstimator};
use crate::models::{UserHistory, UserId, UserProfile};
use crate::rolling::{DecayConfig, RollingRatioEngine, RollingRatioRecord};
use crate::thresholds::{RiskTier, TierTable, UserThresholdConfig};

/// Everything derived for one user in one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDerivedRecords {
    pub user_id: UserId,

    /// Strategy the run used
    pub strategy: CalculationStrategy,

    /// Tier the divergence records were classified under
    pub tier: RiskTier,

    pub daily: Vec<DailyLoadRecord>,
    pub rolling: Vec<RollingRatioRecord>,
    pub divergence: Vec<DivergenceRecord>,
}

impl UserDerivedRecords {
    pub fn empty(user_id: UserId, strategy: CalculationStrategy, tier: RiskTier) -> Self {
        UserDerivedRecords {
            user_id,
            strategy,
            tier,
            daily: Vec::new(),
            rolling: Vec::new(),
            divergence: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.daily.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.daily.first().map(|d| d.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.daily.last().map(|d| d.date)
    }

    /// SHA-256 over the serialized records, hex encoded.
    ///
    /// Identical inputs give identical fingerprints, which lets the store skip
    /// commits that would not change anything.
    pub fn fingerprint(&self) -> Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(self.user_id.as_str().as_bytes());
        hasher.update(self.strategy.to_string().as_bytes());
        hasher.update(self.tier.as_str().as_bytes());
        serde_json::to_writer(&mut hasher, &self.daily)?;
        serde_json::to_writer(&mut hasher, &self.rolling)?;
        serde_json::to_writer(&mut hasher, &self.divergence)?;
        Ok(hex::encode(hasher.finalize()))
    }
}

/// Runs the full load pipeline for a single user
#[derive(Debug, Clone)]
pub struct UserPipeline {
    aggregator: DailyAggregator,
    internal_config: InternalLoadConfig,
    decay: DecayConfig,
    tiers: TierTable,
}

impl Default for UserPipeline {
    fn default() -> Self {
        UserPipeline::new(
            DecayConfig::default(),
            InternalLoadConfig::default(),
            ExternalLoadConfig::default(),
            TierTable::builtin(),
        )
    }
}

impl UserPipeline {
    pub fn new(
        decay: DecayConfig,
        internal: InternalLoadConfig,
        external: ExternalLoadConfig,
        tiers: TierTable,
    ) -> Self {
        UserPipeline {
            aggregator: DailyAggregator::new(
                ExternalLoadEstimator::with_config(external),
                InternalLoadEstimator::with_config(internal.clone()),
            ),
            internal_config: internal,
            decay: decay.sanitized(),
            tiers,
        }
    }

    /// Thresholds for a profile's tier, with config fallbacks applied
    pub fn thresholds_for(&self, profile: &UserProfile) -> UserThresholdConfig {
        self.tiers
            .resolve(profile.risk_tolerance_tier.as_deref(), &self.decay)
    }

    /// Run over the whole history, from the first to the last activity
    pub fn run(&self, history: &UserHistory, strategy: CalculationStrategy) -> Result<UserDerivedRecords> {
        self.run_window(history, None, None, strategy)
    }

    /// Run over an explicit window.
    ///
    /// Missing bounds default to the first and last activity. Extending `end`
    /// past the last activity fills trailing rest days, which is how ratios
    /// are brought up to today.
    pub fn run_window(
        &self,
        history: &UserHistory,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        strategy: CalculationStrategy,
    ) -> Result<UserDerivedRecords> {
        let user_id = &history.profile.user_id;
        let span = info_span!("user_pipeline", user = %user_id, %strategy);
        let _enter = span.enter();

        let thresholds = self.thresholds_for(&history.profile);

        let Some(window) = DateWindow::covering(&history.activities, start, end)? else {
            debug!("No activities and no window bounds, nothing to derive");
            return Ok(UserDerivedRecords::empty(user_id.clone(), strategy, thresholds.tier));
        };

        let hr_profile = HrProfile::from_user(&history.profile, &self.internal_config);
        if let Err(reason) = &hr_profile {
            warn!(%reason, "Heart rate profile unusable, internal load will be unavailable");
        }

        let daily = self.aggregator.aggregate_series(
            user_id,
            &history.activities,
            window,
            hr_profile.as_ref().map_err(|r| *r),
            strategy,
        );

        let engine = RollingRatioEngine::with_config(thresholds.decay.clone());
        let rolling = engine.compute(&daily);
        let divergence = DivergenceCalculator::evaluate_series(&daily, &rolling, &thresholds);

        debug!(
            days = daily.len(),
            start = %window.start,
            end = %window.end,
            tier = thresholds.tier.as_str(),
            "Pipeline complete"
        );

        Ok(UserDerivedRecords {
            user_id: user_id.clone(),
            strategy,
            tier: thresholds.tier,
            daily,
            rolling,
            divergence,
        })
    }
}
