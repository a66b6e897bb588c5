//! Daily aggregation of per-activity loads
//!
//! Collapses a user's activities into exactly one record per calendar day.
//! Days without activity are emitted as explicit zero-load rest days, since
//! the rolling-ratio engine needs unbroken daily coverage.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::PipelineError;
use crate::external_load::ExternalLoadEstimator;
use crate::internal_load::{CalculationStrategy, HrProfile, InternalLoad, InternalLoadEstimator, UnavailableReason};
use crate::models::{Activity, CalculationMethod, Sport, UserId};

/// How one activity contributed to its day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityContribution {
    pub activity_id: String,
    pub sport: Sport,
    pub external_load: Decimal,
    pub missing_distance: bool,
    pub internal: InternalLoad,
}

/// One user's load for one calendar day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyLoadRecord {
    pub user_id: UserId,
    pub date: NaiveDate,

    /// Sum of external loads across the day's activities
    pub external_load: Decimal,

    /// Sum of internal loads, excluding activities without usable heart rate
    pub internal_load: Decimal,

    /// Activities that make up this day
    pub activity_ids: Vec<String>,

    /// Weakest method among the day's heart-rate-bearing activities
    pub calculation_method: CalculationMethod,

    /// True when no activity was recorded
    pub is_rest_day: bool,

    /// Distinct sports performed, informational only
    pub sports: Vec<Sport>,

    /// Per-activity provenance
    pub contributions: Vec<ActivityContribution>,
}

impl DailyLoadRecord {
    /// Zero-load record for a day without activity
    pub fn rest_day(user_id: UserId, date: NaiveDate) -> Self {
        DailyLoadRecord {
            user_id,
            date,
            external_load: Decimal::ZERO,
            internal_load: Decimal::ZERO,
            activity_ids: Vec::new(),
            calculation_method: CalculationMethod::Unavailable,
            is_rest_day: true,
            sports: Vec::new(),
            contributions: Vec::new(),
        }
    }
}

/// Inclusive range of calendar days
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, PipelineError> {
        if start > end {
            return Err(PipelineError::InvalidDateRange { start, end });
        }
        Ok(DateWindow { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// Number of days in the window, inclusive
    pub fn len_days(&self) -> usize {
        ((self.end - self.start).num_days() + 1) as usize
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }

    /// Window spanning the activities, optionally widened by explicit bounds.
    ///
    /// Returns `Ok(None)` when there are no activities and no explicit bounds
    /// to anchor a window.
    pub fn covering(
        activities: &[Activity],
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Option<Self>, PipelineError> {
        let first = activities.iter().map(|a| a.date).min();
        let last = activities.iter().map(|a| a.date).max();

        let start = match start.or(first) {
            Some(d) => d,
            None => return Ok(None),
        };
        let end = match (end, last) {
            (Some(e), _) => e,
            (None, Some(l)) => l.max(start),
            (None, None) => start,
        };

        DateWindow::new(start, end).map(Some)
    }
}

/// Collapses activities into daily load records
#[derive(Debug, Clone, Default)]
pub struct DailyAggregator {
    external: ExternalLoadEstimator,
    internal: InternalLoadEstimator,
}

impl DailyAggregator {
    pub fn new(external: ExternalLoadEstimator, internal: InternalLoadEstimator) -> Self {
        DailyAggregator { external, internal }
    }

    /// Aggregate the activities of one day into a record
    pub fn aggregate_day(
        &self,
        user_id: &UserId,
        date: NaiveDate,
        activities: &[&Activity],
        hr_profile: Result<&HrProfile, UnavailableReason>,
        strategy: CalculationStrategy,
    ) -> DailyLoadRecord {
        if activities.is_empty() {
            return DailyLoadRecord::rest_day(user_id.clone(), date);
        }

        let mut external_load = Decimal::ZERO;
        let mut internal_load = Decimal::ZERO;
        let mut weakest: Option<CalculationMethod> = None;
        let mut sports: Vec<Sport> = Vec::new();
        let mut contributions = Vec::with_capacity(activities.len());

        for activity in activities {
            let external = self.external.estimate(activity);
            let internal = self.internal.estimate(activity, hr_profile.clone(), strategy);

            external_load += external.load;
            if let Some(load) = internal.contribution() {
                internal_load += load;
            }
            if !activity.has_no_hr() {
                let method = internal.method();
                weakest = Some(weakest.map_or(method, |w| w.min(method)));
            }
            if !sports.contains(&activity.sport) {
                sports.push(activity.sport.clone());
            }

            contributions.push(ActivityContribution {
                activity_id: activity.id.clone(),
                sport: activity.sport.clone(),
                external_load: external.load,
                missing_distance: external.missing_distance,
                internal,
            });
        }
        sports.sort();

        DailyLoadRecord {
            user_id: user_id.clone(),
            date,
            external_load,
            internal_load,
            activity_ids: activities.iter().map(|a| a.id.clone()).collect(),
            calculation_method: weakest.unwrap_or(CalculationMethod::Unavailable),
            is_rest_day: false,
            sports,
            contributions,
        }
    }

    /// Aggregate every day of a window, emitting rest days for empty dates.
    ///
    /// Activities outside the window are skipped. Same-day activities are
    /// processed in id order so the output does not depend on input order.
    pub fn aggregate_series(
        &self,
        user_id: &UserId,
        activities: &[Activity],
        window: DateWindow,
        hr_profile: Result<&HrProfile, UnavailableReason>,
        strategy: CalculationStrategy,
    ) -> Vec<DailyLoadRecord> {
        let mut by_day: BTreeMap<NaiveDate, Vec<&Activity>> = BTreeMap::new();
        for activity in activities {
            if window.contains(activity.date) {
                by_day.entry(activity.date).or_default().push(activity);
            } else {
                debug!(
                    user = %user_id,
                    activity = activity.id.as_str(),
                    date = %activity.date,
                    "Activity outside analysis window, skipped"
                );
            }
        }
        for day in by_day.values_mut() {
            day.sort_by(|a, b| a.id.cmp(&b.id));
        }

        let mut records = Vec::with_capacity(window.len_days());
        for date in window.days() {
            let day = by_day.get(&date).map(Vec::as_slice).unwrap_or(&[]);
            records.push(self.aggregate_day(user_id, date, day, hr_profile.clone(), strategy));
        }
        records
    }
}
