//! Report export for derived records
//!
//! Daily, rolling and divergence records are joined into one flat row per
//! user-day, which is the shape reporting tools consume.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

use crate::divergence::{DivergenceSignal, RiskLevel};
use crate::error::{Result, TrainRiskError};
use crate::models::{CalculationMethod, UserId};
use crate::pipeline::UserDerivedRecords;
use crate::thresholds::RiskTier;

pub mod csv;
pub mod json;

/// Export format types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Json,
}

impl FromStr for ExportFormat {
    type Err = TrainRiskError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            _ => Err(TrainRiskError::Config(format!("Unsupported export format: {}", s))),
        }
    }
}

/// Date range filter for exports
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        DateRange { start, end }
    }

    /// Check if a date falls within this range
    pub fn contains(&self, date: &NaiveDate) -> bool {
        let after_start = self.start.map_or(true, |start| date >= &start);
        let before_end = self.end.map_or(true, |end| date <= &end);
        after_start && before_end
    }
}

/// One user-day with every derived value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    pub user_id: UserId,
    pub date: NaiveDate,
    pub external_load: Decimal,
    pub internal_load: Decimal,
    pub calculation_method: CalculationMethod,
    pub is_rest_day: bool,
    pub activity_count: usize,
    pub external_acute: Decimal,
    pub external_chronic: Decimal,
    pub external_acwr: Option<Decimal>,
    pub internal_acute: Decimal,
    pub internal_chronic: Decimal,
    pub internal_acwr: Option<Decimal>,
    pub divergence: Decimal,
    pub risk_level: RiskLevel,
    pub signal: DivergenceSignal,
    pub rest_day_due: bool,
    pub tier: RiskTier,
}

/// Join a user's records into report rows within `range`
pub fn report_rows(records: &UserDerivedRecords, range: &DateRange) -> Vec<ReportRow> {
    records
        .daily
        .iter()
        .zip(records.rolling.iter())
        .zip(records.divergence.iter())
        .filter(|((daily, _), _)| range.contains(&daily.date))
        .map(|((daily, rolling), divergence)| ReportRow {
            user_id: daily.user_id.clone(),
            date: daily.date,
            external_load: daily.external_load,
            internal_load: daily.internal_load,
            calculation_method: daily.calculation_method,
            is_rest_day: daily.is_rest_day,
            activity_count: daily.activity_ids.len(),
            external_acute: rolling.external_acute,
            external_chronic: rolling.external_chronic,
            external_acwr: rolling.external_acwr.value(),
            internal_acute: rolling.internal_acute,
            internal_chronic: rolling.internal_chronic,
            internal_acwr: rolling.internal_acwr.value(),
            divergence: divergence.divergence_value,
            risk_level: divergence.risk_level,
            signal: divergence.signal,
            rest_day_due: divergence.rest_day_due,
            tier: divergence.tier,
        })
        .collect()
}

/// Export several users' records to a file, returning the row count
pub fn export_records<P: AsRef<Path>>(
    records: &[UserDerivedRecords],
    format: ExportFormat,
    range: &DateRange,
    output_path: P,
) -> Result<usize> {
    let rows: Vec<ReportRow> = records.iter().flat_map(|r| report_rows(r, range)).collect();

    match format {
        ExportFormat::Csv => csv::export_rows(&rows, output_path.as_ref())?,
        ExportFormat::Json => json::export_json(&rows, output_path.as_ref())?,
    }

    info!(
        rows = rows.len(),
        path = %output_path.as_ref().display(),
        "Exported report"
    );
    Ok(rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal_load::CalculationStrategy;
    use crate::models::{Activity, Sport, UserHistory, UserProfile};
    use crate::pipeline::UserPipeline;
    use rust_decimal_macros::dec;

    pub(super) fn sample_records() -> UserDerivedRecords {
        let start = NaiveDate::from_ymd_opt(2024, 8, 1).unwrap();
        let history = UserHistory {
            profile: UserProfile {
                resting_hr: Some(48),
                max_hr: Some(190),
                ..UserProfile::new("export")
            },
            activities: (0..5)
                .map(|i| Activity {
                    id: format!("e{}", i),
                    date: start + chrono::Duration::days(i * 2),
                    sport: Sport::Running,
                    duration_seconds: 2400,
                    distance_km: Some(dec!(8)),
                    elevation_gain_m: Some(dec!(20)),
                    hr_samples: None,
                    avg_hr: Some(150),
                })
                .collect(),
        };
        UserPipeline::default()
            .run(&history, CalculationStrategy::Legacy)
            .unwrap()
    }

    #[test]
    fn test_rows_join_all_stages() {
        let records = sample_records();
        let rows = report_rows(&records, &DateRange::default());

        assert_eq!(rows.len(), 9);
        assert!(!rows[0].is_rest_day);
        assert!(rows[1].is_rest_day);
        assert_eq!(rows[0].external_load, dec!(8.2));
        assert_eq!(rows[0].risk_level, RiskLevel::InsufficientData);
    }

    #[test]
    fn test_rows_respect_range() {
        let records = sample_records();
        let range = DateRange::new(NaiveDate::from_ymd_opt(2024, 8, 3), NaiveDate::from_ymd_opt(2024, 8, 4));
        let rows = report_rows(&records, &range);
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("CSV".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert!("pdf".parse::<ExportFormat>().is_err());
    }
}
