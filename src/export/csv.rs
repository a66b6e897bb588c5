use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::Path;

use super::ReportRow;
use crate::audit::AuditReport;
use crate::divergence::RiskLevel;
use crate::error::Result;
use crate::models::CalculationMethod;

/// Write report rows as CSV with a header row
pub fn export_rows(rows: &[ReportRow], output_path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(output_path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

#[derive(Serialize)]
struct AuditCsvRow<'a> {
    user_id: &'a str,
    date: NaiveDate,
    method_before: Option<CalculationMethod>,
    method_after: Option<CalculationMethod>,
    internal_before: Option<Decimal>,
    internal_after: Option<Decimal>,
    internal_delta: Decimal,
    risk_before: Option<RiskLevel>,
    risk_after: Option<RiskLevel>,
}

/// Write the changed days of each audit as CSV, returning the row count
pub fn export_audits(reports: &[AuditReport], output_path: &Path) -> Result<usize> {
    let mut writer = csv::Writer::from_path(output_path)?;
    let mut count = 0;
    for report in reports {
        for row in report.changed_rows() {
            writer.serialize(AuditCsvRow {
                user_id: report.user_id.as_str(),
                date: row.date,
                method_before: row.method_before,
                method_after: row.method_after,
                internal_before: row.internal_before,
                internal_after: row.internal_after,
                internal_delta: row.internal_delta,
                risk_before: row.risk_before,
                risk_after: row.risk_after,
            })?;
            count += 1;
        }
    }
    writer.flush()?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::{report_rows, DateRange};
    use crate::pipeline::UserPipeline;
    use crate::internal_load::CalculationStrategy;
    use crate::models::{Activity, HrSample, Sport, UserHistory, UserProfile};
    use rust_decimal_macros::dec;
    use tempfile::NamedTempFile;

    #[test]
    fn test_export_rows_has_header_and_rows() {
        let history = UserHistory {
            profile: UserProfile::new("csv"),
            activities: Vec::new(),
        };
        let records = UserPipeline::default()
            .run_window(
                &history,
                chrono::NaiveDate::from_ymd_opt(2024, 1, 1),
                chrono::NaiveDate::from_ymd_opt(2024, 1, 3),
                CalculationStrategy::Legacy,
            )
            .unwrap();

        let rows = report_rows(&records, &DateRange::default());
        let temp_file = NamedTempFile::new().unwrap();
        export_rows(&rows, temp_file.path()).unwrap();

        let content = std::fs::read_to_string(temp_file.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("user_id,date,external_load"));
        assert!(lines[1].starts_with("csv,2024-01-01,0,0,"));
    }

    #[test]
    fn test_export_audits_writes_changed_days_only() {
        let history = UserHistory {
            profile: UserProfile {
                resting_hr: Some(50),
                max_hr: Some(185),
                ..UserProfile::new("audited")
            },
            activities: (0..3)
                .map(|i| Activity {
                    id: format!("a{}", i),
                    date: chrono::NaiveDate::from_ymd_opt(2024, 5, 1).unwrap() + chrono::Duration::days(i * 2),
                    sport: Sport::Running,
                    duration_seconds: 1800,
                    distance_km: Some(dec!(6)),
                    elevation_gain_m: None,
                    hr_samples: Some(
                        (0..1800u32)
                            .step_by(5)
                            .map(|t| HrSample {
                                offset_seconds: t,
                                bpm: 120 + (t / 60) as u16,
                            })
                            .collect(),
                    ),
                    avg_hr: Some(120),
                })
                .collect(),
        };
        let pipeline = UserPipeline::default();
        let legacy = pipeline.run(&history, CalculationStrategy::Legacy).unwrap();
        let enhanced = pipeline.run(&history, CalculationStrategy::Enhanced).unwrap();

        let changed = crate::audit::compare(Some(&legacy), &enhanced);
        let unchanged = crate::audit::compare(Some(&legacy), &legacy);
        assert!(unchanged.is_noop());

        let temp_file = NamedTempFile::new().unwrap();
        let count = export_audits(&[changed, unchanged], temp_file.path()).unwrap();

        // Three training days switch method; rest days are identical
        assert_eq!(count, 3);
        let content = std::fs::read_to_string(temp_file.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("user_id,date,method_before,method_after"));
        assert!(lines[1].starts_with("audited,2024-05-01,average,stream,"));
    }
}
