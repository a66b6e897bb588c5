//! Before/after comparison of derived records
//!
//! Used when a user's calculation method changes, to show which days changed
//! method and how far the internal load moved.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::divergence::RiskLevel;
use crate::internal_load::CalculationStrategy;
use crate::models::{CalculationMethod, UserId};
use crate::pipeline::UserDerivedRecords;

/// One day in a before/after comparison
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRow {
    pub date: NaiveDate,

    pub method_before: Option<CalculationMethod>,
    pub method_after: Option<CalculationMethod>,

    pub internal_before: Option<Decimal>,
    pub internal_after: Option<Decimal>,

    /// `after − before`, treating a missing side as zero
    pub internal_delta: Decimal,

    pub risk_before: Option<RiskLevel>,
    pub risk_after: Option<RiskLevel>,
}

impl AuditRow {
    pub fn method_changed(&self) -> bool {
        self.method_before != self.method_after
    }

    pub fn risk_changed(&self) -> bool {
        self.risk_before != self.risk_after
    }
}

/// Per-day comparison of two runs for one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    pub user_id: UserId,
    pub strategy_before: Option<CalculationStrategy>,
    pub strategy_after: CalculationStrategy,

    /// Days present in either run, in date order
    pub rows: Vec<AuditRow>,
}

impl AuditReport {
    pub fn changed_rows(&self) -> impl Iterator<Item = &AuditRow> {
        self.rows
            .iter()
            .filter(|r| r.method_changed() || !r.internal_delta.is_zero() || r.risk_changed())
    }

    pub fn days_with_method_change(&self) -> usize {
        self.rows.iter().filter(|r| r.method_changed()).count()
    }

    pub fn days_with_risk_change(&self) -> usize {
        self.rows.iter().filter(|r| r.risk_changed()).count()
    }

    pub fn total_internal_delta(&self) -> Decimal {
        self.rows.iter().map(|r| r.internal_delta).sum()
    }

    pub fn is_noop(&self) -> bool {
        self.changed_rows().next().is_none()
    }
}

#[derive(Default)]
struct Side {
    method: Option<CalculationMethod>,
    internal: Option<Decimal>,
    risk: Option<RiskLevel>,
}

fn sides(records: &UserDerivedRecords) -> BTreeMap<NaiveDate, Side> {
    let mut days: BTreeMap<NaiveDate, Side> = BTreeMap::new();
    for d in &records.daily {
        let side = days.entry(d.date).or_default();
        side.method = Some(d.calculation_method);
        side.internal = Some(d.internal_load);
    }
    for v in &records.divergence {
        days.entry(v.date).or_default().risk = Some(v.risk_level);
    }
    days
}

/// Compare stored records (if any) against a fresh run
pub fn compare(before: Option<&UserDerivedRecords>, after: &UserDerivedRecords) -> AuditReport {
    let mut before_days = before.map(sides).unwrap_or_default();
    let after_days = sides(after);

    let mut rows: Vec<AuditRow> = after_days
        .into_iter()
        .map(|(date, a)| {
            let b = before_days.remove(&date).unwrap_or_default();
            row(date, b, a)
        })
        .collect();
    rows.extend(
        before_days
            .into_iter()
            .map(|(date, b)| row(date, b, Side::default())),
    );
    rows.sort_by_key(|r| r.date);

    AuditReport {
        user_id: after.user_id.clone(),
        strategy_before: before.map(|b| b.strategy),
        strategy_after: after.strategy,
        rows,
    }
}

fn row(date: NaiveDate, before: Side, after: Side) -> AuditRow {
    AuditRow {
        date,
        method_before: before.method,
        method_after: after.method,
        internal_before: before.internal,
        internal_after: after.internal,
        internal_delta: after.internal.unwrap_or(Decimal::ZERO) - before.internal.unwrap_or(Decimal::ZERO),
        risk_before: before.risk,
        risk_after: after.risk,
    }
}
