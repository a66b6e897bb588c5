//! Storage for derived records
//!
//! A user's derived records are replaced as one unit so readers never see
//! rolling ratios from one run next to daily loads from another.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

use crate::daily::DailyLoadRecord;
use crate::divergence::DivergenceRecord;
use crate::error::{Result, TrainRiskError};
use crate::models::UserId;
use crate::pipeline::UserDerivedRecords;
use crate::rolling::RollingRatioRecord;

/// What a commit did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitOutcome {
    /// Records replaced
    Written,
    /// Fingerprint matched the stored records; nothing written
    Unchanged,
}

/// Stored derived records plus their fingerprint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecords {
    pub fingerprint: String,
    pub records: UserDerivedRecords,
}

/// Committed derived records, queryable by user and date range
pub trait DerivedStore: Send + Sync {
    /// Replace every derived record for the user in one write
    fn commit_user(&self, records: UserDerivedRecords) -> Result<CommitOutcome>;

    fn fingerprint(&self, user: &UserId) -> Result<Option<String>>;

    fn user_records(&self, user: &UserId) -> Result<Option<UserDerivedRecords>>;

    fn users(&self) -> Result<Vec<UserId>>;

    fn daily_range(&self, user: &UserId, start: NaiveDate, end: NaiveDate) -> Result<Vec<DailyLoadRecord>> {
        Ok(self
            .user_records(user)?
            .map(|r| in_range(r.daily, start, end, |d| d.date))
            .unwrap_or_default())
    }

    fn rolling_range(&self, user: &UserId, start: NaiveDate, end: NaiveDate) -> Result<Vec<RollingRatioRecord>> {
        Ok(self
            .user_records(user)?
            .map(|r| in_range(r.rolling, start, end, |d| d.date))
            .unwrap_or_default())
    }

    fn divergence_range(&self, user: &UserId, start: NaiveDate, end: NaiveDate) -> Result<Vec<DivergenceRecord>> {
        Ok(self
            .user_records(user)?
            .map(|r| in_range(r.divergence, start, end, |d| d.date))
            .unwrap_or_default())
    }
}

fn in_range<T>(records: Vec<T>, start: NaiveDate, end: NaiveDate, date: impl Fn(&T) -> NaiveDate) -> Vec<T> {
    records
        .into_iter()
        .filter(|r| {
            let d = date(r);
            d >= start && d <= end
        })
        .collect()
}

/// Process-local store behind a read-write lock
#[derive(Debug, Default)]
pub struct InMemoryStore {
    users: RwLock<HashMap<UserId, StoredRecords>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of users with committed records
    pub fn len(&self) -> Result<usize> {
        Ok(self.users.read().map_err(|_| poisoned())?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Snapshot of every stored user, sorted by id
    pub fn snapshot(&self) -> Result<Vec<UserDerivedRecords>> {
        let users = self.users.read().map_err(|_| poisoned())?;
        let mut all: Vec<UserDerivedRecords> = users.values().map(|s| s.records.clone()).collect();
        all.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(all)
    }
}

fn poisoned() -> TrainRiskError {
    TrainRiskError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        "derived store lock poisoned",
    ))
}

impl DerivedStore for InMemoryStore {
    fn commit_user(&self, records: UserDerivedRecords) -> Result<CommitOutcome> {
        // Hash outside the lock; only the swap is done under the write guard
        let fingerprint = records.fingerprint()?;
        let mut users = self.users.write().map_err(|_| poisoned())?;

        if let Some(existing) = users.get(&records.user_id) {
            if existing.fingerprint == fingerprint {
                debug!(user = %records.user_id, "Derived records unchanged, skipping commit");
                return Ok(CommitOutcome::Unchanged);
            }
        }

        debug!(user = %records.user_id, days = records.daily.len(), "Committing derived records");
        users.insert(records.user_id.clone(), StoredRecords { fingerprint, records });
        Ok(CommitOutcome::Written)
    }

    fn fingerprint(&self, user: &UserId) -> Result<Option<String>> {
        let users = self.users.read().map_err(|_| poisoned())?;
        Ok(users.get(user).map(|s| s.fingerprint.clone()))
    }

    fn user_records(&self, user: &UserId) -> Result<Option<UserDerivedRecords>> {
        let users = self.users.read().map_err(|_| poisoned())?;
        Ok(users.get(user).map(|s| s.records.clone()))
    }

    fn users(&self) -> Result<Vec<UserId>> {
        let users = self.users.read().map_err(|_| poisoned())?;
        let mut ids: Vec<UserId> = users.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal_load::CalculationStrategy;
    use crate::thresholds::RiskTier;

    fn records(user: &str, days: u32) -> UserDerivedRecords {
        let start = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let mut r = UserDerivedRecords::empty(UserId::from(user), CalculationStrategy::Legacy, RiskTier::Balanced);
        r.daily = (0..days)
            .map(|i| DailyLoadRecord::rest_day(UserId::from(user), start + chrono::Duration::days(i64::from(i))))
            .collect();
        r
    }

    #[test]
    fn test_commit_then_unchanged() {
        let store = InMemoryStore::new();
        assert_eq!(store.commit_user(records("a", 3)).unwrap(), CommitOutcome::Written);
        assert_eq!(store.commit_user(records("a", 3)).unwrap(), CommitOutcome::Unchanged);
        assert_eq!(store.commit_user(records("a", 4)).unwrap(), CommitOutcome::Written);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_range_query() {
        let store = InMemoryStore::new();
        store.commit_user(records("a", 10)).unwrap();

        let start = NaiveDate::from_ymd_opt(2024, 5, 3).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 5, 5).unwrap();
        let days = store.daily_range(&UserId::from("a"), start, end).unwrap();
        assert_eq!(days.len(), 3);
        assert_eq!(days[0].date, start);

        assert!(store.daily_range(&UserId::from("b"), start, end).unwrap().is_empty());
    }

    #[test]
    fn test_users_sorted() {
        let store = InMemoryStore::new();
        store.commit_user(records("zed", 1)).unwrap();
        store.commit_user(records("amy", 1)).unwrap();
        assert_eq!(store.users().unwrap(), vec![UserId::from("amy"), UserId::from("zed")]);
        assert!(store.fingerprint(&UserId::from("amy")).unwrap().is_some());
    }

    #[test]
    fn test_poisoned_lock_is_an_error() {
        let store = std::sync::Arc::new(InMemoryStore::new());
        let writer = std::sync::Arc::clone(&store);
        let _ = std::thread::spawn(move || {
            let _guard = writer.users.write().unwrap();
            panic!("writer died holding the lock");
        })
        .join();

        assert!(store.len().is_err());
        assert!(store.is_empty().is_err());
        assert!(store.users().is_err());
        assert!(store.commit_user(records("a", 1)).is_err());
    }
}
