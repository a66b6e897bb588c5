//! Batch recalculation of derived records using rayon
//!
//! Re-runs the load pipeline over each user's full history and commits the
//! result atomically per user:
//! - Configurable thread pool sizing
//! - Per-user strategy from the rollout selector
//! - Failure isolation with a summary of failed users
//! - Cancellation between users
//! - Optional as-of date, so trailing rest days are derived up to today

use chrono::{DateTime, NaiveDate, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audit::{self, AuditReport};
use crate::error::{ErrorSeverity, Result, SourceError, TrainRiskError};
use crate::internal_load::CalculationStrategy;
use crate::models::{UserHistory, UserId};
use crate::pipeline::{UserDerivedRecords, UserPipeline};
use crate::rollout::MethodSelector;
use crate::store::{CommitOutcome, DerivedStore};

/// Supplies a user's profile and activities
pub trait ActivitySource: Send + Sync {
    /// Every user the source knows about
    fn user_ids(&self) -> Result<Vec<UserId>>;

    fn load_user(&self, user: &UserId) -> Result<UserHistory>;
}

/// Source over histories already in memory
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    users: BTreeMap<UserId, UserHistory>,
}

impl InMemorySource {
    pub fn new(histories: Vec<UserHistory>) -> Self {
        let users = histories
            .into_iter()
            .map(|h| (h.profile.user_id.clone(), h))
            .collect();
        InMemorySource { users }
    }

    /// Load a JSON array of user histories
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| SourceError::File {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let histories: Vec<UserHistory> = serde_json::from_str(&content).map_err(|e| SourceError::File {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Self::new(histories))
    }

    /// Replace a user's history, as an upstream ingest would
    pub fn upsert(&mut self, history: UserHistory) {
        self.users.insert(history.profile.user_id.clone(), history);
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl ActivitySource for InMemorySource {
    fn user_ids(&self) -> Result<Vec<UserId>> {
        Ok(self.users.keys().cloned().collect())
    }

    fn load_user(&self, user: &UserId) -> Result<UserHistory> {
        self.users
            .get(user)
            .cloned()
            .ok_or_else(|| SourceError::UserNotFound { user: user.clone() }.into())
    }
}

/// Shared flag checked between users
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Configuration for batch recalculation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Worker threads; rayon's default when unset
    pub num_threads: Option<usize>,

    /// Show progress bar during the run
    pub show_progress: bool,

    /// Derive records through this date, filling rest days after the last
    /// activity; the last activity date when unset
    pub as_of: Option<NaiveDate>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig {
            num_threads: None,
            show_progress: true,
            as_of: None,
        }
    }
}

/// How one user's recalculation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserOutcome {
    Committed {
        outcome: CommitOutcome,
        strategy: CalculationStrategy,
    },
    Failed(String),
    Skipped,
}

/// Summary of a batch recalculation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Unique id of this run, for log correlation
    pub run_id: Uuid,

    pub started_at: DateTime<Utc>,

    pub total_users: usize,

    /// Users whose records were rewritten
    pub written: Vec<UserId>,

    /// Users whose records already matched
    pub unchanged: Vec<UserId>,

    /// Users that failed, with the reason
    pub failed: Vec<(UserId, String)>,

    /// Users not started because the run was cancelled
    pub skipped: Vec<UserId>,

    /// Users computed with the enhanced method
    pub enhanced_users: usize,

    pub duration_ms: u128,
}

impl BatchSummary {
    fn new(run_id: Uuid, started_at: DateTime<Utc>, total_users: usize) -> Self {
        BatchSummary {
            run_id,
            started_at,
            total_users,
            written: Vec::new(),
            unchanged: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            enhanced_users: 0,
            duration_ms: 0,
        }
    }

    pub fn succeeded(&self) -> usize {
        self.written.len() + self.unchanged.len()
    }

    pub fn is_fully_successful(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }

    pub fn was_cancelled(&self) -> bool {
        !self.skipped.is_empty()
    }

    /// Get human-readable summary
    pub fn to_string_pretty(&self) -> String {
        format!(
            "Recalculation Summary ({})\n  \
             Total Users: {}\n  \
             Written: {}\n  \
             Unchanged: {}\n  \
             Failed: {}\n  \
             Skipped: {}\n  \
             Enhanced Method: {}\n  \
             Total Time: {:.2}s",
            self.run_id,
            self.total_users,
            self.written.len(),
            self.unchanged.len(),
            self.failed.len(),
            self.skipped.len(),
            self.enhanced_users,
            self.duration_ms as f64 / 1000.0
        )
    }
}

/// Re-runs the pipeline over users' histories and commits the results
pub struct RecalculationOrchestrator {
    pub config: BatchConfig,
    pipeline: UserPipeline,
}

impl RecalculationOrchestrator {
    pub fn new(pipeline: UserPipeline) -> Self {
        Self::with_config(pipeline, BatchConfig::default())
    }

    pub fn with_config(pipeline: UserPipeline, config: BatchConfig) -> Self {
        RecalculationOrchestrator { config, pipeline }
    }

    pub fn pipeline(&self) -> &UserPipeline {
        &self.pipeline
    }

    /// Compute a user's records without committing them
    pub fn compute_user(
        &self,
        user: &UserId,
        source: &dyn ActivitySource,
        selector: &dyn MethodSelector,
    ) -> Result<UserDerivedRecords> {
        let history = source.load_user(user)?;
        let strategy = selector.strategy_for(user);
        let as_of = self.config.as_of;

        if let (Some(as_of), Some(first)) = (as_of, history.activities.iter().map(|a| a.date).min()) {
            if first > as_of {
                debug!(user = %user, %as_of, "No activities on or before the as-of date");
                let tier = self.pipeline.thresholds_for(&history.profile).tier;
                return Ok(UserDerivedRecords::empty(user.clone(), strategy, tier));
            }
        }

        self.pipeline.run_window(&history, None, as_of, strategy)
    }

    /// Recalculate and commit one user
    pub fn recalculate_user(
        &self,
        user: &UserId,
        source: &dyn ActivitySource,
        selector: &dyn MethodSelector,
        store: &dyn DerivedStore,
    ) -> Result<(CommitOutcome, CalculationStrategy)> {
        let records = self.compute_user(user, source, selector)?;
        let strategy = records.strategy;
        let outcome = store.commit_user(records)?;
        Ok((outcome, strategy))
    }

    /// Compare what a recalculation would produce against the stored records
    pub fn preview_user(
        &self,
        user: &UserId,
        source: &dyn ActivitySource,
        selector: &dyn MethodSelector,
        store: &dyn DerivedStore,
    ) -> Result<AuditReport> {
        let after = self.compute_user(user, source, selector)?;
        let before = store.user_records(user)?;
        Ok(audit::compare(before.as_ref(), &after))
    }

    /// Recalculate every user the source knows about
    pub fn recalculate_all(
        &self,
        source: &dyn ActivitySource,
        selector: &dyn MethodSelector,
        store: &dyn DerivedStore,
        cancel: &CancellationToken,
    ) -> Result<BatchSummary> {
        let users = source.user_ids()?;
        self.recalculate_users(&users, source, selector, store, cancel)
    }

    /// Recalculate a set of users in parallel.
    ///
    /// A failing user is recorded and the batch continues. Users not yet
    /// started when `cancel` fires are reported as skipped; users already
    /// running finish and commit.
    pub fn recalculate_users(
        &self,
        users: &[UserId],
        source: &dyn ActivitySource,
        selector: &dyn MethodSelector,
        store: &dyn DerivedStore,
        cancel: &CancellationToken,
    ) -> Result<BatchSummary> {
        let start_time = Instant::now();
        let run_id = Uuid::new_v4();
        let mut summary = BatchSummary::new(run_id, Utc::now(), users.len());

        info!(run_id = %run_id, users = users.len(), "Starting recalculation");

        let progress = if self.config.show_progress {
            let pb = ProgressBar::new(users.len() as u64);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({msg})")
            {
                pb.set_style(style.progress_chars("#>-"));
            }
            Some(pb)
        } else {
            None
        };

        let run = || -> Vec<(UserId, UserOutcome)> {
            users
                .par_iter()
                .map(|user| {
                    let outcome = self.process_user(user, source, selector, store, cancel);
                    if let Some(ref pb) = progress {
                        pb.inc(1);
                        pb.set_message(user.to_string());
                    }
                    (user.clone(), outcome)
                })
                .collect()
        };

        let outcomes = match self.config.num_threads {
            Some(num_threads) => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(num_threads)
                    .build()
                    .map_err(|e| TrainRiskError::Config(format!("Failed to create thread pool: {}", e)))?;
                pool.install(run)
            }
            None => run(),
        };

        if let Some(pb) = progress {
            pb.finish_with_message("Complete");
        }

        for (user, outcome) in outcomes {
            match outcome {
                UserOutcome::Committed { outcome, strategy } => {
                    if strategy == CalculationStrategy::Enhanced {
                        summary.enhanced_users += 1;
                    }
                    match outcome {
                        CommitOutcome::Written => summary.written.push(user),
                        CommitOutcome::Unchanged => summary.unchanged.push(user),
                    }
                }
                UserOutcome::Failed(reason) => summary.failed.push((user, reason)),
                UserOutcome::Skipped => summary.skipped.push(user),
            }
        }

        summary.duration_ms = start_time.elapsed().as_millis();
        info!("{}", summary.to_string_pretty());

        if !summary.failed.is_empty() {
            let ids: Vec<&str> = summary.failed.iter().map(|(u, _)| u.as_str()).collect();
            warn!(run_id = %run_id, failed = ?ids, "Some users failed to recalculate");
        }

        Ok(summary)
    }

    fn process_user(
        &self,
        user: &UserId,
        source: &dyn ActivitySource,
        selector: &dyn MethodSelector,
        store: &dyn DerivedStore,
        cancel: &CancellationToken,
    ) -> UserOutcome {
        if cancel.is_cancelled() {
            debug!(user = %user, "Batch cancelled, user skipped");
            return UserOutcome::Skipped;
        }

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.recalculate_user(user, source, selector, store)
        }));

        match result {
            Ok(Ok((outcome, strategy))) => UserOutcome::Committed { outcome, strategy },
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(user = %user, panic = %message, "User recalculation panicked");
                UserOutcome::Failed(format!("panicked: {}", message))
            }
            Ok(Err(e)) => {
                match e.severity() {
                    ErrorSeverity::Warning => {
                        warn!(user = %user, error = %e, retryable = e.is_retryable(), "User recalculation failed")
                    }
                    ErrorSeverity::Error => {
                        error!(user = %user, error = %e, retryable = e.is_retryable(), "User recalculation failed")
                    }
                }
                UserOutcome::Failed(e.to_string())
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
