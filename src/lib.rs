// Library interface for TrainRisk modules
// Integration tests and the CLI binary both go through these re-exports

pub mod audit;
pub mod config;
pub mod daily;
pub mod divergence;
pub mod error;
pub mod export;
pub mod external_load;
pub mod internal_load;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod recalc;
pub mod rollout;
pub mod rolling;
pub mod store;
pub mod thresholds;

// Re-export commonly used types for convenience
pub use models::*;
pub use config::EngineConfig;
pub use daily::{DailyAggregator, DailyLoadRecord, DateWindow};
pub use divergence::{DivergenceCalculator, DivergenceRecord, DivergenceSignal, RiskLevel};
pub use error::{Result, TrainRiskError};
pub use external_load::ExternalLoadEstimator;
pub use internal_load::{CalculationStrategy, InternalLoad, InternalLoadEstimator};
pub use logging::{LogConfig, LogFormat, LogLevel};
pub use pipeline::{UserDerivedRecords, UserPipeline};
pub use recalc::{ActivitySource, BatchSummary, CancellationToken, InMemorySource, RecalculationOrchestrator};
pub use rollout::{MethodSelector, RolloutPlan, RolloutStage};
pub use rolling::{Acwr, RollingRatioEngine, RollingRatioRecord};
pub use store::{DerivedStore, InMemoryStore};
pub use thresholds::{RiskTier, TierTable, UserThresholdConfig};
