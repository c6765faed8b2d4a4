//! Training module
//!
//! This module provides:
//! - The Burn training loop with Adam and cross-entropy
//! - Learning-rate decay and early stopping applied at epoch end
//! - Random hyperparameter search over both CNN variants
//!
//! ## Flow
//!
//! 1. Sample configurations and train each briefly on a subset
//! 2. Rank them by validation accuracy
//! 3. Retrain the winner on the full training split with the callbacks enabled

pub mod callbacks;
pub mod scheduler;
pub mod search;
pub mod trainer;

pub use callbacks::{EarlyStopDecision, EarlyStopping, EarlyStoppingConfig, Monitor};
pub use scheduler::{LRScheduler, LrDecay, LrSchedule, ReduceOnPlateauState};
pub use search::{RandomSearch, SearchResults, SearchSpace, Trial, TrialStatus};
pub use trainer::{
    evaluate_model, train_model, EpochRecord, EvalMetrics, TrainOptions, TrainingHistory,
    TrainingOutcome,
};

/// Default number of final training epochs
pub const DEFAULT_EPOCHS: usize = 20;

/// Default batch size
pub const DEFAULT_BATCH_SIZE: usize = 64;
