//! Learning Rate Scheduler Module
//!
//! Learning-rate decay for the final training run. `LrDecay` is the
//! serializable configuration; `LrSchedule` turns it into a learning rate
//! per epoch, feeding validation loss to the plateau variant.

use serde::{Deserialize, Serialize};

/// Configured learning-rate decay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LrDecay {
    /// Keep the initial learning rate
    Constant,

    /// Multiply by `factor` every `every` epochs
    Step { factor: f64, every: usize },

    /// lr = initial_lr * rate^epoch
    Exponential { rate: f64 },

    /// Multiply by `factor` after `patience` epochs without a lower
    /// validation loss, never going below `min_lr`
    ReduceOnPlateau {
        factor: f64,
        patience: usize,
        min_lr: f64,
    },
}

impl Default for LrDecay {
    fn default() -> Self {
        Self::ReduceOnPlateau {
            factor: 0.5,
            patience: 2,
            min_lr: 1e-6,
        }
    }
}

impl LrDecay {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::Constant => Ok(()),
            Self::Step { factor, every } => {
                if *every == 0 {
                    return Err("step decay interval must be at least 1 epoch".into());
                }
                check_factor(*factor)
            }
            Self::Exponential { rate } => check_factor(*rate),
            Self::ReduceOnPlateau {
                factor,
                patience,
                min_lr,
            } => {
                if *patience == 0 {
                    return Err("plateau patience must be at least 1 epoch".into());
                }
                if *min_lr < 0.0 {
                    return Err("min_lr must be non-negative".into());
                }
                check_factor(*factor)
            }
        }
    }

    pub fn description(&self) -> String {
        match self {
            Self::Constant => "constant".to_string(),
            Self::Step { factor, every } => format!("step x{} every {} epochs", factor, every),
            Self::Exponential { rate } => format!("exponential x{} per epoch", rate),
            Self::ReduceOnPlateau {
                factor,
                patience,
                min_lr,
            } => format!(
                "reduce on plateau x{} after {} epochs (min {:.0e})",
                factor, patience, min_lr
            ),
        }
    }
}

fn check_factor(factor: f64) -> Result<(), String> {
    if factor > 0.0 && factor <= 1.0 {
        Ok(())
    } else {
        Err(format!("decay factor must be in (0, 1], got {}", factor))
    }
}

/// Epoch-indexed learning rate schedules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LRScheduler {
    Constant {
        lr: f64,
    },

    /// Reduce LR by `decay_factor` every `step_size` epochs
    StepDecay {
        initial_lr: f64,
        decay_factor: f64,
        step_size: usize,
    },

    Exponential {
        initial_lr: f64,
        decay_rate: f64,
    },
}

impl LRScheduler {
    pub fn constant(lr: f64) -> Self {
        Self::Constant { lr }
    }

    pub fn step_decay(initial_lr: f64, decay_factor: f64, step_size: usize) -> Self {
        Self::StepDecay {
            initial_lr,
            decay_factor,
            step_size,
        }
    }

    pub fn exponential(initial_lr: f64, decay_rate: f64) -> Self {
        Self::Exponential {
            initial_lr,
            decay_rate,
        }
    }

    /// Learning rate for a given epoch (0-based)
    pub fn get_lr(&self, epoch: usize) -> f64 {
        match self {
            Self::Constant { lr } => *lr,

            Self::StepDecay {
                initial_lr,
                decay_factor,
                step_size,
            } => initial_lr * decay_factor.powi((epoch / (*step_size).max(1)) as i32),

            Self::Exponential {
                initial_lr,
                decay_rate,
            } => initial_lr * decay_rate.powi(epoch as i32),
        }
    }
}

/// State for reduce-on-plateau scheduling on a metric that should decrease
#[derive(Debug, Clone)]
pub struct ReduceOnPlateauState {
    best_metric: f64,
    epochs_without_improvement: usize,
    current_lr: f64,
    reduction_factor: f64,
    patience: usize,
    min_lr: f64,
}

impl ReduceOnPlateauState {
    pub fn new(
        initial_lr: f64,
        reduction_factor: f64,
        patience: usize,
        min_lr: f64,
    ) -> Self {
        Self {
            best_metric: f64::INFINITY,
            epochs_without_improvement: 0,
            current_lr: initial_lr,
            reduction_factor,
            patience,
            min_lr,
        }
    }

    /// Update with a new metric value and return the learning rate for the next epoch
    pub fn step(&mut self, metric: f64) -> f64 {
        if metric < self.best_metric {
            self.best_metric = metric;
            self.epochs_without_improvement = 0;
        } else {
            self.epochs_without_improvement += 1;

            if self.epochs_without_improvement >= self.patience {
                let new_lr = (self.current_lr * self.reduction_factor).max(self.min_lr);
                if new_lr < self.current_lr {
                    self.current_lr = new_lr;
                }
                self.epochs_without_improvement = 0;
            }
        }

        self.current_lr
    }

    pub fn get_lr(&self) -> f64 {
        self.current_lr
    }
}

/// Learning rate driver used by the training loop
#[derive(Debug, Clone)]
pub enum LrSchedule {
    Fixed(LRScheduler),
    Plateau(ReduceOnPlateauState),
}

impl LrSchedule {
    pub fn new(decay: &LrDecay, initial_lr: f64) -> Self {
        match decay {
            LrDecay::Constant => Self::Fixed(LRScheduler::constant(initial_lr)),
            LrDecay::Step { factor, every } => {
                Self::Fixed(LRScheduler::step_decay(initial_lr, *factor, *every))
            }
            LrDecay::Exponential { rate } => Self::Fixed(LRScheduler::exponential(initial_lr, *rate)),
            LrDecay::ReduceOnPlateau {
                factor,
                patience,
                min_lr,
            } => Self::Plateau(ReduceOnPlateauState::new(
                initial_lr,
                *factor,
                *patience,
                *min_lr,
            )),
        }
    }

    /// Learning rate to use during `epoch`
    pub fn lr_for_epoch(&self, epoch: usize) -> f64 {
        match self {
            Self::Fixed(scheduler) => scheduler.get_lr(epoch),
            Self::Plateau(state) => state.get_lr(),
        }
    }

    /// Report the validation loss at the end of an epoch
    pub fn observe(&mut self, val_loss: f64) {
        if let Self::Plateau(state) = self {
            state.step(val_loss);
        }
    }
}
