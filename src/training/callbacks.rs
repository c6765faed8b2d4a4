//! Epoch-end callbacks
//!
//! Early stopping watches one validation metric and tells the training
//! loop when to halt. With `restore_best` the loop keeps a copy of the
//! weights from the best epoch and hands those back instead of the last ones.

use serde::{Deserialize, Serialize};

/// Validation metric watched by early stopping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Monitor {
    ValLoss,
    ValAccuracy,
}

impl Monitor {
    /// True when `candidate` beats `best` by more than `min_delta`
    pub fn improves(&self, candidate: f64, best: f64, min_delta: f64) -> bool {
        match self {
            Monitor::ValLoss => candidate < best - min_delta,
            Monitor::ValAccuracy => candidate > best + min_delta,
        }
    }

    fn worst(&self) -> f64 {
        match self {
            Monitor::ValLoss => f64::INFINITY,
            Monitor::ValAccuracy => f64::NEG_INFINITY,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Monitor::ValLoss => "val_loss",
            Monitor::ValAccuracy => "val_accuracy",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarlyStoppingConfig {
    /// Epochs without improvement before stopping
    pub patience: usize,
    pub min_delta: f64,
    pub monitor: Monitor,
    /// Return the weights of the best epoch
    pub restore_best: bool,
}

impl Default for EarlyStoppingConfig {
    fn default() -> Self {
        Self {
            patience: 5,
            min_delta: 1e-4,
            monitor: Monitor::ValLoss,
            restore_best: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EarlyStopDecision {
    /// New best value
    Improved,
    /// No improvement for this many epochs
    Waiting(usize),
    Stop,
}

#[derive(Debug, Clone)]
pub struct EarlyStopping {
    config: EarlyStoppingConfig,
    best: f64,
    best_epoch: Option<usize>,
    wait: usize,
    epoch: usize,
}

impl EarlyStopping {
    pub fn new(config: EarlyStoppingConfig) -> Self {
        Self {
            best: config.monitor.worst(),
            config,
            best_epoch: None,
            wait: 0,
            epoch: 0,
        }
    }

    pub fn config(&self) -> &EarlyStoppingConfig {
        &self.config
    }

    /// Feed the monitored metric for the epoch that just finished
    pub fn update(&mut self, metric: f64) -> EarlyStopDecision {
        let epoch = self.epoch;
        self.epoch += 1;

        if metric.is_finite() && self.config.monitor.improves(metric, self.best, self.config.min_delta) {
            self.best = metric;
            self.best_epoch = Some(epoch);
            self.wait = 0;
            return EarlyStopDecision::Improved;
        }

        self.wait += 1;
        if self.wait >= self.config.patience {
            EarlyStopDecision::Stop
        } else {
            EarlyStopDecision::Waiting(self.wait)
        }
    }

    pub fn best(&self) -> Option<f64> {
        self.best_epoch.map(|_| self.best)
    }

    /// 0-based epoch of the best value
    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stopper(monitor: Monitor, patience: usize) -> EarlyStopping {
        EarlyStopping::new(EarlyStoppingConfig {
            patience,
            min_delta: 0.0,
            monitor,
            restore_best: true,
        })
    }

    #[test]
    fn test_stops_after_patience() {
        let mut es = stopper(Monitor::ValLoss, 2);
        assert_eq!(es.update(1.0), EarlyStopDecision::Improved);
        assert_eq!(es.update(0.8), EarlyStopDecision::Improved);
        assert_eq!(es.update(0.9), EarlyStopDecision::Waiting(1));
        assert_eq!(es.update(0.85), EarlyStopDecision::Stop);
        assert_eq!(es.best_epoch(), Some(1));
        assert_eq!(es.best(), Some(0.8));
    }

    #[test]
    fn test_improvement_resets_wait() {
        let mut es = stopper(Monitor::ValAccuracy, 2);
        es.update(0.6);
        assert_eq!(es.update(0.55), EarlyStopDecision::Waiting(1));
        assert_eq!(es.update(0.7), EarlyStopDecision::Improved);
        assert_eq!(es.update(0.65), EarlyStopDecision::Waiting(1));
    }

    #[test]
    fn test_min_delta() {
        let mut es = EarlyStopping::new(EarlyStoppingConfig {
            patience: 3,
            min_delta: 0.05,
            monitor: Monitor::ValAccuracy,
            restore_best: false,
        });
        es.update(0.80);
        assert_eq!(es.update(0.83), EarlyStopDecision::Waiting(1));
        assert_eq!(es.update(0.86), EarlyStopDecision::Improved);
    }

    #[test]
    fn test_nan_never_improves() {
        let mut es = stopper(Monitor::ValLoss, 1);
        assert_eq!(es.update(f64::NAN), EarlyStopDecision::Stop);
        assert_eq!(es.best(), None);
    }
}
