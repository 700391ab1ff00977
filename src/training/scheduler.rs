use tracing::info;

/// Learning rate schedulers
#[derive(Debug, Clone, PartialEq)]
pub enum LearningRateScheduler {
    /// Constant learning rate
    Constant { lr: f64 },
    /// Reduce on plateau of a minimized metric
    ReduceOnPlateau {
        lr: f64,
        factor: f64,
        patience: usize,
        min_lr: f64,
        /// Lowest metric seen so far
        best: Option<f64>,
        num_bad_epochs: usize,
    },
}

impl LearningRateScheduler {
    /// Create constant scheduler
    pub fn constant(lr: f64) -> Self {
        Self::Constant { lr }
    }

    /// Create reduce on plateau scheduler
    pub fn reduce_on_plateau(lr: f64, factor: f64, patience: usize, min_lr: f64) -> Self {
        Self::ReduceOnPlateau {
            lr,
            factor,
            patience,
            min_lr,
            best: None,
            num_bad_epochs: 0,
        }
    }

    /// Get current learning rate
    pub fn lr(&self) -> f64 {
        match *self {
            Self::Constant { lr } => lr,
            Self::ReduceOnPlateau { lr, .. } => lr,
        }
    }

    /// Observe the epoch's validation loss and return the learning rate to use next
    ///
    /// A loss strictly below the best so far resets the streak; an equal or
    /// higher loss extends it. When the streak reaches `patience` the rate is
    /// multiplied by `factor` (floored at `min_lr`) and the streak restarts.
    pub fn step(&mut self, metric: f64) -> f64 {
        if let Self::ReduceOnPlateau {
            lr,
            factor,
            patience,
            min_lr,
            best,
            num_bad_epochs,
        } = self
        {
            match *best {
                Some(b) if !(metric < b) => *num_bad_epochs += 1,
                _ => {
                    *best = Some(metric);
                    *num_bad_epochs = 0;
                }
            }

            if *num_bad_epochs >= *patience {
                let new_lr = (*lr * *factor).max(*min_lr);
                if new_lr < *lr {
                    info!("Reducing learning rate from {:.6} to {:.6}", lr, new_lr);
                    *lr = new_lr;
                }
                *num_bad_epochs = 0;
            }
        }

        self.lr()
    }
}

impl Default for LearningRateScheduler {
    fn default() -> Self {
        Self::constant(1e-4)
    }
}
