//! Learning-rate schedule.

/// Cosine annealing from `base_lr` down to `min_lr` over `t_max` steps.
///
/// Past `t_max` the curve continues as a cosine, rising back toward `base_lr`
/// the same way a non-restarting cosine schedule does.
#[derive(Debug, Clone, Copy)]
pub struct CosineAnnealing {
    pub base_lr: f64,
    pub min_lr: f64,
    pub t_max: usize,
    step: usize,
}

impl CosineAnnealing {
    pub fn new(base_lr: f64, t_max: usize) -> Self {
        Self {
            base_lr,
            min_lr: 0.0,
            t_max: t_max.max(1),
            step: 0,
        }
    }

    pub fn with_min_lr(mut self, min_lr: f64) -> Self {
        self.min_lr = min_lr;
        self
    }

    pub fn lr_at(&self, step: usize) -> f64 {
        let progress = step as f64 / self.t_max as f64;
        self.min_lr
            + (self.base_lr - self.min_lr) * (1.0 + (std::f64::consts::PI * progress).cos()) * 0.5
    }

    pub fn current(&self) -> f64 {
        self.lr_at(self.step)
    }

    /// Advance one step and return the new rate.
    pub fn step(&mut self) -> f64 {
        self.step += 1;
        self.current()
    }
}
