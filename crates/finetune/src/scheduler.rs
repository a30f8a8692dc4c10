use crate::errors::{FinetuneError, Result};

pub trait LRScheduler: Send {
    /// Learning rate for the next optimizer step; advances the schedule.
    fn step(&mut self) -> f64;
    fn learning_rate(&self) -> f64;
}

/// Linear warmup from zero to `base_lr` over `warmup_steps`, then linear
/// decay to zero at `total_steps`.
#[derive(Debug, Clone)]
pub struct LinearWarmupDecay {
    base_lr: f64,
    warmup_steps: usize,
    total_steps: usize,
    step: usize,
    current_lr: f64,
}

impl LinearWarmupDecay {
    pub fn new(base_lr: f64, warmup_steps: usize, total_steps: usize) -> Result<Self> {
        if base_lr <= 0.0 {
            return Err(FinetuneError::initialization(
                "scheduler requires base learning rate > 0",
            ));
        }
        if total_steps == 0 {
            return Err(FinetuneError::initialization(
                "scheduler requires total_steps greater than zero",
            ));
        }
        Ok(Self {
            base_lr,
            warmup_steps,
            total_steps,
            step: 0,
            current_lr: 0.0,
        })
    }

    pub fn lr_at(&self, step: usize) -> f64 {
        if step < self.warmup_steps {
            return self.base_lr * step as f64 / self.warmup_steps.max(1) as f64;
        }
        let remaining = self.total_steps.saturating_sub(step) as f64;
        let decay_span = self.total_steps.saturating_sub(self.warmup_steps).max(1) as f64;
        self.base_lr * (remaining / decay_span).max(0.0)
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }
}

impl LRScheduler for LinearWarmupDecay {
    fn step(&mut self) -> f64 {
        let lr = self.lr_at(self.step);
        self.current_lr = lr;
        self.step = self.step.saturating_add(1);
        lr
    }

    fn learning_rate(&self) -> f64 {
        self.current_lr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warms_up_then_decays_to_zero() {
        let mut scheduler = LinearWarmupDecay::new(1e-3, 4, 12).unwrap();
        let lrs: Vec<f64> = (0..13).map(|_| scheduler.step()).collect();

        assert_eq!(lrs[0], 0.0);
        assert!((lrs[2] - 5e-4).abs() < 1e-12);
        assert!((lrs[4] - 1e-3).abs() < 1e-12);
        assert!((lrs[8] - 5e-4).abs() < 1e-12);
        assert_eq!(lrs[12], 0.0);
        assert!(lrs[4..].windows(2).all(|pair| pair[1] <= pair[0]));
        assert_eq!(scheduler.learning_rate(), lrs[12]);
    }

    #[test]
    fn no_warmup_starts_at_base() {
        let scheduler = LinearWarmupDecay::new(2e-5, 0, 10).unwrap();
        assert!((scheduler.lr_at(0) - 2e-5).abs() < 1e-15);
        assert!((scheduler.lr_at(5) - 1e-5).abs() < 1e-15);
    }

    #[test]
    fn rejects_empty_schedule() {
        assert!(LinearWarmupDecay::new(1e-5, 0, 0).is_err());
        assert!(LinearWarmupDecay::new(0.0, 0, 10).is_err());
    }
}
