use crate::common::*;

/// The learning rate scheduling strategy, keyed by epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LearningRateSchedule {
    /// Use constant learning rate.
    Constant { lr: R64 },
    /// Use specific learning rate starting from specified epochs.
    StepWise { steps: Vec<(usize, R64)> },
}

#[derive(Debug, Clone)]
pub enum LrScheduler {
    Constant {
        lr: f64,
    },
    StepWise {
        lr_cache: f64,
        epoch: usize,
        index: usize,
        steps: Vec<(usize, R64)>,
    },
}

impl LrScheduler {
    pub fn new(config: &LearningRateSchedule) -> Result<Self> {
        let scheduler = match *config {
            LearningRateSchedule::Constant { lr } => {
                ensure!(lr > 0.0, "the lr must be positive");
                Self::Constant { lr: lr.raw() }
            }
            LearningRateSchedule::StepWise { ref steps } => {
                ensure!(
                    !steps.is_empty() && steps[0].0 == 0,
                    "the steps must start from zero"
                );

                steps.iter().try_fold(None, |prev_epoch, &(curr_epoch, lr)| {
                    if let Some(prev_epoch) = prev_epoch {
                        ensure!(curr_epoch > prev_epoch, "the steps must be monotonic");
                    }
                    ensure!(lr.raw() > 0.0, "lr must be positive");
                    Ok(Some(curr_epoch))
                })?;

                Self::StepWise {
                    lr_cache: steps[0].1.raw(),
                    epoch: 0,
                    index: 0,
                    steps: steps.clone(),
                }
            }
        };

        Ok(scheduler)
    }

    pub fn lr(&self) -> f64 {
        match self {
            Self::Constant { lr } => *lr,
            Self::StepWise { lr_cache, .. } => *lr_cache,
        }
    }

    /// Get the lr of the current epoch and advance to the next epoch.
    pub fn next(&mut self) -> f64 {
        match self {
            Self::Constant { lr } => *lr,
            Self::StepWise {
                epoch,
                index,
                steps,
                lr_cache,
            } => {
                let lr = steps[*index].1.raw();
                *epoch += 1;
                let next_index = *index + 1;
                if next_index < steps.len() && *epoch == steps[next_index].0 {
                    *index = next_index;
                }
                *lr_cache = lr;
                lr
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_wise_schedule() -> Result<()> {
        let mut scheduler = LrScheduler::new(&LearningRateSchedule::StepWise {
            steps: vec![(0, r64(1e-2)), (2, r64(1e-3)), (3, r64(1e-4))],
        })?;
        let lrs: Vec<_> = (0..5).map(|_| scheduler.next()).collect();
        assert_eq!(lrs, vec![1e-2, 1e-2, 1e-3, 1e-4, 1e-4]);
        assert_eq!(scheduler.lr(), 1e-4);
        Ok(())
    }

    #[test]
    fn invalid_schedules() {
        let invalid = [
            LearningRateSchedule::Constant { lr: r64(0.0) },
            LearningRateSchedule::StepWise { steps: vec![] },
            LearningRateSchedule::StepWise {
                steps: vec![(1, r64(1e-3))],
            },
            LearningRateSchedule::StepWise {
                steps: vec![(0, r64(1e-3)), (0, r64(1e-4))],
            },
        ];
        for schedule in &invalid {
            assert!(LrScheduler::new(schedule).is_err());
        }
    }
}
