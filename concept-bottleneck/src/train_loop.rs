//! The epoch loop with best-checkpoint promotion.

use crate::{common::*, model::Checkpoint, AttributesToClassModel, ImageToAttributesModel, JointModel};

/// Loss and accuracy of a model over a view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub loss: f64,
    pub accuracy: f64,
}

/// A model whose parameters can be copied out and restored.
pub trait Snapshot {
    type State;

    fn snapshot(&self) -> Self::State;

    fn restore(&mut self, state: &Self::State) -> Result<()>;
}

/// A deep copy of the variables in a [nn::VarStore].
#[derive(Debug)]
pub struct StateDict {
    tensors: HashMap<String, Tensor>,
}

impl StateDict {
    pub fn capture(vs: &nn::VarStore) -> Self {
        let tensors = tch::no_grad(|| {
            vs.variables()
                .into_iter()
                .map(|(name, tensor)| (name, tensor.copy()))
                .collect()
        });
        Self { tensors }
    }

    pub fn restore(&self, vs: &nn::VarStore) -> Result<()> {
        tch::no_grad(|| {
            vs.variables().into_iter().try_for_each(|(name, mut tensor)| {
                let saved = self
                    .tensors
                    .get(&name)
                    .ok_or_else(|| format_err!("variable '{}' is missing in the state", name))?;
                tensor.copy_(saved);
                Ok(())
            })
        })
    }
}

impl Snapshot for ImageToAttributesModel {
    type State = StateDict;

    fn snapshot(&self) -> StateDict {
        StateDict::capture(self.var_store())
    }

    fn restore(&mut self, state: &StateDict) -> Result<()> {
        state.restore(self.var_store())
    }
}

impl Snapshot for AttributesToClassModel {
    type State = StateDict;

    fn snapshot(&self) -> StateDict {
        StateDict::capture(self.var_store())
    }

    fn restore(&mut self, state: &StateDict) -> Result<()> {
        state.restore(self.var_store())
    }
}

impl Snapshot for JointModel {
    type State = (StateDict, StateDict);

    fn snapshot(&self) -> Self::State {
        (self.encoder.snapshot(), self.classifier.snapshot())
    }

    fn restore(&mut self, (encoder, classifier): &Self::State) -> Result<()> {
        self.encoder.restore(encoder)?;
        self.classifier.restore(classifier)?;
        Ok(())
    }
}

/// The promoted parameter state with the highest test accuracy.
#[derive(Debug)]
pub struct BestState<S> {
    /// 0-based epoch where the state was captured.
    pub epoch: usize,
    pub accuracy: f64,
    pub state: S,
}

/// The epoch loop.
///
/// Each epoch trains one pass over the training view, evaluates on both
/// views, and promotes the parameters when the test accuracy strictly
/// exceeds the best seen so far.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingLoop {
    pub epochs: usize,
    /// Stop after the epoch whose test accuracy reaches this value.
    pub stop_at_accuracy: Option<f64>,
}

impl TrainingLoop {
    pub fn new(epochs: usize) -> Self {
        Self {
            epochs,
            stop_at_accuracy: None,
        }
    }

    pub fn run<M, V, TrainFn, TestFn, OnBest>(
        &self,
        model: &mut M,
        mut train_fn: TrainFn,
        mut test_fn: TestFn,
        train_view: &V,
        test_view: &V,
        mut on_best: OnBest,
    ) -> Result<Option<BestState<M::State>>>
    where
        M: Snapshot,
        V: ?Sized,
        TrainFn: FnMut(&mut M, &V, usize) -> Result<()>,
        TestFn: FnMut(&M, &V) -> Result<Evaluation>,
        OnBest: FnMut(&M, f64) -> Result<()>,
    {
        let mut best_accuracy = 0.0;
        let mut best: Option<BestState<M::State>> = None;

        for epoch in 0..self.epochs {
            info!("epoch {}/{}", epoch + 1, self.epochs);

            train_fn(model, train_view, epoch)?;

            let train_eval = test_fn(model, train_view)?;
            info!(
                "training loss: {:.4}, training accuracy: {:.4}%",
                train_eval.loss,
                train_eval.accuracy * 100.0
            );

            let test_eval = test_fn(model, test_view)?;
            info!(
                "test loss: {:.4}, test accuracy: {:.4}%",
                test_eval.loss,
                test_eval.accuracy * 100.0
            );

            if test_eval.accuracy > best_accuracy {
                best_accuracy = test_eval.accuracy;
                best = Some(BestState {
                    epoch,
                    accuracy: test_eval.accuracy,
                    state: model.snapshot(),
                });
                on_best(model, test_eval.accuracy)?;
            }

            if let Some(threshold) = self.stop_at_accuracy {
                if test_eval.accuracy >= threshold {
                    info!(
                        "stop training since test accuracy reaches {:.4}%",
                        threshold * 100.0
                    );
                    break;
                }
            }
        }

        info!("best test accuracy: {:.4}%", best_accuracy * 100.0);
        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A model whose single parameter is its accuracy.
    #[derive(Debug)]
    struct Counter {
        value: usize,
    }

    impl Snapshot for Counter {
        type State = usize;

        fn snapshot(&self) -> usize {
            self.value
        }

        fn restore(&mut self, state: &usize) -> Result<()> {
            self.value = *state;
            Ok(())
        }
    }

    fn run_with_accuracies(
        training: TrainingLoop,
        accuracies: &[f64],
    ) -> Result<(Option<BestState<usize>>, Vec<f64>, usize)> {
        let mut promoted = vec![];
        let mut trained_epochs = 0;
        let mut model = Counter { value: 0 };

        let best = training.run(
            &mut model,
            |model, _view: &[f64], _epoch| {
                model.value += 1;
                trained_epochs += 1;
                Ok(())
            },
            |model, view| {
                Ok(Evaluation {
                    loss: 1.0,
                    accuracy: view[model.value - 1],
                })
            },
            accuracies,
            accuracies,
            |_model, accuracy| {
                promoted.push(accuracy);
                Ok(())
            },
        )?;

        Ok((best, promoted, trained_epochs))
    }

    #[test]
    fn zero_epochs_promote_nothing() -> Result<()> {
        let (best, promoted, trained) = run_with_accuracies(TrainingLoop::new(0), &[0.5])?;
        assert!(best.is_none());
        assert!(promoted.is_empty());
        assert_eq!(trained, 0);
        Ok(())
    }

    #[test]
    fn promotes_only_strict_improvements() -> Result<()> {
        let accuracies = [0.2, 0.5, 0.5, 0.4, 0.7, 0.6];
        let (best, promoted, trained) = run_with_accuracies(TrainingLoop::new(6), &accuracies)?;
        assert_eq!(trained, 6);
        assert_eq!(promoted, vec![0.2, 0.5, 0.7]);

        let best = best.unwrap();
        assert_eq!(best.epoch, 4);
        assert_eq!(best.state, 5);
        assert_eq!(best.accuracy, 0.7);
        Ok(())
    }

    #[test]
    fn zero_accuracy_is_never_promoted() -> Result<()> {
        let (best, promoted, _) = run_with_accuracies(TrainingLoop::new(2), &[0.0, 0.0])?;
        assert!(best.is_none());
        assert!(promoted.is_empty());
        Ok(())
    }

    #[test]
    fn stops_at_accuracy_threshold() -> Result<()> {
        let training = TrainingLoop {
            epochs: 5,
            stop_at_accuracy: Some(0.9),
        };
        let (best, _, trained) = run_with_accuracies(training, &[0.3, 0.95, 0.99, 0.99, 0.99])?;
        assert_eq!(trained, 2);
        assert_eq!(best.unwrap().epoch, 1);
        Ok(())
    }

    #[test]
    fn train_errors_are_propagated() {
        let mut model = Counter { value: 0 };
        let mut promoted = 0;
        let result = TrainingLoop::new(3).run(
            &mut model,
            |_model, _view: &(), _epoch| Err(format_err!("loss is NaN")),
            |_model, _view| {
                Ok(Evaluation {
                    loss: 0.0,
                    accuracy: 1.0,
                })
            },
            &(),
            &(),
            |_model, _accuracy| {
                promoted += 1;
                Ok(())
            },
        );
        assert!(result.is_err());
        assert_eq!(promoted, 0);
    }

    #[test]
    fn state_dict_restores_parameters() -> Result<()> {
        let init = crate::AttributeClassifierInit {
            num_attributes: 4,
            num_classes: 2,
            hidden_dims: vec![],
        };
        let mut model = AttributesToClassModel::new(&init, Device::Cpu)?;
        let input = Tensor::rand(&[3, 4], FLOAT_CPU);
        let before = model.forward(&input);

        let state = model.snapshot();
        tch::no_grad(|| {
            for (_, mut tensor) in model.var_store().variables() {
                let _ = tensor.fill_(0.5);
            }
        });
        assert!(f64::from(&(model.forward(&input) - &before).abs().max()) > 1e-6);

        model.restore(&state)?;
        assert!(f64::from(&(model.forward(&input) - &before).abs().max()) < 1e-6);
        Ok(())
    }
}
