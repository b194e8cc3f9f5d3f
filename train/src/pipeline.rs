//! Runs the configured regimes over the dataset.

use crate::{
    common::*,
    config::{Config, DatasetConfig},
    utils::save_checkpoint,
};
use concept_bottleneck::{
    fit_attributes_to_class, fit_image_to_attributes, fit_joint, predict_attribute_matrix,
};

/// The train and test views of the dataset.
#[derive(Debug, Clone)]
pub struct Datasets {
    pub store: Arc<LabelStore>,
    pub train_images: Cub200ImageToAttributes,
    pub test_images: Cub200ImageToAttributes,
    pub train_classes: Cub200AttributesToClass,
    pub test_classes: Cub200AttributesToClass,
    config: DatasetConfig,
}

impl Datasets {
    pub fn load(config: &DatasetConfig) -> Result<Self> {
        let store = LabelStore::cached(&config.dataset_dir)?;
        let transform = cub_dataset::resize_and_normalize(config.image_size);

        let image_view = |partition| {
            Cub200ImageToAttributesInit {
                convention: config.split_convention,
                calibration: config.calibration.clone(),
                transform: Some(transform.clone()),
                ..Cub200ImageToAttributesInit::new(partition)
            }
            .build(store.clone())
        };
        let train_images = image_view(Partition::Train)?;
        let test_images = image_view(Partition::Test)?;

        let datasets = Self {
            train_classes: Self::class_view(&store, config, Partition::Train, None)?,
            test_classes: Self::class_view(&store, config, Partition::Test, None)?,
            store,
            train_images,
            test_images,
            config: config.clone(),
        };

        info!(
            "loaded {} training and {} test images",
            datasets.train_images.len(),
            datasets.test_images.len()
        );
        Ok(datasets)
    }

    /// Views pairing predicted attributes with class labels.
    pub fn predicted_class_views(
        &self,
        attributes: ndarray::Array2<f32>,
    ) -> Result<(Cub200AttributesToClass, Cub200AttributesToClass)> {
        let train = Self::class_view(
            &self.store,
            &self.config,
            Partition::Train,
            Some(attributes.clone()),
        )?;
        let test = Self::class_view(&self.store, &self.config, Partition::Test, Some(attributes))?;
        Ok((train, test))
    }

    fn class_view(
        store: &Arc<LabelStore>,
        config: &DatasetConfig,
        partition: Partition,
        attributes: Option<ndarray::Array2<f32>>,
    ) -> Result<Cub200AttributesToClass> {
        Cub200AttributesToClassInit {
            convention: config.split_convention,
            calibration: config.calibration.clone(),
            attributes,
            ..Cub200AttributesToClassInit::new(partition)
        }
        .build(store.clone())
    }
}

/// A checkpoint written during the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedCheckpoint {
    pub name: String,
    pub path: PathBuf,
    /// 1-based epoch of the promoted state.
    pub epoch: usize,
    pub accuracy: f64,
}

/// Trains the configured regimes and persists their best checkpoints.
pub struct Pipeline<'a> {
    config: &'a Config,
    datasets: &'a Datasets,
    checkpoint_dir: &'a Path,
    independent_encoder: Option<ImageToAttributesModel>,
    saved: Vec<SavedCheckpoint>,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a Config, datasets: &'a Datasets, checkpoint_dir: &'a Path) -> Self {
        Self {
            config,
            datasets,
            checkpoint_dir,
            independent_encoder: None,
            saved: vec![],
        }
    }

    /// Run every configured regime once, in the configured order.
    pub fn run(mut self) -> Result<Vec<SavedCheckpoint>> {
        let regimes: Vec<Regime> = self.config.training.regimes.iter().copied().unique().collect();

        for regime in regimes {
            info!("training the {} regime", regime);
            match regime {
                Regime::Independent => self.train_independent()?,
                Regime::Sequential => self.train_sequential()?,
                Regime::Joint => self.train_joint()?,
            }
        }

        Ok(self.saved)
    }

    fn train_independent(&mut self) -> Result<()> {
        self.independent_encoder()?;
        let datasets = self.datasets;
        self.train_classifier(
            Regime::Independent,
            &datasets.train_classes,
            &datasets.test_classes,
        )
    }

    fn train_sequential(&mut self) -> Result<()> {
        let datasets = self.datasets;
        let batch_size = self.config.training.batch_size.get();
        let encoder = self.independent_encoder()?;

        info!("predicting attributes with the independent encoder");
        let attributes = predict_attribute_matrix(
            encoder,
            &[&datasets.train_images, &datasets.test_images],
            datasets.store.num_images(),
            batch_size,
        )?;
        let (train_view, test_view) = datasets.predicted_class_views(attributes)?;

        self.train_classifier(Regime::Sequential, &train_view, &test_view)
    }

    fn train_joint(&mut self) -> Result<()> {
        let config = self.config;
        let Config {
            model, training, ..
        } = config;
        let datasets = self.datasets;
        let checkpoint_dir = self.checkpoint_dir;
        let encoder_name = Regime::Joint.checkpoint(Stage::ImageToAttributes);
        let classifier_name = Regime::Joint.checkpoint(Stage::AttributesToClass);

        let classifier_init = model.classifier_init();
        check_class_range(&datasets.train_classes, classifier_init.num_classes)?;
        check_class_range(&datasets.test_classes, classifier_init.num_classes)?;

        let mut joint =
            JointModel::new(&model.encoder_init(), &classifier_init, training.device)?;
        let train_views = JointViews::new(&datasets.train_images, &datasets.train_classes)?;
        let test_views = JointViews::new(&datasets.test_images, &datasets.test_classes)?;

        let best = fit_joint(
            &mut joint,
            train_views,
            test_views,
            &training.fit_options(training.joint_epochs),
            |joint, accuracy| {
                save_checkpoint(&joint.encoder, checkpoint_dir, encoder_name, accuracy)?;
                save_checkpoint(&joint.classifier, checkpoint_dir, classifier_name, accuracy)?;
                Ok(())
            },
        )?;

        match best {
            Some(best) => {
                self.record(encoder_name, best.epoch, best.accuracy);
                self.record(classifier_name, best.epoch, best.accuracy);
            }
            None => warn!("no checkpoint is saved for the joint regime"),
        }
        Ok(())
    }

    /// Get the independent encoder, training it on first use.
    fn independent_encoder(&mut self) -> Result<&ImageToAttributesModel> {
        if self.independent_encoder.is_none() {
            let config = self.config;
            let Config {
                model, training, ..
            } = config;
            let datasets = self.datasets;
            let checkpoint_dir = self.checkpoint_dir;
            let name = Regime::Independent.checkpoint(Stage::ImageToAttributes);

            let mut encoder = ImageToAttributesModel::new(&model.encoder_init(), training.device)?;
            let best = fit_image_to_attributes(
                &mut encoder,
                &datasets.train_images,
                &datasets.test_images,
                &training.fit_options(training.image_to_attributes_epochs),
                |encoder, accuracy| {
                    save_checkpoint(encoder, checkpoint_dir, name, accuracy)?;
                    Ok(())
                },
            )?;

            match best {
                Some(best) => self.record(name, best.epoch, best.accuracy),
                None => warn!("no checkpoint is saved for '{}'", name),
            }
            self.independent_encoder = Some(encoder);
        }

        self.independent_encoder
            .as_ref()
            .ok_or_else(|| format_err!("the independent encoder is not trained"))
    }

    fn train_classifier(
        &mut self,
        regime: Regime,
        train_view: &Cub200AttributesToClass,
        test_view: &Cub200AttributesToClass,
    ) -> Result<()> {
        let config = self.config;
        let Config {
            model, training, ..
        } = config;
        let checkpoint_dir = self.checkpoint_dir;
        let name = regime.checkpoint(Stage::AttributesToClass);
        let classifier_init = model.classifier_init();
        check_class_range(train_view, classifier_init.num_classes)?;
        check_class_range(test_view, classifier_init.num_classes)?;

        let mut classifier = AttributesToClassModel::new(&classifier_init, training.device)?;
        let best = fit_attributes_to_class(
            &mut classifier,
            train_view,
            test_view,
            &training.fit_options(training.attributes_to_class_epochs),
            |classifier, accuracy| {
                save_checkpoint(classifier, checkpoint_dir, name, accuracy)?;
                Ok(())
            },
        )?;

        match best {
            Some(best) => self.record(name, best.epoch, best.accuracy),
            None => warn!("no checkpoint is saved for '{}'", name),
        }
        Ok(())
    }

    fn record(&mut self, name: CheckpointName, epoch: usize, accuracy: f64) {
        self.saved.push(SavedCheckpoint {
            name: name.to_string(),
            path: name.path_in(self.checkpoint_dir),
            epoch: epoch + 1,
            accuracy,
        });
    }
}

/// Fail when the class targets of a view exceed the classifier outputs.
fn check_class_range(view: &Cub200AttributesToClass, num_classes: i64) -> Result<()> {
    ensure_class_index_below(view.max_class_index(), num_classes)
        .with_context(|| format!("invalid {} class labels", view.partition()))
}

fn ensure_class_index_below(max_class_index: Option<usize>, num_classes: i64) -> Result<()> {
    if let Some(max_class_index) = max_class_index {
        ensure!(
            (max_class_index as i64) < num_classes,
            DataError::integrity(format!(
                "class index {} is out of range for a classifier of {} classes",
                max_class_index, num_classes
            ))
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_index_must_fit_classifier() -> Result<()> {
        ensure_class_index_below(None, 3)?;
        ensure_class_index_below(Some(2), 3)?;

        let err = ensure_class_index_below(Some(3), 3).unwrap_err();
        assert!(cub_dataset::data_error(&err).unwrap().is_integrity());

        let err = ensure_class_index_below(Some(4), 2).unwrap_err();
        assert!(cub_dataset::data_error(&err).unwrap().is_integrity());
        Ok(())
    }
}
