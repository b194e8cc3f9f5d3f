//! Training program configuration format.

use crate::common::*;

pub use dataset::*;
pub use model::*;
pub use training::*;

/// The main training configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub dataset: DatasetConfig,
    pub model: ModelConfig,
    pub training: TrainingConfig,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let text = fs::read_to_string(path)?;
        let config = json5::from_str(&text)?;
        Ok(config)
    }
}

/// Data logging options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// The directory where timestamped run directories are created.
    pub dir: PathBuf,
}

mod dataset {
    use super::*;

    /// Dataset options.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct DatasetConfig {
        /// The extracted `CUB_200_2011` directory.
        pub dataset_dir: PathBuf,
        /// The `attribute_id attribute_name` file.
        pub attribute_names_file: PathBuf,
        /// The `class_id class_name` file.
        pub class_names_file: PathBuf,
        #[serde(default)]
        pub calibration: CalibrationPolicy,
        #[serde(default)]
        pub split_convention: SplitConvention,
        /// The side length images are resized to.
        #[serde(default = "default_image_size")]
        pub image_size: i64,
    }

    fn default_image_size() -> i64 {
        cub_dataset::DEFAULT_IMAGE_SIZE
    }
}

mod model {
    use super::*;

    /// The model architecture options.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct ModelConfig {
        pub encoder: EncoderKind,
        /// Hidden layer widths of the attribute classifier.
        #[serde(default)]
        pub classifier_hidden_dims: Vec<i64>,
    }

    impl ModelConfig {
        pub fn encoder_init(&self) -> ImageEncoderInit {
            ImageEncoderInit {
                kind: self.encoder.clone(),
                ..Default::default()
            }
        }

        pub fn classifier_init(&self) -> AttributeClassifierInit {
            AttributeClassifierInit {
                hidden_dims: self.classifier_hidden_dims.clone(),
                ..Default::default()
            }
        }
    }
}

mod training {
    use super::*;

    /// The training options.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct TrainingConfig {
        #[serde(with = "tch_serde::serde_device")]
        pub device: Device,
        /// The batch size.
        pub batch_size: NonZeroUsize,
        /// The regimes to train, in the given order.
        pub regimes: Vec<Regime>,
        /// Epochs of the image-to-attributes stage.
        pub image_to_attributes_epochs: usize,
        /// Epochs of the attributes-to-class stage.
        pub attributes_to_class_epochs: usize,
        /// Epochs of end-to-end training in the joint regime.
        pub joint_epochs: usize,
        /// Learning rate scheduling strategy, keyed by epoch.
        pub lr_schedule: LearningRateSchedule,
        /// The weight decay parameter for optimizer.
        #[serde(default = "default_weight_decay")]
        pub weight_decay: R64,
        /// If set, a stage stops once its test accuracy reaches this value.
        pub stop_at_accuracy: Option<R64>,
        /// The weighting factor of the attribute loss in the joint regime.
        pub attribute_loss_weight: R64,
        /// The seed of mini-batch shuffling.
        #[serde(default)]
        pub seed: u64,
    }

    impl TrainingConfig {
        pub fn fit_options(&self, epochs: usize) -> FitOptions {
            FitOptions {
                epochs,
                batch_size: self.batch_size.get(),
                lr_schedule: self.lr_schedule.clone(),
                weight_decay: self.weight_decay.raw(),
                stop_at_accuracy: self.stop_at_accuracy.map(|acc| acc.raw()),
                attribute_loss_weight: self.attribute_loss_weight.raw(),
                seed: self.seed,
            }
        }
    }

    fn default_weight_decay() -> R64 {
        r64(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn example_config_parses() -> Result<()> {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("train.json5");
        let config = Config::open(&path)?;
        assert_eq!(
            config.training.regimes,
            vec![Regime::Independent, Regime::Sequential, Regime::Joint]
        );
        assert_eq!(config.dataset.image_size, 299);
        assert_eq!(config.dataset.calibration, CalibrationPolicy::Soft);
        assert_eq!(config.model.encoder, EncoderKind::InceptionV3);
        Ok(())
    }

    #[test]
    fn defaults_are_filled() -> Result<()> {
        let config: Config = json5::from_str(
            r#"{
                dataset: {
                    dataset_dir: "CUB_200_2011",
                    attribute_names_file: "attributes.txt",
                    class_names_file: "CUB_200_2011/classes.txt",
                },
                model: { encoder: { type: "ConvNet", channels: [8, 16], aux_head: true } },
                training: {
                    device: "cpu",
                    batch_size: 4,
                    regimes: ["joint"],
                    image_to_attributes_epochs: 1,
                    attributes_to_class_epochs: 1,
                    joint_epochs: 2,
                    lr_schedule: { type: "Constant", lr: 0.001 },
                    stop_at_accuracy: null,
                    attribute_loss_weight: 0.5,
                },
                logging: { dir: "logs" },
            }"#,
        )?;
        assert_eq!(config.dataset.split_convention, SplitConvention::TrainIsOne);
        assert_eq!(config.training.seed, 0);
        assert!(config.model.classifier_hidden_dims.is_empty());

        let options = config.training.fit_options(config.training.joint_epochs);
        assert_eq!(options.epochs, 2);
        assert_eq!(options.batch_size, 4);
        assert_eq!(options.weight_decay, 0.0);
        Ok(())
    }
}
