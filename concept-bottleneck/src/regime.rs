//! Training regimes and the checkpoint naming scheme.

use crate::common::*;

/// The way the two pipeline stages are trained.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Regime {
    /// Both stages trained on ground truth attributes.
    Independent,
    /// The classifier trained on attributes predicted by the independent encoder.
    Sequential,
    /// Both stages trained end-to-end.
    Joint,
}

impl Regime {
    /// Parse a model name, failing with a usage error on unknown names.
    pub fn from_model_name(name: &str) -> Result<Self> {
        name.parse().map_err(|_| {
            DataError::usage(format!(
                "unknown model name '{}', expect one of independent, sequential or joint",
                name
            ))
            .into()
        })
    }

    /// The checkpoint backing a stage of this regime.
    ///
    /// The sequential regime has no encoder of its own and reuses the
    /// independent one.
    pub fn checkpoint(self, stage: Stage) -> CheckpointName {
        let regime = match (self, stage) {
            (Self::Sequential, Stage::ImageToAttributes) => Self::Independent,
            (regime, _) => regime,
        };
        CheckpointName { regime, stage }
    }
}

/// One of the two pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    ImageToAttributes,
    AttributesToClass,
}

/// The name of a checkpoint file, e.g. `joint_attributes_to_class.ot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CheckpointName {
    pub regime: Regime,
    pub stage: Stage,
}

impl CheckpointName {
    pub fn file_name(&self) -> String {
        format!("{}.ot", self)
    }

    pub fn path_in(&self, dir: &Path) -> PathBuf {
        dir.join(self.file_name())
    }
}

impl fmt::Display for CheckpointName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.regime, self.stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_names() {
        assert_eq!(
            Regime::Independent
                .checkpoint(Stage::ImageToAttributes)
                .file_name(),
            "independent_image_to_attributes.ot"
        );
        assert_eq!(
            Regime::Joint.checkpoint(Stage::AttributesToClass).to_string(),
            "joint_attributes_to_class"
        );
        assert_eq!(
            Regime::Sequential.checkpoint(Stage::ImageToAttributes),
            Regime::Independent.checkpoint(Stage::ImageToAttributes)
        );
        assert_eq!(
            Regime::Sequential
                .checkpoint(Stage::AttributesToClass)
                .to_string(),
            "sequential_attributes_to_class"
        );
    }

    #[test]
    fn model_names() -> Result<()> {
        assert_eq!(Regime::from_model_name("independent")?, Regime::Independent);
        assert_eq!(Regime::from_model_name("Joint")?, Regime::Joint);

        let err = Regime::from_model_name("ensemble").unwrap_err();
        assert!(cub_dataset::data_error(&err).unwrap().is_usage());
        Ok(())
    }
}
