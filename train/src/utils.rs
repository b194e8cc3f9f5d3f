use crate::{common::*, config::Config};

pub const FILE_STRFTIME: &str = "%Y-%m-%d-%H-%M-%S.%3f%z";

/// The directories of one training run.
#[derive(Debug, Clone)]
pub struct RunDir {
    pub logging_dir: PathBuf,
    pub checkpoint_dir: PathBuf,
}

impl RunDir {
    /// Create a timestamped run directory and save the config into it.
    pub fn create(config: &Config) -> Result<Self> {
        let start_time = Local::now();
        let logging_dir = config
            .logging
            .dir
            .join(format!("{}", start_time.format(FILE_STRFTIME)));
        let checkpoint_dir = logging_dir.join("checkpoints");

        fs::create_dir_all(&logging_dir)?;
        fs::create_dir_all(&checkpoint_dir)?;
        let path = logging_dir.join("config.json5");
        let text = serde_json::to_string_pretty(config)?;
        fs::write(&path, text)?;

        Ok(Self {
            logging_dir,
            checkpoint_dir,
        })
    }
}

/// Save parameters under the regime and stage naming scheme.
pub fn save_checkpoint<M>(
    model: &M,
    checkpoint_dir: &Path,
    name: CheckpointName,
    accuracy: f64,
) -> Result<PathBuf>
where
    M: Checkpoint,
{
    let path = name.path_in(checkpoint_dir);
    model.save_checkpoint(&path)?;
    info!(
        "saved '{}' with test accuracy {:.4}%",
        path.display(),
        accuracy * 100.0
    );
    Ok(path)
}
