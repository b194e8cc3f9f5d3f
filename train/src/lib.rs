//! The training program for the concept bottleneck models.

pub mod common;
pub mod config;
pub mod pipeline;
pub mod utils;

use crate::{
    common::*,
    config::Config,
    pipeline::{Datasets, Pipeline, SavedCheckpoint},
    utils::RunDir,
};

/// The outcome of a training run.
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub run_dir: RunDir,
    pub checkpoints: Vec<SavedCheckpoint>,
}

/// The entry of training program.
pub fn start(config: Arc<Config>) -> Result<TrainingReport> {
    let run_dir = RunDir::create(&config)?;
    info!("logging to '{}'", run_dir.logging_dir.display());

    info!("loading dataset");
    let datasets = Datasets::load(&config.dataset)?;

    let checkpoints = Pipeline::new(&config, &datasets, &run_dir.checkpoint_dir).run()?;

    {
        let path = run_dir.logging_dir.join("checkpoints.json");
        let text = serde_json::to_string_pretty(&checkpoints)?;
        fs::write(&path, text)?;
    }

    for checkpoint in &checkpoints {
        info!(
            "{}: epoch {}, test accuracy {:.4}%",
            checkpoint.name,
            checkpoint.epoch,
            checkpoint.accuracy * 100.0
        );
    }

    Ok(TrainingReport {
        run_dir,
        checkpoints,
    })
}
