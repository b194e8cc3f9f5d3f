use anyhow::{ensure, format_err, Context, Result};
use concept_bottleneck::{AttributesToClassLoader, ImageToAttributesLoader, InferenceService};
use cub_dataset::{DataError, NameTable};
use indexmap::IndexMap;
use std::{env, fs, path::PathBuf};
use structopt::StructOpt;
use tracing_subscriber::{filter::LevelFilter, prelude::*, EnvFilter};
use train::config::Config;

#[derive(Debug, Clone, StructOpt)]
/// Predict attributes or species with trained checkpoints
struct Args {
    #[structopt(long, default_value = "train.json5")]
    /// configuration file
    pub config_file: PathBuf,
    #[structopt(long)]
    /// directory containing the checkpoint files
    pub checkpoint_dir: PathBuf,
    #[structopt(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, StructOpt)]
enum Command {
    /// Predict attribute probabilities of an image
    Image {
        #[structopt(long, default_value = "independent")]
        /// independent, sequential or joint
        model: String,
        /// a file:// URI or a path to the image
        image_uri: String,
    },
    /// Predict class probabilities from attribute scores
    Attributes {
        #[structopt(long, default_value = "independent")]
        /// independent, sequential or joint
        model: String,
        /// a JSON file with either an array of scores in attribute order
        /// or an object mapping attribute names to scores
        scores_file: PathBuf,
    },
}

pub fn main() -> Result<()> {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .compact()
        .with_writer(std::io::stderr);
    let filter_layer = {
        let filter = EnvFilter::from_default_env();
        if env::var("RUST_LOG").is_err() {
            filter.add_directive(LevelFilter::WARN.into())
        } else {
            filter
        }
    };
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();

    let Args {
        config_file,
        checkpoint_dir,
        command,
    } = Args::from_args();
    let config = Config::open(&config_file)
        .with_context(|| format!("failed to load config file '{}'", config_file.display()))?;

    let attribute_names = NameTable::load(&config.dataset.attribute_names_file)?;
    let class_names = NameTable::load(&config.dataset.class_names_file)?;
    let service = InferenceService::new(
        ImageToAttributesLoader {
            dir: checkpoint_dir.clone(),
            device: config.training.device,
            init: config.model.encoder_init(),
        },
        AttributesToClassLoader {
            dir: checkpoint_dir,
            device: config.training.device,
            init: config.model.classifier_init(),
        },
        attribute_names,
        class_names,
        cub_dataset::resize_and_normalize(config.dataset.image_size),
    );

    let probs = match command {
        Command::Image { model, image_uri } => {
            service.predict_image_to_attributes(&model, &image_uri)?
        }
        Command::Attributes { model, scores_file } => {
            let text = fs::read_to_string(&scores_file)?;
            let scores = parse_scores(&text, service.attribute_names())
                .with_context(|| format!("invalid scores file '{}'", scores_file.display()))?;
            service.predict_attributes_to_class(&model, &scores)?
        }
    };

    println!("{}", serde_json::to_string_pretty(&probs)?);
    Ok(())
}

/// Parse scores given either in attribute order or keyed by attribute name.
fn parse_scores(text: &str, names: &NameTable) -> Result<Vec<f32>> {
    let value: serde_json::Value = serde_json::from_str(text)?;

    let scores = match value {
        serde_json::Value::Array(_) => serde_json::from_value(value)?,
        serde_json::Value::Object(_) => {
            let named: IndexMap<String, f32> = serde_json::from_value(value)?;
            ensure!(
                named.len() == names.len(),
                DataError::usage(format!(
                    "expect scores of {} attributes, but get {}",
                    names.len(),
                    named.len()
                ))
            );
            names
                .iter()
                .map(|name| {
                    named.get(name).copied().ok_or_else(|| {
                        format_err!(DataError::usage(format!(
                            "the score of attribute '{}' is missing",
                            name
                        )))
                    })
                })
                .collect::<Result<Vec<_>>>()?
        }
        _ => {
            return Err(DataError::usage("expect a JSON array or object of scores").into());
        }
    };

    Ok(scores)
}
