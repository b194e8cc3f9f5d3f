//! Common imports from external crates.

pub use anyhow::{bail, ensure, format_err, Context, Error, Result};
pub use chrono::Local;
pub use concept_bottleneck::{
    AttributeClassifierInit, AttributesToClassModel, Checkpoint, CheckpointName, EncoderKind,
    FitOptions, ImageEncoderInit, ImageToAttributesModel, JointModel, JointViews,
    LearningRateSchedule, Regime, Stage,
};
pub use cub_dataset::{
    CalibrationPolicy, Cub200AttributesToClass, Cub200AttributesToClassInit,
    Cub200ImageToAttributes, Cub200ImageToAttributesInit, DataError, LabelStore, Partition,
    RandomAccessView, SplitConvention,
};
pub use itertools::Itertools as _;
pub use noisy_float::prelude::*;
pub use serde::{Deserialize, Serialize};
pub use std::{
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::Arc,
};
pub use structopt::StructOpt;
pub use tch::Device;
pub use tracing::{info, warn};
