//! Label loading, calibration and dataset views for the Caltech-UCSD Birds-200-2011 dataset.
//!
//! The raw dataset stores per-image attribute annotations made by several
//! annotators together with an annotator certainty. The [LabelStore] parses
//! the raw text files, the [calibrate] module turns presence/certainty pairs
//! into training targets, and the views in [view] expose the train and test
//! partitions as random-access collections of tensors.

mod common;
pub mod calibrate;
pub mod error;
pub mod names;
pub mod store;
pub mod transform;
pub mod view;

pub use calibrate::*;
pub use error::*;
pub use names::*;
pub use store::*;
pub use transform::*;
pub use view::*;

/// The number of attributes annotated per image.
pub const NUM_ATTRIBUTES: usize = 312;

/// The number of bird species.
pub const NUM_CLASSES: usize = 200;

/// The number of images in the complete dataset.
pub const NUM_IMAGES: usize = 11788;
