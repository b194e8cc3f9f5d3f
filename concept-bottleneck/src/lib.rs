//! Concept bottleneck models over the CUB-200-2011 attributes.
//!
//! An image is first mapped to attribute probabilities, and the attribute
//! vector is then mapped to a species. The crate provides the two model
//! shapes, the epoch loop with best-checkpoint promotion, the trainers of
//! the independent, sequential and joint regimes, and a checkpoint-backed
//! inference service.

mod common;
pub mod inference;
pub mod loader;
pub mod model;
pub mod regime;
pub mod schedule;
pub mod train_loop;
pub mod trainer;

pub use inference::*;
pub use loader::*;
pub use model::*;
pub use regime::*;
pub use schedule::*;
pub use train_loop::*;
pub use trainer::*;
