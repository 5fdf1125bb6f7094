pub mod engine;
pub mod merge;

pub use engine::{FusionEngine, FusionParams};
pub use merge::MergeQueue;
