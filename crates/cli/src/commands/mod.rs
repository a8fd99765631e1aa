//! CLI command implementations

pub mod bucket;
pub mod sample_size;
pub mod simulate;

pub use bucket::BucketCommand;
pub use sample_size::SampleSizeCommand;
pub use simulate::SimulateCommand;
