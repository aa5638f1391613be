pub mod batch;
pub mod config;
pub mod error;
pub mod geometry;
pub mod params;
pub mod pipeline;
pub mod profile;
pub mod scan;
pub mod tools;

pub use batch::{run_batch, BatchReport, BatchSettings};
pub use config::EncoderConfig;
pub use error::{EncodeError, Result, ToolFailure};
pub use geometry::{CropSpec, OutputGeometry};
pub use params::EncoderId;
pub use pipeline::{FileOutcome, Pipeline, SizeRecord};
pub use profile::{CropPolicy, EncodeProfile};
pub use tools::Toolchain;
