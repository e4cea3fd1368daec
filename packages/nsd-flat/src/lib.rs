pub mod activity;
pub mod config;
pub mod error;
pub mod generator;
pub mod indexing;
pub mod mask;
pub mod mgh;
pub mod mmap_utils;
pub mod profiling;
pub mod raster;
pub mod resample;
pub mod stimuli;
pub mod surface;
pub mod tables;
pub mod types;
pub mod writer;

pub use config::{DataLayout, DatasetConfig, GenerateOptions, SubjectInfo};
pub use error::{NsdFlatError, Result};
pub use generator::{DataSources, DatasetGenerator, TrialRecords};
pub use resample::{Bbox, Resampler};
pub use types::*;
pub use writer::{output_dir, DatasetWriter, Manifest};
