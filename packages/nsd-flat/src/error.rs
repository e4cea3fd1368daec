use thiserror::Error;

#[derive(Error, Debug)]
pub enum NsdFlatError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Unrecognized split {0}")]
    UnknownSplit(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Shape mismatch: {0}")]
    Shape(String),

    #[error("Failed to parse {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Image error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("NPY error: {0}")]
    NpyError(#[from] ndarray_npy::ReadNpyError),

    #[cfg(feature = "hdf5")]
    #[error("HDF5 error: {0}")]
    Hdf5Error(#[from] hdf5::Error),
}

impl NsdFlatError {
    /// Map an IO error to `NotFound` when the file is missing, keeping the path in the message.
    pub fn from_io_at(err: std::io::Error, path: &std::path::Path) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            NsdFlatError::NotFound(path.display().to_string())
        } else {
            NsdFlatError::IoError(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, NsdFlatError>;
