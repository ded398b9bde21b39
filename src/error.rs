//! Error types for blockraster

use std::io;
use thiserror::Error;

/// Result type for blockraster operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur in blockraster operations
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error without positional context
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// I/O error at a known location of a virtual file
    #[error("I/O error on '{path}' at offset {offset}: {source}")]
    IoAt {
        path: String,
        offset: u64,
        #[source]
        source: io::Error,
    },

    /// Fewer bytes were available than requested
    #[error("short read on '{path}': requested {requested} bytes at offset {offset}, got {got}")]
    ShortRead {
        path: String,
        offset: u64,
        requested: usize,
        got: usize,
    },

    /// No registered driver recognised the source
    #[error("no matching driver for '{0}'")]
    FormatNotRecognized(String),

    /// A driver name was given that is not registered
    #[error("unknown driver '{0}'")]
    UnknownDriver(String),

    /// The driver recognised the source but could not make sense of it
    #[error("malformed source '{path}': {reason}")]
    MalformedSource { path: String, reason: String },

    /// Band index outside [1, count]
    #[error("band index {index} out of range [1, {count}]")]
    BandOutOfRange { index: usize, count: usize },

    /// Window does not intersect the raster or is otherwise unusable
    #[error("window ({x}, {y}, {width}x{height}) out of range for raster {raster_width}x{raster_height}")]
    WindowOutOfRange {
        x: i64,
        y: i64,
        width: usize,
        height: usize,
        raster_width: usize,
        raster_height: usize,
    },

    /// A block-level failure, with the block it happened on
    #[error("block ({x}, {y}) of band {band} in dataset {dataset}: {source}")]
    Block {
        dataset: String,
        band: usize,
        x: usize,
        y: usize,
        #[source]
        source: Box<Error>,
    },

    /// A dirty block could not be persisted
    #[error("write-back failed for dataset {dataset}: {message}")]
    WriteBack { dataset: String, message: String },

    /// A previous write-back failure left the dataset unusable for writing
    #[error("dataset {dataset} is in error: {message}")]
    DatasetInError { dataset: String, message: String },

    /// Modification attempted through a read-only dataset or handle
    #[error("'{0}' is opened read-only")]
    ReadOnly(String),

    /// Unsupported feature
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Caller passed an unusable argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A source refers back to itself
    #[error("recursion detected while reading '{0}'")]
    Recursion(String),

    /// Projection error
    #[error("projection error: {0}")]
    Projection(String),

    /// Bad configuration value
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON (de)serialisation failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for [`Error::MalformedSource`]
    pub fn malformed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::MalformedSource {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Attaches a path and offset to a bare I/O error
    pub fn io_at(path: impl Into<String>, offset: u64, source: io::Error) -> Self {
        Error::IoAt {
            path: path.into(),
            offset,
            source,
        }
    }

    /// Wraps `self` with the block it occurred on. Already-wrapped errors pass through.
    pub fn in_block(self, dataset: &str, band: usize, x: usize, y: usize) -> Self {
        match self {
            e @ Error::Block { .. } => e,
            e => Error::Block {
                dataset: dataset.to_string(),
                band,
                x,
                y,
                source: Box::new(e),
            },
        }
    }
}
