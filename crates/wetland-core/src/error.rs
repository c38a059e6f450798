//! Error type shared by every pipeline stage.
//!
//! Patch rejection (out of bounds, missing data) is a normal sampling outcome
//! and never shows up here.
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no file matches source '{source_name}' for pattern {pattern}")]
    MissingSource { source_name: String, pattern: String },

    #[error("band count mismatch for '{source_name}': {names} names but {bands} bands")]
    BandCountMismatch {
        source_name: String,
        names: usize,
        bands: usize,
    },

    #[error("duplicate band name: {0}")]
    DuplicateBand(String),

    #[error("metadata descriptor not found: {}", .0.display())]
    MissingMetadata(PathBuf),

    #[error("descriptors disagree on band names: expected {expected:?}, found {found:?} (tile {tile})")]
    IncompatibleDescriptors {
        expected: Vec<String>,
        found: Vec<String>,
        tile: String,
    },

    #[error("cannot merge an empty list of descriptors")]
    EmptyMerge,

    #[error("grid of {} is {found_rows}x{found_cols}, expected {rows}x{cols}", .path.display())]
    GridMismatch {
        path: PathBuf,
        rows: usize,
        cols: usize,
        found_rows: usize,
        found_cols: usize,
    },

    #[error("label value {value} in {} does not fit a class code", .path.display())]
    InvalidLabel { path: PathBuf, value: f64 },

    #[error("not enough patches to package: {0}")]
    NoPatches(String),

    #[error("no patch files found: {0}")]
    MissingPatches(String),

    #[error("band '{0}' has no normalization rule in the descriptor")]
    MissingNormalization(String),

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("unsupported pixel format in {}", .0.display())]
    UnsupportedPixelFormat(PathBuf),

    #[error("{} carries no georeferencing tags", .0.display())]
    MissingTransform(PathBuf),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TIFF decoding error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    #[error("invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("glob traversal error: {0}")]
    Glob(#[from] glob::GlobError),

    #[error("npy read error: {0}")]
    ReadNpy(#[from] ndarray_npy::ReadNpyError),

    #[error("npy write error: {0}")]
    WriteNpy(#[from] ndarray_npy::WriteNpyError),

    #[error("array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
