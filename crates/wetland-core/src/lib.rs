//! Wetland segmentation patch pipeline.
//!
//! Co-registered rasters for one tile are stacked into a multi-band grid,
//! fixed-size patches are cut around labeled polygons and from label-free
//! background, and the patches are packaged as train/validation `.npy`
//! arrays with a JSON descriptor carrying per-band statistics and
//! normalization rules. Descriptors from several tiles merge into one, and
//! [`dataset::PatchDataset`] serves normalized patches back to a trainer.

pub mod config;
pub mod dataset;
pub mod error;
pub mod extract;
pub mod files;
pub mod labels;
pub mod merge;
pub mod metadata;
pub mod normalization;
pub mod package;
pub mod raster;
pub mod sampler;
pub mod stack;
pub mod stats;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{PipelineConfig, RasterSource};
pub use dataset::{class_weights, PatchDataset};
pub use error::{PipelineError, Result};
pub use extract::{extract, Extraction, Patch};
pub use files::{find_patch_files, PatchFiles};
pub use labels::{load_label_grid, load_polygons, LabelGrid, LabelPolygon};
pub use merge::{load_and_merge, merge};
pub use metadata::MetadataDescriptor;
pub use normalization::NormalizationRule;
pub use package::{package_tile, PackagedTile};
pub use sampler::{sample_tile, SampledPatches, SamplingParams, SamplingReport};
pub use stack::{load_tile_stack, TileStack};
pub use stats::BandStats;
