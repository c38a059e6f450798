//! Combine per-tile descriptors into one covering several tiles.
//!
//! Per band the merged stats are min of mins, max of maxes, and the plain
//! (unweighted) mean of means and of stds. Min-max rules are rewritten to
//! the merged range; every other rule is kept from the first descriptor.
use std::collections::BTreeMap;
use std::path::PathBuf;

use log::info;

use crate::error::{PipelineError, Result};
use crate::files::tile_from_file_name;
use crate::metadata::MetadataDescriptor;
use crate::normalization::NormalizationRule;
use crate::stats::BandStats;

pub fn merge(descriptors: &[MetadataDescriptor]) -> Result<MetadataDescriptor> {
    let (first, rest) = descriptors.split_first().ok_or(PipelineError::EmptyMerge)?;
    if rest.is_empty() {
        return Ok(first.clone());
    }

    for d in rest {
        if d.band_names != first.band_names {
            return Err(PipelineError::IncompatibleDescriptors {
                expected: first.band_names.clone(),
                found: d.band_names.clone(),
                tile: d.tiles_included.join(","),
            });
        }
    }

    let mut band_stats = BTreeMap::new();
    for band in &first.band_names {
        let per_tile: Vec<&BandStats> = descriptors
            .iter()
            .filter_map(|d| d.band_stats.get(band))
            .collect();
        if per_tile.is_empty() {
            continue;
        }
        let n = per_tile.len() as f64;
        band_stats.insert(
            band.clone(),
            BandStats {
                min: per_tile.iter().map(|s| s.min).fold(f64::INFINITY, f64::min),
                max: per_tile.iter().map(|s| s.max).fold(f64::NEG_INFINITY, f64::max),
                mean: per_tile.iter().map(|s| s.mean).sum::<f64>() / n,
                std: per_tile.iter().map(|s| s.std).sum::<f64>() / n,
            },
        );
    }

    let normalization = first
        .normalization
        .iter()
        .map(|(band, rule)| {
            let rule = match (rule, band_stats.get(band)) {
                (NormalizationRule::MinMax { .. }, Some(s)) => NormalizationRule::MinMax {
                    min: s.min,
                    max: s.max,
                },
                _ => *rule,
            };
            (band.clone(), rule)
        })
        .collect();

    let mut tiles_included = Vec::new();
    for tile in descriptors.iter().flat_map(|d| &d.tiles_included) {
        if !tiles_included.contains(tile) {
            tiles_included.push(tile.clone());
        }
    }

    info!(
        "merged {} descriptors over {} tile(s), {} bands",
        descriptors.len(),
        tiles_included.len(),
        first.band_names.len()
    );

    Ok(MetadataDescriptor {
        n_train: descriptors.iter().map(|d| d.n_train).sum(),
        n_val: descriptors.iter().map(|d| d.n_val).sum(),
        band_stats,
        normalization,
        tiles_included,
        ..first.clone()
    })
}

/// Load every descriptor file and merge them. A descriptor that names no
/// tile takes its id from the file name.
pub fn load_and_merge(paths: &[PathBuf]) -> Result<MetadataDescriptor> {
    let mut descriptors = Vec::with_capacity(paths.len());
    for path in paths {
        let mut d = MetadataDescriptor::load(path)?;
        if d.tiles_included.is_empty() {
            if let Some(tile) = tile_from_file_name(path) {
                d.tiles_included.push(tile);
            }
        }
        descriptors.push(d);
    }
    merge(&descriptors)
}
