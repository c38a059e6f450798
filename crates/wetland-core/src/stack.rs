//! Tile stacks: every configured raster source for one tile, resolved by
//! glob, split into named bands and concatenated along the channel axis.
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use log::{info, warn};
use ndarray::{concatenate, Array3, ArrayView2, Axis};

use crate::config::RasterSource;
use crate::error::{PipelineError, Result};
use crate::raster::{read_geotiff, GeoTransform};

/// Aligned multi-band raster for one tile. `data` is `(channels, rows, cols)`
/// and `band_names[c]` names channel `c`.
#[derive(Debug, Clone)]
pub struct TileStack {
    pub data: Array3<f32>,
    pub band_names: Vec<String>,
    pub transform: GeoTransform,
}

impl TileStack {
    pub fn new(data: Array3<f32>, band_names: Vec<String>, transform: GeoTransform) -> Result<Self> {
        if data.shape()[0] != band_names.len() {
            return Err(PipelineError::ShapeMismatch(format!(
                "{} channels but {} band names",
                data.shape()[0],
                band_names.len()
            )));
        }
        Ok(Self {
            data,
            band_names,
            transform,
        })
    }

    pub fn channels(&self) -> usize {
        self.data.shape()[0]
    }

    pub fn rows(&self) -> usize {
        self.data.shape()[1]
    }

    pub fn cols(&self) -> usize {
        self.data.shape()[2]
    }

    pub fn band(&self, name: &str) -> Option<ArrayView2<'_, f32>> {
        let idx = self.band_names.iter().position(|n| n == name)?;
        Some(self.data.index_axis(Axis(0), idx))
    }
}

/// First match of `pattern` under `root`, in lexicographic order.
pub fn resolve_pattern(root: &Path, pattern: &str) -> Result<Option<PathBuf>> {
    let full = root.join(pattern);
    let mut matches = glob::glob(&full.to_string_lossy())?.collect::<std::result::Result<Vec<_>, _>>()?;
    matches.sort();
    if matches.len() > 1 {
        warn!(
            "{} files match {}; using {}",
            matches.len(),
            full.display(),
            matches[0].display()
        );
    }
    Ok(matches.into_iter().next())
}

/// Band names for one source: explicit list, else the raster's own
/// descriptions when every band has one, else `{source}_{n}`.
fn band_names_for(source: &RasterSource, descriptions: &[Option<String>]) -> Vec<String> {
    if let Some(names) = &source.bands {
        return names.clone();
    }
    if !descriptions.is_empty() && descriptions.iter().all(Option::is_some) {
        return descriptions.iter().flatten().cloned().collect();
    }
    (1..=descriptions.len())
        .map(|j| format!("{}_{}", source.name, j))
        .collect()
}

/// Load and stack every source for `tile_id`. The transform of the first
/// source becomes the stack transform; all sources must share its grid.
pub fn load_tile_stack(root: &Path, tile_id: &str, sources: &[RasterSource]) -> Result<TileStack> {
    let mut planes: Vec<Array3<f32>> = Vec::with_capacity(sources.len());
    let mut band_names: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut transform: Option<GeoTransform> = None;
    let mut grid: Option<(usize, usize)> = None;

    for source in sources {
        let pattern = source.pattern_for(tile_id);
        let path = resolve_pattern(root, &pattern)?.ok_or_else(|| PipelineError::MissingSource {
            source_name: source.name.clone(),
            pattern: root.join(&pattern).display().to_string(),
        })?;
        info!("  loading {}: {}", source.name, path.display());

        let raster = read_geotiff(&path)?;

        match grid {
            None => grid = Some((raster.rows(), raster.cols())),
            Some((rows, cols)) if (rows, cols) != (raster.rows(), raster.cols()) => {
                return Err(PipelineError::GridMismatch {
                    path,
                    rows,
                    cols,
                    found_rows: raster.rows(),
                    found_cols: raster.cols(),
                });
            }
            Some(_) => {}
        }
        if transform.is_none() {
            transform = raster.transform;
            if transform.is_none() {
                return Err(PipelineError::MissingTransform(path));
            }
        }

        let names = band_names_for(source, &raster.descriptions);
        if names.len() != raster.band_count() {
            return Err(PipelineError::BandCountMismatch {
                source_name: source.name.clone(),
                names: names.len(),
                bands: raster.band_count(),
            });
        }
        for name in &names {
            if !seen.insert(name.clone()) {
                return Err(PipelineError::DuplicateBand(name.clone()));
            }
        }

        band_names.extend(names);
        planes.push(raster.data);
    }

    let transform = transform.ok_or_else(|| {
        PipelineError::InvalidConfig("no raster sources to stack".to_string())
    })?;
    let views: Vec<_> = planes.iter().map(|p| p.view()).collect();
    let data = concatenate(Axis(0), &views)?;

    info!(
        "tile {}: stack {:?}, {} band(s): {:?}",
        tile_id,
        data.shape(),
        band_names.len(),
        band_names
    );
    TileStack::new(data, band_names, transform)
}
