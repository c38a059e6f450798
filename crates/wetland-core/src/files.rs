//! Patch file naming and discovery.
//!
//!   cluster_{cluster}_X_train_{tile}_.npy    cluster_{cluster}_y_train_{tile}_.npy
//!   cluster_{cluster}_X_val_{tile}_.npy      cluster_{cluster}_y_val_{tile}_.npy
//!   cluster_{cluster}_metadata_{tile}_.json
//!
//! Without a cluster id the legacy single-set names `X_train.npy` …
//! `metadata.json` are used.
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayKind {
    XTrain,
    YTrain,
    XVal,
    YVal,
}

impl ArrayKind {
    pub const ALL: [ArrayKind; 4] = [
        ArrayKind::XTrain,
        ArrayKind::YTrain,
        ArrayKind::XVal,
        ArrayKind::YVal,
    ];

    fn stem(self) -> &'static str {
        match self {
            ArrayKind::XTrain => "X_train",
            ArrayKind::YTrain => "y_train",
            ArrayKind::XVal => "X_val",
            ArrayKind::YVal => "y_val",
        }
    }
}

pub fn array_file_name(cluster: &str, kind: ArrayKind, tile: &str) -> String {
    format!("cluster_{}_{}_{}_.npy", cluster, kind.stem(), tile)
}

pub fn metadata_file_name(cluster: &str, tile: &str) -> String {
    format!("cluster_{}_metadata_{}_.json", cluster, tile)
}

/// Tile id from a per-tile file name, e.g. `cluster_208_metadata_0412_.json`
/// → `0412`.
pub fn tile_from_file_name(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let trimmed = stem.strip_suffix('_')?;
    trimmed.rsplit('_').next().map(str::to_string)
}

/// Every file making up a patch set, lists sorted by tile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatchFiles {
    pub x_train: Vec<PathBuf>,
    pub y_train: Vec<PathBuf>,
    pub x_val: Vec<PathBuf>,
    pub y_val: Vec<PathBuf>,
    pub metadata: Vec<PathBuf>,
}

impl PatchFiles {
    /// The five paths of one patch set: per-tile names under a cluster, the
    /// legacy names otherwise.
    pub fn for_tile(dir: &Path, cluster: Option<&str>, tile: &str) -> Self {
        match cluster {
            Some(cluster) => {
                let path = |kind| vec![dir.join(array_file_name(cluster, kind, tile))];
                Self {
                    x_train: path(ArrayKind::XTrain),
                    y_train: path(ArrayKind::YTrain),
                    x_val: path(ArrayKind::XVal),
                    y_val: path(ArrayKind::YVal),
                    metadata: vec![dir.join(metadata_file_name(cluster, tile))],
                }
            }
            None => Self {
                x_train: vec![dir.join("X_train.npy")],
                y_train: vec![dir.join("y_train.npy")],
                x_val: vec![dir.join("X_val.npy")],
                y_val: vec![dir.join("y_val.npy")],
                metadata: vec![dir.join("metadata.json")],
            },
        }
    }
}

fn sorted_glob(dir: &Path, name_pattern: &str) -> Result<Vec<PathBuf>> {
    let pattern = dir.join(name_pattern);
    let mut out = glob::glob(&pattern.to_string_lossy())?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    out.sort();
    Ok(out)
}

/// Locate patch files for a cluster (all tiles, or one), or the legacy set
/// when no cluster is given.
pub fn find_patch_files(data_dir: &Path, cluster: Option<&str>, tile: Option<&str>) -> Result<PatchFiles> {
    let files = match cluster {
        None => PatchFiles::for_tile(data_dir, None, ""),
        Some(cluster) => {
            let tile_glob = tile.map(glob::Pattern::escape).unwrap_or_else(|| "*".to_string());
            let list = |kind: ArrayKind| sorted_glob(data_dir, &array_file_name(cluster, kind, &tile_glob));
            PatchFiles {
                x_train: list(ArrayKind::XTrain)?,
                y_train: list(ArrayKind::YTrain)?,
                x_val: list(ArrayKind::XVal)?,
                y_val: list(ArrayKind::YVal)?,
                metadata: sorted_glob(data_dir, &metadata_file_name(cluster, &tile_glob))?,
            }
        }
    };

    if files.x_train.is_empty() || !files.x_train.iter().all(|p| p.is_file()) {
        return Err(PipelineError::MissingPatches(format!(
            "no training arrays for cluster {} in {}",
            cluster.unwrap_or("<legacy>"),
            data_dir.display()
        )));
    }
    match files.metadata.iter().find(|p| !p.is_file()) {
        Some(missing) => return Err(PipelineError::MissingMetadata(missing.clone())),
        None if files.metadata.is_empty() => {
            return Err(PipelineError::MissingMetadata(
                data_dir.join(metadata_file_name(cluster.unwrap_or("*"), tile.unwrap_or("*"))),
            ))
        }
        None => {}
    }
    if [&files.y_train, &files.x_val, &files.y_val]
        .iter()
        .any(|list| list.len() != files.x_train.len())
    {
        return Err(PipelineError::MissingPatches(format!(
            "incomplete patch set in {}: {} X_train, {} y_train, {} X_val, {} y_val",
            data_dir.display(),
            files.x_train.len(),
            files.y_train.len(),
            files.x_val.len(),
            files.y_val.len()
        )));
    }
    Ok(files)
}
