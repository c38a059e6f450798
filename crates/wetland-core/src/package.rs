//! Train/validation packaging of one tile's patches: seeded split, per-band
//! statistics over the training inputs, rule resolution and `.npy` output.
use std::fs;
use std::path::Path;

use log::info;
use ndarray::{Array3, Array4, Axis};
use ndarray_npy::write_npy;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::extract::Patch;
use crate::files::PatchFiles;
use crate::metadata::{resolve_normalization, MetadataDescriptor};
use crate::stats::compute_band_stats;

/// Seeded, non-stratified split of `0..n`. The first `ceil(n × val_split)`
/// entries of a permutation go to validation; both halves come back sorted.
pub fn train_val_split(n: usize, val_split: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let n_val = ((n as f64 * val_split).ceil() as usize).min(n);
    let mut order: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    order.shuffle(&mut rng);

    let mut val = order[..n_val].to_vec();
    let mut train = order[n_val..].to_vec();
    val.sort_unstable();
    train.sort_unstable();
    (train, val)
}

/// Stack the selected patches into `(N, C, S, S)` inputs and `(N, S, S)`
/// labels.
pub fn stack_patches(
    patches: &[Patch],
    indices: &[usize],
    channels: usize,
    size: usize,
) -> Result<(Array4<f32>, Array3<u8>)> {
    let mut x = Array4::<f32>::zeros((indices.len(), channels, size, size));
    let mut y = Array3::<u8>::zeros((indices.len(), size, size));
    for (slot, &idx) in indices.iter().enumerate() {
        let patch = &patches[idx];
        if patch.input.dim() != (channels, size, size) || patch.label.dim() != (size, size) {
            return Err(PipelineError::ShapeMismatch(format!(
                "patch {idx} has input {:?} and label {:?}, expected ({channels}, {size}, {size})",
                patch.input.dim(),
                patch.label.dim()
            )));
        }
        x.index_axis_mut(Axis(0), slot).assign(&patch.input);
        y.index_axis_mut(Axis(0), slot).assign(&patch.label);
    }
    Ok((x, y))
}

/// One tile's arrays and descriptor, ready to be written.
#[derive(Debug, Clone)]
pub struct PackagedTile {
    pub x_train: Array4<f32>,
    pub y_train: Array3<u8>,
    pub x_val: Array4<f32>,
    pub y_val: Array3<u8>,
    pub descriptor: MetadataDescriptor,
}

/// Split, summarize and describe `patches` (polygon patches first, then
/// background). `band_names` is the stack's channel order.
pub fn package_tile(
    patches: &[Patch],
    band_names: &[String],
    config: &PipelineConfig,
    tile_id: &str,
) -> Result<PackagedTile> {
    if patches.is_empty() {
        return Err(PipelineError::NoPatches(tile_id.to_string()));
    }
    let (train_idx, val_idx) = train_val_split(patches.len(), config.val_split, config.random_seed);
    if train_idx.is_empty() {
        return Err(PipelineError::NoPatches(format!(
            "{tile_id}: {} patch(es) leave nothing to train on",
            patches.len()
        )));
    }

    let channels = band_names.len();
    let size = config.patch_size;
    let (x_train, y_train) = stack_patches(patches, &train_idx, channels, size)?;
    let (x_val, y_val) = stack_patches(patches, &val_idx, channels, size)?;
    info!(
        "{tile_id}: {} train / {} val patches",
        x_train.len_of(Axis(0)),
        x_val.len_of(Axis(0))
    );

    let band_stats = compute_band_stats(x_train.view(), band_names);
    let normalization = resolve_normalization(band_names, &band_stats, &config.normalization_rules);

    let descriptor = MetadataDescriptor {
        in_channels: channels,
        num_classes: config.num_classes,
        patch_size: size,
        band_names: band_names.to_vec(),
        class_names: config.class_names.clone(),
        n_train: train_idx.len(),
        n_val: val_idx.len(),
        band_stats,
        normalization,
        raster_inputs: config.raster_inputs.clone(),
        tiles_included: vec![tile_id.to_string()],
    };

    Ok(PackagedTile {
        x_train,
        y_train,
        x_val,
        y_val,
        descriptor,
    })
}

impl PackagedTile {
    /// Write the four arrays and the descriptor into `out_dir`, under the
    /// per-tile names when `cluster` is given.
    pub fn write(&self, out_dir: &Path, cluster: Option<&str>, tile_id: &str) -> Result<PatchFiles> {
        fs::create_dir_all(out_dir)?;
        let files = PatchFiles::for_tile(out_dir, cluster, tile_id);
        write_npy(&files.x_train[0], &self.x_train)?;
        write_npy(&files.y_train[0], &self.y_train)?;
        write_npy(&files.x_val[0], &self.x_val)?;
        write_npy(&files.y_val[0], &self.y_val)?;
        self.descriptor.save(&files.metadata[0])?;
        info!("{tile_id}: wrote {}", files.metadata[0].display());
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalization::NormalizationRule;
    use approx::assert_relative_eq;
    use ndarray::Array2;
    use ndarray_npy::read_npy;

    fn patch(fill: f32, dem: f32, label: u8) -> Patch {
        let mut input = Array3::from_elem((2, 4, 4), fill);
        input.index_axis_mut(Axis(0), 1).fill(dem);
        Patch {
            input,
            label: Array2::from_elem((4, 4), label),
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            patch_size: 4,
            ..PipelineConfig::default()
        }
    }

    fn names() -> Vec<String> {
        vec!["r".into(), "dem".into()]
    }

    #[test]
    fn split_sizes_round_validation_up() {
        let (train, val) = train_val_split(10, 0.2, 42);
        assert_eq!((train.len(), val.len()), (8, 2));
        let (train, val) = train_val_split(11, 0.2, 42);
        assert_eq!((train.len(), val.len()), (8, 3));
        let (train, val) = train_val_split(1, 0.2, 42);
        assert_eq!((train.len(), val.len()), (0, 1));
    }

    #[test]
    fn split_is_a_deterministic_partition() {
        let (train, val) = train_val_split(50, 0.3, 7);
        assert_eq!(train_val_split(50, 0.3, 7), (train.clone(), val.clone()));
        let mut all: Vec<usize> = train.iter().chain(val.iter()).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..50).collect::<Vec<_>>());
        assert_ne!(train_val_split(50, 0.3, 8).1, val);
    }

    #[test]
    fn stats_come_from_training_patches_only() {
        let patches: Vec<Patch> = (0..10).map(|i| patch(i as f32, 100.0 + i as f32, 0)).collect();
        let packaged = package_tile(&patches, &names(), &config(), "0412").unwrap();
        let d = &packaged.descriptor;
        assert_eq!((d.n_train, d.n_val), (8, 2));

        let (train, _) = train_val_split(10, 0.2, 42);
        let lo = *train.first().unwrap() as f64;
        let hi = *train.last().unwrap() as f64;
        assert_relative_eq!(d.band_stats["r"].min, lo);
        assert_relative_eq!(d.band_stats["r"].max, hi);
        assert_relative_eq!(d.band_stats["dem"].min, 100.0 + lo);
        assert_eq!(d.normalization["r"], NormalizationRule::Divide { value: 255.0 });
        assert_eq!(
            d.normalization["dem"],
            NormalizationRule::MinMax { min: 100.0 + lo, max: 100.0 + hi }
        );
        assert_eq!(d.tiles_included, vec!["0412"]);
    }

    #[test]
    fn empty_or_untrainable_input_is_no_patches() {
        assert!(matches!(
            package_tile(&[], &names(), &config(), "t"),
            Err(PipelineError::NoPatches(_))
        ));
        assert!(matches!(
            package_tile(&[patch(1.0, 1.0, 0)], &names(), &config(), "t"),
            Err(PipelineError::NoPatches(_))
        ));
    }

    #[test]
    fn written_arrays_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let patches: Vec<Patch> = (0..5).map(|i| patch(i as f32, 1.0, (i % 3) as u8)).collect();
        let packaged = package_tile(&patches, &names(), &config(), "0412").unwrap();
        let files = packaged.write(dir.path(), Some("208"), "0412").unwrap();

        assert!(files.x_train[0].ends_with("cluster_208_X_train_0412_.npy"));
        let x: Array4<f32> = read_npy(&files.x_train[0]).unwrap();
        let y: Array3<u8> = read_npy(&files.y_val[0]).unwrap();
        assert_eq!(x, packaged.x_train);
        assert_eq!(y, packaged.y_val);
        assert_eq!(
            MetadataDescriptor::load(&files.metadata[0]).unwrap(),
            packaged.descriptor
        );
    }
}
