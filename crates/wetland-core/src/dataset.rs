//! Read-only view over packaged patches that normalizes inputs on access.
use std::path::{Path, PathBuf};

use log::info;
use ndarray::{concatenate, s, Array, Array2, Array3, Array4, ArrayView3, Axis, RemoveAxis};
use ndarray_npy::read_npy;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::{PipelineError, Result};
use crate::metadata::MetadataDescriptor;
use crate::normalization::NormalizationRule;

/// Patches `(N, C, S, S)`, labels `(N, S, S)` and one rule per channel.
/// Accessors take `&self` and return fresh arrays, so a dataset can be
/// shared between reader threads.
#[derive(Debug, Clone)]
pub struct PatchDataset {
    x: Array4<f32>,
    y: Array3<u8>,
    rules: Vec<NormalizationRule>,
    normalize: bool,
}

fn read_labels(path: &Path) -> Result<Array3<u8>> {
    match read_npy::<_, Array3<u8>>(path) {
        Ok(y) => Ok(y),
        // Label sets written by other tools are often int64.
        Err(first) => {
            let Ok(wide) = read_npy::<_, Array3<i64>>(path) else {
                return Err(first.into());
            };
            let mut y = Array3::<u8>::zeros(wide.raw_dim());
            for (dst, &src) in y.iter_mut().zip(wide.iter()) {
                *dst = u8::try_from(src).map_err(|_| PipelineError::InvalidLabel {
                    path: path.to_path_buf(),
                    value: src as f64,
                })?;
            }
            Ok(y)
        }
    }
}

impl PatchDataset {
    /// Build from in-memory arrays.
    pub fn from_arrays(
        x: Array4<f32>,
        y: Array3<u8>,
        descriptor: &MetadataDescriptor,
        normalize: bool,
    ) -> Result<Self> {
        let (n, c, h, w) = x.dim();
        if y.dim() != (n, h, w) {
            return Err(PipelineError::ShapeMismatch(format!(
                "inputs {:?} vs labels {:?}",
                x.dim(),
                y.dim()
            )));
        }
        if c != descriptor.band_names.len() {
            return Err(PipelineError::ShapeMismatch(format!(
                "{c} channels but {} band names",
                descriptor.band_names.len()
            )));
        }
        let rules = descriptor.channel_rules()?;
        Ok(Self { x, y, rules, normalize })
    }

    /// Load and concatenate paired `X`/`y` files along the sample axis.
    pub fn open(
        x_paths: &[PathBuf],
        y_paths: &[PathBuf],
        descriptor: &MetadataDescriptor,
        normalize: bool,
    ) -> Result<Self> {
        if x_paths.len() != y_paths.len() {
            return Err(PipelineError::ShapeMismatch(format!(
                "{} input files but {} label files",
                x_paths.len(),
                y_paths.len()
            )));
        }
        if x_paths.is_empty() {
            return Err(PipelineError::MissingPatches("no input files given".into()));
        }

        let mut xs = Vec::with_capacity(x_paths.len());
        let mut ys = Vec::with_capacity(y_paths.len());
        for (xp, yp) in x_paths.iter().zip(y_paths) {
            let x: Array4<f32> = read_npy(xp)?;
            let y = read_labels(yp)?;
            if x.len_of(Axis(0)) != y.len_of(Axis(0)) {
                return Err(PipelineError::ShapeMismatch(format!(
                    "{} holds {} patches, {} holds {}",
                    xp.display(),
                    x.len_of(Axis(0)),
                    yp.display(),
                    y.len_of(Axis(0))
                )));
            }
            xs.push(x);
            ys.push(y);
        }

        let x = concat_samples(xs)?;
        let y = concat_samples(ys)?;
        info!("dataset: {} patches from {} file(s)", x.len_of(Axis(0)), x_paths.len());
        Self::from_arrays(x, y, descriptor, normalize)
    }

    pub fn len(&self) -> usize {
        self.x.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn channels(&self) -> usize {
        self.x.len_of(Axis(1))
    }

    /// Raw labels, for class-weight computation.
    pub fn labels(&self) -> ArrayView3<'_, u8> {
        self.y.view()
    }

    /// Normalized copy of patch `index` and its labels widened to `i64`.
    pub fn get(&self, index: usize) -> Option<(Array3<f32>, Array2<i64>)> {
        if index >= self.len() {
            return None;
        }
        let mut input = self.x.index_axis(Axis(0), index).to_owned();
        if self.normalize {
            for (rule, band) in self.rules.iter().zip(input.outer_iter_mut()) {
                rule.apply_band(band);
            }
        }
        let label = self.y.index_axis(Axis(0), index).mapv(i64::from);
        Some((input, label))
    }

    /// Mini-batches in index order, or in a seeded shuffled order.
    pub fn batches(&self, batch_size: usize, shuffle: bool, seed: u64) -> Batches<'_> {
        let mut order: Vec<usize> = (0..self.len()).collect();
        if shuffle {
            order.shuffle(&mut StdRng::seed_from_u64(seed));
        }
        Batches {
            dataset: self,
            order,
            batch_size: batch_size.max(1),
            next: 0,
        }
    }
}

fn concat_samples<A: Clone, D: RemoveAxis>(mut parts: Vec<Array<A, D>>) -> Result<Array<A, D>> {
    if parts.len() == 1 {
        return Ok(parts.remove(0));
    }
    let views: Vec<_> = parts.iter().map(|p| p.view()).collect();
    concatenate(Axis(0), &views)
        .map_err(|e| PipelineError::ShapeMismatch(format!("patch files disagree in shape: {e}")))
}

/// Iterator over `(inputs, labels)` batches; the last one may be short.
pub struct Batches<'a> {
    dataset: &'a PatchDataset,
    order: Vec<usize>,
    batch_size: usize,
    next: usize,
}

impl Iterator for Batches<'_> {
    type Item = (Array4<f32>, Array3<i64>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.order.len() {
            return None;
        }
        let end = (self.next + self.batch_size).min(self.order.len());
        let picked = &self.order[self.next..end];
        self.next = end;

        let (_, c, h, w) = self.dataset.x.dim();
        let mut x = Array4::<f32>::zeros((picked.len(), c, h, w));
        let mut y = Array3::<i64>::zeros((picked.len(), h, w));
        for (slot, &idx) in picked.iter().enumerate() {
            let (input, label) = self.dataset.get(idx)?;
            x.slice_mut(s![slot, .., .., ..]).assign(&input);
            y.slice_mut(s![slot, .., ..]).assign(&label);
        }
        Some((x, y))
    }
}

/// Inverse pixel frequency per class, scaled so the most frequent class gets
/// 1.0. Classes that never occur get 0.
pub fn class_weights(labels: ArrayView3<'_, u8>, num_classes: usize) -> Vec<f32> {
    let mut counts = vec![0u64; num_classes];
    for &v in labels.iter() {
        if let Some(count) = counts.get_mut(v as usize) {
            *count += 1;
        }
    }
    let Some(&most) = counts.iter().filter(|&&n| n > 0).max() else {
        return vec![0.0; num_classes];
    };
    counts
        .iter()
        .map(|&n| if n == 0 { 0.0 } else { (most as f64 / n as f64) as f32 })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::tests::descriptor;
    use approx::assert_relative_eq;
    use ndarray_npy::write_npy;

    fn arrays(n: usize) -> (Array4<f32>, Array3<u8>) {
        let x = Array4::from_shape_fn((n, 2, 4, 4), |(i, c, r, col)| {
            if c == 0 {
                255.0
            } else {
                (i * 16 + r * 4 + col) as f32
            }
        });
        let y = Array3::from_shape_fn((n, 4, 4), |(i, r, _)| ((i + r) % 5) as u8);
        (x, y)
    }

    #[test]
    fn get_normalizes_each_channel() {
        let (x, y) = arrays(3);
        // dem minmax over 0..48
        let d = descriptor("A", (0.0, 47.0, 23.5, 10.0));
        let ds = PatchDataset::from_arrays(x.clone(), y.clone(), &d, true).unwrap();
        let (input, label) = ds.get(1).unwrap();
        assert!(input.index_axis(Axis(0), 0).iter().all(|&v| v == 1.0));
        assert_relative_eq!(input[[1, 0, 0]], 16.0 / 47.0, epsilon = 1e-6);
        assert_eq!(label, y.index_axis(Axis(0), 1).mapv(i64::from));

        let raw = PatchDataset::from_arrays(x.clone(), y, &d, false).unwrap();
        assert_eq!(raw.get(1).unwrap().0, x.index_axis(Axis(0), 1));
        assert!(raw.get(3).is_none());
    }

    #[test]
    fn get_is_idempotent() {
        let (x, y) = arrays(2);
        let ds = PatchDataset::from_arrays(x, y, &descriptor("A", (0.0, 31.0, 15.5, 9.0)), true).unwrap();
        assert_eq!(ds.get(0), ds.get(0));
        assert_eq!(ds.get(1), ds.get(1));
    }

    #[test]
    fn constant_band_normalizes_to_zero() {
        let (mut x, y) = arrays(1);
        x.index_axis_mut(Axis(1), 1).fill(7.0);
        let d = descriptor("A", (7.0, 7.0, 7.0, 0.0));
        let ds = PatchDataset::from_arrays(x, y, &d, true).unwrap();
        assert!(ds.get(0).unwrap().0.index_axis(Axis(0), 1).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn missing_rule_is_reported() {
        let (x, y) = arrays(1);
        let mut d = descriptor("A", (0.0, 1.0, 0.5, 0.1));
        d.normalization.remove("dem");
        assert!(matches!(
            PatchDataset::from_arrays(x, y, &d, true),
            Err(PipelineError::MissingNormalization(band)) if band == "dem"
        ));
    }

    #[test]
    fn open_concatenates_files() {
        let dir = tempfile::tempdir().unwrap();
        let (x, y) = arrays(5);
        let mut xs = Vec::new();
        let mut ys = Vec::new();
        for (k, range) in [(0, 0..3), (1, 3..5)] {
            let xp = dir.path().join(format!("x{k}.npy"));
            let yp = dir.path().join(format!("y{k}.npy"));
            write_npy(&xp, &x.slice(s![range.clone(), .., .., ..]).to_owned()).unwrap();
            // Second label file as int64.
            if k == 0 {
                write_npy(&yp, &y.slice(s![range, .., ..]).to_owned()).unwrap();
            } else {
                write_npy(&yp, &y.slice(s![range, .., ..]).mapv(i64::from)).unwrap();
            }
            xs.push(xp);
            ys.push(yp);
        }
        let d = descriptor("A", (0.0, 79.0, 40.0, 20.0));
        let ds = PatchDataset::open(&xs, &ys, &d, false).unwrap();
        assert_eq!(ds.len(), 5);
        assert_eq!(ds.get(4).unwrap().0, x.index_axis(Axis(0), 4));
        assert_eq!(ds.labels(), y.view());

        assert!(matches!(
            PatchDataset::open(&xs, &ys[..1], &d, false),
            Err(PipelineError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn batches_cover_every_patch_once() {
        let (x, y) = arrays(7);
        let ds = PatchDataset::from_arrays(x, y, &descriptor("A", (0.0, 111.0, 55.0, 30.0)), true).unwrap();
        let sizes: Vec<usize> = ds.batches(3, false, 0).map(|(bx, _)| bx.len_of(Axis(0))).collect();
        assert_eq!(sizes, vec![3, 3, 1]);

        let (bx, by) = ds.batches(3, false, 0).next().unwrap();
        assert_eq!(bx.index_axis(Axis(0), 2), ds.get(2).unwrap().0);
        assert_eq!(by.index_axis(Axis(0), 2), ds.get(2).unwrap().1);

        let shuffled: usize = ds.batches(2, true, 42).map(|(bx, _)| bx.len_of(Axis(0))).sum();
        assert_eq!(shuffled, 7);
    }

    #[test]
    fn class_weights_favor_rare_classes() {
        let mut y = Array3::<u8>::zeros((1, 2, 5));
        y[[0, 0, 0]] = 1;
        y[[0, 0, 1]] = 1;
        y[[0, 1, 0]] = 3;
        let w = class_weights(y.view(), 5);
        assert_eq!(w, vec![1.0, 3.5, 0.0, 7.0, 0.0]);
        assert_eq!(class_weights(Array3::<u8>::zeros((0, 2, 2)).view(), 2), vec![0.0, 0.0]);
    }

    #[test]
    fn dataset_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PatchDataset>();
    }
}
