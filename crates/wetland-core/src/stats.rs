//! Per-band summary statistics over a stack of patches.
use std::collections::BTreeMap;

use ndarray::{ArrayView4, Axis};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
}

impl BandStats {
    /// Statistics of the finite values yielded by `values`.
    /// Population std (ddof = 0). NaN everywhere if nothing is finite.
    pub fn from_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = f32> + Clone,
    {
        let mut n = 0usize;
        let mut sum = 0.0f64;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for v in values.clone().into_iter().filter(|v| v.is_finite()) {
            let v = v as f64;
            n += 1;
            sum += v;
            min = min.min(v);
            max = max.max(v);
        }
        if n == 0 {
            return Self {
                min: f64::NAN,
                max: f64::NAN,
                mean: f64::NAN,
                std: f64::NAN,
            };
        }
        let mean = sum / n as f64;
        let var = values
            .into_iter()
            .filter(|v| v.is_finite())
            .map(|v| (v as f64 - mean).powi(2))
            .sum::<f64>()
            / n as f64;
        Self {
            min,
            max,
            mean,
            std: var.sqrt(),
        }
    }
}

/// Statistics for every channel of an `(N, C, S, S)` patch array, keyed by
/// band name. `band_names[c]` names channel `c`.
pub fn compute_band_stats(
    inputs: ArrayView4<'_, f32>,
    band_names: &[String],
) -> BTreeMap<String, BandStats> {
    band_names
        .iter()
        .enumerate()
        .map(|(c, name)| {
            let channel = inputs.index_axis(Axis(1), c);
            (name.clone(), BandStats::from_values(channel.iter().copied()))
        })
        .collect()
}
