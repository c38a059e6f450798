//! Per-band normalization rules.
//!
//! Serialized form matches the descriptor JSON:
//!   {"type": "divide", "value": 255.0}
//!   {"type": "shift_scale", "shift": 1.0, "scale": 2.0}
//!   {"type": "minmax", "min": 0.0, "max": 412.5}
use ndarray::{ArrayViewMut2, Zip};
use serde::{Deserialize, Serialize};

use crate::stats::BandStats;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NormalizationRule {
    #[serde(rename = "divide")]
    Divide { value: f64 },
    #[serde(rename = "shift_scale")]
    ShiftScale { shift: f64, scale: f64 },
    #[serde(rename = "minmax")]
    MinMax { min: f64, max: f64 },
}

impl NormalizationRule {
    /// Min-max rule built from computed band statistics.
    pub fn from_stats(stats: &BandStats) -> Self {
        NormalizationRule::MinMax {
            min: stats.min,
            max: stats.max,
        }
    }

    pub fn is_minmax(&self) -> bool {
        matches!(self, NormalizationRule::MinMax { .. })
    }

    /// Normalize a single value. A constant min-max band maps to 0.0.
    #[inline]
    pub fn apply(&self, x: f32) -> f32 {
        match *self {
            NormalizationRule::Divide { value } => (x as f64 / value) as f32,
            NormalizationRule::ShiftScale { shift, scale } => ((x as f64 + shift) / scale) as f32,
            NormalizationRule::MinMax { min, max } => {
                let range = max - min;
                if range > 0.0 {
                    ((x as f64 - min) / range) as f32
                } else {
                    0.0
                }
            }
        }
    }

    /// Undo `apply`. Min-max on a constant band is not invertible and
    /// returns `min`.
    #[inline]
    pub fn invert(&self, y: f32) -> f32 {
        match *self {
            NormalizationRule::Divide { value } => (y as f64 * value) as f32,
            NormalizationRule::ShiftScale { shift, scale } => (y as f64 * scale - shift) as f32,
            NormalizationRule::MinMax { min, max } => {
                let range = max - min;
                if range > 0.0 {
                    (y as f64 * range + min) as f32
                } else {
                    min as f32
                }
            }
        }
    }

    /// Normalize one band plane in place.
    pub fn apply_band(&self, mut band: ArrayViewMut2<'_, f32>) {
        Zip::from(&mut band).for_each(|v| *v = self.apply(*v));
    }
}
