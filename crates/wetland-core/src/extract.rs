//! Fixed-size patch extraction around a center pixel.
use ndarray::{s, Array2, Array3};

use crate::labels::LabelGrid;
use crate::stack::TileStack;

/// One training sample: `(channels, size, size)` inputs and the
/// co-registered `(size, size)` class codes.
#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    pub input: Array3<f32>,
    pub label: Array2<u8>,
}

impl Patch {
    pub fn has_positive_label(&self) -> bool {
        self.label.iter().any(|&v| v > 0)
    }
}

/// Outcome of one extraction attempt. Rejections are ordinary results.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Accepted(Patch),
    /// The window does not fit inside the stack.
    OutOfBounds,
    /// The input window holds a non-finite value.
    MissingData,
}

impl Extraction {
    pub fn into_patch(self) -> Option<Patch> {
        match self {
            Extraction::Accepted(p) => Some(p),
            _ => None,
        }
    }
}

/// Cut a `size × size` window whose top-left corner is
/// `(center_row - size / 2, center_col - size / 2)`.
pub fn extract(
    center_row: i64,
    center_col: i64,
    size: usize,
    stack: &TileStack,
    labels: &LabelGrid,
) -> Extraction {
    let Ok(span) = i64::try_from(size) else {
        return Extraction::OutOfBounds;
    };
    let half = span / 2;
    let bounds = |center: i64| {
        let start = center.checked_sub(half)?;
        Some((start, start.checked_add(span)?))
    };
    let (Some((row_start, row_end)), Some((col_start, col_end))) = (bounds(center_row), bounds(center_col))
    else {
        return Extraction::OutOfBounds;
    };

    if size == 0
        || row_start < 0
        || col_start < 0
        || row_end > stack.rows() as i64
        || col_end > stack.cols() as i64
        || row_end > labels.nrows() as i64
        || col_end > labels.ncols() as i64
    {
        return Extraction::OutOfBounds;
    }

    let (r0, r1, c0, c1) = (
        row_start as usize,
        row_end as usize,
        col_start as usize,
        col_end as usize,
    );
    let window = stack.data.slice(s![.., r0..r1, c0..c1]);
    if window.iter().any(|v| !v.is_finite()) {
        return Extraction::MissingData;
    }

    Extraction::Accepted(Patch {
        input: window.to_owned(),
        label: labels.slice(s![r0..r1, c0..c1]).to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::GeoTransform;

    fn stack_4x4() -> TileStack {
        let data = Array3::from_shape_fn((2, 4, 4), |(b, r, c)| (b * 100 + r * 4 + c) as f32);
        TileStack::new(data, vec!["a".into(), "b".into()], GeoTransform::identity()).unwrap()
    }

    #[test]
    fn nan_inside_window_is_rejected() {
        let mut stack = stack_4x4();
        stack.data[[1, 1, 1]] = f32::NAN;
        let labels = LabelGrid::zeros((4, 4));
        // 2x2 around (1, 1) covers rows 0..2, cols 0..2.
        assert_eq!(extract(1, 1, 2, &stack, &labels), Extraction::MissingData);
        // Window away from the NaN is fine.
        assert!(matches!(extract(3, 3, 2, &stack, &labels), Extraction::Accepted(_)));
    }

    #[test]
    fn window_outside_stack_is_rejected() {
        let stack = stack_4x4();
        let labels = LabelGrid::zeros((4, 4));
        assert_eq!(extract(0, 2, 2, &stack, &labels), Extraction::OutOfBounds);
        assert_eq!(extract(2, 4, 2, &stack, &labels), Extraction::OutOfBounds);
        assert_eq!(extract(-1, 2, 2, &stack, &labels), Extraction::OutOfBounds);
        assert!(matches!(extract(2, 3, 2, &stack, &labels), Extraction::Accepted(_)));
    }

    #[test]
    fn extreme_centers_are_out_of_bounds() {
        let stack = stack_4x4();
        let labels = LabelGrid::zeros((4, 4));
        assert_eq!(extract(i64::MAX, 2, 4, &stack, &labels), Extraction::OutOfBounds);
        assert_eq!(extract(2, i64::MIN, 3, &stack, &labels), Extraction::OutOfBounds);
        assert_eq!(extract(2, 2, usize::MAX, &stack, &labels), Extraction::OutOfBounds);
    }

    #[test]
    fn odd_sizes_keep_exact_shape() {
        let stack = stack_4x4();
        let mut labels = LabelGrid::zeros((4, 4));
        labels[[1, 2]] = 3;
        let patch = extract(2, 2, 3, &stack, &labels).into_patch().unwrap();
        assert_eq!(patch.input.shape(), &[2, 3, 3]);
        assert_eq!(patch.label.dim(), (3, 3));
        // Top-left corner is (1, 1).
        assert_eq!(patch.input[[1, 0, 0]], 105.0);
        assert_eq!(patch.label[[0, 1]], 3);
        assert!(patch.has_positive_label());
    }

    #[test]
    fn every_accepted_patch_is_finite_and_full_size() {
        let mut stack = stack_4x4();
        stack.data[[0, 2, 1]] = f32::INFINITY;
        stack.data[[1, 0, 3]] = f32::NAN;
        let labels = LabelGrid::zeros((4, 4));
        let mut accepted = 0;
        for size in 1..=4 {
            for r in -2..6 {
                for c in -2..6 {
                    if let Extraction::Accepted(p) = extract(r, c, size, &stack, &labels) {
                        accepted += 1;
                        assert!(p.input.iter().all(|v| v.is_finite()));
                        assert_eq!(p.input.shape(), &[2, size, size]);
                        assert_eq!(p.label.dim(), (size, size));
                    }
                }
            }
        }
        assert!(accepted > 0);
    }
}
