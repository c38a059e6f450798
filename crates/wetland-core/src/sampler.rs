//! Patch sampling policies.
//!
//! Polygon-centered: one jittered attempt per polygon centroid, never retried.
//! Random-background: uniform centers over the interior, kept only when the
//! label window is all background, until the target count or an attempt
//! budget of `target × 10` runs out.
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::extract::{extract, Extraction, Patch};
use crate::labels::{LabelGrid, LabelPolygon};
use crate::stack::TileStack;

/// Attempts allowed per requested background patch.
pub const BACKGROUND_ATTEMPTS_PER_PATCH: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct SamplingParams {
    pub patch_size: usize,
    pub max_offset: i64,
    pub background_patches: usize,
}

/// Counters for one tile's sampling pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SamplingReport {
    pub polygons: usize,
    pub polygon_patches: usize,
    pub out_of_bounds: usize,
    pub missing_data: usize,
    pub background_requested: usize,
    pub background_attempts: usize,
    pub background_patches: usize,
}

impl SamplingReport {
    pub fn skipped(&self) -> usize {
        self.out_of_bounds + self.missing_data
    }
}

/// Polygon patches first, then background patches.
#[derive(Debug, Clone)]
pub struct SampledPatches {
    pub polygon: Vec<Patch>,
    pub background: Vec<Patch>,
    pub report: SamplingReport,
}

impl SampledPatches {
    pub fn len(&self) -> usize {
        self.polygon.len() + self.background.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_patches(self) -> Vec<Patch> {
        let mut all = self.polygon;
        all.extend(self.background);
        all
    }
}

/// Truncate a fractional pixel coordinate. `None` when it is not finite or
/// does not fit an `i64`.
fn pixel_index(v: f64) -> Option<i64> {
    if v.is_finite() && v >= i64::MIN as f64 && v < i64::MAX as f64 {
        Some(v as i64)
    } else {
        None
    }
}

/// One extraction attempt per polygon at its jittered centroid pixel.
pub fn sample_polygon_centered<R: Rng>(
    stack: &TileStack,
    labels: &LabelGrid,
    polygons: &[LabelPolygon],
    params: &SamplingParams,
    rng: &mut R,
    report: &mut SamplingReport,
) -> Vec<Patch> {
    let mut patches = Vec::new();
    report.polygons += polygons.len();

    let jitter = params.max_offset.max(0);
    for polygon in polygons {
        let (x, y) = polygon.centroid;
        let offset_row = rng.gen_range(-jitter..=jitter);
        let offset_col = rng.gen_range(-jitter..=jitter);

        let center = stack.transform.to_pixel(x, y).and_then(|(col, row)| {
            Some((
                pixel_index(row)?.checked_add(offset_row)?,
                pixel_index(col)?.checked_add(offset_col)?,
            ))
        });
        let Some((center_row, center_col)) = center else {
            debug!("polygon at ({x}, {y}): no pixel position");
            report.out_of_bounds += 1;
            continue;
        };

        match extract(center_row, center_col, params.patch_size, stack, labels) {
            Extraction::Accepted(p) => patches.push(p),
            Extraction::OutOfBounds => {
                debug!("polygon at ({x:.1}, {y:.1}) -> ({center_row}, {center_col}): out of bounds");
                report.out_of_bounds += 1;
            }
            Extraction::MissingData => {
                debug!("polygon at ({x:.1}, {y:.1}) -> ({center_row}, {center_col}): missing data");
                report.missing_data += 1;
            }
        }
    }

    report.polygon_patches += patches.len();
    patches
}

/// Rejection-sample label-free patches. Falling short of `target` is not an
/// error.
pub fn sample_background<R: Rng>(
    stack: &TileStack,
    labels: &LabelGrid,
    patch_size: usize,
    target: usize,
    rng: &mut R,
    report: &mut SamplingReport,
) -> Vec<Patch> {
    let mut patches = Vec::with_capacity(target);
    report.background_requested += target;

    let rows = stack.rows().min(labels.nrows());
    let cols = stack.cols().min(labels.ncols());
    if patch_size == 0 || rows < patch_size || cols < patch_size {
        return patches;
    }

    // Centers whose window lies fully inside the grid.
    let half = patch_size / 2;
    let row_range = half as i64..=(rows - patch_size + half) as i64;
    let col_range = half as i64..=(cols - patch_size + half) as i64;

    let max_attempts = target * BACKGROUND_ATTEMPTS_PER_PATCH;
    let mut attempts = 0usize;
    while patches.len() < target && attempts < max_attempts {
        attempts += 1;
        let center_row = rng.gen_range(row_range.clone());
        let center_col = rng.gen_range(col_range.clone());

        if let Extraction::Accepted(patch) = extract(center_row, center_col, patch_size, stack, labels) {
            if !patch.has_positive_label() {
                patches.push(patch);
            }
        }
    }

    report.background_attempts += attempts;
    report.background_patches += patches.len();
    if patches.len() < target {
        info!(
            "background: {} of {} patches after {} attempts",
            patches.len(),
            target,
            attempts
        );
    }
    patches
}

/// Run both policies for one tile from a single seeded generator.
pub fn sample_tile(
    stack: &TileStack,
    labels: &LabelGrid,
    polygons: &[LabelPolygon],
    params: &SamplingParams,
    seed: u64,
) -> SampledPatches {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut report = SamplingReport::default();

    let polygon = sample_polygon_centered(stack, labels, polygons, params, &mut rng, &mut report);
    info!(
        "polygon-centered patches: {} (skipped {}: {} out of bounds, {} missing data)",
        polygon.len(),
        report.skipped(),
        report.out_of_bounds,
        report.missing_data
    );

    let background = sample_background(
        stack,
        labels,
        params.patch_size,
        params.background_patches,
        &mut rng,
        &mut report,
    );
    info!("background patches: {}", background.len());

    SampledPatches {
        polygon,
        background,
        report,
    }
}
