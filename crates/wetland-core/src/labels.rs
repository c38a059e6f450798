//! Label inputs: the pre-rasterized class grid and the wetland polygons
//! whose centroids anchor patch extraction.
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use geo::Centroid;
use geojson::{GeoJson, JsonValue};
use log::{info, warn};
use ndarray::{Array2, Axis};

use crate::error::{PipelineError, Result};
use crate::raster::read_geotiff_raw;

/// Per-pixel class codes, 0 = background.
pub type LabelGrid = Array2<u8>;

/// Read band 1 of a label raster as class codes. A nodata tag is ignored;
/// stored values are taken as codes.
pub fn load_label_grid(path: &Path) -> Result<LabelGrid> {
    let raster = read_geotiff_raw(path)?;
    let band = raster.data.index_axis(Axis(0), 0);
    let mut grid = LabelGrid::zeros(band.raw_dim());
    for (dst, &src) in grid.iter_mut().zip(band.iter()) {
        if !(src >= 0.0 && src <= u8::MAX as f32 && src.fract() == 0.0) {
            return Err(PipelineError::InvalidLabel {
                path: path.to_path_buf(),
                value: src as f64,
            });
        }
        *dst = src as u8;
    }
    Ok(grid)
}

/// A labeled polygon reduced to what the sampler needs.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelPolygon {
    /// Area centroid in the raster's coordinate reference system.
    pub centroid: (f64, f64),
    /// Class code from the class attribute, when present and known.
    pub class_code: Option<u8>,
}

/// Read polygon features from a GeoJSON file. Features without a polygonal
/// geometry, or whose centroid is undefined, are skipped.
pub fn load_polygons(
    path: &Path,
    class_field: &str,
    class_map: &BTreeMap<String, u8>,
) -> Result<Vec<LabelPolygon>> {
    let text = fs::read_to_string(path)?;
    let geojson: GeoJson = text.parse()?;
    let features = match geojson {
        GeoJson::FeatureCollection(fc) => fc.features,
        GeoJson::Feature(f) => vec![f],
        GeoJson::Geometry(g) => vec![geojson::Feature::from(g)],
    };

    let mut polygons = Vec::with_capacity(features.len());
    let mut skipped = 0usize;
    for (idx, feature) in features.into_iter().enumerate() {
        let class_code = feature
            .property(class_field)
            .and_then(|v| class_code_of(v, class_map));

        let Some(geometry) = feature.geometry else {
            skipped += 1;
            continue;
        };
        let shape: geo::Geometry<f64> = match geometry.try_into() {
            Ok(g) => g,
            Err(e) => {
                warn!("feature {idx}: unreadable geometry ({e}), skipped");
                skipped += 1;
                continue;
            }
        };
        if !matches!(shape, geo::Geometry::Polygon(_) | geo::Geometry::MultiPolygon(_)) {
            warn!("feature {idx}: not a polygon, skipped");
            skipped += 1;
            continue;
        }
        let Some(c) = shape.centroid() else {
            skipped += 1;
            continue;
        };
        polygons.push(LabelPolygon {
            centroid: (c.x(), c.y()),
            class_code,
        });
    }

    info!(
        "{}: {} polygon(s), {} feature(s) skipped",
        path.display(),
        polygons.len(),
        skipped
    );
    Ok(polygons)
}

fn class_code_of(value: &JsonValue, class_map: &BTreeMap<String, u8>) -> Option<u8> {
    match value {
        JsonValue::String(s) => class_map.get(s).copied(),
        JsonValue::Number(n) => n.as_u64().and_then(|v| u8::try_from(v).ok()),
        _ => None,
    }
}
