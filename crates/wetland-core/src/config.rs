//! Pipeline configuration: raster sources, normalization rules and sampling
//! parameters. Loaded from JSON; defaults follow the NYS wetland setup.
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::normalization::NormalizationRule;

/// One raster input. `path_pattern` is a glob with a `{tile}` placeholder,
/// resolved relative to the data root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterSource {
    pub name: String,
    pub path_pattern: String,
    /// Explicit band names; `None` reads them from the raster itself.
    #[serde(default)]
    pub bands: Option<Vec<String>>,
}

impl RasterSource {
    pub fn new(name: &str, path_pattern: &str, bands: Option<&[&str]>) -> Self {
        Self {
            name: name.to_string(),
            path_pattern: path_pattern.to_string(),
            bands: bands.map(|b| b.iter().map(|s| s.to_string()).collect()),
        }
    }

    /// Pattern with the tile id substituted.
    pub fn pattern_for(&self, tile_id: &str) -> String {
        fill_placeholders(&self.path_pattern, None, tile_id)
    }
}

/// Substitute `{tile}` (or the legacy `{huc}`) and `{cluster}`.
pub fn fill_placeholders(pattern: &str, cluster: Option<&str>, tile_id: &str) -> String {
    let mut out = pattern.replace("{tile}", tile_id).replace("{huc}", tile_id);
    if let Some(cluster) = cluster {
        out = out.replace("{cluster}", cluster);
    }
    out
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Square patch edge in pixels.
    pub patch_size: usize,
    /// Maximum centroid jitter in pixels, applied on both axes.
    pub max_offset: i64,
    /// Target number of label-free background patches per tile.
    pub background_patches: usize,
    /// Fraction of patches held out for validation.
    pub val_split: f64,
    pub random_seed: u64,
    pub num_classes: usize,
    pub class_names: Vec<String>,
    /// Vector class attribute value -> label code.
    pub class_map: BTreeMap<String, u8>,
    /// Feature property holding the class attribute.
    pub class_field: String,
    /// Ordered raster inputs; stacking order follows this list.
    pub raster_inputs: Vec<RasterSource>,
    /// Explicit rules by band name. Unlisted bands fall back to min-max.
    pub normalization_rules: BTreeMap<String, NormalizationRule>,
    /// Label grid location, placeholders `{cluster}` and `{tile}`.
    pub labels_pattern: String,
    /// Polygon GeoJSON location, placeholders `{cluster}` and `{tile}`.
    pub polygons_pattern: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let divide = |value| NormalizationRule::Divide { value };
        let shift_scale = NormalizationRule::ShiftScale { shift: 1.0, scale: 2.0 };
        let normalization_rules = BTreeMap::from([
            ("r".to_string(), divide(255.0)),
            ("g".to_string(), divide(255.0)),
            ("b".to_string(), divide(255.0)),
            ("nir".to_string(), divide(255.0)),
            ("ndvi".to_string(), shift_scale),
            ("ndwi".to_string(), shift_scale),
            ("Geomorph_5m".to_string(), divide(10.0)),
        ]);

        Self {
            patch_size: 256,
            max_offset: 32,
            background_patches: 120,
            val_split: 0.2,
            random_seed: 42,
            num_classes: 5,
            class_names: ["Background", "EMW", "FSW", "SSW", "OWW"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            class_map: BTreeMap::from([
                ("EMW".to_string(), 1),
                ("FSW".to_string(), 2),
                ("SSW".to_string(), 3),
                ("OWW".to_string(), 4),
            ]),
            class_field: "wetland_type".to_string(),
            raster_inputs: vec![
                RasterSource::new("naip", "Data/NAIP/HUC_NAIP_Processed/*{tile}*.tif", None),
                RasterSource::new("dem", "Data/TerrainProcessed/HUC_DEMs/*{tile}.tif", Some(&["dem"][..])),
                RasterSource::new("chm", "Data/CHMs/HUC_CHMs/*{tile}*.tif", Some(&["chm"][..])),
                RasterSource::new(
                    "terrain",
                    "Data/TerrainProcessed/HUC_TerrainMetrics/*{tile}*5m.tif",
                    None,
                ),
            ],
            normalization_rules,
            labels_pattern: "Data/Training_Data/cluster_{cluster}_huc_{tile}_labels.tif".to_string(),
            polygons_pattern: "Data/Training_Data/HUC_Extracted_Training_Data/*{tile}*.geojson"
                .to_string(),
        }
    }
}

impl PipelineConfig {
    /// Read a JSON config; missing keys take their default values.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.patch_size == 0 {
            return Err(PipelineError::InvalidConfig("patch_size must be positive".into()));
        }
        if self.max_offset < 0 {
            return Err(PipelineError::InvalidConfig("max_offset must not be negative".into()));
        }
        if !(self.val_split > 0.0 && self.val_split < 1.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "val_split must lie in (0, 1), got {}",
                self.val_split
            )));
        }
        if self.raster_inputs.is_empty() {
            return Err(PipelineError::InvalidConfig("no raster inputs configured".into()));
        }
        let mut seen = HashSet::new();
        for source in &self.raster_inputs {
            if !seen.insert(source.name.as_str()) {
                return Err(PipelineError::InvalidConfig(format!(
                    "raster source '{}' listed twice",
                    source.name
                )));
            }
        }
        for (band, rule) in &self.normalization_rules {
            let bad = match *rule {
                NormalizationRule::Divide { value } => !(value > 0.0 && value.is_finite()),
                NormalizationRule::ShiftScale { shift, scale } => {
                    !(scale > 0.0 && scale.is_finite() && shift.is_finite())
                }
                NormalizationRule::MinMax { min, max } => !(min.is_finite() && max.is_finite()),
            };
            if bad {
                return Err(PipelineError::InvalidConfig(format!(
                    "normalization rule for '{band}' needs a positive, finite divisor"
                )));
            }
        }
        if self.class_names.len() != self.num_classes {
            return Err(PipelineError::InvalidConfig(format!(
                "{} class names for {} classes",
                self.class_names.len(),
                self.num_classes
            )));
        }
        Ok(())
    }
}
