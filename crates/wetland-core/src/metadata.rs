//! Metadata descriptor persisted next to each tile's patch arrays.
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::RasterSource;
use crate::error::{PipelineError, Result};
use crate::normalization::NormalizationRule;
use crate::stats::BandStats;

/// Everything a consumer needs to size a model and normalize patches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataDescriptor {
    pub in_channels: usize,
    pub num_classes: usize,
    pub patch_size: usize,
    /// Channel order of the patch arrays.
    pub band_names: Vec<String>,
    pub class_names: Vec<String>,
    pub n_train: usize,
    pub n_val: usize,
    pub band_stats: BTreeMap<String, BandStats>,
    pub normalization: BTreeMap<String, NormalizationRule>,
    /// Source configuration the patches were cut from.
    pub raster_inputs: Vec<RasterSource>,
    /// Tile ids this descriptor covers.
    #[serde(default, skip_serializing_if = "Vec::is_empty", alias = "hucs_included")]
    pub tiles_included: Vec<String>,
}

impl MetadataDescriptor {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(PipelineError::MissingMetadata(path.to_path_buf()));
        }
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Rule for each channel, in channel order.
    pub fn channel_rules(&self) -> Result<Vec<NormalizationRule>> {
        self.band_names
            .iter()
            .map(|name| {
                self.normalization
                    .get(name)
                    .copied()
                    .ok_or_else(|| PipelineError::MissingNormalization(name.clone()))
            })
            .collect()
    }
}

/// Explicit rule when configured, otherwise min-max over `stats`.
pub fn resolve_normalization(
    band_names: &[String],
    stats: &BTreeMap<String, BandStats>,
    rules: &BTreeMap<String, NormalizationRule>,
) -> BTreeMap<String, NormalizationRule> {
    band_names
        .iter()
        .filter_map(|name| {
            let rule = match rules.get(name) {
                Some(rule) => *rule,
                None => {
                    let s = stats.get(name)?;
                    log::info!("  '{name}' has no configured rule, using minmax");
                    NormalizationRule::from_stats(s)
                }
            };
            Some((name.clone(), rule))
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn descriptor(tile: &str, dem: (f64, f64, f64, f64)) -> MetadataDescriptor {
        let stats = |min, max, mean, std| BandStats { min, max, mean, std };
        MetadataDescriptor {
            in_channels: 2,
            num_classes: 5,
            patch_size: 4,
            band_names: vec!["r".into(), "dem".into()],
            class_names: vec!["Background".into(), "EMW".into(), "FSW".into(), "SSW".into(), "OWW".into()],
            n_train: 8,
            n_val: 2,
            band_stats: BTreeMap::from([
                ("r".to_string(), stats(0.0, 255.0, 120.0, 30.0)),
                ("dem".to_string(), stats(dem.0, dem.1, dem.2, dem.3)),
            ]),
            normalization: BTreeMap::from([
                ("r".to_string(), NormalizationRule::Divide { value: 255.0 }),
                ("dem".to_string(), NormalizationRule::MinMax { min: dem.0, max: dem.1 }),
            ]),
            raster_inputs: vec![RasterSource::new("dem", "dem/*{tile}.tif", Some(&["dem"][..]))],
            tiles_included: vec![tile.to_string()],
        }
    }

    #[test]
    fn save_and_load_keep_every_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.json");
        let d = descriptor("0412", (10.0, 50.0, 30.0, 5.0));
        d.save(&path).unwrap();
        assert_eq!(MetadataDescriptor::load(&path).unwrap(), d);

        let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["normalization"]["dem"]["type"], "minmax");
        assert_eq!(raw["in_channels"], 2);
    }

    #[test]
    fn missing_file_is_missing_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let err = MetadataDescriptor::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, PipelineError::MissingMetadata(_)));
    }

    #[test]
    fn legacy_tile_key_is_accepted() {
        let mut value = serde_json::to_value(descriptor("a", (0.0, 1.0, 0.5, 0.1))).unwrap();
        let tiles = value.as_object_mut().unwrap().remove("tiles_included").unwrap();
        value["hucs_included"] = tiles;
        let d: MetadataDescriptor = serde_json::from_value(value).unwrap();
        assert_eq!(d.tiles_included, vec!["a"]);
    }

    #[test]
    fn configured_rules_win_over_minmax_fallback() {
        let d = descriptor("a", (3.0, 9.0, 6.0, 1.0));
        let rules = BTreeMap::from([("r".to_string(), NormalizationRule::Divide { value: 255.0 })]);
        let resolved = resolve_normalization(&d.band_names, &d.band_stats, &rules);
        assert_eq!(resolved["r"], NormalizationRule::Divide { value: 255.0 });
        assert_eq!(resolved["dem"], NormalizationRule::MinMax { min: 3.0, max: 9.0 });
        assert_eq!(d.channel_rules().unwrap().len(), 2);
    }
}
