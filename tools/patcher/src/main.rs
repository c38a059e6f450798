/// Patch extraction tool: stacks each tile's rasters, cuts polygon-centered
/// and background patches, and writes train/val `.npy` arrays plus a JSON
/// descriptor per tile.
///
/// Inputs (relative to --data-root, placeholders filled per tile):
///   raster_inputs[*].path_pattern   one GeoTIFF per source
///   labels_pattern                  class-code GeoTIFF on the same grid
///   polygons_pattern                GeoJSON wetland polygons
///
/// Output (--output):
///   cluster_{cluster}_{X,y}_{train,val}_{tile}_.npy
///   cluster_{cluster}_metadata_{tile}_.json
///   cluster_{cluster}_manifest.json
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{info, warn};
use serde::Serialize;
use wetland_core::config::fill_placeholders;
use wetland_core::stack::resolve_pattern;
use wetland_core::{
    load_label_grid, load_polygons, load_tile_stack, package_tile, sample_tile, PipelineConfig,
    PipelineError, SamplingParams, SamplingReport,
};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "patcher",
    about = "Cut wetland training patches from stacked tile rasters"
)]
struct Args {
    /// Pipeline config (JSON); built-in defaults when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Root that raster, label and polygon patterns are resolved against
    #[arg(long, default_value = ".")]
    data_root: PathBuf,

    /// Cluster id used in label paths and output names
    #[arg(long)]
    cluster: String,

    /// Tile id to process (repeatable)
    #[arg(long = "tile")]
    tiles: Vec<String>,

    /// Text file with one tile id per line ('#' starts a comment)
    #[arg(long)]
    tile_list: Option<PathBuf>,

    /// Output directory (created if absent)
    #[arg(short, long, default_value = "Data/Patches_v2")]
    output: PathBuf,

    /// Override the config's random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Write the legacy single-set names (X_train.npy, metadata.json).
    /// Only valid with exactly one tile.
    #[arg(long)]
    legacy_names: bool,
}

// ── Output manifest ──────────────────────────────────────────────────────────

#[derive(Serialize)]
struct Manifest {
    cluster: String,
    patch_size: usize,
    random_seed: u64,
    tiles: Vec<TileEntry>,
}

#[derive(Serialize)]
struct TileEntry {
    tile: String,
    band_names: Vec<String>,
    n_train: usize,
    n_val: usize,
    sampling: SamplingReport,
    metadata: PathBuf,
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Tile ids from a list file: trimmed, blank lines and `#` comments skipped.
fn parse_tile_list(text: &str) -> Vec<String> {
    text.lines()
        .map(|l| l.split('#').next().unwrap_or("").trim())
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Command-line tiles first, then list-file tiles, without repeats.
fn collect_tiles(args: &Args) -> Result<Vec<String>> {
    let mut tiles = args.tiles.clone();
    if let Some(path) = &args.tile_list {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Cannot read tile list {}", path.display()))?;
        tiles.extend(parse_tile_list(&text));
    }
    let mut seen = std::collections::HashSet::new();
    tiles.retain(|t| seen.insert(t.clone()));
    if tiles.is_empty() {
        bail!("no tiles given: use --tile or --tile-list");
    }
    Ok(tiles)
}

fn process_tile(
    args: &Args,
    config: &PipelineConfig,
    tile: &str,
) -> Result<TileEntry> {
    info!("── tile {tile} ──");
    let stack = load_tile_stack(&args.data_root, tile, &config.raster_inputs)?;
    info!(
        "input stack: {} bands, {}x{}: {:?}",
        stack.channels(),
        stack.rows(),
        stack.cols(),
        stack.band_names
    );

    let labels_path = args
        .data_root
        .join(fill_placeholders(&config.labels_pattern, Some(&args.cluster), tile));
    let labels = load_label_grid(&labels_path)
        .with_context(|| format!("Cannot read labels {}", labels_path.display()))?;
    if labels.dim() != (stack.rows(), stack.cols()) {
        return Err(PipelineError::GridMismatch {
            path: labels_path,
            rows: stack.rows(),
            cols: stack.cols(),
            found_rows: labels.nrows(),
            found_cols: labels.ncols(),
        }
        .into());
    }

    let polygon_pattern = fill_placeholders(&config.polygons_pattern, Some(&args.cluster), tile);
    let polygons = match resolve_pattern(&args.data_root, &polygon_pattern)? {
        Some(path) => load_polygons(&path, &config.class_field, &config.class_map)?,
        None => {
            warn!("no polygons match {polygon_pattern}; background patches only");
            Vec::new()
        }
    };

    let params = SamplingParams {
        patch_size: config.patch_size,
        max_offset: config.max_offset,
        background_patches: config.background_patches,
    };
    let sampled = sample_tile(&stack, &labels, &polygons, &params, config.random_seed);
    let report = sampled.report.clone();
    info!(
        "total patches: {} ({} polygon, {} background)",
        sampled.len(),
        report.polygon_patches,
        report.background_patches
    );

    let packaged = package_tile(&sampled.into_patches(), &stack.band_names, config, tile)?;
    let cluster = (!args.legacy_names).then_some(args.cluster.as_str());
    let files = packaged.write(&args.output, cluster, tile)?;

    Ok(TileEntry {
        tile: tile.to_string(),
        band_names: stack.band_names.clone(),
        n_train: packaged.descriptor.n_train,
        n_val: packaged.descriptor.n_val,
        sampling: report,
        metadata: files.metadata[0].clone(),
    })
}

fn write_manifest(path: &Path, manifest: &Manifest) -> Result<()> {
    let json = serde_json::to_string_pretty(manifest)?;
    fs::write(path, json).with_context(|| format!("Cannot write {}", path.display()))
}

// ── Main ─────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.random_seed = seed;
    }

    let tiles = collect_tiles(&args)?;
    if args.legacy_names && tiles.len() != 1 {
        bail!("--legacy-names needs exactly one tile, got {}", tiles.len());
    }
    fs::create_dir_all(&args.output)
        .with_context(|| format!("Cannot create {}", args.output.display()))?;
    info!(
        "cluster {}: {} tile(s), patch size {}, seed {}",
        args.cluster,
        tiles.len(),
        config.patch_size,
        config.random_seed
    );

    let mut entries = Vec::with_capacity(tiles.len());
    for tile in &tiles {
        let entry = process_tile(&args, &config, tile)
            .with_context(|| format!("Tile {tile} failed"))?;
        entries.push(entry);
    }

    let manifest = Manifest {
        cluster: args.cluster.clone(),
        patch_size: config.patch_size,
        random_seed: config.random_seed,
        tiles: entries,
    };
    let manifest_path = args
        .output
        .join(format!("cluster_{}_manifest.json", args.cluster));
    write_manifest(&manifest_path, &manifest)?;
    info!("done: {}", manifest_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_list_skips_comments_and_blanks() {
        let text = "041402010203\n\n  041402010204  # second\n# all comment\n";
        assert_eq!(
            parse_tile_list(text),
            vec!["041402010203".to_string(), "041402010204".to_string()]
        );
    }

    #[test]
    fn tiles_are_deduplicated_in_order() {
        let args = Args::parse_from([
            "patcher", "--cluster", "208", "--tile", "b", "--tile", "a", "--tile", "b",
        ]);
        assert_eq!(collect_tiles(&args).unwrap(), vec!["b", "a"]);
    }

    #[test]
    fn no_tiles_is_an_error() {
        let args = Args::parse_from(["patcher", "--cluster", "208"]);
        assert!(collect_tiles(&args).is_err());
    }
}
