/// Patch set inspector: finds a cluster's patch files, merges the per-tile
/// descriptors, opens normalized train/val views and reports what a trainer
/// would see (sizes, class weights, per-channel ranges after normalization).
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use wetland_core::{class_weights, find_patch_files, load_and_merge, MetadataDescriptor, PatchDataset};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "inspect", about = "Summarize a packaged wetland patch set")]
struct Args {
    /// Directory holding the patch arrays and descriptors
    #[arg(long, default_value = "Data/Patches_v2")]
    data_dir: PathBuf,

    /// Cluster id; omit for the legacy single-set file names
    #[arg(long)]
    cluster: Option<String>,

    /// Restrict to one tile of the cluster
    #[arg(long)]
    tile: Option<String>,

    /// Batch size for the pass over the training set
    #[arg(long, default_value = "8")]
    batch_size: usize,

    /// Seed for the shuffled batch order
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Report raw values instead of normalized ones
    #[arg(long)]
    raw: bool,

    /// Write the merged descriptor here
    #[arg(long)]
    merged_out: Option<PathBuf>,
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Per-channel (min, max) over every batch.
fn channel_ranges(dataset: &PatchDataset, batch_size: usize, seed: u64) -> Vec<(f32, f32)> {
    let mut ranges = vec![(f32::INFINITY, f32::NEG_INFINITY); dataset.channels()];
    for (x, _) in dataset.batches(batch_size, true, seed) {
        for (c, range) in ranges.iter_mut().enumerate() {
            for &v in x.index_axis(ndarray::Axis(1), c).iter() {
                range.0 = range.0.min(v);
                range.1 = range.1.max(v);
            }
        }
    }
    ranges
}

fn print_summary(descriptor: &MetadataDescriptor, train: &PatchDataset, val: &PatchDataset) {
    println!(
        "tiles: {}",
        if descriptor.tiles_included.is_empty() {
            "-".to_string()
        } else {
            descriptor.tiles_included.join(", ")
        }
    );
    println!(
        "patches: {} train / {} val  (descriptor: {} / {})",
        train.len(),
        val.len(),
        descriptor.n_train,
        descriptor.n_val
    );
    println!(
        "patch size {}, {} channels, {} classes",
        descriptor.patch_size, descriptor.in_channels, descriptor.num_classes
    );
}

// ── Main ─────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let files = find_patch_files(&args.data_dir, args.cluster.as_deref(), args.tile.as_deref())
        .with_context(|| format!("No patch set in {}", args.data_dir.display()))?;
    info!(
        "{} training file(s), {} descriptor(s)",
        files.x_train.len(),
        files.metadata.len()
    );

    let descriptor = load_and_merge(&files.metadata).context("Failed to merge descriptors")?;
    if let Some(out) = &args.merged_out {
        descriptor
            .save(out)
            .with_context(|| format!("Cannot write {}", out.display()))?;
        info!("merged descriptor written to {}", out.display());
    }

    let normalize = !args.raw;
    let train = PatchDataset::open(&files.x_train, &files.y_train, &descriptor, normalize)
        .context("Failed to open training patches")?;
    let val = PatchDataset::open(&files.x_val, &files.y_val, &descriptor, normalize)
        .context("Failed to open validation patches")?;
    print_summary(&descriptor, &train, &val);

    let weights = class_weights(train.labels(), descriptor.num_classes);
    println!("class weights:");
    for (idx, w) in weights.iter().enumerate() {
        let name = descriptor
            .class_names
            .get(idx)
            .map(String::as_str)
            .unwrap_or("?");
        println!("  {idx} {name:<12} {w:.3}");
    }

    println!("{} channel ranges:", if normalize { "normalized" } else { "raw" });
    let ranges = channel_ranges(&train, args.batch_size, args.seed);
    for ((name, (lo, hi)), rule) in descriptor
        .band_names
        .iter()
        .zip(ranges)
        .zip(descriptor.channel_rules()?)
    {
        println!("  {name:<16} [{lo:>10.4}, {hi:>10.4}]  {}", serde_json::to_string(&rule)?);
    }
    Ok(())
}
