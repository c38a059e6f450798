//! GeoTIFF reading: pixel data, affine transform, band descriptions and
//! nodata handling.
//!
//! Georeferencing comes from `ModelTransformationTag` when present, else from
//! `ModelPixelScaleTag` + `ModelTiepointTag`. Band descriptions are read from
//! GDAL's `GDAL_METADATA` XML tag. Multi-sample images are expected in chunky
//! (pixel-interleaved) layout and are split into one plane per band.
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::OnceLock;

use geo::{AffineTransform, Coord};
use log::debug;
use ndarray::Array3;
use regex::Regex;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;

use crate::error::{PipelineError, Result};

/// `GDAL_METADATA` ASCII tag.
pub(crate) const TAG_GDAL_METADATA: u16 = 42112;
/// `GDAL_NODATA` ASCII tag.
pub(crate) const TAG_GDAL_NODATA: u16 = 42113;
/// GeoTIFF `ModelTransformationTag` (4x4 row-major matrix).
pub(crate) const TAG_MODEL_TRANSFORMATION: u16 = 34264;

// ── Affine transform ─────────────────────────────────────────────────────────

/// Pixel ↔ geographic affine transform, GDAL convention:
///   x = c + a·col + b·row
///   y = f + d·col + e·row
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    forward: AffineTransform<f64>,
}

impl GeoTransform {
    /// From a GDAL-ordered geotransform `[c, a, b, f, d, e]`.
    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            forward: AffineTransform::new(gt[1], gt[2], gt[0], gt[4], gt[5], gt[3]),
        }
    }

    /// North-up transform with square-ish pixels and origin at the top-left corner.
    pub fn north_up(origin_x: f64, origin_y: f64, res_x: f64, res_y: f64) -> Self {
        Self::from_gdal([origin_x, res_x, 0.0, origin_y, 0.0, -res_y.abs()])
    }

    pub fn identity() -> Self {
        Self::from_gdal([0.0, 1.0, 0.0, 0.0, 0.0, 1.0])
    }

    /// Geographic coordinate of the (fractional) pixel position.
    pub fn to_geo(&self, col: f64, row: f64) -> (f64, f64) {
        let c = self.forward.apply(Coord { x: col, y: row });
        (c.x, c.y)
    }

    /// Fractional `(col, row)` of a geographic coordinate.
    /// `None` for a singular transform.
    pub fn to_pixel(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let inverse = self.forward.inverse()?;
        let c = inverse.apply(Coord { x, y });
        Some((c.x, c.y))
    }
}

// ── GeoTIFF decoding ─────────────────────────────────────────────────────────

/// One decoded raster file.
#[derive(Debug, Clone)]
pub struct RasterData {
    /// `(bands, rows, cols)`.
    pub data: Array3<f32>,
    /// Per-band description, when the file carries one.
    pub descriptions: Vec<Option<String>>,
    pub transform: Option<GeoTransform>,
    pub nodata: Option<f64>,
}

impl RasterData {
    pub fn band_count(&self) -> usize {
        self.data.shape()[0]
    }

    pub fn rows(&self) -> usize {
        self.data.shape()[1]
    }

    pub fn cols(&self) -> usize {
        self.data.shape()[2]
    }
}

/// Decode a GeoTIFF. Values equal to the `GDAL_NODATA` value become NaN.
pub fn read_geotiff(path: &Path) -> Result<RasterData> {
    let mut raster = read_geotiff_raw(path)?;
    raster.mask_nodata();
    Ok(raster)
}

/// Decode a GeoTIFF keeping nodata pixels at their stored value.
pub fn read_geotiff_raw(path: &Path) -> Result<RasterData> {
    let file = File::open(path)?;
    let mut decoder = Decoder::new(BufReader::new(file))?.with_limits(Limits::unlimited());

    let (width, height) = decoder.dimensions()?;
    let (cols, rows) = (width as usize, height as usize);

    let transform = read_transform(&mut decoder)?;
    let nodata = read_ascii_tag(&mut decoder, TAG_GDAL_NODATA)?
        .and_then(|s| s.trim().trim_end_matches('\0').parse::<f64>().ok());
    let metadata = read_ascii_tag(&mut decoder, TAG_GDAL_METADATA)?;

    let samples: Vec<f32> = match decoder.read_image()? {
        DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => v.into_iter().map(|x| x as f32).collect(),
        #[allow(unreachable_patterns)]
        _ => return Err(PipelineError::UnsupportedPixelFormat(path.to_path_buf())),
    };

    let pixels = rows * cols;
    if pixels == 0 || samples.len() % pixels != 0 {
        return Err(PipelineError::UnsupportedPixelFormat(path.to_path_buf()));
    }
    let n_bands = samples.len() / pixels;

    // Chunky layout: sample b of pixel p sits at p * n_bands + b.
    let data = Array3::from_shape_fn((n_bands, rows, cols), |(b, r, c)| {
        samples[(r * cols + c) * n_bands + b]
    });

    let descriptions = metadata
        .as_deref()
        .map(|xml| parse_band_descriptions(xml, n_bands))
        .unwrap_or_else(|| vec![None; n_bands]);

    debug!(
        "read {}: {} band(s), {}x{}, nodata={:?}",
        path.display(),
        n_bands,
        rows,
        cols,
        nodata
    );

    Ok(RasterData {
        data,
        descriptions,
        transform,
        nodata,
    })
}

impl RasterData {
    /// Replace nodata pixels with NaN. Samples are compared in f32, the
    /// precision they were decoded to.
    pub fn mask_nodata(&mut self) {
        let Some(nd) = self.nodata else {
            return;
        };
        let nd = nd as f32;
        self.data.mapv_inplace(|v| {
            if v == nd || (nd.is_nan() && v.is_nan()) {
                f32::NAN
            } else {
                v
            }
        });
    }
}

fn read_ascii_tag<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
    tag: u16,
) -> Result<Option<String>> {
    match decoder.find_tag(Tag::from_u16_exhaustive(tag))? {
        Some(value) => Ok(Some(value.into_string()?)),
        None => Ok(None),
    }
}

fn read_transform<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
) -> Result<Option<GeoTransform>> {
    if let Some(value) = decoder.find_tag(Tag::from_u16_exhaustive(TAG_MODEL_TRANSFORMATION))? {
        let m = value.into_f64_vec()?;
        if m.len() >= 8 {
            return Ok(Some(GeoTransform::from_gdal([m[3], m[0], m[1], m[7], m[4], m[5]])));
        }
    }

    let scale = match decoder.find_tag(Tag::ModelPixelScaleTag)? {
        Some(v) => v.into_f64_vec()?,
        None => return Ok(None),
    };
    let tie = match decoder.find_tag(Tag::ModelTiepointTag)? {
        Some(v) => v.into_f64_vec()?,
        None => return Ok(None),
    };
    if scale.len() < 2 || tie.len() < 6 {
        return Ok(None);
    }

    // Tiepoint (i, j, k, x, y, z) anchors raster (i, j) at model (x, y).
    let (i, j, x, y) = (tie[0], tie[1], tie[3], tie[4]);
    let (sx, sy) = (scale[0], scale[1]);
    Ok(Some(GeoTransform::from_gdal([
        x - i * sx,
        sx,
        0.0,
        y + j * sy,
        0.0,
        -sy,
    ])))
}

static ITEM_RE: OnceLock<Regex> = OnceLock::new();
static SAMPLE_RE: OnceLock<Regex> = OnceLock::new();

/// Pull `DESCRIPTION` items out of a `GDAL_METADATA` document.
///
/// `<Item name="DESCRIPTION" sample="0" role="description">red</Item>`
fn parse_band_descriptions(xml: &str, n_bands: usize) -> Vec<Option<String>> {
    let mut out = vec![None; n_bands];
    let item = ITEM_RE.get_or_init(|| {
        Regex::new(r#"<Item\s+([^>]*)>([^<]*)</Item>"#).expect("static regex")
    });
    let sample = SAMPLE_RE.get_or_init(|| Regex::new(r#"sample="(\d+)""#).expect("static regex"));

    for cap in item.captures_iter(xml) {
        let attrs = &cap[1];
        if !attrs.contains(r#"name="DESCRIPTION""#) {
            continue;
        }
        let Some(idx) = sample
            .captures(attrs)
            .and_then(|c| c[1].parse::<usize>().ok())
        else {
            continue;
        };
        let text = cap[2].trim();
        if idx < n_bands && !text.is_empty() {
            out[idx] = Some(text.to_string());
        }
    }
    out
}
