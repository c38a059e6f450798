//! Fixture writers shared by unit tests.
use std::fs::File;
use std::path::Path;

use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

use crate::raster::{GeoTransform, TAG_GDAL_METADATA, TAG_GDAL_NODATA};

pub fn gdal_metadata(names: &[&str]) -> String {
    let items: String = names
        .iter()
        .enumerate()
        .map(|(i, n)| format!(r#"<Item name="DESCRIPTION" sample="{i}" role="description">{n}</Item>"#))
        .collect();
    format!("<GDALMetadata>{items}</GDALMetadata>")
}

fn geo_tags(gt: GeoTransform) -> (Vec<f64>, Vec<f64>) {
    let (x0, y0) = gt.to_geo(0.0, 0.0);
    let (x1, _) = gt.to_geo(1.0, 0.0);
    let (_, y1) = gt.to_geo(0.0, 1.0);
    (vec![x1 - x0, y0 - y1, 0.0], vec![0.0, 0.0, 0.0, x0, y0, 0.0])
}

/// Write a float GeoTIFF with 1, 3 or 4 chunky bands.
pub fn write_geotiff(
    path: &Path,
    rows: usize,
    cols: usize,
    bands: &[Vec<f32>],
    gt: GeoTransform,
    names: Option<&[&str]>,
    nodata: Option<f64>,
) {
    let n = bands.len();
    let mut interleaved = Vec::with_capacity(rows * cols * n);
    for p in 0..rows * cols {
        for band in bands {
            interleaved.push(band[p]);
        }
    }
    let (scale, tie) = geo_tags(gt);
    let metadata = names.map(gdal_metadata);
    let nodata = nodata.map(|v| v.to_string());

    let file = File::create(path).unwrap();
    let mut encoder = TiffEncoder::new(file).unwrap();

    macro_rules! write_image {
        ($ct:ty) => {{
            let mut image = encoder.new_image::<$ct>(cols as u32, rows as u32).unwrap();
            let dir = image.encoder();
            dir.write_tag(Tag::ModelPixelScaleTag, &scale[..]).unwrap();
            dir.write_tag(Tag::ModelTiepointTag, &tie[..]).unwrap();
            if let Some(xml) = &metadata {
                dir.write_tag(Tag::from_u16_exhaustive(TAG_GDAL_METADATA), xml.as_str()).unwrap();
            }
            if let Some(nd) = &nodata {
                dir.write_tag(Tag::from_u16_exhaustive(TAG_GDAL_NODATA), nd.as_str()).unwrap();
            }
            image.write_data(&interleaved).unwrap();
        }};
    }

    match n {
        1 => write_image!(colortype::Gray32Float),
        3 => write_image!(colortype::RGB32Float),
        4 => write_image!(colortype::RGBA32Float),
        _ => panic!("fixture writer supports 1, 3 or 4 bands, got {n}"),
    }
}

/// Write a single-band u8 label GeoTIFF.
pub fn write_label_tiff(path: &Path, rows: usize, cols: usize, labels: &[u8], gt: GeoTransform) {
    let (scale, tie) = geo_tags(gt);
    let file = File::create(path).unwrap();
    let mut encoder = TiffEncoder::new(file).unwrap();
    let mut image = encoder
        .new_image::<colortype::Gray8>(cols as u32, rows as u32)
        .unwrap();
    let dir = image.encoder();
    dir.write_tag(Tag::ModelPixelScaleTag, &scale[..]).unwrap();
    dir.write_tag(Tag::ModelTiepointTag, &tie[..]).unwrap();
    image.write_data(labels).unwrap();
}
