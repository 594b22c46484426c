//! Synthetic GeoTIFF fixtures for tests.

use std::{
    fs::File,
    io::BufWriter,
    path::{Path, PathBuf},
};

use tiff::encoder::TiffEncoder;
use tiff::encoder::colortype::{Gray32Float, RGB32Float};
use tiff::tags::Tag;

use super::tags::{
    GDAL_METADATA, GDAL_NODATA, GEOTIFF_GEOKEYDIRECTORY, GEOTIFF_MODELPIXELSCALE,
    GEOTIFF_MODELTIEPOINT,
};

/// In-memory description of a north-up float32 GeoTIFF.
#[derive(Debug, Clone)]
pub struct GeoTiffFixture {
    pub width: u32,
    pub height: u32,
    pub bands: usize,
    /// Band-interleaved samples, row-major.
    pub pixels: Vec<f32>,
    pub origin: (f64, f64),
    pub resolution: (f64, f64),
    pub epsg: u16,
    pub nodata: Option<f64>,
    pub descriptions: Vec<String>,
    /// Strip height, encoder default when unset.
    pub rows_per_strip: Option<u32>,
}

impl GeoTiffFixture {
    /// Single band raster filled with `value`, 1°×1° pixels at (0, 0) in EPSG:4326.
    pub fn uniform(width: u32, height: u32, value: f32) -> Self {
        Self {
            width,
            height,
            bands: 1,
            pixels: vec![value; (width * height) as usize],
            origin: (0.0, height as f64),
            resolution: (1.0, 1.0),
            epsg: 4326,
            nodata: None,
            descriptions: Vec::new(),
            rows_per_strip: None,
        }
    }

    /// Three band (RGB) raster filled with `value`.
    pub fn rgb(width: u32, height: u32, value: f32) -> Self {
        Self {
            bands: 3,
            pixels: vec![value; (width * height * 3) as usize],
            ..Self::uniform(width, height, value)
        }
    }

    pub fn origin(mut self, left: f64, top: f64) -> Self {
        self.origin = (left, top);
        self
    }

    pub fn resolution(mut self, x: f64, y: f64) -> Self {
        self.resolution = (x, y);
        self
    }

    pub fn epsg(mut self, code: u16) -> Self {
        self.epsg = code;
        self
    }

    pub fn nodata(mut self, value: f64) -> Self {
        self.nodata = Some(value);
        self
    }

    pub fn describe(mut self, descriptions: &[&str]) -> Self {
        self.descriptions = descriptions.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn strips(mut self, rows: u32) -> Self {
        self.rows_per_strip = Some(rows);
        self
    }

    /// Set every band of pixel (`row`, `col`).
    pub fn set(&mut self, row: u32, col: u32, value: f32) {
        let start = ((row * self.width + col) as usize) * self.bands;
        for sample in &mut self.pixels[start..start + self.bands] {
            *sample = value;
        }
    }

    fn geokeys(&self) -> Vec<u16> {
        let geographic = self.epsg == 4326 || (4000..5000).contains(&self.epsg);
        let (model, crs_key) = if geographic { (2, 2048) } else { (1, 3072) };
        vec![
            1, 1, 0, 3, // header
            1024, 0, 1, model, // GTModelTypeGeoKey
            1025, 0, 1, 1, // GTRasterTypeGeoKey = PixelIsArea
            crs_key, 0, 1, self.epsg,
        ]
    }

    fn gdal_metadata(&self) -> Option<String> {
        if self.descriptions.is_empty() {
            return None;
        }
        let mut xml = String::from("<GDALMetadata>");
        for (i, d) in self.descriptions.iter().enumerate() {
            xml.push_str(&format!(
                "<Item name=\"DESCRIPTION\" sample=\"{i}\" role=\"description\">{d}</Item>"
            ));
        }
        xml.push_str("</GDALMetadata>");
        Some(xml)
    }
}

macro_rules! write_geotiff_tags {
    ($dir:expr, $fixture:expr) => {{
        let fixture = $fixture;
        let scale = [fixture.resolution.0, fixture.resolution.1, 0.0];
        $dir.write_tag(Tag::Unknown(GEOTIFF_MODELPIXELSCALE), &scale[..])
            .unwrap();
        let tiepoint = [0.0, 0.0, 0.0, fixture.origin.0, fixture.origin.1, 0.0];
        $dir.write_tag(Tag::Unknown(GEOTIFF_MODELTIEPOINT), &tiepoint[..])
            .unwrap();
        let keys = fixture.geokeys();
        $dir.write_tag(Tag::Unknown(GEOTIFF_GEOKEYDIRECTORY), &keys[..])
            .unwrap();
        if let Some(nodata) = fixture.nodata {
            $dir.write_tag(Tag::Unknown(GDAL_NODATA), nodata.to_string().as_str())
                .unwrap();
        }
        if let Some(xml) = fixture.gdal_metadata() {
            $dir.write_tag(Tag::Unknown(GDAL_METADATA), xml.as_str())
                .unwrap();
        }
    }};
}

macro_rules! write_pixels {
    ($image:expr, $fixture:expr) => {{
        let fixture = $fixture;
        if let Some(rows) = fixture.rows_per_strip {
            $image.rows_per_strip(rows).unwrap();
        }
        $image.write_data(&fixture.pixels).unwrap();
    }};
}

/// Write `fixture` as `dir/name` and return the path.
pub fn write_fixture(dir: &Path, name: &str, fixture: &GeoTiffFixture) -> PathBuf {
    let path = dir.join(name);
    let writer = BufWriter::new(File::create(&path).unwrap());
    let mut encoder = TiffEncoder::new(writer).unwrap();
    match fixture.bands {
        1 => {
            let mut image = encoder
                .new_image::<Gray32Float>(fixture.width, fixture.height)
                .unwrap();
            write_geotiff_tags!(image.encoder(), fixture);
            write_pixels!(image, fixture);
        }
        3 => {
            let mut image = encoder
                .new_image::<RGB32Float>(fixture.width, fixture.height)
                .unwrap();
            write_geotiff_tags!(image.encoder(), fixture);
            write_pixels!(image, fixture);
        }
        n => panic!("fixtures support 1 or 3 bands, got {n}"),
    }
    path
}
