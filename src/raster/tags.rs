//! Low-level TIFF / GeoTIFF tag access shared by the reader and the
//! statistics pass.

use std::{
    fs::File,
    io::BufReader,
    path::Path,
};

use tiff::{
    TiffError,
    decoder::{Decoder, DecodingResult, Limits, ifd::Value},
    tags::Tag,
};

use super::reader::DecodeError;

// GeoTIFF tag IDs
pub(super) const GEOTIFF_MODELPIXELSCALE: u16 = 33550;
pub(super) const GEOTIFF_MODELTIEPOINT: u16 = 33922;
pub(super) const GEOTIFF_MODELTRANSFORMATION: u16 = 34264;
pub(super) const GEOTIFF_GEOKEYDIRECTORY: u16 = 34735;

// GDAL private tags
pub(super) const GDAL_METADATA: u16 = 42112;
pub(super) const GDAL_NODATA: u16 = 42113;

// GeoKey IDs
const GT_MODEL_TYPE_GEO_KEY: u16 = 1024;
const GT_RASTER_TYPE_GEO_KEY: u16 = 1025;
const GEOGRAPHIC_TYPE_GEO_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_GEO_KEY: u16 = 3072;

const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
pub(super) const RASTER_PIXEL_IS_POINT: u16 = 2;
const USER_DEFINED: u16 = 32767;

pub(super) type TiffDecoder = Decoder<BufReader<File>>;

/// Open a decoder on `path`. The handle lives only as long as the returned
/// value; callers keep it inside a single function scope.
pub(super) fn open_decoder(path: &Path) -> Result<TiffDecoder, DecodeError> {
    let file = File::open(path).map_err(|source| DecodeError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let decoder =
        Decoder::new(BufReader::new(file)).map_err(|e| DecodeError::format(path, e))?;
    Ok(decoder.with_limits(Limits::unlimited()))
}

pub(super) fn find_tag(decoder: &mut TiffDecoder, code: u16) -> Result<Option<Value>, TiffError> {
    decoder.find_tag(Tag::from_u16_exhaustive(code))
}

pub(super) fn find_u16(decoder: &mut TiffDecoder, tag: Tag) -> Result<Option<u16>, TiffError> {
    decoder.find_tag(tag)?.map(Value::into_u16).transpose()
}

pub(super) fn find_u16_vec(
    decoder: &mut TiffDecoder,
    tag: Tag,
) -> Result<Option<Vec<u16>>, TiffError> {
    decoder
        .find_tag(tag)?
        .map(|v| values(v, Value::into_u16))
        .transpose()
}

pub(super) fn find_f64_vec(
    decoder: &mut TiffDecoder,
    code: u16,
) -> Result<Option<Vec<f64>>, TiffError> {
    find_tag(decoder, code)?
        .map(|v| values(v, Value::into_f64))
        .transpose()
}

/// Flatten a tag value that may be stored as a single entry or a list.
fn values<T>(value: Value, convert: fn(Value) -> Result<T, TiffError>) -> Result<Vec<T>, TiffError> {
    match value {
        Value::List(items) => items.into_iter().map(convert).collect(),
        single => convert(single).map(|v| vec![v]),
    }
}

pub(super) fn find_ascii(decoder: &mut TiffDecoder, code: u16) -> Result<Option<String>, TiffError> {
    find_tag(decoder, code)?.map(Value::into_string).transpose()
}

pub(super) fn samples_per_pixel(decoder: &mut TiffDecoder) -> Result<usize, TiffError> {
    Ok(find_u16(decoder, Tag::SamplesPerPixel)?.unwrap_or(1) as usize)
}

/// PlanarConfiguration 2 stores each band in its own plane.
pub(super) fn is_planar(decoder: &mut TiffDecoder) -> Result<bool, TiffError> {
    Ok(find_u16(decoder, Tag::PlanarConfiguration)?.unwrap_or(1) == 2)
}

/// Nodata value from the `GDAL_NODATA` ascii tag.
pub(super) fn nodata(decoder: &mut TiffDecoder) -> Result<Option<f64>, TiffError> {
    Ok(find_ascii(decoder, GDAL_NODATA)?.and_then(|raw| parse_nodata(&raw)))
}

pub(super) fn parse_nodata(raw: &str) -> Option<f64> {
    let value = raw.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    match value.to_ascii_lowercase().as_str() {
        "nan" => Some(f64::NAN),
        "inf" => Some(f64::INFINITY),
        "-inf" => Some(f64::NEG_INFINITY),
        other => other.parse().ok(),
    }
}

/// Geo keys we care about, pulled out of the GeoKeyDirectory.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub(super) struct GeoKeys {
    pub model_type: Option<u16>,
    pub raster_type: Option<u16>,
    pub geographic_type: Option<u16>,
    pub projected_type: Option<u16>,
}

impl GeoKeys {
    /// Parse `[version, revision, minor, count, (key, location, count, value)*]`.
    /// Only keys stored inline (location 0) are considered.
    pub fn parse(directory: &[u16]) -> Self {
        let mut keys = GeoKeys::default();
        let Some(count) = directory.get(3).copied() else {
            return keys;
        };
        for entry in directory[4..].chunks_exact(4).take(count as usize) {
            let (id, location, value) = (entry[0], entry[1], entry[3]);
            if location != 0 {
                continue;
            }
            match id {
                GT_MODEL_TYPE_GEO_KEY => keys.model_type = Some(value),
                GT_RASTER_TYPE_GEO_KEY => keys.raster_type = Some(value),
                GEOGRAPHIC_TYPE_GEO_KEY => keys.geographic_type = Some(value),
                PROJECTED_CS_TYPE_GEO_KEY => keys.projected_type = Some(value),
                _ => {}
            }
        }
        keys
    }

    /// EPSG code of the raster's CRS, if it is a registered one.
    pub fn epsg(&self) -> Option<u16> {
        let code = match self.model_type {
            Some(MODEL_TYPE_PROJECTED) => self.projected_type,
            Some(MODEL_TYPE_GEOGRAPHIC) => self.geographic_type,
            _ => self.projected_type.or(self.geographic_type),
        }?;
        (code != USER_DEFINED && code != 0).then_some(code)
    }
}

pub(super) fn geo_keys(decoder: &mut TiffDecoder) -> Result<Option<GeoKeys>, TiffError> {
    Ok(find_tag(decoder, GEOTIFF_GEOKEYDIRECTORY)?
        .map(|v| values(v, Value::into_u16))
        .transpose()?
        .map(|dir| GeoKeys::parse(&dir)))
}

/// Strip or tile layout of the current image. Strips are chunks as wide as
/// the image, so one layout covers both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct ChunkGrid {
    pub chunk_width: usize,
    pub chunk_height: usize,
    pub across: usize,
    pub down: usize,
}

impl ChunkGrid {
    pub fn new(chunk: (u32, u32), width: usize, height: usize) -> Self {
        let chunk_width = (chunk.0 as usize).max(1);
        let chunk_height = (chunk.1 as usize).max(1);
        Self {
            chunk_width,
            chunk_height,
            across: width.div_ceil(chunk_width),
            down: height.div_ceil(chunk_height),
        }
    }

    pub fn of(decoder: &TiffDecoder, width: usize, height: usize) -> Self {
        Self::new(decoder.chunk_dimensions(), width, height)
    }

    pub fn count(&self) -> usize {
        self.across * self.down
    }

    /// Chunk index holding source pixel (`row`, `col`) plus the pixel's
    /// position inside that chunk.
    pub fn locate(&self, row: usize, col: usize) -> (u32, usize, usize) {
        let (chunk_row, chunk_col) = (row / self.chunk_height, col / self.chunk_width);
        (
            (chunk_row * self.across + chunk_col) as u32,
            row - chunk_row * self.chunk_height,
            col - chunk_col * self.chunk_width,
        )
    }
}

/// Read one sample from a decoded buffer as f64.
pub(super) fn sample_value(buffer: &DecodingResult, index: usize) -> Option<f64> {
    match buffer {
        DecodingResult::U8(v) => v.get(index).map(|&s| s as f64),
        DecodingResult::U16(v) => v.get(index).map(|&s| s as f64),
        DecodingResult::U32(v) => v.get(index).map(|&s| s as f64),
        DecodingResult::U64(v) => v.get(index).map(|&s| s as f64),
        DecodingResult::I8(v) => v.get(index).map(|&s| s as f64),
        DecodingResult::I16(v) => v.get(index).map(|&s| s as f64),
        DecodingResult::I32(v) => v.get(index).map(|&s| s as f64),
        DecodingResult::I64(v) => v.get(index).map(|&s| s as f64),
        DecodingResult::F32(v) => v.get(index).map(|&s| s as f64),
        DecodingResult::F64(v) => v.get(index).copied(),
    }
}

pub(super) fn buffer_len(buffer: &DecodingResult) -> usize {
    match buffer {
        DecodingResult::U8(v) => v.len(),
        DecodingResult::U16(v) => v.len(),
        DecodingResult::U32(v) => v.len(),
        DecodingResult::U64(v) => v.len(),
        DecodingResult::I8(v) => v.len(),
        DecodingResult::I16(v) => v.len(),
        DecodingResult::I32(v) => v.len(),
        DecodingResult::I64(v) => v.len(),
        DecodingResult::F32(v) => v.len(),
        DecodingResult::F64(v) => v.len(),
    }
}

/// A pixel is valid when it is a number and differs from the nodata value.
pub(super) fn is_valid(value: f64, nodata: Option<f64>) -> bool {
    if value.is_nan() {
        return false;
    }
    nodata.is_none_or(|nd| value != nd)
}

/// Per-band descriptions out of the `GDAL_METADATA` XML blob, e.g.
/// `<Item name="DESCRIPTION" sample="0" role="description">Red</Item>`.
pub(super) fn parse_band_descriptions(xml: &str, band_count: usize) -> Vec<Option<String>> {
    let mut descriptions = vec![None; band_count];
    for item in xml.split("<Item").skip(1) {
        let Some((attrs, rest)) = item.split_once('>') else {
            continue;
        };
        if !attrs.contains("name=\"DESCRIPTION\"") || !attrs.contains("role=\"description\"") {
            continue;
        }
        let Some(sample) = attribute(attrs, "sample").and_then(|s| s.parse::<usize>().ok()) else {
            continue;
        };
        let Some((text, _)) = rest.split_once("</Item>") else {
            continue;
        };
        if let Some(slot) = descriptions.get_mut(sample) {
            *slot = Some(unescape_xml(text));
        }
    }
    descriptions
}

fn attribute<'a>(attrs: &'a str, name: &str) -> Option<&'a str> {
    let needle = format!("{name}=\"");
    let start = attrs.find(&needle)? + needle.len();
    let len = attrs[start..].find('"')?;
    Some(&attrs[start..start + len])
}

fn unescape_xml(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geokeys_projected() {
        let dir = [1, 1, 0, 3, 1024, 0, 1, 1, 1025, 0, 1, 1, 3072, 0, 1, 32633];
        let keys = GeoKeys::parse(&dir);
        assert_eq!(keys.model_type, Some(1));
        assert_eq!(keys.epsg(), Some(32633));
    }

    #[test]
    fn test_geokeys_user_defined_has_no_epsg() {
        let dir = [1, 1, 0, 2, 1024, 0, 1, 2, 2048, 0, 1, 32767];
        assert_eq!(GeoKeys::parse(&dir).epsg(), None);
    }

    #[test]
    fn test_geokeys_truncated_directory() {
        assert_eq!(GeoKeys::parse(&[1, 1]), GeoKeys::default());
        // count claims more keys than present
        let keys = GeoKeys::parse(&[1, 1, 0, 5, 2048, 0, 1, 4326]);
        assert_eq!(keys.epsg(), Some(4326));
    }

    #[test]
    fn test_chunk_grid_for_strips_and_tiles() {
        // 10 x 7 image in strips of 3 rows
        let strips = ChunkGrid::new((10, 3), 10, 7);
        assert_eq!((strips.across, strips.down, strips.count()), (1, 3, 3));
        assert_eq!(strips.locate(6, 9), (2, 0, 9));

        // 16 x 16 tiles over a 40 x 20 image
        let tiles = ChunkGrid::new((16, 16), 40, 20);
        assert_eq!((tiles.across, tiles.down), (3, 2));
        assert_eq!(tiles.locate(17, 33), (5, 1, 1));
        assert_eq!(tiles.locate(0, 15), (0, 0, 15));
    }

    #[test]
    fn test_parse_nodata() {
        assert_eq!(parse_nodata("-9999\0"), Some(-9999.0));
        assert!(parse_nodata("nan").unwrap().is_nan());
        assert_eq!(parse_nodata("garbage"), None);
    }

    #[test]
    fn test_validity() {
        assert!(is_valid(1.0, None));
        assert!(!is_valid(f64::NAN, None));
        assert!(!is_valid(0.0, Some(0.0)));
        assert!(is_valid(0.0, Some(-1.0)));
    }

    #[test]
    fn test_band_descriptions() {
        let xml = r#"<GDALMetadata>
  <Item name="DESCRIPTION" sample="1" role="description">Near &amp; IR</Item>
  <Item name="OFFSET" sample="0" role="offset">0</Item>
  <Item name="DESCRIPTION" sample="0" role="description">Red</Item>
</GDALMetadata>"#;
        let descriptions = parse_band_descriptions(xml, 2);
        assert_eq!(descriptions, vec![Some("Red".into()), Some("Near & IR".into())]);
    }
}
