//! Raster reader: header metadata and capped-resolution validity masks for a
//! single GeoTIFF on the local filesystem.
//!
//! File handles are opened per call and dropped before returning, whatever
//! the exit path.

use std::{
    fmt, io,
    path::{Path, PathBuf},
};

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tiff::{TiffError, decoder::DecodingResult, tags::Tag};
use tracing::debug;

use super::{
    affine::Affine,
    tags::{self, GeoKeys},
};
use crate::geometry::transform::proj_string_for_epsg;

/// Largest mask grid ever materialised for footprint detection.
pub const MAX_LOAD_SHAPE: (usize, usize) = (4000, 4000);

const DRIVER: &str = "GTiff";

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("cannot open `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot decode `{path}`: {reason}")]
    Format { path: PathBuf, reason: String },
    #[error("unsupported raster layout in `{path}`: {reason}")]
    Unsupported { path: PathBuf, reason: String },
    #[error("band {band} out of range, raster has {count} band(s)")]
    BandOutOfRange { band: usize, count: usize },
    #[error("`{path}` declares {header} band(s) but its pixel data holds {decoded}")]
    BandCountMismatch {
        path: PathBuf,
        header: usize,
        decoded: usize,
    },
    #[error("`{path}` carries no spatial reference")]
    MissingSpatialReference { path: PathBuf },
}

impl DecodeError {
    pub(super) fn format(path: &Path, err: TiffError) -> Self {
        Self::Format {
            path: path.to_path_buf(),
            reason: err.to_string(),
        }
    }
}

/// Colour interpretation of a band, named the way rasterio names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorInterp {
    Gray,
    Red,
    Green,
    Blue,
    Alpha,
    Palette,
    Undefined,
}

impl ColorInterp {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Gray => "gray",
            Self::Red => "red",
            Self::Green => "green",
            Self::Blue => "blue",
            Self::Alpha => "alpha",
            Self::Palette => "palette",
            Self::Undefined => "undefined",
        }
    }
}

impl fmt::Display for ColorInterp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Raster bounds in the raster's own CRS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
    pub top: f64,
}

/// Header-level view of a raster file.
#[derive(Debug, Clone)]
pub struct RasterDataset {
    pub path: PathBuf,
    pub width: usize,
    pub height: usize,
    pub band_count: usize,
    pub driver: &'static str,
    pub dtypes: Vec<String>,
    pub interpretations: Vec<ColorInterp>,
    pub transform: Affine,
    /// PROJ string of the raster CRS, `None` for non-georeferenced images.
    pub crs: Option<String>,
    pub nodata: Option<f64>,
    planar: bool,
}

impl RasterDataset {
    /// Read the header of the raster at `path`. Pixel data is not decoded.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DecodeError> {
        let path = path.as_ref();
        let mut decoder = tags::open_decoder(path)?;
        let fail = |e: TiffError| DecodeError::format(path, e);

        let (width, height) = decoder.dimensions().map_err(fail)?;
        let band_count = tags::samples_per_pixel(&mut decoder).map_err(fail)?;
        if band_count == 0 {
            return Err(DecodeError::Format {
                path: path.to_path_buf(),
                reason: "raster declares zero samples per pixel".into(),
            });
        }
        let planar = tags::is_planar(&mut decoder).map_err(fail)?;

        let bits = tags::find_u16_vec(&mut decoder, Tag::BitsPerSample)
            .map_err(fail)?
            .unwrap_or_else(|| vec![1]);
        let formats = tags::find_u16_vec(&mut decoder, Tag::SampleFormat)
            .map_err(fail)?
            .unwrap_or_else(|| vec![1]);
        let dtypes = (0..band_count)
            .map(|i| {
                let bits = bits.get(i).or(bits.first()).copied().unwrap_or(8);
                let format = formats.get(i).or(formats.first()).copied().unwrap_or(1);
                dtype_name(format, bits)
            })
            .collect();

        let photometric = tags::find_u16(&mut decoder, Tag::PhotometricInterpretation)
            .map_err(fail)?
            .unwrap_or(1);
        let extra = tags::find_u16_vec(&mut decoder, Tag::ExtraSamples)
            .map_err(fail)?
            .unwrap_or_default();
        let interpretations = color_interpretations(photometric, &extra, band_count);

        let keys = tags::geo_keys(&mut decoder).map_err(fail)?;
        let transform = geotransform(&mut decoder, keys).map_err(fail)?;
        let crs = keys.and_then(|k| k.epsg()).map(|code| {
            proj_string_for_epsg(code)
                .map(str::to_string)
                .unwrap_or_else(|| format!("EPSG:{code}"))
        });
        let nodata = tags::nodata(&mut decoder).map_err(fail)?;

        debug!(
            path = %path.display(),
            width, height, band_count, crs = ?crs,
            "opened raster header"
        );

        Ok(Self {
            path: path.to_path_buf(),
            width: width as usize,
            height: height as usize,
            band_count,
            driver: DRIVER,
            dtypes,
            interpretations,
            transform,
            crs,
            nodata,
            planar,
        })
    }

    /// Bounds following rasterio: (left, bottom, right, top) from the
    /// upper-left origin and the far corner of the pixel grid.
    pub fn bounds(&self) -> Bounds {
        let (left, top) = self.transform.forward(0.0, 0.0);
        let (right, bottom) = self.transform.forward(self.width as f64, self.height as f64);
        Bounds {
            left,
            bottom,
            right,
            top,
        }
    }

    pub fn resolution(&self) -> (f64, f64) {
        self.transform.resolution()
    }

    pub fn require_crs(&self) -> Result<&str, DecodeError> {
        self.crs
            .as_deref()
            .ok_or_else(|| DecodeError::MissingSpatialReference {
                path: self.path.clone(),
            })
    }

    /// Validity mask of `band` (1-based), downsampled with nearest-neighbour
    /// sampling to at most `max_shape` (rows, cols).
    pub fn sample_valid_mask(
        &self,
        band: usize,
        max_shape: (usize, usize),
    ) -> Result<Array2<bool>, DecodeError> {
        if band == 0 || band > self.band_count {
            return Err(DecodeError::BandOutOfRange {
                band,
                count: self.band_count,
            });
        }
        if self.planar && self.band_count > 1 {
            return Err(DecodeError::Unsupported {
                path: self.path.clone(),
                reason: "planar (band-separate) sample layout".into(),
            });
        }
        if self.width == 0 || self.height == 0 {
            return Ok(Array2::from_elem((0, 0), false));
        }

        let mut decoder = tags::open_decoder(&self.path)?;
        let grid = tags::ChunkGrid::of(&decoder, self.width, self.height);
        let rows = self.height.min(max_shape.0.max(1));
        let cols = self.width.min(max_shape.1.max(1));
        let src_cols: Vec<usize> = (0..cols)
            .map(|c| nearest_index(c, cols, self.width))
            .collect();

        // Output rows map to non-decreasing source rows, so only the chunks
        // of one chunk row are ever held at a time.
        let mut held: Vec<(u32, DecodingResult, usize)> = Vec::new();
        let mut mask = Array2::from_elem((rows, cols), false);
        for r in 0..rows {
            let src_row = nearest_index(r, rows, self.height);
            for (c, &src_col) in src_cols.iter().enumerate() {
                let (chunk, local_row, local_col) = grid.locate(src_row, src_col);
                let position = match held.iter().position(|(index, ..)| *index == chunk) {
                    Some(position) => position,
                    None => {
                        if c == 0 {
                            held.clear();
                        }
                        held.push(self.read_chunk(&mut decoder, chunk)?);
                        held.len() - 1
                    }
                };
                let (_, data, data_width) = &held[position];
                let index = (local_row * data_width + local_col) * self.band_count + (band - 1);
                mask[(r, c)] = tags::sample_value(data, index)
                    .is_some_and(|value| tags::is_valid(value, self.nodata));
            }
        }
        Ok(mask)
    }

    /// Decode one strip or tile, returning it with its pixel width.
    fn read_chunk(
        &self,
        decoder: &mut tags::TiffDecoder,
        chunk: u32,
    ) -> Result<(u32, DecodingResult, usize), DecodeError> {
        let (width, height) = decoder.chunk_data_dimensions(chunk);
        let data = decoder
            .read_chunk(chunk)
            .map_err(|e| DecodeError::format(&self.path, e))?;
        let expected = width as usize * height as usize * self.band_count;
        if tags::buffer_len(&data) < expected {
            return Err(DecodeError::Format {
                path: self.path.clone(),
                reason: format!(
                    "chunk {chunk} decoded {} samples, expected {expected}",
                    tags::buffer_len(&data)
                ),
            });
        }
        Ok((chunk, data, width as usize))
    }

    /// Fails when an independent decode of the pixel data saw a different
    /// number of bands than the header declares.
    pub fn ensure_band_count(&self, decoded: usize) -> Result<(), DecodeError> {
        if decoded == self.band_count {
            return Ok(());
        }
        Err(DecodeError::BandCountMismatch {
            path: self.path.clone(),
            header: self.band_count,
            decoded,
        })
    }
}

/// Source index whose pixel contains the centre of output cell `out`.
fn nearest_index(out: usize, out_len: usize, src_len: usize) -> usize {
    let center = (out as f64 + 0.5) * src_len as f64 / out_len as f64;
    (center.floor() as usize).min(src_len - 1)
}

fn dtype_name(sample_format: u16, bits: u16) -> String {
    match (sample_format, bits) {
        (1, 8) => "uint8".into(),
        (1, 16) => "uint16".into(),
        (1, 32) => "uint32".into(),
        (1, 64) => "uint64".into(),
        (2, 8) => "int8".into(),
        (2, 16) => "int16".into(),
        (2, 32) => "int32".into(),
        (2, 64) => "int64".into(),
        (3, 32) => "float32".into(),
        (3, 64) => "float64".into(),
        (_, bits) => format!("unknown{bits}"),
    }
}

fn color_interpretations(photometric: u16, extra: &[u16], band_count: usize) -> Vec<ColorInterp> {
    let base: &[ColorInterp] = match photometric {
        0 | 1 => &[ColorInterp::Gray],
        2 => &[ColorInterp::Red, ColorInterp::Green, ColorInterp::Blue],
        3 => &[ColorInterp::Palette],
        _ => &[],
    };
    (0..band_count)
        .map(|i| match base.get(i) {
            Some(interp) => *interp,
            None => {
                // ExtraSamples: 1 = associated alpha, 2 = unassociated alpha
                let extra_index = i.checked_sub(base.len());
                match extra_index.and_then(|j| extra.get(j)) {
                    Some(1) | Some(2) => ColorInterp::Alpha,
                    _ => ColorInterp::Undefined,
                }
            }
        })
        .collect()
}

fn geotransform(
    decoder: &mut tags::TiffDecoder,
    keys: Option<GeoKeys>,
) -> Result<Affine, TiffError> {
    let transform = if let Some(m) = tags::find_f64_vec(decoder, tags::GEOTIFF_MODELTRANSFORMATION)?
        .filter(|m| m.len() >= 8)
    {
        Affine::new(m[0], m[1], m[3], m[4], m[5], m[7])
    } else {
        let tiepoint = tags::find_f64_vec(decoder, tags::GEOTIFF_MODELTIEPOINT)?;
        let scale = tags::find_f64_vec(decoder, tags::GEOTIFF_MODELPIXELSCALE)?;
        match (tiepoint, scale) {
            (Some(tp), Some(sc)) if tp.len() >= 6 && sc.len() >= 2 => {
                let (i, j, x, y) = (tp[0], tp[1], tp[3], tp[4]);
                let (sx, sy) = (sc[0], sc[1]);
                Affine::north_up(x - i * sx, y + j * sy, sx, sy)
            }
            // No georeferencing: plain pixel grid
            _ => Affine::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0),
        }
    };

    let pixel_is_point = keys.and_then(|k| k.raster_type) == Some(tags::RASTER_PIXEL_IS_POINT);
    Ok(if pixel_is_point {
        transform.translate_pixels(-0.5, -0.5)
    } else {
        transform
    })
}
