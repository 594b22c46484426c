//! Per-band statistics pass.
//!
//! Reopens the file with its own decoder, independent of
//! [`RasterDataset`](super::reader::RasterDataset). The band count comes from
//! the decoded pixel buffers so it can be cross-checked against the header.

use std::path::Path;

use serde::Serialize;
use tiff::{TiffError, decoder::DecodingResult};

use super::{reader::DecodeError, tags};

/// min / max / mean / population standard deviation over valid pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BandStatistics {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BandSummary {
    pub description: Option<String>,
    pub nodata: Option<f64>,
    /// `None` when the band has no valid pixel at all.
    pub statistics: Option<BandStatistics>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Accumulator {
    count: u64,
    min: f64,
    max: f64,
    mean: f64,
    m2: f64,
}

impl Accumulator {
    // Welford's online update
    fn push(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    fn finish(self) -> Option<BandStatistics> {
        (self.count > 0).then(|| BandStatistics {
            min: self.min,
            max: self.max,
            mean: self.mean,
            std: (self.m2 / self.count as f64).sqrt(),
        })
    }
}

/// Per-band accumulators fed one decoded chunk at a time. The band count is
/// taken from the pixel data itself, never from the header.
#[derive(Debug, Default)]
struct BandAccumulators {
    bands: Vec<Accumulator>,
}

impl BandAccumulators {
    /// Fold a pixel-interleaved chunk of `pixels` pixels into the totals.
    fn push_chunk(
        &mut self,
        data: &DecodingResult,
        pixels: usize,
        nodata: Option<f64>,
    ) -> Result<(), String> {
        let samples = tags::buffer_len(data);
        let per_pixel = interleaved_bands(samples, pixels)
            .ok_or_else(|| format!("{samples} samples do not split over {pixels} pixel(s)"))?;
        if self.bands.is_empty() {
            self.bands = vec![Accumulator::default(); per_pixel];
        } else if self.bands.len() != per_pixel {
            return Err(format!(
                "chunk holds {per_pixel} sample(s) per pixel, earlier chunks held {}",
                self.bands.len()
            ));
        }
        for index in 0..samples {
            let Some(value) = tags::sample_value(data, index) else {
                break;
            };
            if tags::is_valid(value, nodata) {
                self.bands[index % per_pixel].push(value);
            }
        }
        Ok(())
    }
}

fn interleaved_bands(samples: usize, pixels: usize) -> Option<usize> {
    (pixels > 0 && samples >= pixels && samples % pixels == 0).then(|| samples / pixels)
}

/// Summarise every band of the raster at `path`, one strip or tile at a time.
pub fn summarize_bands(path: &Path) -> Result<Vec<BandSummary>, DecodeError> {
    let fail = |e: TiffError| DecodeError::format(path, e);
    let mut decoder = tags::open_decoder(path)?;

    if tags::is_planar(&mut decoder).map_err(fail)?
        && tags::samples_per_pixel(&mut decoder).map_err(fail)? > 1
    {
        return Err(DecodeError::Unsupported {
            path: path.to_path_buf(),
            reason: "planar (band-separate) sample layout".into(),
        });
    }
    let nodata = tags::nodata(&mut decoder).map_err(fail)?;
    let metadata = tags::find_ascii(&mut decoder, tags::GDAL_METADATA).map_err(fail)?;

    let (width, height) = decoder.dimensions().map_err(fail)?;
    let grid = tags::ChunkGrid::of(&decoder, width as usize, height as usize);
    let mut totals = BandAccumulators::default();
    for chunk in 0..grid.count() as u32 {
        let (chunk_width, chunk_height) = decoder.chunk_data_dimensions(chunk);
        let data = decoder.read_chunk(chunk).map_err(fail)?;
        totals
            .push_chunk(&data, chunk_width as usize * chunk_height as usize, nodata)
            .map_err(|reason| DecodeError::Format {
                path: path.to_path_buf(),
                reason,
            })?;
    }
    drop(decoder);

    if totals.bands.is_empty() {
        return Err(DecodeError::Format {
            path: path.to_path_buf(),
            reason: "raster holds no pixel data".into(),
        });
    }
    let band_count = totals.bands.len();
    let descriptions = metadata
        .map(|xml| tags::parse_band_descriptions(&xml, band_count))
        .unwrap_or_else(|| vec![None; band_count]);

    Ok(totals
        .bands
        .into_iter()
        .zip(descriptions)
        .map(|(acc, description)| BandSummary {
            description,
            nodata,
            statistics: acc.finish(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::testing::{GeoTiffFixture, write_fixture};
    use approx::assert_relative_eq;

    #[test]
    fn test_accumulator_matches_population_std() {
        let mut acc = Accumulator::default();
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            acc.push(v);
        }
        let stats = acc.finish().unwrap();
        assert_relative_eq!(stats.mean, 5.0, epsilon = 1e-12);
        assert_relative_eq!(stats.std, 2.0, epsilon = 1e-12);
        assert_eq!((stats.min, stats.max), (2.0, 9.0));
        assert!(Accumulator::default().finish().is_none());
    }

    #[test]
    fn test_summary_excludes_nodata() {
        let dir = tempfile::tempdir().unwrap();
        let mut fixture = GeoTiffFixture::uniform(4, 4, 10.0)
            .nodata(-1.0)
            .describe(&["elevation"]);
        fixture.set(0, 0, -1.0);
        fixture.set(3, 3, 20.0);
        let path = write_fixture(dir.path(), "stats.tif", &fixture);

        let bands = summarize_bands(&path).unwrap();
        assert_eq!(bands.len(), 1);
        let band = &bands[0];
        assert_eq!(band.description.as_deref(), Some("elevation"));
        assert_eq!(band.nodata, Some(-1.0));
        let stats = band.statistics.unwrap();
        assert_eq!((stats.min, stats.max), (10.0, 20.0));
        assert_relative_eq!(stats.mean, (14.0 * 10.0 + 20.0) / 15.0, epsilon = 1e-9);
    }

    #[test]
    fn test_rgb_bands_are_separated() {
        let dir = tempfile::tempdir().unwrap();
        let mut fixture = GeoTiffFixture::rgb(2, 2, 1.0);
        // band 2 of pixel (0, 0) only
        fixture.pixels[1] = 9.0;
        let path = write_fixture(dir.path(), "rgb.tif", &fixture);

        let bands = summarize_bands(&path).unwrap();
        assert_eq!(bands.len(), 3);
        assert_eq!(bands[0].statistics.unwrap().max, 1.0);
        assert_eq!(bands[1].statistics.unwrap().max, 9.0);
        assert_eq!(bands[2].statistics.unwrap().max, 1.0);
        assert!(bands.iter().all(|b| b.description.is_none()));
    }

    #[test]
    fn test_band_count_comes_from_pixel_data() {
        let mut totals = BandAccumulators::default();
        // 4 pixels, 2 samples each: a two band chunk
        let chunk = DecodingResult::F32(vec![1.0, 10.0, 2.0, 20.0, 3.0, 30.0, 4.0, 40.0]);
        totals.push_chunk(&chunk, 4, None).unwrap();
        assert_eq!(totals.bands.len(), 2);
        assert_eq!(totals.bands[1].finish().unwrap().max, 40.0);

        let single = DecodingResult::U8(vec![1, 2, 3, 4]);
        assert!(totals.push_chunk(&single, 4, None).is_err());
        let ragged = DecodingResult::U8(vec![1, 2, 3]);
        assert!(BandAccumulators::default().push_chunk(&ragged, 2, None).is_err());
    }

    #[test]
    fn test_striped_raster_statistics() {
        let dir = tempfile::tempdir().unwrap();
        let mut fixture = GeoTiffFixture::rgb(5, 7, 2.0).strips(2);
        fixture.set(6, 4, 8.0);
        let path = write_fixture(dir.path(), "striped.tif", &fixture);

        let bands = summarize_bands(&path).unwrap();
        assert_eq!(bands.len(), 3);
        for band in &bands {
            let stats = band.statistics.unwrap();
            assert_eq!((stats.min, stats.max), (2.0, 8.0));
            assert_relative_eq!(stats.mean, (34.0 * 2.0 + 8.0) / 35.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_all_nodata_band_has_no_statistics() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = GeoTiffFixture::uniform(3, 3, 0.0).nodata(0.0);
        let path = write_fixture(dir.path(), "empty.tif", &fixture);
        let bands = summarize_bands(&path).unwrap();
        assert!(bands[0].statistics.is_none());
    }
}
