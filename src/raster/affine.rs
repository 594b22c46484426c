/// A 2D affine transform representing a raster geotransform.
///
/// Maps pixel coordinates (col, row) to projected coordinates (x, y):
///   x = a * col + b * row + c
///   y = d * col + e * row + f
///
/// In GDAL convention: [c, a, b, f, d, e]
/// We store as: [a, b, c, d, e, f]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Affine {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Affine {
    pub fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    /// North-up transform with the upper-left corner at (`left`, `top`).
    pub fn north_up(left: f64, top: f64, res_x: f64, res_y: f64) -> Self {
        Self::new(res_x, 0.0, left, 0.0, -res_y, top)
    }

    /// Convert to GDAL-style geotransform array [c, a, b, f, d, e].
    pub fn to_gdal(&self) -> [f64; 6] {
        [self.c, self.a, self.b, self.f, self.d, self.e]
    }

    /// Apply the forward transform: (col, row) -> (x, y).
    pub fn forward(&self, col: f64, row: f64) -> (f64, f64) {
        let x = self.a * col + self.b * row + self.c;
        let y = self.d * col + self.e * row + self.f;
        (x, y)
    }

    /// Pixel size as a positive (x, y) pair, the way rasterio reports `res`.
    pub fn resolution(&self) -> (f64, f64) {
        if self.b == 0.0 && self.d == 0.0 {
            return (self.a.abs(), self.e.abs());
        }
        (
            (self.a * self.a + self.d * self.d).sqrt(),
            (self.b * self.b + self.e * self.e).sqrt(),
        )
    }

    /// Shift the transform by a fraction of a pixel in both directions.
    pub fn translate_pixels(&self, dcol: f64, drow: f64) -> Self {
        let (c, f) = self.forward(dcol, drow);
        Self { c, f, ..*self }
    }
}
