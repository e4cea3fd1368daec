//! Rasterization and 8-bit quantization of flat activity maps.

use image::GrayImage;
use ndarray::{Array2, ArrayView1, Axis};

use crate::error::{NsdFlatError, Result};
use crate::resample::Resampler;

/// Linear map from `[vmin, vmax]` to the full `u8` range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantizer {
    pub vmin: f32,
    pub vmax: f32,
}

impl Quantizer {
    pub fn new(vmin: f32, vmax: f32) -> Result<Self> {
        if !(vmin.is_finite() && vmax.is_finite() && vmin < vmax) {
            return Err(NsdFlatError::Config(format!(
                "invalid quantization range [{}, {}]",
                vmin, vmax
            )));
        }
        Ok(Self { vmin, vmax })
    }

    /// Range `[-vmax, vmax]`
    pub fn symmetric(vmax: f32) -> Result<Self> {
        Self::new(-vmax, vmax)
    }

    /// Clip, scale to `[0, 255]` and truncate. Non-finite values map to 0.
    pub fn quantize(&self, x: f32) -> u8 {
        if !x.is_finite() {
            return 0;
        }
        let clipped = x.clamp(self.vmin, self.vmax);
        // Normalize to [0, 1] first, then scale
        let unit = (clipped - self.vmin) / (self.vmax - self.vmin);
        let scaled = 255.0f32 * unit;
        scaled as u8
    }

    pub fn quantize_grid(&self, grid: &Array2<f32>) -> Array2<u8> {
        grid.mapv(|x| self.quantize(x))
    }
}

/// Reverse the row order, turning a lower-origin grid into image order.
pub fn flip_vertical<T: Clone>(grid: &Array2<T>) -> Array2<T> {
    let mut flipped = grid.clone();
    flipped.invert_axis(Axis(0));
    flipped.as_standard_layout().into_owned()
}

/// Turns one normalized activity row into a grayscale flat map
pub struct Rasterizer<'a> {
    resampler: &'a Resampler,
    quantizer: Quantizer,
}

impl<'a> Rasterizer<'a> {
    pub fn new(resampler: &'a Resampler, quantizer: Quantizer) -> Self {
        Self {
            resampler,
            quantizer,
        }
    }

    /// Quantized grid in lower-origin order
    ///
    /// Pixels outside the raster mask are set to 0.0 before quantization.
    pub fn quantized(&self, row: ArrayView1<f32>) -> Result<Array2<u8>> {
        let grid = self.resampler.transform(row)?;
        let grid = self.resampler.apply_mask(grid, 0.0)?;
        Ok(self.quantizer.quantize_grid(&grid))
    }

    pub fn render(&self, row: ArrayView1<f32>) -> Result<GrayImage> {
        let flipped = flip_vertical(&self.quantized(row)?);
        let (height, width) = flipped.dim();
        let pixels: Vec<u8> = flipped.iter().copied().collect();
        GrayImage::from_raw(width as u32, height as u32, pixels).ok_or_else(|| {
            NsdFlatError::Shape(format!("cannot build a {}x{} image", width, height))
        })
    }
}
