use ndarray::Array2;

use crate::error::{LucyError, Result};

/// A point-spread function: a 2-D convolution kernel with odd extents, so a
/// unique center pixel exists to anchor the correlation.
#[derive(Clone, Debug)]
pub struct Psf {
    data: Array2<f32>,
}

impl Psf {
    /// Wrap a kernel, rejecting even extents.
    pub fn new(data: Array2<f32>) -> Result<Self> {
        let (height, width) = data.dim();
        if height % 2 == 0 || width % 2 == 0 {
            return Err(LucyError::EvenPsfDimensions { height, width });
        }
        let data = if data.is_standard_layout() {
            data
        } else {
            data.as_standard_layout().to_owned()
        };
        Ok(Self { data })
    }

    /// The 180°-rotated kernel used for the backward correlation step:
    /// `flipped[i][j] = psf[H-1-i][W-1-j]`. This is the only way a flipped
    /// PSF comes to exist, so it can never drift out of lockstep with its
    /// source. Flipping twice reproduces the original exactly.
    pub fn flipped(&self) -> Psf {
        let (h, w) = self.data.dim();
        let data = Array2::from_shape_fn((h, w), |(i, j)| self.data[[h - 1 - i, w - 1 - j]]);
        Psf { data }
    }

    /// Use a single-channel image as a kernel, normalized to sum 1 so it
    /// conserves energy under convolution.
    pub fn from_image(image: &crate::image::Image) -> Result<Psf> {
        if image.channels() != 1 {
            return Err(LucyError::UnsupportedChannelCount(image.channels()));
        }
        let mut data = image
            .data
            .index_axis(ndarray::Axis(0), 0)
            .to_owned();
        let sum: f32 = data.iter().sum();
        if sum > 0.0 {
            data.mapv_inplace(|v| v / sum);
        }
        Psf::new(data)
    }

    /// Generate a normalized Gaussian kernel centered on the middle pixel.
    pub fn gaussian(height: usize, width: usize, sigma: f32) -> Result<Psf> {
        let mut data = Array2::<f32>::zeros((height, width));
        let cy = (height / 2) as f64;
        let cx = (width / 2) as f64;
        let sigma2 = 2.0 * (sigma as f64) * (sigma as f64);
        let mut sum = 0.0f64;

        for row in 0..height {
            let y = row as f64 - cy;
            for col in 0..width {
                let x = col as f64 - cx;
                let val = (-(x * x + y * y) / sigma2).exp();
                data[[row, col]] = val as f32;
                sum += val;
            }
        }

        if sum > 0.0 {
            let inv = 1.0 / sum as f32;
            data.mapv_inplace(|v| v * inv);
        }

        Psf::new(data)
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn dim(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn data(&self) -> &Array2<f32> {
        &self.data
    }

    /// Kernel taps as a contiguous row-major slice.
    pub fn as_slice(&self) -> &[f32] {
        self.data
            .as_slice()
            .expect("PSF data is kept in standard layout")
    }
}
