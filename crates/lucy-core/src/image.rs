use ndarray::{Array2, Array3};

use crate::error::{LucyError, Result};

/// A multi-channel image. Pixel values are f32; axes are
/// (channel, height, width), row-major.
#[derive(Clone, Debug)]
pub struct Image {
    /// Pixel data, standard layout, shape = (channels, height, width)
    pub data: Array3<f32>,
}

impl Image {
    /// Wrap an existing array, rejecting zero-sized axes. Non-standard
    /// layouts are copied into a contiguous buffer.
    pub fn new(data: Array3<f32>) -> Result<Self> {
        let (channels, height, width) = data.dim();
        if channels == 0 || height == 0 || width == 0 {
            return Err(LucyError::InvalidDimensions {
                channels,
                height,
                width,
            });
        }
        let data = if data.is_standard_layout() {
            data
        } else {
            data.as_standard_layout().to_owned()
        };
        Ok(Self { data })
    }

    /// A 2-D image is a single implicit channel.
    pub fn from_gray(data: Array2<f32>) -> Result<Self> {
        Self::new(data.insert_axis(ndarray::Axis(0)))
    }

    /// Build from a flat buffer and a caller-supplied shape. Accepts
    /// (height, width) or (channels, height, width); anything else is
    /// rejected before the buffer is touched.
    pub fn from_shape_vec(shape: &[usize], data: Vec<f32>) -> Result<Self> {
        match *shape {
            [height, width] => {
                let arr = Array2::from_shape_vec((height, width), data)
                    .map_err(|_| LucyError::InvalidDimensions {
                        channels: 1,
                        height,
                        width,
                    })?;
                Self::from_gray(arr)
            }
            [channels, height, width] => {
                let arr = Array3::from_shape_vec((channels, height, width), data).map_err(
                    |_| LucyError::InvalidDimensions {
                        channels,
                        height,
                        width,
                    },
                )?;
                Self::new(arr)
            }
            _ => Err(LucyError::InvalidDimensionality(shape.len())),
        }
    }

    /// Allocate a zero-filled image with the same shape.
    pub fn zeros_like(&self) -> Self {
        Self {
            data: Array3::zeros(self.data.dim()),
        }
    }

    pub fn channels(&self) -> usize {
        self.data.dim().0
    }

    pub fn height(&self) -> usize {
        self.data.dim().1
    }

    pub fn width(&self) -> usize {
        self.data.dim().2
    }

    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }
}
