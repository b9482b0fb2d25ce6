#![allow(dead_code)]

use ndarray::{Array2, Array3};

use lucy_core::deconv::DivisionMode;
use lucy_core::image::Image;
use lucy_core::psf::Psf;

/// Image whose channels carry distinct smooth gradients, so per-channel
/// independence bugs show up as numeric differences.
pub fn ramp_image(channels: usize, height: usize, width: usize) -> Image {
    let data = Array3::from_shape_fn((channels, height, width), |(ch, r, c)| {
        let base = (r * width + c) as f32 / (height * width) as f32;
        0.1 + 0.8 * base / (ch + 1) as f32
    });
    Image::new(data).expect("valid test image")
}

pub fn flat_image(channels: usize, height: usize, width: usize, value: f32) -> Image {
    Image::new(Array3::from_elem((channels, height, width), value)).expect("valid test image")
}

/// Delta kernel: all mass on one pixel.
pub fn delta_psf(height: usize, width: usize, at: (usize, usize)) -> Psf {
    let mut data = Array2::<f32>::zeros((height, width));
    data[[at.0, at.1]] = 1.0;
    Psf::new(data).expect("valid delta PSF")
}

/// Center-anchored 2-D correlation with zero-padding, written as plainly as
/// possible to serve as the reference for the backend kernels.
pub fn naive_correlate(
    src: &Array3<f32>,
    mask: &Array2<f32>,
) -> Array3<f32> {
    let (channels, height, width) = src.dim();
    let (mh, mw) = mask.dim();
    let ry = (mh / 2) as isize;
    let rx = (mw / 2) as isize;

    let mut out = Array3::<f32>::zeros((channels, height, width));
    for ch in 0..channels {
        for row in 0..height {
            for col in 0..width {
                let mut sum = 0.0f32;
                for i in 0..mh {
                    for j in 0..mw {
                        let r = row as isize + i as isize - ry;
                        let c = col as isize + j as isize - rx;
                        if r >= 0 && r < height as isize && c >= 0 && c < width as isize {
                            sum += src[[ch, r as usize, c as usize]] * mask[[i, j]];
                        }
                    }
                }
                out[[ch, row, col]] = sum;
            }
        }
    }
    out
}

/// Scalar Richardson-Lucy reference following the same update order as the
/// iteration controller.
pub fn naive_richardson_lucy(
    image: &Image,
    psf: &Psf,
    iterations: usize,
    division: DivisionMode,
    clip: bool,
) -> Image {
    let observed = &image.data;
    let flipped = psf.flipped();
    let mut estimate = observed.clone();

    for _ in 0..iterations {
        let predicted = naive_correlate(&estimate, psf.data());

        let mut ratio = Array3::<f32>::zeros(observed.dim());
        for (out, (&n, &d)) in ratio
            .iter_mut()
            .zip(observed.iter().zip(predicted.iter()))
        {
            *out = match division {
                DivisionMode::Stabilized { epsilon } => n / (d + epsilon),
                DivisionMode::Thresholded { threshold } => {
                    if d < threshold {
                        0.0
                    } else {
                        n / d
                    }
                }
            };
        }

        let correction = naive_correlate(&ratio, flipped.data());
        for (e, &c) in estimate.iter_mut().zip(correction.iter()) {
            *e *= c;
        }

        if clip {
            estimate.mapv_inplace(|v| v.clamp(-1.0, 1.0));
        }
    }

    Image::new(estimate).expect("reference estimate keeps the input shape")
}

/// Largest per-element absolute difference between two images.
pub fn max_abs_diff(a: &Image, b: &Image) -> f32 {
    a.data
        .iter()
        .zip(b.data.iter())
        .map(|(&x, &y)| (x - y).abs())
        .fold(0.0f32, f32::max)
}
