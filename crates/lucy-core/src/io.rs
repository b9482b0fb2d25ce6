use std::path::Path;

use image::{GrayImage, ImageFormat, Luma, Rgb};
use ndarray::{Array2, Array3};

use crate::error::{LucyError, Result};
use crate::image::Image;

/// Load an image file. Color sources become a 3-channel image, grayscale
/// sources a single-channel one; pixel values are normalized to [0, 1].
pub fn load_image(path: &Path) -> Result<Image> {
    let img = image::open(path)?;

    if img.color().has_color() {
        let rgb = img.to_rgb16();
        let (w, h) = rgb.dimensions();
        let mut data = Array3::<f32>::zeros((3, h as usize, w as usize));

        for row in 0..h as usize {
            for col in 0..w as usize {
                let pixel = rgb.get_pixel(col as u32, row as u32);
                for ch in 0..3 {
                    data[[ch, row, col]] = pixel.0[ch] as f32 / 65535.0;
                }
            }
        }

        Image::new(data)
    } else {
        let gray = img.to_luma16();
        let (w, h) = gray.dimensions();
        let mut data = Array2::<f32>::zeros((h as usize, w as usize));

        for row in 0..h as usize {
            for col in 0..w as usize {
                let pixel = gray.get_pixel(col as u32, row as u32);
                data[[row, col]] = pixel.0[0] as f32 / 65535.0;
            }
        }

        Image::from_gray(data)
    }
}

/// Save a single-channel image as 16-bit grayscale TIFF.
pub fn save_tiff(image: &Image, path: &Path) -> Result<()> {
    expect_channels(image, 1)?;
    let h = image.height();
    let w = image.width();

    let mut pixels: Vec<u16> = Vec::with_capacity(h * w);
    for row in 0..h {
        for col in 0..w {
            let val = (image.data[[0, row, col]].clamp(0.0, 1.0) * 65535.0) as u16;
            pixels.push(val);
        }
    }

    let img = image::ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(w as u32, h as u32, pixels)
        .expect("buffer size matches dimensions");
    img.save(path)?;
    Ok(())
}

/// Save a single-channel image as 8-bit grayscale PNG.
pub fn save_png(image: &Image, path: &Path) -> Result<()> {
    expect_channels(image, 1)?;
    let h = image.height();
    let w = image.width();

    let mut img = GrayImage::new(w as u32, h as u32);
    for row in 0..h {
        for col in 0..w {
            let val = (image.data[[0, row, col]].clamp(0.0, 1.0) * 255.0) as u8;
            img.put_pixel(col as u32, row as u32, Luma([val]));
        }
    }

    img.save_with_format(path, ImageFormat::Png)?;
    Ok(())
}

/// Save a 3-channel image as 16-bit RGB TIFF.
pub fn save_color_tiff(image: &Image, path: &Path) -> Result<()> {
    expect_channels(image, 3)?;
    let h = image.height();
    let w = image.width();

    let mut pixels: Vec<u16> = Vec::with_capacity(h * w * 3);
    for row in 0..h {
        for col in 0..w {
            for ch in 0..3 {
                let val = (image.data[[ch, row, col]].clamp(0.0, 1.0) * 65535.0) as u16;
                pixels.push(val);
            }
        }
    }

    let img = image::ImageBuffer::<Rgb<u16>, Vec<u16>>::from_raw(w as u32, h as u32, pixels)
        .expect("buffer size matches dimensions");
    img.save(path)?;
    Ok(())
}

/// Save a 3-channel image as 8-bit RGB PNG.
pub fn save_color_png(image: &Image, path: &Path) -> Result<()> {
    expect_channels(image, 3)?;
    let h = image.height();
    let w = image.width();

    let mut img = image::RgbImage::new(w as u32, h as u32);
    for row in 0..h {
        for col in 0..w {
            let r = (image.data[[0, row, col]].clamp(0.0, 1.0) * 255.0) as u8;
            let g = (image.data[[1, row, col]].clamp(0.0, 1.0) * 255.0) as u8;
            let b = (image.data[[2, row, col]].clamp(0.0, 1.0) * 255.0) as u8;
            img.put_pixel(col as u32, row as u32, Rgb([r, g, b]));
        }
    }

    img.save_with_format(path, ImageFormat::Png)?;
    Ok(())
}

/// Save an image, choosing the format from the file extension and the
/// encoder from the channel count.
pub fn save_image(image: &Image, path: &Path) -> Result<()> {
    let color = match image.channels() {
        1 => false,
        3 => true,
        other => return Err(LucyError::UnsupportedChannelCount(other)),
    };

    match (path.extension().and_then(|e| e.to_str()), color) {
        (Some("png"), false) => save_png(image, path),
        (Some("png"), true) => save_color_png(image, path),
        (_, false) => save_tiff(image, path),
        (_, true) => save_color_tiff(image, path),
    }
}

fn expect_channels(image: &Image, channels: usize) -> Result<()> {
    if image.channels() != channels {
        return Err(LucyError::UnsupportedChannelCount(image.channels()));
    }
    Ok(())
}
