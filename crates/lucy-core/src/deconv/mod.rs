pub mod batch;
pub mod iterate;
pub mod options;
pub mod working_set;

pub use options::{DeconvOptions, DivisionMode};

use ndarray::s;
use tracing::{debug, info};

use crate::compute::{BatchShape, ComputeBackend};
use crate::error::{LucyError, Result};
use crate::image::Image;
use crate::psf::Psf;

use batch::ChannelBatches;
use working_set::{PsfBuffers, WorkingSet};

/// Check the request against the image geometry before any device work.
/// PSF oddness is already a construction invariant of [`Psf`].
fn validate(image: &Image, psf: &Psf, options: &DeconvOptions) -> Result<()> {
    let (_, height, width) = image.dim();
    let (psf_height, psf_width) = psf.dim();
    if psf_height > height || psf_width > width {
        return Err(LucyError::PsfLargerThanImage {
            psf_height,
            psf_width,
            height,
            width,
        });
    }
    if options.channel_batch == 0 {
        return Err(LucyError::InvalidChannelBatch);
    }
    Ok(())
}

/// Richardson-Lucy deconvolution, overwriting `image` in place.
///
/// Channel batches are processed sequentially: acquire a working set, run
/// the iteration loop, transfer the restored slice back, release. The first
/// failing batch aborts the whole request with the originating error; no
/// partially-deconvolved result is reported as success, though earlier
/// batches may already have been written back.
pub fn deconvolve(
    backend: &dyn ComputeBackend,
    image: &mut Image,
    psf: &Psf,
    options: &DeconvOptions,
) -> Result<()> {
    validate(image, psf, options)?;

    let (channels, height, width) = image.dim();
    let (psf_height, psf_width) = psf.dim();
    let batches = ChannelBatches::new(channels, options.channel_batch);

    info!(
        "deconvolving {channels}x{height}x{width} with {psf_height}x{psf_width} PSF: \
         {} iterations, {} batches on {}",
        options.iterations,
        batches.batch_count(),
        backend.name()
    );

    let psf_bufs = PsfBuffers::upload(backend, psf)?;

    for range in batches {
        let shape = BatchShape {
            channels: range.len(),
            height,
            width,
            psf_height,
            psf_width,
        };

        let mut ws = {
            let view = image.data.slice(s![range.clone(), .., ..]);
            let slice = view.as_slice().expect("image data is standard layout");
            WorkingSet::acquire(backend, slice, shape)?
        };

        iterate::run(
            &mut ws,
            &psf_bufs,
            options.iterations,
            options.division,
            options.clip,
        )?;

        let mut view = image.data.slice_mut(s![range.clone(), .., ..]);
        let slice = view
            .as_slice_mut()
            .expect("image data is standard layout");
        ws.transfer_out(slice)?;

        debug!("batch {:?} done", range);
    }

    Ok(())
}

/// Richardson-Lucy deconvolution into a caller-owned output image of the
/// same shape, leaving the input untouched.
pub fn deconvolve_into(
    backend: &dyn ComputeBackend,
    image: &Image,
    psf: &Psf,
    options: &DeconvOptions,
    output: &mut Image,
) -> Result<()> {
    if output.dim() != image.dim() {
        return Err(LucyError::OutputShapeMismatch {
            expected: image.dim(),
            actual: output.dim(),
        });
    }
    output.data.assign(&image.data);
    deconvolve(backend, output, psf, options)
}
