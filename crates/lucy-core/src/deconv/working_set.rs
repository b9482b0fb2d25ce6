use crate::compute::{BatchShape, ComputeBackend, DeviceBuffer};
use crate::error::Result;
use crate::psf::Psf;

/// Device-resident PSF pair, uploaded once per request and shared read-only
/// across channel batches. No iteration step mutates either kernel, so the
/// pair stays in lockstep for the lifetime of the request.
pub struct PsfBuffers {
    /// The kernel used by the forward correlation.
    pub forward: DeviceBuffer,
    /// The 180°-rotated kernel used by the backward correlation.
    pub backward: DeviceBuffer,
}

impl PsfBuffers {
    pub fn upload(backend: &dyn ComputeBackend, psf: &Psf) -> Result<Self> {
        let flipped = psf.flipped();
        Ok(Self {
            forward: backend.upload(psf.as_slice())?,
            backward: backend.upload(flipped.as_slice())?,
        })
    }
}

/// One channel batch's device working set: the observed image slice, the
/// evolving estimate, the relative-blur ratio, and a scratch buffer for
/// correlation outputs.
///
/// Acquisition allocates and uploads everything; release is drop-based, so
/// the allocations are freed on every exit path — success, allocation
/// failure after partial acquisition, or a kernel failure mid-iteration.
pub struct WorkingSet<'a> {
    pub(crate) backend: &'a dyn ComputeBackend,
    pub(crate) shape: BatchShape,
    /// Observed image slice, read-only during iteration.
    pub(crate) image: DeviceBuffer,
    /// Current estimate, initialized as a copy of the image slice and
    /// mutated in place each iteration.
    pub(crate) estimate: DeviceBuffer,
    /// Observed-to-predicted ratio.
    pub(crate) ratio: DeviceBuffer,
    /// Correlation output buffer, reused for the forward and backward pass.
    pub(crate) scratch: DeviceBuffer,
}

impl<'a> WorkingSet<'a> {
    /// Allocate all buffers for one batch, upload the image slice, and
    /// initialize the estimate as a device-side copy of it.
    pub fn acquire(
        backend: &'a dyn ComputeBackend,
        image_slice: &[f32],
        shape: BatchShape,
    ) -> Result<Self> {
        debug_assert_eq!(image_slice.len(), shape.pixel_count());

        let image = backend.upload(image_slice)?;
        let mut estimate = backend.alloc(shape.pixel_count())?;
        backend.copy(&image, &mut estimate)?;
        let ratio = backend.alloc(shape.pixel_count())?;
        let scratch = backend.alloc(shape.pixel_count())?;

        Ok(Self {
            backend,
            shape,
            image,
            estimate,
            ratio,
            scratch,
        })
    }

    pub fn shape(&self) -> BatchShape {
        self.shape
    }

    /// Copy the final estimate back into host memory. `out` receives exactly
    /// one batch's worth of pixels, either the original image slice or a
    /// caller-owned output slice.
    pub fn transfer_out(&self, out: &mut [f32]) -> Result<()> {
        debug_assert_eq!(out.len(), self.shape.pixel_count());
        self.backend.download(&self.estimate, out)
    }
}
