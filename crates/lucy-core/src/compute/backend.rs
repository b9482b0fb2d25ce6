use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Which compute device to use for deconvolution.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DevicePreference {
    /// Use the GPU when one is available, otherwise fall back to the CPU.
    #[default]
    Auto,
    Cpu,
    Gpu,
}

/// Geometry of one channel batch as seen by the kernel primitives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchShape {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub psf_height: usize,
    pub psf_width: usize,
}

impl BatchShape {
    /// Total element count of an image-sized buffer for this batch.
    pub fn pixel_count(&self) -> usize {
        self.channels * self.height * self.width
    }
}

/// An owned, backend-tagged device allocation of f32 elements. Dropping the
/// buffer releases the allocation, so every exit path of a computation frees
/// its device memory.
pub struct DeviceBuffer {
    pub(crate) inner: BufferInner,
    len: usize,
}

pub(crate) enum BufferInner {
    Cpu(Vec<f32>),
    #[cfg(feature = "gpu")]
    Wgpu { buffer: wgpu::Buffer },
}

impl DeviceBuffer {
    /// Wrap host data as a CPU-resident buffer. Used by the CPU backend and
    /// by test doubles.
    pub fn from_vec(data: Vec<f32>) -> Self {
        let len = data.len();
        Self {
            inner: BufferInner::Cpu(data),
            len,
        }
    }

    #[cfg(feature = "gpu")]
    pub(crate) fn from_wgpu(buffer: wgpu::Buffer, len: usize) -> Self {
        Self {
            inner: BufferInner::Wgpu { buffer },
            len,
        }
    }

    /// Number of f32 elements in the buffer.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Host-side view of a CPU-resident buffer, `None` for GPU buffers.
    pub fn cpu_data(&self) -> Option<&[f32]> {
        match &self.inner {
            BufferInner::Cpu(data) => Some(data),
            #[cfg(feature = "gpu")]
            _ => None,
        }
    }

    pub fn cpu_data_mut(&mut self) -> Option<&mut [f32]> {
        match &mut self.inner {
            BufferInner::Cpu(data) => Some(data),
            #[cfg(feature = "gpu")]
            _ => None,
        }
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        #[cfg(feature = "gpu")]
        if let BufferInner::Wgpu { buffer } = &self.inner {
            buffer.destroy();
        }
    }
}

/// The seam between the deconvolution core and the device kernel internals.
///
/// Inputs are `&DeviceBuffer`, outputs `&mut DeviceBuffer`, so a kernel can
/// never alias an input with its output. Every method reports failure
/// through [`crate::error::LucyError`]; callers propagate with `?` and rely
/// on [`DeviceBuffer`]'s drop to release device memory on the way out.
pub trait ComputeBackend: Send + Sync {
    /// Human-readable device name (adapter name or "CPU/Rayon").
    fn name(&self) -> &str;

    fn is_gpu(&self) -> bool;

    /// Allocate an uninitialized buffer of `len` f32 elements.
    fn alloc(&self, len: usize) -> Result<DeviceBuffer>;

    /// Allocate and fill a buffer from host data.
    fn upload(&self, data: &[f32]) -> Result<DeviceBuffer>;

    /// Copy a buffer back to host memory. `out` must have exactly
    /// `buf.len()` elements.
    fn download(&self, buf: &DeviceBuffer, out: &mut [f32]) -> Result<()>;

    /// Device-side copy. `src` and `dst` must have equal lengths.
    fn copy(&self, src: &DeviceBuffer, dst: &mut DeviceBuffer) -> Result<()>;

    /// Set every element of `buf` to `value`.
    fn fill(&self, buf: &mut DeviceBuffer, value: f32) -> Result<()>;

    /// Per-channel 2-D correlation of `src` with `mask`, anchored at the
    /// mask's center pixel. Taps that fall outside the image read zero
    /// (zero-padding boundary policy).
    fn correlate(
        &self,
        src: &DeviceBuffer,
        mask: &DeviceBuffer,
        dst: &mut DeviceBuffer,
        shape: BatchShape,
    ) -> Result<()>;

    /// `dst = num / (den + epsilon)` elementwise.
    fn divide(
        &self,
        num: &DeviceBuffer,
        den: &DeviceBuffer,
        dst: &mut DeviceBuffer,
        epsilon: f32,
    ) -> Result<()>;

    /// Thresholded division: where `den < threshold` the quotient is forced
    /// to 0, elsewhere `dst = num / den`.
    fn divide_filtered(
        &self,
        num: &DeviceBuffer,
        den: &DeviceBuffer,
        dst: &mut DeviceBuffer,
        threshold: f32,
    ) -> Result<()>;

    /// `dst *= rhs` elementwise.
    fn multiply_assign(&self, dst: &mut DeviceBuffer, rhs: &DeviceBuffer) -> Result<()>;

    /// Clamp every element of `buf` into `[lower, upper]`.
    fn clip(&self, buf: &mut DeviceBuffer, lower: f32, upper: f32) -> Result<()>;
}

/// Create a compute backend honoring `preference`, falling back to the CPU
/// when no GPU is available (or the `gpu` feature is disabled).
pub fn create_backend(preference: &DevicePreference) -> Arc<dyn ComputeBackend> {
    match preference {
        DevicePreference::Cpu => Arc::new(super::cpu::CpuBackend),
        DevicePreference::Gpu | DevicePreference::Auto => {
            #[cfg(feature = "gpu")]
            match super::wgpu_backend::WgpuBackend::new() {
                Ok(backend) => return Arc::new(backend),
                Err(err) => {
                    tracing::warn!("GPU backend unavailable ({err}), falling back to CPU")
                }
            }
            #[cfg(not(feature = "gpu"))]
            if *preference == DevicePreference::Gpu {
                tracing::warn!("built without the `gpu` feature, falling back to CPU");
            }
            Arc::new(super::cpu::CpuBackend)
        }
    }
}
