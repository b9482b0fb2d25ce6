use rayon::prelude::*;

use crate::consts::PARALLEL_PIXEL_THRESHOLD;
use crate::error::Result;

use super::{BatchShape, BufferInner, ComputeBackend, DeviceBuffer};

/// CPU backend using Rayon for parallelism. Serves as the reference
/// implementation of the kernel primitive contracts.
pub struct CpuBackend;

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &str {
        "CPU/Rayon"
    }

    fn is_gpu(&self) -> bool {
        false
    }

    fn alloc(&self, len: usize) -> Result<DeviceBuffer> {
        Ok(DeviceBuffer::from_vec(vec![0.0; len]))
    }

    fn upload(&self, data: &[f32]) -> Result<DeviceBuffer> {
        Ok(DeviceBuffer::from_vec(data.to_vec()))
    }

    fn download(&self, buf: &DeviceBuffer, out: &mut [f32]) -> Result<()> {
        out.copy_from_slice(cpu_slice(buf));
        Ok(())
    }

    fn copy(&self, src: &DeviceBuffer, dst: &mut DeviceBuffer) -> Result<()> {
        let src = cpu_slice(src);
        cpu_slice_mut(dst).copy_from_slice(src);
        Ok(())
    }

    fn fill(&self, buf: &mut DeviceBuffer, value: f32) -> Result<()> {
        cpu_slice_mut(buf).fill(value);
        Ok(())
    }

    fn correlate(
        &self,
        src: &DeviceBuffer,
        mask: &DeviceBuffer,
        dst: &mut DeviceBuffer,
        shape: BatchShape,
    ) -> Result<()> {
        let src = cpu_slice(src);
        let mask = cpu_slice(mask);
        let dst = cpu_slice_mut(dst);

        if shape.pixel_count() >= PARALLEL_PIXEL_THRESHOLD {
            correlate_parallel(src, mask, dst, shape);
        } else {
            correlate_sequential(src, mask, dst, shape);
        }
        Ok(())
    }

    fn divide(
        &self,
        num: &DeviceBuffer,
        den: &DeviceBuffer,
        dst: &mut DeviceBuffer,
        epsilon: f32,
    ) -> Result<()> {
        let num = cpu_slice(num);
        let den = cpu_slice(den);
        for (out, (&n, &d)) in cpu_slice_mut(dst).iter_mut().zip(num.iter().zip(den)) {
            *out = n / (d + epsilon);
        }
        Ok(())
    }

    fn divide_filtered(
        &self,
        num: &DeviceBuffer,
        den: &DeviceBuffer,
        dst: &mut DeviceBuffer,
        threshold: f32,
    ) -> Result<()> {
        let num = cpu_slice(num);
        let den = cpu_slice(den);
        for (out, (&n, &d)) in cpu_slice_mut(dst).iter_mut().zip(num.iter().zip(den)) {
            *out = if d < threshold { 0.0 } else { n / d };
        }
        Ok(())
    }

    fn multiply_assign(&self, dst: &mut DeviceBuffer, rhs: &DeviceBuffer) -> Result<()> {
        let rhs = cpu_slice(rhs);
        for (out, &r) in cpu_slice_mut(dst).iter_mut().zip(rhs) {
            *out *= r;
        }
        Ok(())
    }

    fn clip(&self, buf: &mut DeviceBuffer, lower: f32, upper: f32) -> Result<()> {
        for v in cpu_slice_mut(buf) {
            *v = v.clamp(lower, upper);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers: extract CPU slices from buffers
// ---------------------------------------------------------------------------

fn cpu_slice(buf: &DeviceBuffer) -> &[f32] {
    match &buf.inner {
        BufferInner::Cpu(data) => data,
        #[cfg(feature = "gpu")]
        _ => panic!("CpuBackend received non-CPU buffer"),
    }
}

fn cpu_slice_mut(buf: &mut DeviceBuffer) -> &mut [f32] {
    match &mut buf.inner {
        BufferInner::Cpu(data) => data,
        #[cfg(feature = "gpu")]
        _ => panic!("CpuBackend received non-CPU buffer"),
    }
}

// ---------------------------------------------------------------------------
// Center-anchored 2-D correlation, per channel, zero-padded at the edges
// ---------------------------------------------------------------------------

fn correlate_row(
    src: &[f32],
    mask: &[f32],
    out_row: &mut [f32],
    shape: BatchShape,
    channel: usize,
    row: usize,
) {
    let BatchShape {
        height,
        width,
        psf_height,
        psf_width,
        ..
    } = shape;
    let ry = (psf_height / 2) as isize;
    let rx = (psf_width / 2) as isize;
    let plane = channel * height * width;

    for (col, out) in out_row.iter_mut().enumerate() {
        let mut sum = 0.0f32;
        for i in 0..psf_height {
            let r = row as isize + i as isize - ry;
            if r < 0 || r >= height as isize {
                continue;
            }
            let src_row = plane + r as usize * width;
            let mask_row = i * psf_width;
            for j in 0..psf_width {
                let c = col as isize + j as isize - rx;
                if c < 0 || c >= width as isize {
                    continue;
                }
                sum += src[src_row + c as usize] * mask[mask_row + j];
            }
        }
        *out = sum;
    }
}

fn correlate_parallel(src: &[f32], mask: &[f32], dst: &mut [f32], shape: BatchShape) {
    let height = shape.height;
    let width = shape.width;
    dst.par_chunks_mut(width)
        .enumerate()
        .for_each(|(chunk, out_row)| {
            let channel = chunk / height;
            let row = chunk % height;
            correlate_row(src, mask, out_row, shape, channel, row);
        });
}

fn correlate_sequential(src: &[f32], mask: &[f32], dst: &mut [f32], shape: BatchShape) {
    let height = shape.height;
    let width = shape.width;
    for (chunk, out_row) in dst.chunks_mut(width).enumerate() {
        let channel = chunk / height;
        let row = chunk % height;
        correlate_row(src, mask, out_row, shape, channel, row);
    }
}
