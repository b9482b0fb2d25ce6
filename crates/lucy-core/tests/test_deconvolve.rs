mod common;

use std::sync::atomic::{AtomicUsize, Ordering};

use ndarray::{Array2, Array3};

use lucy_core::compute::cpu::CpuBackend;
use lucy_core::compute::{BatchShape, ComputeBackend, DeviceBuffer};
use lucy_core::deconv::{deconvolve, deconvolve_into, DeconvOptions, DivisionMode};
use lucy_core::error::LucyError;
use lucy_core::image::Image;
use lucy_core::psf::Psf;

use common::{delta_psf, flat_image, max_abs_diff, naive_richardson_lucy, ramp_image};

// ---------------------------------------------------------------------------
// Test doubles: a backend that counts device allocations, and one that fails
// inside the iteration loop
// ---------------------------------------------------------------------------

/// Delegates everything to the CPU backend while counting allocations, so
/// tests can assert that rejected requests never touch the device.
struct CountingBackend {
    inner: CpuBackend,
    allocations: AtomicUsize,
}

impl CountingBackend {
    fn new() -> Self {
        Self {
            inner: CpuBackend,
            allocations: AtomicUsize::new(0),
        }
    }

    fn allocations(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }
}

impl ComputeBackend for CountingBackend {
    fn name(&self) -> &str {
        "counting"
    }

    fn is_gpu(&self) -> bool {
        false
    }

    fn alloc(&self, len: usize) -> lucy_core::error::Result<DeviceBuffer> {
        self.allocations.fetch_add(1, Ordering::SeqCst);
        self.inner.alloc(len)
    }

    fn upload(&self, data: &[f32]) -> lucy_core::error::Result<DeviceBuffer> {
        self.allocations.fetch_add(1, Ordering::SeqCst);
        self.inner.upload(data)
    }

    fn download(&self, buf: &DeviceBuffer, out: &mut [f32]) -> lucy_core::error::Result<()> {
        self.inner.download(buf, out)
    }

    fn copy(&self, src: &DeviceBuffer, dst: &mut DeviceBuffer) -> lucy_core::error::Result<()> {
        self.inner.copy(src, dst)
    }

    fn fill(&self, buf: &mut DeviceBuffer, value: f32) -> lucy_core::error::Result<()> {
        self.inner.fill(buf, value)
    }

    fn correlate(
        &self,
        src: &DeviceBuffer,
        mask: &DeviceBuffer,
        dst: &mut DeviceBuffer,
        shape: BatchShape,
    ) -> lucy_core::error::Result<()> {
        self.inner.correlate(src, mask, dst, shape)
    }

    fn divide(
        &self,
        num: &DeviceBuffer,
        den: &DeviceBuffer,
        dst: &mut DeviceBuffer,
        epsilon: f32,
    ) -> lucy_core::error::Result<()> {
        self.inner.divide(num, den, dst, epsilon)
    }

    fn divide_filtered(
        &self,
        num: &DeviceBuffer,
        den: &DeviceBuffer,
        dst: &mut DeviceBuffer,
        threshold: f32,
    ) -> lucy_core::error::Result<()> {
        self.inner.divide_filtered(num, den, dst, threshold)
    }

    fn multiply_assign(
        &self,
        dst: &mut DeviceBuffer,
        rhs: &DeviceBuffer,
    ) -> lucy_core::error::Result<()> {
        self.inner.multiply_assign(dst, rhs)
    }

    fn clip(&self, buf: &mut DeviceBuffer, lower: f32, upper: f32) -> lucy_core::error::Result<()> {
        self.inner.clip(buf, lower, upper)
    }
}

/// Fails every correlation, simulating a kernel execution error mid-batch.
struct FailingBackend {
    inner: CpuBackend,
}

impl ComputeBackend for FailingBackend {
    fn name(&self) -> &str {
        "failing"
    }

    fn is_gpu(&self) -> bool {
        false
    }

    fn alloc(&self, len: usize) -> lucy_core::error::Result<DeviceBuffer> {
        self.inner.alloc(len)
    }

    fn upload(&self, data: &[f32]) -> lucy_core::error::Result<DeviceBuffer> {
        self.inner.upload(data)
    }

    fn download(&self, buf: &DeviceBuffer, out: &mut [f32]) -> lucy_core::error::Result<()> {
        self.inner.download(buf, out)
    }

    fn copy(&self, src: &DeviceBuffer, dst: &mut DeviceBuffer) -> lucy_core::error::Result<()> {
        self.inner.copy(src, dst)
    }

    fn fill(&self, buf: &mut DeviceBuffer, value: f32) -> lucy_core::error::Result<()> {
        self.inner.fill(buf, value)
    }

    fn correlate(
        &self,
        _src: &DeviceBuffer,
        _mask: &DeviceBuffer,
        _dst: &mut DeviceBuffer,
        _shape: BatchShape,
    ) -> lucy_core::error::Result<()> {
        Err(LucyError::KernelExecutionFailure("injected failure".into()))
    }

    fn divide(
        &self,
        num: &DeviceBuffer,
        den: &DeviceBuffer,
        dst: &mut DeviceBuffer,
        epsilon: f32,
    ) -> lucy_core::error::Result<()> {
        self.inner.divide(num, den, dst, epsilon)
    }

    fn divide_filtered(
        &self,
        num: &DeviceBuffer,
        den: &DeviceBuffer,
        dst: &mut DeviceBuffer,
        threshold: f32,
    ) -> lucy_core::error::Result<()> {
        self.inner.divide_filtered(num, den, dst, threshold)
    }

    fn multiply_assign(
        &self,
        dst: &mut DeviceBuffer,
        rhs: &DeviceBuffer,
    ) -> lucy_core::error::Result<()> {
        self.inner.multiply_assign(dst, rhs)
    }

    fn clip(&self, buf: &mut DeviceBuffer, lower: f32, upper: f32) -> lucy_core::error::Result<()> {
        self.inner.clip(buf, lower, upper)
    }
}

fn options(iterations: usize) -> DeconvOptions {
    DeconvOptions {
        iterations,
        ..DeconvOptions::default()
    }
}

// ---------------------------------------------------------------------------
// Zero iterations is identity
// ---------------------------------------------------------------------------

#[test]
fn zero_iterations_returns_the_input() {
    let backend = CpuBackend;
    let original = ramp_image(2, 16, 12);
    let mut image = original.clone();
    let psf = Psf::gaussian(5, 5, 1.5).unwrap();

    deconvolve(&backend, &mut image, &psf, &options(0)).expect("deconvolve");

    assert_eq!(
        max_abs_diff(&image, &original),
        0.0,
        "0-iteration deconvolution must return the input unchanged"
    );
}

#[test]
fn zero_iterations_into_output_copies_the_input() {
    let backend = CpuBackend;
    let image = ramp_image(3, 10, 14);
    let mut output = image.zeros_like();
    let psf = Psf::gaussian(3, 3, 1.0).unwrap();

    deconvolve_into(&backend, &image, &psf, &options(0), &mut output).expect("deconvolve_into");

    assert_eq!(max_abs_diff(&image, &output), 0.0);
}

// ---------------------------------------------------------------------------
// Clip bound
// ---------------------------------------------------------------------------

#[test]
fn unclipped_estimate_can_leave_the_unit_interval() {
    // A constant 2.0 image under a center-delta PSF is a fixed point of the
    // update (up to epsilon), so the estimate stays at 2.0 — outside [-1, 1].
    let backend = CpuBackend;
    let mut image = flat_image(1, 8, 8, 2.0);
    let psf = delta_psf(3, 3, (1, 1));

    let opts = DeconvOptions {
        iterations: 3,
        clip: false,
        ..DeconvOptions::default()
    };
    deconvolve(&backend, &mut image, &psf, &opts).expect("deconvolve");

    assert!(
        image.data.iter().any(|&v| v > 1.0),
        "without clipping the estimate should stay near 2.0"
    );
}

#[test]
fn clipping_bounds_every_element() {
    let backend = CpuBackend;
    let mut image = flat_image(1, 8, 8, 2.0);
    let psf = delta_psf(3, 3, (1, 1));

    let opts = DeconvOptions {
        iterations: 3,
        clip: true,
        ..DeconvOptions::default()
    };
    deconvolve(&backend, &mut image, &psf, &opts).expect("deconvolve");

    assert!(
        image.data.iter().all(|&v| (-1.0..=1.0).contains(&v)),
        "clipping must keep every element in [-1, 1]"
    );
}

// ---------------------------------------------------------------------------
// Division stability
// ---------------------------------------------------------------------------

#[test]
fn zero_predicted_blur_stays_finite_with_epsilon_division() {
    // An all-zero PSF drives the predicted blur to exactly zero everywhere;
    // epsilon division must keep the ratio finite.
    let backend = CpuBackend;
    let mut image = flat_image(1, 8, 8, 0.5);
    let psf = Psf::new(Array2::zeros((3, 3))).unwrap();

    deconvolve(&backend, &mut image, &psf, &options(2)).expect("deconvolve");

    assert!(
        image.data.iter().all(|v| v.is_finite()),
        "epsilon-stabilized division must not produce NaN/Inf"
    );
}

#[test]
fn thresholded_division_takes_the_neutral_value() {
    // Predicted blur is zero, threshold is above it: the ratio is defined to
    // be 0, so one update drives the estimate to exactly zero.
    let backend = CpuBackend;
    let mut image = flat_image(1, 8, 8, 0.5);
    let psf = Psf::new(Array2::zeros((3, 3))).unwrap();

    let opts = DeconvOptions {
        iterations: 1,
        division: DivisionMode::Thresholded { threshold: 0.25 },
        ..DeconvOptions::default()
    };
    deconvolve(&backend, &mut image, &psf, &opts).expect("deconvolve");

    assert!(
        image.data.iter().all(|&v| v == 0.0),
        "sub-threshold ratios must neutralize to 0, not blow up"
    );
}

// ---------------------------------------------------------------------------
// Batching invariance
// ---------------------------------------------------------------------------

#[test]
fn channel_batch_size_does_not_change_the_result() {
    let backend = CpuBackend;
    let original = ramp_image(3, 24, 20);
    let psf = Psf::gaussian(5, 3, 1.2).unwrap();

    let mut per_channel = original.clone();
    let mut all_at_once = original.clone();

    let mut opts = options(5);
    opts.channel_batch = 1;
    deconvolve(&backend, &mut per_channel, &psf, &opts).expect("batch=1");
    opts.channel_batch = 3;
    deconvolve(&backend, &mut all_at_once, &psf, &opts).expect("batch=3");

    let diff = max_abs_diff(&per_channel, &all_at_once);
    assert!(
        diff < 1e-5,
        "channels are independent, so batching must not change results (diff={diff})"
    );
}

// ---------------------------------------------------------------------------
// Agreement with the scalar reference
// ---------------------------------------------------------------------------

#[test]
fn matches_the_naive_reference_implementation() {
    let backend = CpuBackend;
    let original = ramp_image(2, 31, 29);
    let psf = Psf::gaussian(5, 3, 1.5).unwrap();

    let division = DivisionMode::Stabilized { epsilon: 1e-12 };
    let expected = naive_richardson_lucy(&original, &psf, 5, division, true);

    let mut image = original.clone();
    let opts = DeconvOptions {
        iterations: 5,
        clip: true,
        division,
        channel_batch: 2,
    };
    deconvolve(&backend, &mut image, &psf, &opts).expect("deconvolve");

    let diff = max_abs_diff(&image, &expected);
    assert!(diff < 1e-5, "core deviates from scalar reference by {diff}");
}

#[test]
fn thresholded_mode_matches_the_naive_reference() {
    let backend = CpuBackend;
    let original = ramp_image(1, 21, 23);
    let psf = Psf::gaussian(3, 3, 1.0).unwrap();

    let division = DivisionMode::Thresholded { threshold: 1e-4 };
    let expected = naive_richardson_lucy(&original, &psf, 4, division, true);

    let mut image = original.clone();
    let opts = DeconvOptions {
        iterations: 4,
        clip: true,
        division,
        channel_batch: 1,
    };
    deconvolve(&backend, &mut image, &psf, &opts).expect("deconvolve");

    let diff = max_abs_diff(&image, &expected);
    assert!(diff < 1e-5, "thresholded mode deviates by {diff}");
}

// ---------------------------------------------------------------------------
// Sharpening effect on a synthetically blurred edge
// ---------------------------------------------------------------------------

#[test]
fn recovers_sharpness_from_a_blurred_square() {
    let backend = CpuBackend;
    let size = 48;
    let mut sharp = Array3::<f32>::zeros((1, size, size));
    for r in 14..34 {
        for c in 14..34 {
            sharp[[0, r, c]] = 0.8;
        }
    }

    let psf = Psf::gaussian(9, 9, 2.0).unwrap();
    let blurred = common::naive_correlate(&sharp, psf.data());
    let blurred_grad = (blurred[[0, 24, 15]] - blurred[[0, 24, 13]]).abs();

    let mut image = Image::new(blurred).unwrap();
    deconvolve(&backend, &mut image, &psf, &options(15)).expect("deconvolve");

    let restored_grad = (image.data[[0, 24, 15]] - image.data[[0, 24, 13]]).abs();
    assert!(
        restored_grad > blurred_grad,
        "deconvolution should sharpen edges: {restored_grad} vs {blurred_grad}"
    );
}

// ---------------------------------------------------------------------------
// In-place and into-output agree
// ---------------------------------------------------------------------------

#[test]
fn in_place_and_output_buffer_results_agree() {
    let backend = CpuBackend;
    let original = ramp_image(2, 18, 15);
    let psf = Psf::gaussian(3, 5, 1.1).unwrap();

    let mut in_place = original.clone();
    deconvolve(&backend, &mut in_place, &psf, &options(4)).expect("in place");

    let mut output = original.zeros_like();
    deconvolve_into(&backend, &original, &psf, &options(4), &mut output).expect("into output");

    assert_eq!(max_abs_diff(&in_place, &output), 0.0);
}

// ---------------------------------------------------------------------------
// Regression fixture geometry: (3, 401, 421) image, (29, 1) vertical PSF
// ---------------------------------------------------------------------------

#[test]
fn regression_geometry_is_batch_invariant() {
    let backend = CpuBackend;
    let original = ramp_image(3, 401, 421);
    let psf = Psf::gaussian(29, 1, 4.0).unwrap();

    let division = DivisionMode::Stabilized { epsilon: 1e-12 };

    let mut per_channel = original.clone();
    let opts = DeconvOptions {
        iterations: 10,
        clip: true,
        division,
        channel_batch: 1,
    };
    deconvolve(&backend, &mut per_channel, &psf, &opts).expect("batch=1");

    let mut all_at_once = original.clone();
    let opts = DeconvOptions {
        iterations: 10,
        clip: true,
        division,
        channel_batch: 3,
    };
    deconvolve(&backend, &mut all_at_once, &psf, &opts).expect("batch=3");

    let diff = max_abs_diff(&per_channel, &all_at_once);
    assert!(diff < 1e-5, "fixture geometry batch invariance: diff={diff}");
    assert!(per_channel.data.iter().all(|&v| (-1.0..=1.0).contains(&v)));

    let reference = naive_richardson_lucy(&original, &psf, 10, division, true);
    let diff = max_abs_diff(&per_channel, &reference);
    assert!(diff < 1e-5, "fixture geometry reference restore: diff={diff}");
}

// ---------------------------------------------------------------------------
// Shape rejection happens before any device allocation
// ---------------------------------------------------------------------------

#[test]
fn four_dimensional_images_are_rejected() {
    let err = Image::from_shape_vec(&[2, 3, 4, 5], vec![0.0; 120]).unwrap_err();
    assert!(matches!(err, LucyError::InvalidDimensionality(4)));
}

#[test]
fn oversized_psf_is_rejected_without_allocating() {
    let backend = CountingBackend::new();
    let mut image = flat_image(1, 8, 8, 0.5);
    let psf = Psf::gaussian(9, 9, 2.0).unwrap();

    let err = deconvolve(&backend, &mut image, &psf, &options(3)).unwrap_err();
    assert!(matches!(err, LucyError::PsfLargerThanImage { .. }));
    assert_eq!(backend.allocations(), 0, "no device work before validation");
}

#[test]
fn zero_channel_batch_is_rejected_without_allocating() {
    let backend = CountingBackend::new();
    let mut image = flat_image(1, 8, 8, 0.5);
    let psf = Psf::gaussian(3, 3, 1.0).unwrap();

    let opts = DeconvOptions {
        channel_batch: 0,
        ..options(3)
    };
    let err = deconvolve(&backend, &mut image, &psf, &opts).unwrap_err();
    assert!(matches!(err, LucyError::InvalidChannelBatch));
    assert_eq!(backend.allocations(), 0);
}

#[test]
fn mismatched_output_shape_is_rejected_without_allocating() {
    let backend = CountingBackend::new();
    let image = flat_image(2, 8, 8, 0.5);
    let mut output = flat_image(2, 8, 9, 0.0);
    let psf = Psf::gaussian(3, 3, 1.0).unwrap();

    let err = deconvolve_into(&backend, &image, &psf, &options(3), &mut output).unwrap_err();
    assert!(matches!(err, LucyError::OutputShapeMismatch { .. }));
    assert_eq!(backend.allocations(), 0);
}

// ---------------------------------------------------------------------------
// Kernel failures abort the request with the originating error
// ---------------------------------------------------------------------------

#[test]
fn kernel_failure_propagates_from_the_iteration_loop() {
    let backend = FailingBackend { inner: CpuBackend };
    let mut image = flat_image(2, 8, 8, 0.5);
    let psf = Psf::gaussian(3, 3, 1.0).unwrap();

    let err = deconvolve(&backend, &mut image, &psf, &options(3)).unwrap_err();
    assert!(matches!(err, LucyError::KernelExecutionFailure(_)));
}

#[test]
fn zero_iterations_never_touches_the_failing_kernel() {
    // With no iterations the failing correlate is never reached, so the
    // request degenerates to a device round-trip of the input.
    let backend = FailingBackend { inner: CpuBackend };
    let original = ramp_image(1, 6, 6);
    let mut image = original.clone();
    let psf = Psf::gaussian(3, 3, 1.0).unwrap();

    deconvolve(&backend, &mut image, &psf, &options(0)).expect("no kernels should run");
    assert_eq!(max_abs_diff(&image, &original), 0.0);
}

// ---------------------------------------------------------------------------
// Options serde round-trip (TOML-loadable configs)
// ---------------------------------------------------------------------------

#[test]
fn options_serde_roundtrip() {
    let opts = DeconvOptions {
        iterations: 25,
        clip: false,
        division: DivisionMode::Thresholded { threshold: 0.01 },
        channel_batch: 4,
    };
    let json = serde_json::to_string(&opts).unwrap();
    let restored: DeconvOptions = serde_json::from_str(&json).unwrap();
    assert_eq!(format!("{opts:?}"), format!("{restored:?}"));
}

#[test]
fn options_defaults_fill_missing_fields() {
    let restored: DeconvOptions = serde_json::from_str(r#"{"iterations": 7}"#).unwrap();
    assert_eq!(restored.iterations, 7);
    assert!(restored.clip);
    assert_eq!(restored.channel_batch, 1);
    assert!(matches!(
        restored.division,
        DivisionMode::Stabilized { .. }
    ));
}

// ---------------------------------------------------------------------------
// GPU parity (requires the `gpu` feature and an adapter at runtime)
// ---------------------------------------------------------------------------

#[cfg(feature = "gpu")]
#[test]
fn gpu_deconvolution_matches_cpu() {
    use lucy_core::compute::{create_backend, DevicePreference};

    let gpu = create_backend(&DevicePreference::Gpu);
    if !gpu.is_gpu() {
        return; // skip if no GPU available
    }

    let original = ramp_image(2, 32, 40);
    let psf = Psf::gaussian(5, 5, 1.5).unwrap();

    let mut cpu_result = original.clone();
    deconvolve(&CpuBackend, &mut cpu_result, &psf, &options(5)).expect("cpu");

    let mut gpu_result = original.clone();
    deconvolve(gpu.as_ref(), &mut gpu_result, &psf, &options(5)).expect("gpu");

    let diff = max_abs_diff(&cpu_result, &gpu_result);
    assert!(diff < 1e-4, "GPU should match CPU within f32 noise: {diff}");
}

#[cfg(feature = "gpu")]
#[test]
fn gpu_correlate_matches_naive_reference() {
    use lucy_core::compute::{create_backend, DevicePreference};

    let gpu = create_backend(&DevicePreference::Gpu);
    if !gpu.is_gpu() {
        return;
    }

    let image = ramp_image(3, 17, 21);
    let mask = Array2::from_shape_fn((3, 5), |(i, j)| (1 + i * 5 + j) as f32 * 0.02);
    let shape = BatchShape {
        channels: 3,
        height: 17,
        width: 21,
        psf_height: 3,
        psf_width: 5,
    };

    let src = gpu.upload(image.data.as_slice().unwrap()).expect("upload");
    let mask_buf = gpu.upload(mask.as_slice().unwrap()).expect("upload mask");
    let mut dst = gpu.alloc(shape.pixel_count()).expect("alloc");
    gpu.correlate(&src, &mask_buf, &mut dst, shape).expect("correlate");

    let mut got = vec![0.0; shape.pixel_count()];
    gpu.download(&dst, &mut got).expect("download");

    let expected = common::naive_correlate(&image.data, &mask);
    for (&e, &g) in expected.iter().zip(got.iter()) {
        assert!((e - g).abs() < 1e-4, "GPU correlate diverged: {e} vs {g}");
    }
}
