/// Minimum pixel count (channels*h*w) to use row-level Rayon parallelism
/// in the CPU compute backend.
pub const PARALLEL_PIXEL_THRESHOLD: usize = 65_536;

/// Default epsilon added to the predicted blur before division. Negligible
/// against normalized pixel magnitudes, large enough to keep exact-zero
/// denominators finite.
pub const DEFAULT_EPSILON: f32 = 1e-12;

/// Lower clamp bound applied to the estimate when clipping is enabled.
pub const CLIP_LOWER: f32 = -1.0;

/// Upper clamp bound applied to the estimate when clipping is enabled.
pub const CLIP_UPPER: f32 = 1.0;

/// Default number of channels processed per device working set.
pub const DEFAULT_CHANNEL_BATCH: usize = 1;
