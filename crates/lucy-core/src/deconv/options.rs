use serde::{Deserialize, Serialize};

use crate::consts::{DEFAULT_CHANNEL_BATCH, DEFAULT_EPSILON};

/// How the observed/predicted ratio is stabilized against small
/// denominators. The two strategies are mutually exclusive per iteration,
/// so they are one tagged choice rather than a flag plus a float.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum DivisionMode {
    /// `ratio = observed / (predicted + epsilon)`.
    Stabilized { epsilon: f32 },
    /// Wherever `predicted < threshold`, the ratio is forced to 0 instead of
    /// amplifying noise from near-zero-confidence pixels.
    Thresholded { threshold: f32 },
}

impl Default for DivisionMode {
    fn default() -> Self {
        Self::Stabilized {
            epsilon: DEFAULT_EPSILON,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeconvOptions {
    /// Number of Richardson-Lucy update steps. Zero returns the input copy.
    pub iterations: usize,
    /// Clamp the estimate into [-1, 1] after every iteration.
    #[serde(default = "default_clip")]
    pub clip: bool,
    #[serde(default)]
    pub division: DivisionMode,
    /// Channels processed per device working set. Bounds peak device memory
    /// at O(channel_batch * height * width).
    #[serde(default = "default_channel_batch")]
    pub channel_batch: usize,
}

impl Default for DeconvOptions {
    fn default() -> Self {
        Self {
            iterations: 10,
            clip: true,
            division: DivisionMode::default(),
            channel_batch: DEFAULT_CHANNEL_BATCH,
        }
    }
}

fn default_clip() -> bool {
    true
}

fn default_channel_batch() -> usize {
    DEFAULT_CHANNEL_BATCH
}
