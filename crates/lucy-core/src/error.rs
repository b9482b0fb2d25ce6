use thiserror::Error;

#[derive(Error, Debug)]
pub enum LucyError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image format error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Image required to have 2 or 3 dimensions, got {0}")]
    InvalidDimensionality(usize),

    #[error("Invalid image dimensions: {channels}x{height}x{width}")]
    InvalidDimensions {
        channels: usize,
        height: usize,
        width: usize,
    },

    #[error("PSF dimensions must be odd: {height}x{width}")]
    EvenPsfDimensions { height: usize, width: usize },

    #[error("PSF {psf_height}x{psf_width} is larger than the input image {height}x{width}")]
    PsfLargerThanImage {
        psf_height: usize,
        psf_width: usize,
        height: usize,
        width: usize,
    },

    #[error("Channel batch size must be at least 1")]
    InvalidChannelBatch,

    #[error("Unsupported channel count for this operation: {0}")]
    UnsupportedChannelCount(usize),

    #[error("Output shape {actual:?} does not match image shape {expected:?}")]
    OutputShapeMismatch {
        expected: (usize, usize, usize),
        actual: (usize, usize, usize),
    },

    #[error("Out of device memory: {0}")]
    OutOfDeviceMemory(String),

    #[error("Device transfer failed: {0}")]
    DeviceTransferFailure(String),

    #[error("Kernel execution failed: {0}")]
    KernelExecutionFailure(String),

    #[error("GPU error: {0}")]
    Gpu(String),
}

pub type Result<T> = std::result::Result<T, LucyError>;
