use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("failed to open image: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to read image: {0}")]
    ImageDecode(#[from] image::ImageError),
    #[error("{0}")]
    Runtime(String),
    #[error("unexpected model output: {0}")]
    MalformedOutput(String),
}

/// One box as emitted by the detector, in source-image pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

/// Detector output for a single image. `boxes` is `None` when the
/// detector produced no boxes container at all.
#[derive(Debug, Clone, Default)]
pub struct ModelOutput {
    pub boxes: Option<Vec<RawBox>>,
}

pub trait ModelService: Send + Sync + 'static {
    /// Runs the detector on an image stored on disk. Blocking.
    fn detect(&self, image_path: &Path) -> Result<ModelOutput, InferenceError>;
}
