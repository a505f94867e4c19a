use crate::{
    config::ModelConfig,
    model_service::{InferenceError, ModelOutput, ModelService, RawBox},
};
use image::imageops::FilterType;
use ndarray::{Array, ArrayD, Axis, Ix3, Ix4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelLoadError {
    #[error("Model file not found: {0:?}")]
    NotFound(PathBuf),
    #[error("Failed to build ONNX session: {0}")]
    Session(#[from] ort::Error),
}

fn intersection(box1: &RawBox, box2: &RawBox) -> f32 {
    let width = (box1.x2.min(box2.x2) - box1.x1.max(box2.x1)).max(0.);
    let height = (box1.y2.min(box2.y2) - box1.y1.max(box2.y1)).max(0.);
    width * height
}

fn union(box1: &RawBox, box2: &RawBox) -> f32 {
    ((box1.x2 - box1.x1) * (box1.y2 - box1.y1)) + ((box2.x2 - box2.x1) * (box2.y2 - box2.y1))
        - intersection(box1, box2)
}

fn load_image(
    path: &Path,
    input_size: u32,
) -> Result<(Array<f32, Ix4>, u32, u32), InferenceError> {
    let original_img = image::ImageReader::open(path)?
        .with_guessed_format()?
        .decode()?;

    let (img_width, img_height) = (original_img.width(), original_img.height());
    let img = original_img
        .resize_exact(input_size, input_size, FilterType::CatmullRom)
        .to_rgb8();

    let side = input_size as usize;
    let mut input = Array::zeros((1, 3, side, side));
    for (x, y, pixel) in img.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        let [r, g, b] = pixel.0;
        input[[0, 0, y, x]] = (r as f32) / 255.;
        input[[0, 1, y, x]] = (g as f32) / 255.;
        input[[0, 2, y, x]] = (b as f32) / 255.;
    }

    Ok((input, img_height, img_width))
}

/// Keeps the most confident box of every overlapping cluster.
/// The result is ordered by descending confidence.
fn non_max_suppression(mut boxes: Vec<RawBox>, iou_threshold: f32) -> Vec<RawBox> {
    boxes.sort_by(|box1, box2| box2.confidence.total_cmp(&box1.confidence));
    let mut result = Vec::new();

    while !boxes.is_empty() {
        let best = boxes.remove(0);
        boxes.retain(|candidate| {
            intersection(&best, candidate) / union(&best, candidate) < iou_threshold
        });
        result.push(best);
    }

    result
}

/// Decodes a YOLOv8 detection head of shape `[1, 4 + classes, anchors]`
/// into boxes in source-image pixel space.
fn postprocess(
    outputs: &ArrayD<f32>,
    img_width: u32,
    img_height: u32,
    input_size: u32,
    min_probability: f32,
    iou_threshold: f32,
) -> Result<Vec<RawBox>, InferenceError> {
    let outputs = outputs
        .view()
        .into_dimensionality::<Ix3>()
        .map_err(|e| InferenceError::MalformedOutput(e.to_string()))?;
    if outputs.shape()[0] != 1 || outputs.shape()[1] < 5 {
        return Err(InferenceError::MalformedOutput(format!(
            "expected [1, 4 + classes, anchors], got {:?}",
            outputs.shape()
        )));
    }

    let scale_x = img_width as f32 / input_size as f32;
    let scale_y = img_height as f32 / input_size as f32;

    let mut boxes = Vec::new();
    for candidate in outputs.index_axis(Axis(0), 0).axis_iter(Axis(1)) {
        let confidence = candidate
            .iter()
            .skip(4)
            .copied()
            .fold(f32::NEG_INFINITY, f32::max);

        if confidence < min_probability {
            continue;
        }

        let xc = candidate[0usize] * scale_x;
        let yc = candidate[1usize] * scale_y;
        let w = candidate[2usize] * scale_x;
        let h = candidate[3usize] * scale_y;

        boxes.push(RawBox {
            x1: xc - w / 2.,
            y1: yc - h / 2.,
            x2: xc + w / 2.,
            y2: yc + h / 2.,
            confidence,
        });
    }

    Ok(non_max_suppression(boxes, iou_threshold))
}

#[derive(Clone)]
pub struct OrtModelService {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    min_probability: f32,
    iou_threshold: f32,
    input_size: u32,
}

impl OrtModelService {
    pub fn new(model_config: &ModelConfig) -> Result<Self, ModelLoadError> {
        let model_path = model_config.get_path();
        if !model_path.exists() {
            return Err(ModelLoadError::NotFound(model_path));
        }

        let num_instances = model_config.num_instances.max(1);
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(&model_path)?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        tracing::info!("Created {} ONNX sessions from {:?}", num_instances, model_path);

        Ok(Self {
            counter: Arc::new(AtomicUsize::new(0)),
            sessions: Arc::new(sessions),
            min_probability: model_config.min_probability,
            iou_threshold: model_config.iou_threshold,
            input_size: model_config.input_size,
        })
    }

    pub fn run_inference(&self, input: &Array<f32, Ix4>) -> Result<ArrayD<f32>, InferenceError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let session_arc = &self.sessions[index];
        let mut session = session_arc
            .lock()
            .map_err(|e| InferenceError::Runtime(format!("session mutex poisoned: {}", e)))?;

        tracing::debug!("Handling request with session {}", index);
        let owned_buffer;
        let input_view = if input.view().is_standard_layout() {
            input.view()
        } else {
            owned_buffer = input.as_standard_layout().into_owned();
            owned_buffer.view()
        };

        let tensor_ref = TensorRef::from_array_view(input_view)
            .map_err(|e| InferenceError::Runtime(format!("failed to build tensor: {}", e)))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| InferenceError::Runtime(e.to_string()))?;

        let (shape, data) = outputs["output0"]
            .try_extract_tensor::<f32>()
            .map_err(|e| {
                InferenceError::MalformedOutput(format!("failed to extract tensor: {}", e))
            })?;

        let array = ArrayD::from_shape_vec(shape.to_ixdyn(), data.to_vec())
            .map_err(|e| InferenceError::MalformedOutput(format!("invalid tensor shape: {}", e)))?;

        Ok(array)
    }
}

impl ModelService for OrtModelService {
    fn detect(&self, image_path: &Path) -> Result<ModelOutput, InferenceError> {
        let (input, img_height, img_width) = load_image(image_path, self.input_size)?;
        let outputs = self.run_inference(&input)?;

        let boxes = postprocess(
            &outputs,
            img_width,
            img_height,
            self.input_size,
            self.min_probability,
            self.iou_threshold,
        )?;

        Ok(ModelOutput { boxes: Some(boxes) })
    }
}
