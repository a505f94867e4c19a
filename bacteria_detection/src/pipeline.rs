use crate::{
    detection::{self, DetectionResult, ImageInfo},
    model_service::InferenceError,
    state::ModelState,
    storage::{StorageError, TransientStorage},
    validation::{FileValidator, ValidationError},
};
use bytes::Bytes;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("Model not loaded. Please check server logs.")]
    ModelUnavailable,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Invalid upload: {0}")]
    InvalidUpload(String),
    #[error("Upload too large: {0}")]
    PayloadTooLarge(String),
    #[error("Error processing image: {0}")]
    Storage(#[from] StorageError),
    #[error("Error processing image: {0}")]
    Inference(#[from] InferenceError),
    #[error("Error processing image: {0}")]
    Internal(String),
}

impl DetectError {
    /// Short label used for request metrics.
    pub fn outcome(&self) -> &'static str {
        match self {
            DetectError::ModelUnavailable => "model_unavailable",
            DetectError::Validation(_) => "invalid_file",
            DetectError::InvalidUpload(_) | DetectError::PayloadTooLarge(_) => "invalid_upload",
            DetectError::Storage(_) => "storage_error",
            DetectError::Inference(_) => "inference_error",
            DetectError::Internal(_) => "internal_error",
        }
    }
}

/// An uploaded file as received from the client.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: Option<String>,
    pub bytes: Bytes,
}

/// Runs one upload through validation, transient storage and detection.
/// The stored copy is removed before `process` returns, whatever the outcome.
#[derive(Clone)]
pub struct DetectionPipeline {
    model_state: ModelState,
    validator: FileValidator,
    storage: TransientStorage,
}

impl DetectionPipeline {
    pub fn new(model_state: ModelState, validator: FileValidator, storage: TransientStorage) -> Self {
        Self {
            model_state,
            validator,
            storage,
        }
    }

    pub fn model_state(&self) -> &ModelState {
        &self.model_state
    }

    /// Fails fast when no detector is available, before any upload is read.
    pub fn ensure_model_loaded(&self) -> Result<(), DetectError> {
        if self.model_state.is_loaded() {
            Ok(())
        } else {
            Err(DetectError::ModelUnavailable)
        }
    }

    pub async fn process(&self, upload: Upload) -> Result<DetectionResult, DetectError> {
        let model = self
            .model_state
            .model()
            .ok_or(DetectError::ModelUnavailable)?;
        let extension = self.validator.validate(upload.filename.as_deref())?;

        let storage = self.storage.clone();
        let Upload { filename, bytes } = upload;
        let filename = filename.unwrap_or_default();

        tokio::task::spawn_blocking(move || -> Result<DetectionResult, DetectError> {
            let stored = storage.store(&bytes, &extension)?;
            tracing::info!("Processing image: {} ({} bytes)", filename, bytes.len());

            let detections = detection::detect(model.as_ref(), stored.path())?;
            tracing::info!("Detection complete: {} bacteria found", detections.len());

            Ok(DetectionResult::new(
                detections,
                ImageInfo {
                    filename,
                    size_bytes: bytes.len(),
                },
            ))
        })
        .await
        .map_err(|e| DetectError::Internal(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_service::{ModelOutput, ModelService, RawBox};
    use std::{
        path::{Path, PathBuf},
        sync::{Arc, Mutex},
    };

    #[derive(Clone, Default)]
    struct MockModelService {
        boxes: Option<Vec<RawBox>>,
        fail_with: Option<String>,
        block_cleanup: bool,
        seen_paths: Arc<Mutex<Vec<PathBuf>>>,
    }

    impl ModelService for MockModelService {
        fn detect(&self, image_path: &Path) -> Result<ModelOutput, InferenceError> {
            assert!(image_path.exists(), "detector ran on a missing file");
            self.seen_paths.lock().unwrap().push(image_path.to_path_buf());
            if self.block_cleanup {
                // a non-empty directory in place of the upload cannot be removed as a file
                std::fs::remove_file(image_path).unwrap();
                std::fs::create_dir(image_path).unwrap();
                std::fs::write(image_path.join("pinned"), b"x").unwrap();
            }
            match &self.fail_with {
                Some(message) => Err(InferenceError::Runtime(message.clone())),
                None => Ok(ModelOutput {
                    boxes: self.boxes.clone(),
                }),
            }
        }
    }

    fn three_boxes() -> Vec<RawBox> {
        (0..3)
            .map(|i| RawBox {
                x1: 10. * i as f32,
                y1: 5.,
                x2: 10. * i as f32 + 8.,
                y2: 11.,
                confidence: 0.9 - 0.1 * i as f32,
            })
            .collect()
    }

    fn scratch_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("pipeline-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn pipeline(model_state: ModelState, dir: &Path) -> DetectionPipeline {
        let allowed: Vec<String> = [".jpg", ".jpeg", ".png", ".bmp", ".tiff", ".tif"]
            .into_iter()
            .map(String::from)
            .collect();
        DetectionPipeline::new(model_state, FileValidator::new(&allowed), TransientStorage::new(dir))
    }

    fn upload(filename: Option<&str>) -> Upload {
        Upload {
            filename: filename.map(String::from),
            bytes: Bytes::from_static(b"fake image bytes"),
        }
    }

    fn dir_is_empty(dir: &Path) -> bool {
        std::fs::read_dir(dir).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn test_successful_detection() {
        let dir = scratch_dir();
        let model = MockModelService {
            boxes: Some(three_boxes()),
            ..Default::default()
        };
        let seen_paths = model.seen_paths.clone();
        let pipeline = pipeline(ModelState::from_model(model), &dir);

        let result = pipeline.process(upload(Some("sample.png"))).await.unwrap();

        assert_eq!(result.bacteria_count, 3);
        let ids: Vec<usize> = result.detections.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(result.image_info.filename, "sample.png");
        assert_eq!(result.image_info.size_bytes, 16);

        let seen = seen_paths.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(!seen[0].exists());
        assert!(dir_is_empty(&dir));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_missing_boxes_container_counts_zero() {
        let dir = scratch_dir();
        let pipeline = pipeline(ModelState::from_model(MockModelService::default()), &dir);

        let result = pipeline.process(upload(Some("empty.TIF"))).await.unwrap();

        assert_eq!(result.bacteria_count, 0);
        assert!(result.detections.is_empty());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_model_unavailable() {
        let dir = scratch_dir();
        let pipeline = pipeline(ModelState::absent(), &dir);

        assert!(matches!(
            pipeline.ensure_model_loaded(),
            Err(DetectError::ModelUnavailable)
        ));
        let err = pipeline.process(upload(Some("sample.png"))).await.unwrap_err();

        assert!(matches!(err, DetectError::ModelUnavailable));
        assert_eq!(err.to_string(), "Model not loaded. Please check server logs.");
        assert!(dir_is_empty(&dir));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_validation_failures_never_touch_storage() {
        let dir = scratch_dir();
        let model = MockModelService::default();
        let seen_paths = model.seen_paths.clone();
        let pipeline = pipeline(ModelState::from_model(model), &dir);

        for name in [None, Some(""), Some("sample.gif")] {
            let err = pipeline.process(upload(name)).await.unwrap_err();
            assert!(matches!(err, DetectError::Validation(_)));
        }

        assert!(seen_paths.lock().unwrap().is_empty());
        assert!(dir_is_empty(&dir));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_inference_failure_still_cleans_up() {
        let dir = scratch_dir();
        let model = MockModelService {
            fail_with: Some("detector crashed".to_string()),
            ..Default::default()
        };
        let seen_paths = model.seen_paths.clone();
        let pipeline = pipeline(ModelState::from_model(model), &dir);

        let err = pipeline.process(upload(Some("sample.jpg"))).await.unwrap_err();

        assert!(matches!(err, DetectError::Inference(_)));
        assert_eq!(err.to_string(), "Error processing image: detector crashed");
        assert!(!seen_paths.lock().unwrap()[0].exists());
        assert!(dir_is_empty(&dir));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_failed_cleanup_does_not_change_the_response() {
        let dir = scratch_dir();
        let model = MockModelService {
            boxes: Some(three_boxes()),
            block_cleanup: true,
            ..Default::default()
        };
        let seen_paths = model.seen_paths.clone();
        let pipeline = pipeline(ModelState::from_model(model), &dir);

        let result = pipeline.process(upload(Some("sample.png"))).await.unwrap();

        assert_eq!(result.bacteria_count, 3);
        assert!(seen_paths.lock().unwrap()[0].is_dir());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_storage_failure_is_internal() {
        let dir = std::env::temp_dir().join(format!("pipeline-missing-{}", uuid::Uuid::new_v4()));
        let pipeline = pipeline(ModelState::from_model(MockModelService::default()), &dir);

        let err = pipeline.process(upload(Some("sample.png"))).await.unwrap_err();

        assert!(matches!(err, DetectError::Storage(_)));
        assert_eq!(err.outcome(), "storage_error");
    }

    #[tokio::test]
    async fn test_concurrent_requests_use_distinct_files() {
        let dir = scratch_dir();
        let model = MockModelService {
            boxes: Some(three_boxes()),
            ..Default::default()
        };
        let seen_paths = model.seen_paths.clone();
        let pipeline = pipeline(ModelState::from_model(model), &dir);

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let pipeline = pipeline.clone();
                tokio::spawn(async move {
                    let name = format!("plate-{}.png", i);
                    pipeline.process(upload(Some(name.as_str()))).await
                })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap().bacteria_count, 3);
        }

        let mut seen = seen_paths.lock().unwrap().clone();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 8);
        assert!(dir_is_empty(&dir));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
