use crate::{config::ModelConfig, model_service::ModelService, ort_service::OrtModelService};
use std::sync::Arc;

/// The detector loaded at startup. Either holds a usable model for the
/// lifetime of the process or stays absent; it is never reloaded.
#[derive(Clone, Default)]
pub struct ModelState {
    model: Option<Arc<dyn ModelService>>,
}

impl ModelState {
    /// Loads the ONNX detector once. Failures are logged and leave the
    /// state absent instead of aborting startup.
    pub fn load(model_config: &ModelConfig) -> Self {
        tracing::info!("Loading model from {:?}", model_config.get_path());

        match OrtModelService::new(model_config) {
            Ok(model) => {
                tracing::info!("Model loaded successfully");
                Self::from_model(model)
            }
            Err(e) => {
                tracing::error!("Error loading model: {}", e);
                Self::absent()
            }
        }
    }

    pub fn from_model(model: impl ModelService) -> Self {
        Self {
            model: Some(Arc::new(model)),
        }
    }

    pub fn absent() -> Self {
        Self { model: None }
    }

    pub fn model(&self) -> Option<Arc<dyn ModelService>> {
        self.model.clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }
}
