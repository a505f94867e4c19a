use crate::{
    detection::DetectionResult,
    pipeline::{DetectError, Upload},
    server::SharedState,
    validation::ValidationError,
};
use axum::{
    extract::{
        multipart::{Multipart, MultipartError, MultipartRejection},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::instrument;

const FILE_FIELD: &str = "file";

#[derive(Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl IntoResponse for DetectError {
    fn into_response(self) -> Response {
        let status = match self {
            DetectError::ModelUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            DetectError::Validation(_) | DetectError::InvalidUpload(_) => StatusCode::BAD_REQUEST,
            DetectError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            DetectError::Storage(_) | DetectError::Inference(_) | DetectError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!("{}", self);
        } else {
            tracing::warn!("Rejected upload: {}", self);
        }
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

fn multipart_error(err: MultipartError) -> DetectError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        DetectError::PayloadTooLarge(err.body_text())
    } else {
        DetectError::InvalidUpload(err.body_text())
    }
}

async fn read_upload(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Upload, DetectError> {
    let mut multipart = multipart.map_err(|e| DetectError::InvalidUpload(e.body_text()))?;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let filename = field.file_name().map(str::to_owned);
        let bytes = field.bytes().await.map_err(multipart_error)?;
        return Ok(Upload { filename, bytes });
    }

    Err(ValidationError::MissingFile.into())
}

async fn run_detection(
    state: &SharedState,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<DetectionResult, DetectError> {
    state.pipeline.ensure_model_loaded()?;
    let upload = read_upload(multipart).await?;
    state.pipeline.process(upload).await
}

#[instrument(skip(state, multipart))]
pub async fn detect(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<DetectionResult>, DetectError> {
    let start = Instant::now();
    let result = run_detection(&state, multipart).await;

    let outcome = match &result {
        Ok(_) => "ok",
        Err(e) => e.outcome(),
    };
    state.metrics.record_request(outcome);
    state
        .metrics
        .record_detection_duration(start.elapsed().as_millis() as u64, outcome);

    let result = result?;
    state.metrics.record_bacteria_count(result.bacteria_count);

    Ok(Json(result))
}
