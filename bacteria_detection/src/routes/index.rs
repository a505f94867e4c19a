use crate::server::SharedState;
use axum::{extract::State, response::IntoResponse, response::Json};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Serialize)]
pub struct ServiceInfo {
    message: &'static str,
    model_loaded: bool,
    endpoints: BTreeMap<&'static str, &'static str>,
}

pub async fn index(State(state): State<SharedState>) -> impl IntoResponse {
    let endpoints = BTreeMap::from([
        (
            "detect",
            "/detect/ (POST) - Upload image for bacteria detection",
        ),
        ("health", "/health (GET) - Service and model status"),
        ("metrics", "/metrics (GET) - Prometheus metrics"),
    ]);

    Json(ServiceInfo {
        message: "Bacteria Detection API is running",
        model_loaded: state.pipeline.model_state().is_loaded(),
        endpoints,
    })
}
