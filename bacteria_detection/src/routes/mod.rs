mod detect;
mod health;
mod index;
mod metrics;

use crate::server::SharedState;
use axum::{
    routing::{get, post},
    Router,
};

pub use detect::detect;
pub use health::healthcheck;
pub use index::index;
pub use metrics::metrics_handler;

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/", get(index))
        .route("/health", get(healthcheck))
        .route("/metrics", get(metrics_handler))
        .route("/detect/", post(detect))
        .route("/detect", post(detect))
}
