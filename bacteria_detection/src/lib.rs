mod routes;

pub mod app;
pub mod config;
pub mod detection;
pub mod model_service;
pub mod ort_service;
pub mod pipeline;
pub mod server;
pub mod state;
pub mod storage;
pub mod telemetry;
pub mod validation;

pub use app::start_app;
