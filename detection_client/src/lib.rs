mod summary;

pub mod app;
pub mod client;
pub mod config;

pub use app::run;
pub use summary::{ConfidenceStats, ImageReport, Summary};
