use clap::Parser;
use std::path::PathBuf;

/// Smoke test for a running bacteria detection service.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Base URL of the detection service
    #[arg(long, default_value = "http://localhost:8000", value_name = "URL")]
    pub url: String,

    /// Directory with the images to submit
    #[arg(long, default_value = "test images", value_name = "DIR")]
    pub images_dir: PathBuf,

    /// Pause between two requests, in milliseconds
    #[arg(long, default_value_t = 500, value_name = "MS")]
    pub delay_ms: u64,

    /// Number of images listed in the final ranking
    #[arg(long, default_value_t = 3)]
    pub top: usize,

    /// Per-request timeout, in seconds
    #[arg(long, default_value_t = 120)]
    pub timeout_secs: u64,
}
