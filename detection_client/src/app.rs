use crate::{
    client::DetectionClient,
    config::Args,
    summary::{list_images, ConfidenceStats, ImageReport, Summary},
};
use anyhow::Context;
use std::time::Duration;
use tokio::time::sleep;

pub async fn run(args: Args) -> anyhow::Result<Summary> {
    let client = DetectionClient::new(&args.url, Duration::from_secs(args.timeout_secs))?;

    let info = client
        .check_service()
        .await
        .with_context(|| format!("API is not responding at {}", args.url))?;
    tracing::info!(
        "API is running: {} (model loaded: {})",
        info.message,
        info.model_loaded
    );

    let images = list_images(&args.images_dir)
        .with_context(|| format!("Test images directory not found: {:?}", args.images_dir))?;
    if images.is_empty() {
        anyhow::bail!("No image files found in {:?}", args.images_dir);
    }
    tracing::info!("Found {} test images", images.len());

    let mut summary = Summary::default();
    for (i, path) in images.iter().enumerate() {
        if i > 0 {
            sleep(Duration::from_millis(args.delay_ms)).await;
        }
        tracing::info!("[{}/{}] Testing {:?}", i + 1, images.len(), path);

        let response = match client.detect_file(path).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("Error testing {:?}: {}", path, e);
                continue;
            }
        };

        tracing::info!(
            "Bacteria count: {} ({} detections returned)",
            response.bacteria_count,
            response.detections.len()
        );
        if let Some(stats) = ConfidenceStats::from_detections(&response.detections) {
            tracing::info!(
                "Average confidence: {:.3}, range: {:.3} - {:.3}",
                stats.average,
                stats.min,
                stats.max
            );
        }

        summary.push(ImageReport {
            image: path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            bacteria_count: response.bacteria_count,
            detections: response.detections.len(),
        });
    }

    log_summary(&summary, args.top);
    Ok(summary)
}

fn log_summary(summary: &Summary, top: usize) {
    tracing::info!("Images tested: {}", summary.images_tested());
    tracing::info!("Total bacteria detected: {}", summary.total_bacteria());
    if let Some(average) = summary.average_per_image() {
        tracing::info!("Average bacteria per image: {:.1}", average);
    }
    for report in summary.top(top) {
        tracing::info!(
            "Top detection: {}: {} bacteria ({} detections)",
            report.image,
            report.bacteria_count,
            report.detections
        );
    }
}
