use crate::client::Detection;
use std::{
    io,
    path::{Path, PathBuf},
};

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "tiff"];

/// Image files directly under `dir`, sorted by name.
pub fn list_images(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let supported = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()));
        if supported {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfidenceStats {
    pub average: f64,
    pub min: f64,
    pub max: f64,
}

impl ConfidenceStats {
    pub fn from_detections(detections: &[Detection]) -> Option<Self> {
        if detections.is_empty() {
            return None;
        }
        let confidences = detections.iter().map(|d| d.confidence);
        Some(Self {
            average: confidences.clone().sum::<f64>() / detections.len() as f64,
            min: confidences.clone().fold(f64::INFINITY, f64::min),
            max: confidences.fold(f64::NEG_INFINITY, f64::max),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageReport {
    pub image: String,
    pub bacteria_count: usize,
    pub detections: usize,
}

#[derive(Debug, Default)]
pub struct Summary {
    reports: Vec<ImageReport>,
}

impl Summary {
    pub fn push(&mut self, report: ImageReport) {
        self.reports.push(report);
    }

    pub fn images_tested(&self) -> usize {
        self.reports.len()
    }

    pub fn total_bacteria(&self) -> usize {
        self.reports.iter().map(|r| r.bacteria_count).sum()
    }

    pub fn average_per_image(&self) -> Option<f64> {
        if self.reports.is_empty() {
            None
        } else {
            Some(self.total_bacteria() as f64 / self.reports.len() as f64)
        }
    }

    /// The `n` images with the most bacteria. Ties keep submission order.
    pub fn top(&self, n: usize) -> Vec<&ImageReport> {
        let mut ranked: Vec<&ImageReport> = self.reports.iter().collect();
        ranked.sort_by(|a, b| b.bacteria_count.cmp(&a.bacteria_count));
        ranked.truncate(n);
        ranked
    }
}
