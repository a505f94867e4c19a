use crate::model_service::{InferenceError, ModelService, RawBox};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub id: usize,
    pub bbox: [f64; 4],
    pub confidence: f64,
    pub center_x: f64,
    pub center_y: f64,
    pub width: f64,
    pub height: f64,
}

impl DetectionRecord {
    /// Builds a record whose geometry is derived from `bbox` alone.
    pub fn new(id: usize, bbox: [f64; 4], confidence: f64) -> Self {
        let [x1, y1, x2, y2] = bbox;
        Self {
            id,
            bbox,
            confidence,
            center_x: (x1 + x2) / 2.,
            center_y: (y1 + y2) / 2.,
            width: x2 - x1,
            height: y2 - y1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub filename: String,
    pub size_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub bacteria_count: usize,
    pub detections: Vec<DetectionRecord>,
    pub image_info: ImageInfo,
}

impl DetectionResult {
    pub fn new(detections: Vec<DetectionRecord>, image_info: ImageInfo) -> Self {
        Self {
            bacteria_count: detections.len(),
            detections,
            image_info,
        }
    }
}

fn is_well_formed(raw: &RawBox) -> bool {
    [raw.x1, raw.y1, raw.x2, raw.y2, raw.confidence]
        .iter()
        .all(|v| v.is_finite())
}

/// Converts raw detector boxes into records, preserving detector order.
/// Non-finite boxes are dropped before ids are assigned.
pub fn normalize(boxes: Vec<RawBox>) -> Vec<DetectionRecord> {
    boxes
        .into_iter()
        .filter(|raw| {
            let keep = is_well_formed(raw);
            if !keep {
                tracing::warn!("Skipping malformed box {:?}", raw);
            }
            keep
        })
        .enumerate()
        .map(|(i, raw)| {
            DetectionRecord::new(
                i + 1,
                [raw.x1 as f64, raw.y1 as f64, raw.x2 as f64, raw.y2 as f64],
                raw.confidence as f64,
            )
        })
        .collect()
}

pub fn detect(
    model: &dyn ModelService,
    image_path: &Path,
) -> Result<Vec<DetectionRecord>, InferenceError> {
    let output = model.detect(image_path)?;
    let detections = normalize(output.boxes.unwrap_or_default());

    for detection in &detections {
        tracing::debug!(
            "Detection {}: confidence={:.3}, bbox=({:.1}, {:.1}, {:.1}, {:.1})",
            detection.id,
            detection.confidence,
            detection.bbox[0],
            detection.bbox[1],
            detection.bbox[2],
            detection.bbox[3]
        );
    }

    Ok(detections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_service::ModelOutput;

    struct MockModelService {
        output: fn() -> Result<ModelOutput, InferenceError>,
    }

    impl ModelService for MockModelService {
        fn detect(&self, _image_path: &Path) -> Result<ModelOutput, InferenceError> {
            (self.output)()
        }
    }

    fn raw(x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> RawBox {
        RawBox {
            x1,
            y1,
            x2,
            y2,
            confidence,
        }
    }

    #[test]
    fn test_record_geometry_is_derived_from_bbox() {
        for bbox in [
            [10.0, 20.0, 100.0, 150.0],
            [0.5, 0.25, 0.75, 3.125],
            [1e-3, 7.0, 1e4, 7.0],
        ] {
            let record = DetectionRecord::new(1, bbox, 0.9);

            assert_eq!(record.center_x, (bbox[0] + bbox[2]) / 2.);
            assert_eq!(record.center_y, (bbox[1] + bbox[3]) / 2.);
            assert_eq!(record.width, bbox[2] - bbox[0]);
            assert_eq!(record.height, bbox[3] - bbox[1]);
        }
    }

    #[test]
    fn test_normalize_assigns_sequential_ids_in_model_order() {
        let records = normalize(vec![
            raw(200., 50., 300., 200., 0.88),
            raw(10., 20., 100., 150., 0.95),
            raw(5., 5., 6., 6., 0.3),
        ]);

        let ids: Vec<usize> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(records[0].bbox, [200., 50., 300., 200.]);
        assert_eq!(records[1].width, 90.);
        assert_eq!(records[1].height, 130.);
    }

    #[test]
    fn test_normalize_skips_malformed_boxes_without_gaps() {
        let records = normalize(vec![
            raw(1., 1., 2., 2., 0.9),
            raw(f32::NAN, 1., 2., 2., 0.8),
            raw(3., 3., 4., 4., 0.7),
        ]);

        assert_eq!(records.len(), 2);
        assert_eq!(records[1].id, 2);
        assert_eq!(records[1].bbox, [3., 3., 4., 4.]);
    }

    #[test]
    fn test_detect_without_boxes_container() {
        let model = MockModelService {
            output: || Ok(ModelOutput { boxes: None }),
        };

        let detections = detect(&model, Path::new("unused.png")).unwrap();

        assert!(detections.is_empty());
    }

    #[test]
    fn test_detect_propagates_inference_failure() {
        let model = MockModelService {
            output: || Err(InferenceError::Runtime("CUDA out of memory".to_string())),
        };

        let result = detect(&model, Path::new("unused.png"));

        assert!(matches!(result, Err(InferenceError::Runtime(_))));
    }

    #[test]
    fn test_result_count_matches_detections() {
        let info = ImageInfo {
            filename: "sample.png".to_string(),
            size_bytes: 42,
        };

        let empty = DetectionResult::new(vec![], info.clone());
        assert_eq!(empty.bacteria_count, 0);

        let result = DetectionResult::new(normalize(vec![raw(0., 0., 1., 1., 0.5); 3]), info);
        assert_eq!(result.bacteria_count, result.detections.len());
        assert_eq!(result.bacteria_count, 3);
    }

    #[test]
    fn test_result_json_shape() {
        let result = DetectionResult::new(
            vec![DetectionRecord::new(1, [10., 20., 30., 60.], 0.5)],
            ImageInfo {
                filename: "sample.png".to_string(),
                size_bytes: 7,
            },
        );

        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "bacteria_count": 1,
                "detections": [{
                    "id": 1,
                    "bbox": [10.0, 20.0, 30.0, 60.0],
                    "confidence": 0.5,
                    "center_x": 20.0,
                    "center_y": 40.0,
                    "width": 20.0,
                    "height": 40.0
                }],
                "image_info": {"filename": "sample.png", "size_bytes": 7}
            })
        );
    }
}
