use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// COCO-style IoU thresholds 0.50, 0.55, ..., 0.95.
pub const DEFAULT_IOU_THRESHOLDS: [f32; 10] =
    [0.50, 0.55, 0.60, 0.65, 0.70, 0.75, 0.80, 0.85, 0.90, 0.95];

/// Number of recall points used for interpolated precision.
pub const DEFAULT_RECALL_POINTS: usize = 101;

/// Axis-aligned box in normalized image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub normalized_top: f32,
    pub normalized_left: f32,
    pub normalized_bottom: f32,
    pub normalized_right: f32,
}

impl BoundingBox {
    pub fn new(top: f32, left: f32, bottom: f32, right: f32) -> Self {
        Self {
            normalized_top: top,
            normalized_left: left,
            normalized_bottom: bottom,
            normalized_right: right,
        }
    }

    pub fn area(&self) -> f32 {
        let h = (self.normalized_bottom - self.normalized_top).max(0.0);
        let w = (self.normalized_right - self.normalized_left).max(0.0);
        h * w
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let top = self.normalized_top.max(other.normalized_top);
        let left = self.normalized_left.max(other.normalized_left);
        let bottom = self.normalized_bottom.min(other.normalized_bottom);
        let right = self.normalized_right.min(other.normalized_right);

        let intersection = (bottom - top).max(0.0) * (right - left).max(0.0);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }
        intersection / union
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectedObject {
    pub bounding_box: BoundingBox,
    pub class_id: i32,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GroundTruthObject {
    pub bounding_box: BoundingBox,
    pub class_id: i32,
}

/// Detection of one class, with a match flag per IoU threshold.
#[derive(Debug, Clone)]
struct ScoredDetection {
    score: f32,
    true_positive: Vec<bool>,
}

#[derive(Debug, Clone, Default)]
struct ClassRecord {
    ground_truth_count: usize,
    detections: Vec<ScoredDetection>,
}

/// Class-wise precision/recall aggregator producing mean average precision.
///
/// Images are matched one at a time in [`AveragePrecision::add_image`]; only the
/// per-detection match flags are retained, so finalizing is a sort and a sweep per
/// class and threshold.
#[derive(Debug, Clone)]
pub struct AveragePrecision {
    num_classes: usize,
    iou_thresholds: Vec<f32>,
    recall_points: usize,
    classes: BTreeMap<i32, ClassRecord>,
    images: usize,
}

impl AveragePrecision {
    pub fn new(num_classes: usize) -> Self {
        Self::with_thresholds(num_classes, DEFAULT_IOU_THRESHOLDS.to_vec(), DEFAULT_RECALL_POINTS)
    }

    pub fn with_thresholds(num_classes: usize, iou_thresholds: Vec<f32>, recall_points: usize) -> Self {
        Self {
            num_classes,
            iou_thresholds,
            recall_points: recall_points.max(2),
            classes: BTreeMap::new(),
            images: 0,
        }
    }

    pub fn images(&self) -> usize {
        self.images
    }

    fn in_range(&self, class_id: i32) -> bool {
        class_id >= 0 && (class_id as usize) < self.num_classes
    }

    /// Match one image's detections against its ground truth and record the outcome.
    pub fn add_image(&mut self, predicted: &[DetectedObject], ground_truth: &[GroundTruthObject]) {
        self.images += 1;

        let mut class_ids: Vec<i32> = predicted
            .iter()
            .map(|d| d.class_id)
            .chain(ground_truth.iter().map(|g| g.class_id))
            .filter(|&c| self.in_range(c))
            .collect();
        class_ids.sort_unstable();
        class_ids.dedup();

        for class_id in class_ids {
            let truths: Vec<&BoundingBox> = ground_truth
                .iter()
                .filter(|g| g.class_id == class_id)
                .map(|g| &g.bounding_box)
                .collect();
            let mut detections: Vec<&DetectedObject> =
                predicted.iter().filter(|d| d.class_id == class_id).collect();
            detections.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

            let ious = Array2::from_shape_fn((detections.len(), truths.len()), |(d, t)| {
                detections[d].bounding_box.iou(truths[t])
            });

            let mut flags = vec![vec![false; self.iou_thresholds.len()]; detections.len()];
            for (k, &threshold) in self.iou_thresholds.iter().enumerate() {
                let mut taken = vec![false; truths.len()];
                for (d, row) in ious.outer_iter().enumerate() {
                    let best = row
                        .iter()
                        .enumerate()
                        .filter(|(t, _)| !taken[*t])
                        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal));
                    if let Some((t, &iou)) = best {
                        if iou >= threshold {
                            taken[t] = true;
                            flags[d][k] = true;
                        }
                    }
                }
            }

            let record = self.classes.entry(class_id).or_default();
            record.ground_truth_count += truths.len();
            record
                .detections
                .extend(detections.iter().zip(flags).map(|(d, true_positive)| ScoredDetection {
                    score: d.score,
                    true_positive,
                }));
        }
    }

    /// Interpolated AP of one class at one threshold index, `None` without ground truth.
    fn class_ap_at(&self, record: &ClassRecord, threshold_idx: usize) -> Option<f32> {
        if record.ground_truth_count == 0 {
            return None;
        }

        let mut ranked: Vec<&ScoredDetection> = record.detections.iter().collect();
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut curve = Vec::with_capacity(ranked.len());
        let (mut tp, mut fp) = (0usize, 0usize);
        for det in ranked {
            if det.true_positive[threshold_idx] {
                tp += 1;
            } else {
                fp += 1;
            }
            let precision = tp as f32 / (tp + fp) as f32;
            let recall = tp as f32 / record.ground_truth_count as f32;
            curve.push((precision, recall));
        }

        let last = (self.recall_points - 1) as f32;
        let sum: f32 = (0..self.recall_points)
            .map(|i| {
                let target = i as f32 / last;
                curve
                    .iter()
                    .filter(|(_, recall)| *recall >= target)
                    .map(|(precision, _)| *precision)
                    .fold(0.0f32, f32::max)
            })
            .sum();
        Some(sum / self.recall_points as f32)
    }

    /// AP for one class averaged over all IoU thresholds.
    pub fn class_average_precision(&self, class_id: i32) -> Option<f32> {
        let record = self.classes.get(&class_id)?;
        let values: Option<Vec<f32>> = (0..self.iou_thresholds.len())
            .map(|k| self.class_ap_at(record, k))
            .collect();
        let values = values?;
        Some(values.iter().sum::<f32>() / values.len() as f32)
    }

    /// Mean over thresholds of the mean over classes that have ground truth.
    pub fn mean_average_precision(&self) -> Option<f32> {
        if self.iou_thresholds.is_empty() {
            return None;
        }

        let mut per_threshold = Vec::with_capacity(self.iou_thresholds.len());
        for k in 0..self.iou_thresholds.len() {
            let aps: Vec<f32> = self
                .classes
                .values()
                .filter_map(|record| self.class_ap_at(record, k))
                .collect();
            if aps.is_empty() {
                return None;
            }
            per_threshold.push(aps.iter().sum::<f32>() / aps.len() as f32);
        }

        let map = per_threshold.iter().sum::<f32>() / per_threshold.len() as f32;
        tracing::debug!(
            images = self.images,
            classes = self.classes.len(),
            map,
            "Mean average precision computed"
        );
        Some(map)
    }
}
