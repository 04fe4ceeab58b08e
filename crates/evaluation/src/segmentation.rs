use std::collections::HashMap;

/// Per-class true positive / false positive / false negative pixel counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassCounts {
    pub true_positive: Vec<u64>,
    pub false_positive: Vec<u64>,
    pub false_negative: Vec<u64>,
}

impl ClassCounts {
    fn zeroed(num_classes: usize) -> Self {
        Self {
            true_positive: vec![0; num_classes],
            false_positive: vec![0; num_classes],
            false_negative: vec![0; num_classes],
        }
    }

    fn add(&mut self, other: &ClassCounts) {
        for j in 0..self.true_positive.len() {
            self.true_positive[j] += other.true_positive[j];
            self.false_positive[j] += other.false_positive[j];
            self.false_negative[j] += other.false_negative[j];
        }
    }

    fn subtract(&mut self, other: &ClassCounts) {
        for j in 0..self.true_positive.len() {
            self.true_positive[j] -= other.true_positive[j];
            self.false_positive[j] -= other.false_positive[j];
            self.false_negative[j] -= other.false_negative[j];
        }
    }
}

/// Running mean-IoU over foreground classes `1..=num_classes`.
///
/// Class 0 is background and never scored. Samples are keyed by index: feeding the
/// same sample twice replaces its earlier contribution instead of counting it again.
#[derive(Debug, Clone)]
pub struct IouAccumulator {
    num_classes: usize,
    totals: ClassCounts,
    per_sample: HashMap<usize, ClassCounts>,
}

impl IouAccumulator {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            totals: ClassCounts::zeroed(num_classes),
            per_sample: HashMap::new(),
        }
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn samples(&self) -> usize {
        self.per_sample.len()
    }

    pub fn totals(&self) -> &ClassCounts {
        &self.totals
    }

    /// Count one image. `predicted` and `ground_truth` are per-pixel class ids in the
    /// same raster order; the shorter of the two bounds the comparison.
    pub fn update<P, G>(&mut self, sample: usize, predicted: P, ground_truth: G)
    where
        P: IntoIterator<Item = u8>,
        G: IntoIterator<Item = u8>,
    {
        let mut counts = ClassCounts::zeroed(self.num_classes);
        let foreground = |label: u8| label > 0 && (label as usize) <= self.num_classes;

        for (p, g) in predicted.into_iter().zip(ground_truth) {
            if p == g {
                if foreground(p) {
                    counts.true_positive[p as usize - 1] += 1;
                }
                continue;
            }
            // A wrong prediction of class c only counts against c when the pixel really
            // belongs to another foreground class.
            if foreground(p) && foreground(g) {
                counts.false_positive[p as usize - 1] += 1;
            }
            if foreground(g) {
                counts.false_negative[g as usize - 1] += 1;
            }
        }

        if let Some(previous) = self.per_sample.remove(&sample) {
            self.totals.subtract(&previous);
        }
        self.totals.add(&counts);
        self.per_sample.insert(sample, counts);
    }

    /// IoU of one foreground class (1-based), `None` when the class never appeared.
    pub fn class_iou(&self, class: usize) -> Option<f64> {
        if class == 0 || class > self.num_classes {
            return None;
        }
        let j = class - 1;
        let tp = self.totals.true_positive[j];
        let denominator = tp + self.totals.false_positive[j] + self.totals.false_negative[j];
        if denominator == 0 {
            return None;
        }
        Some(tp as f64 / denominator as f64)
    }

    /// Mean over classes that appeared in a prediction or the ground truth.
    pub fn mean_iou(&self) -> Option<f64> {
        let ious: Vec<f64> = (1..=self.num_classes)
            .filter_map(|c| self.class_iou(c))
            .collect();
        if ious.is_empty() {
            return None;
        }
        Some(ious.iter().sum::<f64>() / ious.len() as f64)
    }
}
