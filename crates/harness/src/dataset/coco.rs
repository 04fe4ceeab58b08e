use super::images::{IMAGE_EXTENSIONS, ImageSamples, RAW_EXTENSIONS};
use super::{Dataset, NOT_APPLICABLE, expect_outputs};
use crate::errors::HarnessError;
use crate::slot::DataSlot;
use crate::types::{DataFormat, ElementType};
use anyhow::Context;
use evaluation::{AveragePrecision, BoundingBox, DetectedObject, GroundTruthObject};
use ndarray::ArrayView2;
use preprocess::PreprocessConfig;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Values logged per detection: sample, ymin, xmin, ymax, xmax, score, class.
pub const DETECTION_RECORD_LEN: usize = 7;

#[derive(Debug, Clone, clap::Args)]
pub struct CocoConfig {
    /// Directory with the validation images
    #[arg(long)]
    pub images_directory: PathBuf,
    /// JSON annotations: `[{"image_id", "image_name", "objects": [...]}]`
    #[arg(long)]
    pub groundtruth_file: Option<PathBuf>,
    /// Added to every predicted class index
    #[arg(long, default_value_t = 1)]
    pub offset: i32,
    #[arg(long, default_value_t = 91)]
    pub num_classes: usize,
    #[arg(long, default_value_t = 300)]
    pub image_width: u32,
    #[arg(long, default_value_t = 300)]
    pub image_height: u32,
    /// Read pre-resized `.rgb8` files instead of decoding images
    #[arg(long)]
    pub raw_images: bool,
}

#[derive(Debug, Deserialize)]
struct AnnotatedImage {
    image_id: i64,
    image_name: String,
    #[serde(default)]
    objects: Vec<GroundTruthObject>,
}

/// Object detection scored by mean average precision.
pub struct Coco {
    images: ImageSamples,
    offset: i32,
    num_classes: usize,
    capacity: usize,
    /// Ground truth of each sample, resolved through the image file name.
    ground_truth: Option<Vec<Vec<GroundTruthObject>>>,
    predictions: BTreeMap<usize, Vec<DetectedObject>>,
}

impl Coco {
    pub fn new(
        config: &CocoConfig,
        input_format: &DataFormat,
        output_format: &DataFormat,
    ) -> anyhow::Result<Self> {
        let capacity = check_output_format(output_format)
            .context("Detection models output boxes, classes, scores and a count")?;

        let extensions: &[&str] = if config.raw_images {
            &RAW_EXTENSIONS
        } else {
            &IMAGE_EXTENSIONS
        };
        let images = ImageSamples::open(&config.images_directory, extensions, input_format, |t| {
            PreprocessConfig::full_frame(config.image_width, config.image_height, t)
        })?;

        let ground_truth = config
            .groundtruth_file
            .as_deref()
            .map(|path| read_ground_truth(path, images.files()))
            .transpose()?;

        Ok(Self {
            images,
            offset: config.offset,
            num_classes: config.num_classes,
            capacity,
            ground_truth,
            predictions: BTreeMap::new(),
        })
    }

    /// Detections recorded for a sample, with the class offset applied.
    pub fn detections(&self, index: usize) -> Option<&[DetectedObject]> {
        self.predictions.get(&index).map(Vec::as_slice)
    }
}

/// Returns the maximum number of detections per image.
fn check_output_format(output_format: &DataFormat) -> anyhow::Result<usize> {
    expect_count(output_format.len(), 4)?;
    if let Some(d) = output_format
        .iter()
        .find(|d| d.element_type != ElementType::Float32)
    {
        return Err(HarnessError::TypeMismatch {
            expected: ElementType::Float32,
            actual: d.element_type,
        }
        .into());
    }

    let capacity = output_format[1].element_count;
    if output_format[0].element_count != capacity * 4
        || output_format[2].element_count != capacity
        || output_format[3].element_count != 1
    {
        anyhow::bail!(
            "Inconsistent detection outputs {}, {}, {}, {}",
            output_format[0],
            output_format[1],
            output_format[2],
            output_format[3]
        );
    }
    Ok(capacity)
}

fn expect_count(actual: usize, expected: usize) -> Result<(), HarnessError> {
    if actual != expected {
        return Err(HarnessError::TensorCountMismatch { expected, actual });
    }
    Ok(())
}

fn stem(name: &str) -> Option<&str> {
    Path::new(name).file_stem().and_then(|s| s.to_str())
}

/// Align annotations to the sorted image files by file stem.
///
/// Every image must have an annotation entry; annotations for images that are not
/// in the directory are ignored.
fn read_ground_truth(path: &Path, files: &[PathBuf]) -> anyhow::Result<Vec<Vec<GroundTruthObject>>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read ground truth {}", path.display()))?;
    let annotated: Vec<AnnotatedImage> = serde_json::from_str(&content).map_err(|e| {
        HarnessError::InvalidGroundTruth(format!("{}: {}", path.display(), e))
    })?;

    let mut by_stem: HashMap<&str, &AnnotatedImage> = HashMap::with_capacity(annotated.len());
    for image in &annotated {
        let key = stem(&image.image_name).unwrap_or(image.image_name.as_str());
        by_stem.insert(key, image);
    }

    let mut ground_truth = Vec::with_capacity(files.len());
    for file in files {
        let key = file.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        let image = by_stem.get(key).ok_or_else(|| {
            HarnessError::InvalidGroundTruth(format!(
                "{} has no annotation entry in {}",
                file.display(),
                path.display()
            ))
        })?;
        tracing::trace!(file = key, image_id = image.image_id, objects = image.objects.len(), "Matched annotation");
        ground_truth.push(image.objects.clone());
    }

    tracing::info!(
        images = files.len(),
        annotations = annotated.len(),
        "Loaded detection annotations"
    );
    Ok(ground_truth)
}

impl Dataset for Coco {
    fn name(&self) -> &str {
        "coco"
    }

    fn total_sample_count(&self) -> usize {
        self.images.len()
    }

    fn load_samples_to_ram(&mut self, indices: &[usize]) -> anyhow::Result<()> {
        self.images.load(indices)
    }

    fn unload_samples_from_ram(&mut self, indices: &[usize]) -> anyhow::Result<()> {
        self.images.unload(indices);
        Ok(())
    }

    fn get_data(&self, index: usize) -> Result<&[DataSlot], HarnessError> {
        self.images.get(index)
    }

    fn process_output(&mut self, index: usize, outputs: &[DataSlot]) -> anyhow::Result<Vec<u8>> {
        expect_outputs(outputs, 4)?;
        let boxes = ArrayView2::from_shape((self.capacity, 4), outputs[0].as_f32()?)?;
        let classes = outputs[1].as_f32()?;
        let scores = outputs[2].as_f32()?;
        let count = outputs[3].as_f32()?.first().copied().unwrap_or(0.0);

        if !(0.0..=self.capacity as f32).contains(&count) {
            anyhow::bail!(
                "Sample {} reports {} detections, outputs hold {}",
                index,
                count,
                self.capacity
            );
        }
        let count = count as usize;
        if classes.len() < count || scores.len() < count {
            anyhow::bail!("Sample {} has truncated class or score outputs", index);
        }

        let mut record = Vec::with_capacity(count * DETECTION_RECORD_LEN);
        let mut detections = Vec::with_capacity(count);
        for (i, b) in boxes.outer_iter().take(count).enumerate() {
            let class_id = classes[i] as i32 + self.offset;
            record.extend_from_slice(&[
                index as f32,
                b[0],
                b[1],
                b[2],
                b[3],
                scores[i],
                class_id as f32,
            ]);
            detections.push(DetectedObject {
                bounding_box: BoundingBox::new(b[0], b[1], b[2], b[3]),
                class_id,
                score: scores[i],
            });
        }

        self.predictions.insert(index, detections);
        Ok(record.iter().flat_map(|v| v.to_le_bytes()).collect())
    }

    fn compute_accuracy_string(&self) -> String {
        let Some(ground_truth) = &self.ground_truth else {
            return NOT_APPLICABLE.to_string();
        };

        let mut aggregator = AveragePrecision::new(self.num_classes);
        for (&index, detections) in &self.predictions {
            if let Some(truth) = ground_truth.get(index) {
                aggregator.add_image(detections, truth);
            }
        }
        match aggregator.mean_average_precision() {
            Some(map) => format!("{:.4} mAP", map),
            None => NOT_APPLICABLE.to_string(),
        }
    }
}
