use super::images::{IMAGE_EXTENSIONS, ImageSamples, RAW_EXTENSIONS};
use super::{Dataset, NOT_APPLICABLE, expect_outputs};
use crate::errors::HarnessError;
use crate::slot::DataSlot;
use crate::types::DataFormat;
use anyhow::Context;
use evaluation::argmax_with_offset;
use preprocess::{DEFAULT_INPUT_SIZE, PreprocessConfig};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, clap::Args)]
pub struct ImagenetConfig {
    /// Directory with the validation images
    #[arg(long)]
    pub images_directory: PathBuf,
    /// Label file, one label per line (`65` or `ILSVRC2012_val_00000001.JPEG 65`)
    #[arg(long)]
    pub groundtruth_file: Option<PathBuf>,
    /// Output index of ground-truth label 0 (1 when the model has a background class)
    #[arg(long, default_value_t = 1)]
    pub offset: usize,
    #[arg(long, default_value_t = DEFAULT_INPUT_SIZE.0)]
    pub image_width: u32,
    #[arg(long, default_value_t = DEFAULT_INPUT_SIZE.1)]
    pub image_height: u32,
    /// Read pre-resized `.rgb8` files instead of decoding images
    #[arg(long)]
    pub raw_images: bool,
}

/// Image classification scored by top-1 accuracy.
pub struct Imagenet {
    images: ImageSamples,
    offset: usize,
    labels: Option<Vec<usize>>,
    predictions: HashMap<usize, usize>,
}

impl Imagenet {
    pub fn new(
        config: &ImagenetConfig,
        input_format: &DataFormat,
        output_format: &DataFormat,
    ) -> anyhow::Result<Self> {
        if output_format.len() != 1 {
            return Err(HarnessError::TensorCountMismatch {
                expected: 1,
                actual: output_format.len(),
            })
            .context("Classification models have a single output");
        }
        if output_format[0].element_count <= config.offset {
            anyhow::bail!(
                "Output {} has no classes after offset {}",
                output_format[0],
                config.offset
            );
        }

        let extensions: &[&str] = if config.raw_images {
            &RAW_EXTENSIONS
        } else {
            &IMAGE_EXTENSIONS
        };
        let images = ImageSamples::open(&config.images_directory, extensions, input_format, |t| {
            PreprocessConfig::classification(config.image_width, config.image_height, t)
        })?;

        let labels = config
            .groundtruth_file
            .as_deref()
            .map(|path| read_labels(path, images.len()))
            .transpose()?;

        Ok(Self {
            images,
            offset: config.offset,
            labels,
            predictions: HashMap::new(),
        })
    }

    /// Predicted class of every sample processed so far.
    pub fn predictions(&self) -> &HashMap<usize, usize> {
        &self.predictions
    }
}

/// Last whitespace-separated token of each non-empty line.
fn read_labels(path: &Path, images: usize) -> anyhow::Result<Vec<usize>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read ground truth {}", path.display()))?;

    let mut labels = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        let Some(token) = line.split_whitespace().last() else {
            continue;
        };
        let label = token.parse::<usize>().map_err(|_| {
            HarnessError::InvalidGroundTruth(format!(
                "{}:{}: `{}` is not a class index",
                path.display(),
                line_no + 1,
                token
            ))
        })?;
        labels.push(label);
    }

    if labels.len() < images {
        return Err(HarnessError::InvalidGroundTruth(format!(
            "{} has {} labels for {} images",
            path.display(),
            labels.len(),
            images
        ))
        .into());
    }
    tracing::info!(labels = labels.len(), "Loaded classification labels");
    Ok(labels)
}

fn top1(output: &DataSlot, offset: usize) -> Option<usize> {
    match output {
        DataSlot::Float32(v) => argmax_with_offset(v, offset),
        DataSlot::Uint8(v) => argmax_with_offset(v, offset),
        DataSlot::Int8(v) => argmax_with_offset(v, offset),
        DataSlot::Float16(v) => argmax_with_offset(v, offset),
        DataSlot::Int32(v) => argmax_with_offset(v, offset),
        DataSlot::Int64(v) => argmax_with_offset(v, offset),
    }
}

impl Dataset for Imagenet {
    fn name(&self) -> &str {
        "imagenet"
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
        expect_outputs(outputs, 1)?;
        let class = top1(&outputs[0], self.offset)
            .with_context(|| format!("Output of sample {} has no classes", index))?;

        self.predictions.insert(index, class);
        Ok((class as i32).to_le_bytes().to_vec())
    }

    fn compute_accuracy_string(&self) -> String {
        let Some(labels) = &self.labels else {
            return NOT_APPLICABLE.to_string();
        };
        if self.predictions.is_empty() {
            return NOT_APPLICABLE.to_string();
        }

        let correct = self
            .predictions
            .iter()
            .filter(|&(&index, &class)| labels.get(index) == Some(&class))
            .count();
        let accuracy = correct as f64 / self.predictions.len() as f64;
        tracing::debug!(correct, total = self.predictions.len(), "Top-1 accuracy");
        format!("{:.2}%", accuracy * 100.0)
    }
}
