use super::images::{IMAGE_EXTENSIONS, ImageSamples, RAW_EXTENSIONS};
use super::{Dataset, NOT_APPLICABLE, expect_outputs};
use crate::errors::HarnessError;
use crate::slot::DataSlot;
use crate::types::{DataFormat, ElementType};
use anyhow::Context;
use evaluation::IouAccumulator;
use preprocess::{PreprocessConfig, sorted_files};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const GROUND_TRUTH_EXTENSION: &str = "raw";

#[derive(Debug, Clone, clap::Args)]
pub struct Ade20kConfig {
    /// Directory with the validation images (`.rgb8`, `.jpg`, `.jpeg` or `.png`)
    #[arg(long)]
    pub images_directory: PathBuf,
    /// Directory with one `.raw` class map (one byte per pixel) per image
    #[arg(long)]
    pub groundtruth_directory: Option<PathBuf>,
    /// Foreground classes scored, numbered from 1
    #[arg(long, default_value_t = 31)]
    pub num_classes: usize,
    #[arg(long, default_value_t = 512)]
    pub image_width: u32,
    #[arg(long, default_value_t = 512)]
    pub image_height: u32,
}

/// Per-image class maps, read alongside the images so scoring never touches the disk.
struct ClassMaps {
    files: Vec<PathBuf>,
    pixels: usize,
    loaded: HashMap<usize, Vec<u8>>,
}

impl ClassMaps {
    /// Every image needs a class map of at least `pixels` bytes.
    fn open(dir: &Path, images: usize, pixels: usize) -> anyhow::Result<Self> {
        let files = sorted_files(dir, &[GROUND_TRUTH_EXTENSION]).map_err(|e| {
            HarnessError::InvalidGroundTruth(format!("{}: {:#}", dir.display(), e))
        })?;
        if files.len() < images {
            return Err(HarnessError::InvalidGroundTruth(format!(
                "{} has {} class maps for {} images",
                dir.display(),
                files.len(),
                images
            ))
            .into());
        }
        for file in &files[..images] {
            let len = std::fs::metadata(file)
                .with_context(|| format!("Failed to stat class map {}", file.display()))?
                .len();
            if len < pixels as u64 {
                return Err(HarnessError::InvalidGroundTruth(format!(
                    "{} has {} pixels, expected {}",
                    file.display(),
                    len,
                    pixels
                ))
                .into());
            }
        }
        tracing::info!(dir = %dir.display(), maps = files.len(), "Found segmentation ground truth");

        Ok(Self {
            files,
            pixels,
            loaded: HashMap::new(),
        })
    }

    fn load(&mut self, indices: &[usize]) -> anyhow::Result<()> {
        for &index in indices {
            if self.loaded.contains_key(&index) {
                continue;
            }
            let path = self.files.get(index).ok_or(HarnessError::SampleOutOfRange {
                index,
                total: self.files.len(),
            })?;
            let mut map = std::fs::read(path)
                .with_context(|| format!("Failed to read class map {}", path.display()))?;
            if map.len() < self.pixels {
                return Err(HarnessError::InvalidGroundTruth(format!(
                    "{} has {} pixels, expected {}",
                    path.display(),
                    map.len(),
                    self.pixels
                ))
                .into());
            }
            map.truncate(self.pixels);
            self.loaded.insert(index, map);
        }
        Ok(())
    }

    fn unload(&mut self, indices: &[usize]) {
        for index in indices {
            self.loaded.remove(index);
        }
    }

    fn get(&self, index: usize) -> Result<&[u8], HarnessError> {
        self.loaded
            .get(&index)
            .map(Vec::as_slice)
            .ok_or(HarnessError::SampleNotLoaded(index))
    }
}

/// Semantic segmentation scored by mean IoU over the foreground classes.
pub struct Ade20k {
    images: ImageSamples,
    pixels: usize,
    class_maps: Option<ClassMaps>,
    accumulator: IouAccumulator,
}

impl Ade20k {
    pub fn new(
        config: &Ade20kConfig,
        input_format: &DataFormat,
        output_format: &DataFormat,
    ) -> anyhow::Result<Self> {
        let pixels = config.image_width as usize * config.image_height as usize;
        let [output] = output_format.as_slice() else {
            return Err(HarnessError::TensorCountMismatch {
                expected: 1,
                actual: output_format.len(),
            })
            .context("Segmentation models have a single output");
        };
        if !matches!(
            output.element_type,
            ElementType::Int32 | ElementType::Int64 | ElementType::Uint8
        ) {
            return Err(HarnessError::UnsupportedElementType(output.element_type))
                .context("Segmentation output must hold integer class ids");
        }
        if output.element_count != pixels {
            return Err(HarnessError::TensorSizeMismatch {
                expected: pixels,
                actual: output.element_count,
            })
            .context("Segmentation output must hold one class per pixel");
        }

        let extensions: Vec<&str> = RAW_EXTENSIONS
            .iter()
            .chain(IMAGE_EXTENSIONS.iter())
            .copied()
            .collect();
        let images = ImageSamples::open(&config.images_directory, &extensions, input_format, |t| {
            PreprocessConfig::full_frame(config.image_width, config.image_height, t)
        })?;

        let class_maps = match config.groundtruth_directory.as_deref() {
            Some(dir) => Some(ClassMaps::open(dir, images.len(), pixels)?),
            None => {
                tracing::warn!("No segmentation ground truth, only measuring performance");
                None
            }
        };

        Ok(Self {
            images,
            pixels,
            class_maps,
            accumulator: IouAccumulator::new(config.num_classes),
        })
    }

    pub fn accumulator(&self) -> &IouAccumulator {
        &self.accumulator
    }
}

/// Class id of each pixel: the low byte of the predicted value.
fn predicted_classes(output: &DataSlot) -> anyhow::Result<Vec<u8>> {
    Ok(match output {
        DataSlot::Int32(v) => v.iter().map(|&x| (x & 0xff) as u8).collect(),
        DataSlot::Int64(v) => v.iter().map(|&x| (x & 0xff) as u8).collect(),
        DataSlot::Uint8(v) => v.clone(),
        other => return Err(HarnessError::UnsupportedElementType(other.element_type()).into()),
    })
}

impl Dataset for Ade20k {
    fn name(&self) -> &str {
        "ade20k"
    }

    fn total_sample_count(&self) -> usize {
        self.images.len()
    }

    fn load_samples_to_ram(&mut self, indices: &[usize]) -> anyhow::Result<()> {
        self.images.load(indices)?;
        if let Some(class_maps) = &mut self.class_maps {
            class_maps.load(indices)?;
        }
        Ok(())
    }

    fn unload_samples_from_ram(&mut self, indices: &[usize]) -> anyhow::Result<()> {
        self.images.unload(indices);
        if let Some(class_maps) = &mut self.class_maps {
            class_maps.unload(indices);
        }
        Ok(())
    }

    fn get_data(&self, index: usize) -> Result<&[DataSlot], HarnessError> {
        self.images.get(index)
    }

    fn process_output(&mut self, index: usize, outputs: &[DataSlot]) -> anyhow::Result<Vec<u8>> {
        expect_outputs(outputs, 1)?;
        let Some(class_maps) = &self.class_maps else {
            return Ok(Vec::new());
        };

        let truth = class_maps.get(index)?;
        let predicted = predicted_classes(&outputs[0])?;
        self.accumulator.update(
            index,
            predicted.into_iter().take(self.pixels),
            truth.iter().copied(),
        );
        Ok(Vec::new())
    }

    fn compute_accuracy_string(&self) -> String {
        if self.class_maps.is_none() {
            return NOT_APPLICABLE.to_string();
        }
        match self.accumulator.mean_iou() {
            Some(miou) => format!("{:.4} mIoU", miou),
            None => NOT_APPLICABLE.to_string(),
        }
    }
}
