pub mod ade20k;
pub mod coco;
pub mod dummy;
pub mod imagenet;
mod images;
pub mod squad;

use crate::errors::HarnessError;
use crate::slot::DataSlot;
use crate::types::DataFormat;

pub use ade20k::{Ade20k, Ade20kConfig};
pub use coco::{Coco, CocoConfig};
pub use dummy::{DummyConfig, DummyDataset, SyntheticProfile};
pub use imagenet::{Imagenet, ImagenetConfig};
pub use squad::{Squad, SquadConfig};

/// Accuracy string of datasets without a metric or without ground truth.
pub const NOT_APPLICABLE: &str = "N/A";

/// One benchmark task: owns its samples, turns model outputs into log blobs and
/// accumulates accuracy as outputs arrive.
pub trait Dataset {
    fn name(&self) -> &str;

    fn total_sample_count(&self) -> usize;

    /// Samples the load generator may keep resident at once during a performance run.
    fn performance_sample_count(&self) -> usize {
        self.total_sample_count()
    }

    /// Load every index not already cached. Loading twice is a no-op.
    fn load_samples_to_ram(&mut self, indices: &[usize]) -> anyhow::Result<()>;

    /// Release the given indices. Unloading an absent index is a no-op.
    fn unload_samples_from_ram(&mut self, indices: &[usize]) -> anyhow::Result<()>;

    /// Cached input tensors of a sample, in input-format order.
    fn get_data(&self, index: usize) -> Result<&[DataSlot], HarnessError>;

    /// Record one inference's outputs and return the blob logged for it.
    fn process_output(&mut self, index: usize, outputs: &[DataSlot]) -> anyhow::Result<Vec<u8>>;

    fn compute_accuracy_string(&self) -> String {
        NOT_APPLICABLE.to_string()
    }
}

#[derive(Debug, Clone, clap::Subcommand)]
pub enum DatasetConfig {
    /// Image classification with top-1 accuracy
    Imagenet(ImagenetConfig),
    /// Object detection with COCO-style mean average precision
    Coco(CocoConfig),
    /// Semantic segmentation with mean IoU
    Ade20k(Ade20kConfig),
    /// Extractive question answering with exact match
    Squad(SquadConfig),
    /// Synthetic inputs, performance only
    Dummy(DummyConfig),
}

impl DatasetConfig {
    pub fn name(&self) -> &'static str {
        match self {
            DatasetConfig::Imagenet(_) => "imagenet",
            DatasetConfig::Coco(_) => "coco",
            DatasetConfig::Ade20k(_) => "ade20k",
            DatasetConfig::Squad(_) => "squad",
            DatasetConfig::Dummy(_) => "dummy",
        }
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(self, DatasetConfig::Dummy(_))
    }
}

/// Build the dataset for a backend's formats. Any mismatch is a configuration error.
pub fn create_dataset(
    config: &DatasetConfig,
    input_format: &DataFormat,
    output_format: &DataFormat,
) -> anyhow::Result<Box<dyn Dataset>> {
    tracing::info!(config = ?config, "Creating dataset");
    Ok(match config {
        DatasetConfig::Imagenet(c) => Box::new(Imagenet::new(c, input_format, output_format)?),
        DatasetConfig::Coco(c) => Box::new(Coco::new(c, input_format, output_format)?),
        DatasetConfig::Ade20k(c) => Box::new(Ade20k::new(c, input_format, output_format)?),
        DatasetConfig::Squad(c) => Box::new(Squad::new(c, input_format, output_format)?),
        DatasetConfig::Dummy(c) => Box::new(DummyDataset::new(c, input_format)?),
    })
}

/// Fail unless exactly `expected` tensors were produced.
pub(crate) fn expect_outputs(outputs: &[DataSlot], expected: usize) -> Result<(), HarnessError> {
    if outputs.len() != expected {
        return Err(HarnessError::TensorCountMismatch {
            expected,
            actual: outputs.len(),
        });
    }
    Ok(())
}
