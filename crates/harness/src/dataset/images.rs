use crate::cache::SampleCache;
use crate::errors::HarnessError;
use crate::slot::DataSlot;
use crate::types::{DataFormat, TensorDescriptor};
use anyhow::Context;
use preprocess::{CpuPreProcessor, OutputType, Preprocess, PreprocessConfig, sorted_files};
use std::path::{Path, PathBuf};

pub(crate) const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];
pub(crate) const RAW_EXTENSIONS: [&str; 1] = [preprocess::config::RAW_IMAGE_EXTENSION];

/// Sorted image files decoded on load into a one-tensor sample cache.
pub(crate) struct ImageSamples {
    files: Vec<PathBuf>,
    preprocessor: CpuPreProcessor,
    cache: SampleCache,
}

impl ImageSamples {
    /// `build_config` receives the element type requested by the model's single input.
    pub(crate) fn open<F>(
        dir: &Path,
        extensions: &[&str],
        input_format: &DataFormat,
        build_config: F,
    ) -> anyhow::Result<Self>
    where
        F: FnOnce(OutputType) -> PreprocessConfig,
    {
        let [input] = input_format.as_slice() else {
            return Err(HarnessError::TensorCountMismatch {
                expected: 1,
                actual: input_format.len(),
            }
            .into());
        };

        let output_type = OutputType::try_from(input.element_type)?;
        let config = build_config(output_type);
        let expected = TensorDescriptor::new(input.element_type, config.element_count());
        if expected != *input {
            anyhow::bail!(
                "Model input {} does not hold a {}x{} RGB image ({} elements)",
                input,
                config.width,
                config.height,
                config.element_count()
            );
        }

        let files = sorted_files(dir, extensions)
            .with_context(|| format!("Failed to list images in {}", dir.display()))?;
        if files.is_empty() {
            return Err(HarnessError::EmptyDataset).with_context(|| {
                format!("No {:?} files in {}", extensions, dir.display())
            });
        }
        tracing::info!(dir = %dir.display(), images = files.len(), "Found images");

        let cache = SampleCache::new(input_format.clone(), files.len());
        Ok(Self {
            files,
            preprocessor: CpuPreProcessor::new(config),
            cache,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.files.len()
    }

    pub(crate) fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub(crate) fn load(&mut self, indices: &[usize]) -> anyhow::Result<()> {
        let _s = common::span_debug!("load_images");
        let files = &self.files;
        let preprocessor = &mut self.preprocessor;
        self.cache.load_with(indices, |index| {
            let output = preprocessor.preprocess_file(&files[index])?;
            Ok(vec![DataSlot::from(output)])
        })?;
        Ok(())
    }

    pub(crate) fn unload(&mut self, indices: &[usize]) {
        self.cache.unload(indices);
    }

    pub(crate) fn get(&self, index: usize) -> Result<&[DataSlot], HarnessError> {
        self.cache.get(index)
    }
}
