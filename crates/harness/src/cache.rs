use crate::errors::HarnessError;
use crate::slot::{DataSlot, validate_slots};
use crate::types::DataFormat;
use std::collections::HashMap;

/// Index-addressed store of preprocessed samples, one [`DataSlot`] per input tensor.
///
/// Every cached entry has been validated against the input format, so readers can
/// hand the slots straight to a backend.
#[derive(Debug)]
pub struct SampleCache {
    format: DataFormat,
    total: usize,
    samples: HashMap<usize, Vec<DataSlot>>,
}

impl SampleCache {
    pub fn new(format: DataFormat, total: usize) -> Self {
        Self {
            format,
            total,
            samples: HashMap::new(),
        }
    }

    pub fn format(&self) -> &DataFormat {
        &self.format
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Produce and insert every index not already cached.
    ///
    /// Indices are range-checked before anything is produced; the first failing
    /// sample aborts the call, leaving the samples produced before it cached.
    pub fn load_with<F>(&mut self, indices: &[usize], mut produce: F) -> anyhow::Result<usize>
    where
        F: FnMut(usize) -> anyhow::Result<Vec<DataSlot>>,
    {
        if let Some(&index) = indices.iter().find(|&&i| i >= self.total) {
            return Err(HarnessError::SampleOutOfRange {
                index,
                total: self.total,
            }
            .into());
        }

        let mut loaded = 0;
        for &index in indices {
            if self.samples.contains_key(&index) {
                continue;
            }
            let slots = produce(index)?;
            validate_slots(&self.format, &slots)?;
            self.samples.insert(index, slots);
            loaded += 1;
        }

        tracing::trace!(requested = indices.len(), loaded, cached = self.samples.len(), "Loaded samples");
        Ok(loaded)
    }

    /// Drop the given indices; absent ones are ignored.
    pub fn unload(&mut self, indices: &[usize]) -> usize {
        let removed = indices
            .iter()
            .filter(|&&i| self.samples.remove(&i).is_some())
            .count();
        tracing::trace!(requested = indices.len(), removed, cached = self.samples.len(), "Unloaded samples");
        removed
    }

    pub fn get(&self, index: usize) -> Result<&[DataSlot], HarnessError> {
        self.samples
            .get(&index)
            .map(Vec::as_slice)
            .ok_or(HarnessError::SampleNotLoaded(index))
    }

    pub fn contains(&self, index: usize) -> bool {
        self.samples.contains_key(&index)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
