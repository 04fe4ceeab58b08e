use super::Dataset;
use crate::cache::SampleCache;
use crate::errors::HarnessError;
use crate::slot::DataSlot;
use crate::types::{DataFormat, ElementType, TensorDescriptor};
use anyhow::Context;
use half::f16;

/// Vocabulary size of the MobileBERT word-piece ids.
pub const MOBILEBERT_VOCAB_SIZE: i32 = 30000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum SyntheticProfile {
    /// Any input layout; floats in [0, 1), integers over their full range
    #[default]
    Generic,
    /// Three int32 inputs: token ids, attention mask, segment ids
    MobileBert,
}

#[derive(Debug, Clone, clap::Args)]
pub struct DummyConfig {
    #[arg(long, default_value_t = 1024)]
    pub sample_count: usize,
    #[arg(long, value_enum, default_value_t = SyntheticProfile::Generic)]
    pub profile: SyntheticProfile,
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
}

/// Pseudo-random inputs for throughput measurement.
///
/// Each sample is generated from its own seed, so reloading an index yields the same data.
pub struct DummyDataset {
    profile: SyntheticProfile,
    seed: u64,
    cache: SampleCache,
}

impl DummyDataset {
    pub fn new(config: &DummyConfig, input_format: &DataFormat) -> anyhow::Result<Self> {
        if config.sample_count == 0 {
            return Err(HarnessError::EmptyDataset).context("Synthetic sample count must be positive");
        }
        if config.profile == SyntheticProfile::MobileBert {
            check_mobilebert(input_format)
                .context("The MobileBERT profile needs three int32 inputs")?;
        }
        tracing::info!(
            samples = config.sample_count,
            profile = ?config.profile,
            inputs = input_format.len(),
            "Synthetic dataset"
        );
        Ok(Self {
            profile: config.profile,
            seed: config.seed,
            cache: SampleCache::new(input_format.clone(), config.sample_count),
        })
    }
}

fn check_mobilebert(input_format: &DataFormat) -> Result<(), HarnessError> {
    if input_format.len() != 3 {
        return Err(HarnessError::TensorCountMismatch {
            expected: 3,
            actual: input_format.len(),
        });
    }
    if let Some(d) = input_format
        .iter()
        .find(|d| d.element_type != ElementType::Int32)
    {
        return Err(HarnessError::TypeMismatch {
            expected: ElementType::Int32,
            actual: d.element_type,
        });
    }
    Ok(())
}

fn random_slot(rng: &mut fastrand::Rng, descriptor: &TensorDescriptor) -> DataSlot {
    let n = descriptor.element_count;
    match descriptor.element_type {
        ElementType::Float32 => DataSlot::Float32((0..n).map(|_| rng.f32()).collect()),
        ElementType::Float16 => {
            DataSlot::Float16((0..n).map(|_| f16::from_f32(rng.f32())).collect())
        }
        ElementType::Uint8 => DataSlot::Uint8((0..n).map(|_| rng.u8(..)).collect()),
        ElementType::Int8 => DataSlot::Int8((0..n).map(|_| rng.i8(..)).collect()),
        ElementType::Int32 => DataSlot::Int32((0..n).map(|_| rng.i32(..)).collect()),
        ElementType::Int64 => DataSlot::Int64((0..n).map(|_| rng.i64(..)).collect()),
    }
}

fn mobilebert_sample(rng: &mut fastrand::Rng, format: &DataFormat) -> Vec<DataSlot> {
    format
        .iter()
        .enumerate()
        .map(|(i, d)| {
            let values = (0..d.element_count).map(|_| match i {
                0 => rng.i32(0..MOBILEBERT_VOCAB_SIZE),
                _ => rng.i32(0..=1),
            });
            DataSlot::Int32(values.collect())
        })
        .collect()
}

impl Dataset for DummyDataset {
    fn name(&self) -> &str {
        "dummy"
    }

    fn total_sample_count(&self) -> usize {
        self.cache.total()
    }

    fn load_samples_to_ram(&mut self, indices: &[usize]) -> anyhow::Result<()> {
        let format = self.cache.format().clone();
        let profile = self.profile;
        let seed = self.seed;
        self.cache.load_with(indices, |index| {
            let mut rng = fastrand::Rng::with_seed(seed.wrapping_add(index as u64));
            Ok(match profile {
                SyntheticProfile::Generic => {
                    format.iter().map(|d| random_slot(&mut rng, d)).collect()
                }
                SyntheticProfile::MobileBert => mobilebert_sample(&mut rng, &format),
            })
        })?;
        Ok(())
    }

    fn unload_samples_from_ram(&mut self, indices: &[usize]) -> anyhow::Result<()> {
        self.cache.unload(indices);
        Ok(())
    }

    fn get_data(&self, index: usize) -> Result<&[DataSlot], HarnessError> {
        self.cache.get(index)
    }

    /// Outputs are not scored; the logged blob is the sample index as a little-endian u64.
    fn process_output(&mut self, index: usize, _outputs: &[DataSlot]) -> anyhow::Result<Vec<u8>> {
        Ok((index as u64).to_le_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::NOT_APPLICABLE;

    fn config(sample_count: usize, profile: SyntheticProfile) -> DummyConfig {
        DummyConfig {
            sample_count,
            profile,
            seed: 7,
        }
    }

    #[test]
    fn generic_profile_honors_element_types() {
        let format = vec![
            TensorDescriptor::new(ElementType::Float32, 16),
            TensorDescriptor::new(ElementType::Int8, 5),
        ];
        let mut dataset = DummyDataset::new(&config(4, SyntheticProfile::Generic), &format).unwrap();
        dataset.load_samples_to_ram(&[0, 3]).unwrap();

        let sample = dataset.get_data(3).unwrap();
        assert_eq!(sample[0].descriptor(), format[0]);
        assert_eq!(sample[1].descriptor(), format[1]);
        assert!(sample[0].as_f32().unwrap().iter().all(|v| (0.0..1.0).contains(v)));
        assert!(dataset.get_data(1).is_err());
    }

    #[test]
    fn mobilebert_profile_respects_ranges() {
        let format = vec![TensorDescriptor::new(ElementType::Int32, 384); 3];
        let mut dataset =
            DummyDataset::new(&config(2, SyntheticProfile::MobileBert), &format).unwrap();
        dataset.load_samples_to_ram(&[0, 1]).unwrap();

        let sample = dataset.get_data(1).unwrap();
        let ids = sample[0].as_i32().unwrap();
        assert!(ids.iter().all(|&v| (0..MOBILEBERT_VOCAB_SIZE).contains(&v)));
        for slot in &sample[1..] {
            assert!(slot.as_i32().unwrap().iter().all(|&v| v == 0 || v == 1));
        }
    }

    #[test]
    fn mobilebert_profile_rejects_other_layouts() {
        let format = vec![TensorDescriptor::new(ElementType::Float32, 4)];
        assert!(DummyDataset::new(&config(2, SyntheticProfile::MobileBert), &format).is_err());
    }

    #[test]
    fn reloading_reproduces_the_sample() {
        let format = vec![TensorDescriptor::new(ElementType::Uint8, 32)];
        let mut dataset = DummyDataset::new(&config(2, SyntheticProfile::Generic), &format).unwrap();
        dataset.load_samples_to_ram(&[1]).unwrap();
        let first = dataset.get_data(1).unwrap().to_vec();
        dataset.unload_samples_from_ram(&[1]).unwrap();
        dataset.load_samples_to_ram(&[1]).unwrap();
        assert_eq!(dataset.get_data(1).unwrap(), first.as_slice());
    }

    #[test]
    fn outputs_are_not_scored() {
        let format = vec![TensorDescriptor::new(ElementType::Float32, 4)];
        let mut dataset = DummyDataset::new(&config(1, SyntheticProfile::Generic), &format).unwrap();
        let blob = dataset
            .process_output(0, &[DataSlot::Float32(vec![0.0; 4])])
            .unwrap();
        assert_eq!(blob, 0u64.to_le_bytes());
        assert_eq!(dataset.compute_accuracy_string(), NOT_APPLICABLE);
    }
}
