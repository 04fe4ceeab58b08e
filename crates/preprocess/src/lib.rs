pub mod config;
pub mod cpu;
pub mod files;

use half::f16;

pub use config::{DEFAULT_INPUT_SIZE, OutputType, PreprocessConfig};
pub use cpu::CpuPreProcessor;
pub use files::sorted_files;

/// Preprocessed image, HWC layout, in the element type requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub enum PreprocessOutput {
    Float32(Vec<f32>),
    Float16(Vec<f16>),
    Uint8(Vec<u8>),
    Int8(Vec<i8>),
}

impl PreprocessOutput {
    pub fn len(&self) -> usize {
        match self {
            Self::Float32(v) => v.len(),
            Self::Float16(v) => v.len(),
            Self::Uint8(v) => v.len(),
            Self::Int8(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Trait for image preprocessing implementations
pub trait Preprocess {
    /// Preprocess an RGB image (HWC, 3 bytes per pixel) into a model input.
    fn preprocess(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> anyhow::Result<PreprocessOutput>;

    /// Load an image from disk and preprocess it.
    ///
    /// `.rgb8` files are taken as already resized raw pixels.
    fn preprocess_file(&mut self, path: &std::path::Path) -> anyhow::Result<PreprocessOutput>;

    /// Get the input size this preprocessor targets
    fn input_size(&self) -> (u32, u32);
}
