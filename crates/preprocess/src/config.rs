/// Default model input size (width, height) for the classification models.
pub const DEFAULT_INPUT_SIZE: (u32, u32) = (224, 224);

/// Fraction of the source image kept by the central crop for classification.
pub const DEFAULT_CROPPING_FRACTION: f32 = 0.875;

/// File extension of pre-resized raw RGB images.
pub const RAW_IMAGE_EXTENSION: &str = "rgb8";

/// Element type the preprocessed pixels are converted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputType {
    /// `(x - 127.5) / 127.5`, i.e. [-1, 1]
    Float32,
    /// Same scaling as `Float32`, stored as IEEE half precision
    Float16,
    /// Raw pixel values
    Uint8,
    /// `x - 128`
    Int8,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreprocessConfig {
    pub width: u32,
    pub height: u32,
    /// Central fraction of the source kept before resizing, in (0, 1].
    pub cropping_fraction: f32,
    /// Resize so the image covers the target and center-crop the excess, instead of
    /// stretching it to the target shape.
    pub aspect_preserving: bool,
    pub output_type: OutputType,
}

impl PreprocessConfig {
    /// Classification defaults: 87.5% central crop, aspect preserving.
    pub fn classification(width: u32, height: u32, output_type: OutputType) -> Self {
        Self {
            width,
            height,
            cropping_fraction: DEFAULT_CROPPING_FRACTION,
            aspect_preserving: true,
            output_type,
        }
    }

    /// Detection and segmentation keep the whole frame.
    pub fn full_frame(width: u32, height: u32, output_type: OutputType) -> Self {
        Self {
            width,
            height,
            cropping_fraction: 1.0,
            aspect_preserving: true,
            output_type,
        }
    }

    /// Number of elements in one preprocessed image (HWC, 3 channels).
    pub fn element_count(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self::classification(DEFAULT_INPUT_SIZE.0, DEFAULT_INPUT_SIZE.1, OutputType::Float32)
    }
}
