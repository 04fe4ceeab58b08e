use crate::config::{OutputType, PreprocessConfig, RAW_IMAGE_EXTENSION};
use crate::{Preprocess, PreprocessOutput};
use anyhow::Context;
use common::span;
use fast_image_resize::{
    FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer,
    images::{Image, ImageRef},
};
use half::f16;
use ndarray::{ArrayView3, s};
use std::path::Path;

const PIXEL_CENTER: f32 = 127.5;

pub struct CpuPreProcessor {
    config: PreprocessConfig,
    resizer: Resizer,
}

impl CpuPreProcessor {
    pub fn new(config: PreprocessConfig) -> Self {
        Self {
            config,
            resizer: Resizer::new(),
        }
    }

    pub fn preprocess_from_u8_slice(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> anyhow::Result<PreprocessOutput> {
        let _s = span!("preprocess_image");

        let expected_size = width as usize * height as usize * 3;
        if pixels.len() != expected_size {
            anyhow::bail!(
                "Buffer size mismatch: expected {}, got {} bytes",
                expected_size,
                pixels.len()
            );
        }
        if width == 0 || height == 0 {
            anyhow::bail!("Empty image ({}x{})", width, height);
        }

        let (cropped, crop_w, crop_h) =
            Self::central_crop(pixels, width, height, self.config.cropping_fraction)?;

        let (target_w, target_h) = (self.config.width, self.config.height);
        let (resize_w, resize_h) = if self.config.aspect_preserving {
            let scale = (target_w as f32 / crop_w as f32).max(target_h as f32 / crop_h as f32);
            (
                ((crop_w as f32 * scale).round() as u32).max(target_w),
                ((crop_h as f32 * scale).round() as u32).max(target_h),
            )
        } else {
            (target_w, target_h)
        };

        tracing::trace!(
            width,
            height,
            crop_w,
            crop_h,
            resize_w,
            resize_h,
            "Preprocessing image dimensions"
        );

        let resized = self.resize(&cropped, crop_w, crop_h, resize_w, resize_h)?;
        let (output, _, _) = Self::central_crop_to(&resized, resize_w, resize_h, target_w, target_h)?;

        Ok(Self::convert(&output, self.config.output_type))
    }

    /// Read a pre-resized raw RGB file; its size must match the target exactly.
    pub fn load_raw(&self, path: &Path) -> anyhow::Result<PreprocessOutput> {
        let _s = span!("load_raw_image");

        let pixels = std::fs::read(path)
            .with_context(|| format!("Failed to read raw image {}", path.display()))?;
        let expected_size = self.config.element_count();
        if pixels.len() != expected_size {
            anyhow::bail!(
                "Raw image size mismatch for {}: expected {}, got {} bytes",
                path.display(),
                expected_size,
                pixels.len()
            );
        }
        Ok(Self::convert(&pixels, self.config.output_type))
    }

    fn central_crop(
        pixels: &[u8],
        width: u32,
        height: u32,
        fraction: f32,
    ) -> anyhow::Result<(Vec<u8>, u32, u32)> {
        if !(fraction > 0.0 && fraction <= 1.0) {
            anyhow::bail!("Cropping fraction must be in (0, 1], got {}", fraction);
        }
        let crop_w = ((width as f32 * fraction).round() as u32).clamp(1, width);
        let crop_h = ((height as f32 * fraction).round() as u32).clamp(1, height);
        Self::central_crop_to(pixels, width, height, crop_w, crop_h)
    }

    fn central_crop_to(
        pixels: &[u8],
        width: u32,
        height: u32,
        crop_w: u32,
        crop_h: u32,
    ) -> anyhow::Result<(Vec<u8>, u32, u32)> {
        if crop_w == width && crop_h == height {
            return Ok((pixels.to_vec(), width, height));
        }
        let view = ArrayView3::from_shape((height as usize, width as usize, 3), pixels)?;
        let y0 = ((height - crop_h) / 2) as usize;
        let x0 = ((width - crop_w) / 2) as usize;
        let window = view.slice(s![
            y0..y0 + crop_h as usize,
            x0..x0 + crop_w as usize,
            ..
        ]);
        Ok((window.iter().copied().collect(), crop_w, crop_h))
    }

    fn resize(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        new_width: u32,
        new_height: u32,
    ) -> anyhow::Result<Vec<u8>> {
        if width == new_width && height == new_height {
            return Ok(pixels.to_vec());
        }
        let _s = span!("resize");

        let src = ImageRef::new(width, height, pixels, PixelType::U8x3)?;
        let mut resized = Image::new(new_width, new_height, PixelType::U8x3);

        self.resizer.resize(
            &src,
            &mut resized,
            &ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Bilinear)),
        )?;

        Ok(resized.buffer().to_vec())
    }

    fn convert(pixels: &[u8], output_type: OutputType) -> PreprocessOutput {
        match output_type {
            OutputType::Float32 => PreprocessOutput::Float32(
                pixels
                    .iter()
                    .map(|&p| (p as f32 - PIXEL_CENTER) / PIXEL_CENTER)
                    .collect(),
            ),
            OutputType::Float16 => PreprocessOutput::Float16(
                pixels
                    .iter()
                    .map(|&p| f16::from_f32((p as f32 - PIXEL_CENTER) / PIXEL_CENTER))
                    .collect(),
            ),
            OutputType::Uint8 => PreprocessOutput::Uint8(pixels.to_vec()),
            OutputType::Int8 => {
                PreprocessOutput::Int8(pixels.iter().map(|&p| (p as i16 - 128) as i8).collect())
            }
        }
    }
}

impl Default for CpuPreProcessor {
    fn default() -> Self {
        Self::new(PreprocessConfig::default())
    }
}

impl Preprocess for CpuPreProcessor {
    fn preprocess(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> anyhow::Result<PreprocessOutput> {
        self.preprocess_from_u8_slice(pixels, width, height)
    }

    fn preprocess_file(&mut self, path: &Path) -> anyhow::Result<PreprocessOutput> {
        let is_raw = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(RAW_IMAGE_EXTENSION));
        if is_raw {
            return self.load_raw(path);
        }

        let image = {
            let _s = span!("decode_image");
            image::open(path)
                .with_context(|| format!("Failed to decode image {}", path.display()))?
                .to_rgb8()
        };
        let (width, height) = image.dimensions();
        self.preprocess_from_u8_slice(image.as_raw(), width, height)
    }

    fn input_size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(width: u32, height: u32, fraction: f32, output_type: OutputType) -> PreprocessConfig {
        PreprocessConfig {
            width,
            height,
            cropping_fraction: fraction,
            aspect_preserving: true,
            output_type,
        }
    }

    #[test]
    fn test_float_scaling() {
        let pixels = vec![255u8, 0, 128].repeat(16 * 16);
        let mut preprocessor = CpuPreProcessor::new(config(8, 8, 1.0, OutputType::Float32));

        let PreprocessOutput::Float32(values) = preprocessor.preprocess(&pixels, 16, 16).unwrap()
        else {
            panic!("expected float32 output");
        };
        assert_eq!(values.len(), 8 * 8 * 3);
        assert!((values[0] - 1.0).abs() < 1e-6);
        assert!((values[1] + 1.0).abs() < 1e-6);
        assert!((values[2] - 0.5 / 127.5).abs() < 1e-6);
    }

    #[test]
    fn test_int8_and_float16_conversion() {
        let pixels = vec![0u8, 128, 255].repeat(4);

        let mut int8 = CpuPreProcessor::new(config(2, 2, 1.0, OutputType::Int8));
        assert_eq!(
            int8.preprocess(&pixels, 2, 2).unwrap(),
            PreprocessOutput::Int8(vec![-128, 0, 127].repeat(4))
        );

        let mut half = CpuPreProcessor::new(config(2, 2, 1.0, OutputType::Float16));
        let PreprocessOutput::Float16(values) = half.preprocess(&pixels, 2, 2).unwrap() else {
            panic!("expected float16 output");
        };
        assert_eq!(values[0], f16::from_f32(-1.0));
        assert_eq!(values[2], f16::from_f32(1.0));
    }

    #[test]
    fn test_central_crop_keeps_middle() {
        // 4x4 image where pixel value encodes its position.
        let pixels: Vec<u8> = (0..16u8).flat_map(|i| [i, i, i]).collect();
        let mut preprocessor = CpuPreProcessor::new(config(2, 2, 0.5, OutputType::Uint8));

        let PreprocessOutput::Uint8(values) = preprocessor.preprocess(&pixels, 4, 4).unwrap()
        else {
            panic!("expected uint8 output");
        };
        let firsts: Vec<u8> = values.chunks_exact(3).map(|px| px[0]).collect();
        assert_eq!(firsts, vec![5, 6, 9, 10]);
    }

    #[test]
    fn test_aspect_preserving_output_shape() {
        let pixels = vec![77u8; 800 * 600 * 3];
        let mut preprocessor = CpuPreProcessor::new(config(224, 224, 0.875, OutputType::Uint8));

        let output = preprocessor.preprocess(&pixels, 800, 600).unwrap();
        assert_eq!(output.len(), 224 * 224 * 3);
        assert_eq!(output, PreprocessOutput::Uint8(vec![77; 224 * 224 * 3]));
    }

    #[test]
    fn test_buffer_size_mismatch_detection() {
        let pixels = vec![0u8; 200];
        let mut preprocessor = CpuPreProcessor::default();

        let result = preprocessor.preprocess(&pixels, 10, 10);
        assert!(result.is_err(), "Size mismatch should return error");
        assert!(result.unwrap_err().to_string().contains("mismatch"));
    }

    #[test]
    fn test_invalid_cropping_fraction() {
        let pixels = vec![0u8; 4 * 4 * 3];
        let mut preprocessor = CpuPreProcessor::new(config(2, 2, 0.0, OutputType::Uint8));
        assert!(preprocessor.preprocess(&pixels, 4, 4).is_err());
    }

    #[test]
    fn test_raw_image_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.rgb8");
        std::fs::write(&path, vec![128u8; 2 * 2 * 3]).unwrap();

        let mut preprocessor = CpuPreProcessor::new(config(2, 2, 0.875, OutputType::Uint8));
        assert_eq!(
            preprocessor.preprocess_file(&path).unwrap(),
            PreprocessOutput::Uint8(vec![128; 12])
        );

        let mut wrong_size = CpuPreProcessor::new(config(3, 3, 1.0, OutputType::Uint8));
        assert!(wrong_size.preprocess_file(&path).is_err());
    }

    #[test]
    fn test_decoded_png_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("red.png");
        image::RgbImage::from_pixel(10, 6, image::Rgb([255, 0, 0]))
            .save(&path)
            .unwrap();

        let mut preprocessor = CpuPreProcessor::new(config(4, 4, 1.0, OutputType::Uint8));
        let output = preprocessor.preprocess_file(&path).unwrap();
        assert_eq!(output, PreprocessOutput::Uint8([255u8, 0, 0].repeat(16)));
        assert_eq!(preprocessor.input_size(), (4, 4));
    }
}
