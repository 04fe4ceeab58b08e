use crate::types::ElementType;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Sample {0} is not loaded")]
    SampleNotLoaded(usize),

    #[error("Sample index {index} out of range (total {total})")]
    SampleOutOfRange { index: usize, total: usize },

    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: ElementType,
        actual: ElementType,
    },

    #[error("Tensor count mismatch: expected {expected}, got {actual}")]
    TensorCountMismatch { expected: usize, actual: usize },

    #[error("Tensor size mismatch: expected {expected} elements, got {actual}")]
    TensorSizeMismatch { expected: usize, actual: usize },

    #[error("Unsupported element type: {0}")]
    UnsupportedElementType(ElementType),

    #[error("Invalid ground truth: {0}")]
    InvalidGroundTruth(String),

    #[error("Dataset is empty")]
    EmptyDataset,

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Unsupported mode: {0}")]
    UnsupportedMode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_formatting() {
        assert_eq!(
            HarnessError::SampleNotLoaded(7).to_string(),
            "Sample 7 is not loaded"
        );
        assert_eq!(
            HarnessError::SampleOutOfRange {
                index: 10,
                total: 10
            }
            .to_string(),
            "Sample index 10 out of range (total 10)"
        );
        assert_eq!(
            HarnessError::TypeMismatch {
                expected: ElementType::Float32,
                actual: ElementType::Int8,
            }
            .to_string(),
            "Type mismatch: expected float32, got int8"
        );
        assert_eq!(
            HarnessError::UnsupportedElementType(ElementType::Int64).to_string(),
            "Unsupported element type: int64"
        );
    }

    #[test]
    fn test_error_conversion_from_io_error() {
        fn uses_question_mark() -> Result<(), HarnessError> {
            Err(io::Error::other("disk gone"))?;
            Ok(())
        }

        match uses_question_mark().unwrap_err() {
            HarnessError::Io(e) => assert_eq!(e.to_string(), "disk gone"),
            other => panic!("Expected Io variant, got {other:?}"),
        }
    }
}
