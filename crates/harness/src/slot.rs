use crate::errors::HarnessError;
use crate::types::{ElementType, TensorDescriptor};
use half::f16;
use preprocess::PreprocessOutput;

/// One tensor's buffer, owned and tagged with its element type.
///
/// Typed accessors fail with [`HarnessError::TypeMismatch`] instead of reinterpreting
/// bytes; [`DataSlot::as_bytes`] is the only untyped view and is used where bytes are
/// handed to an engine or a log.
#[derive(Debug, Clone, PartialEq)]
pub enum DataSlot {
    Float32(Vec<f32>),
    Uint8(Vec<u8>),
    Int8(Vec<i8>),
    Float16(Vec<f16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
}

macro_rules! typed_accessor {
    ($name:ident, $variant:ident, $t:ty) => {
        pub fn $name(&self) -> Result<&[$t], HarnessError> {
            match self {
                DataSlot::$variant(v) => Ok(v.as_slice()),
                other => Err(HarnessError::TypeMismatch {
                    expected: ElementType::$variant,
                    actual: other.element_type(),
                }),
            }
        }
    };
}

impl DataSlot {
    pub fn zeroed(descriptor: &TensorDescriptor) -> Self {
        let n = descriptor.element_count;
        match descriptor.element_type {
            ElementType::Float32 => DataSlot::Float32(vec![0.0; n]),
            ElementType::Uint8 => DataSlot::Uint8(vec![0; n]),
            ElementType::Int8 => DataSlot::Int8(vec![0; n]),
            ElementType::Float16 => DataSlot::Float16(vec![f16::ZERO; n]),
            ElementType::Int32 => DataSlot::Int32(vec![0; n]),
            ElementType::Int64 => DataSlot::Int64(vec![0; n]),
        }
    }

    /// Build a slot from little-endian raw bytes, e.g. an engine output buffer.
    pub fn from_le_bytes(descriptor: &TensorDescriptor, bytes: &[u8]) -> Result<Self, HarnessError> {
        let width = descriptor.element_type.byte_width();
        if bytes.len() != descriptor.byte_len() {
            return Err(HarnessError::TensorSizeMismatch {
                expected: descriptor.element_count,
                actual: bytes.len() / width,
            });
        }
        Ok(match descriptor.element_type {
            ElementType::Float32 => DataSlot::Float32(bytemuck::pod_collect_to_vec(bytes)),
            ElementType::Uint8 => DataSlot::Uint8(bytes.to_vec()),
            ElementType::Int8 => DataSlot::Int8(bytemuck::pod_collect_to_vec(bytes)),
            ElementType::Float16 => DataSlot::Float16(bytemuck::pod_collect_to_vec(bytes)),
            ElementType::Int32 => DataSlot::Int32(bytemuck::pod_collect_to_vec(bytes)),
            ElementType::Int64 => DataSlot::Int64(bytemuck::pod_collect_to_vec(bytes)),
        })
    }

    pub fn element_type(&self) -> ElementType {
        match self {
            DataSlot::Float32(_) => ElementType::Float32,
            DataSlot::Uint8(_) => ElementType::Uint8,
            DataSlot::Int8(_) => ElementType::Int8,
            DataSlot::Float16(_) => ElementType::Float16,
            DataSlot::Int32(_) => ElementType::Int32,
            DataSlot::Int64(_) => ElementType::Int64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            DataSlot::Float32(v) => v.len(),
            DataSlot::Uint8(v) => v.len(),
            DataSlot::Int8(v) => v.len(),
            DataSlot::Float16(v) => v.len(),
            DataSlot::Int32(v) => v.len(),
            DataSlot::Int64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn byte_len(&self) -> usize {
        self.len() * self.element_type().byte_width()
    }

    pub fn descriptor(&self) -> TensorDescriptor {
        TensorDescriptor::new(self.element_type(), self.len())
    }

    /// Raw bytes in native (little-endian on every supported target) order.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            DataSlot::Float32(v) => bytemuck::cast_slice(v),
            DataSlot::Uint8(v) => v.as_slice(),
            DataSlot::Int8(v) => bytemuck::cast_slice(v),
            DataSlot::Float16(v) => bytemuck::cast_slice(v),
            DataSlot::Int32(v) => bytemuck::cast_slice(v),
            DataSlot::Int64(v) => bytemuck::cast_slice(v),
        }
    }

    typed_accessor!(as_f32, Float32, f32);
    typed_accessor!(as_u8, Uint8, u8);
    typed_accessor!(as_i8, Int8, i8);
    typed_accessor!(as_f16, Float16, f16);
    typed_accessor!(as_i32, Int32, i32);
    typed_accessor!(as_i64, Int64, i64);

    /// Fail unless this slot has exactly the described type and element count.
    pub fn check(&self, descriptor: &TensorDescriptor) -> Result<(), HarnessError> {
        if self.element_type() != descriptor.element_type {
            return Err(HarnessError::TypeMismatch {
                expected: descriptor.element_type,
                actual: self.element_type(),
            });
        }
        if self.len() != descriptor.element_count {
            return Err(HarnessError::TensorSizeMismatch {
                expected: descriptor.element_count,
                actual: self.len(),
            });
        }
        Ok(())
    }

    /// Widen every element to `f32` for metric code that doesn't care about the type.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        match self {
            DataSlot::Float32(v) => v.clone(),
            DataSlot::Uint8(v) => v.iter().map(|&x| x as f32).collect(),
            DataSlot::Int8(v) => v.iter().map(|&x| x as f32).collect(),
            DataSlot::Float16(v) => v.iter().map(|x| x.to_f32()).collect(),
            DataSlot::Int32(v) => v.iter().map(|&x| x as f32).collect(),
            DataSlot::Int64(v) => v.iter().map(|&x| x as f32).collect(),
        }
    }
}

impl From<PreprocessOutput> for DataSlot {
    fn from(output: PreprocessOutput) -> Self {
        match output {
            PreprocessOutput::Float32(v) => DataSlot::Float32(v),
            PreprocessOutput::Float16(v) => DataSlot::Float16(v),
            PreprocessOutput::Uint8(v) => DataSlot::Uint8(v),
            PreprocessOutput::Int8(v) => DataSlot::Int8(v),
        }
    }
}

/// Check a whole set of tensors against a format: count first, then each slot.
pub fn validate_slots(format: &[TensorDescriptor], slots: &[DataSlot]) -> Result<(), HarnessError> {
    if format.len() != slots.len() {
        return Err(HarnessError::TensorCountMismatch {
            expected: format.len(),
            actual: slots.len(),
        });
    }
    format
        .iter()
        .zip(slots)
        .try_for_each(|(descriptor, slot)| slot.check(descriptor))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroed_matches_descriptor() {
        for t in ElementType::ALL {
            let d = TensorDescriptor::new(t, 5);
            let slot = DataSlot::zeroed(&d);
            assert_eq!(slot.descriptor(), d);
            assert_eq!(slot.byte_len(), d.byte_len());
            assert_eq!(slot.as_bytes().len(), d.byte_len());
            assert!(slot.as_bytes().iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn wrong_typed_access_fails_fast() {
        let slot = DataSlot::Int32(vec![1, 2, 3]);
        assert_eq!(slot.as_i32().unwrap(), &[1, 2, 3]);
        match slot.as_f32() {
            Err(HarnessError::TypeMismatch { expected, actual }) => {
                assert_eq!(expected, ElementType::Float32);
                assert_eq!(actual, ElementType::Int32);
            }
            other => panic!("expected type mismatch, got {other:?}"),
        }
    }

    #[test]
    fn from_le_bytes_decodes_values() {
        let d = TensorDescriptor::new(ElementType::Int32, 2);
        let bytes = [7i32.to_le_bytes(), (-2i32).to_le_bytes()].concat();
        let slot = DataSlot::from_le_bytes(&d, &bytes).unwrap();
        assert_eq!(slot, DataSlot::Int32(vec![7, -2]));
        assert_eq!(slot.as_bytes(), bytes.as_slice());

        let f = TensorDescriptor::new(ElementType::Float16, 1);
        let slot = DataSlot::from_le_bytes(&f, &f16::from_f32(0.5).to_le_bytes()).unwrap();
        assert_eq!(slot.to_f32_vec(), vec![0.5]);
    }

    #[test]
    fn from_le_bytes_rejects_wrong_length() {
        let d = TensorDescriptor::new(ElementType::Float32, 4);
        assert!(matches!(
            DataSlot::from_le_bytes(&d, &[0u8; 12]),
            Err(HarnessError::TensorSizeMismatch {
                expected: 4,
                actual: 3
            })
        ));
    }

    #[test]
    fn validate_reports_count_then_shape() {
        let format = vec![
            TensorDescriptor::new(ElementType::Float32, 2),
            TensorDescriptor::new(ElementType::Uint8, 3),
        ];
        let good = vec![DataSlot::Float32(vec![0.0; 2]), DataSlot::Uint8(vec![0; 3])];
        assert!(validate_slots(&format, &good).is_ok());

        assert!(matches!(
            validate_slots(&format, &good[..1]),
            Err(HarnessError::TensorCountMismatch {
                expected: 2,
                actual: 1
            })
        ));

        let short = vec![DataSlot::Float32(vec![0.0; 2]), DataSlot::Uint8(vec![0; 2])];
        assert!(matches!(
            validate_slots(&format, &short),
            Err(HarnessError::TensorSizeMismatch { .. })
        ));

        let swapped = vec![DataSlot::Uint8(vec![0; 2]), DataSlot::Uint8(vec![0; 3])];
        assert!(matches!(
            validate_slots(&format, &swapped),
            Err(HarnessError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn widening_to_f32() {
        assert_eq!(DataSlot::Int8(vec![-3, 4]).to_f32_vec(), vec![-3.0, 4.0]);
        assert_eq!(DataSlot::Int64(vec![1 << 20]).to_f32_vec(), vec![1048576.0]);
    }
}
