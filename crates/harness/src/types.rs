use crate::errors::HarnessError;
use preprocess::OutputType;
use std::fmt;
use std::str::FromStr;

/// Numeric type of a tensor's elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    Float32,
    Uint8,
    Int8,
    Float16,
    Int32,
    Int64,
}

impl ElementType {
    pub const ALL: [ElementType; 6] = [
        ElementType::Float32,
        ElementType::Uint8,
        ElementType::Int8,
        ElementType::Float16,
        ElementType::Int32,
        ElementType::Int64,
    ];

    pub fn byte_width(&self) -> usize {
        match self {
            ElementType::Uint8 | ElementType::Int8 => 1,
            ElementType::Float16 => 2,
            ElementType::Float32 | ElementType::Int32 => 4,
            ElementType::Int64 => 8,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ElementType::Float32 => "float32",
            ElementType::Uint8 => "uint8",
            ElementType::Int8 => "int8",
            ElementType::Float16 => "float16",
            ElementType::Int32 => "int32",
            ElementType::Int64 => "int64",
        }
    }
}

impl FromStr for ElementType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "float32" | "f32" => Ok(ElementType::Float32),
            "uint8" | "u8" => Ok(ElementType::Uint8),
            "int8" | "i8" => Ok(ElementType::Int8),
            "float16" | "f16" => Ok(ElementType::Float16),
            "int32" | "i32" => Ok(ElementType::Int32),
            "int64" | "i64" => Ok(ElementType::Int64),
            _ => Err(format!("Unknown element type: {}", s)),
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<OutputType> for ElementType {
    fn from(output_type: OutputType) -> Self {
        match output_type {
            OutputType::Float32 => ElementType::Float32,
            OutputType::Float16 => ElementType::Float16,
            OutputType::Uint8 => ElementType::Uint8,
            OutputType::Int8 => ElementType::Int8,
        }
    }
}

impl TryFrom<ElementType> for OutputType {
    type Error = HarnessError;

    /// Images can only be fed as float or 8-bit tensors.
    fn try_from(element_type: ElementType) -> Result<Self, Self::Error> {
        match element_type {
            ElementType::Float32 => Ok(OutputType::Float32),
            ElementType::Float16 => Ok(OutputType::Float16),
            ElementType::Uint8 => Ok(OutputType::Uint8),
            ElementType::Int8 => Ok(OutputType::Int8),
            other => Err(HarnessError::UnsupportedElementType(other)),
        }
    }
}

/// Element type and element count of one tensor.
///
/// Counts are fixed for the lifetime of a backend; models are never reshaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorDescriptor {
    pub element_type: ElementType,
    pub element_count: usize,
}

impl TensorDescriptor {
    pub fn new(element_type: ElementType, element_count: usize) -> Self {
        Self {
            element_type,
            element_count,
        }
    }

    pub fn byte_len(&self) -> usize {
        self.element_count * self.element_type.byte_width()
    }
}

impl fmt::Display for TensorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.element_type, self.element_count)
    }
}

/// Parses `float32:1024` or the displayed form `float32[1024]`.
impl FromStr for TensorDescriptor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (element_type, count) = match s.split_once(':') {
            Some(parts) => parts,
            None => s
                .strip_suffix(']')
                .and_then(|rest| rest.split_once('['))
                .ok_or_else(|| format!("Expected <type>:<count>, got {}", s))?,
        };
        let element_count = count
            .trim()
            .parse::<usize>()
            .map_err(|e| format!("Invalid element count in {}: {}", s, e))?;
        Ok(Self::new(element_type.parse()?, element_count))
    }
}

/// Ordered tensor descriptors of a model's inputs or outputs.
pub type DataFormat = Vec<TensorDescriptor>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_widths() {
        let widths: Vec<usize> = ElementType::ALL.iter().map(|t| t.byte_width()).collect();
        assert_eq!(widths, vec![4, 1, 1, 2, 4, 8]);
    }

    #[test]
    fn parse_and_display_agree() {
        for t in ElementType::ALL {
            assert_eq!(t.to_string().parse::<ElementType>(), Ok(t));
        }
        assert_eq!(" F16 ".parse::<ElementType>(), Ok(ElementType::Float16));
        assert!("bfloat16".parse::<ElementType>().is_err());
    }

    #[test]
    fn descriptor_byte_len() {
        let d = TensorDescriptor::new(ElementType::Int64, 3);
        assert_eq!(d.byte_len(), 24);
        assert_eq!(d.to_string(), "int64[3]");
        assert_eq!(TensorDescriptor::new(ElementType::Float16, 0).byte_len(), 0);
    }

    #[test]
    fn parse_descriptor() {
        let d = TensorDescriptor::new(ElementType::Int32, 384);
        assert_eq!("int32:384".parse::<TensorDescriptor>(), Ok(d));
        assert_eq!("int32[384]".parse::<TensorDescriptor>(), Ok(d));
        assert!("int32".parse::<TensorDescriptor>().is_err());
        assert!("int32:-1".parse::<TensorDescriptor>().is_err());
    }

    #[test]
    fn image_output_types() {
        assert_eq!(
            OutputType::try_from(ElementType::Int8).unwrap(),
            OutputType::Int8
        );
        assert!(matches!(
            OutputType::try_from(ElementType::Int32),
            Err(HarnessError::UnsupportedElementType(ElementType::Int32))
        ));
        assert_eq!(ElementType::from(OutputType::Float16), ElementType::Float16);
    }
}
