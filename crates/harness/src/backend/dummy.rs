use super::Backend;
use crate::slot::{DataSlot, validate_slots};
use crate::types::{DataFormat, ElementType, TensorDescriptor};

/// Byte every output buffer is filled with.
pub const DUMMY_OUTPUT_BYTE: u8 = 2;

/// Engine stand-in for exercising the harness without a model.
///
/// Inputs are validated and copied like a real backend would; outputs always hold
/// the same constant bytes.
pub struct DummyBackend {
    input_format: DataFormat,
    output_format: DataFormat,
    inputs: Vec<DataSlot>,
    outputs: Vec<DataSlot>,
    queries: u64,
}

impl DummyBackend {
    pub fn new(input_format: DataFormat, output_format: DataFormat) -> anyhow::Result<Self> {
        let outputs = output_format
            .iter()
            .map(|d| DataSlot::from_le_bytes(d, &vec![DUMMY_OUTPUT_BYTE; d.byte_len()]))
            .collect::<Result<Vec<_>, _>>()?;
        tracing::info!(
            inputs = ?input_format,
            outputs = ?output_format,
            "Dummy backend initialized"
        );
        Ok(Self {
            input_format,
            output_format,
            inputs: Vec::new(),
            outputs,
            queries: 0,
        })
    }

    /// Number of inferences run so far.
    pub fn queries(&self) -> u64 {
        self.queries
    }

    pub fn current_inputs(&self) -> &[DataSlot] {
        &self.inputs
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        let input_format = vec![TensorDescriptor::new(ElementType::Float32, 1024)];
        let output_format = vec![TensorDescriptor::new(ElementType::Float32, 4)];
        let outputs = output_format
            .iter()
            .map(|d| DataSlot::Float32(vec![f32::from_le_bytes([DUMMY_OUTPUT_BYTE; 4]); d.element_count]))
            .collect();
        Self {
            input_format,
            output_format,
            inputs: Vec::new(),
            outputs,
            queries: 0,
        }
    }
}

impl Backend for DummyBackend {
    fn name(&self) -> &str {
        "dummy"
    }

    fn input_format(&self) -> &DataFormat {
        &self.input_format
    }

    fn output_format(&self) -> &DataFormat {
        &self.output_format
    }

    fn set_inputs(&mut self, inputs: &[DataSlot]) -> anyhow::Result<()> {
        validate_slots(&self.input_format, inputs)?;
        self.inputs.clear();
        self.inputs.extend_from_slice(inputs);
        Ok(())
    }

    fn issue_query(&mut self) -> anyhow::Result<()> {
        if self.inputs.is_empty() && !self.input_format.is_empty() {
            anyhow::bail!("issue_query called before set_inputs");
        }
        self.queries += 1;
        tracing::trace!(query = self.queries, "Dummy inference");
        Ok(())
    }

    fn predicted_outputs(&self) -> &[DataSlot] {
        &self.outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_formats() {
        let backend = DummyBackend::default();
        assert_eq!(
            backend.input_format(),
            &vec![TensorDescriptor::new(ElementType::Float32, 1024)]
        );
        assert_eq!(
            backend.output_format(),
            &vec![TensorDescriptor::new(ElementType::Float32, 4)]
        );
        assert_eq!(backend.predicted_outputs()[0].as_bytes(), &[DUMMY_OUTPUT_BYTE; 16]);
    }

    #[test]
    fn custom_formats_and_query_count() {
        let mut backend = DummyBackend::new(
            vec![TensorDescriptor::new(ElementType::Int32, 3)],
            vec![
                TensorDescriptor::new(ElementType::Uint8, 2),
                TensorDescriptor::new(ElementType::Int64, 1),
            ],
        )
        .unwrap();

        backend.set_inputs(&[DataSlot::Int32(vec![1, 2, 3])]).unwrap();
        backend.issue_query().unwrap();
        backend.issue_query().unwrap();
        backend.flush_queries().unwrap();

        assert_eq!(backend.queries(), 2);
        assert_eq!(backend.current_inputs(), &[DataSlot::Int32(vec![1, 2, 3])]);
        let outputs = backend.predicted_outputs();
        assert_eq!(outputs[0], DataSlot::Uint8(vec![2, 2]));
        assert_eq!(outputs[1].as_i64().unwrap(), &[i64::from_le_bytes([2; 8])]);
    }

    #[test]
    fn rejects_mismatched_inputs() {
        let mut backend = DummyBackend::default();
        assert!(backend.set_inputs(&[DataSlot::Float32(vec![0.0; 4])]).is_err());
        assert!(backend.set_inputs(&[]).is_err());
        assert!(backend.issue_query().is_err());
    }
}
