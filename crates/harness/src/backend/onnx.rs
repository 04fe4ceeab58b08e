use super::Backend;
use crate::errors::HarnessError;
use crate::slot::{DataSlot, validate_slots};
use crate::types::{DataFormat, ElementType, TensorDescriptor};
use half::f16;
use ort::{
    session::{Session, builder::GraphOptimizationLevel},
    tensor::TensorElementType,
    value::{DynValue, Tensor, ValueType},
};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionProvider {
    Cpu,
    Cuda,
}

impl FromStr for ExecutionProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "none" | "cpu" => Ok(ExecutionProvider::Cpu),
            "cuda" | "gpu" => Ok(ExecutionProvider::Cuda),
            other => anyhow::bail!("Unsupported delegate: {}", other),
        }
    }
}

/// A tensor the session expects, with the shape used to build input values.
struct Port {
    name: String,
    shape: Vec<i64>,
}

/// ONNX Runtime session with formats read from the model itself.
pub struct OrtBackend {
    session: Session,
    inputs: Vec<Port>,
    outputs: Vec<Port>,
    input_format: DataFormat,
    output_format: DataFormat,
    pending: Vec<DataSlot>,
    predicted: Vec<DataSlot>,
}

impl OrtBackend {
    pub fn load_model(
        path: &str,
        provider: ExecutionProvider,
        num_threads: usize,
    ) -> anyhow::Result<Self> {
        // Initialize ORT environment (idempotent)
        let _ = ort::init().commit();

        let mut builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(num_threads.max(1))?;

        match provider {
            ExecutionProvider::Cuda => {
                tracing::info!("Initializing ONNX Runtime with CUDA execution provider");
                builder = builder.with_execution_providers([
                    ort::execution_providers::CUDAExecutionProvider::default()
                        .with_device_id(0)
                        .build()
                        .error_on_failure(),
                ])?;
            }
            ExecutionProvider::Cpu => {
                tracing::info!("Initializing ONNX Runtime with CPU execution provider");
            }
        }

        let session = builder.commit_from_file(path)?;

        let (inputs, input_format) = describe(
            session
                .inputs
                .iter()
                .map(|i| (i.name.as_str(), &i.input_type)),
        )?;
        let (outputs, output_format) = describe(
            session
                .outputs
                .iter()
                .map(|o| (o.name.as_str(), &o.output_type)),
        )?;

        tracing::info!(
            model = path,
            inputs = ?input_format,
            outputs = ?output_format,
            "Model loaded"
        );

        let predicted = output_format.iter().map(DataSlot::zeroed).collect();
        Ok(Self {
            session,
            inputs,
            outputs,
            input_format,
            output_format,
            pending: Vec::new(),
            predicted,
        })
    }

    fn run(&mut self) -> anyhow::Result<()> {
        let mut values: Vec<(String, DynValue)> = Vec::with_capacity(self.inputs.len());
        for (port, slot) in self.inputs.iter().zip(&self.pending) {
            let shape = port.shape.clone();
            let value = match slot {
                DataSlot::Float32(v) => Tensor::from_array((shape, v.clone()))?.into_dyn(),
                DataSlot::Uint8(v) => Tensor::from_array((shape, v.clone()))?.into_dyn(),
                DataSlot::Int8(v) => Tensor::from_array((shape, v.clone()))?.into_dyn(),
                DataSlot::Float16(v) => Tensor::from_array((shape, v.clone()))?.into_dyn(),
                DataSlot::Int32(v) => Tensor::from_array((shape, v.clone()))?.into_dyn(),
                DataSlot::Int64(v) => Tensor::from_array((shape, v.clone()))?.into_dyn(),
            };
            values.push((port.name.clone(), value));
        }

        let outputs = self.session.run(values)?;

        let mut predicted = Vec::with_capacity(self.outputs.len());
        for (port, descriptor) in self.outputs.iter().zip(&self.output_format) {
            let value = &outputs[port.name.as_str()];
            let slot = match descriptor.element_type {
                ElementType::Float32 => {
                    DataSlot::Float32(value.try_extract_array::<f32>()?.iter().copied().collect())
                }
                ElementType::Uint8 => {
                    DataSlot::Uint8(value.try_extract_array::<u8>()?.iter().copied().collect())
                }
                ElementType::Int8 => {
                    DataSlot::Int8(value.try_extract_array::<i8>()?.iter().copied().collect())
                }
                ElementType::Float16 => {
                    DataSlot::Float16(value.try_extract_array::<f16>()?.iter().copied().collect())
                }
                ElementType::Int32 => {
                    DataSlot::Int32(value.try_extract_array::<i32>()?.iter().copied().collect())
                }
                ElementType::Int64 => {
                    DataSlot::Int64(value.try_extract_array::<i64>()?.iter().copied().collect())
                }
            };
            slot.check(descriptor)?;
            predicted.push(slot);
        }
        self.predicted = predicted;
        Ok(())
    }
}

impl Backend for OrtBackend {
    fn name(&self) -> &str {
        "onnxruntime"
    }

    fn input_format(&self) -> &DataFormat {
        &self.input_format
    }

    fn output_format(&self) -> &DataFormat {
        &self.output_format
    }

    fn set_inputs(&mut self, inputs: &[DataSlot]) -> anyhow::Result<()> {
        validate_slots(&self.input_format, inputs)?;
        self.pending.clear();
        self.pending.extend_from_slice(inputs);
        Ok(())
    }

    fn issue_query(&mut self) -> anyhow::Result<()> {
        let _s = common::span_debug!("model_inference");
        self.run()
            .map_err(|e| HarnessError::Inference(format!("{:#}", e)).into())
    }

    fn predicted_outputs(&self) -> &[DataSlot] {
        &self.predicted
    }
}

fn describe<'a>(
    ports: impl Iterator<Item = (&'a str, &'a ValueType)>,
) -> anyhow::Result<(Vec<Port>, DataFormat)> {
    let mut described = Vec::new();
    let mut format = Vec::new();
    for (name, value_type) in ports {
        let (Some(ty), Some(dims)) = (value_type.tensor_type(), value_type.tensor_shape()) else {
            anyhow::bail!("Tensor {} is not a tensor", name);
        };
        // Dynamic dimensions (batch) run with size 1.
        let shape: Vec<i64> = dims.iter().map(|&d| d.max(1)).collect();
        let element_count = shape.iter().product::<i64>() as usize;
        format.push(TensorDescriptor::new(element_type(ty, name)?, element_count));
        described.push(Port {
            name: name.to_string(),
            shape,
        });
    }
    Ok((described, format))
}

fn element_type(ty: TensorElementType, name: &str) -> anyhow::Result<ElementType> {
    Ok(match ty {
        TensorElementType::Float32 => ElementType::Float32,
        TensorElementType::Uint8 => ElementType::Uint8,
        TensorElementType::Int8 => ElementType::Int8,
        TensorElementType::Float16 => ElementType::Float16,
        TensorElementType::Int32 => ElementType::Int32,
        TensorElementType::Int64 => ElementType::Int64,
        other => anyhow::bail!("Tensor {} has unsupported element type {:?}", name, other),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_delegates() {
        assert_eq!("none".parse::<ExecutionProvider>().unwrap(), ExecutionProvider::Cpu);
        assert_eq!("CPU".parse::<ExecutionProvider>().unwrap(), ExecutionProvider::Cpu);
        assert_eq!("gpu".parse::<ExecutionProvider>().unwrap(), ExecutionProvider::Cuda);
        assert!("nnapi".parse::<ExecutionProvider>().is_err());
    }

    #[test]
    fn missing_model_fails() {
        assert!(OrtBackend::load_model("/nonexistent/model.onnx", ExecutionProvider::Cpu, 1).is_err());
    }
}
