pub mod dummy;
#[cfg(feature = "ort-backend")]
pub mod onnx;

use crate::slot::DataSlot;
use crate::types::DataFormat;
use std::fmt;
use std::str::FromStr;

pub use dummy::DummyBackend;

/// A loaded model that runs one inference at a time.
///
/// Formats are fixed once the backend is built. Outputs borrow from the backend, so
/// they cannot outlive the next `set_inputs`/`issue_query` call.
pub trait Backend {
    fn name(&self) -> &str;

    fn input_format(&self) -> &DataFormat;

    fn output_format(&self) -> &DataFormat;

    /// Copy in one buffer per input tensor, in format order.
    fn set_inputs(&mut self, inputs: &[DataSlot]) -> anyhow::Result<()>;

    /// Run inference over the inputs set last. An error here invalidates the run.
    fn issue_query(&mut self) -> anyhow::Result<()>;

    fn predicted_outputs(&self) -> &[DataSlot];

    /// Hook for batching backends; nothing to do by default.
    fn flush_queries(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    #[default]
    Dummy,
    Ort,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "dummy" | "null" => Ok(BackendKind::Dummy),
            "ort" | "onnx" | "onnxruntime" => Ok(BackendKind::Ort),
            _ => Err(format!("Unknown backend: {}", s)),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Dummy => write!(f, "dummy"),
            BackendKind::Ort => write!(f, "ort"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub model_file: Option<String>,
    pub num_threads: usize,
    /// Accelerator name, e.g. `cpu` or `cuda`.
    pub delegate: String,
    /// Formats reported by the dummy backend; its built-in defaults when empty.
    pub dummy_inputs: DataFormat,
    pub dummy_outputs: DataFormat,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Dummy,
            model_file: None,
            num_threads: 1,
            delegate: "none".to_string(),
            dummy_inputs: Vec::new(),
            dummy_outputs: Vec::new(),
        }
    }
}

pub fn create_backend(config: &BackendConfig) -> anyhow::Result<Box<dyn Backend>> {
    match config.kind {
        BackendKind::Dummy => {
            let defaults = DummyBackend::default();
            if config.dummy_inputs.is_empty() && config.dummy_outputs.is_empty() {
                return Ok(Box::new(defaults));
            }
            let pick = |configured: &DataFormat, default: &DataFormat| {
                if configured.is_empty() {
                    default.clone()
                } else {
                    configured.clone()
                }
            };
            Ok(Box::new(DummyBackend::new(
                pick(&config.dummy_inputs, defaults.input_format()),
                pick(&config.dummy_outputs, defaults.output_format()),
            )?))
        }
        #[cfg(feature = "ort-backend")]
        BackendKind::Ort => {
            let model_file = config
                .model_file
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("The ort backend needs --model-file"))?;
            let provider = config.delegate.parse::<onnx::ExecutionProvider>()?;
            Ok(Box::new(onnx::OrtBackend::load_model(
                model_file,
                provider,
                config.num_threads,
            )?))
        }
        #[cfg(not(feature = "ort-backend"))]
        BackendKind::Ort => {
            anyhow::bail!("The ort backend is not compiled in; rebuild with --features ort-backend")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_backend_kind() {
        assert_eq!("dummy".parse::<BackendKind>(), Ok(BackendKind::Dummy));
        assert_eq!("ONNX".parse::<BackendKind>(), Ok(BackendKind::Ort));
        assert!("tflite".parse::<BackendKind>().is_err());
        assert_eq!(BackendKind::Ort.to_string(), "ort");
    }

    #[test]
    fn default_config_builds_dummy_backend() {
        let backend = create_backend(&BackendConfig::default()).unwrap();
        assert_eq!(backend.name(), "dummy");
        assert_eq!(backend.input_format().len(), 1);
    }

    #[test]
    fn dummy_formats_are_configurable() {
        let config = BackendConfig {
            dummy_inputs: vec!["int32:384".parse().unwrap(); 3],
            ..BackendConfig::default()
        };
        let backend = create_backend(&config).unwrap();
        assert_eq!(backend.input_format().len(), 3);
        assert_eq!(backend.output_format(), &vec!["float32:4".parse().unwrap()]);
    }

    #[cfg(not(feature = "ort-backend"))]
    #[test]
    fn ort_backend_requires_feature() {
        let config = BackendConfig {
            kind: BackendKind::Ort,
            ..BackendConfig::default()
        };
        assert!(create_backend(&config).is_err());
    }
}
