use crate::backend::{BackendConfig, BackendKind};
use crate::dataset::DatasetConfig;
use crate::loadgen::{LogSettings, OFFLINE_SAMPLE_COUNT, Scenario, TestMode, TestSettings};
use crate::types::TensorDescriptor;
use clap::{Args, Parser};
use common::Environment;
use std::path::PathBuf;
use std::time::Duration;

/// Measure latency and accuracy of an inference backend on a benchmark dataset.
#[derive(Debug, Clone, Parser)]
#[command(name = "harness", version, about)]
pub struct Cli {
    /// PerformanceOnly, AccuracyOnly or SubmissionRun
    #[arg(long, env = "HARNESS_MODE", default_value = "PerformanceOnly")]
    pub mode: TestMode,

    /// SingleStream or Offline
    #[arg(long, default_value = "SingleStream")]
    pub scenario: Scenario,

    #[arg(long, default_value_t = 100)]
    pub min_query_count: u64,

    #[arg(long, default_value_t = 100)]
    pub min_duration_ms: u64,

    /// Resident samples during a performance test (defaults to the dataset's own count,
    /// fixed for the offline scenario)
    #[arg(long)]
    pub performance_sample_count: Option<usize>,

    /// Seed of the sample selection in performance tests
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Where summary.json and accuracy_log.json are written
    #[arg(long, env = "HARNESS_OUTPUT_DIR")]
    pub output_dir: PathBuf,

    /// Print the summary JSON to stdout as well
    #[arg(long)]
    pub print_summary: bool,

    #[arg(long, env = "ENVIRONMENT", default_value = "development")]
    pub environment: Environment,

    /// OTLP collector, e.g. http://localhost:4317
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otel_endpoint: Option<String>,

    #[command(flatten)]
    pub backend: BackendArgs,

    #[command(subcommand)]
    pub dataset: DatasetConfig,
}

#[derive(Debug, Clone, Args)]
pub struct BackendArgs {
    /// dummy or ort
    #[arg(long = "backend", env = "HARNESS_BACKEND", default_value = "dummy")]
    pub kind: BackendKind,

    #[arg(long, env = "HARNESS_MODEL_FILE")]
    pub model_file: Option<String>,

    #[arg(long, default_value_t = 1)]
    pub num_threads: usize,

    /// none, cpu, cuda or gpu
    #[arg(long, default_value = "none")]
    pub delegate: String,

    /// Dummy backend input tensor, e.g. float32:150528 (repeatable)
    #[arg(long = "dummy-input")]
    pub dummy_inputs: Vec<TensorDescriptor>,

    /// Dummy backend output tensor, e.g. float32:1001 (repeatable)
    #[arg(long = "dummy-output")]
    pub dummy_outputs: Vec<TensorDescriptor>,
}

impl Cli {
    /// Mode actually run. Synthetic data has no ground truth and the offline scenario
    /// is a throughput measurement, so both only measure speed.
    pub fn effective_mode(&self) -> TestMode {
        if self.mode == TestMode::PerformanceOnly {
            return self.mode;
        }
        if self.dataset.is_synthetic() {
            tracing::info!(requested = %self.mode, "Synthetic dataset, running PerformanceOnly");
            return TestMode::PerformanceOnly;
        }
        if self.scenario == Scenario::Offline {
            tracing::info!(requested = %self.mode, "Offline scenario, running PerformanceOnly");
            return TestMode::PerformanceOnly;
        }
        self.mode
    }

    pub fn test_settings(&self) -> TestSettings {
        let performance_sample_count_override = match self.scenario {
            Scenario::Offline => Some(OFFLINE_SAMPLE_COUNT),
            Scenario::SingleStream => self.performance_sample_count,
        };
        TestSettings {
            scenario: self.scenario,
            mode: self.effective_mode(),
            min_query_count: self.min_query_count,
            min_duration: Duration::from_millis(self.min_duration_ms),
            performance_sample_count_override,
            seed: self.seed,
        }
    }

    pub fn log_settings(&self) -> LogSettings {
        LogSettings {
            output_dir: self.output_dir.clone(),
            copy_summary_to_stdout: self.print_summary,
        }
    }
}

impl From<&BackendArgs> for BackendConfig {
    fn from(args: &BackendArgs) -> Self {
        Self {
            kind: args.kind,
            model_file: args.model_file.clone(),
            num_threads: args.num_threads,
            delegate: args.delegate.clone(),
            dummy_inputs: args.dummy_inputs.clone(),
            dummy_outputs: args.dummy_outputs.clone(),
        }
    }
}
