use crate::backend::Backend;
use crate::dataset::{Dataset, NOT_APPLICABLE};
use crate::loadgen::{
    LoadGenerator, LogSettings, QuerySample, QuerySampleIndex, QuerySampleLibrary,
    QuerySampleResponse, ResponseSink, SystemUnderTest, TestMode, TestSettings, TestSummary,
};
use anyhow::Context;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};
use std::fmt;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriverState {
    #[default]
    Idle,
    RunningPerformance,
    RunningAccuracy,
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverState::Idle => write!(f, "idle"),
            DriverState::RunningPerformance => write!(f, "running performance"),
            DriverState::RunningAccuracy => write!(f, "running accuracy"),
        }
    }
}

struct DriverMetrics {
    query_duration: Histogram<f64>,
    samples: Counter<u64>,
}

fn init_metrics(meter_name: &'static str) -> DriverMetrics {
    let meter = global::meter(meter_name);
    let latency_buckets = [
        0.0005, 0.001, 0.002, 0.005, 0.01, 0.02, 0.05, 0.1, 0.2, 0.5, 1.0, 2.0,
    ];
    DriverMetrics {
        query_duration: meter
            .f64_histogram("harness_query_duration_seconds")
            .with_description("Time to run one sample (set inputs + infer + process output)")
            .with_unit("s")
            .with_boundaries(latency_buckets.to_vec())
            .build(),
        samples: meter
            .u64_counter("harness_samples_total")
            .with_description("Total samples completed")
            .build(),
    }
}

/// Glue between a load generator, a dataset and a backend.
///
/// Each sample flows dataset input -> backend -> dataset output processing, and the
/// resulting blobs are reported to the load generator once per query.
pub struct Driver {
    dataset: Box<dyn Dataset>,
    backend: Box<dyn Backend>,
    state: DriverState,
    last_performance: Option<TestSummary>,
    metrics: DriverMetrics,
}

impl Driver {
    pub fn new(dataset: Box<dyn Dataset>, backend: Box<dyn Backend>) -> Self {
        tracing::info!(
            dataset = dataset.name(),
            backend = backend.name(),
            samples = dataset.total_sample_count(),
            "Driver created"
        );
        Self {
            dataset,
            backend,
            state: DriverState::Idle,
            last_performance: None,
            metrics: init_metrics("harness"),
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn dataset(&self) -> &dyn Dataset {
        self.dataset.as_ref()
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    /// Summary of the last completed performance test.
    pub fn last_performance(&self) -> Option<&TestSummary> {
        self.last_performance.as_ref()
    }

    /// Run a test in `settings.mode`. A submission run is an accuracy test followed by
    /// a performance test, each logged to its own subdirectory of the output directory.
    pub fn run_test(
        &mut self,
        loadgen: &mut dyn LoadGenerator,
        settings: &TestSettings,
        log_settings: &LogSettings,
    ) -> anyhow::Result<()> {
        match settings.mode {
            TestMode::PerformanceOnly | TestMode::AccuracyOnly => {
                self.run_single(loadgen, settings, log_settings)
            }
            TestMode::SubmissionRun => {
                for (mode, subdir) in [
                    (TestMode::AccuracyOnly, "accuracy"),
                    (TestMode::PerformanceOnly, "performance"),
                ] {
                    let settings = TestSettings {
                        mode,
                        ..settings.clone()
                    };
                    let log_settings = LogSettings {
                        output_dir: log_settings.output_dir.join(subdir),
                        ..log_settings.clone()
                    };
                    self.run_single(loadgen, &settings, &log_settings)?;
                }
                Ok(())
            }
        }
    }

    fn run_single(
        &mut self,
        loadgen: &mut dyn LoadGenerator,
        settings: &TestSettings,
        log_settings: &LogSettings,
    ) -> anyhow::Result<()> {
        self.state = match settings.mode {
            TestMode::AccuracyOnly => DriverState::RunningAccuracy,
            _ => DriverState::RunningPerformance,
        };
        tracing::info!(state = %self.state, "Driver running");

        let result = loadgen.start_test(self, settings, log_settings);
        self.state = DriverState::Idle;
        let summary = result.with_context(|| format!("{} test failed", settings.mode))?;

        if summary.mode == TestMode::PerformanceOnly {
            self.last_performance = Some(summary);
        }
        Ok(())
    }

    /// 90th percentile single-query latency of the last performance test.
    pub fn compute_latency_string(&self) -> String {
        match self.last_performance.as_ref().and_then(|s| s.percentile(90.0)) {
            Some(p90) => format!("{:.2} ms", p90.as_secs_f64() * 1000.0),
            None => NOT_APPLICABLE.to_string(),
        }
    }

    pub fn compute_accuracy_string(&self) -> String {
        self.dataset.compute_accuracy_string()
    }

    /// Run one sample through the backend and turn its outputs into a log blob.
    fn run_sample(&mut self, index: QuerySampleIndex) -> anyhow::Result<Vec<u8>> {
        let inputs = self.dataset.get_data(index)?;
        self.backend.set_inputs(inputs)?;
        self.backend.issue_query()?;
        let outputs = self.backend.predicted_outputs();
        self.dataset
            .process_output(index, outputs)
            .with_context(|| format!("Failed to process outputs of sample {}", index))
    }
}

impl QuerySampleLibrary for Driver {
    fn name(&self) -> &str {
        self.dataset.name()
    }

    fn total_sample_count(&self) -> usize {
        self.dataset.total_sample_count()
    }

    fn performance_sample_count(&self) -> usize {
        self.dataset.performance_sample_count()
    }

    fn load_samples_to_ram(&mut self, indices: &[QuerySampleIndex]) -> anyhow::Result<()> {
        let _s = common::span!("load_samples", count = indices.len());
        self.dataset.load_samples_to_ram(indices)
    }

    fn unload_samples_from_ram(&mut self, indices: &[QuerySampleIndex]) -> anyhow::Result<()> {
        tracing::debug!(count = indices.len(), "Unloading samples");
        self.dataset.unload_samples_from_ram(indices)
    }
}

impl SystemUnderTest for Driver {
    fn name(&self) -> &str {
        self.backend.name()
    }

    fn issue_query(
        &mut self,
        samples: &[QuerySample],
        sink: &mut dyn ResponseSink,
    ) -> anyhow::Result<()> {
        let _s = common::span_debug!("issue_query", samples = samples.len());
        let mut blobs = Vec::with_capacity(samples.len());
        for sample in samples {
            let start = Instant::now();
            blobs.push(self.run_sample(sample.index)?);
            self.metrics
                .query_duration
                .record(start.elapsed().as_secs_f64(), &[]);
        }
        self.metrics.samples.add(samples.len() as u64, &[]);

        let responses: Vec<QuerySampleResponse<'_>> = samples
            .iter()
            .zip(&blobs)
            .map(|(sample, blob)| QuerySampleResponse {
                id: sample.id,
                data: blob.as_slice(),
            })
            .collect();
        sink.query_samples_complete(&responses)
    }

    fn flush_queries(&mut self) -> anyhow::Result<()> {
        self.backend.flush_queries()
    }
}
