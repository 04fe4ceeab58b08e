//! Boundary between the harness and the load generator that schedules queries, plus a
//! single-stream reference scheduler so runs work end-to-end without an external one.

use crate::errors::HarnessError;
use anyhow::Context;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant};

pub type QuerySampleIndex = usize;
pub type ResponseId = u64;

/// Samples issued by the offline scenario when no larger query count is requested.
pub const OFFLINE_SAMPLE_COUNT: usize = 5000;

pub const SUMMARY_FILE: &str = "summary.json";
pub const ACCURACY_LOG_FILE: &str = "accuracy_log.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuerySample {
    pub id: ResponseId,
    pub index: QuerySampleIndex,
}

/// Completion of one sample. `data` is only read during the completion call.
#[derive(Debug, Clone, Copy)]
pub struct QuerySampleResponse<'a> {
    pub id: ResponseId,
    pub data: &'a [u8],
}

pub trait QuerySampleLibrary {
    fn name(&self) -> &str;

    fn total_sample_count(&self) -> usize;

    fn performance_sample_count(&self) -> usize;

    fn load_samples_to_ram(&mut self, indices: &[QuerySampleIndex]) -> anyhow::Result<()>;

    fn unload_samples_from_ram(&mut self, indices: &[QuerySampleIndex]) -> anyhow::Result<()>;
}

pub trait ResponseSink {
    fn query_samples_complete(&mut self, responses: &[QuerySampleResponse<'_>]) -> anyhow::Result<()>;
}

pub trait SystemUnderTest {
    fn name(&self) -> &str;

    /// Run every sample and report them through `sink` before returning.
    fn issue_query(
        &mut self,
        samples: &[QuerySample],
        sink: &mut dyn ResponseSink,
    ) -> anyhow::Result<()>;

    fn flush_queries(&mut self) -> anyhow::Result<()>;
}

/// What a load generator drives: a sample library that is also the system under test.
pub trait Harness: SystemUnderTest + QuerySampleLibrary {}

impl<T: SystemUnderTest + QuerySampleLibrary + ?Sized> Harness for T {}

pub trait LoadGenerator {
    fn start_test(
        &mut self,
        harness: &mut dyn Harness,
        settings: &TestSettings,
        log_settings: &LogSettings,
    ) -> anyhow::Result<TestSummary>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum TestMode {
    #[default]
    PerformanceOnly,
    AccuracyOnly,
    /// Accuracy pass followed by a performance pass.
    SubmissionRun,
}

impl TestMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestMode::PerformanceOnly => "PerformanceOnly",
            TestMode::AccuracyOnly => "AccuracyOnly",
            TestMode::SubmissionRun => "SubmissionRun",
        }
    }
}

fn squash(s: &str) -> String {
    s.trim()
        .chars()
        .filter(|c| *c != '-' && *c != '_')
        .collect::<String>()
        .to_lowercase()
}

impl FromStr for TestMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match squash(s).as_str() {
            "performanceonly" => Ok(TestMode::PerformanceOnly),
            "accuracyonly" => Ok(TestMode::AccuracyOnly),
            "submissionrun" => Ok(TestMode::SubmissionRun),
            "findpeakperformance" => Err(HarnessError::UnsupportedMode(s.trim().to_string()).into()),
            _ => Err(anyhow::anyhow!(
                "Unknown test mode '{}' (expected PerformanceOnly, AccuracyOnly or SubmissionRun)",
                s
            )),
        }
    }
}

impl fmt::Display for TestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Scenario {
    #[default]
    SingleStream,
    /// One query carrying every sample.
    Offline,
}

impl FromStr for Scenario {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match squash(s).as_str() {
            "singlestream" => Ok(Scenario::SingleStream),
            "offline" => Ok(Scenario::Offline),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scenario::SingleStream => write!(f, "SingleStream"),
            Scenario::Offline => write!(f, "Offline"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TestSettings {
    pub scenario: Scenario,
    pub mode: TestMode,
    pub min_query_count: u64,
    pub min_duration: Duration,
    /// Caps the resident performance set below the library's own count.
    pub performance_sample_count_override: Option<usize>,
    pub seed: u64,
}

impl Default for TestSettings {
    fn default() -> Self {
        Self {
            scenario: Scenario::SingleStream,
            mode: TestMode::PerformanceOnly,
            min_query_count: 100,
            min_duration: Duration::from_millis(100),
            performance_sample_count_override: None,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogSettings {
    pub output_dir: PathBuf,
    pub copy_summary_to_stdout: bool,
}

impl LogSettings {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            copy_summary_to_stdout: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TestSummary {
    pub mode: TestMode,
    pub scenario: Scenario,
    pub queries: u64,
    pub samples: u64,
    /// Wall time of each query, in issue order.
    pub latencies: Vec<Duration>,
    pub duration: Duration,
}

impl TestSummary {
    /// Nearest-rank percentile of the query latencies; `None` when nothing ran.
    pub fn percentile(&self, p: f64) -> Option<Duration> {
        if self.latencies.is_empty() {
            return None;
        }
        let mut sorted = self.latencies.clone();
        sorted.sort_unstable();
        let rank = ((p.clamp(0.0, 100.0) / 100.0) * sorted.len() as f64).ceil() as usize;
        Some(sorted[rank.saturating_sub(1).min(sorted.len() - 1)])
    }

    pub fn samples_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.samples as f64 / secs
        } else {
            0.0
        }
    }
}

#[derive(Serialize)]
struct SummaryFile<'a> {
    mode: TestMode,
    scenario: Scenario,
    queries: u64,
    samples: u64,
    duration_ms: f64,
    samples_per_second: f64,
    latency_ms: LatencyFile,
    sut: &'a str,
    qsl: &'a str,
}

#[derive(Serialize)]
struct LatencyFile {
    min: Option<f64>,
    p50: Option<f64>,
    p90: Option<f64>,
    p99: Option<f64>,
    max: Option<f64>,
}

#[derive(Debug, Serialize)]
struct AccuracyRecord {
    seq_id: ResponseId,
    qsl_idx: QuerySampleIndex,
    data: String,
}

fn to_millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut hex = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(hex, "{:02X}", b);
    }
    hex
}

/// Collects completions for the query in flight and rejects ids it did not issue.
struct Completions {
    outstanding: HashSet<ResponseId>,
    in_flight: Vec<QuerySample>,
    accuracy_log: Option<Vec<AccuracyRecord>>,
    completed: u64,
}

impl Completions {
    fn new(log_accuracy: bool) -> Self {
        Self {
            outstanding: HashSet::new(),
            in_flight: Vec::new(),
            accuracy_log: log_accuracy.then(Vec::new),
            completed: 0,
        }
    }

    fn begin(&mut self, samples: &[QuerySample]) {
        self.outstanding = samples.iter().map(|s| s.id).collect();
        self.in_flight = samples.to_vec();
    }

    fn finish(&self) -> anyhow::Result<()> {
        if !self.outstanding.is_empty() {
            anyhow::bail!(
                "Query returned with {} of {} samples not completed",
                self.outstanding.len(),
                self.in_flight.len()
            );
        }
        Ok(())
    }
}

impl ResponseSink for Completions {
    fn query_samples_complete(&mut self, responses: &[QuerySampleResponse<'_>]) -> anyhow::Result<()> {
        for response in responses {
            if !self.outstanding.remove(&response.id) {
                anyhow::bail!("Completion for unknown response id {}", response.id);
            }
            self.completed += 1;
            if let Some(log) = self.accuracy_log.as_mut() {
                if let Some(sample) = self.in_flight.iter().find(|s| s.id == response.id) {
                    log.push(AccuracyRecord {
                        seq_id: response.id,
                        qsl_idx: sample.index,
                        data: to_hex(response.data),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Reference scheduler: one sample per query, issued back to back.
pub struct SingleStreamLoadGen {
    next_id: ResponseId,
}

impl SingleStreamLoadGen {
    pub fn new() -> Self {
        Self { next_id: 1 }
    }

    fn samples_for(&mut self, indices: &[QuerySampleIndex]) -> Vec<QuerySample> {
        indices
            .iter()
            .map(|&index| {
                let id = self.next_id;
                self.next_id += 1;
                QuerySample { id, index }
            })
            .collect()
    }

    /// Issue one query and time it until the harness returns.
    fn issue(
        &mut self,
        harness: &mut dyn Harness,
        indices: &[QuerySampleIndex],
        completions: &mut Completions,
    ) -> anyhow::Result<Duration> {
        let samples = self.samples_for(indices);
        completions.begin(&samples);
        let start = Instant::now();
        harness.issue_query(&samples, completions)?;
        let elapsed = start.elapsed();
        completions.finish()?;
        Ok(elapsed)
    }

    fn performance_set_size(harness: &dyn Harness, settings: &TestSettings) -> anyhow::Result<usize> {
        let total = QuerySampleLibrary::total_sample_count(harness);
        let mut size = harness.performance_sample_count().min(total);
        if let Some(cap) = settings.performance_sample_count_override {
            size = size.min(cap);
        }
        if size == 0 {
            return Err(HarnessError::EmptyDataset).context("Nothing to query");
        }
        Ok(size)
    }

    fn run_performance(
        &mut self,
        harness: &mut dyn Harness,
        settings: &TestSettings,
    ) -> anyhow::Result<TestSummary> {
        let _s = common::span!("performance_run", scenario = %settings.scenario);
        let set_size = Self::performance_set_size(harness, settings)?;
        let performance_set: Vec<QuerySampleIndex> = (0..set_size).collect();
        harness.load_samples_to_ram(&performance_set)?;
        tracing::info!(samples = set_size, "Loaded performance set");

        let mut rng = fastrand::Rng::with_seed(settings.seed);
        let mut completions = Completions::new(false);
        let mut latencies = Vec::new();
        let started = Instant::now();

        match settings.scenario {
            Scenario::SingleStream => {
                while (latencies.len() as u64) < settings.min_query_count
                    || started.elapsed() < settings.min_duration
                {
                    let index = performance_set[rng.usize(..set_size)];
                    latencies.push(self.issue(harness, &[index], &mut completions)?);
                }
            }
            Scenario::Offline => {
                let count = OFFLINE_SAMPLE_COUNT.max(settings.min_query_count as usize);
                let indices: Vec<QuerySampleIndex> =
                    (0..count).map(|i| performance_set[i % set_size]).collect();
                latencies.push(self.issue(harness, &indices, &mut completions)?);
            }
        }
        harness.flush_queries()?;
        let duration = started.elapsed();

        harness.unload_samples_from_ram(&performance_set)?;
        Ok(TestSummary {
            mode: TestMode::PerformanceOnly,
            scenario: settings.scenario,
            queries: latencies.len() as u64,
            samples: completions.completed,
            latencies,
            duration,
        })
    }

    fn run_accuracy(
        &mut self,
        harness: &mut dyn Harness,
        settings: &TestSettings,
        log_settings: &LogSettings,
    ) -> anyhow::Result<TestSummary> {
        let _s = common::span!("accuracy_run", scenario = %settings.scenario);
        let total = QuerySampleLibrary::total_sample_count(harness);
        let window = Self::performance_set_size(harness, settings)?;

        let mut completions = Completions::new(true);
        let mut latencies = Vec::new();
        let started = Instant::now();

        let all: Vec<QuerySampleIndex> = (0..total).collect();
        for chunk in all.chunks(window) {
            harness.load_samples_to_ram(chunk)?;
            match settings.scenario {
                Scenario::SingleStream => {
                    for &index in chunk {
                        latencies.push(self.issue(harness, &[index], &mut completions)?);
                    }
                }
                Scenario::Offline => {
                    latencies.push(self.issue(harness, chunk, &mut completions)?);
                }
            }
            harness.unload_samples_from_ram(chunk)?;
            tracing::debug!(done = completions.completed, total, "Accuracy window complete");
        }
        harness.flush_queries()?;
        let duration = started.elapsed();

        let records = completions.accuracy_log.take().unwrap_or_default();
        write_json(&log_settings.output_dir.join(ACCURACY_LOG_FILE), &records)?;

        Ok(TestSummary {
            mode: TestMode::AccuracyOnly,
            scenario: settings.scenario,
            queries: latencies.len() as u64,
            samples: completions.completed,
            latencies,
            duration,
        })
    }
}

impl Default for SingleStreamLoadGen {
    fn default() -> Self {
        Self::new()
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let content = serde_json::to_string_pretty(value)?;
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

fn write_summary(
    harness: &dyn Harness,
    summary: &TestSummary,
    log_settings: &LogSettings,
) -> anyhow::Result<()> {
    let file = SummaryFile {
        mode: summary.mode,
        scenario: summary.scenario,
        queries: summary.queries,
        samples: summary.samples,
        duration_ms: to_millis(summary.duration),
        samples_per_second: summary.samples_per_second(),
        latency_ms: LatencyFile {
            min: summary.percentile(0.0).map(to_millis),
            p50: summary.percentile(50.0).map(to_millis),
            p90: summary.percentile(90.0).map(to_millis),
            p99: summary.percentile(99.0).map(to_millis),
            max: summary.percentile(100.0).map(to_millis),
        },
        sut: SystemUnderTest::name(harness),
        qsl: QuerySampleLibrary::name(harness),
    };
    write_json(&log_settings.output_dir.join(SUMMARY_FILE), &file)?;
    if log_settings.copy_summary_to_stdout {
        println!("{}", serde_json::to_string_pretty(&file)?);
    }
    Ok(())
}

impl LoadGenerator for SingleStreamLoadGen {
    fn start_test(
        &mut self,
        harness: &mut dyn Harness,
        settings: &TestSettings,
        log_settings: &LogSettings,
    ) -> anyhow::Result<TestSummary> {
        fs::create_dir_all(&log_settings.output_dir).with_context(|| {
            format!("Failed to create {}", log_settings.output_dir.display())
        })?;
        tracing::info!(
            mode = %settings.mode,
            scenario = %settings.scenario,
            min_query_count = settings.min_query_count,
            min_duration_ms = settings.min_duration.as_millis() as u64,
            "Starting test"
        );

        let summary = match settings.mode {
            TestMode::PerformanceOnly => self.run_performance(harness, settings)?,
            TestMode::AccuracyOnly => self.run_accuracy(harness, settings, log_settings)?,
            TestMode::SubmissionRun => {
                return Err(HarnessError::UnsupportedMode(format!(
                    "{} runs as separate accuracy and performance tests",
                    settings.mode
                ))
                .into());
            }
        };

        write_summary(harness, &summary, log_settings)?;
        tracing::info!(
            queries = summary.queries,
            samples = summary.samples,
            duration_ms = to_millis(summary.duration),
            "Test finished"
        );
        Ok(summary)
    }
}
