use harness::dataset::{DummyConfig, DummyDataset, SyntheticProfile};
use harness::loadgen::{
    Harness, QuerySample, QuerySampleLibrary, QuerySampleResponse, ResponseSink, SystemUnderTest,
};
use harness::{
    Driver, DummyBackend, ElementType, LoadGenerator, LogSettings, SingleStreamLoadGen,
    TensorDescriptor, TestMode, TestSettings, TestSummary,
};
use std::time::{Duration, Instant};

fn driver(sample_count: usize) -> Driver {
    let input = vec![TensorDescriptor::new(ElementType::Float32, 4)];
    let output = vec![TensorDescriptor::new(ElementType::Float32, 4)];
    let backend = DummyBackend::new(input.clone(), output).unwrap();
    let config = DummyConfig {
        sample_count,
        profile: SyntheticProfile::Generic,
        seed: 42,
    };
    let dataset = DummyDataset::new(&config, &input).unwrap();
    Driver::new(Box::new(dataset), Box::new(backend))
}

#[derive(Default)]
struct RecordingSink {
    completions: Vec<(u64, Vec<u8>)>,
}

impl ResponseSink for RecordingSink {
    fn query_samples_complete(&mut self, responses: &[QuerySampleResponse<'_>]) -> anyhow::Result<()> {
        for response in responses {
            assert!(!response.data.as_ptr().is_null());
            self.completions.push((response.id, response.data.to_vec()));
        }
        Ok(())
    }
}

/// Issues exactly `min_query_count` one-sample queries and keeps every completion.
#[derive(Default)]
struct RecordingLoadGen {
    sink: RecordingSink,
}

impl LoadGenerator for RecordingLoadGen {
    fn start_test(
        &mut self,
        harness: &mut dyn Harness,
        settings: &TestSettings,
        _log_settings: &LogSettings,
    ) -> anyhow::Result<TestSummary> {
        let total = QuerySampleLibrary::total_sample_count(harness);
        let indices: Vec<usize> = (0..total).collect();
        harness.load_samples_to_ram(&indices)?;

        let started = Instant::now();
        let mut latencies = Vec::new();
        for id in 0..settings.min_query_count {
            let sample = QuerySample {
                id,
                index: id as usize % total,
            };
            let start = Instant::now();
            harness.issue_query(&[sample], &mut self.sink)?;
            latencies.push(start.elapsed());
        }
        harness.flush_queries()?;
        harness.unload_samples_from_ram(&indices)?;

        Ok(TestSummary {
            mode: settings.mode,
            scenario: settings.scenario,
            queries: settings.min_query_count,
            samples: self.sink.completions.len() as u64,
            latencies,
            duration: started.elapsed(),
        })
    }
}

fn performance_settings(min_query_count: u64) -> TestSettings {
    TestSettings {
        mode: TestMode::PerformanceOnly,
        min_query_count,
        min_duration: Duration::ZERO,
        ..TestSettings::default()
    }
}

#[test]
fn ten_synthetic_samples_complete_exactly_ten_times() {
    let dir = tempfile::tempdir().unwrap();
    let mut driver = driver(10);
    let mut loadgen = RecordingLoadGen::default();

    driver
        .run_test(&mut loadgen, &performance_settings(10), &LogSettings::new(dir.path()))
        .unwrap();

    assert_eq!(loadgen.sink.completions.len(), 10);
    for (expected, (id, blob)) in loadgen.sink.completions.iter().enumerate() {
        // One-sample queries: sample index equals the query id.
        assert_eq!(*id, expected as u64);
        assert_eq!(blob.as_slice(), (expected as u64).to_le_bytes());
    }
    assert!(driver.compute_latency_string().ends_with(" ms"));
    assert_eq!(driver.compute_accuracy_string(), "N/A");
}

#[test]
fn reference_loadgen_runs_the_synthetic_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let mut driver = driver(10);

    driver
        .run_test(
            &mut SingleStreamLoadGen::new(),
            &performance_settings(10),
            &LogSettings::new(dir.path()),
        )
        .unwrap();

    let summary = driver.last_performance().unwrap();
    assert_eq!(summary.queries, 10);
    assert_eq!(summary.samples, 10);
    assert_eq!(SystemUnderTest::name(&driver), "dummy");

    let written: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join("summary.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(written["queries"], 10);
    assert_eq!(written["mode"], "PerformanceOnly");
}

#[test]
fn accuracy_run_logs_one_record_per_sample() {
    let dir = tempfile::tempdir().unwrap();
    let mut driver = driver(7);
    let settings = TestSettings {
        mode: TestMode::AccuracyOnly,
        performance_sample_count_override: Some(3),
        ..performance_settings(1)
    };

    driver
        .run_test(&mut SingleStreamLoadGen::new(), &settings, &LogSettings::new(dir.path()))
        .unwrap();

    let log: Vec<serde_json::Value> = serde_json::from_str(
        &std::fs::read_to_string(dir.path().join("accuracy_log.json")).unwrap(),
    )
    .unwrap();
    let mut indices: Vec<u64> = log.iter().map(|r| r["qsl_idx"].as_u64().unwrap()).collect();
    indices.sort_unstable();
    assert_eq!(indices, (0..7).collect::<Vec<_>>());
    assert!(driver.last_performance().is_none());
}
