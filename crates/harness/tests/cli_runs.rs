use clap::Parser;
use harness::backend::BackendConfig;
use harness::cli::Cli;
use harness::loadgen::{Harness, OFFLINE_SAMPLE_COUNT};
use harness::{
    Driver, LoadGenerator, LogSettings, SingleStreamLoadGen, TestMode, TestSettings, TestSummary,
    create_backend, create_dataset,
};
use std::fs;
use std::io::Write;
use std::path::Path;

const SEQ: usize = 8;

/// Runs the reference scheduler and remembers the mode of every test it starts.
#[derive(Default)]
struct ModeRecorder {
    inner: SingleStreamLoadGen,
    modes: Vec<TestMode>,
}

impl LoadGenerator for ModeRecorder {
    fn start_test(
        &mut self,
        harness: &mut dyn Harness,
        settings: &TestSettings,
        log_settings: &LogSettings,
    ) -> anyhow::Result<TestSummary> {
        self.modes.push(settings.mode);
        self.inner.start_test(harness, settings, log_settings)
    }
}

fn driver_for(cli: &Cli) -> Driver {
    let backend = create_backend(&BackendConfig::from(&cli.backend)).unwrap();
    let dataset =
        create_dataset(&cli.dataset, backend.input_format(), backend.output_format()).unwrap();
    Driver::new(dataset, backend)
}

fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

fn write_questions(dir: &Path) -> (String, String) {
    let questions = dir.join("questions.jsonl");
    let mut file = fs::File::create(&questions).unwrap();
    for qas_id in ["q1", "q2"] {
        let record = serde_json::json!({
            "qas_id": qas_id,
            "input_ids": [101, 2040, 1029, 102, 13857, 8112, 2015, 102],
            "input_mask": vec![1; SEQ],
            "segment_ids": [0, 0, 0, 0, 1, 1, 1, 1],
            "tokens": ["[CLS]", "who", "?", "[SEP]", "barack", "obama", "##s", "[SEP]"],
            "token_to_orig_map": {"4": 0, "5": 1, "6": 1},
            "doc_tokens": ["Barack", "Obamas"],
        });
        writeln!(file, "{}", record).unwrap();
    }

    let answers = dir.join("answers.jsonl");
    fs::write(
        &answers,
        "{\"qas_id\": \"q1\", \"answers\": [\"Barack Obamas\"]}\n\
         {\"qas_id\": \"q2\", \"answers\": [\"Obamas\"]}\n",
    )
    .unwrap();

    (
        questions.to_str().unwrap().to_string(),
        answers.to_str().unwrap().to_string(),
    )
}

#[test]
fn squad_submission_run_scores_then_measures() {
    let dir = tempfile::tempdir().unwrap();
    let (questions, answers) = write_questions(dir.path());
    let output_dir = dir.path().join("out");
    let int_input = format!("int32:{SEQ}");
    let logits = format!("float32:{SEQ}");

    let cli = Cli::try_parse_from([
        "harness",
        "--mode",
        "SubmissionRun",
        "--min-query-count",
        "4",
        "--min-duration-ms",
        "0",
        "--output-dir",
        output_dir.to_str().unwrap(),
        "--dummy-input",
        &int_input,
        "--dummy-input",
        &int_input,
        "--dummy-input",
        &int_input,
        "--dummy-output",
        &logits,
        "--dummy-output",
        &logits,
        "squad",
        "--input-file",
        &questions,
        "--groundtruth-file",
        &answers,
    ])
    .unwrap();

    let mut driver = driver_for(&cli);
    let mut loadgen = ModeRecorder::default();
    driver
        .run_test(&mut loadgen, &cli.test_settings(), &cli.log_settings())
        .unwrap();

    assert_eq!(loadgen.modes, vec![TestMode::AccuracyOnly, TestMode::PerformanceOnly]);

    let log = read_json(&output_dir.join("accuracy").join("accuracy_log.json"));
    let log = log.as_array().unwrap();
    assert_eq!(log.len(), 2);
    // (start, end) as two little-endian i32 values.
    assert!(log.iter().all(|r| r["data"].as_str().unwrap().len() == 16));

    let summary = read_json(&output_dir.join("performance").join("summary.json"));
    assert_eq!(summary["mode"], "PerformanceOnly");
    assert_eq!(summary["queries"], 4);

    assert!(driver.compute_accuracy_string().ends_with("% EM"));
    assert!(driver.compute_latency_string().ends_with(" ms"));
}

#[test]
fn offline_scenario_sends_one_query_of_the_fixed_sample_count() {
    let dir = tempfile::tempdir().unwrap();
    let cli = Cli::try_parse_from([
        "harness",
        "--mode",
        "AccuracyOnly",
        "--scenario",
        "Offline",
        "--min-query-count",
        "1",
        "--output-dir",
        dir.path().to_str().unwrap(),
        "--dummy-input",
        "float32:4",
        "--dummy-output",
        "float32:4",
        "dummy",
        "--sample-count",
        "10",
    ])
    .unwrap();

    let mut driver = driver_for(&cli);
    let mut loadgen = ModeRecorder::default();
    driver
        .run_test(&mut loadgen, &cli.test_settings(), &cli.log_settings())
        .unwrap();

    assert_eq!(loadgen.modes, vec![TestMode::PerformanceOnly]);
    let summary = read_json(&dir.path().join("summary.json"));
    assert_eq!(summary["scenario"], "Offline");
    assert_eq!(summary["queries"], 1);
    assert_eq!(summary["samples"], OFFLINE_SAMPLE_COUNT as u64);
    assert!(!dir.path().join("accuracy_log.json").exists());
}
