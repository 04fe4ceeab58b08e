use clap::Parser;
use common::{RunAttributes, TelemetryGuard, setup_logging};
use harness::backend::BackendConfig;
use harness::cli::Cli;
use harness::{Driver, SingleStreamLoadGen, create_backend, create_dataset};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // The OTLP exporters need a Tokio runtime that outlives the run.
    let (_telemetry, _runtime) = if let Some(endpoint) = cli.otel_endpoint.as_ref() {
        let run = RunAttributes {
            backend: cli.backend.kind.to_string(),
            dataset: cli.dataset.name().to_string(),
            scenario: cli.scenario.to_string(),
            mode: cli.mode.to_string(),
        };
        let rt = tokio::runtime::Runtime::new()?;
        let guard =
            rt.block_on(async { TelemetryGuard::init("harness", endpoint, cli.environment, &run) })?;
        (Some(guard), Some(rt))
    } else {
        setup_logging(cli.environment)?;
        (None, None)
    };

    tracing::info!(config = ?cli, "Loaded configuration");

    if let Err(e) = run(&cli) {
        tracing::error!(error = ?e, "Benchmark failed");
        return Err(e);
    }
    Ok(())
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let backend = create_backend(&BackendConfig::from(&cli.backend))?;
    let dataset = create_dataset(&cli.dataset, backend.input_format(), backend.output_format())?;
    let mut driver = Driver::new(dataset, backend);

    let mut loadgen = SingleStreamLoadGen::new();
    driver.run_test(&mut loadgen, &cli.test_settings(), &cli.log_settings())?;

    let latency = driver.compute_latency_string();
    let accuracy = driver.compute_accuracy_string();
    tracing::info!(latency = %latency, "90 percentile latency");
    tracing::info!(accuracy = %accuracy, "Accuracy");
    println!("90 percentile latency: {}", latency);
    println!("Accuracy: {}", accuracy);
    Ok(())
}
