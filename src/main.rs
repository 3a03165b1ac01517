use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use activitypub_loadtest::aggregate::Aggregator;
use activitypub_loadtest::client::build_client;
use activitypub_loadtest::config::{print_config_help, Config, LogFormat};
use activitypub_loadtest::driver::{self, DriverConfig};
use activitypub_loadtest::metrics::{gather_metrics_string, register_metrics, start_metrics_server};
use activitypub_loadtest::report;
use activitypub_loadtest::scenario::Scenario;
use activitypub_loadtest::setup::{run_setup, should_run_setup};
use activitypub_loadtest::thresholds::{evaluate_all, watch_thresholds, DEFAULT_EVAL_INTERVAL};
use activitypub_loadtest::walker::Walker;

/// Exit code when any threshold failed.
const EXIT_THRESHOLDS_FAILED: i32 = 99;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing(Config::log_format_from_env());

    register_metrics()?;

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}\n", e);
            print_config_help();
            std::process::exit(1);
        }
    };

    let client_result = match build_client(&config.to_client_config()) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Configuration error: {}\n", e);
            print_config_help();
            std::process::exit(1);
        }
    };

    config.print_summary(&client_result.parsed_headers);

    let registry_arc = Arc::new(Mutex::new(prometheus::default_registry().clone()));
    if config.metrics_port != 0 {
        let registry = registry_arc.clone();
        let port = config.metrics_port;
        tokio::spawn(async move {
            start_metrics_server(port, registry).await;
        });
    }

    let aggregator = Aggregator::new();
    let walker = Walker::new(client_result.client, aggregator.clone(), config.max_pages);

    if should_run_setup(&config.base_url, &config.setup_host_suffix) {
        info!(base_url = %config.base_url, "Running setup for local target");
        run_setup(&walker, &config.actors).await;
    }

    let scenario = Arc::new(Scenario::new(
        walker,
        config.actors.clone(),
        config.sleep_time.clone(),
    ));

    let (abort_tx, abort_rx) = watch::channel(false);
    let watcher = tokio::spawn(watch_thresholds(
        config.thresholds.clone(),
        aggregator.clone(),
        Instant::now(),
        DEFAULT_EVAL_INTERVAL,
        abort_tx,
    ));

    let summary = driver::run(
        scenario,
        DriverConfig {
            load_model: config.load_model.clone(),
            max_vus: config.max_vus,
            graceful_stop: config.graceful_stop,
        },
        abort_rx,
    )
    .await;

    // Dropping the receiver in `run` lets the watcher exit on its own.
    if let Err(e) = watcher.await {
        error!(error = %e, "Threshold watcher failed");
    }

    let outcomes = evaluate_all(&config.thresholds, &aggregator);
    println!("{}", report::render(&aggregator, &summary, &outcomes));

    let final_metrics_output = gather_metrics_string(&registry_arc);
    println!("\n--- FINAL METRICS ---\n{}", final_metrics_output);
    println!("--- END OF FINAL METRICS ---\n");

    let failed = summary.aborted || outcomes.iter().any(|(_, o)| !o.passed);
    if failed {
        error!(aborted = summary.aborted, "One or more thresholds failed");
        std::process::exit(EXIT_THRESHOLDS_FAILED);
    }

    info!("All thresholds passed");
    Ok(())
}
