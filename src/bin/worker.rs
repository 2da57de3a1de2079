use anyhow::Context;
use chrono::{Datelike, Utc, Weekday};
use dealintel::config::Config;
use dealintel::jobs::{Pipeline, RunMode};
use dotenvy::dotenv;
use std::env;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const ONCE_FLAGS: &[(&str, RunMode)] = &[
    ("--daily", RunMode::Daily),
    ("--weekly", RunMode::Weekly),
    ("--reconcile", RunMode::Reconcile),
    ("--backfill-dates", RunMode::BackfillDates),
];

async fn run_mode(pipeline: &Pipeline, mode: RunMode) -> i32 {
    let today = Utc::now().date_naive();
    let report = pipeline.run(mode, None, today).await;
    if report.exit_code() != 0 {
        error!(?mode, errors = report.error_count(), "run finished with errors");
    }
    report.exit_code()
}

async fn start() -> anyhow::Result<Pipeline> {
    let config = Config::from_env().context("invalid configuration")?;
    let pipeline = Pipeline::from_config(config).await.context("cannot start pipeline")?;
    Ok(pipeline)
}

#[tokio::main]
async fn main() {
    let _ = dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let pipeline = match start().await {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(2);
        }
    };
    pipeline.cancel_flag().listen_for_ctrl_c();

    // `--daily` and friends run a single mode and exit.
    let args: Vec<String> = env::args().collect();
    if let Some((_, mode)) = ONCE_FLAGS.iter().find(|(flag, _)| args.iter().any(|a| a == flag)) {
        std::process::exit(run_mode(&pipeline, *mode).await);
    }

    info!("Worker starting; daily run every 24 hours, weekly run on Mondays");

    let mut ticker = interval(Duration::from_secs(24 * 60 * 60));
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Worker stopping");
                break;
            }
        }
        if pipeline.cancel_flag().is_cancelled() {
            info!("Worker stopping");
            break;
        }
        run_mode(&pipeline, RunMode::Daily).await;
        if Utc::now().weekday() == Weekday::Mon {
            run_mode(&pipeline, RunMode::Weekly).await;
        }
        info!("Scheduled runs finished.");
    }
}
