use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use dealintel::cli::{Cli, Command};
use dealintel::config::Config;
use dealintel::jobs::Pipeline;
use dotenvy::dotenv;
use tracing_subscriber::EnvFilter;

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

    let cli = Cli::parse();
    let Command::Run(args) = cli.command;

    let pipeline = match start().await {
        Ok(pipeline) => pipeline,
        Err(e) => {
            tracing::error!("{:#}", e);
            std::process::exit(2);
        }
    };
    pipeline.cancel_flag().listen_for_ctrl_c();

    let today = args.today.unwrap_or_else(|| Utc::now().date_naive());
    let report = pipeline.run(args.mode, args.roster.as_deref(), today).await;
    std::process::exit(report.exit_code());
}
