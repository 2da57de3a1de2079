use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::jobs::RunMode;

#[derive(Debug, Parser)]
#[command(name = "dealintel", version, about = "Korean startup funding news pipeline")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one pipeline mode and exit.
    Run(RunArgs),
}

#[derive(Debug, Clone, clap::Args)]
pub struct RunArgs {
    #[arg(long, value_enum, env = "RUN_MODE")]
    pub mode: RunMode,

    /// Weekly roster CSV (기업명, 주요사업, 투자자, 단계, 신규, 주차).
    #[arg(long, env = "ROSTER_PATH")]
    pub roster: Option<PathBuf>,

    /// Treat this date as today, for re-running a past day.
    #[arg(long)]
    pub today: Option<NaiveDate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_mode_and_roster() {
        let cli = Cli::try_parse_from([
            "dealintel",
            "run",
            "--mode=reconcile",
            "--roster=week12.csv",
            "--today=2026-03-16",
        ])
        .unwrap();
        let Command::Run(args) = cli.command;
        assert_eq!(args.mode, RunMode::Reconcile);
        assert_eq!(args.roster, Some(PathBuf::from("week12.csv")));
        assert_eq!(args.today, NaiveDate::from_ymd_opt(2026, 3, 16));
    }

    #[test]
    fn backfill_mode_is_kebab_case() {
        let cli = Cli::try_parse_from(["dealintel", "run", "--mode", "backfill-dates"]).unwrap();
        let Command::Run(args) = cli.command;
        assert_eq!(args.mode, RunMode::BackfillDates);
    }

    #[test]
    fn unknown_mode_is_rejected() {
        assert!(Cli::try_parse_from(["dealintel", "run", "--mode=monthly"]).is_err());
    }
}
