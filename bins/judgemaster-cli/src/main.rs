mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use judgemaster_common::types::Language;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "judgemaster-cli")]
#[command(about = "JudgeMaster CLI - Grade submissions and inspect problem definitions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Grade a source file against a problem
    Grade {
        /// Problem file (path to .json) or problem id under JUDGEMASTER_PROBLEMS_DIR
        #[arg(short, long)]
        problem: String,

        /// Source file to grade
        #[arg(short, long)]
        source: PathBuf,

        /// Language (python, javascript, cpp, java); inferred from the file extension when omitted
        #[arg(short, long)]
        language: Option<Language>,

        /// Print the full grade report as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Validate a problem definition file
    CheckProblem {
        /// Path to the problem .json file
        file: PathBuf,
    },

    /// List the languages this installation can grade
    Languages,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Grade {
            problem,
            source,
            language,
            json,
        } => {
            commands::grade(&problem, &source, language, json).await?;
        }
        Commands::CheckProblem { file } => {
            commands::check_problem(&file).await?;
        }
        Commands::Languages => {
            commands::list_languages()?;
        }
    }

    Ok(())
}
