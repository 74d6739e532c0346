use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use epicflow::config::Config;

mod cmd;

const EXIT_FAILURE: u8 = 1;
const EXIT_MISSING_STORY: u8 = 3;

#[derive(Parser)]
#[command(name = "epicflow")]
#[command(version, about = "Staged epic pipeline orchestrator with quality gates")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start (or continue) the pipeline for a story
    Start {
        story_id: Option<String>,
        /// Begin at this stage instead of the computed resume point
        #[arg(long)]
        stage: Option<u32>,
    },
    /// Show pipeline status for a story
    Status { story_id: Option<String> },
    /// Request a cooperative stop; a running pipeline halts between stages
    Stop { story_id: Option<String> },
    /// Resume an interrupted or blocked story
    Resume {
        story_id: Option<String>,
        /// Begin at this stage instead of the computed resume point
        #[arg(long)]
        from: Option<u32>,
        /// Discard completed state and start over
        #[arg(long)]
        fresh: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose {
            "epicflow=debug"
        } else {
            "epicflow=warn"
        })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => match std::env::current_dir() {
            Ok(dir) => dir,
            Err(err) => {
                eprintln!("error: failed to resolve current directory: {err}");
                return ExitCode::from(EXIT_FAILURE);
            }
        },
    };

    let config = match Config::with_cli_args(project_dir, cli.verbose) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err:#}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    let result = match cli.command {
        Commands::Start { story_id, stage } => {
            let Some(story_id) = story_id else {
                return missing_story_id("start");
            };
            cmd::cmd_start(&config, &story_id, stage).await
        }
        Commands::Status { story_id } => {
            let Some(story_id) = story_id else {
                return missing_story_id("status");
            };
            cmd::cmd_status(&config, &story_id)
        }
        Commands::Stop { story_id } => {
            let Some(story_id) = story_id else {
                return missing_story_id("stop");
            };
            cmd::cmd_stop(&config, &story_id)
        }
        Commands::Resume {
            story_id,
            from,
            fresh,
        } => {
            let Some(story_id) = story_id else {
                return missing_story_id("resume");
            };
            cmd::cmd_resume(&config, &story_id, from, fresh).await
        }
    };

    match result {
        Ok(outcome) => ExitCode::from(outcome.code()),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn missing_story_id(command: &str) -> ExitCode {
    eprintln!("error: missing story id (usage: epicflow {command} <STORY_ID>)");
    ExitCode::from(EXIT_MISSING_STORY)
}
