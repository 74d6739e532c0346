//! Read-only and control commands — `epicflow status` and `epicflow stop`.
//!
//! Neither command loads `epicflow.toml`: they act on persisted state alone
//! through the same functions the machine's `status`/`stop` delegate to, so
//! they work even when the settings file is absent or incomplete.

use anyhow::Result;
use console::style;

use epicflow::config::Config;
use epicflow::errors::PipelineError;
use epicflow::pipeline::{StateStore, request_stop, story_status};
use epicflow::stages::StageCatalog;
use epicflow::ui;

use super::CommandOutcome;

pub fn cmd_status(config: &Config, story_id: &str) -> Result<CommandOutcome> {
    let store = StateStore::new(config.state_dir());
    let catalog = StageCatalog::load_or_builtin(&config.stages_file())?;

    match story_status(&store, &catalog, story_id) {
        Ok(report) => {
            ui::print_status(&report);
            Ok(CommandOutcome::Success)
        }
        Err(PipelineError::StateNotFound { .. }) => {
            eprintln!(
                "{} no pipeline state found for story '{story_id}'",
                style("error:").red().bold()
            );
            Ok(CommandOutcome::Failure)
        }
        Err(err) => Err(err.into()),
    }
}

pub fn cmd_stop(config: &Config, story_id: &str) -> Result<CommandOutcome> {
    let store = StateStore::new(config.state_dir());
    match request_stop(&store, story_id) {
        Ok(previous) => {
            println!(
                "Stop requested for story '{story_id}' (was {previous}); a running pipeline halts before its next stage."
            );
            Ok(CommandOutcome::Success)
        }
        Err(PipelineError::StateNotFound { .. }) => {
            eprintln!(
                "{} no pipeline state found for story '{story_id}'",
                style("error:").red().bold()
            );
            Ok(CommandOutcome::Failure)
        }
        Err(err) => Err(err.into()),
    }
}
