//! Pipeline execution — `epicflow start` and `epicflow resume`.

use anyhow::Result;
use console::style;
use std::sync::Arc;

use epicflow::config::Config;
use epicflow::errors::PipelineError;
use epicflow::pipeline::{PipelineMachine, ProcessStageExecutor, RunOutcome};
use epicflow::settings::EpicToml;
use epicflow::stages::StageCatalog;
use epicflow::ui::PipelineUI;

use super::CommandOutcome;

fn build_machine(config: &Config) -> Result<PipelineMachine> {
    config.ensure_directories()?;
    let settings = EpicToml::load(&config.config_file())?;
    let catalog = StageCatalog::load_or_builtin(&config.stages_file())?;

    let executor = ProcessStageExecutor::new(
        settings.executor.command.clone(),
        settings.executor.args.clone(),
        config.project_dir.clone(),
        config.log_dir(),
    );

    let ui = Arc::new(PipelineUI::new(catalog.len() as u64, config.verbose));
    Ok(
        PipelineMachine::new(config.clone(), settings, catalog, Box::new(executor))
            .with_observer(Box::new(move |event| ui.handle(event))),
    )
}

fn report_outcome(outcome: RunOutcome) -> CommandOutcome {
    match outcome {
        RunOutcome::Completed => CommandOutcome::Success,
        RunOutcome::Stopped => {
            println!("Run stopped; resume with 'epicflow resume <STORY_ID>'.");
            CommandOutcome::Success
        }
        RunOutcome::Blocked { stage } => {
            eprintln!(
                "{} pipeline blocked at stage {stage}; inspect 'epicflow status' and resume after fixing.",
                style("error:").red().bold()
            );
            CommandOutcome::Blocked
        }
    }
}

pub async fn cmd_start(
    config: &Config,
    story_id: &str,
    stage: Option<u32>,
) -> Result<CommandOutcome> {
    let mut machine = build_machine(config)?;
    match machine.start(story_id, stage).await {
        Ok(outcome) => Ok(report_outcome(outcome)),
        Err(PipelineError::AlreadyComplete { story_id }) => {
            eprintln!(
                "Story '{story_id}' is already complete; use 'epicflow resume {story_id} --fresh' to start over."
            );
            Ok(CommandOutcome::Blocked)
        }
        Err(err) => Err(err.into()),
    }
}

pub async fn cmd_resume(
    config: &Config,
    story_id: &str,
    from: Option<u32>,
    fresh: bool,
) -> Result<CommandOutcome> {
    let mut machine = build_machine(config)?;
    match machine.resume(story_id, from, fresh).await {
        Ok(outcome) => Ok(report_outcome(outcome)),
        Err(PipelineError::AlreadyComplete { story_id }) => {
            eprintln!(
                "Story '{story_id}' is already complete; pass --fresh to discard its state and rerun."
            );
            Ok(CommandOutcome::Blocked)
        }
        Err(PipelineError::StateNotFound { story_id }) => {
            eprintln!(
                "No pipeline state found for story '{story_id}'; use 'epicflow start {story_id}'."
            );
            Ok(CommandOutcome::Failure)
        }
        Err(err) => Err(err.into()),
    }
}
