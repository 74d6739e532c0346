//! Terminal UI for pipeline runs, rendered via `indicatif` progress bars.
//!
//! The UI is a passive consumer of [`PipelineEvent`]s: the machine knows
//! nothing about presentation and the UI holds no pipeline state beyond the
//! bars it draws.

use console::{style, Emoji};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::gates::Verdict;
use crate::pipeline::{PipelineEvent, PipelineStatus, StatusReport};
use crate::pipeline::StageStatus;

static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK] ");
static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR] ");
static RETRY: Emoji<'_, '_> = Emoji("🔄 ", "[RETRY] ");
static FLAG: Emoji<'_, '_> = Emoji("🏁 ", "[DONE] ");

/// Two stacked bars: overall stage progress plus a spinner for the stage
/// currently executing.
pub struct PipelineUI {
    multi: MultiProgress,
    stage_bar: ProgressBar,
    spinner: ProgressBar,
    verbose: bool,
}

impl PipelineUI {
    pub fn new(total_stages: u64, verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let stage_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");
        let stage_bar = multi.add(ProgressBar::new(total_stages));
        stage_bar.set_style(stage_style);
        stage_bar.set_prefix("Stages");

        let spinner_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");
        let spinner = multi.add(ProgressBar::new_spinner());
        spinner.set_style(spinner_style);
        spinner.set_prefix(" Stage");

        Self {
            multi,
            stage_bar,
            spinner,
            verbose,
        }
    }

    /// Print a line without tearing the bars, falling back to stderr when
    /// the rich terminal is unavailable.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    /// Render one pipeline event.
    pub fn handle(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::StageStarted { stage, name } => {
                self.spinner.set_message(format!(
                    "Running stage {} {}",
                    style(stage).cyan(),
                    style(name).bold()
                ));
                self.spinner.enable_steady_tick(Duration::from_millis(100));
            }
            PipelineEvent::StageCompleted { stage, name, gate } => {
                self.spinner.disable_steady_tick();
                self.stage_bar.inc(1);
                self.print_line(format!(
                    "{CHECK}stage {} {} (gate {} score {:.1})",
                    stage,
                    name,
                    render_verdict(gate.verdict),
                    gate.score
                ));
                if self.verbose {
                    for issue in &gate.issues {
                        self.print_line(format!(
                            "   {} {}: {}",
                            style("issue").yellow(),
                            issue.check,
                            issue.message
                        ));
                    }
                }
            }
            PipelineEvent::StageRetry {
                stage,
                retries,
                max_retries,
            } => {
                self.spinner.disable_steady_tick();
                self.print_line(format!(
                    "{RETRY}stage {} needs revision (attempt {}/{})",
                    stage,
                    retries + 1,
                    max_retries + 1
                ));
            }
            PipelineEvent::StatusChanged { to, .. } => match to {
                PipelineStatus::Complete => {
                    self.spinner.finish_and_clear();
                    self.stage_bar.finish_with_message("complete");
                    self.print_line(format!("{FLAG}pipeline complete"));
                }
                PipelineStatus::Blocked => {
                    self.spinner.finish_and_clear();
                    self.stage_bar.abandon_with_message("blocked");
                    self.print_line(format!("{CROSS}pipeline blocked"));
                }
                PipelineStatus::Stopped => {
                    self.spinner.finish_and_clear();
                    self.stage_bar.abandon_with_message("stopped");
                    self.print_line("pipeline stopped");
                }
                _ => {}
            },
        }
    }
}

fn render_verdict(verdict: Verdict) -> String {
    match verdict {
        Verdict::Approved => style("APPROVED").green().to_string(),
        Verdict::NeedsRevision => style("NEEDS_REVISION").yellow().to_string(),
        Verdict::Blocked => style("BLOCKED").red().to_string(),
    }
}

/// Render a status report as a plain table, one stage per line.
pub fn print_status(report: &StatusReport) {
    println!(
        "{} {} ({})",
        style("Story").bold(),
        style(&report.story_id).cyan(),
        report.status
    );
    println!(
        "Progress: {}/{} stages ({:.0}%)  current stage: {}",
        report.completed_stages, report.total_stages, report.progress, report.current_stage
    );
    for line in &report.stages {
        let mark = match line.status {
            StageStatus::Completed => style("done").green(),
            StageStatus::InProgress => style("running").cyan(),
            StageStatus::Failed => style("failed").red(),
            StageStatus::Skipped => style("skipped").dim(),
            StageStatus::Pending => style("pending").dim(),
        };
        let retries = if line.retries > 0 {
            format!("  (retries: {})", line.retries)
        } else {
            String::new()
        };
        println!("  {:>3}  {:<12} {}{}", line.id, line.name, mark, retries);
    }
    if !report.errors.is_empty() {
        println!("{}", style("Errors:").red().bold());
        for error in &report.errors {
            match error.stage {
                Some(stage) => println!("  stage {}: {}", stage, error.message),
                None => println!("  {}", error.message),
            }
        }
    }
}
