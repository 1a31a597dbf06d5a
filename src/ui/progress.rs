//! Terminal UI for `draftsync watch`, rendered via `indicatif` bars.
//!
//! Three bars are stacked vertically:
//! - Step bar — how many pipeline steps have completed
//! - Status spinner — the current step and what it is doing
//! - Connection line — live connection/sync state
//!
//! All methods coordinate output via `indicatif`'s `MultiProgress`.

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::api::models::ProcessStatus;
use crate::realtime::manager::ConnectionState;
use crate::reconciler::{GenerationState, STEP_ORDER, StepStatus};
use crate::ui::icons::{ARTICLE, CHECK, CROSS, PLUG, RUNNING, SPARKLE, WAITING};

pub struct WatchUi {
    multi: MultiProgress,
    step_bar: ProgressBar,
    status_bar: ProgressBar,
    connection_bar: ProgressBar,
    verbose: bool,
}

impl WatchUi {
    pub fn new(verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let step_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");

        let step_bar = multi.add(ProgressBar::new(STEP_ORDER.len() as u64));
        step_bar.set_style(step_style);
        step_bar.set_prefix(" Steps");

        let status_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");

        let status_bar = multi.add(ProgressBar::new_spinner());
        status_bar.set_style(status_style);
        status_bar.set_prefix("Status");
        status_bar.enable_steady_tick(Duration::from_millis(120));

        let connection_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} {msg}")
            .expect("progress bar template is a valid static string");

        let connection_bar = multi.add(ProgressBar::new(0));
        connection_bar.set_style(connection_style);
        connection_bar.set_prefix("  Link");

        Self {
            multi,
            step_bar,
            status_bar,
            connection_bar,
            verbose,
        }
    }

    /// Print a line via `MultiProgress`, falling back to `eprintln!` if
    /// the rich UI fails.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    /// Run a blocking closure with the bars suspended, so dialoguer
    /// prompts render cleanly.
    pub fn suspend<T>(&self, f: impl FnOnce() -> T) -> T {
        self.multi.suspend(f)
    }

    /// Redraw everything from a reconciled snapshot.
    pub fn render(&self, state: &GenerationState) {
        let completed = state
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count() as u64;
        self.step_bar.set_position(completed);
        self.step_bar
            .set_message(state.current_step.display_name().to_string());

        let message = if state.is_waiting_for_input {
            let prompt = state
                .input_type
                .map(|t| t.as_str())
                .unwrap_or("user input");
            format!(
                "{WAITING}{} — waiting for {}",
                state.current_step.display_name(),
                style(prompt).yellow()
            )
        } else {
            match &state.status {
                ProcessStatus::Completed => format!("{CHECK}Generation complete"),
                ProcessStatus::Error => format!(
                    "{CROSS}{}",
                    style(state.error.as_deref().unwrap_or("Generation failed")).red()
                ),
                ProcessStatus::Paused => format!("{WAITING}Paused"),
                ProcessStatus::Cancelled => format!("{CROSS}Cancelled"),
                _ => format!("{RUNNING}{}", state.current_step.display_name()),
            }
        };
        self.status_bar.set_message(message);

        if self.verbose {
            if let Some(error) = &state.error {
                self.print_line(format!("  {}", style(error).red()));
            }
        }
    }

    /// Redraw the connection line from a manager snapshot.
    pub fn connection(&self, connection: &ConnectionState) {
        let message = if connection.is_connected {
            let sync = connection
                .last_sync_time
                .map(|t| format!("last sync {}", t.format("%H:%M:%S")))
                .unwrap_or_else(|| "synced".to_string());
            format!("{}connected ({sync})", PLUG)
        } else if connection.is_connecting {
            format!(
                "{}connecting (attempt {})",
                PLUG,
                connection.attempts.max(1)
            )
        } else {
            let detail = connection
                .last_error
                .as_deref()
                .unwrap_or("disconnected")
                .to_string();
            format!("{}{}", PLUG, style(detail).dim())
        };
        self.connection_bar.set_message(message);
    }

    /// Announce a freshly completed section in verbose mode.
    pub fn section_done(&self, index: u32, title: Option<&str>) {
        if self.verbose {
            self.print_line(format!(
                "  {ARTICLE}section {} done{}",
                index,
                title.map(|t| format!(": {t}")).unwrap_or_default()
            ));
        }
    }

    /// Tear the bars down with a final verdict line.
    pub fn finish(&self, state: &GenerationState) {
        self.step_bar.finish_and_clear();
        self.status_bar.finish_and_clear();
        self.connection_bar.finish_and_clear();
        match &state.status {
            ProcessStatus::Completed => {
                let target = state
                    .article_id
                    .as_deref()
                    .map(|id| format!(" (article {id})"))
                    .unwrap_or_default();
                self.print_line(format!("{SPARKLE}Generation complete{target}"));
            }
            ProcessStatus::Error => self.print_line(format!(
                "{CROSS}{}",
                state.error.as_deref().unwrap_or("Generation failed")
            )),
            ProcessStatus::Cancelled => self.print_line(format!("{CROSS}Generation cancelled")),
            other => self.print_line(format!("Stopped while {other}")),
        }
    }
}
