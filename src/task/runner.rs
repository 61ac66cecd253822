use crate::task::error::{TaskError, TaskResult};
use crate::task::{Task, TaskCore, TaskListener, drive, schedule};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{debug, warn};
use std::time::Duration;

const BAR_LENGTH: u64 = 1000;

/// Runs one task tree at a time to completion, drawing its progress.
pub struct SyncRunner {
    progress: MultiProgress,
    style: ProgressStyle,
    bar: Option<ProgressBar>,
}

impl SyncRunner {
    pub fn new(progress: MultiProgress) -> Self {
        let style = ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {percent:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar());

        Self {
            progress,
            style,
            bar: None,
        }
    }

    /// Runs `task` and re-raises its failure wrapped with what the task was
    /// doing at the time. Ctrl-C aborts the task.
    pub async fn run(&mut self, task: &mut dyn Task) -> TaskResult<()> {
        let interrupt = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Cannot listen for Ctrl-C: {e}");
                std::future::pending::<()>().await;
            }
        };
        self.run_until(task, interrupt).await
    }

    /// Like [`run`](Self::run), aborting the task once `interrupt` completes.
    pub async fn run_until(&mut self, task: &mut dyn Task, interrupt: impl Future) -> TaskResult<()> {
        let outcome = {
            let task = &mut *task;
            let listener = &mut *self;
            tokio::select! {
                outcome = schedule(Duration::ZERO, move || drive(task, listener)) => Some(outcome),
                _ = interrupt => None,
            }
        };

        let outcome = match outcome {
            Some(outcome) => outcome,
            None => {
                warn!("Interrupted, aborting {}", task.core().description());
                task.abort();
                task.core_mut().stop(self, Some(TaskError::Aborted));
                Err(task.core_mut().take_exception().unwrap_or(TaskError::Aborted))
            }
        };

        outcome.map_err(|source| TaskError::Failed {
            description: task.core().description().to_string(),
            source: Box::new(source),
        })
    }
}

impl TaskListener for SyncRunner {
    fn started(&mut self, task: &TaskCore) {
        let bar = self.progress.add(ProgressBar::new(BAR_LENGTH));
        bar.set_style(self.style.clone());
        bar.set_message(task.description().to_string());
        bar.enable_steady_tick(Duration::from_millis(100));
        self.bar = Some(bar);
    }

    fn stopped(&mut self, task: &TaskCore) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
            self.progress.remove(&bar);
        }
        if let Some(e) = task.exception() {
            debug!("{} stopped with {e}", task.description());
        }
    }

    fn progressed(&mut self, _task: &TaskCore, value: f64) {
        if let Some(bar) = &self.bar {
            bar.set_position((value.clamp(0.0, 1.0) * BAR_LENGTH as f64).round() as u64);
        }
    }

    fn described(&mut self, _task: &TaskCore, description: &str) {
        if let Some(bar) = &self.bar {
            bar.set_message(description.to_string());
        }
    }
}
