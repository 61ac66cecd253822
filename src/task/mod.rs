use crate::task::error::{TaskError, TaskResult};
use futures::future::LocalBoxFuture;
use log::debug;
use std::future::Future;
use std::time::Duration;

pub mod error;
pub mod multi;
pub mod popen;
pub mod runner;

/// Smallest progress change worth telling listeners about.
pub const PROGRESS_INCREMENT: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Running,
    Stopped,
}

/// State shared by every task: what it is doing, how far along it is and how
/// it ended.
#[derive(Debug)]
pub struct TaskCore {
    description: String,
    progress: f64,
    increment: f64,
    state: TaskState,
    exception: Option<TaskError>,
}

impl TaskCore {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            progress: 0.0,
            increment: PROGRESS_INCREMENT,
            state: TaskState::Idle,
            exception: None,
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Set while a stopped task's listeners are notified.
    pub fn exception(&self) -> Option<&TaskError> {
        self.exception.as_ref()
    }

    pub fn start(&mut self, listener: &mut dyn TaskListener) {
        debug!("Starting {}", self.description);
        self.state = TaskState::Running;
        self.exception = None;
        self.progress = 0.0;
        listener.started(self);
    }

    pub fn stop(&mut self, listener: &mut dyn TaskListener, exception: Option<TaskError>) {
        debug!("Stopping {}", self.description);
        if self.state != TaskState::Running {
            debug!("{} stopped without running", self.description);
        }
        self.state = TaskState::Stopped;
        self.exception = exception;
        listener.stopped(self);
    }

    /// Notifies about changes bigger than the increment, and always about
    /// reaching 0 or 1.
    pub fn set_progress(&mut self, value: f64, listener: &mut dyn TaskListener) {
        if value - self.progress > self.increment || value >= 1.0 || value == 0.0 {
            self.progress = value;
            listener.progressed(self, value);
        }
    }

    pub fn set_description(&mut self, description: impl Into<String>, listener: &mut dyn TaskListener) {
        let description = description.into();
        if description != self.description {
            listener.described(self, &description);
            self.description = description;
        }
    }

    fn take_exception(&mut self) -> Option<TaskError> {
        self.exception.take()
    }
}

/// Receives task events. Every method defaults to doing nothing.
pub trait TaskListener {
    fn started(&mut self, _task: &TaskCore) {}

    fn stopped(&mut self, _task: &TaskCore) {}

    fn progressed(&mut self, _task: &TaskCore, _value: f64) {}

    fn described(&mut self, _task: &TaskCore, _description: &str) {}
}

/// Listener for tasks nobody watches.
pub struct NoListener;

impl TaskListener for NoListener {}

pub trait Task {
    fn core(&self) -> &TaskCore;

    fn core_mut(&mut self) -> &mut TaskCore;

    /// The work between start and stop. Progress and description changes go
    /// through the core with `listener`.
    fn run<'a>(&'a mut self, listener: &'a mut dyn TaskListener) -> LocalBoxFuture<'a, TaskResult<()>>;

    /// Terminates whatever the task is waiting on.
    fn abort(&mut self) {}
}

/// Starts `task`, runs it and stops it exactly once, whatever the outcome.
pub async fn drive(task: &mut dyn Task, listener: &mut dyn TaskListener) -> TaskResult<()> {
    task.core_mut().start(listener);
    let outcome = task.run(listener).await;
    task.core_mut().stop(listener, outcome.err());

    match task.core_mut().take_exception() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Runs `callback` once `delta` has passed.
pub async fn schedule<F, Fut, T>(delta: Duration, callback: F) -> T
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    if !delta.is_zero() {
        tokio::time::sleep(delta).await;
    }
    callback().await
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use futures::FutureExt;

    /// Records every event as a line of text.
    #[derive(Default)]
    pub(crate) struct Recorder {
        pub(crate) events: Vec<String>,
        pub(crate) progress: Vec<f64>,
    }

    impl TaskListener for Recorder {
        fn started(&mut self, task: &TaskCore) {
            self.events.push(format!("started {}", task.description()));
        }

        fn stopped(&mut self, task: &TaskCore) {
            let outcome = if task.exception().is_some() { "failed" } else { "ok" };
            self.events.push(format!("stopped {} {outcome}", task.description()));
        }

        fn progressed(&mut self, _task: &TaskCore, value: f64) {
            self.progress.push(value);
        }

        fn described(&mut self, _task: &TaskCore, description: &str) {
            self.events.push(format!("described {description}"));
        }
    }

    /// Walks through `steps` of progress and optionally fails at the end.
    pub(crate) struct Steps {
        core: TaskCore,
        steps: Vec<f64>,
        fail: bool,
        pub(crate) runs: u32,
    }

    impl Steps {
        pub(crate) fn new(description: &str, steps: &[f64], fail: bool) -> Self {
            Self {
                core: TaskCore::new(description),
                steps: steps.to_vec(),
                fail,
                runs: 0,
            }
        }
    }

    impl Task for Steps {
        fn core(&self) -> &TaskCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut TaskCore {
            &mut self.core
        }

        fn run<'a>(&'a mut self, listener: &'a mut dyn TaskListener) -> LocalBoxFuture<'a, TaskResult<()>> {
            async move {
                self.runs += 1;
                for step in self.steps.clone() {
                    tokio::task::yield_now().await;
                    self.core.set_progress(step, listener);
                }
                if self.fail {
                    return Err(TaskError::Checksum(format!("{} failed", self.core.description())));
                }
                Ok(())
            }
            .boxed_local()
        }
    }

    #[tokio::test]
    async fn start_and_stop_are_paired() {
        let mut task = Steps::new("steps", &[0.5, 1.0], false);
        let mut recorder = Recorder::default();

        drive(&mut task, &mut recorder).await.unwrap();
        assert_eq!(recorder.events, vec!["started steps", "stopped steps ok"]);
        assert_eq!(task.core().state(), TaskState::Stopped);
        assert_eq!(task.core().progress(), 1.0);
    }

    #[tokio::test]
    async fn failures_still_stop() {
        let mut task = Steps::new("steps", &[0.5], true);
        let mut recorder = Recorder::default();

        let result = drive(&mut task, &mut recorder).await;
        assert!(matches!(result, Err(TaskError::Checksum(_))));
        assert_eq!(recorder.events, vec!["started steps", "stopped steps failed"]);
        assert!(task.core().exception().is_none());
    }

    #[test]
    fn small_progress_changes_are_dropped() {
        let mut core = TaskCore::new("core");
        let mut recorder = Recorder::default();

        for value in [0.0, 0.005, 0.02, 0.025, 0.5, 0.505, 1.0] {
            core.set_progress(value, &mut recorder);
        }
        assert_eq!(recorder.progress, vec![0.0, 0.02, 0.5, 1.0]);
    }

    #[test]
    fn unchanged_description_is_not_announced() {
        let mut core = TaskCore::new("Reading track");
        let mut recorder = Recorder::default();

        core.set_description("Reading track", &mut recorder);
        core.set_description("Verifying track", &mut recorder);
        assert_eq!(recorder.events, vec!["described Verifying track"]);
        assert_eq!(core.description(), "Verifying track");
    }

    #[tokio::test]
    async fn schedule_runs_callback() {
        let value = schedule(Duration::from_millis(1), || async { 42 }).await;
        assert_eq!(value, 42);
    }
}
