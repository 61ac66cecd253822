use crate::task::error::TaskResult;
use crate::task::{Task, TaskCore, TaskListener, drive};
use futures::FutureExt;
use futures::future::LocalBoxFuture;
use log::{debug, warn};

/// Forwards a child's events to its composite, with the child's progress
/// taken as the composite's own.
struct SeparateRelay<'a, 'l> {
    core: &'a mut TaskCore,
    parent: &'a mut (dyn TaskListener + 'l),
    position: usize,
    total: usize,
}

impl TaskListener for SeparateRelay<'_, '_> {
    fn started(&mut self, task: &TaskCore) {
        let description = format!("{} ({} of {}) ...", task.description(), self.position, self.total);
        self.core.set_description(description, self.parent);
        self.core.set_progress(0.0, self.parent);
    }

    fn progressed(&mut self, _task: &TaskCore, value: f64) {
        self.core.set_progress(value, self.parent);
    }

    fn described(&mut self, _task: &TaskCore, description: &str) {
        let description = format!("{description} ({} of {}) ...", self.position, self.total);
        self.core.set_description(description, self.parent);
    }
}

/// Forwards a child's progress as its share of the whole.
struct CombinedRelay<'a, 'l> {
    core: &'a mut TaskCore,
    parent: &'a mut (dyn TaskListener + 'l),
    completed: usize,
    total: usize,
}

impl TaskListener for CombinedRelay<'_, '_> {
    fn progressed(&mut self, _task: &TaskCore, value: f64) {
        let overall = (self.completed as f64 + value) / self.total as f64;
        self.core.set_progress(overall, self.parent);
    }

    /// A finished child counts in full, whatever it last reported.
    fn stopped(&mut self, task: &TaskCore) {
        let overall = (self.completed + 1) as f64 / self.total as f64;
        if task.exception().is_none() && self.core.progress() < overall {
            self.core.set_progress(overall, self.parent);
        }
    }
}

/// The children of a composite task, in the order they run.
pub trait TaskList {
    fn tasks_mut(&mut self) -> Vec<&mut dyn Task>;
}

impl<T: Task> TaskList for Vec<T> {
    fn tasks_mut(&mut self) -> Vec<&mut dyn Task> {
        self.iter_mut().map(|task| task as &mut dyn Task).collect()
    }
}

/// Runs `tasks` one after another on behalf of `core`. The first failure
/// stops the remaining tasks from starting.
async fn run_separate(
    core: &mut TaskCore,
    listener: &mut dyn TaskListener,
    mut tasks: Vec<&mut dyn Task>,
) -> TaskResult<()> {
    if tasks.is_empty() {
        warn!("{}: no tasks", core.description());
    }

    let total = tasks.len();
    for (i, task) in tasks.iter_mut().enumerate() {
        debug!("Starting task {} of {total}: {}", i + 1, task.core().description());
        let mut relay = SeparateRelay {
            core: &mut *core,
            parent: &mut *listener,
            position: i + 1,
            total,
        };
        if let Err(e) = drive(&mut **task, &mut relay).await {
            warn!("{} failed: {e}", task.core().description());
            return Err(e);
        }
    }

    Ok(())
}

/// Like [`run_separate`], with progress spread evenly over all tasks.
async fn run_combined(
    core: &mut TaskCore,
    listener: &mut dyn TaskListener,
    mut tasks: Vec<&mut dyn Task>,
) -> TaskResult<()> {
    if tasks.is_empty() {
        warn!("{}: no tasks", core.description());
    }

    let total = tasks.len();
    for (i, task) in tasks.iter_mut().enumerate() {
        let mut relay = CombinedRelay {
            core: &mut *core,
            parent: &mut *listener,
            completed: i,
            total,
        };
        if let Err(e) = drive(&mut **task, &mut relay).await {
            warn!("{} failed: {e}", task.core().description());
            return Err(e);
        }
    }

    Ok(())
}

/// Runs its tasks in order, reporting each one's progress from 0 to 1.
pub struct MultiSeparateTask<L> {
    core: TaskCore,
    tasks: L,
}

impl<L: TaskList> MultiSeparateTask<L> {
    pub fn new(description: impl Into<String>, tasks: L) -> Self {
        Self {
            core: TaskCore::new(description),
            tasks,
        }
    }

    pub fn tasks(&self) -> &L {
        &self.tasks
    }
}

impl<L: TaskList> Task for MultiSeparateTask<L> {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TaskCore {
        &mut self.core
    }

    fn run<'a>(&'a mut self, listener: &'a mut dyn TaskListener) -> LocalBoxFuture<'a, TaskResult<()>> {
        async move {
            let Self { core, tasks } = self;
            run_separate(core, listener, tasks.tasks_mut()).await
        }
        .boxed_local()
    }

    fn abort(&mut self) {
        for task in self.tasks.tasks_mut() {
            task.abort();
        }
    }
}

/// Runs its tasks in order as one job: after `j` of `k` tasks finished, and
/// the next at `p`, progress is `(j + p) / k`.
pub struct MultiCombinedTask<L> {
    core: TaskCore,
    tasks: L,
}

impl<L: TaskList> MultiCombinedTask<L> {
    pub fn new(description: impl Into<String>, tasks: L) -> Self {
        Self {
            core: TaskCore::new(description),
            tasks,
        }
    }

    pub fn into_tasks(self) -> L {
        self.tasks
    }
}

impl<L: TaskList> Task for MultiCombinedTask<L> {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TaskCore {
        &mut self.core
    }

    fn run<'a>(&'a mut self, listener: &'a mut dyn TaskListener) -> LocalBoxFuture<'a, TaskResult<()>> {
        async move {
            let Self { core, tasks } = self;
            run_combined(core, listener, tasks.tasks_mut()).await
        }
        .boxed_local()
    }

    fn abort(&mut self) {
        for task in self.tasks.tasks_mut() {
            task.abort();
        }
    }
}
