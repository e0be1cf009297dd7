//! Named tasks and their composition.
//!
//! A [`TaskGraph`] is a registry of named [`Task`]s. A task is either an
//! action, or a composition of other tasks that run in [`series`] or in
//! [`parallel`]. Running a task by name flattens its composition into an
//! explicit dependency graph of actions (see [`plan`]) and executes that graph
//! on a thread pool (see [`runner`]).

mod plan;
pub(crate) mod runner;

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rayon::ThreadPool;

use crate::error::RunError;

pub use runner::{Diagnostics, TaskExecution};

pub type ActionFn = dyn Fn(&TaskContext<'_>) -> anyhow::Result<()> + Send + Sync;

/// Context handed to every running action.
pub struct TaskContext<'a> {
    /// Name of the running action. Inline steps are named after their parent,
    /// e.g. `package#1`.
    pub name: &'a str,
    /// The graph the action runs in, actions may run other tasks through it.
    pub graph: &'a TaskGraph,
    pub span: tracing::Span,
}

/// A unit of work registered under a name.
#[derive(Clone)]
pub enum Task {
    Action(Arc<ActionFn>),
    Series(Vec<Step>),
    Parallel(Vec<Step>),
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Task::Action(_) => write!(f, "Task::Action(*)"),
            Task::Series(steps) => f.debug_tuple("Task::Series").field(steps).finish(),
            Task::Parallel(steps) => f.debug_tuple("Task::Parallel").field(steps).finish(),
        }
    }
}

/// A child of a composition.
#[derive(Debug, Clone)]
pub enum Step {
    /// Refers to a task registered in the graph, resolved when run.
    Named(Cow<'static, str>),
    /// An anonymous task only reachable through its parent.
    Inline(Task),
}

impl From<&'static str> for Step {
    fn from(name: &'static str) -> Self {
        Step::Named(Cow::Borrowed(name))
    }
}

impl From<String> for Step {
    fn from(name: String) -> Self {
        Step::Named(Cow::Owned(name))
    }
}

impl From<Task> for Step {
    fn from(task: Task) -> Self {
        Step::Inline(task)
    }
}

/// Wraps a callback into an action task.
pub fn action<F>(callback: F) -> Task
where
    F: Fn(&TaskContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Task::Action(Arc::new(callback))
}

/// Runs the steps one after another, each step starts only after the
/// previous one completed.
pub fn series<S>(steps: impl IntoIterator<Item = S>) -> Task
where
    S: Into<Step>,
{
    Task::Series(steps.into_iter().map(Into::into).collect())
}

/// Starts all steps together, completes when the slowest one does.
pub fn parallel<S>(steps: impl IntoIterator<Item = S>) -> Task
where
    S: Into<Step>,
{
    Task::Parallel(steps.into_iter().map(Into::into).collect())
}

/// Registry of named tasks, plus the pool they run on.
pub struct TaskGraph {
    tasks: HashMap<String, Task>,
    /// One lock per action name, so that overlapping runs of the same action
    /// never execute at the same time.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    pool: ThreadPool,
}

impl TaskGraph {
    /// Creates an empty graph with a pool of at least four threads.
    pub fn new() -> Result<Self, RunError> {
        let threads = std::thread::available_parallelism()
            .map(usize::from)
            .unwrap_or(1)
            .max(4);

        Self::with_threads(threads)
    }

    pub fn with_threads(threads: usize) -> Result<Self, RunError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("deckbuild-{i}"))
            .build()?;

        Ok(Self {
            tasks: HashMap::new(),
            locks: Mutex::default(),
            pool,
        })
    }

    /// Registers a task under a unique name.
    pub fn register(&mut self, name: impl Into<String>, task: Task) -> Result<(), RunError> {
        let name = name.into();
        if self.tasks.contains_key(&name) {
            return Err(RunError::Duplicate(name));
        }

        tracing::trace!(task = %name, "registered");
        self.tasks.insert(name, task);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Registered task names in alphabetical order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.tasks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub(crate) fn get(&self, name: &str) -> Option<&Task> {
        self.tasks.get(name)
    }

    /// Runs the named task to completion.
    pub fn run(&self, name: &str) -> Result<Diagnostics, RunError> {
        let plan = plan::Plan::build(self, name)?;
        runner::execute(self, &plan, name)
    }

    fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(name.to_string()).or_default().clone()
    }
}

impl std::fmt::Debug for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskGraph")
            .field("tasks", &self.names())
            .finish_non_exhaustive()
    }
}
