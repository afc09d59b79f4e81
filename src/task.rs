//! Cooperative, tree-structured task scheduler.
//!
//! Tasks are owned by the caller and lent to a [`TaskScheduler`], which
//! addresses them through stable [`TaskId`] handles. Every task carries its
//! own ordered list of child tasks, so schedulers compose into a tree. One
//! [`TaskScheduler::run_scheduler`] pass walks the tree depth-first, running
//! a task's children before the task itself and giving each ready task
//! exactly one call to [`Task::run_once`].
//!
//! # Usage
//!
//! ```ignore
//! let mut scheduler: TaskScheduler<'_, 8> = TaskScheduler::new();
//! let link = scheduler.register(&mut serial_link)?;
//! scheduler.add_task(link)?;
//!
//! loop {
//!     scheduler.run_scheduler();
//! }
//! ```

use core::fmt;

use heapless::Vec;

use crate::setup::{SetupCallee, SetupError};

/// A unit of cooperative work.
///
/// `setup` runs once, before the first `run_once`. Neither `can_run` nor
/// `run_once` may block: a task that waits stalls every other task in the tree.
pub trait Task: SetupCallee {
    /// Cheap readiness check, e.g. "is there buffered input?"
    fn can_run(&self) -> bool;

    /// Perform at most one unit of work
    fn run_once(&mut self);
}

/// Handle of a task registered with a [`TaskScheduler`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(usize);

impl TaskId {
    pub const fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskError {
    /// No room left for another task
    TableFull,
    /// The target task list is full
    SchedulerFull,
    UnknownTask(TaskId),
    /// The task would become its own descendant
    Cycle,
    /// The task already sits in another task list
    AlreadyScheduled,
    Setup(SetupError),
}

impl From<SetupError> for TaskError {
    fn from(err: SetupError) -> Self {
        Self::Setup(err)
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TableFull => f.write_str("task table is full"),
            Self::SchedulerFull => f.write_str("task list is full"),
            Self::UnknownTask(id) => write!(f, "unknown task #{}", id.0),
            Self::Cycle => f.write_str("task would be scheduled beneath itself"),
            Self::AlreadyScheduled => f.write_str("task is already scheduled elsewhere"),
            Self::Setup(err) => write!(f, "{}", err),
        }
    }
}

/// Ordered set of tasks; insertion order is execution order
#[derive(Debug, Clone, Default)]
pub struct TaskList<const MAX_TASKS: usize> {
    tasks: Vec<TaskId, MAX_TASKS>,
}

impl<const MAX_TASKS: usize> TaskList<MAX_TASKS> {
    pub const fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    pub fn ids(&self) -> &[TaskId] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains(&id)
    }

    /// Append `id` unless present. Returns whether it was appended.
    fn insert(&mut self, id: TaskId) -> Result<bool, TaskError> {
        if self.contains(id) {
            return Ok(false);
        }
        self.tasks.push(id).map_err(|_| TaskError::SchedulerFull)?;
        Ok(true)
    }

    fn remove(&mut self, id: TaskId) -> bool {
        match self.tasks.iter().position(|known| *known == id) {
            Some(index) => {
                self.tasks.remove(index);
                true
            }
            None => false,
        }
    }
}

struct TaskEntry<'a, const MAX_TASKS: usize> {
    task: &'a mut (dyn Task + 'a),
    is_setup: bool,
    children: TaskList<MAX_TASKS>,
}

/// Root scheduler and arena of every task in the tree
pub struct TaskScheduler<'a, const MAX_TASKS: usize> {
    entries: Vec<TaskEntry<'a, MAX_TASKS>, MAX_TASKS>,
    root: TaskList<MAX_TASKS>,
}

impl<'a, const MAX_TASKS: usize> TaskScheduler<'a, MAX_TASKS> {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            root: TaskList::new(),
        }
    }

    /// Lend `task` to the scheduler without scheduling it yet
    pub fn register(&mut self, task: &'a mut (dyn Task + 'a)) -> Result<TaskId, TaskError> {
        let id = TaskId(self.entries.len());
        log_debug!("registering task \"{}\" as #{}", task.name(), id.0);
        self.entries
            .push(TaskEntry {
                task,
                is_setup: false,
                children: TaskList::new(),
            })
            .map_err(|_| TaskError::TableFull)?;
        Ok(id)
    }

    /// Schedule `id` at the root, setting it up if it never was.
    ///
    /// Returns whether the task was newly added. Adding a task that is
    /// already scheduled is a no-op.
    pub fn add_task(&mut self, id: TaskId) -> Result<bool, TaskError> {
        self.schedule(None, id)
    }

    /// Schedule `child` beneath `parent`, setting it up if it never was
    pub fn add_child_task(&mut self, parent: TaskId, child: TaskId) -> Result<bool, TaskError> {
        self.schedule(Some(parent), child)
    }

    /// Unschedule `id` from the root. Its setup state is kept.
    pub fn remove_task(&mut self, id: TaskId) -> bool {
        self.root.remove(id)
    }

    pub fn remove_child_task(&mut self, parent: TaskId, child: TaskId) -> bool {
        self.entries
            .get_mut(parent.0)
            .is_some_and(|entry| entry.children.remove(child))
    }

    /// Run one pass over the tree
    pub fn run_scheduler(&mut self) {
        let order = self.root.clone();
        for id in order.ids() {
            self.run_task(*id);
        }
    }

    /// Number of tasks scheduled at the root
    pub fn task_count(&self) -> usize {
        self.root.len()
    }

    pub fn child_count(&self, parent: TaskId) -> usize {
        self.entries.get(parent.0).map_or(0, |entry| entry.children.len())
    }

    pub fn tasks(&self) -> &[TaskId] {
        self.root.ids()
    }

    pub fn children(&self, parent: TaskId) -> &[TaskId] {
        self.entries
            .get(parent.0)
            .map(|entry| entry.children.ids())
            .unwrap_or(&[])
    }

    pub fn is_setup(&self, id: TaskId) -> bool {
        self.entries.get(id.0).is_some_and(|entry| entry.is_setup)
    }

    pub fn task(&self, id: TaskId) -> Option<&dyn Task> {
        self.entries.get(id.0).map(|entry| &*entry.task as &dyn Task)
    }

    pub fn task_mut(&mut self, id: TaskId) -> Option<&mut (dyn Task + 'a)> {
        self.entries.get_mut(id.0).map(|entry| &mut *entry.task)
    }

    fn schedule(&mut self, parent: Option<TaskId>, id: TaskId) -> Result<bool, TaskError> {
        if id.0 >= self.entries.len() {
            return Err(TaskError::UnknownTask(id));
        }
        if let Some(parent) = parent {
            if parent.0 >= self.entries.len() {
                return Err(TaskError::UnknownTask(parent));
            }
            if parent == id || self.reaches(id, parent) {
                return Err(TaskError::Cycle);
            }
        }
        if self.placed_outside(id, parent) {
            return Err(TaskError::AlreadyScheduled);
        }
        let inserted = match parent {
            None => self.root.insert(id)?,
            Some(parent) => self.entries[parent.0].children.insert(id)?,
        };

        let entry = &mut self.entries[id.0];
        if entry.is_setup {
            return Ok(inserted);
        }
        log_debug!("setting up task \"{}\"", entry.task.name());
        match entry.task.setup() {
            Ok(()) => {
                entry.is_setup = true;
                Ok(inserted)
            }
            Err(err) => {
                log_error!("task \"{}\" setup failed: {}", entry.task.name(), err);
                if inserted {
                    match parent {
                        None => self.root.remove(id),
                        Some(parent) => self.entries[parent.0].children.remove(id),
                    };
                }
                Err(TaskError::Setup(err))
            }
        }
    }

    /// Whether `id` sits in a list other than the root (`None`) or `parent`'s children
    fn placed_outside(&self, id: TaskId, parent: Option<TaskId>) -> bool {
        (parent.is_some() && self.root.contains(id))
            || self
                .entries
                .iter()
                .enumerate()
                .any(|(index, entry)| parent != Some(TaskId(index)) && entry.children.contains(id))
    }

    /// Whether `target` is somewhere beneath `from`
    fn reaches(&self, from: TaskId, target: TaskId) -> bool {
        self.entries.get(from.0).is_some_and(|entry| {
            entry
                .children
                .ids()
                .iter()
                .any(|child| *child == target || self.reaches(*child, target))
        })
    }

    fn run_task(&mut self, id: TaskId) {
        let Some(entry) = self.entries.get(id.0) else {
            return;
        };
        let children = entry.children.clone();
        for child in children.ids() {
            self.run_task(*child);
        }

        if let Some(entry) = self.entries.get_mut(id.0) {
            if entry.is_setup && entry.task.can_run() {
                entry.task.run_once();
            }
        }
    }
}

impl<const MAX_TASKS: usize> Default for TaskScheduler<'_, MAX_TASKS> {
    fn default() -> Self {
        Self::new()
    }
}
