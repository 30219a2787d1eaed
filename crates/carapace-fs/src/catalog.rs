//! Catalog seam: which allocations live on this node, and what tasks
//! they run.

use std::collections::HashMap;
use std::sync::Arc;

use carapace_allocdir::AllocDirFs;
use chrono::{DateTime, Utc};

use crate::error::Result;

/// Runtime state of one task within an allocation.
#[derive(Debug, Clone, Default)]
pub struct TaskState {
    /// When the task first started, if it ever has.
    pub started_at: Option<DateTime<Utc>>,
}

impl TaskState {
    /// A task that has started at the given time.
    #[must_use]
    pub fn started(at: DateTime<Utc>) -> Self {
        Self {
            started_at: Some(at),
        }
    }

    /// Returns true once the task has started at least once.
    #[must_use]
    pub fn has_started(&self) -> bool {
        self.started_at.is_some()
    }
}

/// Shape of one allocation: its tasks and their states.
#[derive(Debug, Clone, Default)]
pub struct AllocInfo {
    /// Task states keyed by task name.
    pub tasks: HashMap<String, TaskState>,
}

impl AllocInfo {
    /// Builds an allocation description from `(name, state)` pairs.
    #[must_use]
    pub fn with_tasks(tasks: impl IntoIterator<Item = (String, TaskState)>) -> Self {
        Self {
            tasks: tasks.into_iter().collect(),
        }
    }

    /// Returns true when the allocation runs a task with this name.
    #[must_use]
    pub fn has_task(&self, task: &str) -> bool {
        self.tasks.contains_key(task)
    }

    /// Returns true when the named task has started at least once.
    #[must_use]
    pub fn task_started(&self, task: &str) -> bool {
        self.tasks.get(task).is_some_and(TaskState::has_started)
    }
}

/// Looks up allocations hosted on this node.
pub trait AllocCatalog: Send + Sync {
    /// Returns the directory view of an allocation.
    ///
    /// # Errors
    ///
    /// Returns [`FsError::UnknownAllocation`](crate::FsError::UnknownAllocation)
    /// when the node does not host the allocation.
    fn alloc_dir(&self, alloc_id: &str) -> Result<Arc<dyn AllocDirFs>>;

    /// Returns the task shape of an allocation.
    ///
    /// # Errors
    ///
    /// Returns [`FsError::UnknownAllocation`](crate::FsError::UnknownAllocation)
    /// when the node does not host the allocation.
    fn alloc_info(&self, alloc_id: &str) -> Result<AllocInfo>;
}
