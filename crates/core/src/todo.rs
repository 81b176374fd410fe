//! Task plan kept by the agent while working through a request.
//!
//! The plan lives in the conversation state and is injected into the model
//! context as a second system message whenever it is non-empty.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: usize,
    pub description: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Failure reason for `Failed` tasks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// An ordered list of tasks with monotonically increasing ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPlan {
    tasks: Vec<Task>,
    next_id: usize,
}

impl Default for TaskPlan {
    fn default() -> Self {
        Self {
            tasks: Vec::new(),
            next_id: 1,
        }
    }
}

impl TaskPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pending task and return its id.
    pub fn add(&mut self, description: impl Into<String>) -> usize {
        let id = self.next_id;
        self.tasks.push(Task {
            id,
            description: description.into(),
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            error: None,
        });
        self.next_id += 1;
        id
    }

    /// Mark a pending task as done.
    pub fn complete(&mut self, id: usize) -> Result<(), StateError> {
        let task = self.pending_mut(id)?;
        task.status = TaskStatus::Done;
        task.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Mark a pending task as failed with a reason.
    pub fn fail(&mut self, id: usize, reason: impl Into<String>) -> Result<(), StateError> {
        let task = self.pending_mut(id)?;
        task.status = TaskStatus::Failed;
        task.error = Some(reason.into());
        Ok(())
    }

    fn pending_mut(&mut self, id: usize) -> Result<&mut Task, StateError> {
        let task = self
            .tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(StateError::TaskNotFound(id))?;
        if task.status != TaskStatus::Pending {
            return Err(StateError::TaskAlreadyClosed(id));
        }
        Ok(task)
    }

    /// Remove all tasks and reset ids.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// (pending, done, failed)
    pub fn stats(&self) -> (usize, usize, usize) {
        self.tasks.iter().fold((0, 0, 0), |(p, d, f), t| match t.status {
            TaskStatus::Pending => (p + 1, d, f),
            TaskStatus::Done => (p, d + 1, f),
            TaskStatus::Failed => (p, d, f + 1),
        })
    }
}

impl std::fmt::Display for TaskPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.tasks.is_empty() {
            return write!(f, "No active tasks");
        }

        let (pending, done, failed) = self.stats();
        writeln!(
            f,
            "CURRENT PLAN ({pending} pending, {done} done, {failed} failed):"
        )?;
        for task in &self.tasks {
            let mark = match task.status {
                TaskStatus::Pending => "[ ]",
                TaskStatus::Done => "[✓]",
                TaskStatus::Failed => "[✗]",
            };
            write!(f, "{mark} {}. {}", task.id, task.description)?;
            if let Some(reason) = &task.error {
                write!(f, " (failed: {reason})")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
