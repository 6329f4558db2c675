//! Pluggable persistence for task bookkeeping.
//!
//! The [`TaskStore`] trait is the narrow contract convergence consumes:
//! enumerate raw rows (columns plus the encoded definition payload), apply
//! corrective mutations, delete rows, and read a row back with a distinct
//! not-found error once it is gone.
//!
//! ## CAS semantics
//!
//! Corrective mutations carry the state the caller classified the row in.
//! The store applies the mutation only if the row still holds that state,
//! so classification and write stay consistent for a given task even when
//! request handlers race the sweep. A mismatch is not an error: the caller
//! skips the row and the next sweep reclassifies it.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use roster_core::error::Result;
use roster_core::task::{Task, TaskDefinition, TaskState};

/// Result of a compare-and-swap mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasResult<T> {
    /// The mutation was applied; carries the resulting value.
    Applied(T),
    /// The row does not exist.
    NotFound,
    /// The row's state no longer matches what the caller classified.
    StateMismatch {
        /// The state actually found.
        actual: TaskState,
    },
}

impl<T> CasResult<T> {
    /// Returns the applied value, if the mutation went through.
    pub fn applied(self) -> Option<T> {
        match self {
            Self::Applied(value) => Some(value),
            Self::NotFound | Self::StateMismatch { .. } => None,
        }
    }
}

/// One persisted task row: every column plus the raw definition payload.
///
/// Convergence decodes the payload itself so an unreadable row can still be
/// classified (and pruned) from its columns.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRow {
    /// Guid identifying the task.
    pub task_guid: String,
    /// Freshness domain of the task.
    pub domain: String,
    /// Lifecycle state.
    pub state: TaskState,
    /// Cell executing the task; empty while `Pending`.
    pub cell_id: String,
    /// Whether the task finished unsuccessfully.
    pub failed: bool,
    /// Why the task failed, when `failed`.
    pub failure_reason: String,
    /// Result payload, when it finished successfully.
    pub result: String,
    /// When the task was desired.
    pub created_at: DateTime<Utc>,
    /// When the task last changed state.
    pub updated_at: DateTime<Utc>,
    /// When the task first reached `Completed`.
    pub first_completed_at: Option<DateTime<Utc>>,
    /// Encoded definition payload.
    pub definition: Vec<u8>,
}

impl TaskRow {
    /// Encodes a task into its row form.
    ///
    /// # Errors
    ///
    /// Returns an error if the definition cannot be serialized.
    pub fn from_task(task: &Task) -> Result<Self> {
        let definition = serde_json::to_vec(&task.definition).map_err(|e| {
            roster_core::error::Error::Serialization {
                message: format!("failed to encode definition for {}: {e}", task.task_guid),
            }
        })?;
        Ok(Self {
            task_guid: task.task_guid.clone(),
            domain: task.domain.clone(),
            state: task.state,
            cell_id: task.cell_id.clone(),
            failed: task.failed,
            failure_reason: task.failure_reason.clone(),
            result: task.result.clone(),
            created_at: task.created_at,
            updated_at: task.updated_at,
            first_completed_at: task.first_completed_at,
            definition,
        })
    }

    /// Decodes the full task, definition included.
    ///
    /// # Errors
    ///
    /// Returns a decode error if the stored definition payload is
    /// unreadable.
    pub fn decode(&self) -> Result<Task> {
        let definition: TaskDefinition =
            serde_json::from_slice(&self.definition).map_err(|e| {
                roster_core::error::Error::Decode {
                    message: format!("task {} has unreadable definition: {e}", self.task_guid),
                }
            })?;
        Ok(self.task_with_definition(definition))
    }

    /// Builds the task value from the row columns and a caller-supplied
    /// definition. Used for removal events on rows whose stored payload no
    /// longer decodes.
    #[must_use]
    pub fn task_with_definition(&self, definition: TaskDefinition) -> Task {
        Task {
            task_guid: self.task_guid.clone(),
            domain: self.domain.clone(),
            definition,
            state: self.state,
            cell_id: self.cell_id.clone(),
            failed: self.failed,
            failure_reason: self.failure_reason.clone(),
            result: self.result.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            first_completed_at: self.first_completed_at,
        }
    }
}

/// Storage contract consumed by task convergence.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Enumerates every task row for a convergence sweep, in a stable
    /// order.
    async fn rows_for_convergence(&self) -> Result<Vec<TaskRow>>;

    /// Reads one task.
    ///
    /// # Errors
    ///
    /// Returns [`roster_core::error::Error::ResourceNotFound`] once the row
    /// has been deleted, and a decode error if its definition payload is
    /// unreadable.
    async fn task_by_guid(&self, task_guid: &str) -> Result<Task>;

    /// Fails the task — `Completed` with `failed` set and the result
    /// cleared — if it is still in `expected` state.
    async fn fail_task(
        &self,
        task_guid: &str,
        expected: TaskState,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<CasResult<Task>>;

    /// Demotes a `Resolving` task back to `Completed` so its completion
    /// callback can be retried.
    async fn demote_task(&self, task_guid: &str, now: DateTime<Utc>) -> Result<CasResult<Task>>;

    /// Deletes the row outright.
    async fn delete_task(&self, task_guid: &str) -> Result<CasResult<()>>;
}
