//! Task values and their lifecycle.
//!
//! A task is a short-lived workload that runs to completion once. Its
//! lifecycle is `Pending → Running → Completed → Resolving → (removed)`,
//! with corrective transitions applied by convergence when state drifts
//! (cell disappeared, deadlines blown).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Waiting to be auctioned to a cell.
    Pending,
    /// Executing on a cell.
    Running,
    /// Finished (successfully or not); result awaiting pickup.
    Completed,
    /// A client is fetching the result; removal comes next.
    Resolving,
}

impl TaskState {
    /// Returns true if the transition from self to target is valid.
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        match self {
            Self::Pending => matches!(target, Self::Running | Self::Completed),
            Self::Running => matches!(target, Self::Completed),
            Self::Completed => matches!(target, Self::Resolving),
            // Demotion back to Completed is convergence's corrective path.
            Self::Resolving => matches!(target, Self::Completed),
        }
    }

    /// Returns a lowercase label suitable for metrics and logs.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Resolving => "resolving",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Container-facing definition of a task.
///
/// The bookkeeping core treats this as an opaque payload persisted beside
/// the task row; only the placement demands are read back (for auction
/// requests). A row whose stored definition no longer decodes is treated as
/// unreadable and pruned by convergence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    /// Root filesystem the task runs on.
    #[serde(default)]
    pub root_fs: String,
    /// Memory demand, in megabytes.
    #[serde(default)]
    pub memory_mb: i32,
    /// Disk demand, in megabytes.
    #[serde(default)]
    pub disk_mb: i32,
    /// Maximum process count inside the container.
    #[serde(default)]
    pub max_pids: i32,
    /// Tags constraining which cells may host the task.
    #[serde(default)]
    pub placement_tags: Vec<String>,
    /// Path inside the container the result is read from.
    #[serde(default)]
    pub result_file: String,
}

/// One short-lived workload and its bookkeeping state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Guid identifying the task.
    pub task_guid: String,
    /// Freshness domain of the task.
    pub domain: String,
    /// Container-facing definition.
    pub definition: TaskDefinition,
    /// Lifecycle state.
    pub state: TaskState,
    /// Cell executing the task; empty while `Pending`.
    #[serde(default)]
    pub cell_id: String,
    /// Whether the task finished unsuccessfully.
    #[serde(default)]
    pub failed: bool,
    /// Why the task failed, when `failed`.
    #[serde(default)]
    pub failure_reason: String,
    /// Result payload, when it finished successfully.
    #[serde(default)]
    pub result: String,
    /// When the task was desired.
    pub created_at: DateTime<Utc>,
    /// When the task last changed state.
    pub updated_at: DateTime<Utc>,
    /// When the task first reached `Completed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Creates a pending task.
    #[must_use]
    pub fn desire(
        task_guid: impl Into<String>,
        domain: impl Into<String>,
        definition: TaskDefinition,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            task_guid: task_guid.into(),
            domain: domain.into(),
            definition,
            state: TaskState::Pending,
            cell_id: String::new(),
            failed: false,
            failure_reason: String::new(),
            result: String::new(),
            created_at: now,
            updated_at: now,
            first_completed_at: None,
        }
    }

    /// Moves the task to `Running` on the given cell.
    ///
    /// # Errors
    ///
    /// Returns an error unless the task is `Pending`.
    pub fn start(&mut self, cell_id: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        self.guard_transition(TaskState::Running)?;
        self.state = TaskState::Running;
        self.cell_id = cell_id.into();
        self.updated_at = now;
        Ok(())
    }

    /// Moves the task to `Completed` with the worker's outcome.
    ///
    /// # Errors
    ///
    /// Returns an error unless the task is `Running`.
    pub fn complete(
        &mut self,
        failed: bool,
        failure_reason: impl Into<String>,
        result: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.state != TaskState::Running {
            return Err(self.transition_error(TaskState::Completed));
        }
        self.enter_completed(failed, failure_reason.into(), result.into(), now);
        Ok(())
    }

    /// Fails the task from `Pending` or `Running`.
    ///
    /// This is convergence's corrective path: the result is cleared, the
    /// failure reason recorded, and the task lands in `Completed`.
    ///
    /// # Errors
    ///
    /// Returns an error unless the task is `Pending` or `Running`.
    pub fn fail(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        self.guard_transition(TaskState::Completed)?;
        self.enter_completed(true, reason.into(), String::new(), now);
        Ok(())
    }

    /// Moves the task to `Resolving` while a client fetches the result.
    ///
    /// # Errors
    ///
    /// Returns an error unless the task is `Completed`.
    pub fn resolve(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.guard_transition(TaskState::Resolving)?;
        self.state = TaskState::Resolving;
        self.updated_at = now;
        Ok(())
    }

    /// Demotes a `Resolving` task back to `Completed` so its completion
    /// callback can be retried.
    ///
    /// # Errors
    ///
    /// Returns an error unless the task is `Resolving`.
    pub fn demote_to_completed(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.state != TaskState::Resolving {
            return Err(self.transition_error(TaskState::Completed));
        }
        self.state = TaskState::Completed;
        self.updated_at = now;
        Ok(())
    }

    fn enter_completed(
        &mut self,
        failed: bool,
        failure_reason: String,
        result: String,
        now: DateTime<Utc>,
    ) {
        self.state = TaskState::Completed;
        self.failed = failed;
        self.failure_reason = failure_reason;
        self.result = result;
        self.updated_at = now;
        if self.first_completed_at.is_none() {
            self.first_completed_at = Some(now);
        }
    }

    fn guard_transition(&self, target: TaskState) -> Result<()> {
        if self.state.can_transition_to(target) {
            Ok(())
        } else {
            Err(self.transition_error(target))
        }
    }

    fn transition_error(&self, target: TaskState) -> Error {
        Error::InvalidStateTransition {
            from: self.state.to_string(),
            to: target.to_string(),
            reason: format!("task {}", self.task_guid),
        }
    }
}

/// Placement demands of a task, as the auctioneer consumes them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// Memory demand, in megabytes.
    pub memory_mb: i32,
    /// Disk demand, in megabytes.
    pub disk_mb: i32,
    /// Maximum process count.
    pub max_pids: i32,
}

/// A request to auction a pending task onto a cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionRequest {
    /// Guid of the task to place.
    pub task_guid: String,
    /// Freshness domain of the task.
    pub domain: String,
    /// Placement demands from the task definition.
    pub resource: Resource,
    /// Tags constraining which cells may host the task.
    #[serde(default)]
    pub placement_tags: Vec<String>,
}

impl AuctionRequest {
    /// Builds an auction request from a task's identity and definition.
    #[must_use]
    pub fn from_task(task: &Task) -> Self {
        Self {
            task_guid: task.task_guid.clone(),
            domain: task.domain.clone(),
            resource: Resource {
                memory_mb: task.definition.memory_mb,
                disk_mb: task.definition.disk_mb,
                max_pids: task.definition.max_pids,
            },
            placement_tags: task.definition.placement_tags.clone(),
        }
    }
}
