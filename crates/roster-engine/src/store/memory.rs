//! In-memory store implementation for testing.
//!
//! This module provides [`InMemoryTaskStore`], a simple in-memory
//! implementation of the [`TaskStore`] trait suitable for testing and
//! development.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: No durability, no cross-process
//!   coordination
//! - **Single-process only**: Rows are not visible across process
//!   boundaries
//!
//! The write guard held across a mutation is the row-level transaction:
//! classification state is revalidated under it before any write.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use roster_core::error::{Error, Result};
use roster_core::task::{Task, TaskState};

use super::{CasResult, TaskRow, TaskStore};

/// In-memory task store for testing.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    rows: RwLock<HashMap<String, TaskRow>>,
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("task store lock poisoned")
}

impl InMemoryTaskStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts (or replaces) a row.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn insert(&self, row: TaskRow) -> Result<()> {
        let mut rows = self.rows.write().map_err(poison_err)?;
        rows.insert(row.task_guid.clone(), row);
        Ok(())
    }

    /// Inserts a task, encoding its definition.
    ///
    /// # Errors
    ///
    /// Returns an error if the definition cannot be encoded or the lock is
    /// poisoned.
    pub fn insert_task(&self, task: &Task) -> Result<()> {
        self.insert(TaskRow::from_task(task)?)
    }

    /// Replaces the stored definition payload with bytes that do not
    /// decode. Test hook for the unreadable-row paths.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the row does not exist.
    pub fn corrupt_definition(&self, task_guid: &str) -> Result<()> {
        let mut rows = self.rows.write().map_err(poison_err)?;
        let row = rows
            .get_mut(task_guid)
            .ok_or_else(|| Error::not_found(task_guid))?;
        row.definition = b"garbage".to_vec();
        Ok(())
    }

    /// Returns the number of rows currently stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn row_count(&self) -> Result<usize> {
        let rows = self.rows.read().map_err(poison_err)?;
        Ok(rows.len())
    }

    /// Returns true if a row exists for the guid.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn contains(&self, task_guid: &str) -> Result<bool> {
        let rows = self.rows.read().map_err(poison_err)?;
        Ok(rows.contains_key(task_guid))
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn rows_for_convergence(&self) -> Result<Vec<TaskRow>> {
        let mut rows: Vec<TaskRow> = {
            let rows = self.rows.read().map_err(poison_err)?;
            rows.values().cloned().collect()
        };
        rows.sort_by(|a, b| a.task_guid.cmp(&b.task_guid));
        Ok(rows)
    }

    async fn task_by_guid(&self, task_guid: &str) -> Result<Task> {
        let row = {
            let rows = self.rows.read().map_err(poison_err)?;
            rows.get(task_guid).cloned()
        };
        row.ok_or_else(|| Error::not_found(task_guid))?.decode()
    }

    #[tracing::instrument(skip(self), fields(task_guid, expected = %expected))]
    async fn fail_task(
        &self,
        task_guid: &str,
        expected: TaskState,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<CasResult<Task>> {
        let mut rows = self.rows.write().map_err(poison_err)?;
        let Some(row) = rows.get_mut(task_guid) else {
            return Ok(CasResult::NotFound);
        };
        if row.state != expected {
            return Ok(CasResult::StateMismatch { actual: row.state });
        }

        let mut task = row.decode()?;
        task.fail(reason, now)?;
        *row = TaskRow::from_task(&task)?;
        Ok(CasResult::Applied(task))
    }

    #[tracing::instrument(skip(self), fields(task_guid))]
    async fn demote_task(&self, task_guid: &str, now: DateTime<Utc>) -> Result<CasResult<Task>> {
        let mut rows = self.rows.write().map_err(poison_err)?;
        let Some(row) = rows.get_mut(task_guid) else {
            return Ok(CasResult::NotFound);
        };
        if row.state != TaskState::Resolving {
            return Ok(CasResult::StateMismatch { actual: row.state });
        }

        let mut task = row.decode()?;
        task.demote_to_completed(now)?;
        *row = TaskRow::from_task(&task)?;
        Ok(CasResult::Applied(task))
    }

    async fn delete_task(&self, task_guid: &str) -> Result<CasResult<()>> {
        let mut rows = self.rows.write().map_err(poison_err)?;
        if rows.remove(task_guid).is_some() {
            Ok(CasResult::Applied(()))
        } else {
            Ok(CasResult::NotFound)
        }
    }
}
