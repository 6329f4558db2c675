//! Task convergence sweep.
//!
//! Persisted task state drifts: cells vanish mid-run, auctions get lost,
//! completion callbacks stall, rows rot. The [`TaskConverger`] runs a
//! one-shot reconciliation over every task row, classifies each against
//! the live cell set and the injected clock, applies corrective mutations
//! through the store's CAS contract, and returns the resulting events
//! plus the auction and completion work lists for the caller to dispatch.
//!
//! The sweep never fails as a whole: a row that cannot be processed is
//! logged and skipped, and the next sweep sees it again. Cancellation is
//! honored between rows, never mid-mutation.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use metrics::histogram;
use tokio_util::sync::CancellationToken;

use roster_core::cell::CellSet;
use roster_core::error::Result;
use roster_core::events::Event;
use roster_core::task::{AuctionRequest, Task, TaskDefinition, TaskState};

use crate::clock::Clock;
use crate::config::ConvergenceConfig;
use crate::metrics::{CounterSink, names};
use crate::store::{TaskRow, TaskStore};

/// Failure reason recorded on pending tasks that were never placed.
pub const PENDING_EXPIRED_FAILURE_REASON: &str = "not started within time limit";

/// Failure reason recorded on running tasks whose cell vanished.
pub const CELL_DISAPPEARED_FAILURE_REASON: &str = "cell disappeared before completion";

/// Outcome of one convergence sweep.
#[derive(Debug, Default)]
pub struct TaskConvergenceResult {
    /// Pending tasks that should be auctioned again.
    pub tasks_to_auction: Vec<AuctionRequest>,
    /// Completed tasks whose completion callback should be retried.
    pub tasks_to_complete: Vec<Task>,
    /// Events describing every corrective mutation the sweep applied.
    pub events: Vec<Event>,
}

/// Periodic reconciler for persisted tasks.
pub struct TaskConverger {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn CounterSink>,
}

struct Sweep {
    now: DateTime<Utc>,
    kick: chrono::Duration,
    expire_pending: chrono::Duration,
    expire_completed: chrono::Duration,
    result: TaskConvergenceResult,
    kicked: u64,
    pruned: u64,
}

impl TaskConverger {
    /// Creates a converger over the given store, clock, and counter sink.
    #[must_use]
    pub fn new(store: Arc<dyn TaskStore>, clock: Arc<dyn Clock>, sink: Arc<dyn CounterSink>) -> Self {
        Self { store, clock, sink }
    }

    /// Runs one convergence sweep.
    ///
    /// `cell_set` is the set of currently-present cells; the intervals in
    /// `config` drive expiry and kick decisions. Cancelling `cancel` stops
    /// the sweep at the next row boundary; everything classified so far is
    /// still returned.
    #[tracing::instrument(skip_all, fields(cells = cell_set.len()))]
    pub async fn converge_tasks(
        &self,
        cell_set: &CellSet,
        config: &ConvergenceConfig,
        cancel: &CancellationToken,
    ) -> TaskConvergenceResult {
        let started = Instant::now();
        let mut sweep = Sweep {
            now: self.clock.now(),
            kick: chrono::Duration::from_std(config.kick_interval)
                .unwrap_or(chrono::Duration::MAX),
            expire_pending: chrono::Duration::from_std(config.expire_pending_interval)
                .unwrap_or(chrono::Duration::MAX),
            expire_completed: chrono::Duration::from_std(config.expire_completed_interval)
                .unwrap_or(chrono::Duration::MAX),
            result: TaskConvergenceResult::default(),
            kicked: 0,
            pruned: 0,
        };

        let rows = match self.store.rows_for_convergence().await {
            Ok(rows) => rows,
            Err(error) => {
                tracing::warn!(%error, "failed to enumerate task rows; skipping sweep");
                return sweep.result;
            }
        };

        for row in rows {
            if cancel.is_cancelled() {
                tracing::info!("convergence cancelled; stopping at row boundary");
                break;
            }
            if let Err(error) = self.converge_row(&row, cell_set, &mut sweep).await {
                tracing::warn!(task_guid = %row.task_guid, %error, "skipping task row");
            }
        }

        self.sink
            .increment_counter_with_delta(names::CONVERGENCE_TASKS_KICKED, sweep.kicked);
        self.sink
            .increment_counter_with_delta(names::CONVERGENCE_TASKS_PRUNED, sweep.pruned);
        histogram!(names::CONVERGENCE_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        tracing::info!(
            kicked = sweep.kicked,
            pruned = sweep.pruned,
            to_auction = sweep.result.tasks_to_auction.len(),
            to_complete = sweep.result.tasks_to_complete.len(),
            events = sweep.result.events.len(),
            "task convergence completed"
        );

        sweep.result
    }

    async fn converge_row(
        &self,
        row: &TaskRow,
        cell_set: &CellSet,
        sweep: &mut Sweep,
    ) -> Result<()> {
        let Ok(before) = row.decode() else {
            return self.prune_unreadable(row, sweep).await;
        };

        match row.state {
            TaskState::Pending => self.converge_pending(row, before, sweep).await,
            TaskState::Running => self.converge_running(row, before, cell_set, sweep).await,
            TaskState::Completed => self.converge_completed(row, before, sweep).await,
            TaskState::Resolving => self.converge_resolving(row, before, sweep).await,
        }
    }

    /// Deletes a row whose definition payload no longer decodes.
    ///
    /// Non-pending rows were visible to subscribers, so their deletion is
    /// announced with the columns we still have (and an empty definition).
    async fn prune_unreadable(&self, row: &TaskRow, sweep: &mut Sweep) -> Result<()> {
        tracing::warn!(
            task_guid = %row.task_guid,
            state = %row.state,
            "deleting task with unreadable definition"
        );
        if self.store.delete_task(&row.task_guid).await?.applied().is_some() {
            sweep.pruned += 1;
            if row.state != TaskState::Pending {
                sweep.result.events.push(Event::TaskRemoved {
                    task: row.task_with_definition(TaskDefinition::default()),
                });
            }
        }
        Ok(())
    }

    async fn converge_pending(&self, row: &TaskRow, before: Task, sweep: &mut Sweep) -> Result<()> {
        let age = sweep.now - row.updated_at;
        if age >= sweep.expire_pending {
            let outcome = self
                .store
                .fail_task(
                    &row.task_guid,
                    TaskState::Pending,
                    PENDING_EXPIRED_FAILURE_REASON,
                    sweep.now,
                )
                .await?;
            if let Some(after) = outcome.applied() {
                sweep.result.events.push(Event::TaskChanged { before, after });
                sweep.pruned += 1;
            }
        } else if age >= sweep.kick {
            sweep
                .result
                .tasks_to_auction
                .push(AuctionRequest::from_task(&before));
            sweep.kicked += 1;
        }
        Ok(())
    }

    async fn converge_running(
        &self,
        row: &TaskRow,
        before: Task,
        cell_set: &CellSet,
        sweep: &mut Sweep,
    ) -> Result<()> {
        if cell_set.contains(&row.cell_id) {
            return Ok(());
        }
        tracing::info!(
            task_guid = %row.task_guid,
            cell_id = %row.cell_id,
            "failing task whose cell is no longer present"
        );
        let outcome = self
            .store
            .fail_task(
                &row.task_guid,
                TaskState::Running,
                CELL_DISAPPEARED_FAILURE_REASON,
                sweep.now,
            )
            .await?;
        if let Some(after) = outcome.applied() {
            sweep.result.events.push(Event::TaskChanged { before, after });
            sweep.pruned += 1;
        }
        Ok(())
    }

    async fn converge_completed(
        &self,
        row: &TaskRow,
        before: Task,
        sweep: &mut Sweep,
    ) -> Result<()> {
        let age = sweep.now - row.updated_at;
        if age >= sweep.expire_completed {
            if self.store.delete_task(&row.task_guid).await?.applied().is_some() {
                sweep.result.events.push(Event::TaskRemoved { task: before });
                sweep.pruned += 1;
            }
        } else if age >= sweep.kick {
            sweep.result.tasks_to_complete.push(before);
            sweep.kicked += 1;
        }
        Ok(())
    }

    async fn converge_resolving(
        &self,
        row: &TaskRow,
        before: Task,
        sweep: &mut Sweep,
    ) -> Result<()> {
        let age = sweep.now - row.updated_at;
        if age >= sweep.expire_completed {
            if self.store.delete_task(&row.task_guid).await?.applied().is_some() {
                sweep.result.events.push(Event::TaskRemoved { task: before });
                sweep.pruned += 1;
            }
        } else if age >= sweep.kick {
            let outcome = self.store.demote_task(&row.task_guid, sweep.now).await?;
            if let Some(after) = outcome.applied() {
                sweep.result.events.push(Event::TaskChanged {
                    before,
                    after: after.clone(),
                });
                // The demotion and the completion retry are both kicks.
                sweep.kicked += 1;
                sweep.result.tasks_to_complete.push(after);
                sweep.kicked += 1;
            }
        }
        Ok(())
    }
}
