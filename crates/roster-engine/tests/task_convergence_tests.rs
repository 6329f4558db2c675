//! End-to-end tests for the task convergence sweep.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use roster_core::cell::{CellPresence, CellSet};
use roster_core::error::Result;
use roster_core::events::Event;
use roster_core::task::{Task, TaskDefinition, TaskState};
use roster_engine::clock::{Clock, SimulatedClock};
use roster_engine::config::ConvergenceConfig;
use roster_engine::convergence::{
    CELL_DISAPPEARED_FAILURE_REASON, PENDING_EXPIRED_FAILURE_REASON, TaskConvergenceResult,
    TaskConverger,
};
use roster_engine::metrics::{CounterSink, RecordingSink, names};
use roster_engine::store::memory::InMemoryTaskStore;
use roster_engine::store::TaskStore;

const KICK: Duration = Duration::from_secs(10);
const EXPIRE_PENDING: Duration = Duration::from_secs(30);
const EXPIRE_COMPLETED: Duration = Duration::from_secs(3600);

fn config() -> ConvergenceConfig {
    ConvergenceConfig {
        kick_interval: KICK,
        expire_pending_interval: EXPIRE_PENDING,
        expire_completed_interval: EXPIRE_COMPLETED,
    }
}

fn definition() -> TaskDefinition {
    TaskDefinition {
        root_fs: "preloaded:trusty".into(),
        memory_mb: 256,
        disk_mb: 512,
        max_pids: 1024,
        placement_tags: vec!["zone-a".into()],
        result_file: "/tmp/result".into(),
    }
}

struct Fixture {
    store: Arc<InMemoryTaskStore>,
    sink: Arc<RecordingSink>,
    converger: TaskConverger,
    /// Sweep time every row age is computed against.
    now: DateTime<Utc>,
    /// Snapshots of tasks as they were inserted, for before-sides.
    pending_expired: Task,
    running_task: Task,
    running_no_cell: Task,
    completed_expired: Task,
    resolving_kickable: Task,
}

/// Builds the full drift matrix: for each lifecycle state a fresh row, a
/// kickable row, an expired row, and unreadable variants.
fn fixture() -> Result<Fixture> {
    let store = Arc::new(InMemoryTaskStore::new());
    let sink = Arc::new(RecordingSink::new());
    let clock = Arc::new(SimulatedClock::deterministic());

    // The sweep runs two hours after the epoch so even the hour-long
    // completed expiry has room in the past.
    clock.advance(Duration::from_secs(7200));
    let now = clock.now();

    let pending = |guid: &str, age: Duration| -> Task {
        Task::desire(guid, "my-domain", definition(), now - age)
    };
    let running = |guid: &str, cell: &str, age: Duration| -> Result<Task> {
        let mut task = pending(guid, age);
        task.start(cell, now - age)?;
        Ok(task)
    };
    let completed = |guid: &str, age: Duration| -> Result<Task> {
        let mut task = running(guid, "cell-live", age)?;
        task.complete(false, "", "finished", now - age)?;
        Ok(task)
    };
    let resolving = |guid: &str, age: Duration| -> Result<Task> {
        let mut task = completed(guid, age)?;
        task.resolve(now - age)?;
        Ok(task)
    };

    let pending_expired = pending("pending-expired-task", 2 * EXPIRE_PENDING);
    store.insert_task(&pending_expired)?;
    store.insert_task(&pending("another-pending-expired-task", 2 * EXPIRE_PENDING))?;
    store.insert_task(&pending("pending-invalid-task", 2 * EXPIRE_PENDING))?;
    store.corrupt_definition("pending-invalid-task")?;
    store.insert_task(&pending("pending-kickable-task", KICK + Duration::from_secs(5)))?;
    store.insert_task(&pending(
        "pending-kickable-invalid-task",
        KICK + Duration::from_secs(5),
    ))?;
    store.corrupt_definition("pending-kickable-invalid-task")?;
    store.insert_task(&pending("pending-task", Duration::ZERO))?;

    let running_no_cell = running("running-task-no-cell", "cell-gone", Duration::from_secs(20))?;
    store.insert_task(&running_no_cell)?;
    store.insert_task(&running(
        "invalid-running-task-no-cell",
        "cell-gone",
        Duration::from_secs(20),
    )?)?;
    store.corrupt_definition("invalid-running-task-no-cell")?;
    let running_task = running("running-task", "cell-live", Duration::from_secs(20))?;
    store.insert_task(&running_task)?;

    let completed_expired = completed("completed-expired-task", 2 * EXPIRE_COMPLETED)?;
    store.insert_task(&completed_expired)?;
    store.insert_task(&completed(
        "invalid-completed-expired-task",
        2 * EXPIRE_COMPLETED,
    )?)?;
    store.corrupt_definition("invalid-completed-expired-task")?;
    store.insert_task(&completed(
        "completed-kickable-task",
        KICK + Duration::from_secs(5),
    )?)?;
    store.insert_task(&completed(
        "completed-kickable-invalid-task",
        KICK + Duration::from_secs(5),
    )?)?;
    store.corrupt_definition("completed-kickable-invalid-task")?;
    store.insert_task(&completed("completed-task", Duration::ZERO)?)?;

    store.insert_task(&resolving("resolving-expired-task", 2 * EXPIRE_COMPLETED)?)?;
    let resolving_kickable = resolving("resolving-kickable-task", KICK + Duration::from_secs(5))?;
    store.insert_task(&resolving_kickable)?;
    store.insert_task(&resolving(
        "invalid-resolving-kickable-task",
        KICK + Duration::from_secs(5),
    )?)?;
    store.corrupt_definition("invalid-resolving-kickable-task")?;
    store.insert_task(&resolving("resolving-task", Duration::ZERO)?)?;

    let converger = TaskConverger::new(
        Arc::clone(&store) as Arc<dyn TaskStore>,
        clock as Arc<dyn Clock>,
        Arc::clone(&sink) as Arc<dyn CounterSink>,
    );

    Ok(Fixture {
        store,
        sink,
        converger,
        now,
        pending_expired,
        running_task,
        running_no_cell,
        completed_expired,
        resolving_kickable,
    })
}

fn live_cells() -> CellSet {
    CellSet::from_list([CellPresence::new("cell-live")])
}

async fn converge(fixture: &Fixture, cells: &CellSet) -> TaskConvergenceResult {
    fixture
        .converger
        .converge_tasks(cells, &config(), &CancellationToken::new())
        .await
}

#[tokio::test]
async fn expired_pending_tasks_are_failed() -> Result<()> {
    let f = fixture()?;
    let result = converge(&f, &live_cells()).await;

    let task = f.store.task_by_guid("pending-expired-task").await?;
    assert_eq!(task.state, TaskState::Completed);
    assert!(task.failed);
    assert_eq!(task.failure_reason, PENDING_EXPIRED_FAILURE_REASON);
    assert_eq!(task.result, "");
    assert_eq!(task.updated_at, f.now);
    assert_eq!(task.first_completed_at, Some(f.now));

    assert!(
        !result
            .tasks_to_auction
            .iter()
            .any(|r| r.task_guid == "pending-expired-task"),
        "expired pending tasks are not auctioned"
    );
    assert!(result.events.contains(&Event::TaskChanged {
        before: f.pending_expired.clone(),
        after: task,
    }));
    Ok(())
}

#[tokio::test]
async fn kickable_pending_tasks_are_auctioned() -> Result<()> {
    let f = fixture()?;
    let result = converge(&f, &live_cells()).await;

    let request = result
        .tasks_to_auction
        .iter()
        .find(|r| r.task_guid == "pending-kickable-task")
        .expect("kickable pending task is auctioned");
    assert_eq!(request.domain, "my-domain");
    assert_eq!(request.resource.memory_mb, 256);
    assert_eq!(request.resource.disk_mb, 512);
    assert_eq!(request.placement_tags, vec!["zone-a".to_string()]);

    // Still pending and unharmed.
    let task = f.store.task_by_guid("pending-kickable-task").await?;
    assert_eq!(task.state, TaskState::Pending);
    assert!(!task.failed);
    Ok(())
}

#[tokio::test]
async fn unreadable_rows_are_deleted_in_every_state() -> Result<()> {
    let f = fixture()?;
    let result = converge(&f, &live_cells()).await;

    for guid in [
        "pending-invalid-task",
        "pending-kickable-invalid-task",
        "invalid-running-task-no-cell",
        "invalid-completed-expired-task",
        "completed-kickable-invalid-task",
        "invalid-resolving-kickable-task",
    ] {
        let err = f.store.task_by_guid(guid).await.expect_err("row deleted");
        assert!(err.is_not_found(), "{guid} should be gone");
    }

    // Non-pending unreadable rows announce their removal; pending ones
    // were never visible to subscribers and vanish silently.
    let removed_guids: Vec<&str> = result
        .events
        .iter()
        .filter_map(|e| match e {
            Event::TaskRemoved { task } => Some(task.task_guid.as_str()),
            _ => None,
        })
        .collect();
    assert!(removed_guids.contains(&"invalid-running-task-no-cell"));
    assert!(removed_guids.contains(&"invalid-completed-expired-task"));
    assert!(removed_guids.contains(&"completed-kickable-invalid-task"));
    assert!(removed_guids.contains(&"invalid-resolving-kickable-task"));
    assert!(!removed_guids.contains(&"pending-invalid-task"));
    assert!(!removed_guids.contains(&"pending-kickable-invalid-task"));
    Ok(())
}

#[tokio::test]
async fn running_task_with_missing_cell_is_failed() -> Result<()> {
    let f = fixture()?;
    let result = converge(&f, &live_cells()).await;

    let task = f.store.task_by_guid("running-task-no-cell").await?;
    assert_eq!(task.state, TaskState::Completed);
    assert!(task.failed);
    assert_eq!(task.failure_reason, CELL_DISAPPEARED_FAILURE_REASON);
    assert_eq!(task.result, "");
    assert_eq!(task.updated_at, f.now);
    assert_eq!(task.first_completed_at, Some(f.now));
    assert!(result.events.contains(&Event::TaskChanged {
        before: f.running_no_cell.clone(),
        after: task,
    }));

    let untouched = f.store.task_by_guid("running-task").await?;
    assert_eq!(untouched.state, TaskState::Running);
    assert!(!untouched.failed);
    Ok(())
}

#[tokio::test]
async fn empty_cell_set_fails_every_running_task() -> Result<()> {
    let f = fixture()?;
    let result = converge(&f, &CellSet::new()).await;

    for guid in ["running-task", "running-task-no-cell"] {
        let task = f.store.task_by_guid(guid).await?;
        assert!(task.failed, "{guid} should fail without its cell");
        assert_eq!(task.failure_reason, CELL_DISAPPEARED_FAILURE_REASON);
        assert_eq!(task.result, "");
    }

    let after_running = f.store.task_by_guid("running-task").await?;
    let after_no_cell = f.store.task_by_guid("running-task-no-cell").await?;
    assert!(result.events.contains(&Event::TaskChanged {
        before: f.running_task.clone(),
        after: after_running,
    }));
    assert!(result.events.contains(&Event::TaskChanged {
        before: f.running_no_cell.clone(),
        after: after_no_cell,
    }));
    Ok(())
}

#[tokio::test]
async fn expired_completed_tasks_are_deleted_with_a_removal_event() -> Result<()> {
    let f = fixture()?;
    let result = converge(&f, &live_cells()).await;

    let err = f
        .store
        .task_by_guid("completed-expired-task")
        .await
        .expect_err("expired completed row deleted");
    assert!(err.is_not_found());
    assert!(result.events.contains(&Event::TaskRemoved {
        task: f.completed_expired.clone(),
    }));
    assert!(f.sink.total(names::CONVERGENCE_TASKS_PRUNED) > 0);
    Ok(())
}

#[tokio::test]
async fn kickable_completed_tasks_are_enqueued_for_completion() -> Result<()> {
    let f = fixture()?;
    let result = converge(&f, &live_cells()).await;

    let task = f.store.task_by_guid("completed-kickable-task").await?;
    assert!(result.tasks_to_complete.contains(&task));

    let fresh = f.store.task_by_guid("completed-task").await?;
    assert!(!result.tasks_to_complete.contains(&fresh));
    Ok(())
}

#[tokio::test]
async fn kickable_resolving_tasks_are_demoted_and_enqueued() -> Result<()> {
    let f = fixture()?;
    let result = converge(&f, &live_cells()).await;

    let task = f.store.task_by_guid("resolving-kickable-task").await?;
    assert_eq!(task.state, TaskState::Completed);
    assert!(result.tasks_to_complete.contains(&task));
    assert!(result.events.contains(&Event::TaskChanged {
        before: f.resolving_kickable.clone(),
        after: task,
    }));

    let err = f
        .store
        .task_by_guid("resolving-expired-task")
        .await
        .expect_err("expired resolving row deleted");
    assert!(err.is_not_found());

    let fresh = f.store.task_by_guid("resolving-task").await?;
    assert_eq!(fresh.state, TaskState::Resolving);
    assert!(!result.tasks_to_complete.contains(&fresh));
    Ok(())
}

#[tokio::test]
async fn counters_are_derived_from_the_sweep_arithmetic() -> Result<()> {
    let f = fixture()?;
    let rows_before = f.store.row_count()?;
    let result = converge(&f, &live_cells()).await;
    let rows_after = f.store.row_count()?;

    // Kicked: every auction entry, every completion entry, and every
    // demotion out of resolving.
    let demoted = u64::try_from(
        result
            .events
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    Event::TaskChanged { before, after }
                        if before.state == TaskState::Resolving
                            && after.state == TaskState::Completed
                )
            })
            .count(),
    )
    .unwrap_or(0);
    let expected_kicked = u64::try_from(result.tasks_to_auction.len()).unwrap_or(0)
        + u64::try_from(result.tasks_to_complete.len()).unwrap_or(0)
        + demoted;
    assert_eq!(f.sink.total(names::CONVERGENCE_TASKS_KICKED), expected_kicked);

    // Pruned: every deleted row plus every fail-expiration.
    let deletions = u64::try_from(rows_before - rows_after).unwrap_or(0);
    let failed = u64::try_from(
        result
            .events
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    Event::TaskChanged { after, .. }
                        if after.failed
                            && (after.failure_reason == PENDING_EXPIRED_FAILURE_REASON
                                || after.failure_reason == CELL_DISAPPEARED_FAILURE_REASON)
                )
            })
            .count(),
    )
    .unwrap_or(0);
    assert_eq!(
        f.sink.total(names::CONVERGENCE_TASKS_PRUNED),
        deletions + failed
    );

    // Sanity on the matrix itself: one auction, two completion retries,
    // one demotion.
    assert_eq!(result.tasks_to_auction.len(), 1);
    assert_eq!(result.tasks_to_complete.len(), 2);
    assert_eq!(demoted, 1);
    Ok(())
}

#[tokio::test]
async fn sweep_touches_nothing_when_all_rows_are_fresh() -> Result<()> {
    let store = Arc::new(InMemoryTaskStore::new());
    let sink = Arc::new(RecordingSink::new());
    let clock = Arc::new(SimulatedClock::deterministic());
    let now = clock.now();

    let mut task = Task::desire("fresh-running", "my-domain", definition(), now);
    task.start("cell-live", now)?;
    store.insert_task(&task)?;
    store.insert_task(&Task::desire("fresh-pending", "my-domain", definition(), now))?;

    let converger = TaskConverger::new(
        Arc::clone(&store) as Arc<dyn TaskStore>,
        clock as Arc<dyn Clock>,
        Arc::clone(&sink) as Arc<dyn CounterSink>,
    );
    let result = converger
        .converge_tasks(&live_cells(), &config(), &CancellationToken::new())
        .await;

    assert!(result.events.is_empty());
    assert!(result.tasks_to_auction.is_empty());
    assert!(result.tasks_to_complete.is_empty());
    assert_eq!(store.row_count()?, 2);
    assert_eq!(sink.total(names::CONVERGENCE_TASKS_KICKED), 0);
    assert_eq!(sink.total(names::CONVERGENCE_TASKS_PRUNED), 0);
    Ok(())
}
