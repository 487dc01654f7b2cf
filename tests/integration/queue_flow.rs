//! Task queue tests: sequencing, halting, stopping and manual overrides.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio_test::{assert_err, assert_ok};

use reelforge::core::{ImageProvider, TaskId, TaskStatus};
use reelforge::orchestration::{QueueEvent, TaskOutcome, TaskQueue};
use reelforge::Error;

use crate::fixtures::{test_settings, Mocks, WorkDir, TEST_TIMEOUT};

/// Collect queue events until `done` matches one, or time out.
async fn events_until(
    rx: &mut UnboundedReceiver<QueueEvent>,
    done: impl Fn(&QueueEvent) -> bool,
) -> Vec<QueueEvent> {
    let mut events = Vec::new();
    let collect = async {
        while let Some(event) = rx.recv().await {
            let finished = done(&event);
            events.push(event);
            if finished {
                break;
            }
        }
    };
    assert_ok!(tokio::time::timeout(TEST_TIMEOUT, collect).await);
    events
}

fn started(events: &[QueueEvent]) -> Vec<TaskId> {
    events
        .iter()
        .filter_map(|e| match e {
            QueueEvent::TaskStarted { task_id } => Some(*task_id),
            _ => None,
        })
        .collect()
}

fn queue_with(mocks: &Mocks) -> (TaskQueue, UnboundedReceiver<QueueEvent>) {
    TaskQueue::new(Arc::new(test_settings()), mocks.registry())
}

/// Test: Queue runs every task in order
/// Given three tasks with valid inputs
/// When the queue starts
/// Then they run one after the other and the queue finishes
#[tokio::test]
async fn test_queue_runs_tasks_in_order() {
    let mocks = Mocks::new(1, 1);
    let dirs: Vec<WorkDir> = (0..3).map(|_| WorkDir::new(&["en"])).collect();
    let (queue, mut rx) = queue_with(&mocks);
    for dir in &dirs {
        queue.add_task(dir.path(), vec!["en".into()], None);
    }

    assert_eq!(queue.start().unwrap(), Some(TaskId(1)));
    let events = events_until(&mut rx, |e| matches!(e, QueueEvent::QueueFinished)).await;
    queue.wait_idle().await;

    assert_eq!(started(&events), vec![TaskId(1), TaskId(2), TaskId(3)]);
    assert!(queue
        .tasks()
        .iter()
        .all(|t| t.status == TaskStatus::Completed && t.lane_status == vec!["Completed ✅"]));
    assert!(!queue.is_active());
    assert_eq!(mocks.assembler.burns.load(Ordering::SeqCst), 3);

    // Progress for a lane never goes backwards.
    let progress: Vec<u8> = events
        .iter()
        .filter_map(|e| match e {
            QueueEvent::Status {
                task_id: TaskId(1),
                lane: 0,
                progress,
                ..
            } => Some(*progress),
            _ => None,
        })
        .collect();
    assert!(!progress.is_empty());
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{:?}", progress);
}

/// Test: Queue halts on failure
/// Given three tasks where the second has no source text
/// When the queue runs
/// Then task 1 completes, task 2 fails, the queue halts and task 3 never starts
#[tokio::test]
async fn test_queue_halts_on_failed_task() {
    let mocks = Mocks::new(1, 1);
    let good = WorkDir::new(&["en"]);
    let broken = WorkDir::empty();
    let last = WorkDir::new(&["en"]);
    let (queue, mut rx) = queue_with(&mocks);
    queue.add_task(good.path(), vec!["en".into()], None);
    queue.add_task(broken.path(), vec!["en".into()], None);
    queue.add_task(last.path(), vec!["en".into()], None);

    queue.start().unwrap();
    let events = events_until(&mut rx, |e| matches!(e, QueueEvent::QueueHalted { .. })).await;
    queue.wait_idle().await;

    assert_eq!(started(&events), vec![TaskId(1), TaskId(2)]);
    assert!(matches!(
        events.last(),
        Some(QueueEvent::QueueHalted { task_id: TaskId(2), .. })
    ));

    let tasks = queue.tasks();
    assert_eq!(tasks[0].status, TaskStatus::Completed);
    assert!(matches!(tasks[1].status, TaskStatus::Failed { .. }));
    assert_eq!(tasks[1].lane_status, vec!["Failed ❌"]);
    assert_eq!(tasks[2].status, TaskStatus::Queued);
    assert!(!queue.is_active());
    assert!(!queue.is_running());
}

/// Given a completed first task and a halted queue,
/// When the queue is started again,
/// Then it resumes from the first task that is not completed.
#[tokio::test]
async fn test_restart_skips_completed_tasks() {
    let mocks = Mocks::new(1, 1);
    let good = WorkDir::new(&["en"]);
    let broken = WorkDir::empty();
    let (queue, mut rx) = queue_with(&mocks);
    queue.add_task(good.path(), vec!["en".into()], None);
    queue.add_task(broken.path(), vec!["en".into()], None);

    queue.start().unwrap();
    events_until(&mut rx, |e| matches!(e, QueueEvent::QueueHalted { .. })).await;
    queue.wait_idle().await;

    assert_eq!(queue.start().unwrap(), Some(TaskId(2)));
    events_until(&mut rx, |e| matches!(e, QueueEvent::QueueHalted { .. })).await;
}

// ============================================================================
// Stopping and guards
// ============================================================================

/// Test: Stop cancels the running task
/// Given a queue whose first task blocks in montage
/// When the queue is stopped
/// Then the task ends Cancelled and the next task never starts
#[tokio::test]
async fn test_stop_cancels_running_task() {
    let mocks = Mocks::new(1, 1);
    mocks.assembler.block_montage.store(true, Ordering::SeqCst);
    let first = WorkDir::new(&["en"]);
    let second = WorkDir::new(&["en"]);
    let (queue, mut rx) = queue_with(&mocks);
    let id = queue.add_task(first.path(), vec!["en".into()], None);
    queue.add_task(second.path(), vec!["en".into()], None);

    queue.start().unwrap();
    assert_ok!(tokio::time::timeout(TEST_TIMEOUT, mocks.assembler.montage_started.notified()).await);

    // Guards while a task runs.
    assert!(queue.is_running());
    assert!(matches!(queue.remove_task(id), Err(Error::TaskAlreadyRunning(_))));
    assert!(matches!(queue.clear(), Err(Error::QueueBusy(_))));
    assert!(matches!(queue.start_task(TaskId(2)), Err(Error::QueueBusy(_))));
    assert_err!(queue.start());

    assert_ok!(tokio::time::timeout(TEST_TIMEOUT, queue.stop()).await);

    let events = events_until(&mut rx, |e| matches!(e, QueueEvent::QueueStopped)).await;
    assert!(events.iter().any(|e| matches!(
        e,
        QueueEvent::TaskFinished {
            outcome: TaskOutcome::Cancelled,
            ..
        }
    )));
    let tasks = queue.tasks();
    assert_eq!(tasks[0].status, TaskStatus::Cancelled);
    assert_eq!(tasks[0].lane_status, vec!["Cancelled ⏹"]);
    assert_eq!(tasks[1].status, TaskStatus::Queued);
    assert!(!queue.is_running());

    // Once idle, the task can be removed.
    assert_ok!(queue.remove_task(id));
}

/// Given a task started on its own that blocks in montage,
/// When that task is stopped,
/// Then it ends Cancelled and the queue is idle again.
#[tokio::test]
async fn test_stop_task_cancels_only_that_task() {
    let mocks = Mocks::new(1, 1);
    mocks.assembler.block_montage.store(true, Ordering::SeqCst);
    let first = WorkDir::new(&["en"]);
    let second = WorkDir::new(&["en"]);
    let (queue, mut rx) = queue_with(&mocks);
    let other = queue.add_task(first.path(), vec!["en".into()], None);
    let id = queue.add_task(second.path(), vec!["en".into()], None);

    queue.start_task(id).unwrap();
    assert_ok!(tokio::time::timeout(TEST_TIMEOUT, mocks.assembler.montage_started.notified()).await);
    assert_eq!(queue.running_task(), Some(id));

    // Stopping a task that is not running is a no-op.
    assert_ok!(queue.stop_task(other).await);
    assert!(matches!(queue.stop_task(TaskId(99)).await, Err(Error::TaskNotFound(_))));
    assert_eq!(queue.running_task(), Some(id));

    assert_ok!(tokio::time::timeout(TEST_TIMEOUT, queue.stop_task(id)).await);

    let events = events_until(&mut rx, |e| matches!(e, QueueEvent::TaskFinished { .. })).await;
    assert!(matches!(
        events.last(),
        Some(QueueEvent::TaskFinished {
            outcome: TaskOutcome::Cancelled,
            ..
        })
    ));
    assert_eq!(queue.running_task(), None);
    assert_eq!(queue.task(id).unwrap().status, TaskStatus::Cancelled);
    assert_eq!(queue.task(other).unwrap().status, TaskStatus::Queued);

    // The queue itself was never running, so it reports no stop.
    queue.wait_idle().await;
    let rest: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
    assert!(!events
        .iter()
        .chain(rest.iter())
        .any(|e| matches!(e, QueueEvent::QueueStopped)));
    assert!(!queue.is_active());
}

/// Given two queued tasks,
/// When the second is started individually,
/// Then only it runs and queue mode stays off.
#[tokio::test]
async fn test_individual_start_does_not_advance() {
    let mocks = Mocks::new(1, 1);
    let first = WorkDir::new(&["en"]);
    let second = WorkDir::new(&["en"]);
    let (queue, mut rx) = queue_with(&mocks);
    queue.add_task(first.path(), vec!["en".into()], None);
    let id = queue.add_task(second.path(), vec!["en".into()], None);

    queue.start_task(id).unwrap();
    let events = events_until(&mut rx, |e| matches!(e, QueueEvent::TaskFinished { .. })).await;
    queue.wait_idle().await;

    assert_eq!(started(&events), vec![id]);
    let tasks = queue.tasks();
    assert_eq!(tasks[0].status, TaskStatus::Queued);
    assert_eq!(tasks[1].status, TaskStatus::Completed);
    assert!(!queue.is_active());
    assert!(!events.iter().any(|e| matches!(e, QueueEvent::QueueFinished)));
}

/// Given a paused queue,
/// When the running task completes,
/// Then nothing else starts until the queue is resumed.
#[tokio::test]
async fn test_pause_and_resume() {
    let mocks = Mocks::new(1, 1);
    let first = WorkDir::new(&["en"]);
    let second = WorkDir::new(&["en"]);
    let (queue, mut rx) = queue_with(&mocks);
    queue.add_task(first.path(), vec!["en".into()], None);
    queue.add_task(second.path(), vec!["en".into()], None);

    queue.start().unwrap();
    queue.pause();
    assert!(queue.is_paused());
    events_until(&mut rx, |e| matches!(e, QueueEvent::TaskFinished { .. })).await;
    queue.wait_idle().await;
    assert_eq!(queue.tasks()[1].status, TaskStatus::Queued);

    assert_eq!(queue.resume().unwrap(), Some(TaskId(2)));
    events_until(&mut rx, |e| matches!(e, QueueEvent::QueueFinished)).await;
    assert_eq!(queue.tasks()[1].status, TaskStatus::Completed);
}

// ============================================================================
// Manual service override
// ============================================================================

/// Test: Manual override
/// Given a completed task, a running task and a queued task
/// When the image service is switched manually
/// Then the running and queued tasks change provider and the completed one does not
#[tokio::test]
async fn test_manual_switch_rewrites_pending_tasks_only() {
    let mocks = Mocks::new(1, 1);
    let dirs: Vec<WorkDir> = (0..3).map(|_| WorkDir::new(&["en"])).collect();
    let (queue, mut rx) = queue_with(&mocks);
    let done = queue.add_task(dirs[0].path(), vec!["en".into()], None);
    let running = queue.add_task(dirs[1].path(), vec!["en".into()], None);
    let waiting = queue.add_task(dirs[2].path(), vec!["en".into()], None);

    queue.start_task(done).unwrap();
    events_until(&mut rx, |e| matches!(e, QueueEvent::TaskFinished { .. })).await;
    queue.wait_idle().await;

    mocks.assembler.block_montage.store(true, Ordering::SeqCst);
    assert_eq!(queue.start().unwrap(), Some(running));
    assert_ok!(tokio::time::timeout(TEST_TIMEOUT, mocks.assembler.montage_started.notified()).await);

    let (from, to) = queue.switch_image_service().unwrap();
    assert_eq!((from, to), (ImageProvider::Recraft, ImageProvider::Pollinations));

    let tasks = queue.tasks();
    assert_eq!(queue.task(done).unwrap().image_service, ImageProvider::Recraft);
    assert_eq!(tasks[1].image_service, ImageProvider::Pollinations);
    assert_eq!(queue.task(waiting).unwrap().image_service, ImageProvider::Pollinations);

    let events = events_until(&mut rx, |e| matches!(e, QueueEvent::ServiceSwitched { .. })).await;
    assert!(matches!(
        events.last(),
        Some(QueueEvent::ServiceSwitched {
            manual: true,
            to: ImageProvider::Pollinations,
            ..
        })
    ));

    queue.stop().await;
    assert!(matches!(queue.switch_image_service(), Err(Error::NoRunningTask)));
}

/// Given a Recraft mock that errors twice in a queued task
/// When the fallback succeeds and the next image returns to Recraft
/// Then both automatic switches reach the queue and the task ends on Recraft
#[tokio::test]
async fn test_automatic_switches_update_task_service() {
    let mocks = Mocks::new(1, 3);
    mocks.recraft.failures.store(2, Ordering::SeqCst);
    let dir = WorkDir::new(&["en"]);
    let (queue, mut rx) = queue_with(&mocks);
    let id = queue.add_task(dir.path(), vec!["en".into()], None);

    queue.start().unwrap();
    let events = events_until(&mut rx, |e| matches!(e, QueueEvent::QueueFinished)).await;
    queue.wait_idle().await;

    let switches: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            QueueEvent::ServiceSwitched {
                from, to, manual, ..
            } => Some((*from, *to, *manual)),
            _ => None,
        })
        .collect();
    assert_eq!(
        switches,
        vec![
            (ImageProvider::Recraft, ImageProvider::Pollinations, false),
            (ImageProvider::Pollinations, ImageProvider::Recraft, false),
        ]
    );
    assert_eq!(queue.task(id).unwrap().image_service, ImageProvider::Recraft);
}
