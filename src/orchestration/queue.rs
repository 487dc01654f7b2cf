//! Sequential task queue.
//!
//! The queue keeps tasks in insertion order and runs at most one
//! orchestrator at a time. In queue mode it advances to the next unfinished
//! task after each completed one and halts on the first failure. Tasks can
//! also be started and stopped individually; that never moves the queue.
//!
//! Each run gets its own cancellation token, worker pools and failover
//! policy, so stopping one task never touches another.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::core::provider::ImageProvider;
use crate::core::task::{Task, TaskId, TaskStatus};
use crate::error::{Error, Result};
use crate::orchestration::failover::{FailoverConfig, ServiceFailoverPolicy};
use crate::orchestration::orchestrator::{TaskOrchestrator, TaskReport};
use crate::orchestration::progress::{
    ProgressTracker, QueueEvent, StatusReporter, TaskOutcome, WorkerEvent,
};
use crate::services::ServiceRegistry;

struct RunningTask {
    id: TaskId,
    cancel: CancellationToken,
    failover: Arc<ServiceFailoverPolicy>,
    progress: ProgressTracker,
    /// Started by the queue rather than individually.
    from_queue: bool,
}

#[derive(Default)]
struct QueueState {
    tasks: Vec<Task>,
    next_id: u64,
    running: Option<RunningTask>,
    /// Queue mode is on: completed tasks advance to the next one.
    active: bool,
    paused: bool,
    /// Last task the queue itself started.
    cursor: Option<TaskId>,
}

impl QueueState {
    fn position(&self, id: TaskId) -> Option<usize> {
        self.tasks.iter().position(|t| t.id == id)
    }

    fn task_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    fn first_unfinished(&self) -> Option<usize> {
        self.tasks
            .iter()
            .position(|t| t.status != TaskStatus::Completed)
    }

    /// First unfinished task after `id`, in queue order.
    fn next_after(&self, id: TaskId) -> Option<usize> {
        let from = self.position(id).map(|p| p + 1).unwrap_or(0);
        self.tasks
            .iter()
            .skip(from)
            .position(|t| t.status != TaskStatus::Completed)
            .map(|offset| from + offset)
    }
}

struct QueueShared {
    settings: Arc<Settings>,
    services: Arc<ServiceRegistry>,
    state: Mutex<QueueState>,
    events: mpsc::UnboundedSender<QueueEvent>,
    /// True while no task runs.
    idle: watch::Sender<bool>,
}

/// Handle to the task queue. Clones share the same queue.
#[derive(Clone)]
pub struct TaskQueue {
    shared: Arc<QueueShared>,
}

impl TaskQueue {
    /// Create an empty queue and the receiver of its events.
    pub fn new(
        settings: Arc<Settings>,
        services: Arc<ServiceRegistry>,
    ) -> (Self, mpsc::UnboundedReceiver<QueueEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let (idle, _) = watch::channel(true);
        let queue = Self {
            shared: Arc::new(QueueShared {
                settings,
                services,
                state: Mutex::new(QueueState {
                    next_id: 1,
                    ..QueueState::default()
                }),
                events,
                idle,
            }),
        };
        (queue, rx)
    }

    /// Append a task. Without an explicit provider it starts with the
    /// configured default image service.
    pub fn add_task(
        &self,
        work_dir: impl Into<PathBuf>,
        languages: Vec<String>,
        image_service: Option<ImageProvider>,
    ) -> TaskId {
        let mut state = self.shared.lock();
        let id = TaskId(state.next_id);
        state.next_id += 1;
        let service = image_service.unwrap_or(self.shared.settings.default_image_service);
        let task = Task::new(id, work_dir, languages, service);
        info!(task = %id, dir = %task.work_dir.display(), service = %service, "task added");
        state.tasks.push(task);
        id
    }

    /// Remove a task that is not running.
    pub fn remove_task(&self, id: TaskId) -> Result<Task> {
        let mut state = self.shared.lock();
        if state.running.as_ref().is_some_and(|r| r.id == id) {
            return Err(Error::TaskAlreadyRunning(id));
        }
        let index = state.position(id).ok_or(Error::TaskNotFound(id))?;
        if state.cursor == Some(id) {
            state.cursor = None;
        }
        info!(task = %id, "task removed");
        Ok(state.tasks.remove(index))
    }

    /// Drop every task. Refused while any task runs.
    pub fn clear(&self) -> Result<()> {
        let mut state = self.shared.lock();
        if let Some(running) = &state.running {
            return Err(Error::QueueBusy(running.id));
        }
        state.tasks.clear();
        state.cursor = None;
        state.active = false;
        info!("queue cleared");
        Ok(())
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.shared.lock().tasks.clone()
    }

    pub fn task(&self, id: TaskId) -> Option<Task> {
        self.shared.lock().tasks.iter().find(|t| t.id == id).cloned()
    }

    pub fn running_task(&self) -> Option<TaskId> {
        self.shared.lock().running.as_ref().map(|r| r.id)
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().running.is_some()
    }

    /// Whether queue mode is on.
    pub fn is_active(&self) -> bool {
        self.shared.lock().active
    }

    pub fn is_paused(&self) -> bool {
        self.shared.lock().paused
    }

    /// Run the queue from its first unfinished task.
    ///
    /// Returns the started task, or None when every task is already
    /// completed.
    pub fn start(&self) -> Result<Option<TaskId>> {
        let mut state = self.shared.lock();
        if let Some(running) = &state.running {
            return Err(Error::QueueBusy(running.id));
        }
        let Some(index) = state.first_unfinished() else {
            info!("nothing to run, queue is empty or complete");
            return Ok(None);
        };
        state.active = true;
        state.paused = false;
        info!("queue started");
        Ok(Some(self.shared.launch(&mut state, index, true)))
    }

    /// Stop the queue and cancel the running task, waiting until it has
    /// wound down.
    pub async fn stop(&self) {
        self.shutdown();
        self.wait_idle().await;
    }

    /// Leave queue mode and signal the running task to cancel, without
    /// waiting.
    pub fn shutdown(&self) {
        let mut state = self.shared.lock();
        state.active = false;
        state.paused = false;
        if let Some(running) = &state.running {
            warn!(task = %running.id, "stopping running task");
            running.cancel.cancel();
        }
    }

    /// Whether a stop was requested for the running task.
    pub fn is_cancelled(&self) -> bool {
        self.shared
            .lock()
            .running
            .as_ref()
            .is_some_and(|r| r.cancel.is_cancelled())
    }

    /// Keep the running task going but do not advance after it.
    pub fn pause(&self) {
        let mut state = self.shared.lock();
        if state.active {
            state.paused = true;
            info!("queue paused");
        }
    }

    /// Continue a paused queue with the task after the last one it ran.
    pub fn resume(&self) -> Result<Option<TaskId>> {
        let mut state = self.shared.lock();
        if !state.active || !state.paused {
            return Ok(None);
        }
        state.paused = false;
        info!("queue resumed");
        if state.running.is_some() {
            return Ok(None);
        }
        let next = match state.cursor {
            Some(id) => state.next_after(id),
            None => state.first_unfinished(),
        };
        match next {
            Some(index) => Ok(Some(self.shared.launch(&mut state, index, true))),
            None => {
                state.active = false;
                self.shared.emit(QueueEvent::QueueFinished);
                Ok(None)
            }
        }
    }

    /// Start one task out of queue order. Queue mode is left untouched.
    pub fn start_task(&self, id: TaskId) -> Result<()> {
        let mut state = self.shared.lock();
        if let Some(running) = &state.running {
            return Err(if running.id == id {
                Error::TaskAlreadyRunning(id)
            } else {
                Error::QueueBusy(running.id)
            });
        }
        let index = state.position(id).ok_or(Error::TaskNotFound(id))?;
        self.shared.launch(&mut state, index, false);
        Ok(())
    }

    /// Cancel one task and wait for it to wind down. A task that is not
    /// running is left alone.
    pub async fn stop_task(&self, id: TaskId) -> Result<()> {
        {
            let state = self.shared.lock();
            if state.position(id).is_none() {
                return Err(Error::TaskNotFound(id));
            }
            match &state.running {
                Some(running) if running.id == id => {
                    warn!(task = %id, "stopping task");
                    running.cancel.cancel();
                }
                _ => {
                    debug!(task = %id, "stop requested for a task that is not running");
                    return Ok(());
                }
            }
        }
        self.wait_idle().await;
        Ok(())
    }

    /// Switch the image provider of the running task and of every task not
    /// started yet. Completed tasks keep theirs.
    pub fn switch_image_service(&self) -> Result<(ImageProvider, ImageProvider)> {
        let mut state = self.shared.lock();
        let (task_id, from, to) = {
            let running = state.running.as_ref().ok_or(Error::NoRunningTask)?;
            let (from, to) = running.failover.manual_switch();
            (running.id, from, to)
        };
        for task in state.tasks.iter_mut() {
            if task.id == task_id || task.is_queued() {
                task.image_service = to;
            }
        }
        info!(task = %task_id, from = %from, to = %to, "image service switched manually");
        self.shared.emit(QueueEvent::ServiceSwitched {
            task_id,
            from,
            to,
            manual: true,
        });
        Ok((from, to))
    }

    /// Resolve once no task is running.
    pub async fn wait_idle(&self) {
        let mut idle = self.shared.idle.subscribe();
        // the sender lives as long as `self`
        let _ = idle.wait_for(|idle| *idle).await;
    }
}

impl QueueShared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: QueueEvent) {
        // nobody listening is fine, the queue runs headless too
        let _ = self.events.send(event);
    }

    /// Mark the task at `index` running and spawn its orchestrator.
    fn launch(self: &Arc<Self>, state: &mut QueueState, index: usize, from_queue: bool) -> TaskId {
        let task = &mut state.tasks[index];
        task.start();
        task.set_all_lanes("Starting");

        let cancel = CancellationToken::new();
        let failover = Arc::new(ServiceFailoverPolicy::new(
            FailoverConfig::from_settings(&self.settings),
            task.image_service,
        ));
        let (tx, rx) = mpsc::unbounded_channel();
        let orchestrator = TaskOrchestrator::new(
            task,
            Arc::clone(&self.settings),
            Arc::clone(&self.services),
            Arc::clone(&failover),
            cancel.clone(),
            StatusReporter::new(task.id, tx),
        );

        let id = task.id;
        let lanes = task.languages.len();
        state.running = Some(RunningTask {
            id,
            cancel,
            failover,
            progress: ProgressTracker::new(lanes),
            from_queue,
        });
        if from_queue {
            state.cursor = Some(id);
        }
        self.idle.send_replace(false);
        info!(task = %id, from_queue, "task launched");
        self.emit(QueueEvent::TaskStarted { task_id: id });

        let shared = Arc::clone(self);
        tokio::spawn(async move { shared.supervise(orchestrator, rx).await });
        id
    }

    /// Run one orchestrator, forwarding its worker events until it finishes.
    async fn supervise(
        self: Arc<Self>,
        orchestrator: TaskOrchestrator,
        mut rx: mpsc::UnboundedReceiver<WorkerEvent>,
    ) {
        let task_id = orchestrator.task_id();
        let run = orchestrator.run();
        tokio::pin!(run);

        let report = loop {
            tokio::select! {
                report = &mut run => break report,
                Some(event) = rx.recv() => self.on_worker_event(task_id, event),
            }
        };
        while let Ok(event) = rx.try_recv() {
            self.on_worker_event(task_id, event);
        }
        self.on_finished(report);
    }

    fn on_worker_event(&self, task_id: TaskId, event: WorkerEvent) {
        let mut state = self.lock();
        match event {
            WorkerEvent::Status { lane, message } => {
                let progress = match state.running.as_mut() {
                    Some(running) if running.id == task_id => running.progress.update(lane, &message),
                    _ => return,
                };
                if let Some(task) = state.task_mut(task_id) {
                    task.set_lane_status(lane, &message);
                }
                self.emit(QueueEvent::Status {
                    task_id,
                    lane,
                    message,
                    progress,
                });
            }
            WorkerEvent::ServiceSwitched { from, to } => {
                if let Some(task) = state.task_mut(task_id) {
                    task.image_service = to;
                }
                self.emit(QueueEvent::ServiceSwitched {
                    task_id,
                    from,
                    to,
                    manual: false,
                });
            }
        }
    }

    fn on_finished(self: &Arc<Self>, report: TaskReport) {
        let TaskReport {
            task_id, outcome, ..
        } = report;
        let mut state = self.lock();
        let from_queue = state
            .running
            .take()
            .filter(|r| r.id == task_id)
            .is_some_and(|r| r.from_queue);

        if let Some(task) = state.task_mut(task_id) {
            match &outcome {
                TaskOutcome::Completed => task.complete(),
                TaskOutcome::Failed(e) => task.fail(e),
                TaskOutcome::Cancelled => task.cancel(),
            }
            task.set_all_lanes(outcome.lane_status());
        }
        self.emit(QueueEvent::TaskFinished {
            task_id,
            outcome: outcome.clone(),
        });

        let mut next = None;
        match outcome {
            TaskOutcome::Completed if from_queue && state.active => {
                if state.paused {
                    info!(task = %task_id, "queue paused, not advancing");
                } else if let Some(index) = state.next_after(task_id) {
                    next = Some(index);
                } else {
                    info!("all tasks in the queue completed");
                    state.active = false;
                    self.emit(QueueEvent::QueueFinished);
                }
            }
            TaskOutcome::Completed => {}
            TaskOutcome::Failed(error) => {
                if from_queue && state.active {
                    error!(task = %task_id, "task failed, halting queue");
                    state.active = false;
                    state.paused = false;
                    self.emit(QueueEvent::QueueHalted { task_id, error });
                }
            }
            // A task started on its own ends without stopping the queue.
            TaskOutcome::Cancelled => {
                if from_queue {
                    state.active = false;
                    state.paused = false;
                    self.emit(QueueEvent::QueueStopped);
                }
            }
        }

        match next {
            Some(index) => {
                self.launch(&mut state, index, true);
            }
            None => {
                self.idle.send_replace(true);
            }
        }
    }
}
