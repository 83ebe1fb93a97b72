use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use tracing::{debug, warn};

use crate::{PipelineError, Result};

pub type TaskId = u64;

pub const INVALID_TASK_ID: TaskId = 0;

/// Progress reporter handed to a running task.
#[derive(Clone, Default)]
pub struct TaskProgress {
    state: Arc<Mutex<(String, f32)>>,
}

impl TaskProgress {
    pub fn set(&self, text: &str, value: f32) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.0.clear();
        state.0.push_str(text);
        state.1 = value.clamp(0.0, 1.0);
    }

    pub fn get(&self) -> (String, f32) {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

struct Slot<T> {
    progress: TaskProgress,
    result: Option<Result<T>>,
}

type Job<T> = Box<dyn FnOnce(&TaskProgress) -> Result<T> + Send>;

/// Background thread running queued tasks one at a time.
///
/// Results stay in a per-task slot until the owner takes them, so completion is observed by
/// polling from the frame loop.
pub struct WorkerThread<T: Send + 'static> {
    sender: Option<Sender<(TaskId, Job<T>)>>,
    handle: Option<JoinHandle<()>>,
    slots: Arc<Mutex<HashMap<TaskId, Slot<T>>>>,
    next_id: AtomicU64,
}

impl<T: Send + 'static> WorkerThread<T> {
    pub fn new(name: &str) -> Result<Self> {
        let (sender, receiver) = mpsc::channel::<(TaskId, Job<T>)>();
        let slots: Arc<Mutex<HashMap<TaskId, Slot<T>>>> = Arc::new(Mutex::new(HashMap::new()));

        let worker_slots = slots.clone();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Ok((id, job)) = receiver.recv() {
                    let progress = {
                        let slots = worker_slots.lock().unwrap_or_else(|e| e.into_inner());
                        match slots.get(&id) {
                            Some(slot) => slot.progress.clone(),
                            None => continue,
                        }
                    };
                    let result = job(&progress);
                    if let Err(e) = &result {
                        warn!("Task {id} failed: {e}");
                    }
                    let mut slots = worker_slots.lock().unwrap_or_else(|e| e.into_inner());
                    if let Some(slot) = slots.get_mut(&id) {
                        slot.result = Some(result);
                    }
                }
                debug!("Worker thread exiting");
            })
            .map_err(|e| PipelineError::Worker(e.to_string()))?;

        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
            slots,
            next_id: AtomicU64::new(1),
        })
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<TaskId, Slot<T>>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn enqueue(&self, job: impl FnOnce(&TaskProgress) -> Result<T> + Send + 'static) -> Result<TaskId> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.slots().insert(
            id,
            Slot {
                progress: TaskProgress::default(),
                result: None,
            },
        );
        let sent = self
            .sender
            .as_ref()
            .map(|sender| sender.send((id, Box::new(job))).is_ok())
            .unwrap_or(false);
        if !sent {
            self.slots().remove(&id);
            return Err(PipelineError::Worker("worker thread is gone".to_string()));
        }
        Ok(id)
    }

    pub fn has_running_task(&self) -> bool {
        self.slots().values().any(|slot| slot.result.is_none())
    }

    pub fn is_task_running(&self, id: TaskId) -> bool {
        self.slots().get(&id).is_some_and(|slot| slot.result.is_none())
    }

    pub fn is_task_completed(&self, id: TaskId) -> bool {
        self.slots().get(&id).is_some_and(|slot| slot.result.is_some())
    }

    pub fn progress(&self, id: TaskId) -> Option<(String, f32)> {
        self.slots().get(&id).map(|slot| slot.progress.get())
    }

    /// Removes a completed task and hands back its result.
    pub fn take_result(&self, id: TaskId) -> Option<Result<T>> {
        let mut slots = self.slots();
        if slots.get(&id)?.result.is_none() {
            return None;
        }
        slots.remove(&id).and_then(|slot| slot.result)
    }
}

impl<T: Send + 'static> Drop for WorkerThread<T> {
    fn drop(&mut self) {
        // Closing the channel ends the loop once the current task returns.
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Worker thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;
    use std::time::{Duration, Instant};

    fn wait_for(worker: &WorkerThread<u32>, id: TaskId) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !worker.is_task_completed(id) {
            assert!(Instant::now() < deadline, "task did not finish");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn runs_tasks_and_reports_progress() {
        let worker = WorkerThread::<u32>::new("test-worker").unwrap();
        let (release_tx, release_rx) = channel::<()>();
        let id = worker
            .enqueue(move |progress| {
                progress.set("halfway", 0.5);
                release_rx.recv().map_err(|e| PipelineError::Worker(e.to_string()))?;
                Ok(7)
            })
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while worker.progress(id).map(|p| p.1) != Some(0.5) {
            assert!(Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(worker.has_running_task());
        assert!(worker.is_task_running(id));
        assert!(worker.take_result(id).is_none());

        release_tx.send(()).unwrap();
        wait_for(&worker, id);
        assert!(!worker.has_running_task());
        assert_eq!(worker.take_result(id).unwrap().unwrap(), 7);
        assert!(worker.progress(id).is_none());
    }

    #[test]
    fn failures_are_results() {
        let worker = WorkerThread::<u32>::new("test-worker").unwrap();
        let id = worker.enqueue(|_| Err(PipelineError::ImportInProgress)).unwrap();
        wait_for(&worker, id);
        assert!(matches!(worker.take_result(id), Some(Err(PipelineError::ImportInProgress))));
    }
}
