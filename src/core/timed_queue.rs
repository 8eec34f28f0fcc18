// src/core/timed_queue.rs

//! A single cooperative scheduler for named one-shot tasks.
//!
//! Tasks run serially on the queue's worker task; a task may re-queue
//! itself, which is how the periodic reload loop is built. `add_task_in`
//! replaces an already-queued task with the same id, `hurry` pulls a queued
//! task forward to run immediately, and `shutdown` cancels everything that
//! has not started yet.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};

type TaskFn = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

struct ScheduledTask {
    due: Instant,
    task: TaskFn,
}

pub struct TimedQueue {
    tasks: Mutex<HashMap<String, ScheduledTask>>,
    notify: Notify,
    stopped: AtomicBool,
}

impl TimedQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(TimedQueue {
            tasks: Mutex::new(HashMap::new()),
            notify: Notify::new(),
            stopped: AtomicBool::new(false),
        })
    }

    /// Spawns the worker loop. Call once.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(queue.run())
    }

    /// Installs (or replaces) a one-shot task to run after `delay`.
    pub fn add_task_in<F>(&self, id: &str, delay: Duration, task: F)
    where
        F: FnOnce() -> BoxFuture<'static, ()> + Send + 'static,
    {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        let due = Instant::now() + delay;
        let replaced = self
            .tasks
            .lock()
            .insert(
                id.to_string(),
                ScheduledTask {
                    due,
                    task: Box::new(task),
                },
            )
            .is_some();
        debug!(
            "scheduled task '{id}' in {:?}{}",
            delay,
            if replaced { " (replaced)" } else { "" }
        );
        self.notify.notify_one();
    }

    /// Advances a queued task to run immediately. Returns false when no task
    /// with that id is queued (it may already be running).
    pub fn hurry(&self, id: &str) -> bool {
        let mut tasks = self.tasks.lock();
        match tasks.get_mut(id) {
            Some(entry) => {
                entry.due = Instant::now();
                drop(tasks);
                debug!("hurrying task '{id}'");
                self.notify.notify_one();
                true
            }
            None => false,
        }
    }

    /// Cancels all queued tasks and stops the worker loop. Running tasks
    /// finish on their own.
    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let cancelled = {
            let mut tasks = self.tasks.lock();
            let n = tasks.len();
            tasks.clear();
            n
        };
        info!("timed queue shut down, {cancelled} queued task(s) cancelled");
        self.notify.notify_one();
    }

    async fn run(self: Arc<Self>) {
        loop {
            if self.stopped.load(Ordering::SeqCst) {
                return;
            }

            let next_due = self.tasks.lock().values().map(|t| t.due).min();

            match next_due {
                None => self.notify.notified().await,
                Some(due) => {
                    let now = Instant::now();
                    if due <= now {
                        let entry = {
                            let mut tasks = self.tasks.lock();
                            let id = tasks
                                .iter()
                                .filter(|(_, t)| t.due <= now)
                                .min_by_key(|(_, t)| t.due)
                                .map(|(id, _)| id.clone());
                            id.and_then(|id| tasks.remove(&id).map(|t| (id, t)))
                        };
                        if let Some((id, entry)) = entry {
                            debug!("running task '{id}'");
                            (entry.task)().await;
                        }
                    } else {
                        tokio::select! {
                            _ = tokio::time::sleep_until(due.into()) => {}
                            _ = self.notify.notified() => {}
                        }
                    }
                }
            }
        }
    }
}
