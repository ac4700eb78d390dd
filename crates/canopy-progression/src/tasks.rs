//! Tracked background tasks.
//!
//! Cascading work (post-unlock transition, auto-start of the next vote,
//! zero-cost unlocks) is detached from the calling request but never
//! untracked: every task is counted, bounded by a per-task timeout and
//! cancelled on shutdown.

use crate::error::{Error, Result};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tracing::{debug, warn};

/// Decrements the active count when a task finishes, however it finishes.
struct ActiveGuard {
    active: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if self.active.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Set of background tasks sharing one cancellation signal.
pub struct BackgroundTasks {
    active: Arc<AtomicUsize>,
    idle: Arc<Notify>,
    cancel: watch::Sender<bool>,
    task_timeout: Duration,
}

impl BackgroundTasks {
    pub fn new(task_timeout: Duration) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            active: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
            cancel,
            task_timeout,
        }
    }

    /// Spawn a tracked task. Returns false once shutdown has begun.
    pub fn spawn<F>(&self, name: &'static str, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_shutting_down() {
            debug!(task = name, "shutting down, background task not started");
            return false;
        }

        self.active.fetch_add(1, Ordering::SeqCst);
        let guard = ActiveGuard {
            active: Arc::clone(&self.active),
            idle: Arc::clone(&self.idle),
        };
        let mut cancelled = self.cancel.subscribe();
        let timeout = self.task_timeout;

        tokio::spawn(async move {
            let _guard = guard;
            tokio::select! {
                result = tokio::time::timeout(timeout, task) => {
                    if result.is_err() {
                        warn!(task = name, ?timeout, "background task timed out");
                    }
                }
                _ = cancelled.wait_for(|c| *c) => {
                    debug!(task = name, "background task cancelled");
                }
            }
        });
        true
    }

    /// Number of tasks still running.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Wait until no task is running.
    ///
    /// Tasks spawned by running tasks are counted before their parent
    /// finishes, so a chain of tasks is waited for as a whole.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.active() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Wait for idle with a deadline. Returns false on timeout.
    pub async fn wait_idle_for(&self, deadline: Duration) -> bool {
        tokio::time::timeout(deadline, self.wait_idle()).await.is_ok()
    }

    /// Cancel every task and wait for them to stop.
    pub async fn shutdown(&self, deadline: Duration) -> Result<()> {
        self.cancel.send_replace(true);
        if self.wait_idle_for(deadline).await {
            Ok(())
        } else {
            Err(Error::ShutdownTimeout(deadline))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn waits_for_nested_tasks() {
        let tasks = Arc::new(BackgroundTasks::new(Duration::from_secs(5)));
        let done = Arc::new(AtomicUsize::new(0));

        let inner_tasks = Arc::clone(&tasks);
        let inner_done = Arc::clone(&done);
        tasks.spawn("outer", async move {
            let d = Arc::clone(&inner_done);
            inner_tasks.spawn("inner", async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                d.fetch_add(1, Ordering::SeqCst);
            });
            inner_done.fetch_add(1, Ordering::SeqCst);
        });

        assert!(tasks.wait_idle_for(Duration::from_secs(2)).await);
        assert_eq!(done.load(Ordering::SeqCst), 2);
        assert_eq!(tasks.active(), 0);
    }

    #[tokio::test]
    async fn shutdown_cancels_and_refuses_new_work() {
        let tasks = BackgroundTasks::new(Duration::from_secs(60));
        tasks.spawn("sleeper", async {
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        tasks.shutdown(Duration::from_secs(1)).await.unwrap();
        assert_eq!(tasks.active(), 0);
        assert!(!tasks.spawn("late", async {}));
    }

    #[tokio::test]
    async fn per_task_timeout_applies() {
        let tasks = BackgroundTasks::new(Duration::from_millis(20));
        tasks.spawn("slow", async {
            tokio::time::sleep(Duration::from_secs(30)).await;
        });
        assert!(tasks.wait_idle_for(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn wait_idle_with_nothing_running() {
        let tasks = BackgroundTasks::new(Duration::from_secs(1));
        assert!(tasks.wait_idle_for(Duration::from_millis(10)).await);
    }
}
