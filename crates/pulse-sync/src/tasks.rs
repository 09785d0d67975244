//! Named background tasks.
//!
//! Each timer or loop a [`crate::ConnectionManager`] runs (reconnect, ping,
//! health check, reader) is registered under a fixed name so teardown can
//! abort exactly what is running.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, PoisonError};

use tokio::task::JoinHandle;
use tracing::trace;

pub const RECONNECT_TASK: &str = "reconnect";
pub const PING_TASK: &str = "ping";
pub const HEALTH_TASK: &str = "health";
pub const READER_TASK: &str = "reader";
pub const TOKEN_REFRESH_TASK: &str = "token_refresh";

#[derive(Debug, Default)]
pub struct TaskSet {
    tasks: Mutex<HashMap<&'static str, JoinHandle<()>>>,
}

impl TaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `future` under `name`, aborting any task already holding it.
    ///
    /// The handle is stored before the lock is released, so a task that
    /// calls [`TaskSet::forget`] on itself always finds its own entry.
    pub fn spawn<F>(&self, name: &'static str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        let handle = tokio::spawn(future);
        if let Some(previous) = tasks.insert(name, handle) {
            trace!(task = name, "Replacing running task");
            previous.abort();
        }
    }

    /// Aborts the task registered under `name`.
    pub fn cancel(&self, name: &'static str) -> bool {
        let handle = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        match handle {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Drops the entry without aborting the task.
    ///
    /// Used by a task that is about to start work which may register a
    /// successor under the same name.
    pub fn forget(&self, name: &'static str) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }

    pub fn cancel_all(&self) {
        let drained: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (name, handle) in drained {
            trace!(task = name, "Aborting task");
            handle.abort();
        }
    }

    pub fn is_running(&self, name: &'static str) -> bool {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .is_some_and(|h| !h.is_finished())
    }

    /// Names of tasks that have not finished, sorted.
    pub fn running(&self) -> Vec<&'static str> {
        let tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<_> = tasks
            .iter()
            .filter(|(_, h)| !h.is_finished())
            .map(|(name, _)| *name)
            .collect();
        names.sort_unstable();
        names
    }
}

impl Drop for TaskSet {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_spawn_replaces_existing() {
        let tasks = TaskSet::new();
        tasks.spawn(PING_TASK, std::future::pending());
        tasks.spawn(PING_TASK, std::future::pending());
        tasks.spawn(HEALTH_TASK, std::future::pending());
        tokio::task::yield_now().await;

        assert_eq!(tasks.running(), vec![HEALTH_TASK, PING_TASK]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_and_cancel_all() {
        let tasks = TaskSet::new();
        tasks.spawn(RECONNECT_TASK, tokio::time::sleep(Duration::from_secs(60)));
        tasks.spawn(PING_TASK, std::future::pending());

        assert!(tasks.cancel(RECONNECT_TASK));
        assert!(!tasks.cancel(RECONNECT_TASK));
        assert!(tasks.is_running(PING_TASK));

        tasks.cancel_all();
        assert!(tasks.running().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_tasks_are_not_running() {
        let tasks = TaskSet::new();
        tasks.spawn(READER_TASK, async {});
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(!tasks.is_running(READER_TASK));
    }
}
