//! Cooperative task management for the node daemons.
//!
//! A [`TaskGroup`] owns every background task a node spawns; shutdown flips a
//! watch flag that tasks either poll ([`TaskHandle::is_shutting_down`]) or
//! await ([`TaskHandle::shutdown_signal`]), and `join_all` waits for them to
//! drain.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gravity_logging::LOG_TASK;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info_span, warn};

#[derive(Debug)]
struct TaskGroupInner {
    on_shutdown_tx: watch::Sender<bool>,
    // kept alive so signalling shutdown can never fail
    _on_shutdown_rx: watch::Receiver<bool>,
    join: Mutex<VecDeque<(String, JoinHandle<()>)>>,
}

impl Default for TaskGroupInner {
    fn default() -> Self {
        let (on_shutdown_tx, on_shutdown_rx) = watch::channel(false);
        Self {
            on_shutdown_tx,
            _on_shutdown_rx: on_shutdown_rx,
            join: Mutex::new(VecDeque::new()),
        }
    }
}

/// A group of tasks working together that shut down cooperatively.
#[derive(Clone, Default, Debug)]
pub struct TaskGroup {
    inner: Arc<TaskGroupInner>,
}

impl TaskGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn make_handle(&self) -> TaskHandle {
        TaskHandle {
            inner: self.inner.clone(),
        }
    }

    pub fn shutdown(&self) {
        self.inner
            .on_shutdown_tx
            .send(true)
            .expect("receiver is kept in the group");
    }

    /// Spawn a named task; it is expected to watch its [`TaskHandle`] and
    /// finish once shutdown is signalled.
    pub fn spawn<Fut>(
        &self,
        name: impl Into<String>,
        f: impl FnOnce(TaskHandle) -> Fut + Send + 'static,
    ) where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let span = info_span!("task", name);
        let task_handle = self.make_handle();
        let join_handle = tokio::spawn(
            {
                let name = name.clone();
                async move {
                    debug!(target: LOG_TASK, "starting task {name}");
                    f(task_handle).await;
                    debug!(target: LOG_TASK, "finished task {name}");
                }
            }
            .instrument(span),
        );
        self.inner
            .join
            .lock()
            .expect("lock poisoned")
            .push_back((name, join_handle));
    }

    /// Spawn a task that is dropped outright when the group shuts down.
    pub fn spawn_cancellable(
        &self,
        name: impl Into<String>,
        future: impl Future<Output = ()> + Send + 'static,
    ) {
        let handle = self.make_handle();
        self.spawn(name, |_| async move {
            tokio::select! {
                () = handle.shutdown_signal() => {}
                () = future => {}
            }
        });
    }

    /// Wait for every spawned task to finish, each for at most
    /// `join_timeout`.
    pub async fn join_all(self, join_timeout: Option<Duration>) -> anyhow::Result<()> {
        loop {
            let task = self.inner.join.lock().expect("lock poisoned").pop_front();
            let Some((name, join_handle)) = task else {
                return Ok(());
            };

            let joined = match join_timeout {
                Some(timeout) => match tokio::time::timeout(timeout, join_handle).await {
                    Ok(result) => result,
                    Err(_elapsed) => {
                        warn!(target: LOG_TASK, task = %name, "task did not finish in time, abandoning");
                        continue;
                    }
                },
                None => join_handle.await,
            };

            if let Err(err) = joined {
                return Err(anyhow::format_err!("task {name} panicked: {err}"));
            }
        }
    }
}

/// Cheap handle tasks use to observe the shutdown flag of their group.
#[derive(Clone, Debug)]
pub struct TaskHandle {
    inner: Arc<TaskGroupInner>,
}

impl TaskHandle {
    pub fn is_shutting_down(&self) -> bool {
        *self.inner.on_shutdown_tx.borrow()
    }

    /// Resolves once the group's shutdown is signalled.
    pub async fn shutdown_signal(&self) {
        let mut rx = self.inner.on_shutdown_tx.subscribe();
        // send side lives as long as the group, but don't hang if it is gone
        let _ = rx.wait_for(|shutting_down| *shutting_down).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[tokio::test]
    async fn shutdown_signal_stops_spawned_task() {
        let group = TaskGroup::new();
        let finished = Arc::new(AtomicBool::new(false));

        let finished_inner = finished.clone();
        group.spawn("waiter", |handle| async move {
            handle.shutdown_signal().await;
            finished_inner.store(true, Ordering::SeqCst);
        });

        group.shutdown();
        group
            .join_all(Some(Duration::from_secs(5)))
            .await
            .expect("no panics");
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancellable_task_is_dropped_on_shutdown() {
        let group = TaskGroup::new();
        group.spawn_cancellable("sleeper", async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });

        group.shutdown();
        group
            .join_all(Some(Duration::from_secs(5)))
            .await
            .expect("no panics");
    }
}
