use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::ScryError;

/// A named pipeline task.
#[derive(Debug)]
pub struct PipelineTask {
    name: &'static str,
    handle: JoinHandle<()>,
    blocking: bool,
}

impl PipelineTask {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// The fixed set of tasks making up one session's pipeline.
///
/// Tasks watch the session's liveness and exit on their own; `join`
/// waits for them and aborts stragglers after a grace period.
#[derive(Debug, Default)]
pub struct TaskSet {
    tasks: Vec<PipelineTask>,
}

impl TaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn an async task on the runtime.
    pub fn spawn<Fut>(&mut self, name: &'static str, fut: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        debug!(task = name, "spawning");
        self.tasks.push(PipelineTask {
            name,
            handle: tokio::spawn(fut),
            blocking: false,
        });
    }

    /// Spawn a task allowed to block, on the blocking pool.
    pub fn spawn_blocking<F>(&mut self, name: &'static str, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        debug!(task = name, "spawning blocking");
        self.tasks.push(PipelineTask {
            name,
            handle: tokio::task::spawn_blocking(f),
            blocking: true,
        });
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.tasks.iter().map(PipelineTask::name)
    }

    /// Wait for every task, at most `grace` in total.
    ///
    /// Async tasks still running afterwards are aborted; blocking ones
    /// cannot be and are left to finish on their own. Panics and aborts
    /// come back as [`ScryError::Task`].
    pub async fn join(self, grace: Duration) -> Vec<ScryError> {
        let deadline = tokio::time::Instant::now() + grace;
        let mut failures = Vec::new();
        for PipelineTask {
            name,
            mut handle,
            blocking,
        } in self.tasks
        {
            let result = match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(result) => result,
                Err(_) if blocking => {
                    warn!(task = name, "blocking task did not stop in time; detaching");
                    failures.push(ScryError::Task {
                        name,
                        reason: "did not stop in time".into(),
                    });
                    continue;
                }
                Err(_) => {
                    warn!(task = name, "task did not stop in time; aborting");
                    handle.abort();
                    handle.await
                }
            };
            match result {
                Ok(()) => debug!(task = name, "task finished"),
                Err(e) => {
                    let reason = if e.is_panic() {
                        "panicked".to_owned()
                    } else {
                        "aborted".to_owned()
                    };
                    failures.push(ScryError::Task { name, reason });
                }
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn joins_finished_tasks() {
        let mut set = TaskSet::new();
        set.spawn("quick", async {});
        set.spawn_blocking("blocking", || {});
        assert_eq!(set.names().collect::<Vec<_>>(), ["quick", "blocking"]);
        assert!(set.join(Duration::from_secs(1)).await.is_empty());
    }

    #[tokio::test]
    async fn aborts_stragglers() {
        let mut set = TaskSet::new();
        set.spawn("stuck", std::future::pending());
        let failures = set.join(Duration::from_millis(20)).await;
        assert!(matches!(
            failures.as_slice(),
            [ScryError::Task { name: "stuck", .. }]
        ));
    }

    #[tokio::test]
    async fn reports_panics() {
        let mut set = TaskSet::new();
        set.spawn("bad", async { panic!("boom") });
        let failures = set.join(Duration::from_secs(1)).await;
        assert_eq!(failures.len(), 1);
        assert!(failures[0].to_string().contains("panicked"));
    }
}
