//! Pluggable dispatch execution.
//!
//! Inbound deliveries hand their `perform` call to an executor chosen at
//! construction time: the inline executor runs it on the link task before
//! acknowledgement, the worker executor detaches it so a slow handler never
//! blocks consumption.

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Deserialize;

/// Which executor the inbound dispatcher uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Run the handler on the link task before ack.
    #[default]
    Inline,
    /// Detach the handler onto its own task.
    Worker,
}

/// Executes a dispatch task.
#[async_trait]
pub trait DispatchExecutor: Send + Sync {
    async fn execute(&self, task: BoxFuture<'static, ()>);
}

/// Runs the task to completion before returning.
pub struct InlineExecutor;

#[async_trait]
impl DispatchExecutor for InlineExecutor {
    async fn execute(&self, task: BoxFuture<'static, ()>) {
        task.await;
    }
}

/// Spawns the task and returns immediately.
pub struct WorkerExecutor;

#[async_trait]
impl DispatchExecutor for WorkerExecutor {
    async fn execute(&self, task: BoxFuture<'static, ()>) {
        tokio::spawn(task);
    }
}

/// Build the executor selected by configuration.
pub fn executor_for(mode: DispatchMode) -> Box<dyn DispatchExecutor> {
    match mode {
        DispatchMode::Inline => Box::new(InlineExecutor),
        DispatchMode::Worker => Box::new(WorkerExecutor),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_inline_completes_before_returning() {
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        InlineExecutor
            .execute(Box::pin(async move {
                flag.store(true, Ordering::SeqCst);
            }))
            .await;
        assert!(done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_worker_detaches_slow_task() {
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        WorkerExecutor
            .execute(Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                flag.store(true, Ordering::SeqCst);
            }))
            .await;
        // Returned before the task finished
        assert!(!done.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(done.load(Ordering::SeqCst));
    }

    #[test]
    fn test_mode_deserializes_lowercase() {
        let mode: DispatchMode = serde_json::from_str("\"worker\"").unwrap();
        assert_eq!(mode, DispatchMode::Worker);
    }
}
