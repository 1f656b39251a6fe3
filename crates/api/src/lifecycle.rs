//! Process shutdown: draining consumer loops and releasing resources.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures_util::future::join_all;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

type BoxError = Box<dyn std::error::Error + Send + Sync>;
type StepFuture = Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send>>;

#[derive(Debug, Error)]
pub enum TeardownError {
    #[error("Teardown step {stage}/{step} failed: {reason}")]
    StepFailed {
        stage: String,
        step: String,
        reason: String,
    },

    #[error("Teardown did not finish within {0:?}")]
    TimedOut(Duration),
}

/// One resource release, e.g. closing a pool.
pub struct Step {
    name: String,
    future: StepFuture,
}

impl Step {
    pub fn new<F, E>(name: impl Into<String>, future: F) -> Self
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError>,
    {
        Self {
            name: name.into(),
            future: Box::pin(async move { future.await.map_err(Into::into) }),
        }
    }
}

struct Stage {
    name: String,
    steps: Vec<Step>,
}

/// Ordered release of process resources.
///
/// Stages run in reverse registration order, so a resource registered
/// right after its dependency is released before it. Steps within a stage
/// are independent and run concurrently. Later stages still run after a
/// failure; the first error is returned. The whole teardown is bounded by
/// one timeout.
pub struct Teardown {
    stages: Vec<Stage>,
    timeout: Duration,
}

impl Teardown {
    pub fn new(timeout: Duration) -> Self {
        Self {
            stages: Vec::new(),
            timeout,
        }
    }

    /// Registers a stage. Call in resource acquisition order.
    pub fn register(&mut self, name: impl Into<String>, steps: Vec<Step>) -> &mut Self {
        self.stages.push(Stage {
            name: name.into(),
            steps,
        });
        self
    }

    pub async fn run(self) -> Result<(), TeardownError> {
        let timeout = self.timeout;
        let stages = self.stages;

        let work = async move {
            let mut first_error = None;

            for stage in stages.into_iter().rev() {
                info!(stage = %stage.name, steps = stage.steps.len(), "Releasing resources");

                let results = join_all(
                    stage
                        .steps
                        .into_iter()
                        .map(|step| async move { (step.name, step.future.await) }),
                )
                .await;

                for (step, result) in results {
                    if let Err(err) = result {
                        error!(stage = %stage.name, %step, error = %err, "Teardown step failed");
                        first_error.get_or_insert(TeardownError::StepFailed {
                            stage: stage.name.clone(),
                            step,
                            reason: err.to_string(),
                        });
                    }
                }
            }

            first_error.map_or(Ok(()), Err)
        };

        tokio::time::timeout(timeout, work)
            .await
            .map_err(|_| TeardownError::TimedOut(timeout))?
    }
}

/// A running consumption loop.
pub struct ConsumerTask {
    pub name: String,
    pub handle: JoinHandle<event_bus::Result<()>>,
}

/// Waits for consumer loops to stop after shutdown was triggered.
///
/// Loops still running after `grace` are aborted. Returns true if every loop
/// stopped on its own.
pub async fn drain_consumers(tasks: Vec<ConsumerTask>, grace: Duration) -> bool {
    let aborts: Vec<_> = tasks
        .iter()
        .map(|task| (task.name.clone(), task.handle.abort_handle()))
        .collect();

    let drained = join_all(tasks.into_iter().map(|task| async move {
        match task.handle.await {
            Ok(Ok(())) => info!(consumer = %task.name, "Consumer stopped"),
            Ok(Err(err)) => error!(consumer = %task.name, error = %err, "Consumer failed"),
            Err(err) => error!(consumer = %task.name, error = %err, "Consumer task panicked"),
        }
    }));

    if tokio::time::timeout(grace, drained).await.is_ok() {
        return true;
    }

    for (name, abort) in aborts {
        if !abort.is_finished() {
            warn!(consumer = %name, "Consumer did not stop within grace period, aborting");
            abort.abort();
        }
    }
    false
}
