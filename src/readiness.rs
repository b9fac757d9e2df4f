// SPDX-License-Identifier: MIT
//! Startup coordination for groups of independently running tasks.
//!
//! [`StartupTask::spawn`] launches a unit of setup work on the Tokio runtime. The work
//! receives its own [`CancellationToken`] and, on success, its output is published
//! into a write-once slot owned by the task handle, so it stays readable after the
//! coordinator returns.
//!
//! [`await_ready`] then joins a group of tasks under a single budget:
//!
//! * the deadline is fixed once, when the call starts;
//! * each join waits at most for the time *remaining* until that deadline, so the
//!   whole group never takes longer than the budget however many tasks it has;
//! * a task that already finished is taken as is, without waiting;
//! * when a task is still running at the deadline, every unfinished task in the
//!   group is cancelled and the call fails with [`ReadinessError::Timeout`];
//! * once all tasks finished, each must have published a value that reports
//!   [`Readiness::is_ready`].
//!
//! Cancellation is cooperative. Tasks are never aborted; they are expected to watch
//! their token and wind down.
//!
//! Groups that depend on each other are sequenced by the caller: await the first
//! group, read its published values, build the second group from them.
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Implemented by values a startup task publishes.
pub trait Readiness {
    fn is_ready(&self) -> bool;
}

#[derive(Debug, Error)]
pub enum ReadinessError {
    #[error("{task} {reason} within the {budget:?} startup budget")]
    Timeout {
        task: String,
        reason: &'static str,
        budget: Duration,
    },
    #[error("{task} finished without publishing a result")]
    Missing { task: String },
    #[error("{task} finished but is not ready")]
    NotReady { task: String },
    #[error("interrupted while waiting for {task} to end")]
    Interrupted {
        task: String,
        #[source]
        source: JoinError,
    },
}

impl ReadinessError {
    /// Name of the task the failure is attributed to.
    pub fn task(&self) -> &str {
        match self {
            Self::Timeout { task, .. }
            | Self::Missing { task }
            | Self::NotReady { task }
            | Self::Interrupted { task, .. } => task,
        }
    }
}

/// A running unit of setup work and the slot it publishes into.
pub struct StartupTask<T> {
    name: String,
    handle: Option<JoinHandle<()>>,
    cancel: CancellationToken,
    slot: Arc<OnceLock<T>>,
}

impl<T> StartupTask<T>
where
    T: Send + Sync + 'static,
{
    /// Spawn `work` on the current runtime.
    ///
    /// `work` is handed the task's cancellation token. `Ok` values are published;
    /// errors are logged and leave the slot empty.
    pub fn spawn<F, Fut, E>(name: impl Into<String>, work: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let name = name.into();
        let cancel = CancellationToken::new();
        let slot = Arc::new(OnceLock::new());

        let work = work(cancel.clone());
        let publish_to = slot.clone();
        let task_name = name.clone();
        let handle = tokio::spawn(async move {
            match work.await {
                Ok(value) => {
                    if publish_to.set(value).is_err() {
                        warn!(task = %task_name, "result already published");
                    }
                }
                Err(err) => error!(task = %task_name, error = %err, "startup task failed"),
            }
        });

        Self {
            name,
            handle: Some(handle),
            cancel,
            slot,
        }
    }
}

impl<T> StartupTask<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True once the work has ended, or after the coordinator joined it.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// The published value, if the work succeeded.
    pub fn published(&self) -> Option<&T> {
        self.slot.get()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Join every task in `tasks` within one shared `budget`, then check readiness.
pub async fn await_ready<T: Readiness>(
    tasks: &mut [StartupTask<T>],
    budget: Duration,
) -> Result<(), ReadinessError> {
    let started = Instant::now();
    let deadline = started + budget;

    for index in 0..tasks.len() {
        let joined = if tasks[index].is_finished() {
            match tasks[index].handle.take() {
                Some(handle) => handle.await,
                None => continue,
            }
        } else {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(timed_out(tasks, index, "took too long to finish", budget));
            }
            let Some(handle) = tasks[index].handle.as_mut() else {
                continue;
            };
            match tokio::time::timeout(remaining, handle).await {
                Ok(joined) => {
                    tasks[index].handle = None;
                    joined
                }
                Err(_) => {
                    return Err(timed_out(
                        tasks,
                        index,
                        "timed out waiting to finish",
                        budget,
                    ))
                }
            }
        };

        if let Err(source) = joined {
            let task = tasks[index].name.clone();
            error!(task = %task, panicked = source.is_panic(), "startup task did not end cleanly");
            return Err(ReadinessError::Interrupted { task, source });
        }
    }

    for task in tasks.iter() {
        match task.published() {
            None => {
                error!(task = %task.name, "startup task published no result");
                return Err(ReadinessError::Missing {
                    task: task.name.clone(),
                });
            }
            Some(value) if !value.is_ready() => {
                error!(task = %task.name, "startup task is not ready");
                return Err(ReadinessError::NotReady {
                    task: task.name.clone(),
                });
            }
            Some(_) => {}
        }
    }

    info!(
        tasks = tasks.len(),
        elapsed = ?started.elapsed(),
        budget = ?budget,
        "startup group ready"
    );
    Ok(())
}

fn timed_out<T>(
    tasks: &[StartupTask<T>],
    index: usize,
    reason: &'static str,
    budget: Duration,
) -> ReadinessError {
    let task = tasks[index].name.clone();
    error!(task = %task, budget = ?budget, "{reason}");
    for sibling in tasks.iter().filter(|sibling| !sibling.is_finished()) {
        sibling.cancel.cancel();
    }
    ReadinessError::Timeout {
        task,
        reason,
        budget,
    }
}
