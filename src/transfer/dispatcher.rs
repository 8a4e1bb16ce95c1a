//! Bounded worker pool over a pre-filled work queue
//!
//! All units are queued up front and the queue is closed, so idle workers
//! exit on their own once it drains. Each processed unit yields exactly one
//! result. The first failure raises a shared cancel flag that every worker
//! checks before taking its next unit; units already running are allowed to
//! finish.

use crate::error::{Result, SyncError};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Pool size used when none is configured
pub const DEFAULT_WORKERS: usize = 25;

#[derive(Debug, Clone)]
pub struct Dispatcher {
    workers: usize,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_WORKERS)
    }
}

impl Dispatcher {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    /// Runs `op` over every unit with at most `workers` in flight.
    ///
    /// Returns the outputs in completion order, or the first failure wrapped
    /// as `SyncError::Transfer` with the failing unit's key.
    pub async fn run<U, T, F, Fut>(&self, units: Vec<U>, op: F) -> Result<Vec<T>>
    where
        U: Display + Send + 'static,
        T: Send + 'static,
        F: Fn(U) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let total = units.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let (work_tx, work_rx) = mpsc::channel(total);
        for unit in units {
            work_tx
                .send(unit)
                .await
                .map_err(|_| SyncError::LocalIo(std::io::Error::other("work queue closed early")))?;
        }
        drop(work_tx);

        let queue = Arc::new(Mutex::new(work_rx));
        let cancel = Arc::new(AtomicBool::new(false));
        let op = Arc::new(op);
        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<(String, Result<T>)>();

        let mut workers = JoinSet::new();
        for worker in 0..self.workers.min(total) {
            let queue = Arc::clone(&queue);
            let cancel = Arc::clone(&cancel);
            let op = Arc::clone(&op);
            let result_tx = result_tx.clone();
            workers.spawn(async move {
                loop {
                    if cancel.load(Ordering::SeqCst) {
                        debug!(worker, "cancelled, taking no more units");
                        break;
                    }
                    let next = {
                        let mut rx = queue.lock().await;
                        rx.recv().await
                    };
                    let Some(unit) = next else { break };
                    let key = unit.to_string();
                    let result = op(unit).await;
                    if result_tx.send((key, result)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        let mut outputs = Vec::with_capacity(total);
        let mut first_error: Option<SyncError> = None;
        while let Some((key, result)) = result_rx.recv().await {
            match result {
                Ok(value) => outputs.push(value),
                Err(e) if first_error.is_none() => {
                    warn!(unit = %key, error = %e, "transfer failed, stopping dispatch");
                    cancel.store(true, Ordering::SeqCst);
                    first_error = Some(SyncError::Transfer {
                        key,
                        source: Box::new(e),
                    });
                }
                Err(e) => debug!(unit = %key, error = %e, "additional failure after cancel"),
            }
        }

        while let Some(joined) = workers.join_next().await {
            joined?;
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        if outputs.len() != total {
            return Err(SyncError::LocalIo(std::io::Error::other(format!(
                "dispatcher finished {} of {} units",
                outputs.len(),
                total
            ))));
        }
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn every_unit_runs_exactly_once() {
        let dispatcher = Dispatcher::new(25);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (f, p) = (in_flight.clone(), peak.clone());
        let outputs = dispatcher
            .run((0..100).collect(), move |unit: u32| {
                let (f, p) = (f.clone(), p.clone());
                async move {
                    let now = f.fetch_add(1, Ordering::SeqCst) + 1;
                    p.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    f.fetch_sub(1, Ordering::SeqCst);
                    Ok(unit)
                }
            })
            .await
            .unwrap();

        assert_eq!(outputs.len(), 100);
        let unique: HashSet<u32> = outputs.into_iter().collect();
        assert_eq!(unique.len(), 100);
        assert!(peak.load(Ordering::SeqCst) <= 25);
    }

    #[tokio::test]
    async fn first_failure_stops_new_units() {
        let dispatcher = Dispatcher::new(25);
        let started = Arc::new(AtomicUsize::new(0));

        let s = started.clone();
        let err = dispatcher
            .run((0..100).collect(), move |unit: u32| {
                let s = s.clone();
                async move {
                    s.fetch_add(1, Ordering::SeqCst);
                    if unit == 3 {
                        return Err(SyncError::RemoteUnavailable("injected".into()));
                    }
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(())
                }
            })
            .await
            .unwrap_err();

        match err {
            SyncError::Transfer { key, source } => {
                assert_eq!(key, "3");
                assert!(matches!(*source, SyncError::RemoteUnavailable(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(started.load(Ordering::SeqCst) < 100);
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let outputs: Vec<()> = Dispatcher::new(4)
            .run(Vec::<u32>::new(), |_| async { Ok(()) })
            .await
            .unwrap();
        assert!(outputs.is_empty());
    }
}
