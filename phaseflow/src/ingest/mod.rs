//! Queue-fed pipeline execution.
//!
//! An [`IngestEngine`] owns a bounded queue and one dedicated worker thread
//! that runs a pipeline for every payload, in publish order. Producers can
//! block, fail fast, or await capacity.

use crate::config::EngineConfig;
use crate::errors::{ConfigurationError, PhaseflowError};
use crate::observability::SpanTimer;
use crate::pipeline::Pipeline;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Counters of an ingest engine.
#[derive(Debug, Default)]
struct IngestCounters {
    processed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
}

/// Snapshot of an engine's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    /// Payloads the worker finished, successfully or not.
    pub processed: u64,
    /// Runs that returned a fatal error or recorded action failures.
    pub failed: u64,
    /// Payloads refused by [`IngestEngine::try_publish`].
    pub rejected: u64,
}

/// Runs a pipeline over payloads published to a bounded queue.
///
/// Dropping the engine shuts it down and waits for the queue to drain.
pub struct IngestEngine<C> {
    name: String,
    sender: Mutex<Option<mpsc::Sender<C>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<IngestCounters>,
}

impl<C: Send + 'static> IngestEngine<C> {
    /// Seals `pipeline` and starts the worker thread with a queue of
    /// `buffer` payloads.
    ///
    /// # Errors
    ///
    /// Fails if `buffer` is zero, if the pipeline cannot be sealed, or if
    /// the worker thread cannot be spawned.
    pub fn start(name: impl Into<String>, pipeline: Arc<Pipeline<C>>, buffer: usize) -> Result<Self, PhaseflowError> {
        let name = name.into();
        if buffer == 0 {
            return Err(ConfigurationError::invalid_value("ingest_buffer", "must be at least 1").into());
        }
        pipeline.seal()?;

        let (sender, receiver) = mpsc::channel(buffer);
        let counters = Arc::new(IngestCounters::default());
        let worker = thread::Builder::new().name(format!("ingest-{name}")).spawn({
            let name = name.clone();
            let counters = Arc::clone(&counters);
            move || process_payloads(&name, receiver, &pipeline, &counters)
        })?;

        info!(engine = %name, buffer, "Ingest engine started");
        Ok(Self {
            name,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            counters,
        })
    }

    /// Starts an engine with the queue size from `config`.
    ///
    /// # Errors
    ///
    /// See [`start`](IngestEngine::start).
    pub fn with_config(
        name: impl Into<String>,
        pipeline: Arc<Pipeline<C>>,
        config: &EngineConfig,
    ) -> Result<Self, PhaseflowError> {
        Self::start(name, pipeline, config.ingest_buffer)
    }

    /// Returns the engine name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn sender(&self) -> Result<mpsc::Sender<C>, PhaseflowError> {
        self.sender
            .lock()
            .clone()
            .ok_or_else(|| PhaseflowError::EngineStopped(self.name.clone()))
    }

    /// Publishes `payload`, blocking while the queue is full.
    ///
    /// Must not be called from inside an async runtime; use
    /// [`publish_async`](IngestEngine::publish_async) there.
    ///
    /// # Errors
    ///
    /// Returns `EngineStopped` after shutdown.
    pub fn publish(&self, payload: C) -> Result<(), PhaseflowError> {
        self.sender()?
            .blocking_send(payload)
            .map_err(|_| PhaseflowError::EngineStopped(self.name.clone()))
    }

    /// Publishes `payload` if the queue has room.
    ///
    /// # Errors
    ///
    /// Returns `QueueFull` when the queue is at capacity and
    /// `EngineStopped` after shutdown.
    pub fn try_publish(&self, payload: C) -> Result<(), PhaseflowError> {
        match self.sender()?.try_send(payload) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                Err(PhaseflowError::QueueFull(self.name.clone()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(PhaseflowError::EngineStopped(self.name.clone())),
        }
    }

    /// Publishes `payload`, waiting asynchronously for capacity.
    ///
    /// # Errors
    ///
    /// Returns `EngineStopped` after shutdown.
    pub async fn publish_async(&self, payload: C) -> Result<(), PhaseflowError> {
        let sender = self.sender()?;
        sender
            .send(payload)
            .await
            .map_err(|_| PhaseflowError::EngineStopped(self.name.clone()))
    }

    /// Returns true until [`shutdown`](IngestEngine::shutdown) is called.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.sender.lock().is_some()
    }

    /// Returns a snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> IngestStats {
        IngestStats {
            processed: self.counters.processed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }

    /// Stops accepting payloads, lets the worker drain the queue and joins
    /// it. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the worker thread panicked.
    pub fn shutdown(&self) -> Result<(), PhaseflowError> {
        drop(self.sender.lock().take());
        let Some(worker) = self.worker.lock().take() else {
            return Ok(());
        };
        worker
            .join()
            .map_err(|_| PhaseflowError::Internal(format!("ingest worker '{}' panicked", self.name)))?;
        info!(engine = %self.name, processed = self.stats().processed, "Ingest engine stopped");
        Ok(())
    }
}

impl<C> Drop for IngestEngine<C> {
    fn drop(&mut self) {
        drop(self.sender.get_mut().take());
        if let Some(worker) = self.worker.get_mut().take() {
            if worker.join().is_err() {
                warn!(engine = %self.name, "Ingest worker panicked");
            }
        }
    }
}

fn process_payloads<C: 'static>(
    name: &str,
    mut receiver: mpsc::Receiver<C>,
    pipeline: &Pipeline<C>,
    counters: &IngestCounters,
) {
    debug!(engine = %name, "Ingest worker started");
    while let Some(payload) = receiver.blocking_recv() {
        let timer = SpanTimer::start(name);
        match pipeline.execute(payload) {
            Ok(result) if result.has_errors() => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                debug!(engine = %name, errors = result.errors.len(), "Payload finished with errors");
            }
            Ok(_) => {}
            Err(err) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(engine = %name, error = %err, "Payload run failed");
            }
        }
        counters.processed.fetch_add(1, Ordering::Relaxed);
        timer.finish();
    }
    debug!(engine = %name, "Ingest worker drained");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{controlled, map, ActionResult, StepFault};
    use crate::control::ActionControl;
    use pretty_assertions::assert_eq;
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    fn recording_pipeline(out: std_mpsc::Sender<i32>) -> Arc<Pipeline<i32>> {
        let out = Mutex::new(out);
        let mut pipeline = Pipeline::new("ingest");
        pipeline
            .add_action(map(|n: &i32| n * 10))
            .unwrap()
            .add_post_action(controlled(move |n: &i32, _: &mut dyn ActionControl<i32>| -> ActionResult<i32> {
                out.lock().send(*n).map_err(|e| StepFault::failed(e.to_string()))?;
                Ok(*n)
            }))
            .unwrap();
        Arc::new(pipeline)
    }

    #[test]
    fn test_payloads_run_in_publish_order() {
        let (tx, rx) = std_mpsc::channel();
        let engine = IngestEngine::start("ordered", recording_pipeline(tx), 4).unwrap();
        for n in 1..=5 {
            engine.publish(n).unwrap();
        }
        engine.shutdown().unwrap();

        let seen: Vec<i32> = rx.try_iter().collect();
        assert_eq!(seen, vec![10, 20, 30, 40, 50]);
        assert_eq!(engine.stats().processed, 5);
        assert!(!engine.is_running());
    }

    #[test]
    fn test_publish_after_shutdown_fails() {
        let (tx, _rx) = std_mpsc::channel();
        let engine = IngestEngine::start("stopped", recording_pipeline(tx), 1).unwrap();
        engine.shutdown().unwrap();
        engine.shutdown().unwrap();

        assert!(matches!(engine.publish(1), Err(PhaseflowError::EngineStopped(_))));
        assert!(matches!(engine.try_publish(1), Err(PhaseflowError::EngineStopped(_))));
        let async_result = tokio_test::block_on(engine.publish_async(1));
        assert!(matches!(async_result, Err(PhaseflowError::EngineStopped(_))));
    }

    #[test]
    fn test_try_publish_reports_full_queue() {
        let (started_tx, started_rx) = std_mpsc::channel();
        let started_tx = Mutex::new(started_tx);
        let gate = Arc::new(std::sync::Barrier::new(2));
        let worker_gate = Arc::clone(&gate);
        let mut pipeline = Pipeline::new("slow");
        pipeline
            .add_action(map(move |n: &i32| {
                if *n == 0 {
                    let _ = started_tx.lock().send(());
                    worker_gate.wait();
                }
                *n
            }))
            .unwrap();
        let engine = IngestEngine::start("slow", Arc::new(pipeline), 1).unwrap();

        engine.publish(0).unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        engine.try_publish(1).unwrap();
        assert!(matches!(engine.try_publish(2), Err(PhaseflowError::QueueFull(_))));
        gate.wait();
        engine.shutdown().unwrap();

        let stats = engine.stats();
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.processed, 2);
    }

    #[test]
    fn test_failed_runs_are_counted() {
        let mut pipeline = Pipeline::new("failing");
        pipeline
            .short_circuit_on_exception(false)
            .unwrap()
            .add_action(crate::testing::FailingAction::new("bad payload"))
            .unwrap();
        let engine = IngestEngine::start("failing", Arc::new(pipeline), 8).unwrap();
        engine.publish(1).unwrap();
        engine.publish(2).unwrap();
        engine.shutdown().unwrap();

        assert_eq!(
            engine.stats(),
            IngestStats {
                processed: 2,
                failed: 2,
                rejected: 0,
            }
        );
    }

    #[test]
    fn test_zero_buffer_is_rejected() {
        let (tx, _rx) = std_mpsc::channel();
        let Err(err) = IngestEngine::start("zero", recording_pipeline(tx), 0) else {
            panic!("expected configuration error");
        };
        assert!(matches!(err, PhaseflowError::Configuration(ref e) if e.code() == Some("CONFIG-007-INVALID_VALUE")));
    }

    #[tokio::test]
    async fn test_publish_async() {
        let (tx, rx) = std_mpsc::channel();
        let engine = IngestEngine::with_config("async", recording_pipeline(tx), &EngineConfig::default()).unwrap();
        engine.publish_async(3).await.unwrap();
        engine.publish_async(4).await.unwrap();
        engine.shutdown().unwrap();

        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![30, 40]);
    }
}
