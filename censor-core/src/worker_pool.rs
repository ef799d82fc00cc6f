//! Process-wide bounded pool of inference workers. Every stream's Batch
//! Collector dispatches batches here rather than calling its Detector
//! Client directly, so the node's concurrent inference load stays bounded
//! regardless of how many streams are running.

use crate::batch::BatchCollector;
use crate::detector::{BatchResult, DetectorClient};
use crate::types::{BatchId, StreamId};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

/// One dispatched batch, paired with everything a worker needs to run
/// inference and report the result back to the owning stream.
pub struct InferenceJob {
    pub stream_id: StreamId,
    pub batch: crate::batch::BatchJob,
    pub detector: Arc<DetectorClient>,
    pub collector: Arc<BatchCollector>,
    pub result_tx: mpsc::UnboundedSender<(StreamId, BatchResult)>,
}

/// Fixed pool of worker tasks pulling from a shared job queue. Sized to
/// the detector's max in-flight batches, so the pool itself is the
/// process-wide concurrency bound on inference calls.
pub struct InferenceWorkerPool {
    job_tx: mpsc::Sender<InferenceJob>,
    workers: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for InferenceWorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceWorkerPool")
            .field("worker_count", &self.workers.len())
            .finish()
    }
}

impl InferenceWorkerPool {
    pub fn new(worker_count: usize, queue_capacity: usize) -> Self {
        let (job_tx, job_rx) = mpsc::channel(queue_capacity.max(1));
        let job_rx = Arc::new(Mutex::new(job_rx));

        let workers = (0..worker_count.max(1))
            .map(|id| {
                let job_rx = job_rx.clone();
                tokio::spawn(Self::worker_loop(id, job_rx))
            })
            .collect();

        Self { job_tx, workers }
    }

    async fn worker_loop(id: usize, job_rx: Arc<Mutex<mpsc::Receiver<InferenceJob>>>) {
        loop {
            let job = {
                let mut rx = job_rx.lock().await;
                rx.recv().await
            };
            let Some(job) = job else {
                break;
            };

            debug!(worker_id = id, batch_id = ?job.batch.batch_id, "inference worker processing batch");
            let result = job.detector.infer(&job.batch).await;
            job.collector.release_in_flight();
            let _ = job.result_tx.send((job.stream_id, result));
        }
    }

    /// Enqueues a batch for inference. Fails only if every worker has
    /// exited (pool shut down).
    pub async fn submit(&self, job: InferenceJob) -> Result<(), mpsc::error::SendError<InferenceJob>> {
        self.job_tx.send(job).await
    }

    /// Stops accepting new work and aborts all worker tasks immediately,
    /// dropping any job still in flight.
    pub fn shutdown(&self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}
