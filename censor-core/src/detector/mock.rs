//! Deterministic detector transport used by tests and local runs.
//!
//! Per §9's open question about the source's "mock" detector always
//! returning empty detections, this mock is explicit about what it
//! returns and lets a test configure it, rather than silently being a
//! no-op that would make a test pass for the wrong reason.

use super::{DetectorTransport, RawDetection};
use crate::batch::BatchJob;
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

type ResponderFn = Box<dyn Fn(&BatchJob) -> Vec<RawDetection> + Send + Sync>;

pub struct MockDetectorTransport {
    responder: Mutex<ResponderFn>,
    fails: bool,
    latency: Option<Duration>,
}

impl MockDetectorTransport {
    /// Returns the same fixed set of raw detections for every batch.
    pub fn fixed(detections: Vec<RawDetection>) -> Self {
        Self {
            responder: Mutex::new(Box::new(move |_| detections.clone())),
            fails: false,
            latency: None,
        }
    }

    /// Calls `f` per batch to compute detections, e.g. to simulate a
    /// moving object across frame_ids.
    pub fn with_responder<F>(f: F) -> Self
    where
        F: Fn(&BatchJob) -> Vec<RawDetection> + Send + Sync + 'static,
    {
        Self {
            responder: Mutex::new(Box::new(f)),
            fails: false,
            latency: None,
        }
    }

    /// Every call returns a transport error, as if the detector were down.
    pub fn always_fails() -> Self {
        Self {
            responder: Mutex::new(Box::new(|_| Vec::new())),
            fails: true,
            latency: None,
        }
    }

    /// Adds a fixed artificial latency before responding, for exercising
    /// timeout and backpressure scenarios.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }
}

#[async_trait]
impl DetectorTransport for MockDetectorTransport {
    async fn infer(&self, batch: &BatchJob) -> anyhow::Result<Vec<RawDetection>> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.fails {
            anyhow::bail!("mock detector transport failure");
        }
        let detections = (self.responder.lock().unwrap())(batch);
        Ok(detections)
    }

    async fn health(&self) -> anyhow::Result<()> {
        if self.fails {
            anyhow::bail!("mock detector unhealthy");
        }
        Ok(())
    }
}
