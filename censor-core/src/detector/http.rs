//! Production transport: a batched inference service reached over HTTP.
//! Protocol-agnostic per the spec ("wire contract, protocol-agnostic") —
//! this is one reasonable binding of it, not a mandated schema.

use super::{DetectorTransport, RawDetection};
use crate::batch::BatchJob;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct InferRequest<'a> {
    frame_indices: Vec<usize>,
    width: u32,
    height: u32,
    /// One entry per frame, each `width * height * 3` floats, planar RGB.
    planar_rgb: Vec<&'a [f32]>,
}

#[derive(Debug, Deserialize)]
struct InferResponseEntry {
    frame_index: usize,
    x1: f64,
    y1: f64,
    x2: f64,
    y2: f64,
    class_id: u16,
    score: f32,
}

#[derive(Debug, Deserialize)]
struct InferResponse {
    detections: Vec<InferResponseEntry>,
}

/// HTTP(S) detector transport. `base_url` is expected to expose
/// `POST {base_url}/infer` and `GET {base_url}/health`.
pub struct HttpDetectorTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDetectorTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl DetectorTransport for HttpDetectorTransport {
    async fn infer(&self, batch: &BatchJob) -> anyhow::Result<Vec<RawDetection>> {
        let (width, height) = batch
            .frames
            .first()
            .map(|f| (f.width, f.height))
            .unwrap_or((0, 0));

        let request = InferRequest {
            frame_indices: (0..batch.frames.len()).collect(),
            width,
            height,
            planar_rgb: batch.frames.iter().map(|f| f.planar_rgb.as_slice()).collect(),
        };

        let response = self
            .client
            .post(format!("{}/infer", self.base_url))
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json::<InferResponse>()
            .await?;

        Ok(response
            .detections
            .into_iter()
            .map(|d| RawDetection {
                frame_index: d.frame_index,
                x1: d.x1,
                y1: d.y1,
                x2: d.x2,
                y2: d.y2,
                class_id: d.class_id,
                score: d.score,
            })
            .collect())
    }

    async fn health(&self) -> anyhow::Result<()> {
        self.client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
