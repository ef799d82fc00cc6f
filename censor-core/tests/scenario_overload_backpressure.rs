//! Submitting far more frames than the detector can keep up with should
//! drop the newest frames under a bounded in-flight ceiling rather than
//! letting the queue (or the submitter) grow without limit.

use censor_core::batch::BatchCollector;
use censor_core::config::BatchConfig;
use censor_core::detector::DownscaledFrame;
use censor_core::types::FrameId;
use std::sync::Arc;
use std::time::Duration;

fn tiny_frame() -> DownscaledFrame {
    DownscaledFrame {
        width: 4,
        height: 4,
        source_width: 4,
        source_height: 4,
        planar_rgb: vec![0.0; 4 * 4 * 3],
    }
}

#[tokio::test]
async fn sustained_overload_drops_frames_without_exceeding_the_in_flight_bound() {
    let config = BatchConfig {
        max_wait_ms: 10,
        max_size: 8,
        max_in_flight: 4,
        min_size: 1,
    };
    let (collector, mut batch_rx) = BatchCollector::new(config.clone());
    let collector = Arc::new(collector);

    // A slow "detector": holds a batch in flight for 50ms before releasing
    // its slot, simulating detector.latency=200ms relative to the much
    // faster 1000-frames-in-2s submission rate.
    let drain_task = tokio::spawn({
        let collector = collector.clone();
        async move {
            let mut released = 0u32;
            while let Some(_batch) = batch_rx.recv().await {
                tokio::time::sleep(Duration::from_millis(50)).await;
                collector.release_in_flight();
                released += 1;
                if released >= 200 {
                    break;
                }
            }
        }
    });

    for i in 0..1000u64 {
        let _ = collector.submit(FrameId(i), tiny_frame());
        if collector.in_flight() > config.max_in_flight {
            panic!("in_flight exceeded configured bound: {}", collector.in_flight());
        }
        if i % 50 == 0 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    drain_task.abort();

    let stats = collector.stats();
    assert!(stats.dropped_frames > 0, "overload should have produced drops");
    assert!(collector.in_flight() <= config.max_in_flight);
}
