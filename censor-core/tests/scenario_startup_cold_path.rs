//! From `engine::start()` to the first published frame should be fast:
//! the engine must reach `Running` and record its first emission almost
//! immediately once a frame is available, with no warm-up delay baked
//! into the publish lane itself.

use censor_core::config::EngineConfig;
use censor_core::detector::MockDetectorTransport;
use censor_core::engine::{self, EngineState};
use censor_core::sink::RecordingFrameSink;
use censor_core::source::ChannelFrameSource;
use censor_core::worker_pool::InferenceWorkerPool;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn first_frame_reaches_running_state_and_sink_promptly() {
    let (push, source) = ChannelFrameSource::new(4);
    let sink = Arc::new(RecordingFrameSink::new());
    let pool = Arc::new(InferenceWorkerPool::new(1, 4));

    let handle = engine::start(
        EngineConfig::default(),
        Box::new(source),
        sink.clone(),
        Arc::new(MockDetectorTransport::fixed(vec![])),
        pool,
    );

    assert_eq!(handle.state(), EngineState::Starting);

    push.on_frame(censor_core::types::Frame::new(
        censor_core::types::FrameId(0),
        censor_core::types::Timestamp::now(),
        1280,
        720,
        vec![0u8; 1280 * 720 * 3],
    ));

    let started = tokio::time::Instant::now();
    loop {
        if handle.state() == EngineState::Running {
            break;
        }
        if started.elapsed() > Duration::from_millis(500) {
            panic!("engine did not reach Running within the startup budget");
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let first_emission_latency = started.elapsed();
    assert!(
        first_emission_latency < Duration::from_millis(500),
        "first emission should be near-instant once a frame is available"
    );

    loop {
        if sink.emitted_count() >= 1 {
            break;
        }
        if started.elapsed() > Duration::from_millis(500) {
            panic!("sink never received the first emitted frame");
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    handle.stop();
    push.end_of_stream();
}
