use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use anyhow::Result;
use async_std::{
    channel::{self, Receiver, Sender, TrySendError},
    task::{self, JoinHandle},
};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    systems::{
        gate::{Admission, InferenceGate},
        heatmap::HeatmapTensor,
        Systems,
    },
    tracking::{KeypointFrame, LabeledKeypoint},
};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraPosition {
    Back,
    Front,
}

/// One captured frame, as delivered by the capture side
#[derive(Debug, Clone)]
pub struct Frame {
    pub pixels: Vec<u8>,
    pub width: usize,
    pub height: usize,
    pub timestamp: Duration,
    pub camera: CameraPosition,
}

/// The pose-estimation model: pixel buffer in, one heatmap per joint out.
/// Never called for more than one frame at a time.
pub trait PoseModel: Send + 'static {
    fn infer(&mut self, frame: &Frame) -> Result<HeatmapTensor>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDisposition {
    Admitted,
    Dropped,
}

struct Job {
    frame_index: u64,
    frame: Frame,
    admission: Admission,
}

/// The capture side of a running pipeline
pub struct PipelineHandle {
    gate: InferenceGate,
    jobs: Sender<Job>,
    frames_seen: AtomicU64,
}

impl PipelineHandle {
    /// Offer a frame. It is only taken if nothing else is in flight; otherwise it
    /// is dropped on the spot.
    ///
    /// After repeated source changes a stale job can still hold the worker slot
    /// while the gate already reads Idle; a frame offered then is admitted, finds
    /// the slot full and is dropped as well, leaving the gate Idle again.
    pub fn on_frame(&self, frame: Frame) -> FrameDisposition {
        let frame_index = self.frames_seen.fetch_add(1, Ordering::Relaxed);

        let admission = match self.gate.try_admit() {
            Some(admission) => admission,
            None => return FrameDisposition::Dropped,
        };

        match self.jobs.try_send(Job {
            frame_index,
            frame,
            admission,
        }) {
            Ok(()) => FrameDisposition::Admitted,
            Err(TrySendError::Full(_)) => {
                debug!("Worker slot still taken; frame {} dropped", frame_index);
                FrameDisposition::Dropped
            }
            Err(TrySendError::Closed(_)) => {
                warn!("Worker has stopped; frame {} dropped", frame_index);
                FrameDisposition::Dropped
            }
        }
    }

    /// The frame source changed discontinuously (e.g. front/back camera flip).
    /// Whatever is in flight will be discarded, and filter history is cleared
    /// before the next frame is smoothed.
    pub fn source_changed(&self) {
        info!("Frame source changed; in-flight result and filter history will be discarded");
        self.gate.reset();
    }

    pub fn gate(&self) -> &InferenceGate {
        &self.gate
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen.load(Ordering::Relaxed)
    }
}

/// Start the worker. Returns the capture-side handle, the stream of keypoint
/// frames, and the worker task (which ends once the handle is dropped).
///
/// The keypoint stream holds a single frame. A consumer that falls behind
/// keeps the gate Busy, so new frames are dropped at capture instead of
/// queueing up downstream.
pub fn spawn_pipeline<M: PoseModel>(
    model: M,
    systems: Systems,
) -> (PipelineHandle, Receiver<KeypointFrame>, JoinHandle<()>) {
    let gate = InferenceGate::new();

    // The gate already guarantees a single admitted frame, so one slot is enough
    let (jobs_sender, jobs_receiver) = channel::bounded::<Job>(1);
    let (output_sender, output_receiver) = channel::bounded::<KeypointFrame>(1);

    let worker = task::spawn(run_worker(
        model,
        systems,
        gate.epoch(),
        jobs_receiver,
        output_sender,
    ));

    (
        PipelineHandle {
            gate,
            jobs: jobs_sender,
            frames_seen: AtomicU64::new(0),
        },
        output_receiver,
        worker,
    )
}

async fn run_worker<M: PoseModel>(
    mut model: M,
    mut systems: Systems,
    mut filters_epoch: u64,
    jobs: Receiver<Job>,
    output: Sender<KeypointFrame>,
) {
    info!("Pose worker started");

    while let Ok(job) = jobs.recv().await {
        let Job {
            frame_index,
            frame,
            admission,
        } = job;

        if !admission.is_current() {
            debug!("Frame {} predates a source change; skipped", frame_index);
            continue;
        }

        if admission.epoch() != filters_epoch {
            systems.reset();
            filters_epoch = admission.epoch();
        }

        let timestamp_us = timestamp_micros(frame.timestamp);

        // CPU-bound; model and filter state move to the blocking pool and back
        let (returned_model, returned_systems, outcome) = task::spawn_blocking(move || {
            let outcome = infer_and_process(&mut model, &mut systems, &frame);
            (model, systems, outcome)
        })
        .await;
        model = returned_model;
        systems = returned_systems;

        match outcome {
            Ok(_) if !admission.is_current() => {
                debug!(
                    "Late result for frame {} discarded after source change",
                    frame_index
                );
            }
            Ok(keypoints) => {
                if systems.labeler.should_send(&keypoints) {
                    let keypoint_frame = KeypointFrame {
                        frame_index,
                        timestamp_us,
                        keypoints,
                    };
                    // Still admitted while this waits on the consumer
                    if output.send(keypoint_frame).await.is_err() {
                        info!("Keypoint receiver closed");
                        break;
                    }
                }
            }
            Err(e) => {
                warn!("Inference failed for frame {}: {}; frame dropped", frame_index, e);
            }
        }

        drop(admission);
    }

    info!("Pose worker stopped");
}

/// Saturates rather than wrapping for timestamps beyond u64 microseconds
fn timestamp_micros(timestamp: Duration) -> u64 {
    u64::try_from(timestamp.as_micros()).unwrap_or(u64::MAX)
}

fn infer_and_process<M: PoseModel>(
    model: &mut M,
    systems: &mut Systems,
    frame: &Frame,
) -> Result<Vec<LabeledKeypoint>> {
    let tensor = model.infer(frame)?;
    Ok(systems.process(&tensor))
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use anyhow::anyhow;
    use ndarray::Array3;

    use super::*;
    use crate::{backend_config::BackendConfig, systems::gate::GateState};

    /// Blocks inside `infer` until the test hands it a result; `None` means
    /// the inference fails
    struct HeldModel {
        started: mpsc::Sender<()>,
        results: mpsc::Receiver<Option<HeatmapTensor>>,
    }

    impl PoseModel for HeldModel {
        fn infer(&mut self, _frame: &Frame) -> Result<HeatmapTensor> {
            let _ = self.started.send(());
            match self.results.recv() {
                Ok(Some(tensor)) => Ok(tensor),
                Ok(None) => Err(anyhow!("model error")),
                Err(_) => Err(anyhow!("test over")),
            }
        }
    }

    /// Answers immediately with the same tensor every time
    struct InstantModel;

    impl PoseModel for InstantModel {
        fn infer(&mut self, _frame: &Frame) -> Result<HeatmapTensor> {
            Ok(tensor(1, 2))
        }
    }

    struct Harness {
        pipeline: PipelineHandle,
        keypoint_frames: Receiver<KeypointFrame>,
        started: mpsc::Receiver<()>,
        results: mpsc::Sender<Option<HeatmapTensor>>,
    }

    fn config() -> BackendConfig {
        BackendConfig {
            joint_labels: vec![String::from("top"), String::from("neck")],
            ..Default::default()
        }
    }

    fn harness() -> Harness {
        let (started_sender, started) = mpsc::channel();
        let (results, results_receiver) = mpsc::channel();
        let model = HeldModel {
            started: started_sender,
            results: results_receiver,
        };
        let (pipeline, keypoint_frames, _worker) = spawn_pipeline(model, Systems::new(&config()));
        Harness {
            pipeline,
            keypoint_frames,
            started,
            results,
        }
    }

    fn frame(ms: u64) -> Frame {
        Frame {
            pixels: vec![0; 4 * 4 * 4],
            width: 4,
            height: 4,
            timestamp: Duration::from_millis(ms),
            camera: CameraPosition::Back,
        }
    }

    fn tensor(row: usize, col: usize) -> HeatmapTensor {
        let mut scores = Array3::<f32>::zeros((2, 4, 4));
        scores[[0, row, col]] = 0.9;
        scores[[1, 3 - row, 3 - col]] = 0.4;
        HeatmapTensor::new(scores)
    }

    async fn wait_until_idle(gate: &InferenceGate) {
        for _ in 0..1000 {
            if gate.state() == GateState::Idle {
                return;
            }
            task::sleep(Duration::from_millis(1)).await;
        }
        panic!("gate never returned to idle");
    }

    #[async_std::test]
    async fn test_frames_dropped_while_busy() {
        let h = harness();

        assert_eq!(h.pipeline.on_frame(frame(0)), FrameDisposition::Admitted);
        h.started.recv().unwrap();
        for i in 1..5 {
            assert_eq!(h.pipeline.on_frame(frame(i * 33)), FrameDisposition::Dropped);
        }
        assert_eq!(h.pipeline.gate().admitted_count(), 1);
        assert_eq!(h.pipeline.gate().dropped_count(), 4);

        h.results.send(Some(tensor(1, 2))).unwrap();
        let first = h.keypoint_frames.recv().await.unwrap();
        assert_eq!(first.frame_index, 0);
        assert_eq!(first.keypoints.len(), 2);
        wait_until_idle(h.pipeline.gate()).await;

        // Exactly one more frame gets in after completion
        assert_eq!(h.pipeline.on_frame(frame(200)), FrameDisposition::Admitted);
        assert_eq!(h.pipeline.on_frame(frame(233)), FrameDisposition::Dropped);
        h.started.recv().unwrap();
        h.results.send(Some(tensor(1, 2))).unwrap();

        let second = h.keypoint_frames.recv().await.unwrap();
        assert_eq!(second.frame_index, 5);
        assert_eq!(second.timestamp_us, 200_000);
        assert_eq!(h.pipeline.frames_seen(), 7);
    }

    #[async_std::test]
    async fn test_inference_failure_drops_frame_and_frees_gate() {
        let h = harness();

        assert_eq!(h.pipeline.on_frame(frame(0)), FrameDisposition::Admitted);
        h.started.recv().unwrap();
        h.results.send(None).unwrap();
        wait_until_idle(h.pipeline.gate()).await;
        assert!(h.keypoint_frames.try_recv().is_err());

        assert_eq!(h.pipeline.on_frame(frame(33)), FrameDisposition::Admitted);
        h.started.recv().unwrap();
        h.results.send(Some(tensor(0, 0))).unwrap();
        let output = h.keypoint_frames.recv().await.unwrap();
        assert_eq!(output.frame_index, 1);
    }

    #[async_std::test]
    async fn test_source_change_discards_late_result_and_filter_history() {
        let h = harness();

        assert_eq!(h.pipeline.on_frame(frame(0)), FrameDisposition::Admitted);
        h.started.recv().unwrap();

        h.pipeline.source_changed();
        assert_eq!(h.pipeline.gate().state(), GateState::Idle);
        assert_eq!(h.pipeline.on_frame(frame(33)), FrameDisposition::Admitted);

        // Result of the frame from before the flip arrives late
        h.results.send(Some(tensor(0, 0))).unwrap();

        h.started.recv().unwrap();
        h.results.send(Some(tensor(1, 2))).unwrap();

        let output = h.keypoint_frames.recv().await.unwrap();
        assert_eq!(output.frame_index, 1);

        let mut fresh = Systems::new(&config());
        assert_eq!(output.keypoints, fresh.process(&tensor(1, 2)));
        assert!(h.keypoint_frames.try_recv().is_err());
    }

    #[async_std::test]
    async fn test_worker_stops_when_handle_dropped() {
        let (started_sender, _started) = mpsc::channel();
        let (_results, results_receiver) = mpsc::channel();
        let model = HeldModel {
            started: started_sender,
            results: results_receiver,
        };
        let (pipeline, keypoint_frames, worker) = spawn_pipeline(model, Systems::new(&config()));

        drop(pipeline);
        worker.await;
        assert!(keypoint_frames.recv().await.is_err());
    }

    #[async_std::test]
    async fn test_slow_consumer_keeps_gate_busy() {
        let (pipeline, keypoint_frames, _worker) =
            spawn_pipeline(InstantModel, Systems::new(&config()));

        // First result fits in the output slot
        assert_eq!(pipeline.on_frame(frame(0)), FrameDisposition::Admitted);
        wait_until_idle(pipeline.gate()).await;

        // Second result has nowhere to go until the consumer reads
        assert_eq!(pipeline.on_frame(frame(33)), FrameDisposition::Admitted);
        for i in 2..200 {
            assert_eq!(pipeline.on_frame(frame(i * 33)), FrameDisposition::Dropped);
            if i % 50 == 0 {
                task::sleep(Duration::from_millis(5)).await;
            }
        }
        assert_eq!(pipeline.gate().state(), GateState::Busy);
        assert_eq!(pipeline.gate().admitted_count(), 2);
        assert_eq!(keypoint_frames.len(), 1);

        assert_eq!(keypoint_frames.recv().await.unwrap().frame_index, 0);
        assert_eq!(keypoint_frames.recv().await.unwrap().frame_index, 1);
        wait_until_idle(pipeline.gate()).await;
        assert!(keypoint_frames.try_recv().is_err());
    }

    #[async_std::test]
    async fn test_job_stale_on_arrival_is_skipped() {
        let h = harness();

        assert_eq!(h.pipeline.on_frame(frame(0)), FrameDisposition::Admitted);
        h.started.recv().unwrap();

        h.pipeline.source_changed();
        assert_eq!(h.pipeline.on_frame(frame(33)), FrameDisposition::Admitted);
        h.pipeline.source_changed();

        // Gate reads Idle but frame 1 still holds the worker slot
        assert_eq!(h.pipeline.gate().state(), GateState::Idle);
        assert_eq!(h.pipeline.on_frame(frame(66)), FrameDisposition::Dropped);
        assert_eq!(h.pipeline.gate().state(), GateState::Idle);

        h.results.send(Some(tensor(0, 0))).unwrap();

        // Frame 1 never reaches the model
        assert!(h.started.recv_timeout(Duration::from_millis(200)).is_err());
        assert!(h.keypoint_frames.try_recv().is_err());

        let mut next_index = None;
        for _ in 0..100 {
            if h.pipeline.on_frame(frame(100)) == FrameDisposition::Admitted {
                next_index = Some(h.pipeline.frames_seen() - 1);
                break;
            }
            task::sleep(Duration::from_millis(5)).await;
        }
        let next_index = next_index.expect("worker slot never freed");

        h.started.recv().unwrap();
        h.results.send(Some(tensor(1, 2))).unwrap();
        let output = h.keypoint_frames.recv().await.unwrap();
        assert_eq!(output.frame_index, next_index);

        let mut fresh = Systems::new(&config());
        assert_eq!(output.keypoints, fresh.process(&tensor(1, 2)));
    }

    #[test]
    fn test_timestamp_micros_saturates() {
        assert_eq!(timestamp_micros(Duration::from_millis(66)), 66_000);
        assert_eq!(timestamp_micros(Duration::MAX), u64::MAX);
    }
}
