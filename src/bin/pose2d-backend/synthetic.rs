use std::{
    f32::consts::TAU,
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Result};
use ndarray::Array3;
use pose2d_keypoints::{
    pipeline::{CameraPosition, Frame, PoseModel},
    systems::heatmap::HeatmapTensor,
};

const BYTES_PER_PIXEL: usize = 4;

/// Input resolution relative to the heatmap, as for CPM (368px in, 46 cells out)
pub const PIXELS_PER_CELL: usize = 8;

const BLOB_SIGMA: f32 = 1.5;

/// Stands in for the device camera: blank BGRA frames stamped with the time
/// since capture started
pub struct SyntheticCamera {
    width: usize,
    height: usize,
    position: CameraPosition,
    started: Instant,
}

impl SyntheticCamera {
    pub fn new(width: usize, height: usize) -> Self {
        SyntheticCamera {
            width,
            height,
            position: CameraPosition::Back,
            started: Instant::now(),
        }
    }

    pub fn flip(&mut self) -> CameraPosition {
        self.position = match self.position {
            CameraPosition::Back => CameraPosition::Front,
            CameraPosition::Front => CameraPosition::Back,
        };
        self.position
    }

    pub fn capture(&self) -> Frame {
        Frame {
            pixels: vec![0; self.width * self.height * BYTES_PER_PIXEL],
            width: self.width,
            height: self.height,
            timestamp: self.started.elapsed(),
            camera: self.position,
        }
    }
}

/// Produces one Gaussian blob per joint, with the joints circling the centre of
/// the image over time. Front camera frames are mirrored horizontally.
pub struct SyntheticPoseModel {
    num_joints: usize,
    heatmap_width: usize,
    heatmap_height: usize,
    inference_time: Duration,
    drop_joint_every: u64,
    inferences: u64,
}

impl SyntheticPoseModel {
    pub fn new(
        num_joints: usize,
        heatmap_width: usize,
        heatmap_height: usize,
        inference_time: Duration,
        drop_joint_every: u64,
    ) -> Self {
        SyntheticPoseModel {
            num_joints,
            heatmap_width,
            heatmap_height,
            inference_time,
            drop_joint_every,
            inferences: 0,
        }
    }

    /// Which joint (if any) has an all-zero heatmap on this inference
    fn missing_joint(&self) -> Option<usize> {
        if self.drop_joint_every == 0 || self.num_joints == 0 {
            return None;
        }
        if (self.inferences + 1) % self.drop_joint_every == 0 {
            Some((self.inferences / self.drop_joint_every) as usize % self.num_joints)
        } else {
            None
        }
    }

    fn joint_centre(&self, joint: usize, t: f32, camera: CameraPosition) -> (f32, f32) {
        let angle = joint as f32 / self.num_joints as f32 * TAU + t * 0.5;
        let x = 0.5 + 0.3 * angle.cos();
        let y = 0.5 + 0.3 * angle.sin();
        match camera {
            CameraPosition::Back => (x, y),
            CameraPosition::Front => (1.0 - x, y),
        }
    }
}

impl PoseModel for SyntheticPoseModel {
    fn infer(&mut self, frame: &Frame) -> Result<HeatmapTensor> {
        let expected = frame.width * frame.height * BYTES_PER_PIXEL;
        if frame.pixels.len() != expected {
            return Err(anyhow!(
                "Pixel buffer has {} bytes, expected {} for {}x{}",
                frame.pixels.len(),
                expected,
                frame.width,
                frame.height
            ));
        }

        thread::sleep(self.inference_time);

        let t = frame.timestamp.as_secs_f32();
        let missing = self.missing_joint();
        let centres: Vec<(f32, f32)> = (0..self.num_joints)
            .map(|j| {
                let (x, y) = self.joint_centre(j, t, frame.camera);
                (x * self.heatmap_width as f32, y * self.heatmap_height as f32)
            })
            .collect();

        let scores = Array3::from_shape_fn(
            (self.num_joints, self.heatmap_height, self.heatmap_width),
            |(j, row, col)| {
                if missing == Some(j) {
                    return 0.;
                }
                let (cx, cy) = centres[j];
                let dx = col as f32 - cx;
                let dy = row as f32 - cy;
                (-(dx * dx + dy * dy) / (2. * BLOB_SIGMA * BLOB_SIGMA)).exp()
            },
        );

        self.inferences += 1;
        Ok(HeatmapTensor::new(scores))
    }
}
