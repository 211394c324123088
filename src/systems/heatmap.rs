use anyhow::{anyhow, Result};
use log::{debug, warn};
use ndarray::{Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::{
    tracking::{JointPredictions, PredictedPoint},
    Point2D,
};

/// Model output for one frame: one 2D grid of non-negative activation scores
/// per joint, shaped `[joints][height][width]`.
#[derive(Debug, Clone)]
pub struct HeatmapTensor {
    scores: Array3<f32>,
}

impl HeatmapTensor {
    pub fn new(scores: Array3<f32>) -> Self {
        HeatmapTensor { scores }
    }

    /// Build from a flat, row-major buffer as handed back by most inference runtimes
    pub fn from_shape_vec(
        joints: usize,
        height: usize,
        width: usize,
        data: Vec<f32>,
    ) -> Result<Self> {
        Array3::from_shape_vec((joints, height, width), data)
            .map(HeatmapTensor::new)
            .map_err(|e| {
                anyhow!(
                    "Heatmap data does not fit shape [{}][{}][{}]: {}",
                    joints,
                    height,
                    width,
                    e
                )
            })
    }

    pub fn num_joints(&self) -> usize {
        self.scores.len_of(Axis(0))
    }

    pub fn height(&self) -> usize {
        self.scores.len_of(Axis(1))
    }

    pub fn width(&self) -> usize {
        self.scores.len_of(Axis(2))
    }

    pub fn channel(&self, joint: usize) -> Option<ArrayView2<f32>> {
        if joint < self.num_joints() {
            Some(self.scores.index_axis(Axis(0), joint))
        } else {
            None
        }
    }
}

/// How a winning cell (row, col) maps into [0;1] image-relative coordinates.
/// Whichever is chosen applies to every joint in every frame.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CoordinateNormalisation {
    /// col / width, row / height
    #[default]
    CellFraction,
    /// col / (width - 1), row / (height - 1); the last cell maps to exactly 1.0
    CellIndex,
    /// (col + 0.5) / width, (row + 0.5) / height
    CellCentre,
}

impl CoordinateNormalisation {
    pub fn normalise(&self, row: usize, col: usize, height: usize, width: usize) -> Point2D {
        match self {
            CoordinateNormalisation::CellFraction => {
                (col as f32 / width as f32, row as f32 / height as f32)
            }
            CoordinateNormalisation::CellIndex => (
                col as f32 / (width.saturating_sub(1)).max(1) as f32,
                row as f32 / (height.saturating_sub(1)).max(1) as f32,
            ),
            CoordinateNormalisation::CellCentre => (
                (col as f32 + 0.5) / width as f32,
                (row as f32 + 0.5) / height as f32,
            ),
        }
    }
}

/// Stateless conversion of a heatmap tensor into one predicted point per joint
pub struct HeatmapDecoder {
    num_joints: usize,
    normalisation: CoordinateNormalisation,
}

impl HeatmapDecoder {
    pub fn new(num_joints: usize, normalisation: CoordinateNormalisation) -> Self {
        HeatmapDecoder {
            num_joints,
            normalisation,
        }
    }

    pub fn num_joints(&self) -> usize {
        self.num_joints
    }

    /// Always returns exactly `num_joints` entries. A channel that is missing,
    /// empty or has no positive score yields `None` for that joint only.
    pub fn decode(&self, tensor: &HeatmapTensor) -> JointPredictions {
        if tensor.num_joints() != self.num_joints {
            warn!(
                "Heatmap has {} channels but {} joints are tracked",
                tensor.num_joints(),
                self.num_joints
            );
        }

        (0..self.num_joints)
            .map(|joint| {
                let point = tensor
                    .channel(joint)
                    .and_then(|channel| self.decode_channel(&channel));
                if point.is_none() {
                    debug!("No peak for joint {}", joint);
                }
                point
            })
            .collect()
    }

    fn decode_channel(&self, channel: &ArrayView2<f32>) -> Option<PredictedPoint> {
        let (height, width) = channel.dim();
        if height == 0 || width == 0 {
            return None;
        }

        let mut peak: Option<((usize, usize), f32)> = None;
        for ((row, col), &score) in channel.indexed_iter() {
            if !(score.is_finite() && score > 0.) {
                continue;
            }
            // Strictly greater, so ties keep the first cell in row-major order
            if peak.map_or(true, |(_, best)| score > best) {
                peak = Some(((row, col), score));
            }
        }

        peak.map(|((row, col), score)| {
            PredictedPoint::new(
                self.normalisation.normalise(row, col, height, width),
                score,
            )
        })
    }
}
