use serde::{Deserialize, Serialize};

use crate::tracking::{LabeledKeypoint, PredictedPoint};

/// How to treat empty keypoint lists (no joint detected, or right after a
/// reset) - either send an empty list "once", "never" or "always"
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyListSendMode {
    Never,
    Once,
    Always,
}

/// Attaches joint names to predictions. Joints without a prediction are
/// omitted from the output rather than sent as placeholders.
pub struct KeypointLabeler {
    labels: Vec<String>,
    empty_list_send_mode: EmptyListSendMode,
    empty_lists_sent: u128,
}

impl KeypointLabeler {
    pub fn new(labels: &[String], empty_list_send_mode: EmptyListSendMode) -> Self {
        KeypointLabeler {
            labels: Vec::from(labels),
            empty_list_send_mode,
            empty_lists_sent: 0,
        }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn label(&self, points: &[Option<PredictedPoint>]) -> Vec<LabeledKeypoint> {
        self.labels
            .iter()
            .zip(points.iter())
            .filter_map(|(label, point)| point.as_ref().map(|p| LabeledKeypoint::new(label, p)))
            .collect()
    }

    /// Decide whether this list goes downstream at all, according to the
    /// EmptyListSendMode; non-empty lists always do.
    pub fn should_send(&mut self, keypoints: &[LabeledKeypoint]) -> bool {
        let send = match self.empty_list_send_mode {
            EmptyListSendMode::Always => true,
            EmptyListSendMode::Once => !keypoints.is_empty() || self.empty_lists_sent < 1,
            EmptyListSendMode::Never => !keypoints.is_empty(),
        };

        if keypoints.is_empty() {
            self.empty_lists_sent += 1; // count
        } else {
            self.empty_lists_sent = 0; // reset
        }

        send
    }
}
