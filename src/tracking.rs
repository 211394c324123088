use serde::{Deserialize, Serialize};

use crate::Point2D;

/// Joint order of the Convolutional Pose Machines model: 14 keypoints, one heatmap
/// channel each.
pub const CPM_JOINT_LABELS: [&str; 14] = [
    "top",
    "neck",
    "R shoulder",
    "R elbow",
    "R wrist",
    "L shoulder",
    "L elbow",
    "L wrist",
    "R hip",
    "R knee",
    "R ankle",
    "L hip",
    "L knee",
    "L ankle",
];

/// The decoded (or smoothed) estimate for one joint in one frame.
/// Coordinates are relative to the heatmap, i.e. in the range [0;1] on both axes.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct PredictedPoint {
    pub x: f32,
    pub y: f32,
    pub confidence: f32,
}

impl PredictedPoint {
    pub fn new(position: Point2D, confidence: f32) -> Self {
        PredictedPoint {
            x: position.0,
            y: position.1,
            confidence,
        }
    }

    pub fn position(&self) -> Point2D {
        (self.x, self.y)
    }
}

/// One entry per joint, in joint-index order. `None` means "no detection for this
/// joint in this frame".
pub type JointPredictions = Vec<Option<PredictedPoint>>;

/// A joint as presented downstream: its name plus display-formatted values.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LabeledKeypoint {
    pub label: String,
    /// Formatted as "(x, y)" with 3 decimals
    pub position: String,
    /// Formatted with 2 decimals
    pub confidence: String,
}

impl LabeledKeypoint {
    pub fn new(label: &str, point: &PredictedPoint) -> Self {
        LabeledKeypoint {
            label: String::from(label),
            position: format!("({:.3}, {:.3})", point.x, point.y),
            confidence: format!("{:.2}", point.confidence),
        }
    }

    /// Recover a point from the formatted strings, as an overlay renderer would.
    /// Precision is limited to what was formatted.
    pub fn predicted_point(&self) -> Option<PredictedPoint> {
        let coordinates: Vec<f32> = self
            .position
            .trim()
            .trim_start_matches('(')
            .trim_end_matches(')')
            .split(',')
            .map(|s| s.trim().parse::<f32>())
            .collect::<Result<_, _>>()
            .ok()?;

        if let [x, y] = coordinates.as_slice() {
            let confidence = self.confidence.trim().parse::<f32>().ok()?;
            Some(PredictedPoint::new((*x, *y), confidence))
        } else {
            None
        }
    }
}

/// Everything emitted downstream for one admitted-and-completed frame
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct KeypointFrame {
    pub frame_index: u64,
    pub timestamp_us: u64,
    pub keypoints: Vec<LabeledKeypoint>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labeled_keypoint_formatting() {
        let kp = LabeledKeypoint::new("neck", &PredictedPoint::new((0.5, 0.12345), 2.456));
        assert_eq!(kp.label, "neck");
        assert_eq!(kp.position, "(0.500, 0.123)");
        assert_eq!(kp.confidence, "2.46");
    }

    #[test]
    fn test_predicted_point_from_formatted() {
        let kp = LabeledKeypoint::new("top", &PredictedPoint::new((0.25, 0.75), 0.9));
        assert_eq!(
            kp.predicted_point(),
            Some(PredictedPoint::new((0.25, 0.75), 0.9))
        );
    }

    #[test]
    fn test_predicted_point_from_malformed() {
        let missing_y = LabeledKeypoint {
            label: String::from("top"),
            position: String::from("(0.250)"),
            confidence: String::from("0.90"),
        };
        assert_eq!(missing_y.predicted_point(), None);

        let bad_confidence = LabeledKeypoint {
            label: String::from("top"),
            position: String::from("(0.250, 0.500)"),
            confidence: String::from("high"),
        };
        assert_eq!(bad_confidence.predicted_point(), None);
    }

    #[test]
    fn test_keypoint_frame_json() {
        let frame = KeypointFrame {
            frame_index: 3,
            timestamp_us: 100_000,
            keypoints: vec![LabeledKeypoint::new(
                "top",
                &PredictedPoint::new((0., 1.0), 0.5),
            )],
        };
        let text = serde_json::to_string(&frame).unwrap();
        assert!(text.contains("\"frameIndex\":3"));
        assert!(text.contains("\"timestampUs\":100000"));
        assert!(text.contains("\"position\":\"(0.000, 1.000)\""));
    }
}
