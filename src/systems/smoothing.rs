use std::collections::VecDeque;

use log::debug;

use crate::{
    geometry_utils::centroid,
    tracking::{JointPredictions, PredictedPoint},
    Point2D,
};

pub const DEFAULT_WINDOW_LIMIT: usize = 3;
pub const DEFAULT_PROCESS_NOISE: f32 = 0.1;
pub const DEFAULT_MEASUREMENT_NOISE: f32 = 0.1;

const KALMAN_INITIAL_ESTIMATE: f32 = 0.;
const KALMAN_INITIAL_COVARIANCE: f32 = 1.;

#[derive(Debug, Clone, Copy)]
pub struct SmoothSettings {
    /// How many recent frames the moving average spans (must be above 0)
    pub window_limit: usize,
    /// Chain a per-axis Kalman pass after the moving average
    pub use_kalman: bool,
    pub process_noise: f32,
    pub measurement_noise: f32,
}

impl Default for SmoothSettings {
    fn default() -> Self {
        SmoothSettings {
            window_limit: DEFAULT_WINDOW_LIMIT,
            use_kalman: true,
            process_noise: DEFAULT_PROCESS_NOISE,
            measurement_noise: DEFAULT_MEASUREMENT_NOISE,
        }
    }
}

/// Fixed-size FIFO window over one joint's recent predictions. Absent entries
/// still take up a slot, but do not contribute to the average.
#[derive(Debug, Clone)]
pub struct MovingAverageFilter {
    elements: VecDeque<Option<PredictedPoint>>,
    limit: usize,
}

impl MovingAverageFilter {
    pub fn new(limit: usize) -> Self {
        if limit == 0 {
            panic!("Moving average window limit must be above 0");
        }
        MovingAverageFilter {
            elements: VecDeque::with_capacity(limit + 1),
            limit,
        }
    }

    pub fn add(&mut self, element: Option<PredictedPoint>) {
        self.elements.push_back(element);
        while self.elements.len() > self.limit {
            self.elements.pop_front();
        }
    }

    /// Mean position and **summed** confidence over the present entries in the
    /// window
    pub fn averaged_value(&self) -> Option<PredictedPoint> {
        let present: Vec<&PredictedPoint> = self.elements.iter().flatten().collect();
        let positions: Vec<Point2D> = present.iter().map(|p| p.position()).collect();
        let position = centroid(&positions)?;
        let confidence = present.iter().map(|p| p.confidence).sum();
        Some(PredictedPoint::new(position, confidence))
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn clear(&mut self) {
        self.elements.clear();
    }
}

/// Scalar random-walk Kalman filter, one per coordinate axis per joint
#[derive(Debug, Clone, Copy)]
pub struct KalmanFilter {
    /// State estimate
    x: f32,
    /// Estimate error covariance
    p: f32,
    /// Process noise
    q: f32,
    /// Measurement noise
    r: f32,
}

impl KalmanFilter {
    pub fn new(process_noise: f32, measurement_noise: f32) -> Self {
        KalmanFilter {
            x: KALMAN_INITIAL_ESTIMATE,
            p: KALMAN_INITIAL_COVARIANCE,
            q: process_noise,
            r: measurement_noise,
        }
    }

    pub fn update(&mut self, measurement: f32) -> f32 {
        let p_predict = self.p + self.q;
        let k = p_predict / (p_predict + self.r);
        self.x += k * (measurement - self.x);
        self.p = (1. - k) * p_predict;
        self.x
    }

    pub fn estimate(&self) -> f32 {
        self.x
    }

    pub fn reset(&mut self) {
        self.x = KALMAN_INITIAL_ESTIMATE;
        self.p = KALMAN_INITIAL_COVARIANCE;
    }
}

impl Default for KalmanFilter {
    fn default() -> Self {
        KalmanFilter::new(DEFAULT_PROCESS_NOISE, DEFAULT_MEASUREMENT_NOISE)
    }
}

#[derive(Debug, Clone)]
pub struct JointFilterState {
    moving_average: MovingAverageFilter,
    kalman_x: KalmanFilter,
    kalman_y: KalmanFilter,
}

impl JointFilterState {
    pub fn new(settings: &SmoothSettings) -> Self {
        JointFilterState {
            moving_average: MovingAverageFilter::new(settings.window_limit),
            kalman_x: KalmanFilter::new(settings.process_noise, settings.measurement_noise),
            kalman_y: KalmanFilter::new(settings.process_noise, settings.measurement_noise),
        }
    }

    /// If the window holds nothing to average, the raw point passes through
    /// unchanged (and the Kalman state is left alone).
    fn smooth(
        &mut self,
        point: Option<PredictedPoint>,
        use_kalman: bool,
    ) -> Option<PredictedPoint> {
        self.moving_average.add(point);
        match self.moving_average.averaged_value() {
            Some(averaged) if use_kalman => Some(PredictedPoint::new(
                (
                    self.kalman_x.update(averaged.x),
                    self.kalman_y.update(averaged.y),
                ),
                averaged.confidence,
            )),
            Some(averaged) => Some(averaged),
            None => point,
        }
    }

    fn reset(&mut self) {
        self.moving_average.clear();
        self.kalman_x.reset();
        self.kalman_y.reset();
    }
}

/// Owns the filter state for every tracked joint. Sized once, at construction.
pub struct FilterBank {
    settings: SmoothSettings,
    joints: Vec<JointFilterState>,
}

impl FilterBank {
    pub fn new(num_joints: usize, settings: SmoothSettings) -> Self {
        if settings.window_limit == 0 {
            panic!("Moving average window limit must be above 0");
        }
        FilterBank {
            joints: (0..num_joints)
                .map(|_| JointFilterState::new(&settings))
                .collect(),
            settings,
        }
    }

    pub fn num_joints(&self) -> usize {
        self.joints.len()
    }

    /// Smooth one frame's predictions; returns exactly one entry per joint
    pub fn smooth_frame(&mut self, points: &[Option<PredictedPoint>]) -> JointPredictions {
        debug_assert_eq!(
            points.len(),
            self.joints.len(),
            "one prediction per joint expected"
        );
        let use_kalman = self.settings.use_kalman;
        self.joints
            .iter_mut()
            .enumerate()
            .map(|(i, joint)| joint.smooth(points.get(i).copied().flatten(), use_kalman))
            .collect()
    }

    /// Forget all history, e.g. after the camera source flips; otherwise the
    /// filters would smooth across the coordinate jump.
    pub fn reset(&mut self) {
        debug!("Reset filter state for {} joints", self.joints.len());
        for joint in self.joints.iter_mut() {
            joint.reset();
        }
    }
}
