pub mod gate;
pub mod heatmap;
pub mod labeling;
pub mod smoothing;

use heatmap::{HeatmapDecoder, HeatmapTensor};
use labeling::KeypointLabeler;
use log::{info, warn};
use smoothing::{FilterBank, SmoothSettings};

use crate::{
    backend_config::BackendConfig,
    tracking::{JointPredictions, LabeledKeypoint},
};

/// Every per-frame processing stage, owned together so that the single worker
/// handling a frame has exclusive access to all filter state.
pub struct Systems {
    pub decoder: HeatmapDecoder,
    pub filter_bank: FilterBank,
    pub labeler: KeypointLabeler,
    smoothing_disable: bool,
}

impl Systems {
    pub fn new(config: &BackendConfig) -> Systems {
        let num_joints = config.num_joints();

        let decoder = HeatmapDecoder::new(num_joints, config.coordinate_normalisation);

        let filter_bank = FilterBank::new(
            num_joints,
            SmoothSettings {
                window_limit: config.smoothing_window_limit,
                use_kalman: config.smoothing_use_kalman,
                process_noise: config.kalman_process_noise,
                measurement_noise: config.kalman_measurement_noise,
            },
        );

        if config.smoothing_disable {
            warn!("Smoothing disabled; keypoints will be raw heatmap peaks");
        } else {
            info!(
                "Smoothing {} joints over {} frames{}",
                num_joints,
                config.smoothing_window_limit,
                if config.smoothing_use_kalman {
                    ", then Kalman"
                } else {
                    ""
                }
            );
        }

        let labeler = KeypointLabeler::new(&config.joint_labels, config.empty_list_send_mode);

        Systems {
            decoder,
            filter_bank,
            labeler,
            smoothing_disable: config.smoothing_disable,
        }
    }

    /// Decode and smooth one heatmap tensor, one entry per joint
    pub fn smooth(&mut self, tensor: &HeatmapTensor) -> JointPredictions {
        let raw = self.decoder.decode(tensor);
        if self.smoothing_disable {
            raw
        } else {
            self.filter_bank.smooth_frame(&raw)
        }
    }

    /// Decode, smooth and label one heatmap tensor
    pub fn process(&mut self, tensor: &HeatmapTensor) -> Vec<LabeledKeypoint> {
        let smoothed = self.smooth(tensor);
        self.labeler.label(&smoothed)
    }

    pub fn reset(&mut self) {
        self.filter_bank.reset();
    }
}
