use std::{fs, io::ErrorKind};

use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    systems::{heatmap::CoordinateNormalisation, labeling::EmptyListSendMode, smoothing},
    tracking::CPM_JOINT_LABELS,
};

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct BackendConfig {
    /// One name per joint, in heatmap channel order. The number of entries is the
    /// number of tracked joints.
    pub joint_labels: Vec<String>,

    /// How a heatmap cell (row, col) is mapped into [0;1] coordinates
    pub coordinate_normalisation: CoordinateNormalisation,

    // -------- SMOOTHING SETTINGS
    /// Flag to disable smoothing entirely; keypoints are then the raw heatmap peaks
    pub smoothing_disable: bool,

    /// How many recent frames the per-joint moving average covers (must be above 0)
    pub smoothing_window_limit: usize,

    /// Run a per-axis Kalman filter on the moving average output
    pub smoothing_use_kalman: bool,

    pub kalman_process_noise: f32,
    pub kalman_measurement_noise: f32,

    /// How to treat empty keypoint lists - either send an empty list "once",
    /// "never" or "always"
    pub empty_list_send_mode: EmptyListSendMode,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            joint_labels: CPM_JOINT_LABELS.iter().map(|s| String::from(*s)).collect(),
            coordinate_normalisation: CoordinateNormalisation::CellFraction,
            smoothing_disable: false,
            smoothing_window_limit: smoothing::DEFAULT_WINDOW_LIMIT,
            smoothing_use_kalman: true,
            kalman_process_noise: smoothing::DEFAULT_PROCESS_NOISE,
            kalman_measurement_noise: smoothing::DEFAULT_MEASUREMENT_NOISE,
            empty_list_send_mode: EmptyListSendMode::Always,
        }
    }
}

impl BackendConfig {
    pub fn num_joints(&self) -> usize {
        self.joint_labels.len()
    }

    /// Reject settings that would otherwise only fail later, when the filters
    /// are constructed
    pub fn validate(&self) -> Result<()> {
        if self.joint_labels.is_empty() {
            return Err(anyhow!("At least one joint label is required"));
        }
        if self.smoothing_window_limit == 0 {
            return Err(anyhow!("smoothingWindowLimit must be above 0"));
        }
        if !(self.kalman_process_noise > 0. && self.kalman_measurement_noise > 0.) {
            return Err(anyhow!(
                "Kalman noise constants must be above 0 (process {}, measurement {})",
                self.kalman_process_noise,
                self.kalman_measurement_noise
            ));
        }
        Ok(())
    }

    pub fn parse(text: &str) -> Result<BackendConfig> {
        let config = serde_json::from_str::<BackendConfig>(text)
            .map_err(|e| anyhow!("Failed to parse config data: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn write_config_to_file(&self, config_file_path: &str) -> Result<()> {
        debug!("Current state of config: {:?}", self);
        let text = serde_json::to_string_pretty(self)?;
        fs::write(config_file_path, text)
            .map_err(|e| anyhow!("Error writing config to {}: {}", config_file_path, e))?;
        info!("Wrote config to file: {:?}", config_file_path);
        Ok(())
    }
}

/// Load config from disk; a missing file is not an error, defaults are used
/// instead. Returns whether the file existed.
pub fn load_config_from_file(config_file_path: &str) -> Result<(BackendConfig, bool)> {
    match fs::read_to_string(config_file_path) {
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!(
                "Config file not found, will use defaults and create one at {}",
                &config_file_path
            );
            Ok((BackendConfig::default(), false))
        }
        Err(e) => Err(anyhow!(
            "Failed to load config from {}: {}",
            config_file_path,
            e
        )),
        Ok(s) => {
            info!("Loaded config OK from \"{}\"", config_file_path);
            let loaded_config = BackendConfig::parse(&s)?;
            debug!("Config parsed data from file: {:?}", &loaded_config);
            Ok((loaded_config, true))
        }
    }
}
