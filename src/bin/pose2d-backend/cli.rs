use clap::{command, Parser};

// Some defaults; some of which can be overriden via CLI args
const CONFIG_FILE_PATH: &str = "./pose2d.json";

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Where to load the keypoint pipeline config; created with defaults if missing
    #[arg(long="configPath",default_value_t=String::from(CONFIG_FILE_PATH))]
    pub config_path: String,

    #[arg(long = "loglevel",default_value_t=String::from("info"))]
    pub log_level: String,

    /// How many synthetic camera frames to capture before shutting down
    #[arg(long = "frames", default_value_t = 300)]
    pub frames: u64,

    /// Synthetic camera frame rate
    #[arg(long = "fps", default_value_t = 30.0)]
    pub fps: f32,

    /// How long the synthetic model takes per frame, in ms
    #[arg(long = "inferenceMs", default_value_t = 50)]
    pub inference_ms: u64,

    #[arg(long = "heatmapWidth", default_value_t = 46)]
    pub heatmap_width: usize,

    #[arg(long = "heatmapHeight", default_value_t = 46)]
    pub heatmap_height: usize,

    /// Switch between back and front camera every N frames (0 = never)
    #[arg(long = "flipEvery", default_value_t = 90)]
    pub flip_every: u64,

    /// Blank out one joint's heatmap every N inferences (0 = never)
    #[arg(long = "dropJointEvery", default_value_t = 25)]
    pub drop_joint_every: u64,
}
