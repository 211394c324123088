use std::{thread, time::Duration};

use anyhow::{anyhow, Result};
use clap::Parser;
use env_logger::Env;
use log::{debug, info};

use pose2d_keypoints::{
    backend_config::load_config_from_file,
    pipeline::spawn_pipeline,
    systems::Systems,
};

use crate::{
    cli::Cli,
    synthetic::{SyntheticCamera, SyntheticPoseModel, PIXELS_PER_CELL},
};

mod cli;
mod synthetic;

#[async_std::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger from the environment
    env_logger::Builder::from_env(Env::default().default_filter_or(&cli.log_level)).init();

    debug!("Started; args: {:?}", cli);

    if !(cli.fps > 0.) {
        return Err(anyhow!("fps must be above 0, got {}", cli.fps));
    }

    let (config, existed) = load_config_from_file(&cli.config_path)?;
    if !existed {
        config.write_config_to_file(&cli.config_path)?;
    }

    let systems = Systems::new(&config);
    let model = SyntheticPoseModel::new(
        config.num_joints(),
        cli.heatmap_width,
        cli.heatmap_height,
        Duration::from_millis(cli.inference_ms),
        cli.drop_joint_every,
    );

    let (pipeline, keypoint_frames, worker) = spawn_pipeline(model, systems);

    let frame_interval = Duration::from_secs_f32(1.0 / cli.fps);
    let frame_count = cli.frames;
    let flip_every = cli.flip_every;
    let mut camera = SyntheticCamera::new(
        cli.heatmap_width * PIXELS_PER_CELL,
        cli.heatmap_height * PIXELS_PER_CELL,
    );

    // Capture runs on its own thread, like a camera delivery callback would
    let capture = thread::spawn(move || {
        for i in 0..frame_count {
            if flip_every > 0 && i > 0 && i % flip_every == 0 {
                let position = camera.flip();
                info!("Switched to {:?} camera", position);
                pipeline.source_changed();
            }
            pipeline.on_frame(camera.capture());
            thread::sleep(frame_interval);
        }
        info!(
            "Captured {} frames: {} admitted, {} dropped",
            pipeline.frames_seen(),
            pipeline.gate().admitted_count(),
            pipeline.gate().dropped_count()
        );
        // Dropping the handle lets the worker finish
    });

    let mut emitted = 0;
    while let Ok(keypoint_frame) = keypoint_frames.recv().await {
        println!("{}", serde_json::to_string(&keypoint_frame)?);
        emitted += 1;
    }

    worker.await;
    capture
        .join()
        .map_err(|_| anyhow!("Capture thread panicked"))?;

    info!("Emitted {} keypoint frames", emitted);
    Ok(())
}
