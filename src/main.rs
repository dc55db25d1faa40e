use anyhow::Context;
use clap::Parser;
use colored::*;
use tracing::info;
use tracing_subscriber::EnvFilter;

use live_face_mesh::args::Args;
use live_face_mesh::camera::{list_cameras, CameraSource};
use live_face_mesh::config::{AppConfig, PipelineConfig};
use live_face_mesh::inference::{InferenceAdapter, OnnxFaceMesh};
use live_face_mesh::output::WindowOutput;
use live_face_mesh::pipeline::PipelineController;
use live_face_mesh::segmentation::{ForegroundSegmenter, OnnxSelfieSegmenter};
use live_face_mesh::topology::MeshTopology;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    if args.list {
        let cameras = list_cameras()?;
        println!("{}", "Available Cameras:".bold());
        println!("{:<5} | {:<30} | {:<10}", "Index", "Name", "Misc");
        println!("{}", "-".repeat(60));
        for cam in cameras {
            println!("{:<5} | {:<30} | {:?}", cam.index(), cam.human_name(), cam.misc());
        }
        return Ok(());
    }

    // 0. Config
    let config = AppConfig::load_from(&args.config)?;
    let pipeline_config = PipelineConfig::from_args(&args)?;

    // 1. Models, loaded once and owned by the adapter
    let settings = config.inference.landmarker_settings();
    let landmarker = OnnxFaceMesh::new(
        &config.models.face_mesh_path,
        &config.models.face_detection_path,
        settings,
    )
    .context("Failed to load face mesh models")?;
    let segmenter: Option<Box<dyn ForegroundSegmenter>> = if pipeline_config.segmentation_enabled() {
        let s = OnnxSelfieSegmenter::new(&config.models.segmentation_path, settings.intra_threads)
            .context("Failed to load segmentation model")?;
        Some(Box::new(s))
    } else {
        None
    };
    let inference = InferenceAdapter::new(Box::new(landmarker), segmenter);

    // 2. Camera and window
    let camera = CameraSource::new(args.cam_index);
    let mirror = config.display.mirror && !args.no_mirror;
    let window = WindowOutput::new(&config.display.window_title, mirror);

    // 3. Loop
    let mut controller = PipelineController::new(pipeline_config, camera, inference, window)?;
    if let Some(path) = &config.mesh.tessellation_path {
        let topology = MeshTopology::from_tessellation_file(path)?;
        info!(edges = topology.tessellation.len(), "Loaded tessellation from {path}");
        controller = controller.with_topology(topology);
    }

    info!("Press Esc in the window to quit");
    controller.run()?;

    let landmarks = controller.get_landmarks_list();
    eprintln!(
        "{}",
        format!("Final snapshot: {} landmarks", landmarks.len()).green()
    );
    println!("{}", serde_json::to_string(&landmarks)?);
    Ok(())
}
