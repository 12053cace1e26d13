// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for pipeline operations
//!
//! This module provides command-line functionality for:
//! - Listing available cameras
//! - Dry-running preview size negotiation
//! - Running the pipeline headless and exporting the presented screen

use chrono::Local;
use edgecam::Config;
use edgecam::backends::camera::{DisplayMetrics, SensorRotation, Size, create_driver, find_rear_camera};
use edgecam::errors::AppResult;
use edgecam::gpu::{GpuContext, WgpuContext};
use edgecam::pipeline::{
    NegotiationRequest, PipelineEvent, PipelineHandle, RendererStatus, select_preview_size,
};
use edgecam::processor::{CpuProcessor, FrameProcessor, PassthroughProcessor, binarize_luminance};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Default folder name for saved snapshots
const DEFAULT_SAVE_FOLDER: &str = "edgecam";

/// Longest a headless run waits for frames before giving up
const RUN_TIMEOUT: Duration = Duration::from_secs(30);

/// Start a pipeline rendering into a headless wgpu screen
pub fn start_pipeline(
    config: &Config,
    display: DisplayMetrics,
    passthrough: bool,
) -> AppResult<PipelineHandle> {
    let driver = create_driver(config.backend, config.synthetic_fps)?;
    let processor: Box<dyn FrameProcessor> = if passthrough {
        Box::new(PassthroughProcessor)
    } else {
        Box::new(CpuProcessor::new(binarize_luminance))
    };
    PipelineHandle::spawn(
        config.pipeline_options(display),
        driver,
        |size| Ok(Box::new(WgpuContext::new(size)?) as Box<dyn GpuContext>),
        processor,
    )
}

/// List all available cameras
pub fn list_cameras(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let driver = create_driver(config.backend, config.synthetic_fps)?;
    let ids = driver.camera_ids()?;

    if ids.is_empty() {
        println!("No cameras found ({} backend).", driver.name());
        return Ok(());
    }

    let rear = find_rear_camera(driver.as_ref())?.map(|c| c.id);

    println!("Available cameras ({} backend):", driver.name());
    println!();
    for id in &ids {
        let camera = driver.characteristics(id)?;
        let marker = if rear.as_deref() == Some(id.as_str()) {
            " (preview)"
        } else {
            ""
        };
        println!("  [{}] {}{}", camera.id, camera.name, marker);
        println!(
            "      Facing: {}, sensor: {}, flash: {}",
            camera.lens_facing,
            camera.sensor_orientation,
            if camera.flash_available { "yes" } else { "no" }
        );

        let mut sizes = camera.output_sizes.clone();
        sizes.sort_by_key(|s| std::cmp::Reverse(s.area()));
        if !sizes.is_empty() {
            // Show top 3 sizes
            let size_strs: Vec<String> = sizes.iter().take(3).map(|s| s.to_string()).collect();
            println!("      Sizes: {}", size_strs.join(", "));
        }
        println!();
    }

    Ok(())
}

/// Print the preview size negotiation would pick for a surface
pub fn negotiate(
    config: &Config,
    surface: Size,
    display: Option<Size>,
    rotation: i32,
) -> Result<(), Box<dyn std::error::Error>> {
    let driver = create_driver(config.backend, config.synthetic_fps)?;
    let camera = find_rear_camera(driver.as_ref())?.ok_or("No rear-facing camera found")?;

    let display = DisplayMetrics::new(
        display.unwrap_or(surface),
        SensorRotation::from_degrees_int(rotation),
    );
    let request = NegotiationRequest::new(surface, display, camera.sensor_orientation)
        .with_max_size(config.max_preview())
        .with_tolerance(config.aspect_tolerance);

    println!("Camera: {} ({})", camera.name, camera.id);
    println!("Surface: {}  display: {} @ {}", surface, display.size, display.rotation);
    println!("Cap: {}", request.effective_cap());

    match select_preview_size(&request, &camera.output_sizes) {
        Some(negotiated) => {
            println!("Oriented target: {}", negotiated.oriented_target);
            println!(
                "Preview: {}{}",
                negotiated.preview,
                if negotiated.aspect_matched {
                    ""
                } else {
                    " (no size matched the aspect ratio)"
                }
            );
            Ok(())
        }
        None => Err("No preview size fits".into()),
    }
}

/// Run the pipeline for `frames` processed frames and print a summary
pub fn run_headless(
    config: &Config,
    surface: Size,
    frames: u64,
    output: Option<PathBuf>,
    passthrough: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let display = DisplayMetrics::new(surface, SensorRotation::None);
    let handle = start_pipeline(config, display, passthrough)?;

    println!("Backend: {}", config.backend);
    println!("Surface: {}", surface);
    println!("Running... (press Ctrl+C to stop early)");

    // Set up Ctrl+C handler
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = stop_flag.clone();
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;

    handle.surface_created(surface);

    let start = Instant::now();
    let mut failure: Option<String> = None;
    let mut status = handle.status()?;

    while status.dispatch.processed < frames && start.elapsed() < RUN_TIMEOUT {
        if stop_flag.load(Ordering::SeqCst) {
            println!();
            println!("Stopping early...");
            break;
        }

        while let Some(event) = handle.try_event() {
            match event {
                PipelineEvent::Started { preview } => println!("Started, preview {}", preview),
                PipelineEvent::Stopped => println!("Stopped"),
                PipelineEvent::Error { category, message } => {
                    println!("Error ({:?}): {}", category, message);
                    failure = Some(message);
                }
            }
        }
        if failure.is_some() && !status.started {
            break;
        }

        print!("\rFrames: {}/{}", status.dispatch.processed, frames);
        std::io::Write::flush(&mut std::io::stdout())?;

        std::thread::sleep(Duration::from_millis(50));
        status = handle.status()?;
    }
    println!();

    if let Some(path) = output.map(resolve_output_path).transpose()? {
        let snapshot = handle.snapshot()?;
        snapshot.save_png(&path)?;
        println!("Snapshot saved: {}", path.display());
    }

    print_summary(&status, start.elapsed());
    handle.shutdown();

    match failure {
        Some(message) if status.dispatch.processed == 0 => Err(message.into()),
        _ => Ok(()),
    }
}

fn print_summary(status: &RendererStatus, elapsed: Duration) {
    println!();
    println!("Summary");
    println!("=======");
    if let Some(preview) = status.preview {
        println!("Preview size: {}", preview);
    }
    println!("Camera state: {}", status.session.state);
    println!("Frames latched: {}", status.dispatch.frames_latched);
    println!("Frames processed: {}", status.dispatch.processed);
    println!("Frames dropped (busy): {}", status.dispatch.dropped);
    println!(
        "Processing: {:.2} ms avg, {:.1} fps",
        status.average_processing.as_secs_f64() * 1000.0,
        status.processing_fps
    );
    println!("Elapsed: {:.2}s", elapsed.as_secs_f64());
}

/// A directory gets a timestamped file name; parent directories are created
fn resolve_output_path(path: PathBuf) -> std::io::Result<PathBuf> {
    let path = if path.is_dir() {
        path.join(snapshot_file_name())
    } else {
        path
    };
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    Ok(path)
}

/// Timestamped PNG file name for a snapshot
pub fn snapshot_file_name() -> String {
    format!("edgecam_{}.png", Local::now().format("%Y%m%d_%H%M%S"))
}

/// Get default snapshot directory
pub fn default_snapshot_dir() -> PathBuf {
    dirs::picture_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join(DEFAULT_SAVE_FOLDER)
}
