// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the per-frame dispatch: latch, blit, process,
//! present

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use common::{FakeDriver, FakeGpu, Harness};
use edgecam::backends::camera::Size;
use edgecam::errors::{ErrorCategory, RenderError};
use edgecam::gpu::{FramebufferStatus, GpuContext, RenderTarget};
use edgecam::pipeline::{DrawOutcome, PipelineEvent};
use edgecam::processor::{FnProcessor, FrameProcessor, PassthroughProcessor, ProcessorFrame};

const SCREEN: Size = Size::new(1280, 720);

fn started_harness(processor: Box<dyn FrameProcessor>) -> Harness {
    let mut harness = Harness::new(FakeDriver::with_rear_camera(), SCREEN, processor);
    harness.renderer.surface_created(SCREEN);
    harness.settle();
    harness.events();
    harness
}

/// Processor recording every call, copying input to output
fn recording_processor(calls: Arc<Mutex<Vec<ProcessorFrame>>>) -> Box<dyn FrameProcessor> {
    Box::new(FnProcessor(
        move |gpu: &mut dyn GpuContext, frame: &ProcessorFrame| {
            calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(*frame);
            gpu.copy_texture(frame.input, frame.output)
        },
    ))
}

#[test]
fn test_frame_is_latched_processed_and_presented() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let processor = recording_processor(Arc::clone(&calls));
    let mut harness = started_harness(processor);

    let redraws_before = harness.redraws.load(Ordering::SeqCst);
    assert!(harness.push_frame([200, 100, 50, 255], 1));
    assert!(harness.renderer.signals().flags().update_pending);
    assert!(harness.redraws.load(Ordering::SeqCst) > redraws_before);

    let uploads_before = harness.gpu.state().uploads;
    assert_eq!(harness.renderer.draw(), DrawOutcome::Processed);
    assert!(!harness.renderer.signals().flags().update_pending);
    assert!(harness.gpu.state().uploads > uploads_before);

    let resources = harness.renderer.resources().unwrap();
    let fbo = *resources.fbo().unwrap();
    let calls = calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].input, fbo.intermediate);
    assert_eq!(calls[0].output, fbo.draw_target);
    assert_eq!(calls[0].size, fbo.size);
    assert_eq!(calls[0].threshold, 80);

    let state = harness.gpu.state();
    // Screen cleared, camera blitted into the stage, draw target presented
    assert!(state.clears.contains(&RenderTarget::Screen));
    let camera_draw = state
        .draws
        .iter()
        .find(|d| d.target == RenderTarget::Framebuffer(fbo.framebuffer))
        .unwrap();
    assert_eq!(camera_draw.texture, resources.camera_texture());
    assert_eq!(camera_draw.viewport.width, fbo.size.width);
    let present = state.draws.last().unwrap();
    assert_eq!(present.target, RenderTarget::Screen);
    assert_eq!(present.texture, fbo.draw_target);
    assert_eq!(present.viewport.width, SCREEN.width);
    assert_eq!(present.viewport.height, SCREEN.height);
}

#[test]
fn test_draw_without_new_frame_reuses_camera_texture() {
    let mut harness = started_harness(Box::new(PassthroughProcessor));
    harness.push_frame([1, 2, 3, 255], 1);
    harness.renderer.draw();

    let latched = harness.renderer.dispatcher().stats().frames_latched;
    assert_eq!(harness.renderer.draw(), DrawOutcome::Processed);
    assert_eq!(harness.renderer.dispatcher().stats().frames_latched, latched);
}

#[test]
fn test_busy_processor_presents_previous_output() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut harness = started_harness(recording_processor(Arc::clone(&calls)));
    harness.push_frame([10, 10, 10, 255], 1);
    assert_eq!(harness.renderer.draw(), DrawOutcome::Processed);

    let busy = harness.renderer.dispatcher().busy_flag();
    let guard = busy.try_acquire().unwrap();
    harness.push_frame([20, 20, 20, 255], 2);
    assert_eq!(harness.renderer.draw(), DrawOutcome::Dropped);
    drop(guard);

    assert_eq!(calls.lock().unwrap().len(), 1, "processor skipped while busy");
    let draw_target = harness
        .renderer
        .resources()
        .unwrap()
        .fbo()
        .unwrap()
        .draw_target;
    let presents = harness.gpu.screen_draws();
    assert_eq!(presents.len(), 2);
    assert!(presents.iter().all(|d| d.texture == draw_target));
    assert_eq!(harness.renderer.dispatcher().stats().dropped, 1);

    assert_eq!(harness.renderer.draw(), DrawOutcome::Processed);
}

#[test]
fn test_threshold_is_clamped_per_frame() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut harness = started_harness(recording_processor(Arc::clone(&calls)));

    harness.threshold.store(500, Ordering::Relaxed);
    harness.renderer.draw();
    harness.threshold.store(-7, Ordering::Relaxed);
    harness.renderer.draw();

    let thresholds: Vec<i32> = calls.lock().unwrap().iter().map(|f| f.threshold).collect();
    assert_eq!(thresholds, vec![255, 0]);
}

#[test]
fn test_draw_before_start_is_skipped() {
    let mut harness = Harness::new(
        FakeDriver::with_rear_camera(),
        SCREEN,
        Box::new(PassthroughProcessor),
    );
    assert_eq!(harness.renderer.draw(), DrawOutcome::Skipped);
    assert!(harness.gpu.state().draws.is_empty());
}

#[test]
fn test_processor_error_is_reported() {
    let processor = Box::new(FnProcessor(
        |_: &mut dyn GpuContext, _: &ProcessorFrame| -> edgecam::errors::RenderResult<()> {
            Err(RenderError::Device("processor exploded".to_string()))
        },
    ));
    let mut harness = started_harness(processor);

    assert_eq!(harness.renderer.draw(), DrawOutcome::Skipped);
    assert!(harness.events().iter().any(|e| matches!(
        e,
        PipelineEvent::Error {
            category: ErrorCategory::Render,
            ..
        }
    )));
    // The busy flag is free again
    assert!(!harness.renderer.dispatcher().busy_flag().is_busy());
}

#[test]
fn test_processor_error_presents_previous_output() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let processor = Box::new(FnProcessor(
        move |gpu: &mut dyn GpuContext, frame: &ProcessorFrame| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                gpu.copy_texture(frame.input, frame.output)
            } else {
                Err(RenderError::Device("processor exploded".to_string()))
            }
        },
    ));
    let mut harness = started_harness(processor);
    harness.push_frame([30, 60, 90, 255], 1);
    assert_eq!(harness.renderer.draw(), DrawOutcome::Processed);

    let skipped_before = harness.renderer.dispatcher().stats().skipped;
    harness.push_frame([90, 60, 30, 255], 2);
    assert_eq!(harness.renderer.draw(), DrawOutcome::Skipped);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let stats = harness.renderer.dispatcher().stats();
    assert_eq!(stats.skipped, skipped_before + 1);
    assert_eq!(stats.processed, 1);

    let draw_target = harness
        .renderer
        .resources()
        .unwrap()
        .fbo()
        .unwrap()
        .draw_target;
    let presents = harness.gpu.screen_draws();
    assert_eq!(presents.len(), 2);
    assert!(presents.iter().all(|d| d.texture == draw_target));
    assert_eq!(
        harness
            .events()
            .iter()
            .filter(|e| matches!(e, PipelineEvent::Error { .. }))
            .count(),
        1
    );
}

#[test]
fn test_incomplete_framebuffer_blocks_drawing() {
    let driver = Arc::new(FakeDriver::with_rear_camera());
    let gpu = FakeGpu::new(SCREEN);
    gpu.state().forced_status = Some(FramebufferStatus::ZeroSized);
    let mut harness = Harness::build(driver, gpu, SCREEN, Box::new(PassthroughProcessor)).unwrap();

    harness.renderer.surface_created(SCREEN);
    harness.settle();

    assert!(!harness.renderer.signals().flags().fbo_ready);
    assert!(harness.events().iter().any(|e| matches!(
        e,
        PipelineEvent::Error {
            category: ErrorCategory::Negotiation,
            ..
        }
    )));
    assert_eq!(harness.renderer.draw(), DrawOutcome::Skipped);
    assert_eq!(harness.gpu.state().framebuffers.len(), 0);
}

#[test]
fn test_incomplete_framebuffer_retried_on_resize() {
    let driver = Arc::new(FakeDriver::with_rear_camera());
    let gpu = FakeGpu::new(SCREEN);
    gpu.state().forced_status = Some(FramebufferStatus::ZeroSized);
    let mut harness = Harness::build(driver, gpu, SCREEN, Box::new(PassthroughProcessor)).unwrap();

    harness.renderer.surface_created(SCREEN);
    harness.settle();
    assert!(!harness.renderer.signals().flags().fbo_ready);
    harness.events();

    harness.gpu.state().forced_status = None;
    harness.renderer.surface_changed(SCREEN);
    harness.settle();

    assert!(harness.renderer.signals().flags().fbo_ready);
    assert!(
        harness
            .events()
            .iter()
            .any(|e| matches!(e, PipelineEvent::Started { .. }))
    );
    assert_eq!(harness.gpu.state().framebuffers.len(), 1);
}

#[test]
fn test_no_leaks_across_restarts() {
    let processed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&processed);
    let processor = Box::new(FnProcessor(
        move |gpu: &mut dyn GpuContext, frame: &ProcessorFrame| {
            counter.fetch_add(1, Ordering::SeqCst);
            gpu.copy_texture(frame.input, frame.output)
        },
    ));
    let mut harness = started_harness(processor);
    let baseline = harness.gpu.resource_counts();

    for i in 0..10u64 {
        harness.renderer.set_visible(false);
        harness.renderer.surface_changed(SCREEN);
        harness.renderer.set_visible(true);
        harness.settle();
        harness.push_frame([i as u8, 0, 0, 255], i);
        assert_eq!(harness.renderer.draw(), DrawOutcome::Processed);
    }

    assert_eq!(harness.gpu.resource_counts(), baseline);
    assert_eq!(processed.load(Ordering::SeqCst), 10);
}

#[test]
fn test_shutdown_releases_everything() {
    let harness = started_harness(Box::new(PassthroughProcessor));
    let gpu = harness.gpu.clone();
    let Harness {
        renderer,
        camera_thread: _camera_thread,
        ..
    } = harness;

    renderer.shutdown();

    let counts = gpu.resource_counts();
    assert_eq!(counts.textures, 0);
    assert_eq!(counts.framebuffers, 0);
    assert_eq!(counts.programs, 0);
}

#[test]
fn test_shader_failure_is_fatal_and_clean() {
    let gpu = FakeGpu::new(SCREEN);
    gpu.fail_program("texture_2d");
    let result = Harness::build(
        Arc::new(FakeDriver::with_rear_camera()),
        gpu.clone(),
        SCREEN,
        Box::new(PassthroughProcessor),
    );

    assert!(matches!(result, Err(RenderError::ShaderCompile { .. })));
    assert_eq!(gpu.resource_counts().programs, 0);
}

#[test]
fn test_screen_snapshot_matches_screen_size() {
    let mut harness = started_harness(Box::new(PassthroughProcessor));
    let snapshot = harness.renderer.screen_snapshot().unwrap();
    assert_eq!(snapshot.size, SCREEN);
    assert_eq!(snapshot.rgba.len(), SCREEN.rgba_len());
    assert!(snapshot.to_image().is_some());
}

#[test]
fn test_status_reflects_pipeline() {
    let harness = started_harness(Box::new(PassthroughProcessor));
    let status = harness.renderer.status();
    assert!(status.started);
    assert_eq!(status.preview, Some(Size::new(1920, 1080)));
    assert_eq!(status.surface_size, SCREEN);
    assert!(status.flags.fbo_ready);
    assert_eq!(status.threshold, 80);
}
