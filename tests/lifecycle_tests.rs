// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the renderer lifecycle: start and stop run exactly
//! once per edge of enabled && has-surface && visible

mod common;

use common::{FakeDriver, Harness};
use edgecam::backends::camera::{SessionState, Size};
use edgecam::errors::ErrorCategory;
use edgecam::pipeline::{LifecycleFlags, PipelineEvent, SurfaceLifecycle, Transition};
use edgecam::processor::PassthroughProcessor;

const SCREEN: Size = Size::new(1920, 1080);

fn started(events: &[PipelineEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, PipelineEvent::Started { .. }))
        .count()
}

fn stopped(events: &[PipelineEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, PipelineEvent::Stopped))
        .count()
}

#[test]
fn test_flags_default_to_enabled_and_visible() {
    let flags = LifecycleFlags::default();
    assert!(flags.enabled);
    assert!(flags.visible);
    assert!(!flags.has_surface);
    assert!(!flags.all_set());
}

#[test]
fn test_every_flag_order_starts_once() {
    let mut lifecycle = SurfaceLifecycle::new();
    assert_eq!(lifecycle.set_enabled(false), None);
    assert_eq!(lifecycle.set_visible(false), None);
    assert_eq!(lifecycle.set_has_surface(true), None);
    assert_eq!(lifecycle.set_visible(true), None);
    assert_eq!(lifecycle.set_enabled(true), Some(Transition::Start));
    assert_eq!(lifecycle.set_enabled(true), None);
    assert_eq!(lifecycle.set_has_surface(false), Some(Transition::Stop));
    assert_eq!(lifecycle.set_has_surface(false), None);
}

#[test]
fn test_surface_created_starts_pipeline() {
    let mut harness = Harness::new(
        FakeDriver::with_rear_camera(),
        SCREEN,
        Box::new(PassthroughProcessor),
    );

    harness.renderer.surface_created(SCREEN);
    harness.settle();

    let events = harness.events();
    assert_eq!(
        events,
        vec![PipelineEvent::Started {
            preview: Size::new(1920, 1080)
        }]
    );
    assert!(harness.renderer.is_started());
    assert!(harness.renderer.signals().flags().fbo_ready);
    assert_eq!(
        harness.renderer.manager().state(),
        SessionState::Active,
        "camera streams once the session is configured"
    );
}

#[test]
fn test_repeated_inputs_do_not_restart() {
    let mut harness = Harness::new(
        FakeDriver::with_rear_camera(),
        SCREEN,
        Box::new(PassthroughProcessor),
    );
    harness.renderer.surface_created(SCREEN);
    harness.settle();

    harness.renderer.set_visible(true);
    harness.renderer.set_enabled(true);
    harness.renderer.surface_changed(SCREEN);
    harness.settle();

    let events = harness.events();
    assert_eq!(started(&events), 1);
    assert_eq!(stopped(&events), 0);
    assert_eq!(
        harness
            .driver
            .log
            .opens
            .load(std::sync::atomic::Ordering::SeqCst),
        1
    );
}

#[test]
fn test_hide_and_show_cycle() {
    let mut harness = Harness::new(
        FakeDriver::with_rear_camera(),
        SCREEN,
        Box::new(PassthroughProcessor),
    );
    harness.renderer.surface_created(SCREEN);
    harness.settle();
    harness.events();

    harness.renderer.set_visible(false);
    harness.renderer.set_visible(false);
    harness.renderer.set_enabled(false);
    harness.settle();
    let events = harness.events();
    assert_eq!(stopped(&events), 1);
    assert_eq!(started(&events), 0);
    assert_eq!(harness.renderer.manager().state(), SessionState::Closed);
    assert!(harness.renderer.resources().is_none());

    // Still disabled
    harness.renderer.set_visible(true);
    assert!(!harness.renderer.is_started());

    harness.renderer.set_enabled(true);
    harness.settle();
    let events = harness.events();
    assert_eq!(started(&events), 1);
    assert_eq!(harness.renderer.manager().state(), SessionState::Active);
}

#[test]
fn test_surface_destroyed_stops_pipeline() {
    let mut harness = Harness::new(
        FakeDriver::with_rear_camera(),
        SCREEN,
        Box::new(PassthroughProcessor),
    );
    harness.renderer.surface_created(SCREEN);
    harness.settle();
    harness.events();

    harness.renderer.surface_destroyed();
    harness.renderer.surface_destroyed();

    let events = harness.events();
    assert_eq!(events, vec![PipelineEvent::Stopped]);
    assert!(!harness.renderer.signals().flags().fbo_ready);
    assert!(!harness.renderer.signals().flags().update_pending);
}

#[test]
fn test_empty_surface_size_is_ignored() {
    let mut harness = Harness::new(
        FakeDriver::with_rear_camera(),
        SCREEN,
        Box::new(PassthroughProcessor),
    );
    harness.renderer.surface_created(Size::new(0, 1080));
    assert!(!harness.renderer.is_started());
    assert!(harness.events().is_empty());
}

#[test]
fn test_missing_permission_blocks_start() {
    let driver = FakeDriver::with_rear_camera();
    driver.set_permission(false);
    let mut harness = Harness::new(driver, SCREEN, Box::new(PassthroughProcessor));

    harness.renderer.surface_created(SCREEN);
    harness.settle();

    let events = harness.events();
    assert_eq!(started(&events), 0);
    assert!(events.iter().any(|e| matches!(
        e,
        PipelineEvent::Error {
            category: ErrorCategory::Permission,
            ..
        }
    )));
    assert!(!harness.renderer.signals().flags().fbo_ready);
    assert_eq!(
        harness
            .driver
            .log
            .opens
            .load(std::sync::atomic::Ordering::SeqCst),
        0
    );
}

#[test]
fn test_no_rear_camera_reports_negotiation_failure() {
    let driver = FakeDriver::new(vec![common::camera(
        "front",
        edgecam::backends::camera::LensFacing::Front,
        &[Size::new(1280, 720)],
    )]);
    let mut harness = Harness::new(driver, SCREEN, Box::new(PassthroughProcessor));

    harness.renderer.surface_created(SCREEN);

    assert!(harness.renderer.preview().is_none());
    let events = harness.events();
    assert!(
        events
            .iter()
            .any(|e| matches!(e, PipelineEvent::Error { .. }))
    );
    assert_eq!(started(&events), 0);
}

#[test]
fn test_no_fitting_size_reports_negotiation_category() {
    let driver = FakeDriver::new(vec![common::camera(
        "rear",
        edgecam::backends::camera::LensFacing::Back,
        &[Size::new(4000, 3000)],
    )]);
    let mut harness = Harness::new(driver, SCREEN, Box::new(PassthroughProcessor));

    harness.renderer.surface_created(SCREEN);

    assert!(harness.renderer.preview().is_none());
    assert!(harness.events().iter().any(|e| matches!(
        e,
        PipelineEvent::Error {
            category: ErrorCategory::Negotiation,
            ..
        }
    )));
}
