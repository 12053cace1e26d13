// SPDX-License-Identifier: GPL-3.0-only

//! Surface lifecycle state machine
//!
//! The pipeline runs only while it is enabled, has a drawing surface and is
//! visible. Each setter reports the edge it caused, if any, so the owner
//! calls `do_start`/`do_stop` exactly once per change of the combined state.

/// Edge of the combined Started state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Stopped → Started
    Start,
    /// Started → Stopped
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleFlags {
    pub enabled: bool,
    pub has_surface: bool,
    pub visible: bool,
}

impl Default for LifecycleFlags {
    fn default() -> Self {
        Self {
            enabled: true,
            has_surface: false,
            visible: true,
        }
    }
}

impl LifecycleFlags {
    pub fn all_set(&self) -> bool {
        self.enabled && self.has_surface && self.visible
    }
}

#[derive(Debug, Default)]
pub struct SurfaceLifecycle {
    flags: LifecycleFlags,
    started: bool,
}

impl SurfaceLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flags(&self) -> LifecycleFlags {
        self.flags
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn set_enabled(&mut self, enabled: bool) -> Option<Transition> {
        self.flags.enabled = enabled;
        self.update()
    }

    pub fn set_has_surface(&mut self, has_surface: bool) -> Option<Transition> {
        self.flags.has_surface = has_surface;
        self.update()
    }

    pub fn set_visible(&mut self, visible: bool) -> Option<Transition> {
        self.flags.visible = visible;
        self.update()
    }

    fn update(&mut self) -> Option<Transition> {
        let target = self.flags.all_set();
        if target == self.started {
            return None;
        }
        self.started = target;
        Some(if target {
            Transition::Start
        } else {
            Transition::Stop
        })
    }
}
