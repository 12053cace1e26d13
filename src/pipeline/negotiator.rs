// SPDX-License-Identifier: GPL-3.0-only

//! Preview size negotiation
//!
//! Picks the camera output size the capture session streams at. Sizes whose
//! aspect ratio matches the screen are preferred; among the candidates the
//! tallest one that fits the preview cap wins.

use tracing::{debug, info};

use crate::backends::camera::{DisplayMetrics, SensorRotation, Size};
use crate::constants::{ASPECT_RATIO_TOLERANCE, MAX_PREVIEW_HEIGHT, MAX_PREVIEW_WIDTH};

/// Inputs of one negotiation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NegotiationRequest {
    /// Drawing surface size
    pub target: Size,
    pub display: DisplayMetrics,
    pub sensor_orientation: SensorRotation,
    /// Configured limit, combined with the hardware limit
    pub max_size: Size,
    /// Maximum relative aspect ratio error
    pub tolerance: f64,
}

impl NegotiationRequest {
    pub fn new(target: Size, display: DisplayMetrics, sensor_orientation: SensorRotation) -> Self {
        Self {
            target,
            display,
            sensor_orientation,
            max_size: hardware_cap(),
            tolerance: ASPECT_RATIO_TOLERANCE,
        }
    }

    pub fn with_max_size(mut self, max_size: Size) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Cap applied to candidates: the configured limit, never above hardware
    pub fn effective_cap(&self) -> Size {
        let hardware = hardware_cap();
        let width = match self.max_size.width {
            0 => hardware.width,
            w => w.min(hardware.width),
        };
        let height = match self.max_size.height {
            0 => hardware.height,
            h => h.min(hardware.height),
        };
        Size::new(width, height)
    }
}

pub fn hardware_cap() -> Size {
    Size::new(MAX_PREVIEW_WIDTH, MAX_PREVIEW_HEIGHT)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiated {
    pub preview: Size,
    /// Surface size in sensor orientation
    pub oriented_target: Size,
    /// Whether the preview matches the screen aspect ratio
    pub aspect_matched: bool,
}

/// Whether `size` matches `ratio` within the relative `tolerance`
pub fn matches_aspect(size: Size, ratio: f64, tolerance: f64) -> bool {
    if size.is_empty() || ratio <= 0.0 {
        return false;
    }
    ((size.aspect_ratio() - ratio) / ratio).abs() <= tolerance
}

/// Choose the preview size, or `None` when no supported size fits the cap
pub fn select_preview_size(request: &NegotiationRequest, sizes: &[Size]) -> Option<Negotiated> {
    let mut oriented_target = request.target;
    if request
        .sensor_orientation
        .swaps_relative_to(request.display.rotation)
    {
        oriented_target = oriented_target.swapped();
    }
    if oriented_target.is_empty() {
        debug!("No drawing surface size yet, skipping negotiation");
        return None;
    }

    let ratio = request.display.aspect_ratio();
    let mut candidates: Vec<Size> = sizes
        .iter()
        .copied()
        .filter(|s| matches_aspect(*s, ratio, request.tolerance))
        .collect();
    let aspect_matched = !candidates.is_empty();
    if !aspect_matched {
        debug!(ratio, "No size matches the screen aspect ratio, using all sizes");
        candidates = sizes.iter().copied().filter(|s| !s.is_empty()).collect();
    }

    candidates.sort_by(|a, b| b.height.cmp(&a.height).then(b.width.cmp(&a.width)));

    let cap = request.effective_cap();
    let preview = candidates.into_iter().find(|s| s.fits_within(cap));
    match preview {
        Some(preview) => {
            info!(%preview, %oriented_target, aspect_matched, "Negotiated preview size");
            Some(Negotiated {
                preview,
                oriented_target,
                aspect_matched,
            })
        }
        None => {
            info!(%cap, "No supported preview size fits");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn landscape(width: u32, height: u32) -> DisplayMetrics {
        DisplayMetrics::new(Size::new(width, height), SensorRotation::None)
    }

    #[test]
    fn test_relative_tolerance() {
        assert!(matches_aspect(Size::new(1280, 720), 16.0 / 9.0, 0.01));
        assert!(!matches_aspect(Size::new(640, 480), 16.0 / 9.0, 0.01));
        assert!(!matches_aspect(Size::new(0, 480), 16.0 / 9.0, 0.01));
    }

    #[test]
    fn test_equal_heights_prefer_wider() {
        let request = NegotiationRequest::new(
            Size::new(800, 600),
            landscape(800, 600),
            SensorRotation::None,
        )
        .with_tolerance(1.0);
        let sizes = [Size::new(1280, 720), Size::new(960, 720)];
        let result = select_preview_size(&request, &sizes).unwrap();
        assert_eq!(result.preview, Size::new(1280, 720));
    }

    #[test]
    fn test_configured_cap_never_exceeds_hardware() {
        let request = NegotiationRequest::new(
            Size::new(1920, 1080),
            landscape(1920, 1080),
            SensorRotation::None,
        )
        .with_max_size(Size::new(4000, 720));
        assert_eq!(request.effective_cap(), Size::new(1920, 720));
    }

    #[test]
    fn test_empty_target_fails() {
        let request =
            NegotiationRequest::new(Size::default(), landscape(1920, 1080), SensorRotation::None);
        assert!(select_preview_size(&request, &[Size::new(640, 360)]).is_none());
    }
}
