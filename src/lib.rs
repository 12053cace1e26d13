// SPDX-License-Identifier: MPL-2.0

//! edgecam - camera-to-GPU frame pipeline
//!
//! Opens the rear camera, streams preview frames into a GPU texture, hands
//! every frame to a pluggable [`processor::FrameProcessor`] and presents the
//! processed result.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`backends`]: Camera drivers and the capture session manager
//! - [`pipeline`]: Lifecycle, size negotiation, render resources and the
//!   render thread
//! - [`gpu`]: Handle-based GPU abstraction and its wgpu implementation
//! - [`shaders`]: The camera and 2-D shader programs
//! - [`processor`]: Frame processor trait and built-in processors
//! - [`config`]: User configuration handling
//!
//! # Example
//!
//! ```ignore
//! let config = edgecam::Config::load();
//! let driver = edgecam::backends::camera::create_driver(config.backend, config.synthetic_fps)?;
//! let handle = edgecam::pipeline::PipelineHandle::spawn(options, driver, factory, processor)?;
//! handle.surface_created(Size::new(1280, 720));
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod gpu;
pub mod pipeline;
pub mod processor;
pub mod shaders;

// Re-export commonly used types
pub use backends::camera::{CameraBackendType, DisplayMetrics, SensorRotation, Size};
pub use config::Config;
pub use constants::RenderMode;
pub use errors::{AppError, AppResult, ErrorCategory};
pub use pipeline::{PipelineEvent, PipelineHandle, PipelineOptions};
pub use processor::FrameProcessor;
