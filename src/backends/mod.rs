// SPDX-License-Identifier: MPL-2.0

//! Backend abstraction layer for camera capture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               Pipeline Layer                 │
//! └────────────────────┬────────────────────────┘
//!                      │
//! ┌────────────────────┴────────────────────────┐
//! │              Backend Layer                   │
//! │  ┌─────────────┐    ┌──────────────────┐    │
//! │  │  Synthetic  │    │      V4L2        │    │
//! │  │ test camera │    │ (/dev/video*)    │    │
//! │  └─────────────┘    └──────────────────┘    │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`camera`]: Camera drivers, callback thread and session manager

pub mod camera;
