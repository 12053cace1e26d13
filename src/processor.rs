// SPDX-License-Identifier: MPL-2.0

//! Frame processors
//!
//! A [`FrameProcessor`] is the external step of the pipeline: it reads the
//! intermediate texture and writes the draw target, synchronously on the
//! render thread. It must not keep texture handles past the call.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::backends::camera::Size;
use crate::errors::RenderResult;
use crate::gpu::{GpuContext, TextureHandle};

/// Arguments of one processor call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorFrame {
    pub input: TextureHandle,
    pub output: TextureHandle,
    pub size: Size,
    pub threshold: i32,
}

pub trait FrameProcessor: Send {
    /// Turn `frame.input` into `frame.output`
    fn process(&mut self, gpu: &mut dyn GpuContext, frame: &ProcessorFrame) -> RenderResult<()>;

    /// The frame buffer stage was created at `size`
    fn on_started(&mut self, _size: Size) {}

    /// The pipeline stopped; no further calls until the next `on_started`
    fn on_stopped(&mut self) {}
}

/// Copies the input unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughProcessor;

impl FrameProcessor for PassthroughProcessor {
    fn process(&mut self, gpu: &mut dyn GpuContext, frame: &ProcessorFrame) -> RenderResult<()> {
        gpu.copy_texture(frame.input, frame.output)
    }
}

/// Adapts a closure with GPU access
pub struct FnProcessor<F>(pub F);

impl<F> FrameProcessor for FnProcessor<F>
where
    F: FnMut(&mut dyn GpuContext, &ProcessorFrame) -> RenderResult<()> + Send,
{
    fn process(&mut self, gpu: &mut dyn GpuContext, frame: &ProcessorFrame) -> RenderResult<()> {
        (self.0)(gpu, frame)
    }
}

/// Runs a CPU function over the input pixels
///
/// The input texture is read back as RGBA8, handed to the closure together
/// with an output buffer of the same size, and the output is uploaded into
/// the draw target.
pub struct CpuProcessor<F> {
    func: F,
    output: Vec<u8>,
}

impl<F> CpuProcessor<F>
where
    F: FnMut(&[u8], &mut [u8], Size, i32) + Send,
{
    pub fn new(func: F) -> Self {
        Self {
            func,
            output: Vec::new(),
        }
    }
}

impl<F> FrameProcessor for CpuProcessor<F>
where
    F: FnMut(&[u8], &mut [u8], Size, i32) + Send,
{
    fn process(&mut self, gpu: &mut dyn GpuContext, frame: &ProcessorFrame) -> RenderResult<()> {
        let input = gpu.read_texture(frame.input)?;
        self.output.resize(input.len(), 0);
        (self.func)(&input, &mut self.output, frame.size, frame.threshold);
        gpu.write_texture(frame.output, frame.size, &self.output)
    }

    fn on_stopped(&mut self) {
        self.output = Vec::new();
    }
}

/// Binarize RGBA pixels: white where the BT.601 luma is at least
/// `threshold`, black elsewhere
pub fn binarize_luminance(input: &[u8], output: &mut [u8], _size: Size, threshold: i32) {
    for (src, dst) in input.chunks_exact(4).zip(output.chunks_exact_mut(4)) {
        let luma = (299 * src[0] as u32 + 587 * src[1] as u32 + 114 * src[2] as u32) / 1000;
        let value = if luma as i32 >= threshold { 255 } else { 0 };
        dst.copy_from_slice(&[value, value, value, 255]);
    }
}

/// Rolling processing time of the last calls
#[derive(Debug, Clone)]
pub struct ProcessingTimer {
    samples: VecDeque<Duration>,
    capacity: usize,
    started: Option<Instant>,
    total_calls: u64,
}

impl Default for ProcessingTimer {
    fn default() -> Self {
        Self::new(30)
    }
}

impl ProcessingTimer {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
            started: None,
            total_calls: 0,
        }
    }

    pub fn start(&mut self) {
        self.started = Some(Instant::now());
    }

    pub fn stop(&mut self) {
        if let Some(started) = self.started.take() {
            self.record(started.elapsed());
        }
    }

    pub fn record(&mut self, duration: Duration) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(duration);
        self.total_calls += 1;
        if self.total_calls % 120 == 0 {
            debug!(
                average_ms = self.average().as_secs_f64() * 1000.0,
                fps = self.fps(),
                "Processing time"
            );
        }
    }

    pub fn average(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        self.samples.iter().sum::<Duration>() / self.samples.len() as u32
    }

    /// Processor calls per second the average time allows
    pub fn fps(&self) -> f64 {
        let average = self.average().as_secs_f64();
        if average > 0.0 { 1.0 / average } else { 0.0 }
    }

    pub fn total_calls(&self) -> u64 {
        self.total_calls
    }
}
