//! Concrete output devices.
//!
//! Wire protocols are not the core's business: an output buffers one pixel
//! frame per tick and flushes it through an injected [`FrameSink`], which is
//! where serial framing, pixel-over-network transports or REST calls live.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
    config::ConfigHandle,
    participant::{Output, Visualizer},
    Result,
};

/// Transport boundary an output flushes frames through.
pub trait FrameSink: Send + Sync {
    fn write_frame(&self, pixels: &[u32]) -> Result<()>;
}

/// A strip of addressable LEDs. Visualizers paint into the pixel buffer
/// during their render step; the operator flushes it once per tick with the
/// configured brightness ceiling applied.
pub struct LedStripOutput {
    name: String,
    config: ConfigHandle,
    sink: Arc<dyn FrameSink>,
    visualizers: Mutex<Vec<Arc<dyn Visualizer>>>,
    frame: Mutex<Vec<u32>>,
    active: Mutex<bool>,
}

impl LedStripOutput {
    pub fn new(
        name: impl Into<String>,
        pixel_count: usize,
        sink: Arc<dyn FrameSink>,
        config: ConfigHandle,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            sink,
            visualizers: Mutex::new(Vec::new()),
            frame: Mutex::new(vec![0; pixel_count]),
            active: Mutex::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pixel_count(&self) -> usize {
        self.frame.lock().len()
    }

    /// Registers a visualizer as a competitor for this output.
    pub fn register_visualizer(&self, visualizer: Arc<dyn Visualizer>) {
        self.visualizers.lock().push(visualizer);
    }

    pub fn fill(&self, color: u32) {
        self.frame.lock().fill(color);
    }

    pub fn set_pixel(&self, index: usize, color: u32) {
        let mut frame = self.frame.lock();
        if let Some(pixel) = frame.get_mut(index) {
            *pixel = color;
        }
    }

    pub fn is_active(&self) -> bool {
        *self.active.lock()
    }
}

impl Output for LedStripOutput {
    fn is_enabled(&self) -> bool {
        self.config.output_enabled(&self.name)
    }

    fn set_active(&self, active: bool) -> Result<()> {
        *self.active.lock() = active;
        Ok(())
    }

    fn visualizers(&self) -> Vec<Arc<dyn Visualizer>> {
        self.visualizers.lock().clone()
    }

    fn operator_update(&self) -> Result<()> {
        let brightness = self.config.max_brightness();
        let scaled: Vec<u32> = {
            let frame = self.frame.lock();
            frame
                .iter()
                .map(|&color| scale_color(color, brightness))
                .collect()
        };
        self.sink.write_frame(&scaled)
    }
}

/// Scales each channel of a `0xRRGGBB` color by `level` in `[0, 1]`.
pub fn scale_color(color: u32, level: f64) -> u32 {
    let level = level.clamp(0.0, 1.0);
    let channel = |shift: u32| {
        let value = f64::from((color >> shift) & 0xFF);
        ((value * level).round() as u32) << shift
    };
    channel(16) | channel(8) | channel(0)
}
