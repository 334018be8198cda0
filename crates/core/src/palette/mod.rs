//! Per-program color storage shared between the MIDI picker and the
//! visualizers that render from it.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Capability the binding engine commits picked colors through. Injected so
/// the picker never depends on a concrete storage layer.
pub trait ColorPalette: Send + Sync {
    fn set_color(&self, program: u8, color: u32);
    fn set_gradient_color(&self, program: u8, start: u32, end: u32);
}

/// A stored palette entry, `0xRRGGBB` colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaletteEntry {
    Solid(u32),
    Gradient(u32, u32),
}

/// Thread-safe palette keyed by program number.
#[derive(Debug, Default)]
pub struct SharedPalette {
    entries: Mutex<HashMap<u8, PaletteEntry>>,
}

impl SharedPalette {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry(&self, program: u8) -> Option<PaletteEntry> {
        self.entries.lock().get(&program).copied()
    }

    /// Samples the entry for a program at `position` in `[0, 1]`: solids
    /// ignore the position, gradients interpolate between their endpoints.
    pub fn sample(&self, program: u8, position: f64) -> Option<u32> {
        match self.entry(program)? {
            PaletteEntry::Solid(color) => Some(color),
            PaletteEntry::Gradient(start, end) => Some(lerp_color(start, end, position)),
        }
    }
}

impl ColorPalette for SharedPalette {
    fn set_color(&self, program: u8, color: u32) {
        self.entries.lock().insert(program, PaletteEntry::Solid(color));
    }

    fn set_gradient_color(&self, program: u8, start: u32, end: u32) {
        self.entries
            .lock()
            .insert(program, PaletteEntry::Gradient(start, end));
    }
}

/// Per-channel linear interpolation between two `0xRRGGBB` colors.
pub fn lerp_color(start: u32, end: u32, position: f64) -> u32 {
    let position = position.clamp(0.0, 1.0);
    let channel = |shift: u32| {
        let from = f64::from((start >> shift) & 0xFF);
        let to = f64::from((end >> shift) & 0xFF);
        ((from + (to - from) * position).round() as u32) << shift
    };
    channel(16) | channel(8) | channel(0)
}
