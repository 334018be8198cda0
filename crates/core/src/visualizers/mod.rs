//! A few small concrete visualizers.
//!
//! These exist to run real shows end to end, not to look good; anything more
//! ambitious belongs in its own crate built on the same contracts.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::{
    audio::AudioInput,
    midi::MidiInput,
    outputs::{scale_color, LedStripOutput},
    palette::SharedPalette,
    participant::{Input, Visualizer},
    Result,
};

/// Paints the whole strip with the palette color for one program. Priority
/// `-1`: it runs as a backdrop under whatever else wins the output.
pub struct SolidColorVisualizer {
    output: Arc<LedStripOutput>,
    palette: Arc<SharedPalette>,
    program: u8,
    fallback: u32,
    enabled: AtomicBool,
}

impl SolidColorVisualizer {
    pub fn new(
        output: Arc<LedStripOutput>,
        palette: Arc<SharedPalette>,
        program: u8,
        fallback: u32,
    ) -> Self {
        Self {
            output,
            palette,
            program,
            fallback,
            enabled: AtomicBool::new(false),
        }
    }
}

impl Visualizer for SolidColorVisualizer {
    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    fn priority(&self) -> i32 {
        -1
    }

    fn inputs(&self) -> Vec<Arc<dyn Input>> {
        Vec::new()
    }

    fn visualize(&self) -> Result<()> {
        let color = self
            .palette
            .sample(self.program, 0.0)
            .unwrap_or(self.fallback);
        self.output.fill(color);
        Ok(())
    }
}

/// Lights a prefix of the strip proportional to the current audio level.
pub struct AudioLevelVisualizer {
    audio: Arc<AudioInput>,
    output: Arc<LedStripOutput>,
    color: u32,
    priority: i32,
    enabled: AtomicBool,
}

impl AudioLevelVisualizer {
    pub fn new(
        audio: Arc<AudioInput>,
        output: Arc<LedStripOutput>,
        color: u32,
        priority: i32,
    ) -> Self {
        Self {
            audio,
            output,
            color,
            priority,
            enabled: AtomicBool::new(false),
        }
    }
}

impl Visualizer for AudioLevelVisualizer {
    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn inputs(&self) -> Vec<Arc<dyn Input>> {
        vec![self.audio.clone() as Arc<dyn Input>]
    }

    fn visualize(&self) -> Result<()> {
        let frame = self.audio.frame();
        let count = self.output.pixel_count();
        let lit = (f64::from(frame.rms.clamp(0.0, 1.0)) * count as f64).round() as usize;
        for index in 0..count {
            let color = if index < lit { self.color } else { 0 };
            self.output.set_pixel(index, color);
        }
        Ok(())
    }
}

/// Dims the whole strip by the position of one MIDI knob.
pub struct KnobDimmerVisualizer {
    midi: Arc<MidiInput>,
    output: Arc<LedStripOutput>,
    knob: u8,
    color: u32,
    priority: i32,
    enabled: AtomicBool,
}

impl KnobDimmerVisualizer {
    pub fn new(
        midi: Arc<MidiInput>,
        output: Arc<LedStripOutput>,
        knob: u8,
        color: u32,
        priority: i32,
    ) -> Self {
        Self {
            midi,
            output,
            knob,
            color,
            priority,
            enabled: AtomicBool::new(false),
        }
    }
}

impl Visualizer for KnobDimmerVisualizer {
    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn inputs(&self) -> Vec<Arc<dyn Input>> {
        vec![self.midi.clone() as Arc<dyn Input>]
    }

    fn visualize(&self) -> Result<()> {
        let level = self.midi.knob_value(self.knob).unwrap_or(0.0);
        self.output.fill(scale_color(self.color, level));
        Ok(())
    }
}
