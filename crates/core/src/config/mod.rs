use std::{
    collections::BTreeMap,
    fs,
    path::Path,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Top-level configuration structure for a show.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShowConfig {
    pub operator: OperatorConfig,
    pub audio: AudioConfig,
    pub midi: MidiConfig,
    /// Global brightness ceiling applied when outputs flush, in `[0, 1]`.
    pub max_brightness: f64,
    /// Per-output enable switches, keyed by output name. Outputs missing from
    /// the map are treated as disabled.
    pub outputs: BTreeMap<String, bool>,
}

impl Default for ShowConfig {
    fn default() -> Self {
        Self {
            operator: OperatorConfig::default(),
            audio: AudioConfig::default(),
            midi: MidiConfig::default(),
            max_brightness: 1.0,
            outputs: BTreeMap::new(),
        }
    }
}

impl ShowConfig {
    /// Reads a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Writes the configuration to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Configuration for the operator loop itself.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OperatorConfig {
    /// Minimum duration of one tick, in milliseconds. Coarse frame pacing,
    /// not a hard real-time guarantee.
    pub min_tick_ms: u64,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self { min_tick_ms: 1 }
    }
}

/// Configuration specific to the audio input.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AudioConfig {
    pub enabled: bool,
    pub sample_rate: u32,
    pub block_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_rate: 48_000,
            block_size: 1024,
        }
    }
}

/// Configuration specific to the MIDI input.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MidiConfig {
    pub enabled: bool,
    /// Index of the device port to open.
    pub device_index: usize,
    /// When true, the device is pumped on a dedicated thread; otherwise it is
    /// polled inline from the operator thread each tick.
    pub separate_thread: bool,
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            device_index: 0,
            separate_thread: true,
        }
    }
}

/// Cloneable, thread-safe view over a live [`ShowConfig`].
///
/// The operator thread and every device thread read through the same handle,
/// while an outer layer (UI, CLI) may mutate it at any time. The operator FPS
/// readback travels the other way and deliberately bypasses the lock.
#[derive(Clone)]
pub struct ConfigHandle {
    shared: Arc<RwLock<ShowConfig>>,
    operator_fps: Arc<AtomicU32>,
}

impl ConfigHandle {
    pub fn new(config: ShowConfig) -> Self {
        Self {
            shared: Arc::new(RwLock::new(config)),
            operator_fps: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Returns a point-in-time copy of the full configuration.
    pub fn snapshot(&self) -> ShowConfig {
        self.shared.read().clone()
    }

    /// Applies a mutation to the live configuration.
    pub fn update(&self, apply: impl FnOnce(&mut ShowConfig)) {
        apply(&mut self.shared.write());
    }

    pub fn operator(&self) -> OperatorConfig {
        self.shared.read().operator
    }

    pub fn audio(&self) -> AudioConfig {
        self.shared.read().audio
    }

    pub fn midi(&self) -> MidiConfig {
        self.shared.read().midi
    }

    pub fn min_tick(&self) -> Duration {
        Duration::from_millis(self.shared.read().operator.min_tick_ms)
    }

    pub fn max_brightness(&self) -> f64 {
        self.shared.read().max_brightness
    }

    pub fn set_max_brightness(&self, value: f64) {
        self.shared.write().max_brightness = value.clamp(0.0, 1.0);
    }

    pub fn output_enabled(&self, name: &str) -> bool {
        self.shared.read().outputs.get(name).copied().unwrap_or(false)
    }

    pub fn set_output_enabled(&self, name: impl Into<String>, enabled: bool) {
        self.shared.write().outputs.insert(name.into(), enabled);
    }

    /// Frames per second reported by the operator over the last rolling
    /// one-second window.
    pub fn operator_fps(&self) -> u32 {
        self.operator_fps.load(Ordering::Relaxed)
    }

    pub(crate) fn set_operator_fps(&self, fps: u32) {
        self.operator_fps.store(fps, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for ConfigHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigHandle")
            .field("operator_fps", &self.operator_fps())
            .finish()
    }
}
