//! Core library for the Lightshow installation operator.
//!
//! The crate drives a live light/LED installation: inputs (audio spectrum,
//! a MIDI controller) feed a library of visualizers that render onto
//! physical outputs, and the [`Operator`] decides every tick which
//! visualizers actually get to drive which outputs. Each module owns a
//! distinct subsystem; concrete device transports plug in behind the traits
//! in [`participant`], [`midi`] and [`outputs`].

pub mod audio;
pub mod config;
pub mod error;
pub mod midi;
pub mod operator;
pub mod outputs;
pub mod palette;
pub mod participant;
pub mod visualizers;

pub use audio::{AudioFrame, AudioInput, SpectrumAnalyzer};
pub use config::{AudioConfig, ConfigHandle, MidiConfig, OperatorConfig, ShowConfig};
pub use error::{Result, ShowError};
pub use midi::{
    decode, BindingKey, BindingRegistry, ChannelCommand, CommandKind, MidiBackend,
    MidiCommand, MidiInput, MidiPort, PaletteState, RawChannelMessage, ScriptedBackend,
};
pub use operator::Operator;
pub use outputs::{FrameSink, LedStripOutput};
pub use palette::{ColorPalette, PaletteEntry, SharedPalette};
pub use participant::{Input, Output, Visualizer};
pub use visualizers::{AudioLevelVisualizer, KnobDimmerVisualizer, SolidColorVisualizer};
