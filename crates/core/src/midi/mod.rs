//! MIDI controller input.
//!
//! Raw device channel messages are decoded into a closed [`MidiCommand`] set,
//! buffered for the operator's per-tick drain, and synchronously dispatched
//! through the binding registry the moment they arrive. All stateful
//! controller behavior — latest knob/note values, the palette color picker,
//! the max-brightness knob — is expressed as bindings; there is no
//! special-cased dispatch path.

mod backend;
mod bindings;

pub use backend::{MidiBackend, MidiPort, ScriptedBackend};
#[cfg(feature = "hardware")]
pub use backend::hardware::{list_ports, MidirBackend};
pub use bindings::{BindingKey, BindingRegistry, CommandKind};

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::{
    config::ConfigHandle,
    palette::ColorPalette,
    participant::Input,
    Result,
};

/// First note of the keyboard range that selects palette colors. Notes
/// `64..89` map onto [`COLOR_TABLE`] entries `0..25`.
pub const PALETTE_NOTE_BASE: u8 = 64;

/// Each key on the controller keyboard corresponds to a color.
const COLOR_TABLE: [u32; 25] = [
    0x000000, 0xFF0000, 0xFF4400, 0xFF8800, 0xFFCC00, 0xFFFF00, 0xCCFF00,
    0x88FF00, 0x44FF00, 0x00FF00, 0x00FF44, 0x00FF88, 0x00FFCC, 0x00FFFF,
    0x00CCFF, 0x0088FF, 0x0044FF, 0x0000FF, 0x4400FF, 0x8800FF, 0xCC00FF,
    0xFF00FF, 0xFF55FF, 0xFFABFF, 0xFFFFFF,
];

/// Timeout for one poll step on a dedicated pump thread. Bounds how long
/// shutdown waits for a quiet device.
const PUMP_TIMEOUT: Duration = Duration::from_millis(25);

/// Upper bound on messages handled per inline pump so a chatty device cannot
/// stall the tick.
const INLINE_PUMP_BUDGET: usize = 256;

/// A decoded controller message. Values are the raw data byte normalized by
/// 127 into `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MidiCommand {
    Knob { index: u8, value: f64 },
    Note { index: u8, velocity: f64 },
    Program { index: u8 },
}

impl MidiCommand {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Knob { .. } => CommandKind::Knob,
            Self::Note { .. } => CommandKind::Note,
            Self::Program { .. } => CommandKind::Program,
        }
    }

    pub fn index(&self) -> u8 {
        match *self {
            Self::Knob { index, .. }
            | Self::Note { index, .. }
            | Self::Program { index } => index,
        }
    }

    /// Knob value or note velocity; zero for program changes.
    pub fn value(&self) -> f64 {
        match *self {
            Self::Knob { value, .. } => value,
            Self::Note { velocity, .. } => velocity,
            Self::Program { .. } => 0.0,
        }
    }
}

/// Channel command kinds at the raw device boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelCommand {
    Controller,
    NoteOn,
    NoteOff,
    ProgramChange,
    Other,
}

/// A raw channel message as delivered by a device backend.
#[derive(Debug, Clone, Copy)]
pub struct RawChannelMessage {
    pub command: ChannelCommand,
    pub data1: u8,
    pub data2: u8,
}

/// Decodes a raw message into exactly one command, or `None` for kinds the
/// show does not care about (dropped silently, not an error).
pub fn decode(message: RawChannelMessage) -> Option<MidiCommand> {
    let value = f64::from(message.data2) / 127.0;
    match message.command {
        ChannelCommand::Controller => Some(MidiCommand::Knob {
            index: message.data1,
            value,
        }),
        ChannelCommand::NoteOn | ChannelCommand::NoteOff => Some(MidiCommand::Note {
            index: message.data1,
            velocity: value,
        }),
        ChannelCommand::ProgramChange => Some(MidiCommand::Program {
            index: message.data1,
        }),
        ChannelCommand::Other => None,
    }
}

/// State of the two-step palette picker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaletteState {
    Idle,
    /// A program change arrived; the next color key starts a pick for it.
    ProgramSelected(u8),
    /// One color key is held; a second distinct key commits the gradient.
    FirstColorChosen(u8, u8),
}

/// Derived per-index state, owned by the delivery path and read by the
/// operator thread between ticks. Kept behind one lock so the cross-thread
/// read is safe.
#[derive(Debug, Default)]
struct MidiState {
    knob_values: HashMap<u8, f64>,
    note_velocities: HashMap<u8, f64>,
    palette: PaletteState,
}

impl Default for PaletteState {
    fn default() -> Self {
        Self::Idle
    }
}

/// Concrete [`Input`] for a MIDI controller.
///
/// Always-active: the device keeps receiving even when no visualizer needs
/// it, so knob positions and the palette selection stay current.
pub struct MidiInput {
    config: ConfigHandle,
    backend: Arc<dyn MidiBackend>,
    state: Arc<Mutex<MidiState>>,
    registry: Arc<Mutex<BindingRegistry>>,
    commands: Sender<MidiCommand>,
    drained: Receiver<MidiCommand>,
    snapshot: Mutex<Vec<MidiCommand>>,
    runtime: Mutex<Runtime>,
}

#[derive(Default)]
struct Runtime {
    active: bool,
    thread: Option<JoinHandle<()>>,
    stop: Option<Arc<AtomicBool>>,
    inline_port: Option<Box<dyn MidiPort>>,
}

impl MidiInput {
    pub fn new(
        config: ConfigHandle,
        backend: Arc<dyn MidiBackend>,
        palette: Arc<dyn ColorPalette>,
    ) -> Self {
        let (commands, drained) = crossbeam_channel::unbounded();
        let state = Arc::new(Mutex::new(MidiState::default()));
        let mut registry = BindingRegistry::new();
        install_default_bindings(&mut registry, &state, &palette, &config);
        Self {
            config,
            backend,
            state,
            registry: Arc::new(Mutex::new(registry)),
            commands,
            drained,
            snapshot: Mutex::new(Vec::new()),
            runtime: Mutex::new(Runtime::default()),
        }
    }

    /// Registers an additional wildcard binding.
    pub fn bind<F>(&self, kind: CommandKind, callback: F)
    where
        F: FnMut(u8, f64) + Send + 'static,
    {
        self.registry.lock().bind(kind, callback);
    }

    /// Registers an additional exact-index binding.
    pub fn bind_index<F>(&self, kind: CommandKind, index: u8, callback: F)
    where
        F: FnMut(u8, f64) + Send + 'static,
    {
        self.registry.lock().bind_index(kind, index, callback);
    }

    /// Feeds a raw message through the normal delivery path, as if it had
    /// arrived from the device. Used by tests and virtual controllers.
    pub fn handle_message(&self, message: RawChannelMessage) {
        self.delivery().deliver(message);
    }

    /// The commands drained on the most recent tick. Consumed, never peeked:
    /// a tick with no traffic yields an empty snapshot.
    pub fn commands_since_last_tick(&self) -> Vec<MidiCommand> {
        self.snapshot.lock().clone()
    }

    /// Latest value seen for a knob, if it has moved since startup.
    pub fn knob_value(&self, index: u8) -> Option<f64> {
        self.state.lock().knob_values.get(&index).copied()
    }

    /// Latest velocity seen for a note; silent notes read as zero.
    pub fn note_velocity(&self, index: u8) -> f64 {
        self.state
            .lock()
            .note_velocities
            .get(&index)
            .copied()
            .unwrap_or(0.0)
    }

    pub fn palette_state(&self) -> PaletteState {
        self.state.lock().palette
    }

    fn delivery(&self) -> Delivery {
        Delivery {
            commands: self.commands.clone(),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl Input for MidiInput {
    fn is_active(&self) -> bool {
        self.runtime.lock().active
    }

    fn set_active(&self, active: bool) -> Result<()> {
        let mut runtime = self.runtime.lock();
        if runtime.active == active {
            return Ok(());
        }
        if active {
            let midi_config = self.config.midi();
            let port = self.backend.open(midi_config.device_index)?;
            if midi_config.separate_thread {
                let stop = Arc::new(AtomicBool::new(false));
                let delivery = self.delivery();
                let flag = Arc::clone(&stop);
                runtime.thread = Some(
                    thread::Builder::new()
                        .name("midi-pump".to_string())
                        .spawn(move || pump_loop(port, delivery, flag))?,
                );
                runtime.stop = Some(stop);
            } else {
                runtime.inline_port = Some(port);
            }
        } else {
            if let Some(stop) = runtime.stop.take() {
                stop.store(true, Ordering::Relaxed);
            }
            if let Some(thread) = runtime.thread.take() {
                if thread.join().is_err() {
                    tracing::error!("midi pump thread panicked");
                }
            }
            // Dropping the port closes the device.
            runtime.inline_port = None;
        }
        runtime.active = active;
        Ok(())
    }

    fn always_active(&self) -> bool {
        true
    }

    fn is_enabled(&self) -> bool {
        self.config.midi().enabled
    }

    fn operator_update(&self) -> Result<()> {
        let pump_result = {
            let mut runtime = self.runtime.lock();
            match runtime.inline_port.as_mut() {
                Some(port) => pump_available(port.as_mut(), &self.delivery()),
                None => Ok(()),
            }
        };
        // Swap the buffer even when the pump failed, otherwise the next tick
        // would see the previous tick's commands again.
        let drained: Vec<MidiCommand> = self.drained.try_iter().collect();
        *self.snapshot.lock() = drained;
        pump_result
    }
}

impl Drop for MidiInput {
    fn drop(&mut self) {
        let _ = self.set_active(false);
    }
}

/// The per-message delivery path, clonable into pump threads: buffer the
/// decoded command for the next drain, then dispatch bindings synchronously.
#[derive(Clone)]
struct Delivery {
    commands: Sender<MidiCommand>,
    registry: Arc<Mutex<BindingRegistry>>,
}

impl Delivery {
    fn deliver(&self, message: RawChannelMessage) {
        let Some(command) = decode(message) else {
            return;
        };
        let _ = self.commands.send(command);
        self.registry.lock().dispatch(&command);
    }
}

fn pump_loop(mut port: Box<dyn MidiPort>, delivery: Delivery, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Relaxed) {
        match port.poll(PUMP_TIMEOUT) {
            Ok(Some(message)) => delivery.deliver(message),
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(%err, "midi poll failed, stopping pump");
                break;
            }
        }
    }
}

fn pump_available(port: &mut dyn MidiPort, delivery: &Delivery) -> Result<()> {
    for _ in 0..INLINE_PUMP_BUDGET {
        match port.poll(Duration::ZERO)? {
            Some(message) => delivery.deliver(message),
            None => break,
        }
    }
    Ok(())
}

fn install_default_bindings(
    registry: &mut BindingRegistry,
    state: &Arc<Mutex<MidiState>>,
    palette: &Arc<dyn ColorPalette>,
    config: &ConfigHandle,
) {
    // Latest-value maps.
    let notes = Arc::clone(state);
    registry.bind(CommandKind::Note, move |index, velocity| {
        notes.lock().note_velocities.insert(index, velocity);
    });
    let knobs = Arc::clone(state);
    registry.bind(CommandKind::Knob, move |index, value| {
        knobs.lock().knob_values.insert(index, value);
    });

    // Palette picker: program selects, notes pick colors, any knob cancels.
    let programs = Arc::clone(state);
    registry.bind(CommandKind::Program, move |index, _| {
        programs.lock().palette = PaletteState::ProgramSelected(index);
    });
    let cancel = Arc::clone(state);
    registry.bind(CommandKind::Knob, move |_, _| {
        cancel.lock().palette = PaletteState::Idle;
    });
    let picker = Arc::clone(state);
    let committer = Arc::clone(palette);
    registry.bind(CommandKind::Note, move |index, velocity| {
        let mut state = picker.lock();
        let (next, commit) = advance_palette(state.palette, index, velocity);
        state.palette = next;
        drop(state);
        if let Some((program, start, end)) = commit {
            tracing::debug!(program, start, end, "palette gradient committed");
            committer.set_gradient_color(program, start, end);
        }
    });

    // Knob 1 is hard-bound to the global brightness ceiling.
    let brightness = config.clone();
    registry.bind_index(CommandKind::Knob, 1, move |_, value| {
        brightness.set_max_brightness(value);
    });
}

/// One transition of the palette picker. Returns the next state and, when a
/// second distinct color key lands, the gradient to commit.
fn advance_palette(
    state: PaletteState,
    index: u8,
    velocity: f64,
) -> (PaletteState, Option<(u8, u32, u32)>) {
    let color_index = |index: u8| {
        (PALETTE_NOTE_BASE..PALETTE_NOTE_BASE + COLOR_TABLE.len() as u8)
            .contains(&index)
            .then(|| index - PALETTE_NOTE_BASE)
    };
    match state {
        PaletteState::Idle => (PaletteState::Idle, None),
        PaletteState::ProgramSelected(program) => match color_index(index) {
            None => (PaletteState::Idle, None),
            Some(_) if velocity == 0.0 => (state, None),
            Some(color) => (PaletteState::FirstColorChosen(program, color), None),
        },
        PaletteState::FirstColorChosen(program, first) => match color_index(index) {
            None => (PaletteState::Idle, None),
            Some(color) if velocity == 0.0 => {
                if color == first {
                    // Releasing the held key cancels the pick in progress.
                    (PaletteState::ProgramSelected(program), None)
                } else {
                    (state, None)
                }
            }
            Some(color) if color == first => (state, None),
            Some(color) => (
                PaletteState::Idle,
                Some((
                    program,
                    COLOR_TABLE[first as usize],
                    COLOR_TABLE[color as usize],
                )),
            ),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShowConfig;

    #[derive(Default)]
    struct RecordingPalette {
        solids: Mutex<Vec<(u8, u32)>>,
        gradients: Mutex<Vec<(u8, u32, u32)>>,
    }

    impl ColorPalette for RecordingPalette {
        fn set_color(&self, program: u8, color: u32) {
            self.solids.lock().push((program, color));
        }
        fn set_gradient_color(&self, program: u8, start: u32, end: u32) {
            self.gradients.lock().push((program, start, end));
        }
    }

    struct Fixture {
        script: Sender<RawChannelMessage>,
        palette: Arc<RecordingPalette>,
        config: ConfigHandle,
        midi: MidiInput,
    }

    fn fixture(separate_thread: bool) -> Fixture {
        let mut config = ShowConfig::default();
        config.midi.separate_thread = separate_thread;
        let config = ConfigHandle::new(config);
        let (script, backend) = ScriptedBackend::new();
        let palette = Arc::new(RecordingPalette::default());
        let midi = MidiInput::new(
            config.clone(),
            Arc::new(backend),
            palette.clone() as Arc<dyn ColorPalette>,
        );
        Fixture {
            script,
            palette,
            config,
            midi,
        }
    }

    fn knob(index: u8, data2: u8) -> RawChannelMessage {
        RawChannelMessage {
            command: ChannelCommand::Controller,
            data1: index,
            data2,
        }
    }

    fn note_on(index: u8, data2: u8) -> RawChannelMessage {
        RawChannelMessage {
            command: ChannelCommand::NoteOn,
            data1: index,
            data2,
        }
    }

    fn note_off(index: u8) -> RawChannelMessage {
        RawChannelMessage {
            command: ChannelCommand::NoteOff,
            data1: index,
            data2: 0,
        }
    }

    fn program(index: u8) -> RawChannelMessage {
        RawChannelMessage {
            command: ChannelCommand::ProgramChange,
            data1: index,
            data2: 0,
        }
    }

    #[test]
    fn decodes_the_known_command_kinds() {
        let decoded = decode(knob(1, 64)).unwrap();
        assert_eq!(
            decoded,
            MidiCommand::Knob {
                index: 1,
                value: 64.0 / 127.0,
            }
        );
        assert!((decoded.value() - 0.5039).abs() < 1e-4);

        assert_eq!(
            decode(note_on(60, 127)),
            Some(MidiCommand::Note {
                index: 60,
                velocity: 1.0,
            })
        );
        assert_eq!(
            decode(note_off(60)),
            Some(MidiCommand::Note {
                index: 60,
                velocity: 0.0,
            })
        );
        assert_eq!(
            decode(program(3)),
            Some(MidiCommand::Program { index: 3 })
        );
        assert_eq!(
            decode(RawChannelMessage {
                command: ChannelCommand::Other,
                data1: 0,
                data2: 0,
            }),
            None
        );
    }

    #[test]
    fn bindings_track_latest_knob_and_note_state() {
        let fx = fixture(false);
        fx.midi.handle_message(knob(5, 127));
        fx.midi.handle_message(note_on(60, 127));
        fx.midi.handle_message(note_off(60));

        assert_eq!(fx.midi.knob_value(5), Some(1.0));
        assert_eq!(fx.midi.knob_value(6), None);
        assert_eq!(fx.midi.note_velocity(60), 0.0);
        assert_eq!(fx.midi.note_velocity(61), 0.0);
    }

    #[test]
    fn two_distinct_colors_commit_one_gradient() {
        let fx = fixture(false);
        fx.midi.handle_message(program(5));
        fx.midi.handle_message(note_on(64, 127));
        fx.midi.handle_message(note_on(65, 127));

        assert_eq!(
            *fx.palette.gradients.lock(),
            vec![(5, COLOR_TABLE[0], COLOR_TABLE[1])]
        );
        assert_eq!(fx.midi.palette_state(), PaletteState::Idle);
    }

    #[test]
    fn a_knob_cancels_the_pick_in_progress() {
        let fx = fixture(false);
        fx.midi.handle_message(program(5));
        fx.midi.handle_message(note_on(64, 127));
        fx.midi.handle_message(knob(9, 40));
        fx.midi.handle_message(note_on(65, 127));

        assert!(fx.palette.gradients.lock().is_empty());
        assert_eq!(fx.midi.palette_state(), PaletteState::Idle);
    }

    #[test]
    fn releasing_the_held_key_backs_out_one_step() {
        let fx = fixture(false);
        fx.midi.handle_message(program(2));
        fx.midi.handle_message(note_on(70, 100));
        fx.midi.handle_message(note_off(70));

        assert_eq!(fx.midi.palette_state(), PaletteState::ProgramSelected(2));
        assert!(fx.palette.gradients.lock().is_empty());

        // A repeat press of the same key changes nothing.
        fx.midi.handle_message(note_on(70, 100));
        fx.midi.handle_message(note_on(70, 100));
        assert_eq!(
            fx.midi.palette_state(),
            PaletteState::FirstColorChosen(2, 6)
        );
        assert!(fx.palette.gradients.lock().is_empty());
    }

    #[test]
    fn notes_outside_the_color_range_reset_to_idle() {
        let fx = fixture(false);
        fx.midi.handle_message(program(1));
        fx.midi.handle_message(note_on(89, 127));
        assert_eq!(fx.midi.palette_state(), PaletteState::Idle);

        fx.midi.handle_message(program(1));
        fx.midi.handle_message(note_on(64, 127));
        fx.midi.handle_message(note_on(63, 127));
        assert_eq!(fx.midi.palette_state(), PaletteState::Idle);
        assert!(fx.palette.gradients.lock().is_empty());
    }

    #[test]
    fn notes_while_idle_do_nothing() {
        let fx = fixture(false);
        fx.midi.handle_message(note_on(64, 127));
        assert_eq!(fx.midi.palette_state(), PaletteState::Idle);
        assert!(fx.palette.gradients.lock().is_empty());
    }

    #[test]
    fn knob_one_drives_max_brightness() {
        let fx = fixture(false);
        fx.midi.handle_message(knob(1, 127));
        assert_eq!(fx.config.max_brightness(), 1.0);
        fx.midi.handle_message(knob(1, 0));
        assert_eq!(fx.config.max_brightness(), 0.0);
    }

    #[test]
    fn inline_drain_consumes_the_buffer() {
        let fx = fixture(false);
        fx.midi.set_active(true).unwrap();
        fx.script.send(knob(5, 127)).unwrap();
        fx.script.send(note_on(60, 127)).unwrap();

        fx.midi.operator_update().unwrap();
        let snapshot = fx.midi.commands_since_last_tick();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].kind(), CommandKind::Knob);
        assert_eq!(snapshot[1].kind(), CommandKind::Note);

        // No new traffic: the second drain is empty, never a peek.
        fx.midi.operator_update().unwrap();
        assert!(fx.midi.commands_since_last_tick().is_empty());

        fx.midi.set_active(false).unwrap();
    }

    #[test]
    fn failing_pump_still_swaps_a_fresh_snapshot() {
        struct DeadPort;

        impl MidiPort for DeadPort {
            fn poll(&mut self, _timeout: Duration) -> Result<Option<RawChannelMessage>> {
                Err(crate::ShowError::device("controller unplugged"))
            }
        }

        struct DeadBackend;

        impl MidiBackend for DeadBackend {
            fn open(&self, _device_index: usize) -> Result<Box<dyn MidiPort>> {
                Ok(Box::new(DeadPort))
            }
        }

        let mut config = ShowConfig::default();
        config.midi.separate_thread = false;
        let config = ConfigHandle::new(config);
        let palette = Arc::new(RecordingPalette::default());
        let midi = MidiInput::new(
            config,
            Arc::new(DeadBackend),
            palette as Arc<dyn ColorPalette>,
        );
        midi.set_active(true).unwrap();

        // A command delivered before the port died is still drained into the
        // snapshot even though the pump reports the failure.
        midi.handle_message(note_on(60, 127));
        assert!(midi.operator_update().is_err());
        assert_eq!(midi.commands_since_last_tick().len(), 1);

        // The next tick fails the same way but must not re-expose the
        // previous tick's commands.
        assert!(midi.operator_update().is_err());
        assert!(midi.commands_since_last_tick().is_empty());

        midi.set_active(false).unwrap();
    }

    #[test]
    fn threaded_pump_delivers_and_stops_cooperatively() {
        let fx = fixture(true);
        fx.midi.set_active(true).unwrap();
        assert!(fx.midi.is_active());

        fx.script.send(note_on(60, 127)).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while fx.midi.note_velocity(60) == 0.0 {
            assert!(std::time::Instant::now() < deadline, "pump never delivered");
            thread::sleep(Duration::from_millis(5));
        }

        fx.midi.set_active(false).unwrap();
        assert!(!fx.midi.is_active());
    }

    #[test]
    fn activation_is_idempotent() {
        let fx = fixture(false);
        fx.midi.set_active(true).unwrap();
        fx.midi.set_active(true).unwrap();
        fx.midi.set_active(false).unwrap();
        fx.midi.set_active(false).unwrap();
    }
}
