//! Device boundary for MIDI ports.
//!
//! The core only needs two things from a backend: open a port by index, and
//! poll it with a bounded timeout so pump threads can observe their stop
//! flag. Concrete transports live behind these traits; the `hardware` cargo
//! feature supplies a `midir`-backed implementation.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use super::RawChannelMessage;
use crate::Result;

/// An open MIDI port. `poll` must return within roughly the given timeout so
/// that shutdown cannot hang on a quiet device.
pub trait MidiPort: Send {
    fn poll(&mut self, timeout: Duration) -> Result<Option<RawChannelMessage>>;
}

/// Factory for MIDI ports. Injected into `MidiInput` so tests and the demo
/// app can substitute a scripted device.
pub trait MidiBackend: Send + Sync {
    fn open(&self, device_index: usize) -> Result<Box<dyn MidiPort>>;
}

/// Backend that replays messages pushed through a channel. Used by tests and
/// by the demo app when no hardware is attached.
pub struct ScriptedBackend {
    messages: Receiver<RawChannelMessage>,
}

impl ScriptedBackend {
    /// Returns the feeding side of the script alongside the backend.
    pub fn new() -> (Sender<RawChannelMessage>, Self) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (sender, Self { messages: receiver })
    }
}

impl MidiBackend for ScriptedBackend {
    fn open(&self, _device_index: usize) -> Result<Box<dyn MidiPort>> {
        Ok(Box::new(ScriptedPort {
            messages: self.messages.clone(),
        }))
    }
}

struct ScriptedPort {
    messages: Receiver<RawChannelMessage>,
}

impl MidiPort for ScriptedPort {
    fn poll(&mut self, timeout: Duration) -> Result<Option<RawChannelMessage>> {
        match self.messages.recv_timeout(timeout) {
            Ok(message) => Ok(Some(message)),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                Ok(None)
            }
        }
    }
}

#[cfg(feature = "hardware")]
pub mod hardware {
    //! `midir`-backed port. The midir callback thread forwards parsed
    //! channel messages into a channel the port polls from, so the pump
    //! thread keeps the same bounded-poll shape as every other backend.

    use std::time::Duration;

    use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

    use super::{MidiBackend, MidiPort};
    use crate::{
        midi::{ChannelCommand, RawChannelMessage},
        Result, ShowError,
    };

    pub struct MidirBackend {
        client_name: String,
    }

    impl MidirBackend {
        pub fn new() -> Self {
            Self {
                client_name: "lightshow".to_string(),
            }
        }
    }

    impl Default for MidirBackend {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MidiBackend for MidirBackend {
        fn open(&self, device_index: usize) -> Result<Box<dyn MidiPort>> {
            let input = midir::MidiInput::new(&self.client_name)
                .map_err(|err| ShowError::device(err.to_string()))?;
            let ports = input.ports();
            let port = ports.get(device_index).ok_or_else(|| {
                ShowError::device(format!("no midi port at index {device_index}"))
            })?;
            let (sender, receiver) = crossbeam_channel::unbounded();
            let connection = input
                .connect(
                    port,
                    "lightshow-in",
                    move |_timestamp, bytes, sender: &mut Sender<RawChannelMessage>| {
                        if let Some(message) = parse_bytes(bytes) {
                            let _ = sender.send(message);
                        }
                    },
                    sender,
                )
                .map_err(|err| ShowError::device(err.to_string()))?;
            Ok(Box::new(MidirPort {
                messages: receiver,
                _connection: connection,
            }))
        }
    }

    struct MidirPort {
        messages: Receiver<RawChannelMessage>,
        _connection: midir::MidiInputConnection<Sender<RawChannelMessage>>,
    }

    impl MidiPort for MidirPort {
        fn poll(&mut self, timeout: Duration) -> Result<Option<RawChannelMessage>> {
            match self.messages.recv_timeout(timeout) {
                Ok(message) => Ok(Some(message)),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    Ok(None)
                }
            }
        }
    }

    /// Lists the names of the MIDI ports currently visible to midir.
    pub fn list_ports() -> Result<Vec<String>> {
        let input = midir::MidiInput::new("lightshow-probe")
            .map_err(|err| ShowError::device(err.to_string()))?;
        Ok(input
            .ports()
            .iter()
            .map(|port| input.port_name(port).unwrap_or_default())
            .collect())
    }

    fn parse_bytes(bytes: &[u8]) -> Option<RawChannelMessage> {
        let status = *bytes.first()?;
        let command = match status & 0xF0 {
            0xB0 => ChannelCommand::Controller,
            0x90 => ChannelCommand::NoteOn,
            0x80 => ChannelCommand::NoteOff,
            0xC0 => ChannelCommand::ProgramChange,
            _ => ChannelCommand::Other,
        };
        Some(RawChannelMessage {
            command,
            data1: bytes.get(1).copied().unwrap_or(0),
            data2: bytes.get(2).copied().unwrap_or(0),
        })
    }
}
