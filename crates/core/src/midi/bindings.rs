//! Ordered publish/subscribe table keyed by (command kind, index).
//!
//! Stateful controller behaviors are built as compositions of bindings; the
//! palette picker in the parent module is the canonical example.

use std::collections::HashMap;

use super::MidiCommand;

/// The kind half of a binding key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Knob,
    Note,
    Program,
}

/// A binding key: a command kind plus an optional index. `index: None` is
/// the wildcard and matches every command of the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingKey {
    pub kind: CommandKind,
    pub index: Option<u8>,
}

impl BindingKey {
    pub fn wildcard(kind: CommandKind) -> Self {
        Self { kind, index: None }
    }

    pub fn exact(kind: CommandKind, index: u8) -> Self {
        Self {
            kind,
            index: Some(index),
        }
    }
}

type Callback = Box<dyn FnMut(u8, f64) + Send>;

/// Dynamic callback registry. Dispatch for one command invokes every
/// wildcard binding of its kind before any exact-index binding, preserving
/// registration order within each group.
#[derive(Default)]
pub struct BindingRegistry {
    bindings: HashMap<BindingKey, Vec<Callback>>,
}

impl BindingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a wildcard binding for every command of `kind`.
    pub fn bind<F>(&mut self, kind: CommandKind, callback: F)
    where
        F: FnMut(u8, f64) + Send + 'static,
    {
        self.insert(BindingKey::wildcard(kind), Box::new(callback));
    }

    /// Registers a binding for commands of `kind` at exactly `index`.
    pub fn bind_index<F>(&mut self, kind: CommandKind, index: u8, callback: F)
    where
        F: FnMut(u8, f64) + Send + 'static,
    {
        self.insert(BindingKey::exact(kind, index), Box::new(callback));
    }

    fn insert(&mut self, key: BindingKey, callback: Callback) {
        self.bindings.entry(key).or_default().push(callback);
    }

    /// Synchronously invokes every binding matching the command: wildcard
    /// bindings first, then exact-index bindings.
    pub fn dispatch(&mut self, command: &MidiCommand) {
        let kind = command.kind();
        let index = command.index();
        let value = command.value();
        for key in [BindingKey::wildcard(kind), BindingKey::exact(kind, index)] {
            if let Some(callbacks) = self.bindings.get_mut(&key) {
                for callback in callbacks.iter_mut() {
                    callback(index, value);
                }
            }
        }
    }
}

impl std::fmt::Debug for BindingRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingRegistry")
            .field("keys", &self.bindings.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    fn record(log: &Arc<Mutex<Vec<String>>>, tag: &str) -> impl FnMut(u8, f64) + Send {
        let log = Arc::clone(log);
        let tag = tag.to_string();
        move |index, value| log.lock().push(format!("{tag}:{index}:{value:.2}"))
    }

    #[test]
    fn wildcard_dispatches_before_exact_index() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = BindingRegistry::new();
        registry.bind_index(CommandKind::Knob, 7, record(&log, "exact"));
        registry.bind(CommandKind::Knob, record(&log, "wild"));

        registry.dispatch(&MidiCommand::Knob {
            index: 7,
            value: 1.0,
        });

        assert_eq!(
            *log.lock(),
            vec!["wild:7:1.00".to_string(), "exact:7:1.00".to_string()]
        );
    }

    #[test]
    fn registration_order_is_preserved_within_a_key() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = BindingRegistry::new();
        registry.bind(CommandKind::Note, record(&log, "a"));
        registry.bind(CommandKind::Note, record(&log, "b"));

        registry.dispatch(&MidiCommand::Note {
            index: 3,
            velocity: 0.0,
        });

        assert_eq!(
            *log.lock(),
            vec!["a:3:0.00".to_string(), "b:3:0.00".to_string()]
        );
    }

    #[test]
    fn other_kinds_and_indices_stay_silent() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = BindingRegistry::new();
        registry.bind_index(CommandKind::Knob, 1, record(&log, "knob1"));

        registry.dispatch(&MidiCommand::Knob {
            index: 2,
            value: 0.5,
        });
        registry.dispatch(&MidiCommand::Note {
            index: 1,
            velocity: 0.5,
        });
        registry.dispatch(&MidiCommand::Program { index: 1 });

        assert!(log.lock().is_empty());
    }
}
