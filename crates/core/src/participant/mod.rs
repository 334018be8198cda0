//! The three capability contracts the operator arbitrates between.
//!
//! Concrete devices and effects are injected behind these traits; the
//! operator never enumerates them. Participants are long-lived objects shared
//! as `Arc<dyn ...>` and compared by identity, so a visualizer's declared
//! input must be a clone of the very `Arc` the operator owns.

use std::sync::Arc;

use crate::Result;

/// An input represents a device that feeds data into the show: the audio
/// spectrum, a MIDI controller, and so on.
///
/// A visualizer holds a reference to the specific input object it reads, so
/// only the methods needed for basic maintenance of the device live here.
pub trait Input: Send + Sync {
    /// Whether the input is currently being serviced. While active, either a
    /// background thread is pumping the device or the operator polls it
    /// inline each tick.
    fn is_active(&self) -> bool;

    /// Transitions the input in or out of the active state. Activation may
    /// fail with [`crate::ShowError::DeviceUnavailable`]; the input then
    /// stays enabled but inactive.
    fn set_active(&self, active: bool) -> Result<()>;

    /// An always-active input runs whenever it is enabled, independent of
    /// visualizer demand. Used for devices that must never miss an event.
    fn always_active(&self) -> bool {
        false
    }

    /// Whether the input is turned on by external configuration. The
    /// operator only ever reads this.
    fn is_enabled(&self) -> bool;

    /// Called once per tick from the operator thread while the input is
    /// active. Pulls buffered device data into a per-tick snapshot; may be a
    /// no-op if the device is serviced entirely on its own thread.
    fn operator_update(&self) -> Result<()>;
}

/// An output represents a physical device frames are flushed to: an LED rig,
/// a lighting hub, a pyro controller.
pub trait Output: Send + Sync {
    /// Whether the output is turned on by external configuration.
    fn is_enabled(&self) -> bool;

    /// Set every tick by the operator: true iff at least one visualizer was
    /// selected for this output.
    fn set_active(&self, active: bool) -> Result<()>;

    /// The visualizers registered against this output. These compete for the
    /// output every tick.
    fn visualizers(&self) -> Vec<Arc<dyn Visualizer>>;

    /// Called once per tick while active to flush the rendered frame to the
    /// device.
    fn operator_update(&self) -> Result<()>;
}

/// A visualizer turns input data into frames on one or more outputs.
pub trait Visualizer: Send + Sync {
    /// Set every tick by the operator: true iff the visualizer won
    /// arbitration for some output this tick.
    fn set_enabled(&self, enabled: bool);

    /// Competitive rank for arbitration. `-1` is a sentinel meaning "always
    /// run if my inputs are enabled", exempt from the priority contest.
    fn priority(&self) -> i32;

    /// The inputs this visualizer requires. It is only a candidate on an
    /// output when every one of them reports enabled.
    fn inputs(&self) -> Vec<Arc<dyn Input>>;

    /// Called once per tick while selected to compute a frame and hand it to
    /// the output(s).
    fn visualize(&self) -> Result<()>;
}

/// Identity membership test for participant sets.
pub(crate) fn contains<T: ?Sized>(set: &[Arc<T>], item: &Arc<T>) -> bool {
    set.iter().any(|candidate| Arc::ptr_eq(candidate, item))
}

/// Identity-deduplicating insertion for participant sets.
pub(crate) fn push_unique<T: ?Sized>(set: &mut Vec<Arc<T>>, item: &Arc<T>) {
    if !contains(set, item) {
        set.push(Arc::clone(item));
    }
}
