//! The per-tick scheduling loop coordinating inputs, outputs and
//! visualizers.
//!
//! Every tick the operator recomputes, from scratch, which visualizers get to
//! drive which outputs, then runs the strict sequence
//! arbitrate → drain inputs → visualize → flush outputs on a single thread.
//! No arbitration decision persists across ticks.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use parking_lot::Mutex;

use crate::{
    config::ConfigHandle,
    participant::{contains, push_unique, Input, Output, Visualizer},
};

/// Owns every input, output and visualizer for the process lifetime and runs
/// the tick loop while enabled.
pub struct Operator {
    shared: Arc<Shared>,
    state: Mutex<LoopState>,
}

struct Shared {
    config: ConfigHandle,
    inputs: Vec<Arc<dyn Input>>,
    outputs: Vec<Arc<dyn Output>>,
    visualizers: Vec<Arc<dyn Visualizer>>,
}

#[derive(Default)]
struct LoopState {
    thread: Option<JoinHandle<()>>,
    stop: Option<Arc<AtomicBool>>,
}

impl Operator {
    pub fn new(
        config: ConfigHandle,
        inputs: Vec<Arc<dyn Input>>,
        outputs: Vec<Arc<dyn Output>>,
        visualizers: Vec<Arc<dyn Visualizer>>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                inputs,
                outputs,
                visualizers,
            }),
            state: Mutex::new(LoopState::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().thread.is_some()
    }

    /// Starts or stops the tick loop. Stopping signals the loop thread
    /// cooperatively, waits for it to exit, then forces every input and
    /// output inactive so device handles are released.
    pub fn set_enabled(&self, enabled: bool) {
        let mut state = self.state.lock();
        if enabled == state.thread.is_some() {
            return;
        }
        if enabled {
            let stop = Arc::new(AtomicBool::new(false));
            let shared = Arc::clone(&self.shared);
            let flag = Arc::clone(&stop);
            state.thread = Some(thread::spawn(move || run_loop(shared, flag)));
            state.stop = Some(stop);
        } else {
            if let Some(stop) = state.stop.take() {
                stop.store(true, Ordering::Relaxed);
            }
            if let Some(thread) = state.thread.take() {
                if thread.join().is_err() {
                    tracing::error!("operator thread panicked");
                }
            }
            for input in &self.shared.inputs {
                if let Err(err) = input.set_active(false) {
                    tracing::warn!(%err, "input refused deactivation");
                }
            }
            for output in &self.shared.outputs {
                if let Err(err) = output.set_active(false) {
                    tracing::warn!(%err, "output refused deactivation");
                }
            }
        }
    }

    /// Disables then re-enables the loop, re-arbitrating from a clean state.
    /// Used after a configuration change such as a port reassignment.
    pub fn reboot(&self) {
        if self.is_enabled() {
            self.set_enabled(false);
            self.set_enabled(true);
        }
    }

    /// Runs exactly one tick synchronously on the calling thread. Intended
    /// for tests and for driving the operator without its own thread.
    pub fn step(&self) {
        self.shared.tick();
    }
}

fn run_loop(shared: Arc<Shared>, stop: Arc<AtomicBool>) {
    let mut pace = Instant::now();
    let mut window = Instant::now();
    let mut frames: u32 = 0;
    while !stop.load(Ordering::Relaxed) {
        let min_tick = shared.config.min_tick();
        let elapsed = pace.elapsed();
        if elapsed < min_tick {
            thread::sleep(min_tick - elapsed);
        }
        pace = Instant::now();

        if window.elapsed() >= Duration::from_secs(1) {
            window = Instant::now();
            shared.config.set_operator_fps(frames);
            frames = 0;
        }
        frames += 1;

        shared.tick();
    }
}

impl Shared {
    fn tick(&self) {
        let plan = plan_tick(&self.outputs);

        for output in &self.outputs {
            let active = contains(&plan.outputs, output);
            if let Err(err) = output.set_active(active) {
                tracing::warn!(%err, "output activation failed, skipping");
            }
        }
        for visualizer in &self.visualizers {
            visualizer.set_enabled(contains(&plan.visualizers, visualizer));
        }
        for input in &self.inputs {
            let active = (input.is_enabled() && input.always_active())
                || contains(&plan.inputs, input);
            if let Err(err) = input.set_active(active) {
                tracing::warn!(%err, "input activation failed, skipping");
            }
        }

        for input in &self.inputs {
            if !input.is_active() {
                continue;
            }
            if let Err(err) = input.operator_update() {
                tracing::warn!(%err, "input update failed, skipping for this tick");
            }
        }
        for visualizer in &plan.visualizers {
            if let Err(err) = visualizer.visualize() {
                tracing::warn!(%err, "visualizer failed, skipping for this tick");
            }
        }
        for output in &plan.outputs {
            if let Err(err) = output.operator_update() {
                tracing::warn!(%err, "output flush failed, skipping for this tick");
            }
        }
    }
}

/// Result of one round of arbitration: the outputs that will flush, the
/// visualizers that will render, and the inputs those visualizers demand.
#[derive(Default)]
struct TickPlan {
    outputs: Vec<Arc<dyn Output>>,
    visualizers: Vec<Arc<dyn Visualizer>>,
    inputs: Vec<Arc<dyn Input>>,
}

/// Per enabled output: discard visualizers whose required inputs are not all
/// enabled, then keep everyone at the observed maximum priority, plus every
/// priority `-1` visualizer.
///
/// The running top priority starts at 1 and only a strictly greater value
/// opens the top set; equality appends to an already-opened set. A priority
/// of exactly 1 therefore never runs — not even alone on its output. This
/// quirk is load-bearing for existing shows; see the regression test below
/// before changing it.
fn plan_tick(outputs: &[Arc<dyn Output>]) -> TickPlan {
    let mut plan = TickPlan::default();
    for output in outputs {
        if !output.is_enabled() {
            continue;
        }
        let mut top_pri = 1;
        let mut top: Vec<Arc<dyn Visualizer>> = Vec::new();
        let mut always: Vec<Arc<dyn Visualizer>> = Vec::new();
        for visualizer in output.visualizers() {
            let all_inputs_enabled =
                visualizer.inputs().iter().all(|input| input.is_enabled());
            if !all_inputs_enabled {
                continue;
            }
            let pri = visualizer.priority();
            if pri == -1 {
                always.push(visualizer);
            } else if pri > top_pri {
                top_pri = pri;
                top.clear();
                top.push(visualizer);
            } else if pri == top_pri && !top.is_empty() {
                // An empty top set means nothing has beaten the initial
                // threshold yet; matching it does not count.
                top.push(visualizer);
            }
        }
        top.append(&mut always);
        if top.is_empty() {
            continue;
        }
        plan.outputs.push(Arc::clone(output));
        for visualizer in &top {
            push_unique(&mut plan.visualizers, visualizer);
        }
    }
    for visualizer in &plan.visualizers {
        for input in visualizer.inputs() {
            push_unique(&mut plan.inputs, &input);
        }
    }
    plan
}
