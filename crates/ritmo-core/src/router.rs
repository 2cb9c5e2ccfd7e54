//! The router: runs every processor once per cycle in dependency order.
//!
//! Ordering is a depth-first pull from each channel's fader: a node's
//! sources run before the node itself. Feedback edges were flagged when
//! connected, so the traversal never revisits a node and never recurses on
//! the Rust stack.

use crate::midi::MidiEvent;
use crate::mixer::Mixer;
use crate::port::{PortBuffer, PortId, PortTable};
use crate::processor::{ProcessContext, PortIo, ProcessorId, ProcessorKind};

enum Visit {
    /// Schedule a node: push its unprocessed sources, then its execution.
    Enter(ProcessorId),
    /// Run the node; all sources have run.
    Exec(ProcessorId),
}

/// Reusable traversal state. Scratch buffers are warmed on first use so the
/// steady-state cycle does not allocate.
pub struct Router {
    stack: Vec<Visit>,
    visiting: Vec<bool>,
    deps: Vec<ProcessorId>,
    in_scratch: Vec<PortBuffer>,
    out_scratch: Vec<PortBuffer>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    /// Creates a router with empty scratch state.
    pub fn new() -> Self {
        Self {
            stack: Vec::new(),
            visiting: Vec::new(),
            deps: Vec::new(),
            in_scratch: Vec::new(),
            out_scratch: Vec::new(),
        }
    }

    /// Runs one block. Every enabled processor executes exactly once;
    /// disabled ones are skipped and their outputs stay silent.
    pub fn process(&mut self, mixer: &mut Mixer, ports: &mut PortTable, ctx: &ProcessContext) {
        let slots = mixer.node_slots();
        self.visiting.clear();
        self.visiting.resize(slots, false);

        // Pull each channel's fader; that reaches everything upstream.
        // Channels in creation order keeps the schedule deterministic.
        let faders: Vec<ProcessorId> = mixer.channels().map(|ch| ch.fader()).collect();
        for fader in faders {
            self.run_from(mixer, ports, ctx, fader);
        }
        // Sweep anything unreachable from a fader (detached sources).
        for slot in 0..slots {
            let id = ProcessorId(slot as u32);
            if mixer.node(id).is_some_and(|n| !n.processed) {
                self.run_from(mixer, ports, ctx, id);
            }
        }
    }

    fn run_from(
        &mut self,
        mixer: &mut Mixer,
        ports: &mut PortTable,
        ctx: &ProcessContext,
        root: ProcessorId,
    ) {
        self.stack.push(Visit::Enter(root));
        while let Some(visit) = self.stack.pop() {
            match visit {
                Visit::Enter(id) => {
                    let Some(node) = mixer.node(id) else { continue };
                    if node.processed || self.visiting[id.0 as usize] {
                        continue;
                    }
                    self.visiting[id.0 as usize] = true;
                    self.stack.push(Visit::Exec(id));
                    self.deps.clear();
                    collect_sources(ports, &node.inputs, &mut self.deps);
                    for dep in self.deps.drain(..) {
                        self.stack.push(Visit::Enter(dep));
                    }
                }
                Visit::Exec(id) => {
                    self.exec(mixer, ports, ctx, id);
                    self.visiting[id.0 as usize] = false;
                }
            }
        }
    }

    fn exec(
        &mut self,
        mixer: &mut Mixer,
        ports: &mut PortTable,
        ctx: &ProcessContext,
        id: ProcessorId,
    ) {
        let Some(node) = mixer.node_mut(id) else {
            return;
        };
        for port in &node.inputs {
            ports.pull(*port);
        }
        if node.enabled {
            match &mut node.kind {
                ProcessorKind::Passthrough => {
                    for (src, dst) in node.inputs.iter().zip(node.outputs.iter()) {
                        ports.map_samples(*src, *dst, |x| x);
                    }
                }
                ProcessorKind::Fader(fader) => {
                    let amp = fader.amp();
                    for (src, dst) in node.inputs.iter().zip(node.outputs.iter()) {
                        ports.map_samples(*src, *dst, |x| x * amp);
                    }
                }
                ProcessorKind::Custom(processor) => {
                    for port in &node.inputs {
                        if let Some(p) = ports.get_mut(*port) {
                            self.in_scratch.push(std::mem::take(&mut p.buffer));
                        }
                    }
                    for port in &node.outputs {
                        if let Some(p) = ports.get_mut(*port) {
                            self.out_scratch.push(std::mem::take(&mut p.buffer));
                        }
                    }
                    let mut io = PortIo {
                        inputs: self.in_scratch.as_slice(),
                        outputs: self.out_scratch.as_mut_slice(),
                    };
                    if let Err(fault) = processor.process(ctx, &mut io) {
                        tracing::warn!(
                            processor = %processor.name(),
                            "{fault}; output silenced for this block"
                        );
                        for buffer in self.out_scratch.iter_mut() {
                            buffer.clear();
                        }
                    }
                    node.latency = processor.latency();
                    for port in node.inputs.iter().rev() {
                        if let (Some(p), Some(buffer)) =
                            (ports.get_mut(*port), self.in_scratch.pop())
                        {
                            p.buffer = buffer;
                        }
                    }
                    for port in node.outputs.iter().rev() {
                        if let (Some(p), Some(buffer)) =
                            (ports.get_mut(*port), self.out_scratch.pop())
                        {
                            p.buffer = buffer;
                        }
                    }
                }
            }
        }
        node.processed = true;
        for port in &node.outputs {
            ports.push_feedback(*port);
        }
    }
}

/// Appends the owners of every non-feedback source feeding `inputs`.
fn collect_sources(ports: &PortTable, inputs: &[PortId], out: &mut Vec<ProcessorId>) {
    for input in inputs {
        let Some(port) = ports.get(*input) else {
            continue;
        };
        for source in ports.sources_of(port) {
            if !out.contains(&source) {
                out.push(source);
            }
        }
    }
}

/// A MIDI ingestion helper shared by engine and tests: appends decoded
/// events to a port's buffer, respecting its capacity.
pub fn deliver_midi(ports: &mut PortTable, port: PortId, events: &[MidiEvent]) {
    let Some(p) = ports.get_mut(port) else {
        return;
    };
    let buffer = p.buffer.events_mut();
    let room = crate::port::MIDI_EVENTS_CAPACITY.saturating_sub(buffer.len());
    if events.len() > room {
        tracing::warn!(
            dropped = events.len() - room,
            "MIDI buffer full, dropping events"
        );
    }
    buffer.extend(events.iter().take(room).copied());
}
