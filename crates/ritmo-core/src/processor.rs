//! The processor trait and per-node bookkeeping.

use crate::builtin::Fader;
use crate::midi::MidiEvent;
use crate::port::{PortBuffer, PortId};

/// Identifier for a processor. Sequential, never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProcessorId(pub(crate) u32);

impl ProcessorId {
    /// Returns the raw index of this processor.
    pub fn index(self) -> u32 {
        self.0
    }
}

/// A recoverable failure inside a processor's `process` call.
///
/// The router logs the fault, silences the node's outputs for the block and
/// keeps the cycle going; a bad plugin must never take the stream down.
#[derive(Debug, thiserror::Error)]
#[error("processor fault: {0}")]
pub struct ProcessorFault(pub String);

/// Per-block timing information handed to every processor.
#[derive(Clone, Copy, Debug)]
pub struct ProcessContext {
    /// Frames in this block.
    pub n_frames: usize,
    /// Engine sample rate in Hz.
    pub sample_rate: u32,
    /// Timeline position of the first frame in this block.
    pub playhead_frames: u64,
    /// Whether the transport is rolling this block.
    pub rolling: bool,
    /// Frames per timeline tick at the current tempo.
    pub frames_per_tick: f64,
    /// Current tempo in beats per minute.
    pub bpm: f64,
}

/// Borrowed views of a processor's port buffers for one block.
///
/// Inputs have already been pulled (fan-in summed) by the router; outputs
/// start silent and hold whatever the processor writes.
pub struct PortIo<'a> {
    /// Input buffers, in port registration order.
    pub inputs: &'a [PortBuffer],
    /// Output buffers, in port registration order.
    pub outputs: &'a mut [PortBuffer],
}

impl PortIo<'_> {
    /// Returns the samples of the `n`-th input.
    ///
    /// # Panics
    ///
    /// Panics if the input does not exist or is not a sample port.
    pub fn audio_in(&self, n: usize) -> &[f32] {
        self.inputs[n].samples()
    }

    /// Returns the samples of the `n`-th output.
    ///
    /// # Panics
    ///
    /// Panics if the output does not exist or is not a sample port.
    pub fn audio_out(&mut self, n: usize) -> &mut [f32] {
        self.outputs[n].samples_mut()
    }

    /// Returns the events of the `n`-th input.
    ///
    /// # Panics
    ///
    /// Panics if the input does not exist or is not a MIDI port.
    pub fn midi_in(&self, n: usize) -> &[MidiEvent] {
        self.inputs[n].events()
    }

    /// Returns the event buffer of the `n`-th output.
    ///
    /// # Panics
    ///
    /// Panics if the output does not exist or is not a MIDI port.
    pub fn midi_out(&mut self, n: usize) -> &mut Vec<MidiEvent> {
        self.outputs[n].events_mut()
    }

    /// Returns a pair of output sample buffers. Used by stereo generators.
    ///
    /// # Panics
    ///
    /// Panics if `a == b`, either output does not exist or either is not a
    /// sample port.
    pub fn audio_out_pair(&mut self, a: usize, b: usize) -> (&mut [f32], &mut [f32]) {
        assert_ne!(a, b);
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        let (head, tail) = self.outputs.split_at_mut(hi);
        let first = head[lo].samples_mut();
        let second = tail[0].samples_mut();
        if a < b { (first, second) } else { (second, first) }
    }
}

/// A unit of signal processing placed in the graph.
///
/// Processors declare their I/O when added to the mixer and receive exactly
/// one `process` call per cycle. They must not allocate or block inside
/// `process`.
pub trait Processor: Send {
    /// Display name, used in logs.
    fn name(&self) -> &str;

    /// Renders one block. Inputs are pre-summed; outputs start silent.
    fn process(&mut self, ctx: &ProcessContext, io: &mut PortIo<'_>) -> Result<(), ProcessorFault>;

    /// Current processing delay in frames. May change after `process`.
    fn latency(&self) -> usize {
        0
    }

    /// Called when the engine sample rate changes.
    fn set_sample_rate(&mut self, _rate: u32) {}

    /// Called when the engine block length changes.
    fn set_block_length(&mut self, _frames: usize) {}

    /// Drops all internal state (voices, delay lines, meters).
    fn reset(&mut self) {}
}

/// How a graph node produces its output.
pub enum ProcessorKind {
    /// Copies each input buffer to the matching output. Used for channel
    /// input stages, which exist to give fan-in a summing point.
    Passthrough,
    /// Applies a channel fader's gain.
    Fader(Fader),
    /// Runs user code behind the [`Processor`] trait.
    Custom(Box<dyn Processor>),
}

/// A processor installed in the graph, with its ports and per-cycle flags.
pub(crate) struct ProcessorNode {
    pub id: ProcessorId,
    pub name: String,
    pub kind: ProcessorKind,
    pub inputs: Vec<PortId>,
    pub outputs: Vec<PortId>,
    /// Set once the node has run this cycle.
    pub processed: bool,
    /// Disabled nodes are skipped and emit silence.
    pub enabled: bool,
    /// Last reported latency in frames.
    pub latency: usize,
}

impl ProcessorNode {
    pub(crate) fn new(id: ProcessorId, name: String, kind: ProcessorKind) -> Self {
        Self {
            id,
            name,
            kind,
            inputs: Vec::new(),
            outputs: Vec::new(),
            processed: false,
            enabled: true,
            latency: 0,
        }
    }
}
