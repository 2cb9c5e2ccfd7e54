//! The engine context: everything a cycle touches, behind one lock.

use crate::midi::MidiEvent;
use crate::mixer::Mixer;
use crate::pool::Pool;
use crate::port::{PortDirection, PortId, PortTable, PortType};
use crate::processor::ProcessContext;
use crate::router::{self, Router};
use crate::channel::{BounceStep, ChannelId};
use crate::transport::Transport;

/// Owns the port table, mixer, transport, pool and router, and runs the
/// per-cycle sequence. The audio callback and all topology edits go through
/// the same owner, so holding it is the engine's "port operation lock".
pub struct EngineContext {
    ports: PortTable,
    mixer: Mixer,
    transport: Transport,
    pool: Pool,
    router: Router,
    sample_rate: u32,
    block_len: usize,
    midi_in: PortId,
    stereo_in: (PortId, PortId),
    stereo_out: (PortId, PortId),
    master: ChannelId,
}

impl EngineContext {
    /// Creates a context with hardware-facing ports and a master channel.
    pub fn new(sample_rate: u32, block_len: usize) -> Self {
        let mut ports = PortTable::new(block_len);
        let midi_in = ports.register(None, PortDirection::Input, PortType::Midi, "engine midi in");
        let stereo_in = (
            ports.register(None, PortDirection::Input, PortType::Audio, "engine in L"),
            ports.register(None, PortDirection::Input, PortType::Audio, "engine in R"),
        );
        let stereo_out = (
            ports.register(None, PortDirection::Output, PortType::Audio, "engine out L"),
            ports.register(None, PortDirection::Output, PortType::Audio, "engine out R"),
        );
        let mut mixer = Mixer::new();
        let master = match mixer.add_master(&mut ports) {
            Ok(id) => id,
            // A fresh mixer always accepts a master.
            Err(_) => unreachable!(),
        };
        tracing::info!(sample_rate, block_len, "engine context created");
        Self {
            ports,
            mixer,
            transport: Transport::new(sample_rate),
            pool: Pool::new(),
            router: Router::new(),
            sample_rate,
            block_len,
            midi_in,
            stereo_in,
            stereo_out,
            master,
        }
    }

    /// Engine sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Frames per cycle.
    pub fn block_len(&self) -> usize {
        self.block_len
    }

    /// The hardware MIDI input port.
    pub fn midi_in(&self) -> PortId {
        self.midi_in
    }

    /// Hardware audio input ports `(left, right)`.
    pub fn stereo_in(&self) -> (PortId, PortId) {
        self.stereo_in
    }

    /// Hardware audio output ports `(left, right)`.
    pub fn stereo_out(&self) -> (PortId, PortId) {
        self.stereo_out
    }

    /// The master channel.
    pub fn master(&self) -> ChannelId {
        self.master
    }

    /// Port table access.
    pub fn ports(&self) -> &PortTable {
        &self.ports
    }

    /// Mutable port table access for topology edits.
    pub fn ports_mut(&mut self) -> &mut PortTable {
        &mut self.ports
    }

    /// Mixer access.
    pub fn mixer(&self) -> &Mixer {
        &self.mixer
    }

    /// Mutable mixer access for topology edits.
    pub fn mixer_mut(&mut self) -> &mut Mixer {
        &mut self.mixer
    }

    /// Splits the mixer and port table for edits that need both.
    pub fn mixer_and_ports_mut(&mut self) -> (&mut Mixer, &mut PortTable) {
        (&mut self.mixer, &mut self.ports)
    }

    /// Transport access.
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Mutable transport access.
    pub fn transport_mut(&mut self) -> &mut Transport {
        &mut self.transport
    }

    /// Audio pool access.
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Mutable audio pool access.
    pub fn pool_mut(&mut self) -> &mut Pool {
        &mut self.pool
    }

    /// Rebuilds buffers for a new block length. Causes a dropout; only
    /// called when the backend renegotiates.
    pub fn set_block_len(&mut self, block_len: usize) {
        if block_len == self.block_len {
            return;
        }
        tracing::info!(old = self.block_len, new = block_len, "block length changed");
        self.block_len = block_len;
        self.ports.resize(block_len);
        self.mixer.set_block_length(block_len);
    }

    /// Propagates a new sample rate. The playhead keeps its frame position.
    pub fn set_sample_rate(&mut self, rate: u32) {
        if rate == self.sample_rate {
            return;
        }
        tracing::info!(old = self.sample_rate, new = rate, "sample rate changed");
        self.sample_rate = rate;
        self.transport.set_sample_rate(rate);
        self.mixer.set_sample_rate(rate);
    }

    /// Runs one engine cycle:
    ///
    /// 1. apply pending transport requests,
    /// 2. silence every port,
    /// 3. ingest hardware input,
    /// 4. run the graph,
    /// 5. copy the master fader to the hardware outputs,
    /// 6. advance the playhead.
    ///
    /// Output slices longer than the block length are zero-padded.
    pub fn process_cycle(
        &mut self,
        midi: &[MidiEvent],
        audio_in: Option<(&[f32], &[f32])>,
        out_left: &mut [f32],
        out_right: &mut [f32],
    ) {
        let n = out_left.len().min(out_right.len()).min(self.block_len);

        self.transport.apply_requested();
        self.ports.clear_all();

        if !midi.is_empty() {
            router::deliver_midi(&mut self.ports, self.midi_in, midi);
        }
        if let Some((left, right)) = audio_in {
            copy_into(&mut self.ports, self.stereo_in.0, &left[..n.min(left.len())]);
            copy_into(&mut self.ports, self.stereo_in.1, &right[..n.min(right.len())]);
        }

        self.mixer.reset_processed();
        let ctx = ProcessContext {
            n_frames: n,
            sample_rate: self.sample_rate,
            playhead_frames: self.transport.playhead_frames(),
            rolling: self.transport.is_rolling(),
            frames_per_tick: self.transport.frames_per_tick(),
            bpm: self.transport.bpm(),
        };
        self.router.process(&mut self.mixer, &mut self.ports, &ctx);

        out_left.fill(0.0);
        out_right.fill(0.0);
        if let Some((l, r)) = self.mixer.tap_ports(self.master, BounceStep::PostFader) {
            copy_from(&self.ports, l, &mut out_left[..n]);
            copy_from(&self.ports, r, &mut out_right[..n]);
            // Mirror onto the engine's own output ports so taps and meters
            // observe what the hardware got.
            copy_between(&mut self.ports, l, self.stereo_out.0);
            copy_between(&mut self.ports, r, self.stereo_out.1);
        }

        self.transport.advance(n as u64);
    }
}

fn copy_into(ports: &mut PortTable, port: PortId, data: &[f32]) {
    if let Some(p) = ports.get_mut(port) {
        let samples = p.buffer.samples_mut();
        let n = samples.len().min(data.len());
        samples[..n].copy_from_slice(&data[..n]);
    }
}

fn copy_from(ports: &PortTable, port: PortId, out: &mut [f32]) {
    if let Some(p) = ports.get(port) {
        let samples = p.buffer.samples();
        let n = samples.len().min(out.len());
        out[..n].copy_from_slice(&samples[..n]);
    }
}

fn copy_between(ports: &mut PortTable, src: PortId, dst: PortId) {
    ports.map_samples(src, dst, |x| x);
}
