//! The mixer: owns channels and the processor arena, and wires both into
//! the port table.

use crate::builtin::Fader;
use crate::channel::{BounceStep, Channel, ChannelId};
use crate::port::{PortDirection, PortId, PortTable, PortType, RouteError};
use crate::processor::{Processor, ProcessorId, ProcessorKind, ProcessorNode};

/// Errors from mixer topology operations.
#[derive(Debug, thiserror::Error)]
pub enum MixerError {
    /// The channel id does not name a live channel.
    #[error("channel {0} not found")]
    ChannelNotFound(u32),

    /// The processor id does not name a live processor.
    #[error("processor {0} not found")]
    ProcessorNotFound(u32),

    /// No master channel exists yet.
    #[error("mixer has no master channel")]
    NoMaster,

    /// The underlying port operation failed.
    #[error(transparent)]
    Route(#[from] RouteError),
}

/// Port counts a processor asks for when installed.
#[derive(Clone, Copy, Debug, Default)]
pub struct IoSpec {
    /// MIDI input ports.
    pub midi_in: usize,
    /// Audio input ports.
    pub audio_in: usize,
    /// MIDI output ports.
    pub midi_out: usize,
    /// Audio output ports.
    pub audio_out: usize,
}

impl IoSpec {
    /// Stereo in, stereo out. The shape of inserts.
    pub fn stereo_effect() -> Self {
        Self {
            audio_in: 2,
            audio_out: 2,
            ..Self::default()
        }
    }

    /// One MIDI in, stereo out. The shape of instruments.
    pub fn instrument() -> Self {
        Self {
            midi_in: 1,
            audio_out: 2,
            ..Self::default()
        }
    }

    /// One MIDI out. The shape of sequencers.
    pub fn midi_source() -> Self {
        Self {
            midi_out: 1,
            ..Self::default()
        }
    }
}

/// Channels, processors and their wiring.
pub struct Mixer {
    nodes: Vec<Option<ProcessorNode>>,
    channels: Vec<Option<Channel>>,
    master: Option<ChannelId>,
}

impl Default for Mixer {
    fn default() -> Self {
        Self::new()
    }
}

impl Mixer {
    /// Creates an empty mixer.
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            channels: Vec::new(),
            master: None,
        }
    }

    /// The master channel, if one has been created.
    pub fn master(&self) -> Option<ChannelId> {
        self.master
    }

    /// Looks up a channel.
    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.get(id.0 as usize).and_then(Option::as_ref)
    }

    /// Iterates over live channels in creation order.
    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter().filter_map(Option::as_ref)
    }

    /// Creates the master channel. Its fader output stays unrouted; the
    /// engine copies it to the hardware ports.
    ///
    /// # Panics
    ///
    /// Panics if a master already exists.
    pub fn add_master(&mut self, ports: &mut PortTable) -> Result<ChannelId, MixerError> {
        assert!(self.master.is_none(), "master channel already exists");
        let id = self.add_strip(ports, "master", None)?;
        self.master = Some(id);
        Ok(id)
    }

    /// Creates a channel routed to the master.
    pub fn add_channel(
        &mut self,
        ports: &mut PortTable,
        name: impl Into<String>,
    ) -> Result<ChannelId, MixerError> {
        let master = self.master.ok_or(MixerError::NoMaster)?;
        let id = self.add_strip(ports, name, Some(master))?;
        Ok(id)
    }

    fn add_strip(
        &mut self,
        ports: &mut PortTable,
        name: impl Into<String>,
        output: Option<ChannelId>,
    ) -> Result<ChannelId, MixerError> {
        let name = name.into();
        let input = self.add_node(
            ports,
            format!("{name} in"),
            ProcessorKind::Passthrough,
            IoSpec::stereo_effect(),
        );
        let fader = self.add_node(
            ports,
            format!("{name} fader"),
            ProcessorKind::Fader(Fader::new()),
            IoSpec::stereo_effect(),
        );
        self.connect_stereo(ports, input, fader)?;
        if let Some(dest) = output {
            let dest_input = self
                .channel(dest)
                .ok_or(MixerError::ChannelNotFound(dest.0))?
                .input;
            self.connect_stereo(ports, fader, dest_input)?;
        }
        let id = ChannelId(self.channels.len() as u32);
        tracing::info!(channel = id.0, name = %name, "channel created");
        self.channels.push(Some(Channel {
            id,
            name,
            input,
            inserts: Vec::new(),
            fader,
            sources: Vec::new(),
            output,
            bounce: false,
        }));
        Ok(id)
    }

    /// Removes a channel and all of its processors and ports. The master
    /// cannot be removed.
    pub fn remove_channel(
        &mut self,
        ports: &mut PortTable,
        id: ChannelId,
    ) -> Result<(), MixerError> {
        if self.master == Some(id) {
            return Err(MixerError::ChannelNotFound(id.0));
        }
        let channel = self
            .channels
            .get_mut(id.0 as usize)
            .and_then(Option::take)
            .ok_or(MixerError::ChannelNotFound(id.0))?;
        let mut to_remove = vec![channel.input, channel.fader];
        to_remove.extend_from_slice(&channel.inserts);
        to_remove.extend_from_slice(&channel.sources);
        for node_id in to_remove {
            self.remove_node(ports, node_id);
        }
        tracing::info!(channel = id.0, name = %channel.name, "channel removed");
        Ok(())
    }

    /// Appends an effect to the channel's insert chain.
    pub fn add_insert(
        &mut self,
        ports: &mut PortTable,
        channel: ChannelId,
        processor: Box<dyn Processor>,
    ) -> Result<ProcessorId, MixerError> {
        let (tail, fader) = {
            let ch = self
                .channel(channel)
                .ok_or(MixerError::ChannelNotFound(channel.0))?;
            (*ch.inserts.last().unwrap_or(&ch.input), ch.fader)
        };
        let name = processor.name().to_owned();
        let id = self.add_node(
            ports,
            name.clone(),
            ProcessorKind::Custom(processor),
            IoSpec::stereo_effect(),
        );
        self.disconnect_stereo(ports, tail, fader)?;
        self.connect_stereo(ports, tail, id)?;
        self.connect_stereo(ports, id, fader)?;
        if let Some(ch) = self.channel_mut(channel) {
            ch.inserts.push(id);
        }
        tracing::info!(
            channel = channel.0,
            insert = %name,
            latency = self.channel_latency(channel),
            "insert added"
        );
        Ok(id)
    }

    /// Removes an insert and reconnects its neighbours.
    pub fn remove_insert(
        &mut self,
        ports: &mut PortTable,
        channel: ChannelId,
        insert: ProcessorId,
    ) -> Result<(), MixerError> {
        let (prev, next) = {
            let ch = self
                .channel(channel)
                .ok_or(MixerError::ChannelNotFound(channel.0))?;
            let pos = ch
                .inserts
                .iter()
                .position(|p| *p == insert)
                .ok_or(MixerError::ProcessorNotFound(insert.0))?;
            let prev = if pos == 0 { ch.input } else { ch.inserts[pos - 1] };
            let next = ch.inserts.get(pos + 1).copied().unwrap_or(ch.fader);
            (prev, next)
        };
        self.remove_node(ports, insert);
        self.connect_stereo(ports, prev, next)?;
        if let Some(ch) = self.channel_mut(channel) {
            ch.inserts.retain(|p| *p != insert);
        }
        Ok(())
    }

    /// Installs a generator (instrument, sequencer) on a channel. Audio
    /// outputs are wired into the channel's input stage; MIDI ports are left
    /// for the caller to connect.
    pub fn add_source(
        &mut self,
        ports: &mut PortTable,
        channel: ChannelId,
        processor: Box<dyn Processor>,
        spec: IoSpec,
    ) -> Result<ProcessorId, MixerError> {
        let input = self
            .channel(channel)
            .ok_or(MixerError::ChannelNotFound(channel.0))?
            .input;
        let name = processor.name().to_owned();
        let id = self.add_node(ports, name, ProcessorKind::Custom(processor), spec);
        if spec.audio_out >= 2 {
            self.connect_stereo(ports, id, input)?;
        }
        if let Some(ch) = self.channel_mut(channel) {
            ch.sources.push(id);
        }
        Ok(id)
    }

    /// Reroutes a channel's output to another channel.
    pub fn route(
        &mut self,
        ports: &mut PortTable,
        channel: ChannelId,
        dest: ChannelId,
    ) -> Result<(), MixerError> {
        let (fader, old_dest) = {
            let ch = self
                .channel(channel)
                .ok_or(MixerError::ChannelNotFound(channel.0))?;
            (ch.fader, ch.output)
        };
        let dest_input = self
            .channel(dest)
            .ok_or(MixerError::ChannelNotFound(dest.0))?
            .input;
        if let Some(old) = old_dest {
            let old_input = self
                .channel(old)
                .ok_or(MixerError::ChannelNotFound(old.0))?
                .input;
            self.disconnect_stereo(ports, fader, old_input)?;
        }
        self.connect_stereo(ports, fader, dest_input)?;
        if let Some(ch) = self.channel_mut(channel) {
            ch.output = Some(dest);
        }
        Ok(())
    }

    /// Current fader amplitude of a channel.
    pub fn fader_amp(&self, channel: ChannelId) -> Option<f32> {
        let fader = self.channel(channel)?.fader;
        match &self.node(fader)?.kind {
            ProcessorKind::Fader(f) => Some(f.amp()),
            _ => None,
        }
    }

    /// Sets a channel's fader amplitude.
    pub fn set_fader_amp(&mut self, channel: ChannelId, amp: f32) -> Result<(), MixerError> {
        let fader = self
            .channel(channel)
            .ok_or(MixerError::ChannelNotFound(channel.0))?
            .fader;
        match self.node_mut_inner(fader).map(|n| &mut n.kind) {
            Some(ProcessorKind::Fader(f)) => {
                f.set_amp(amp);
                Ok(())
            }
            _ => Err(MixerError::ProcessorNotFound(fader.0)),
        }
    }

    /// Marks or unmarks a channel for track-scoped rendering.
    pub fn set_bounce(&mut self, channel: ChannelId, bounce: bool) -> Result<(), MixerError> {
        self.channel_mut(channel)
            .map(|ch| ch.bounce = bounce)
            .ok_or(MixerError::ChannelNotFound(channel.0))
    }

    /// Enables or disables every processor on a channel. Disabled
    /// processors are skipped by the router and contribute silence.
    pub fn set_enabled(&mut self, channel: ChannelId, enabled: bool) -> Result<(), MixerError> {
        let members = {
            let ch = self
                .channel(channel)
                .ok_or(MixerError::ChannelNotFound(channel.0))?;
            let mut members = vec![ch.input, ch.fader];
            members.extend_from_slice(&ch.inserts);
            members.extend_from_slice(&ch.sources);
            members
        };
        for id in members {
            if let Some(node) = self.node_mut_inner(id) {
                node.enabled = enabled;
            }
        }
        Ok(())
    }

    /// Whether a channel is enabled (its input stage is).
    pub fn is_enabled(&self, channel: ChannelId) -> bool {
        self.channel(channel)
            .and_then(|ch| self.node(ch.input))
            .is_some_and(|n| n.enabled)
    }

    /// Summed insert latency of a channel in frames.
    pub fn channel_latency(&self, channel: ChannelId) -> usize {
        self.channel(channel)
            .map(|ch| {
                ch.inserts
                    .iter()
                    .filter_map(|id| self.node(*id))
                    .map(|n| n.latency)
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Ports carrying the signal at a given channel tap. `(left, right)`.
    pub fn tap_ports(&self, channel: ChannelId, step: BounceStep) -> Option<(PortId, PortId)> {
        let ch = self.channel(channel)?;
        let (node, outputs) = match step {
            BounceStep::BeforeInserts => (self.node(ch.input)?, true),
            BounceStep::PreFader => (self.node(ch.fader)?, false),
            BounceStep::PostFader => (self.node(ch.fader)?, true),
        };
        let ports = if outputs { &node.outputs } else { &node.inputs };
        Some((*ports.first()?, *ports.get(1)?))
    }

    /// Input and output port ids of a processor.
    pub fn processor_ports(&self, id: ProcessorId) -> Option<(&[PortId], &[PortId])> {
        self.node(id).map(|n| (&n.inputs[..], &n.outputs[..]))
    }

    /// Clears all per-cycle processed flags.
    pub(crate) fn reset_processed(&mut self) {
        for node in self.nodes.iter_mut().flatten() {
            node.processed = false;
        }
    }

    /// Resets every custom processor's internal state.
    pub fn reset_all(&mut self) {
        for node in self.nodes.iter_mut().flatten() {
            if let ProcessorKind::Custom(p) = &mut node.kind {
                p.reset();
            }
        }
    }

    /// Propagates a sample-rate change to every custom processor.
    pub fn set_sample_rate(&mut self, rate: u32) {
        for node in self.nodes.iter_mut().flatten() {
            if let ProcessorKind::Custom(p) = &mut node.kind {
                p.set_sample_rate(rate);
            }
        }
    }

    /// Propagates a block-length change to every custom processor.
    pub fn set_block_length(&mut self, frames: usize) {
        for node in self.nodes.iter_mut().flatten() {
            if let ProcessorKind::Custom(p) = &mut node.kind {
                p.set_block_length(frames);
            }
        }
    }

    pub(crate) fn node_slots(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn node(&self, id: ProcessorId) -> Option<&ProcessorNode> {
        self.nodes.get(id.0 as usize).and_then(Option::as_ref)
    }

    pub(crate) fn node_mut(&mut self, id: ProcessorId) -> Option<&mut ProcessorNode> {
        self.node_mut_inner(id)
    }

    fn node_mut_inner(&mut self, id: ProcessorId) -> Option<&mut ProcessorNode> {
        self.nodes.get_mut(id.0 as usize).and_then(Option::as_mut)
    }

    fn channel_mut(&mut self, id: ChannelId) -> Option<&mut Channel> {
        self.channels.get_mut(id.0 as usize).and_then(Option::as_mut)
    }

    fn add_node(
        &mut self,
        ports: &mut PortTable,
        name: String,
        kind: ProcessorKind,
        spec: IoSpec,
    ) -> ProcessorId {
        let id = ProcessorId(self.nodes.len() as u32);
        let mut node = ProcessorNode::new(id, name, kind);
        for i in 0..spec.midi_in {
            node.inputs.push(ports.register(
                Some(id),
                PortDirection::Input,
                PortType::Midi,
                format!("{} midi in {i}", node.name),
            ));
        }
        for i in 0..spec.audio_in {
            node.inputs.push(ports.register(
                Some(id),
                PortDirection::Input,
                PortType::Audio,
                format!("{} in {i}", node.name),
            ));
        }
        for i in 0..spec.midi_out {
            node.outputs.push(ports.register(
                Some(id),
                PortDirection::Output,
                PortType::Midi,
                format!("{} midi out {i}", node.name),
            ));
        }
        for i in 0..spec.audio_out {
            node.outputs.push(ports.register(
                Some(id),
                PortDirection::Output,
                PortType::Audio,
                format!("{} out {i}", node.name),
            ));
        }
        self.nodes.push(Some(node));
        id
    }

    fn remove_node(&mut self, ports: &mut PortTable, id: ProcessorId) {
        let Some(node) = self.nodes.get_mut(id.0 as usize).and_then(Option::take) else {
            return;
        };
        for port in node.inputs.iter().chain(node.outputs.iter()) {
            // Ignore already-removed ports.
            let _ = ports.remove(*port);
        }
    }

    /// Connects the last two audio outputs of `src` to the last two audio
    /// inputs of `dst`, pairwise.
    fn connect_stereo(
        &self,
        ports: &mut PortTable,
        src: ProcessorId,
        dst: ProcessorId,
    ) -> Result<(), MixerError> {
        let (src_ports, dst_ports) = self.stereo_pair(src, dst)?;
        ports.connect(src_ports.0, dst_ports.0)?;
        ports.connect(src_ports.1, dst_ports.1)?;
        Ok(())
    }

    fn disconnect_stereo(
        &self,
        ports: &mut PortTable,
        src: ProcessorId,
        dst: ProcessorId,
    ) -> Result<(), MixerError> {
        let (src_ports, dst_ports) = self.stereo_pair(src, dst)?;
        ports.disconnect(src_ports.0, dst_ports.0)?;
        ports.disconnect(src_ports.1, dst_ports.1)?;
        Ok(())
    }

    fn stereo_pair(
        &self,
        src: ProcessorId,
        dst: ProcessorId,
    ) -> Result<((PortId, PortId), (PortId, PortId)), MixerError> {
        let src_node = self.node(src).ok_or(MixerError::ProcessorNotFound(src.0))?;
        let dst_node = self.node(dst).ok_or(MixerError::ProcessorNotFound(dst.0))?;
        let n_out = src_node.outputs.len();
        let n_in = dst_node.inputs.len();
        if n_out < 2 || n_in < 2 {
            return Err(MixerError::Route(RouteError::InvalidConnection(
                "both processors need stereo audio ports",
            )));
        }
        Ok((
            (src_node.outputs[n_out - 2], src_node.outputs[n_out - 1]),
            (dst_node.inputs[n_in - 2], dst_node.inputs[n_in - 1]),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (PortTable, Mixer, ChannelId) {
        let mut ports = PortTable::new(64);
        let mut mixer = Mixer::new();
        let master = mixer.add_master(&mut ports).unwrap();
        (ports, mixer, master)
    }

    #[test]
    fn new_channel_feeds_master() {
        let (mut ports, mut mixer, master) = setup();
        let ch = mixer.add_channel(&mut ports, "synth").unwrap();
        let (fader_l, _) = mixer.tap_ports(ch, BounceStep::PostFader).unwrap();
        let master_in = mixer.channel(master).unwrap().input();
        let (ins, _) = mixer.processor_ports(master_in).unwrap();
        assert!(ports.are_connected(fader_l, ins[0]));
    }

    #[test]
    fn insert_sits_between_input_and_fader() {
        use crate::processor::{ProcessContext, PortIo, Processor, ProcessorFault};

        struct Nop;
        impl Processor for Nop {
            fn name(&self) -> &str {
                "nop"
            }
            fn process(
                &mut self,
                _ctx: &ProcessContext,
                _io: &mut PortIo<'_>,
            ) -> Result<(), ProcessorFault> {
                Ok(())
            }
        }

        let (mut ports, mut mixer, _master) = setup();
        let ch = mixer.add_channel(&mut ports, "synth").unwrap();
        let insert = mixer.add_insert(&mut ports, ch, Box::new(Nop)).unwrap();
        let channel = mixer.channel(ch).unwrap();
        let (input_outs, fader_ins) = {
            let (_, outs) = mixer.processor_ports(channel.input()).unwrap();
            let (ins, _) = mixer.processor_ports(channel.fader()).unwrap();
            (outs.to_vec(), ins.to_vec())
        };
        let (insert_ins, insert_outs) = mixer.processor_ports(insert).unwrap();
        assert!(ports.are_connected(input_outs[0], insert_ins[0]));
        assert!(ports.are_connected(insert_outs[0], fader_ins[0]));
        assert!(!ports.are_connected(input_outs[0], fader_ins[0]));
    }

    #[test]
    fn remove_insert_restores_direct_wiring() {
        use crate::processor::{ProcessContext, PortIo, Processor, ProcessorFault};

        struct Nop;
        impl Processor for Nop {
            fn name(&self) -> &str {
                "nop"
            }
            fn process(
                &mut self,
                _ctx: &ProcessContext,
                _io: &mut PortIo<'_>,
            ) -> Result<(), ProcessorFault> {
                Ok(())
            }
        }

        let (mut ports, mut mixer, _master) = setup();
        let ch = mixer.add_channel(&mut ports, "synth").unwrap();
        let insert = mixer.add_insert(&mut ports, ch, Box::new(Nop)).unwrap();
        mixer.remove_insert(&mut ports, ch, insert).unwrap();
        let channel = mixer.channel(ch).unwrap();
        let (_, input_outs) = mixer.processor_ports(channel.input()).unwrap();
        let (fader_ins, _) = mixer.processor_ports(channel.fader()).unwrap();
        assert!(ports.are_connected(input_outs[0], fader_ins[0]));
        assert!(mixer.channel(ch).unwrap().inserts().is_empty());
    }

    #[test]
    fn channel_without_master_is_rejected() {
        let mut ports = PortTable::new(64);
        let mut mixer = Mixer::new();
        assert!(matches!(
            mixer.add_channel(&mut ports, "synth"),
            Err(MixerError::NoMaster)
        ));
    }

    #[test]
    fn fader_amp_round_trips() {
        let (mut ports, mut mixer, _master) = setup();
        let ch = mixer.add_channel(&mut ports, "synth").unwrap();
        mixer.set_fader_amp(ch, 0.5).unwrap();
        assert_eq!(mixer.fader_amp(ch), Some(0.5));
    }
}
