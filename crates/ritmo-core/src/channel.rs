//! Mixer channels: an input stage, a chain of inserts and a fader.

use crate::processor::ProcessorId;

/// Identifier for a mixer channel. Sequential, never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChannelId(pub(crate) u32);

impl ChannelId {
    /// Returns the raw index of this channel.
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Signal point within a channel that offline rendering can capture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BounceStep {
    /// After input summing, before any insert.
    BeforeInserts,
    /// After the insert chain, before the fader.
    PreFader,
    /// After the fader (the channel's contribution to its destination).
    PostFader,
}

/// A mixer strip.
///
/// Signal flows input stage -> inserts (in slot order) -> fader -> output
/// route. Sources (instruments, sequencers) feed the input stage alongside
/// anything routed here from other channels.
pub struct Channel {
    pub(crate) id: ChannelId,
    pub(crate) name: String,
    /// Passthrough summing point for everything feeding this channel.
    pub(crate) input: ProcessorId,
    /// Insert chain in processing order.
    pub(crate) inserts: Vec<ProcessorId>,
    pub(crate) fader: ProcessorId,
    /// Generators owned by this channel (instrument, sequencer).
    pub(crate) sources: Vec<ProcessorId>,
    /// Channel this one's fader feeds, `None` for master.
    pub(crate) output: Option<ChannelId>,
    /// Selected for track-scoped offline rendering.
    pub(crate) bounce: bool,
}

impl Channel {
    /// Channel id.
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Input-stage processor.
    pub fn input(&self) -> ProcessorId {
        self.input
    }

    /// Insert chain in processing order.
    pub fn inserts(&self) -> &[ProcessorId] {
        &self.inserts
    }

    /// Fader processor.
    pub fn fader(&self) -> ProcessorId {
        self.fader
    }

    /// Generators owned by this channel.
    pub fn sources(&self) -> &[ProcessorId] {
        &self.sources
    }

    /// Destination channel, `None` for master.
    pub fn output(&self) -> Option<ChannelId> {
        self.output
    }

    /// Whether the channel is selected for track-scoped rendering.
    pub fn bounce(&self) -> bool {
        self.bounce
    }
}
