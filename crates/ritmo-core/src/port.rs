//! Typed ports and the connection table.
//!
//! Every signal endpoint in the engine is a [`Port`]: processor inputs and
//! outputs as well as the engine's own hardware-facing ports. Ports and
//! connections live in a single [`PortTable`] so the realtime path can sum
//! fan-in, detect feedback and clear buffers without chasing pointers.

use crate::midi::MidiEvent;
use crate::processor::ProcessorId;

/// MIDI events buffered per event port for one block. Ingestion beyond this
/// is dropped rather than reallocating on the realtime path.
pub const MIDI_EVENTS_CAPACITY: usize = 256;

/// Kind of data a port carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortType {
    /// Sample buffer, one stream per port.
    Audio,
    /// Timestamped MIDI events.
    Midi,
    /// Block-rate control samples.
    Control,
}

/// Direction of a port relative to its owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

/// Identifier for a port. Sequential, never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PortId(pub(crate) u32);

impl PortId {
    /// Returns the raw index of this port.
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Identifier for a connection between two ports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnId(pub(crate) u32);

/// Owned storage behind a port.
#[derive(Clone, Debug)]
pub enum PortBuffer {
    /// One block of audio samples.
    Audio(Vec<f32>),
    /// Events for the current block, ordered by frame offset.
    Midi(Vec<MidiEvent>),
    /// One block of control samples.
    Control(Vec<f32>),
}

impl Default for PortBuffer {
    fn default() -> Self {
        Self::Audio(Vec::new())
    }
}

impl PortBuffer {
    fn with_type(port_type: PortType, block_len: usize) -> Self {
        match port_type {
            PortType::Audio => Self::Audio(vec![0.0; block_len]),
            PortType::Midi => Self::Midi(Vec::with_capacity(MIDI_EVENTS_CAPACITY)),
            PortType::Control => Self::Control(vec![0.0; block_len]),
        }
    }

    /// Silences audio/control samples and drops buffered events.
    pub fn clear(&mut self) {
        match self {
            Self::Audio(samples) | Self::Control(samples) => samples.fill(0.0),
            Self::Midi(events) => events.clear(),
        }
    }

    /// Returns the sample slice of an audio or control buffer.
    ///
    /// # Panics
    ///
    /// Panics if the buffer holds MIDI events.
    pub fn samples(&self) -> &[f32] {
        match self {
            Self::Audio(samples) | Self::Control(samples) => samples,
            Self::Midi(_) => panic!("expected a sample buffer, found a MIDI buffer"),
        }
    }

    /// Mutable variant of [`PortBuffer::samples`].
    ///
    /// # Panics
    ///
    /// Panics if the buffer holds MIDI events.
    pub fn samples_mut(&mut self) -> &mut [f32] {
        match self {
            Self::Audio(samples) | Self::Control(samples) => samples,
            Self::Midi(_) => panic!("expected a sample buffer, found a MIDI buffer"),
        }
    }

    /// Returns the event slice of a MIDI buffer.
    ///
    /// # Panics
    ///
    /// Panics if the buffer holds samples.
    pub fn events(&self) -> &[MidiEvent] {
        match self {
            Self::Midi(events) => events,
            _ => panic!("expected a MIDI buffer, found a sample buffer"),
        }
    }

    /// Mutable variant of [`PortBuffer::events`].
    ///
    /// # Panics
    ///
    /// Panics if the buffer holds samples.
    pub fn events_mut(&mut self) -> &mut Vec<MidiEvent> {
        match self {
            Self::Midi(events) => events,
            _ => panic!("expected a MIDI buffer, found a sample buffer"),
        }
    }
}

/// A signal endpoint registered in the [`PortTable`].
#[derive(Debug)]
pub struct Port {
    id: PortId,
    owner: Option<ProcessorId>,
    direction: PortDirection,
    port_type: PortType,
    name: String,
    pub(crate) buffer: PortBuffer,
    pub(crate) incoming: Vec<ConnId>,
    pub(crate) outgoing: Vec<ConnId>,
}

impl Port {
    /// Returns this port's id.
    pub fn id(&self) -> PortId {
        self.id
    }

    /// Returns the owning processor, or `None` for engine-owned ports.
    pub fn owner(&self) -> Option<ProcessorId> {
        self.owner
    }

    /// Returns the port's direction.
    pub fn direction(&self) -> PortDirection {
        self.direction
    }

    /// Returns the kind of data this port carries.
    pub fn port_type(&self) -> PortType {
        self.port_type
    }

    /// Returns the port's display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the port's current buffer contents.
    pub fn buffer(&self) -> &PortBuffer {
        &self.buffer
    }
}

#[derive(Debug)]
struct Connection {
    src: PortId,
    dst: PortId,
    /// Set when this edge closes a cycle. Downstream reads the previous
    /// block's output from `feedback_buf` instead of the live source buffer.
    feedback: bool,
    feedback_buf: Vec<f32>,
}

/// Errors from routing operations.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    /// Source and destination carry different data kinds.
    #[error("port type mismatch: cannot connect {src:?} to {dst:?}")]
    TypeMismatch {
        /// Type of the source port.
        src: PortType,
        /// Type of the destination port.
        dst: PortType,
    },

    /// The connection shape is not allowed.
    #[error("invalid connection: {0}")]
    InvalidConnection(&'static str),

    /// The two ports are already connected.
    #[error("ports are already connected")]
    DuplicateConnection,

    /// The two ports are not connected.
    #[error("ports are not connected")]
    NotConnected,

    /// The port id does not name a live port.
    #[error("port {0} not found")]
    PortNotFound(u32),
}

/// Arena of ports and the connections between them.
pub struct PortTable {
    ports: Vec<Option<Port>>,
    connections: Vec<Option<Connection>>,
    block_len: usize,
    next_port: u32,
    next_conn: u32,
}

impl PortTable {
    /// Creates an empty table sized for `block_len`-frame blocks.
    pub fn new(block_len: usize) -> Self {
        Self {
            ports: Vec::new(),
            connections: Vec::new(),
            block_len,
            next_port: 0,
            next_conn: 0,
        }
    }

    /// Frames per audio/control buffer.
    pub fn block_len(&self) -> usize {
        self.block_len
    }

    /// Registers a new port and allocates its buffer.
    pub fn register(
        &mut self,
        owner: Option<ProcessorId>,
        direction: PortDirection,
        port_type: PortType,
        name: impl Into<String>,
    ) -> PortId {
        let id = PortId(self.next_port);
        self.next_port += 1;
        self.ports.push(Some(Port {
            id,
            owner,
            direction,
            port_type,
            name: name.into(),
            buffer: PortBuffer::with_type(port_type, self.block_len),
            incoming: Vec::new(),
            outgoing: Vec::new(),
        }));
        id
    }

    /// Removes a port along with every connection touching it.
    pub fn remove(&mut self, id: PortId) -> Result<(), RouteError> {
        let port = self
            .ports
            .get_mut(id.0 as usize)
            .and_then(Option::take)
            .ok_or(RouteError::PortNotFound(id.0))?;
        for conn_id in port.incoming.iter().chain(port.outgoing.iter()) {
            if let Some(conn) = self.connections[conn_id.0 as usize].take() {
                let other = if conn.src == id { conn.dst } else { conn.src };
                if let Some(other) = self.ports[other.0 as usize].as_mut() {
                    other.incoming.retain(|c| c != conn_id);
                    other.outgoing.retain(|c| c != conn_id);
                }
            }
        }
        Ok(())
    }

    /// Looks up a port.
    pub fn get(&self, id: PortId) -> Option<&Port> {
        self.ports.get(id.0 as usize).and_then(Option::as_ref)
    }

    /// Looks up a port mutably.
    pub fn get_mut(&mut self, id: PortId) -> Option<&mut Port> {
        self.ports.get_mut(id.0 as usize).and_then(Option::as_mut)
    }

    /// Iterates over all live ports.
    pub fn iter(&self) -> impl Iterator<Item = &Port> {
        self.ports.iter().filter_map(Option::as_ref)
    }

    /// Connects `src` to `dst`.
    ///
    /// Both ports must carry the same data kind, `dst` must be an input, and
    /// `src` must be an output (engine-owned input ports may also act as
    /// sources, since they fan hardware input out into the graph). If the
    /// connection would close a cycle it is accepted but marked as feedback:
    /// the destination then reads the source's previous block.
    pub fn connect(&mut self, src: PortId, dst: PortId) -> Result<ConnId, RouteError> {
        let (src_port, dst_port) = match (self.get(src), self.get(dst)) {
            (Some(s), Some(d)) => (s, d),
            (None, _) => return Err(RouteError::PortNotFound(src.0)),
            (_, None) => return Err(RouteError::PortNotFound(dst.0)),
        };
        if src_port.port_type != dst_port.port_type {
            return Err(RouteError::TypeMismatch {
                src: src_port.port_type,
                dst: dst_port.port_type,
            });
        }
        if src == dst {
            return Err(RouteError::InvalidConnection("port cannot feed itself"));
        }
        if dst_port.direction != PortDirection::Input {
            return Err(RouteError::InvalidConnection(
                "destination must be an input port",
            ));
        }
        if src_port.direction != PortDirection::Output && src_port.owner.is_some() {
            return Err(RouteError::InvalidConnection(
                "source must be an output port",
            ));
        }
        if self.find_connection(src, dst).is_some() {
            return Err(RouteError::DuplicateConnection);
        }

        let port_type = src_port.port_type;
        // The edge closes a cycle iff the destination already feeds the
        // source through existing connections.
        let feedback = match (dst_port.owner, src_port.owner) {
            (Some(downstream), Some(upstream)) => self.reaches(downstream, upstream),
            _ => false,
        };
        let feedback_buf = if feedback && port_type != PortType::Midi {
            vec![0.0; self.block_len]
        } else {
            Vec::new()
        };

        let id = ConnId(self.next_conn);
        self.next_conn += 1;
        self.connections.push(Some(Connection {
            src,
            dst,
            feedback,
            feedback_buf,
        }));
        if let Some(port) = self.get_port_mut(src) {
            port.outgoing.push(id);
        }
        if let Some(port) = self.get_port_mut(dst) {
            port.incoming.push(id);
        }
        tracing::debug!(
            src = src.0,
            dst = dst.0,
            feedback,
            "connected {:?} ports",
            port_type
        );
        Ok(id)
    }

    /// Removes the connection from `src` to `dst`.
    pub fn disconnect(&mut self, src: PortId, dst: PortId) -> Result<(), RouteError> {
        let conn_id = self.find_connection(src, dst).ok_or(RouteError::NotConnected)?;
        self.connections[conn_id.0 as usize] = None;
        if let Some(port) = self.get_port_mut(src) {
            port.outgoing.retain(|c| *c != conn_id);
        }
        if let Some(port) = self.get_port_mut(dst) {
            port.incoming.retain(|c| *c != conn_id);
        }
        tracing::debug!(src = src.0, dst = dst.0, "disconnected ports");
        Ok(())
    }

    /// Returns whether `src` currently feeds `dst`.
    pub fn are_connected(&self, src: PortId, dst: PortId) -> bool {
        self.find_connection(src, dst).is_some()
    }

    /// Silences every audio/control buffer and drops every buffered event.
    /// Runs at the top of each cycle.
    pub fn clear_all(&mut self) {
        for port in self.ports.iter_mut().flatten() {
            port.buffer.clear();
        }
    }

    /// Silences every feedback snapshot. Offline renders call this before
    /// rolling so residue from live playback cannot leak into the first
    /// block.
    pub fn clear_feedback(&mut self) {
        for conn in self.connections.iter_mut().flatten() {
            conn.feedback_buf.fill(0.0);
        }
    }

    /// Resizes all sample buffers (including feedback buffers) for a new
    /// block length. Previous contents are discarded.
    pub fn resize(&mut self, block_len: usize) {
        self.block_len = block_len;
        for port in self.ports.iter_mut().flatten() {
            match &mut port.buffer {
                PortBuffer::Audio(samples) | PortBuffer::Control(samples) => {
                    samples.clear();
                    samples.resize(block_len, 0.0);
                }
                PortBuffer::Midi(_) => {}
            }
        }
        for conn in self.connections.iter_mut().flatten() {
            if !conn.feedback_buf.is_empty() || conn.feedback {
                conn.feedback_buf.clear();
                conn.feedback_buf.resize(block_len, 0.0);
            }
        }
    }

    /// Sums every source feeding `dst` into its buffer. Feedback edges
    /// contribute the source's previous block; MIDI sources append their
    /// events in source order.
    pub(crate) fn pull(&mut self, dst: PortId) {
        let Some(port) = self.get_port_mut(dst) else {
            return;
        };
        let incoming = std::mem::take(&mut port.incoming);
        let mut buffer = std::mem::take(&mut port.buffer);
        for conn_id in &incoming {
            let Some(conn) = self.connections[conn_id.0 as usize].as_ref() else {
                continue;
            };
            match &mut buffer {
                PortBuffer::Audio(samples) | PortBuffer::Control(samples) => {
                    if conn.feedback {
                        for (acc, x) in samples.iter_mut().zip(conn.feedback_buf.iter()) {
                            *acc += *x;
                        }
                    } else if let Some(src) = self.get(conn.src) {
                        for (acc, x) in samples.iter_mut().zip(src.buffer.samples().iter()) {
                            *acc += *x;
                        }
                    }
                }
                PortBuffer::Midi(events) => {
                    if !conn.feedback {
                        if let Some(src) = self.get(conn.src) {
                            let room = MIDI_EVENTS_CAPACITY.saturating_sub(events.len());
                            events.extend(src.buffer.events().iter().take(room));
                        }
                    }
                }
            }
        }
        if let Some(port) = self.get_port_mut(dst) {
            port.incoming = incoming;
            port.buffer = buffer;
        }
    }

    /// Snapshots `src`'s buffer into every outgoing feedback edge, making it
    /// available to downstream pulls next cycle.
    pub(crate) fn push_feedback(&mut self, src: PortId) {
        // Ports and connections are separate arenas, so the source buffer
        // can be read while feedback buffers are written.
        let Self {
            ports, connections, ..
        } = self;
        let Some(port) = ports.get(src.0 as usize).and_then(Option::as_ref) else {
            return;
        };
        let (PortBuffer::Audio(samples) | PortBuffer::Control(samples)) = &port.buffer else {
            return;
        };
        for conn_id in &port.outgoing {
            if let Some(conn) = connections[conn_id.0 as usize].as_mut() {
                if conn.feedback {
                    conn.feedback_buf.copy_from_slice(samples);
                }
            }
        }
    }

    /// Copies one sample buffer into another, mapping each sample through
    /// `f`. Used by zero-latency stages like the fader.
    pub(crate) fn map_samples(
        &mut self,
        src: PortId,
        dst: PortId,
        f: impl Fn(f32) -> f32,
    ) {
        if src == dst {
            return;
        }
        let (a, b) = (src.0 as usize, dst.0 as usize);
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        let (head, tail) = self.ports.split_at_mut(hi);
        let (Some(first), Some(second)) = (head[lo].as_mut(), tail[0].as_mut()) else {
            return;
        };
        let (src_port, dst_port) = if a < b { (first, second) } else { (second, first) };
        let (PortBuffer::Audio(input) | PortBuffer::Control(input)) = &src_port.buffer else {
            return;
        };
        let (PortBuffer::Audio(output) | PortBuffer::Control(output)) = &mut dst_port.buffer
        else {
            return;
        };
        for (o, i) in output.iter_mut().zip(input.iter()) {
            *o = f(*i);
        }
    }

    /// Owners of every non-feedback source feeding `port`.
    pub(crate) fn sources_of<'a>(
        &'a self,
        port: &'a Port,
    ) -> impl Iterator<Item = ProcessorId> + 'a {
        port.incoming.iter().filter_map(|conn_id| {
            let conn = self.connections[conn_id.0 as usize].as_ref()?;
            if conn.feedback {
                return None;
            }
            self.get(conn.src)?.owner()
        })
    }

    fn get_port_mut(&mut self, id: PortId) -> Option<&mut Port> {
        self.ports.get_mut(id.0 as usize).and_then(Option::as_mut)
    }

    fn find_connection(&self, src: PortId, dst: PortId) -> Option<ConnId> {
        self.get(src)?
            .outgoing
            .iter()
            .copied()
            .find(|conn_id| {
                self.connections[conn_id.0 as usize]
                    .as_ref()
                    .is_some_and(|c| c.dst == dst)
            })
    }

    /// Whether any non-feedback signal path leads from `from` to `to`.
    fn reaches(&self, from: ProcessorId, to: ProcessorId) -> bool {
        if from == to {
            return true;
        }
        let mut stack = vec![from];
        let mut seen = vec![false; self.ports.len()];
        while let Some(current) = stack.pop() {
            for port in self.ports.iter().flatten() {
                if port.owner != Some(current) || seen[port.id.0 as usize] {
                    continue;
                }
                seen[port.id.0 as usize] = true;
                for conn_id in &port.outgoing {
                    let Some(conn) = self.connections[conn_id.0 as usize].as_ref() else {
                        continue;
                    };
                    if conn.feedback {
                        continue;
                    }
                    let Some(owner) = self.get(conn.dst).and_then(Port::owner) else {
                        continue;
                    };
                    if owner == to {
                        return true;
                    }
                    stack.push(owner);
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> PortTable {
        PortTable::new(64)
    }

    fn is_feedback(t: &PortTable, id: ConnId) -> bool {
        t.connections[id.0 as usize].as_ref().unwrap().feedback
    }

    #[test]
    fn connect_rejects_type_mismatch() {
        let mut t = table();
        let a = t.register(None, PortDirection::Output, PortType::Audio, "a");
        let b = t.register(None, PortDirection::Input, PortType::Midi, "b");
        assert!(matches!(
            t.connect(a, b),
            Err(RouteError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn connect_rejects_duplicate() {
        let mut t = table();
        let a = t.register(None, PortDirection::Output, PortType::Audio, "a");
        let b = t.register(None, PortDirection::Input, PortType::Audio, "b");
        t.connect(a, b).unwrap();
        assert!(matches!(
            t.connect(a, b),
            Err(RouteError::DuplicateConnection)
        ));
    }

    #[test]
    fn disconnect_unknown_pair_fails() {
        let mut t = table();
        let a = t.register(None, PortDirection::Output, PortType::Audio, "a");
        let b = t.register(None, PortDirection::Input, PortType::Audio, "b");
        assert!(matches!(t.disconnect(a, b), Err(RouteError::NotConnected)));
    }

    #[test]
    fn stereo_second_leg_is_not_feedback() {
        let mut t = table();
        let a = ProcessorId(0);
        let b = ProcessorId(1);
        let a_l = t.register(Some(a), PortDirection::Output, PortType::Audio, "a l");
        let a_r = t.register(Some(a), PortDirection::Output, PortType::Audio, "a r");
        let b_l = t.register(Some(b), PortDirection::Input, PortType::Audio, "b l");
        let b_r = t.register(Some(b), PortDirection::Input, PortType::Audio, "b r");
        let left = t.connect(a_l, b_l).unwrap();
        // The right leg runs parallel to the left one. It does not close a
        // cycle, so it must feed the current block, not the previous one.
        let right = t.connect(a_r, b_r).unwrap();
        assert!(!is_feedback(&t, left));
        assert!(!is_feedback(&t, right));

        t.get_mut(a_r).unwrap().buffer.samples_mut().fill(0.25);
        t.pull(b_r);
        for &x in t.get(b_r).unwrap().buffer.samples() {
            assert!((x - 0.25).abs() < 1e-6);
        }
    }

    #[test]
    fn edge_closing_a_cycle_reads_previous_block() {
        let mut t = table();
        let a = ProcessorId(0);
        let b = ProcessorId(1);
        let a_in = t.register(Some(a), PortDirection::Input, PortType::Audio, "a in");
        let a_out = t.register(Some(a), PortDirection::Output, PortType::Audio, "a out");
        let b_in = t.register(Some(b), PortDirection::Input, PortType::Audio, "b in");
        let b_out = t.register(Some(b), PortDirection::Output, PortType::Audio, "b out");
        let forward = t.connect(a_out, b_in).unwrap();
        let back = t.connect(b_out, a_in).unwrap();
        assert!(!is_feedback(&t, forward));
        assert!(is_feedback(&t, back));

        // First block: the return edge has no snapshot yet, so it is silent.
        t.get_mut(b_out).unwrap().buffer.samples_mut().fill(0.375);
        t.pull(a_in);
        assert!(t.get(a_in).unwrap().buffer.samples().iter().all(|&x| x == 0.0));

        // After the source runs its snapshot feeds the next block.
        t.push_feedback(b_out);
        t.clear_all();
        t.pull(a_in);
        for &x in t.get(a_in).unwrap().buffer.samples() {
            assert!((x - 0.375).abs() < 1e-6);
        }
    }

    #[test]
    fn clear_feedback_silences_snapshots() {
        let mut t = table();
        let a = ProcessorId(0);
        let b = ProcessorId(1);
        let a_in = t.register(Some(a), PortDirection::Input, PortType::Audio, "a in");
        let a_out = t.register(Some(a), PortDirection::Output, PortType::Audio, "a out");
        let b_in = t.register(Some(b), PortDirection::Input, PortType::Audio, "b in");
        let b_out = t.register(Some(b), PortDirection::Output, PortType::Audio, "b out");
        t.connect(a_out, b_in).unwrap();
        t.connect(b_out, a_in).unwrap();
        t.get_mut(b_out).unwrap().buffer.samples_mut().fill(0.5);
        t.push_feedback(b_out);
        t.clear_all();

        t.clear_feedback();
        t.pull(a_in);
        assert!(t.get(a_in).unwrap().buffer.samples().iter().all(|&x| x == 0.0));
    }

    #[test]
    fn pull_sums_fan_in() {
        let mut t = table();
        let s1 = t.register(None, PortDirection::Output, PortType::Audio, "s1");
        let s2 = t.register(None, PortDirection::Output, PortType::Audio, "s2");
        let d = t.register(None, PortDirection::Input, PortType::Audio, "d");
        t.connect(s1, d).unwrap();
        t.connect(s2, d).unwrap();
        t.get_mut(s1).unwrap().buffer.samples_mut().fill(0.25);
        t.get_mut(s2).unwrap().buffer.samples_mut().fill(0.5);
        t.pull(d);
        for &x in t.get(d).unwrap().buffer.samples() {
            assert!((x - 0.75).abs() < 1e-6);
        }
    }

    #[test]
    fn clear_all_silences_everything() {
        let mut t = table();
        let a = t.register(None, PortDirection::Output, PortType::Audio, "a");
        let m = t.register(None, PortDirection::Output, PortType::Midi, "m");
        t.get_mut(a).unwrap().buffer.samples_mut().fill(1.0);
        t.get_mut(m)
            .unwrap()
            .buffer
            .events_mut()
            .push(crate::midi::MidiEvent::new(
                0,
                crate::midi::MidiMessage::Raw([0xf8, 0, 0]),
            ));
        t.clear_all();
        assert!(t.get(a).unwrap().buffer.samples().iter().all(|&x| x == 0.0));
        assert!(t.get(m).unwrap().buffer.events().is_empty());
    }

    #[test]
    fn resize_changes_buffer_lengths() {
        let mut t = table();
        let a = t.register(None, PortDirection::Output, PortType::Audio, "a");
        t.resize(256);
        assert_eq!(t.get(a).unwrap().buffer.samples().len(), 256);
    }

    #[test]
    fn remove_port_drops_connections() {
        let mut t = table();
        let a = t.register(None, PortDirection::Output, PortType::Audio, "a");
        let b = t.register(None, PortDirection::Input, PortType::Audio, "b");
        t.connect(a, b).unwrap();
        t.remove(a).unwrap();
        assert!(t.get(a).is_none());
        assert!(t.get(b).unwrap().incoming.is_empty());
    }
}
