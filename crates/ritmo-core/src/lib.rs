//! Ritmo Core - realtime signal routing for a DAW engine
//!
//! This crate is the heart of the engine: typed ports, the mixer graph, the
//! transport and the offline audio functions. It knows nothing about audio
//! devices or files; `ritmo-engine` connects it to the outside world.
//!
//! # Core Abstractions
//!
//! ## Routing
//!
//! - [`PortTable`] - Ports, connections and per-cycle buffers
//! - [`Mixer`] - Channels, insert chains and faders
//! - [`Router`] - Dependency-ordered graph execution
//!
//! ## Processing
//!
//! - [`Processor`] - Object-safe trait for everything in the graph
//! - [`PluginHost`] / [`PluginInstance`] - External plugin boundary
//! - [`SineInstrument`] / [`PatternSequencer`] - Built-in generators
//!
//! ## Timeline
//!
//! - [`Transport`] - Play state, playhead, tempo and looping
//! - [`TransportHandle`] - Cross-thread transport requests
//!
//! ## Offline
//!
//! - [`Pool`] - Shared audio clips
//! - [`audio_function::apply`] - Selection edits (invert, normalize, ...)
//!
//! # Threading model
//!
//! Nothing in this crate locks. One owner (in practice the engine, behind a
//! mutex) drives [`EngineContext::process_cycle`] and performs topology
//! edits between cycles. The only lock-free surfaces are the transport
//! handle's request flags.
//!
//! # Example
//!
//! ```rust,ignore
//! use ritmo_core::{EngineContext, IoSpec, SineInstrument};
//!
//! let mut engine = EngineContext::new(48_000, 256);
//! let (mixer, ports) = engine.mixer_and_ports_mut();
//! let channel = mixer.add_channel(ports, "synth")?;
//! mixer.add_source(ports, channel, Box::new(SineInstrument::new(48_000)), IoSpec::instrument())?;
//!
//! // In the audio callback:
//! engine.process_cycle(&midi, None, &mut left, &mut right);
//! ```

pub mod audio_function;
pub mod builtin;
pub mod channel;
pub mod context;
pub mod midi;
pub mod mixer;
pub mod plugin;
pub mod pool;
pub mod port;
pub mod processor;
pub mod router;
pub mod transport;

// Re-export main types at crate root
pub use audio_function::{
    AudioFunction, DEFAULT_NUDGE_TICKS, FunctionError, FunctionOptions, Selection,
};
pub use builtin::{Fader, PatternSequencer, PatternStep, SineInstrument};
pub use channel::{BounceStep, Channel, ChannelId};
pub use context::EngineContext;
pub use midi::{MidiEvent, MidiMessage};
pub use mixer::{IoSpec, Mixer, MixerError};
pub use plugin::{PluginDescriptor, PluginError, PluginHost, PluginInstance, PluginProcessor};
pub use pool::{AudioClip, Pool, PoolId};
pub use port::{
    Port, PortBuffer, PortDirection, PortId, PortTable, PortType, RouteError,
};
pub use processor::{
    PortIo, ProcessContext, Processor, ProcessorFault, ProcessorId, ProcessorKind,
};
pub use router::Router;
pub use transport::{
    PlayState, TICKS_PER_BAR, TICKS_PER_QUARTER_NOTE, Transport, TransportHandle,
};
