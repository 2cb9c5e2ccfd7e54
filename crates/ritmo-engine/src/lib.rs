//! Audio I/O layer for the ritmo engine.
//!
//! This crate connects the routing core to the outside world:
//!
//! - **Live audio**: [`Engine`] drives [`ritmo_core::EngineContext`] from a
//!   hardware callback behind a pluggable [`AudioBackend`]
//! - **Offline rendering**: [`Exporter`] bounces the graph faster than
//!   realtime, with progress reporting and cancellation
//! - **WAV files**: [`write_clip`] / [`read_clip`] move pool clips to and
//!   from disk
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ritmo_engine::{CpalBackend, Engine, BackendStreamConfig};
//!
//! let mut engine = Engine::new(Box::new(CpalBackend::new()), BackendStreamConfig::default());
//! // Build the project graph through the shared context.
//! {
//!     let context = engine.context();
//!     let mut ctx = context.lock().unwrap();
//!     let (mixer, ports) = ctx.mixer_and_ports_mut();
//!     mixer.add_channel(ports, "synth")?;
//! }
//! engine.start()?;
//! engine.transport_handle().request_roll();
//! ```

mod backend;
mod device;
mod engine;
mod export;
mod wav;

#[cfg(feature = "cpal-backend")]
mod cpal_backend;

pub use backend::{
    AudioBackend, BackendStreamConfig, ErrorCallback, InputCallback, OutputCallback, StreamHandle,
};
pub use device::AudioDevice;
pub use engine::Engine;
pub use export::{
    BitDepth, ExportError, ExportScope, ExportSettings, Exporter, Progress, TimeRange,
};
pub use wav::{read_clip, write_clip};

#[cfg(feature = "cpal-backend")]
pub use cpal_backend::CpalBackend;

/// Error types for engine and device operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The backend could not open a stream at startup. Fatal to the
    /// caller; nothing is running afterwards.
    #[error("audio backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Audio stream runtime error.
    #[error("audio stream error: {0}")]
    Stream(String),

    /// No audio device available on the system.
    #[error("no audio device available")]
    NoDevice,

    /// The requested audio device was not found.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// The engine is already running.
    #[error("engine is already running")]
    AlreadyRunning,
}

/// Convenience result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
