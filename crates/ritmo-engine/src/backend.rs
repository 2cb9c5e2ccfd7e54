//! Pluggable audio backend abstraction.
//!
//! [`AudioBackend`] decouples the engine from any specific platform audio
//! API. The default implementation wraps [cpal](https://crates.io/crates/cpal)
//! (feature `"cpal-backend"`), but the trait is designed so that alternative
//! backends can be swapped in: host-provided buffers in a plugin build,
//! JACK, or a deterministic mock for tests.
//!
//! The trait uses boxed closures for callbacks rather than generic
//! parameters, making `AudioBackend` object-safe and enabling runtime
//! backend selection. Stream handles are returned as [`StreamHandle`], a
//! type-erased wrapper that stops the stream on drop, keeping
//! platform-specific types out of application code.

use crate::{AudioDevice, Result};

/// Configuration for building an audio stream.
#[derive(Debug, Clone)]
pub struct BackendStreamConfig {
    /// Requested sample rate in Hz.
    pub sample_rate: u32,
    /// Preferred buffer size in frames.
    pub buffer_size: u32,
    /// Number of audio channels.
    pub channels: u16,
    /// Optional device name (uses system default if `None`).
    pub device_name: Option<String>,
}

impl Default for BackendStreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            buffer_size: 256,
            channels: 2,
            device_name: None,
        }
    }
}

/// Type-erased audio stream handle.
///
/// The stream is active while this handle exists; dropping it stops
/// playback/capture.
pub struct StreamHandle {
    _inner: Box<dyn Send>,
}

impl StreamHandle {
    /// Wraps a backend-specific stream object, keeping it alive until this
    /// handle is dropped.
    pub fn new<T: Send + 'static>(stream: T) -> Self {
        Self {
            _inner: Box::new(stream),
        }
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle").finish_non_exhaustive()
    }
}

/// Audio output callback.
///
/// Runs on the audio thread with a buffer of interleaved f32 samples to
/// fill (`[L0, R0, L1, R1, ...]` for stereo). Implementations must not
/// allocate or perform I/O; the engine's cycle lock is the one permitted
/// synchronization point.
pub type OutputCallback = Box<dyn FnMut(&mut [f32]) + Send>;

/// Audio input callback. Same interleaved layout as [`OutputCallback`].
pub type InputCallback = Box<dyn FnMut(&[f32]) + Send>;

/// Error callback, invoked with a human-readable message when the backend
/// hits a streaming error.
pub type ErrorCallback = Box<dyn FnMut(&str) + Send>;

/// Pluggable audio backend.
///
/// Object-safe so engines can select a backend at runtime via
/// `Box<dyn AudioBackend>`.
pub trait AudioBackend: Send {
    /// Human-readable name of this backend (e.g. "cpal", "mock").
    fn name(&self) -> &str;

    /// List all available audio devices.
    fn list_devices(&self) -> Result<Vec<AudioDevice>>;

    /// The default output device, if any.
    fn default_output_device(&self) -> Result<Option<AudioDevice>>;

    /// The default input device, if any.
    fn default_input_device(&self) -> Result<Option<AudioDevice>>;

    /// Builds an output-only stream. `callback` runs per buffer on the
    /// audio thread; the returned handle keeps the stream alive.
    fn build_output_stream(
        &self,
        config: &BackendStreamConfig,
        callback: OutputCallback,
        error_callback: ErrorCallback,
    ) -> Result<StreamHandle>;

    /// Builds an input-only stream. `callback` receives captured buffers
    /// on the audio thread.
    fn build_input_stream(
        &self,
        config: &BackendStreamConfig,
        callback: InputCallback,
        error_callback: ErrorCallback,
    ) -> Result<StreamHandle>;

    /// The sample rate the backend will actually use for `config`. Some
    /// backends cannot honor the exact request and pick the closest rate.
    fn actual_sample_rate(&self, config: &BackendStreamConfig) -> u32 {
        config.sample_rate
    }
}
