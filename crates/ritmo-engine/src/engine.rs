//! The live engine: drives the routing core from a hardware callback.

use std::sync::mpsc::{Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, mpsc};

use ritmo_core::{EngineContext, MidiEvent, MidiMessage, TransportHandle};

use crate::backend::{AudioBackend, BackendStreamConfig, StreamHandle};
use crate::{Error, Result};

/// MIDI events queued between callbacks before the buffer pushes back.
const MIDI_QUEUE_CAPACITY: usize = 1024;

/// Owns an [`EngineContext`] and keeps it fed from an audio backend.
///
/// The context sits behind a mutex that doubles as the port operation lock:
/// the output callback holds it for the whole cycle, so topology edits made
/// through [`Engine::context`] always land between cycles and never observe
/// a half-processed graph.
pub struct Engine {
    context: Arc<Mutex<EngineContext>>,
    backend: Box<dyn AudioBackend>,
    config: BackendStreamConfig,
    midi_tx: SyncSender<MidiEvent>,
    midi_rx: Option<Receiver<MidiEvent>>,
    output_stream: Option<StreamHandle>,
    input_stream: Option<StreamHandle>,
    capture_input: bool,
}

impl Engine {
    /// Creates an engine on the given backend. No streams run until
    /// [`Engine::start`].
    pub fn new(backend: Box<dyn AudioBackend>, config: BackendStreamConfig) -> Self {
        let sample_rate = backend.actual_sample_rate(&config);
        let context = Arc::new(Mutex::new(EngineContext::new(
            sample_rate,
            config.buffer_size as usize,
        )));
        let (midi_tx, midi_rx) = mpsc::sync_channel(MIDI_QUEUE_CAPACITY);
        Self {
            context,
            backend,
            config,
            midi_tx,
            midi_rx: Some(midi_rx),
            output_stream: None,
            input_stream: None,
            capture_input: false,
        }
    }

    /// The shared context. Lock it to edit the graph, transport or pool;
    /// the lock is the same one the audio callback takes per cycle.
    pub fn context(&self) -> Arc<Mutex<EngineContext>> {
        Arc::clone(&self.context)
    }

    /// The backend driving this engine.
    pub fn backend(&self) -> &dyn AudioBackend {
        self.backend.as_ref()
    }

    /// Transport handle for play/pause/seek from any thread.
    ///
    /// # Panics
    ///
    /// Panics if the context mutex is poisoned.
    pub fn transport_handle(&self) -> TransportHandle {
        let ctx = self.context.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        ctx.transport().handle()
    }

    /// Whether streams are currently running.
    pub fn is_running(&self) -> bool {
        self.output_stream.is_some()
    }

    /// Enables hardware input capture on the next [`Engine::start`].
    pub fn set_capture_input(&mut self, capture: bool) {
        self.capture_input = capture;
    }

    /// Queues a raw MIDI message for the next cycle. Callable from any
    /// thread; events are dropped with a warning if the queue is full.
    pub fn queue_midi(&self, bytes: &[u8]) {
        let Some(message) = MidiMessage::parse(bytes) else {
            tracing::warn!(?bytes, "unparseable MIDI message dropped");
            return;
        };
        match self.midi_tx.try_send(MidiEvent::new(0, message)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!("MIDI queue full, event dropped");
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Builds and starts the audio streams.
    pub fn start(&mut self) -> Result<()> {
        if self.output_stream.is_some() {
            return Err(Error::AlreadyRunning);
        }
        let midi_rx = self.midi_rx.take().ok_or(Error::AlreadyRunning)?;

        // Input is handed to the output callback through a bounded channel,
        // matching block for block; a missing block plays as silence.
        let (input_tx, input_rx) = mpsc::sync_channel::<Vec<f32>>(4);
        if self.capture_input {
            let stream = self.backend.build_input_stream(
                &self.config,
                Box::new(move |data: &[f32]| {
                    let _ = input_tx.try_send(data.to_vec());
                }),
                Box::new(|err| tracing::error!("input stream error: {err}")),
            )?;
            self.input_stream = Some(stream);
        }

        let context = Arc::clone(&self.context);
        let channels = usize::from(self.config.channels.max(1));
        let capture = self.capture_input;
        let mut midi_scratch: Vec<MidiEvent> = Vec::with_capacity(MIDI_QUEUE_CAPACITY);
        let mut in_left: Vec<f32> = Vec::new();
        let mut in_right: Vec<f32> = Vec::new();
        let mut out_left: Vec<f32> = Vec::new();
        let mut out_right: Vec<f32> = Vec::new();

        let callback = Box::new(move |data: &mut [f32]| {
            let frames = data.len() / channels;

            midi_scratch.clear();
            while let Ok(event) = midi_rx.try_recv() {
                if midi_scratch.len() < MIDI_QUEUE_CAPACITY {
                    midi_scratch.push(event);
                }
            }

            let audio_in = if capture {
                in_left.clear();
                in_right.clear();
                if let Ok(block) = input_rx.try_recv() {
                    for frame in block.chunks(channels) {
                        in_left.push(frame[0]);
                        in_right.push(frame.get(1).copied().unwrap_or(frame[0]));
                    }
                }
                in_left.resize(frames, 0.0);
                in_right.resize(frames, 0.0);
                Some((in_left.as_slice(), in_right.as_slice()))
            } else {
                None
            };

            out_left.clear();
            out_left.resize(frames, 0.0);
            out_right.clear();
            out_right.resize(frames, 0.0);

            {
                let mut ctx = context
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                if frames > ctx.block_len() {
                    ctx.set_block_len(frames);
                }
                ctx.process_cycle(&midi_scratch, audio_in, &mut out_left, &mut out_right);
            }

            for (frame, out) in data.chunks_mut(channels).enumerate().take(frames) {
                out[0] = out_left[frame];
                if channels > 1 {
                    out[1] = out_right[frame];
                }
                for extra in out.iter_mut().skip(2) {
                    *extra = 0.0;
                }
            }
        });

        let stream = self.backend.build_output_stream(
            &self.config,
            callback,
            Box::new(|err| tracing::error!("output stream error: {err}")),
        )?;
        self.output_stream = Some(stream);
        tracing::info!(backend = self.backend.name(), "engine started");
        Ok(())
    }

    /// Stops the audio streams. The context and its graph survive; a later
    /// `start` needs a fresh [`Engine`] because the MIDI queue moved into
    /// the old callback.
    pub fn stop(&mut self) {
        self.output_stream = None;
        self.input_stream = None;
        tracing::info!("engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ErrorCallback, InputCallback, OutputCallback};
    use crate::AudioDevice;

    /// Backend that runs the output callback on demand instead of from a
    /// device thread.
    struct MockBackend;

    impl AudioBackend for MockBackend {
        fn name(&self) -> &str {
            "mock"
        }

        fn list_devices(&self) -> crate::Result<Vec<AudioDevice>> {
            Ok(vec![AudioDevice {
                name: "mock out".into(),
                is_input: false,
                is_output: true,
                default_sample_rate: 48_000,
            }])
        }

        fn default_output_device(&self) -> crate::Result<Option<AudioDevice>> {
            Ok(None)
        }

        fn default_input_device(&self) -> crate::Result<Option<AudioDevice>> {
            Ok(None)
        }

        fn build_output_stream(
            &self,
            config: &BackendStreamConfig,
            mut callback: OutputCallback,
            _error_callback: ErrorCallback,
        ) -> crate::Result<StreamHandle> {
            // Run a handful of cycles synchronously, then park the callback.
            let mut buffer = vec![0.0f32; config.buffer_size as usize * 2];
            for _ in 0..4 {
                callback(&mut buffer);
            }
            Ok(StreamHandle::new(callback))
        }

        fn build_input_stream(
            &self,
            _config: &BackendStreamConfig,
            callback: InputCallback,
            _error_callback: ErrorCallback,
        ) -> crate::Result<StreamHandle> {
            Ok(StreamHandle::new(callback))
        }
    }

    /// Backend whose streams never open, like a machine with no audio
    /// host.
    struct DeadBackend;

    impl AudioBackend for DeadBackend {
        fn name(&self) -> &str {
            "dead"
        }

        fn list_devices(&self) -> crate::Result<Vec<AudioDevice>> {
            Ok(Vec::new())
        }

        fn default_output_device(&self) -> crate::Result<Option<AudioDevice>> {
            Ok(None)
        }

        fn default_input_device(&self) -> crate::Result<Option<AudioDevice>> {
            Ok(None)
        }

        fn build_output_stream(
            &self,
            _config: &BackendStreamConfig,
            _callback: OutputCallback,
            _error_callback: ErrorCallback,
        ) -> crate::Result<StreamHandle> {
            Err(Error::BackendUnavailable("no audio host".into()))
        }

        fn build_input_stream(
            &self,
            _config: &BackendStreamConfig,
            _callback: InputCallback,
            _error_callback: ErrorCallback,
        ) -> crate::Result<StreamHandle> {
            Err(Error::BackendUnavailable("no audio host".into()))
        }
    }

    #[test]
    fn start_runs_cycles_and_advances_transport() {
        let mut engine = Engine::new(Box::new(MockBackend), BackendStreamConfig::default());
        engine.transport_handle().request_roll();
        engine.start().unwrap();
        let context = engine.context();
        let ctx = context.lock().unwrap();
        // 4 mock cycles of 256 frames, rolling from the first boundary.
        assert_eq!(ctx.transport().playhead_frames(), 4 * 256);
    }

    #[test]
    fn unavailable_backend_fails_start() {
        let mut engine = Engine::new(Box::new(DeadBackend), BackendStreamConfig::default());
        assert!(matches!(
            engine.start(),
            Err(Error::BackendUnavailable(_))
        ));
        assert!(!engine.is_running());
    }

    #[test]
    fn double_start_is_rejected() {
        let mut engine = Engine::new(Box::new(MockBackend), BackendStreamConfig::default());
        engine.start().unwrap();
        assert!(matches!(engine.start(), Err(Error::AlreadyRunning)));
    }

    #[test]
    fn queued_midi_is_consumed_by_cycles() {
        let mut engine = Engine::new(Box::new(MockBackend), BackendStreamConfig::default());
        engine.queue_midi(&[0x90, 60, 100]);
        engine.queue_midi(&[0x80, 60, 0]);
        // Cycles run inside start; the queue must drain without panicking.
        engine.start().unwrap();
        assert!(engine.is_running());
    }
}
