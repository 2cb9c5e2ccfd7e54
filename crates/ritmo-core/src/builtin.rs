//! Built-in processors: the channel fader plus a small sine instrument and
//! pattern sequencer used for offline rendering and testing.

use crate::midi::{MidiEvent, MidiMessage};
use crate::processor::{ProcessContext, PortIo, Processor, ProcessorFault};

/// A channel's gain stage.
///
/// Amplitude is linear (1.0 = unity). The router applies it sample by
/// sample, so automation-rate changes take effect at block boundaries.
#[derive(Clone, Copy, Debug)]
pub struct Fader {
    amp: f32,
}

impl Fader {
    /// Creates a fader at unity gain.
    pub fn new() -> Self {
        Self { amp: 1.0 }
    }

    /// Current linear amplitude.
    pub fn amp(&self) -> f32 {
        self.amp
    }

    /// Sets the linear amplitude. Negative values are clamped to zero.
    pub fn set_amp(&mut self, amp: f32) {
        self.amp = amp.max(0.0);
    }
}

impl Default for Fader {
    fn default() -> Self {
        Self::new()
    }
}

const MAX_VOICES: usize = 8;

#[derive(Clone, Copy)]
struct Voice {
    pitch: u8,
    gain: f32,
    phase: f32,
}

/// A polyphonic sine synth.
///
/// One MIDI input, stereo audio output. Mostly useful for rendering test
/// material and verifying MIDI routing; it is not meant to sound good.
pub struct SineInstrument {
    sample_rate: u32,
    voices: [Option<Voice>; MAX_VOICES],
}

impl SineInstrument {
    /// Output level per voice at full velocity.
    const VOICE_GAIN: f32 = 0.25;

    /// Creates an instrument for the given sample rate.
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            voices: [None; MAX_VOICES],
        }
    }

    fn note_on(&mut self, pitch: u8, velocity: u8) {
        let gain = Self::VOICE_GAIN * f32::from(velocity) / 127.0;
        // Retrigger an existing voice for the same pitch, else take a free
        // slot. When all slots are busy the note is dropped.
        let slot = self
            .voices
            .iter()
            .position(|v| v.is_some_and(|v| v.pitch == pitch))
            .or_else(|| self.voices.iter().position(Option::is_none));
        if let Some(slot) = slot {
            self.voices[slot] = Some(Voice {
                pitch,
                gain,
                phase: 0.0,
            });
        }
    }

    fn note_off(&mut self, pitch: u8) {
        for voice in &mut self.voices {
            if voice.is_some_and(|v| v.pitch == pitch) {
                *voice = None;
            }
        }
    }

    fn apply(&mut self, message: MidiMessage) {
        match message {
            MidiMessage::NoteOn {
                pitch, velocity, ..
            } => self.note_on(pitch, velocity),
            MidiMessage::NoteOff { pitch, .. } => self.note_off(pitch),
            MidiMessage::ControlChange { .. } | MidiMessage::Raw(_) => {}
        }
    }
}

fn pitch_to_freq(pitch: u8) -> f32 {
    440.0 * 2.0_f32.powf((f32::from(pitch) - 69.0) / 12.0)
}

impl Processor for SineInstrument {
    fn name(&self) -> &str {
        "sine instrument"
    }

    fn process(&mut self, ctx: &ProcessContext, io: &mut PortIo<'_>) -> Result<(), ProcessorFault> {
        let inputs = io.inputs;
        let events = inputs[0].events();
        let (left, right) = io.audio_out_pair(0, 1);
        let mut next_event = 0;
        for frame in 0..ctx.n_frames {
            while next_event < events.len() && events[next_event].time as usize <= frame {
                self.apply(events[next_event].message);
                next_event += 1;
            }
            let mut sample = 0.0;
            for voice in self.voices.iter_mut().flatten() {
                sample += (voice.phase * std::f32::consts::TAU).sin() * voice.gain;
                voice.phase += pitch_to_freq(voice.pitch) / self.sample_rate as f32;
                if voice.phase >= 1.0 {
                    voice.phase -= 1.0;
                }
            }
            left[frame] = sample;
            right[frame] = sample;
        }
        // Events stamped past the block still apply, so a truncated last
        // block does not swallow note-offs.
        for event in &events[next_event..] {
            self.apply(event.message);
        }
        Ok(())
    }

    fn set_sample_rate(&mut self, rate: u32) {
        self.sample_rate = rate;
    }

    fn reset(&mut self) {
        self.voices = [None; MAX_VOICES];
    }
}

/// One step of a [`PatternSequencer`].
#[derive(Clone, Copy, Debug)]
pub struct PatternStep {
    /// Timeline position in ticks.
    pub tick: u64,
    /// Message to emit when the playhead crosses the tick.
    pub message: MidiMessage,
}

/// Emits a fixed MIDI pattern as the playhead moves.
///
/// The pattern is given in timeline ticks and converted to frames at the
/// current tempo each block, so tempo changes shift the emitted events.
/// Nothing is emitted while the transport is stopped.
pub struct PatternSequencer {
    steps: Vec<PatternStep>,
}

impl PatternSequencer {
    /// Creates a sequencer from pattern steps. Steps are sorted by tick.
    pub fn new(mut steps: Vec<PatternStep>) -> Self {
        steps.sort_by_key(|s| s.tick);
        Self { steps }
    }
}

impl Processor for PatternSequencer {
    fn name(&self) -> &str {
        "pattern sequencer"
    }

    fn process(&mut self, ctx: &ProcessContext, io: &mut PortIo<'_>) -> Result<(), ProcessorFault> {
        if !ctx.rolling {
            return Ok(());
        }
        let start = ctx.playhead_frames;
        let end = start + ctx.n_frames as u64;
        let out = io.midi_out(0);
        for step in &self.steps {
            let frame = (step.tick as f64 * ctx.frames_per_tick) as u64;
            if frame >= start && frame < end {
                out.push(MidiEvent::new((frame - start) as u32, step.message));
            }
        }
        Ok(())
    }
}
