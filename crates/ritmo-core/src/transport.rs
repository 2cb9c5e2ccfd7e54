//! Transport: playhead, tempo and the play-state machine.
//!
//! State changes are requested from any thread through a [`TransportHandle`]
//! and applied by the audio thread at the next cycle boundary, so the
//! playhead never moves mid-block.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};

/// Timeline resolution. A bar of 4/4 spans this many ticks.
pub const TICKS_PER_BAR: u32 = 3840;

/// Ticks per quarter note in 4/4.
pub const TICKS_PER_QUARTER_NOTE: u32 = TICKS_PER_BAR / 4;

const REQ_NONE: u8 = 0;
const REQ_ROLL: u8 = 1;
const REQ_PAUSE: u8 = 2;

const NO_SEEK: u64 = u64::MAX;

/// Current state of the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayState {
    /// Not playing; playhead parked.
    Stopped,
    /// Roll requested, takes effect at the next cycle boundary.
    RollRequested,
    /// Playing; the playhead advances every cycle.
    Rolling,
    /// Pause requested, takes effect at the next cycle boundary.
    PauseRequested,
    /// Paused; playhead keeps its position.
    Paused,
}

/// State shared between the transport and its handles.
struct Shared {
    request: AtomicU8,
    /// Pending seek target in frames, or `NO_SEEK`.
    seek: AtomicU64,
    paused: Mutex<bool>,
    pause_signal: Condvar,
}

/// Cheap clonable handle for requesting transport changes from any thread.
#[derive(Clone)]
pub struct TransportHandle {
    shared: Arc<Shared>,
}

impl TransportHandle {
    /// Requests playback. Applied at the next cycle boundary.
    pub fn request_roll(&self) {
        self.shared.request.store(REQ_ROLL, Ordering::Release);
    }

    /// Requests a pause. Applied at the next cycle boundary.
    pub fn request_pause(&self) {
        self.shared.request.store(REQ_PAUSE, Ordering::Release);
    }

    /// Requests a playhead move. Applied at the next cycle boundary; a later
    /// request before the boundary wins.
    pub fn seek(&self, frames: u64) {
        self.shared
            .seek
            .store(frames.min(NO_SEEK - 1), Ordering::Release);
    }

    /// Blocks until a requested pause has taken effect.
    ///
    /// Returns immediately if the transport is already paused. Only call
    /// this while the audio thread is running cycles, or it will wait
    /// forever.
    pub fn wait_until_paused(&self) {
        let Ok(mut paused) = self.shared.paused.lock() else {
            return;
        };
        while !*paused {
            match self.shared.pause_signal.wait(paused) {
                Ok(guard) => paused = guard,
                Err(_) => return,
            }
        }
    }
}

/// The engine timeline.
///
/// Owned by whoever holds the engine lock; cross-thread interaction goes
/// through [`TransportHandle`].
pub struct Transport {
    state: PlayState,
    playhead: u64,
    sample_rate: u32,
    bpm: f64,
    beats_per_bar: u32,
    loop_enabled: bool,
    loop_start: u64,
    loop_end: u64,
    shared: Arc<Shared>,
}

impl Transport {
    /// Creates a stopped transport at 120 BPM, 4/4.
    pub fn new(sample_rate: u32) -> Self {
        Self {
            state: PlayState::Stopped,
            playhead: 0,
            sample_rate,
            bpm: 120.0,
            beats_per_bar: 4,
            loop_enabled: false,
            loop_start: 0,
            loop_end: 0,
            shared: Arc::new(Shared {
                request: AtomicU8::new(REQ_NONE),
                seek: AtomicU64::new(NO_SEEK),
                paused: Mutex::new(false),
                pause_signal: Condvar::new(),
            }),
        }
    }

    /// Returns a handle for other threads.
    pub fn handle(&self) -> TransportHandle {
        TransportHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Current play state, including not-yet-applied requests.
    pub fn play_state(&self) -> PlayState {
        match self.shared.request.load(Ordering::Acquire) {
            REQ_ROLL => PlayState::RollRequested,
            REQ_PAUSE => PlayState::PauseRequested,
            _ => self.state,
        }
    }

    /// Whether the playhead advances this cycle.
    pub fn is_rolling(&self) -> bool {
        self.state == PlayState::Rolling
    }

    /// Playhead position in frames.
    pub fn playhead_frames(&self) -> u64 {
        self.playhead
    }

    /// Playhead position in ticks at the current tempo.
    pub fn playhead_ticks(&self) -> f64 {
        self.playhead as f64 / self.frames_per_tick()
    }

    /// Current tempo.
    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    /// Sets the tempo. Values are clamped to a sane range.
    pub fn set_bpm(&mut self, bpm: f64) {
        self.bpm = bpm.clamp(20.0, 999.0);
    }

    /// Beats per bar of the current time signature.
    pub fn beats_per_bar(&self) -> u32 {
        self.beats_per_bar
    }

    /// Sets the time signature numerator.
    pub fn set_beats_per_bar(&mut self, beats: u32) {
        self.beats_per_bar = beats.max(1);
    }

    /// Engine sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Updates the engine sample rate. The playhead keeps its frame
    /// position, so its musical position shifts.
    pub fn set_sample_rate(&mut self, rate: u32) {
        self.sample_rate = rate;
    }

    /// Frames per timeline tick at the current tempo and signature.
    pub fn frames_per_tick(&self) -> f64 {
        f64::from(self.sample_rate) * 60.0 * f64::from(self.beats_per_bar)
            / (self.bpm * f64::from(TICKS_PER_BAR))
    }

    /// Converts a tick position to frames at the current tempo.
    pub fn ticks_to_frames(&self, ticks: f64) -> u64 {
        (ticks * self.frames_per_tick()).round() as u64
    }

    /// Configures the loop region. `end` must be past `start` for the loop
    /// to have any effect.
    pub fn set_loop_region(&mut self, start: u64, end: u64, enabled: bool) {
        self.loop_start = start;
        self.loop_end = end;
        self.loop_enabled = enabled && end > start;
    }

    /// Whether looping is active.
    pub fn loop_enabled(&self) -> bool {
        self.loop_enabled
    }

    /// Loop region as (start, end) frames.
    pub fn loop_region(&self) -> (u64, u64) {
        (self.loop_start, self.loop_end)
    }

    /// Moves the playhead directly. Only safe from the thread that owns the
    /// transport; other threads use [`TransportHandle::seek`].
    pub fn set_playhead(&mut self, frames: u64) {
        self.playhead = frames;
    }

    /// Forces a state without the request round-trip. Used by offline
    /// rendering, which owns the engine for the duration.
    pub fn set_state_direct(&mut self, state: PlayState) {
        self.state = state;
        self.set_paused_flag(state == PlayState::Paused);
    }

    /// Applies pending seek and state requests. Called once per cycle,
    /// before any processing.
    pub fn apply_requested(&mut self) {
        let seek = self.shared.seek.swap(NO_SEEK, Ordering::AcqRel);
        if seek != NO_SEEK {
            self.playhead = seek;
            tracing::debug!(frames = seek, "playhead moved");
        }
        match self.shared.request.swap(REQ_NONE, Ordering::AcqRel) {
            REQ_ROLL => {
                if self.state != PlayState::Rolling {
                    tracing::debug!("transport rolling");
                    self.state = PlayState::Rolling;
                    self.set_paused_flag(false);
                }
            }
            REQ_PAUSE => {
                if self.state == PlayState::Rolling {
                    tracing::debug!(playhead = self.playhead, "transport paused");
                    self.state = PlayState::Paused;
                    self.set_paused_flag(true);
                }
            }
            _ => {}
        }
    }

    /// Advances the playhead by one block if rolling, wrapping at the loop
    /// end when looping is active.
    pub fn advance(&mut self, n_frames: u64) {
        if self.state != PlayState::Rolling {
            return;
        }
        self.playhead += n_frames;
        if self.loop_enabled && self.playhead >= self.loop_end {
            self.playhead = self.loop_start + (self.playhead - self.loop_end);
        }
    }

    fn set_paused_flag(&self, value: bool) {
        if let Ok(mut paused) = self.shared.paused.lock() {
            *paused = value;
            if value {
                self.shared.pause_signal.notify_all();
            }
        }
    }
}
