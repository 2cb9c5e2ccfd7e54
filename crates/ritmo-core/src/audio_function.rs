//! Offline audio functions applied to clip selections.
//!
//! Every function reads a selection out of an existing clip and produces a
//! new pool clip holding the edited selection. The source clip is never
//! touched; undo works by pointing the region back at the old clip.

use crate::plugin::{PluginError, PluginHost, PluginDescriptor};
use crate::pool::{AudioClip, Pool, PoolId};
use crate::transport::TICKS_PER_QUARTER_NOTE;

/// Default nudge distance in ticks (a 64th note).
pub const DEFAULT_NUDGE_TICKS: u64 = (TICKS_PER_QUARTER_NOTE / 16) as u64;

/// An edit applied to an audio selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AudioFunction {
    /// Flips the polarity of every sample.
    Invert,
    /// Scales the selection so its peak hits 0 dBFS.
    NormalizePeak,
    /// Linear gain ramp from 0 to 1 across the selection.
    FadeIn,
    /// Linear gain ramp from 1 to 0 across the selection.
    FadeOut,
    /// Shifts audio earlier by the nudge distance, zero-filling the tail.
    NudgeLeft,
    /// Shifts audio later by the nudge distance, zero-filling the head.
    NudgeRight,
    /// Reverses the selection in time.
    Reverse,
    /// Runs the selection through an external plugin.
    ExternalPlugin,
    /// No-op edit; still snapshots the selection as a new clip.
    Identity,
}

impl std::fmt::Display for AudioFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Invert => "invert",
            Self::NormalizePeak => "normalize peak",
            Self::FadeIn => "fade in",
            Self::FadeOut => "fade out",
            Self::NudgeLeft => "nudge left",
            Self::NudgeRight => "nudge right",
            Self::Reverse => "reverse",
            Self::ExternalPlugin => "external plugin",
            Self::Identity => "identity",
        };
        f.write_str(name)
    }
}

/// A frame range within a clip. Half-open: `start..end`.
#[derive(Clone, Copy, Debug)]
pub struct Selection {
    /// First frame of the selection.
    pub start: usize,
    /// One past the last frame.
    pub end: usize,
}

impl Selection {
    /// Creates a selection covering `start..end`.
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Selection covering a whole clip.
    pub fn all(clip: &AudioClip) -> Self {
        Self {
            start: 0,
            end: clip.num_frames(),
        }
    }

    fn len(self) -> usize {
        self.end - self.start
    }
}

/// Parameters for [`apply`].
pub struct FunctionOptions<'a> {
    /// Shift distance for the nudge functions, in frames.
    pub nudge_frames: usize,
    /// Host and plugin for [`AudioFunction::ExternalPlugin`].
    pub plugin: Option<(&'a dyn PluginHost, &'a PluginDescriptor)>,
    /// Block size used when streaming through a plugin.
    pub block_len: usize,
}

impl Default for FunctionOptions<'_> {
    fn default() -> Self {
        Self {
            nudge_frames: 0,
            plugin: None,
            block_len: 1024,
        }
    }
}

impl<'a> FunctionOptions<'a> {
    /// Options with a nudge distance derived from the current tempo.
    pub fn with_nudge(frames_per_tick: f64) -> Self {
        Self {
            nudge_frames: (DEFAULT_NUDGE_TICKS as f64 * frames_per_tick) as usize,
            ..Self::default()
        }
    }

    /// Options carrying a plugin to apply.
    pub fn with_plugin(host: &'a dyn PluginHost, descriptor: &'a PluginDescriptor) -> Self {
        Self {
            plugin: Some((host, descriptor)),
            ..Self::default()
        }
    }
}

/// Errors from audio functions.
#[derive(Debug, thiserror::Error)]
pub enum FunctionError {
    /// The selection does not lie within the clip.
    #[error("selection {start}..{end} is outside the clip ({frames} frames)")]
    InvalidRange {
        /// Selection start frame.
        start: usize,
        /// Selection end frame.
        end: usize,
        /// Frames in the clip.
        frames: usize,
    },

    /// The selection is shorter than the nudge distance.
    #[error("selection of {len} frames is too short to nudge by {nudge} frames")]
    RangeTooShort {
        /// Selection length in frames.
        len: usize,
        /// Requested nudge distance in frames.
        nudge: usize,
    },

    /// Plugin apply was requested without a plugin.
    #[error("no plugin given for external plugin apply")]
    MissingPlugin,

    /// The plugin failed.
    #[error(transparent)]
    Plugin(#[from] PluginError),
}

/// Applies `function` to `selection` of `clip` and adds the result to the
/// pool as a new clip of the selection's length.
pub fn apply(
    pool: &mut Pool,
    clip: &AudioClip,
    selection: Selection,
    function: AudioFunction,
    opts: &FunctionOptions<'_>,
) -> Result<PoolId, FunctionError> {
    if selection.start >= selection.end || selection.end > clip.num_frames() {
        return Err(FunctionError::InvalidRange {
            start: selection.start,
            end: selection.end,
            frames: clip.num_frames(),
        });
    }
    let channels = clip.channels() as usize;
    let n = selection.len();
    let mut frames =
        clip.frames()[selection.start * channels..selection.end * channels].to_vec();

    match function {
        AudioFunction::Invert => {
            for s in &mut frames {
                *s = -*s;
            }
        }
        AudioFunction::NormalizePeak => {
            let peak = frames.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
            if peak > 0.0 {
                for s in &mut frames {
                    *s /= peak;
                }
            }
        }
        AudioFunction::FadeIn => {
            for frame in 0..n {
                let gain = frame as f32 / n as f32;
                for s in &mut frames[frame * channels..(frame + 1) * channels] {
                    *s *= gain;
                }
            }
        }
        AudioFunction::FadeOut => {
            for frame in 0..n {
                let gain = 1.0 - frame as f32 / n as f32;
                for s in &mut frames[frame * channels..(frame + 1) * channels] {
                    *s *= gain;
                }
            }
        }
        AudioFunction::NudgeLeft | AudioFunction::NudgeRight => {
            let nudge = opts.nudge_frames;
            if nudge >= n {
                return Err(FunctionError::RangeTooShort { len: n, nudge });
            }
            let shift = nudge * channels;
            let src = frames.clone();
            frames.fill(0.0);
            if function == AudioFunction::NudgeLeft {
                frames[..src.len() - shift].copy_from_slice(&src[shift..]);
            } else {
                frames[shift..].copy_from_slice(&src[..src.len() - shift]);
            }
        }
        AudioFunction::Reverse => {
            let src = frames.clone();
            for frame in 0..n {
                let from = (n - 1 - frame) * channels;
                frames[frame * channels..(frame + 1) * channels]
                    .copy_from_slice(&src[from..from + channels]);
            }
        }
        AudioFunction::ExternalPlugin => {
            let (host, descriptor) = opts.plugin.ok_or(FunctionError::MissingPlugin)?;
            apply_plugin(
                host,
                descriptor,
                clip.sample_rate(),
                opts.block_len,
                channels,
                &mut frames,
            )?;
        }
        AudioFunction::Identity => {}
    }

    let result = AudioClip::new(clip.name(), clip.channels(), clip.sample_rate(), frames);
    let id = pool.add_clip(result);
    pool.write_to_pool(id);
    tracing::debug!(%function, frames = n, "audio function applied");
    Ok(id)
}

/// Streams `frames` through a plugin in place, compensating for its
/// reported latency.
///
/// The plugin may only learn its true latency while running, so the
/// reported value is re-read once the stream is past the initial estimate.
/// After the input is exhausted, `latency` frames of silence are pushed
/// through to flush the tail the plugin is still holding.
fn apply_plugin(
    host: &dyn PluginHost,
    descriptor: &PluginDescriptor,
    sample_rate: u32,
    block_len: usize,
    channels: usize,
    frames: &mut [f32],
) -> Result<(), PluginError> {
    let n = frames.len() / channels;
    let mut instance = host.instantiate(descriptor)?;
    let block = block_len.max(1);
    instance.activate(sample_rate, block)?;

    let source = frames.to_vec();
    let mut left_in = vec![0.0f32; block];
    let mut right_in = vec![0.0f32; block];
    let mut left_out = vec![0.0f32; block];
    let mut right_out = vec![0.0f32; block];

    let right_channel = channels.min(2) - 1;
    let mut latency = instance.latency();
    let mut i = 0usize;
    let mut step = block.min(n);
    while i < n {
        for j in 0..step {
            left_in[j] = source[(i + j) * channels];
            right_in[j] = source[(i + j) * channels + right_channel];
        }
        instance.process(
            &left_in[..step],
            &right_in[..step],
            &mut left_out[..step],
            &mut right_out[..step],
        )?;
        for j in 0..step {
            let Some(at) = (i + j).checked_sub(latency) else {
                continue;
            };
            frames[at * channels] = left_out[j];
            frames[at * channels + right_channel] = right_out[j];
        }
        // The reported latency settles once the plugin has seen real input.
        if i > latency {
            latency = instance.latency();
        }
        i += step;
        step = step.min(n - i);
    }

    // Flush: feed silence until the delayed tail has drained.
    left_in.fill(0.0);
    right_in.fill(0.0);
    let mut flushed = 0usize;
    let mut step = block.min(latency);
    while flushed < latency {
        instance.process(
            &left_in[..step],
            &right_in[..step],
            &mut left_out[..step],
            &mut right_out[..step],
        )?;
        for j in 0..step {
            let Some(at) = (flushed + j + n).checked_sub(latency) else {
                continue;
            };
            if at >= n {
                continue;
            }
            frames[at * channels] = left_out[j];
            frames[at * channels + right_channel] = right_out[j];
        }
        flushed += step;
        step = step.min(latency - flushed);
    }

    instance.deactivate();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::PluginInstance;

    fn clip(samples: Vec<f32>) -> AudioClip {
        AudioClip::new("test", 1, 48_000, samples)
    }

    fn run(
        pool: &mut Pool,
        source: &AudioClip,
        function: AudioFunction,
        opts: &FunctionOptions<'_>,
    ) -> AudioClip {
        let id = apply(pool, source, Selection::all(source), function, opts).unwrap();
        pool.get(id).unwrap().clone()
    }

    #[test]
    fn invert_twice_is_identity() {
        let mut pool = Pool::new();
        let source = clip(vec![0.1, -0.2, 0.3, 0.0]);
        let once = run(&mut pool, &source, AudioFunction::Invert, &FunctionOptions::default());
        let twice = run(&mut pool, &once, AudioFunction::Invert, &FunctionOptions::default());
        assert_eq!(twice.frames(), source.frames());
    }

    #[test]
    fn normalize_hits_unity_peak() {
        let mut pool = Pool::new();
        let source = clip(vec![0.1, -0.5, 0.25]);
        let out = run(
            &mut pool,
            &source,
            AudioFunction::NormalizePeak,
            &FunctionOptions::default(),
        );
        assert!((out.peak() - 1.0).abs() < 1e-6);
        assert_eq!(out.sample(1, 0), -1.0);
    }

    #[test]
    fn normalize_of_silence_stays_silent() {
        let mut pool = Pool::new();
        let source = clip(vec![0.0; 16]);
        let out = run(
            &mut pool,
            &source,
            AudioFunction::NormalizePeak,
            &FunctionOptions::default(),
        );
        assert!(out.is_silent(0.0));
    }

    #[test]
    fn fades_ramp_linearly() {
        let mut pool = Pool::new();
        let source = clip(vec![1.0; 4]);
        let fade_in = run(&mut pool, &source, AudioFunction::FadeIn, &FunctionOptions::default());
        assert_eq!(fade_in.frames(), &[0.0, 0.25, 0.5, 0.75]);
        let fade_out = run(&mut pool, &source, AudioFunction::FadeOut, &FunctionOptions::default());
        assert_eq!(fade_out.frames(), &[1.0, 0.75, 0.5, 0.25]);
    }

    #[test]
    fn fades_scale_every_channel_of_a_frame_equally() {
        // The ramp advances per frame, not per interleaved sample, so a
        // stereo frame keeps its balance.
        let mut pool = Pool::new();
        let source = AudioClip::new("test", 2, 48_000, vec![1.0, -1.0, 1.0, -1.0]);
        let out = run(&mut pool, &source, AudioFunction::FadeIn, &FunctionOptions::default());
        assert_eq!(out.frames(), &[0.0, 0.0, 0.5, -0.5]);
    }

    #[test]
    fn nudge_left_then_right_zeroes_both_edges() {
        let mut pool = Pool::new();
        let source = clip(vec![1.0, 2.0, 3.0, 4.0]);
        let opts = FunctionOptions {
            nudge_frames: 1,
            ..FunctionOptions::default()
        };
        let left = run(&mut pool, &source, AudioFunction::NudgeLeft, &opts);
        assert_eq!(left.frames(), &[2.0, 3.0, 4.0, 0.0]);
        let back = run(&mut pool, &left, AudioFunction::NudgeRight, &opts);
        assert_eq!(back.frames(), &[0.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn nudge_longer_than_selection_fails() {
        let mut pool = Pool::new();
        let source = clip(vec![1.0, 2.0]);
        let opts = FunctionOptions {
            nudge_frames: 2,
            ..FunctionOptions::default()
        };
        let err = apply(
            &mut pool,
            &source,
            Selection::all(&source),
            AudioFunction::NudgeLeft,
            &opts,
        )
        .unwrap_err();
        assert!(matches!(err, FunctionError::RangeTooShort { .. }));
    }

    #[test]
    fn reverse_twice_is_identity() {
        let mut pool = Pool::new();
        let source = AudioClip::new("st", 2, 48_000, vec![1.0, -1.0, 2.0, -2.0, 3.0, -3.0]);
        let once = run(&mut pool, &source, AudioFunction::Reverse, &FunctionOptions::default());
        assert_eq!(once.frames(), &[3.0, -3.0, 2.0, -2.0, 1.0, -1.0]);
        let twice = run(&mut pool, &once, AudioFunction::Reverse, &FunctionOptions::default());
        assert_eq!(twice.frames(), source.frames());
    }

    #[test]
    fn identity_still_creates_a_pool_clip() {
        let mut pool = Pool::new();
        let source = clip(vec![0.5; 8]);
        let id = apply(
            &mut pool,
            &source,
            Selection::all(&source),
            AudioFunction::Identity,
            &FunctionOptions::default(),
        )
        .unwrap();
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.get(id).unwrap().frames(), source.frames());
    }

    #[test]
    fn selection_outside_clip_fails() {
        let mut pool = Pool::new();
        let source = clip(vec![0.0; 4]);
        let err = apply(
            &mut pool,
            &source,
            Selection::new(2, 8),
            AudioFunction::Invert,
            &FunctionOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, FunctionError::InvalidRange { .. }));
    }

    /// Passes audio through unchanged but `delay` frames late, like a
    /// look-ahead limiter would.
    struct DelayPlugin {
        delay: usize,
        left: Vec<f32>,
        right: Vec<f32>,
    }

    impl DelayPlugin {
        fn new(delay: usize) -> Self {
            Self {
                delay,
                left: vec![0.0; delay],
                right: vec![0.0; delay],
            }
        }
    }

    impl PluginInstance for DelayPlugin {
        fn activate(&mut self, _sample_rate: u32, _max_block: usize) -> Result<(), PluginError> {
            Ok(())
        }

        fn process(
            &mut self,
            left_in: &[f32],
            right_in: &[f32],
            left_out: &mut [f32],
            right_out: &mut [f32],
        ) -> Result<(), PluginError> {
            for i in 0..left_in.len() {
                self.left.push(left_in[i]);
                self.right.push(right_in[i]);
                left_out[i] = self.left.remove(0);
                right_out[i] = self.right.remove(0);
            }
            Ok(())
        }

        fn latency(&self) -> usize {
            self.delay
        }

        fn deactivate(&mut self) {}
    }

    struct DelayHost {
        delay: usize,
    }

    impl PluginHost for DelayHost {
        fn instantiate(
            &self,
            _descriptor: &PluginDescriptor,
        ) -> Result<Box<dyn PluginInstance>, PluginError> {
            Ok(Box::new(DelayPlugin::new(self.delay)))
        }
    }

    #[test]
    fn plugin_apply_compensates_latency() {
        // A pure-delay plugin with compensated latency must be an identity
        // transform, including the tail recovered by the flush pass.
        let mut pool = Pool::new();
        let n = 4096;
        let samples: Vec<f32> = (0..n).map(|i| ((i % 100) as f32) / 100.0).collect();
        let source = AudioClip::new("src", 2, 48_000, {
            let mut interleaved = Vec::with_capacity(n * 2);
            for s in &samples {
                interleaved.push(*s);
                interleaved.push(-*s);
            }
            interleaved
        });
        let host = DelayHost { delay: 128 };
        let descriptor = PluginDescriptor::new("urn:test:delay", "delay");
        let mut opts = FunctionOptions::with_plugin(&host, &descriptor);
        opts.block_len = 256;
        let out = {
            let id = apply(
                &mut pool,
                &source,
                Selection::all(&source),
                AudioFunction::ExternalPlugin,
                &opts,
            )
            .unwrap();
            pool.get(id).unwrap().clone()
        };
        assert_eq!(out.frames(), source.frames());
    }

    #[test]
    fn zero_latency_plugin_apply_is_identity() {
        let mut pool = Pool::new();
        let source = clip((0..512).map(|i| (i as f32).sin()).collect());
        let host = DelayHost { delay: 0 };
        let descriptor = PluginDescriptor::new("urn:test:delay", "delay");
        let opts = FunctionOptions::with_plugin(&host, &descriptor);
        let out = run(&mut pool, &source, AudioFunction::ExternalPlugin, &opts);
        assert_eq!(out.frames(), source.frames());
    }
}
