//! Offline rendering (export / bounce).
//!
//! The exporter owns the engine context for the duration of a render: it
//! parks the live transport state, rolls the graph block by block faster
//! than realtime, captures a tap point into a clip and restores the
//! context afterwards. Given the same graph and settings, two exports
//! produce identical samples.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use ritmo_core::{AudioClip, BounceStep, ChannelId, EngineContext, PlayState, PoolId};

/// Errors from offline rendering.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// The render was cancelled through its [`Progress`].
    #[error("export cancelled")]
    Cancelled,

    /// The time range is empty or inverted.
    #[error("invalid export range: {start}..{end}")]
    InvalidRange {
        /// Range start in frames.
        start: u64,
        /// Range end in frames.
        end: u64,
    },

    /// The requested tap channel does not exist.
    #[error("channel {0} not found")]
    ChannelNotFound(u32),

    /// WAV encoding failed.
    #[error("WAV file error: {0}")]
    Wav(#[from] hound::Error),

    /// Filesystem error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What part of the project contributes signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportScope {
    /// Everything currently enabled.
    Full,
    /// Only channels marked for bounce; everything else is muted.
    BouncedTracks,
}

/// The time span to render.
#[derive(Clone, Copy, Debug)]
pub enum TimeRange {
    /// The transport's loop region.
    Loop,
    /// An explicit frame range, half-open.
    Frames {
        /// First frame to render.
        start: u64,
        /// One past the last frame.
        end: u64,
    },
}

/// Output sample format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BitDepth {
    /// 16-bit linear PCM.
    Pcm16,
    /// 24-bit linear PCM.
    Pcm24,
    /// 32-bit IEEE float.
    Float32,
}

impl BitDepth {
    /// Bits per sample.
    pub fn bits(self) -> u16 {
        match self {
            Self::Pcm16 => 16,
            Self::Pcm24 => 24,
            Self::Float32 => 32,
        }
    }
}

/// Everything an export needs to know.
#[derive(Clone, Debug)]
pub struct ExportSettings {
    /// Which channels contribute.
    pub scope: ExportScope,
    /// The span to render.
    pub range: TimeRange,
    /// Output sample format.
    pub bit_depth: BitDepth,
    /// Channel whose signal is captured; `None` captures the master.
    pub tap_channel: Option<ChannelId>,
    /// Where within the tap channel the signal is read.
    pub tap: BounceStep,
    /// In bounce scope, also keep the bounced channels' routing targets
    /// audible so group processing is included.
    pub with_parents: bool,
    /// Title stamped into logs (and file metadata when the sink supports
    /// it).
    pub title: String,
    /// Artist, same as `title`.
    pub artist: String,
    /// Genre, same as `title`.
    pub genre: String,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            scope: ExportScope::Full,
            range: TimeRange::Loop,
            bit_depth: BitDepth::Float32,
            tap_channel: None,
            tap: BounceStep::PostFader,
            with_parents: true,
            title: String::new(),
            artist: String::new(),
            genre: String::new(),
        }
    }
}

/// Shared progress and cancellation state for a running export.
///
/// Clone the `Arc` and poll from a UI thread; call [`Progress::cancel`] to
/// abort at the next block boundary.
#[derive(Debug, Default)]
pub struct Progress {
    rendered: AtomicU64,
    total: AtomicU64,
    cancelled: AtomicBool,
}

impl Progress {
    /// Creates an idle progress tracker.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fraction complete, 0.0 to 1.0.
    pub fn fraction(&self) -> f64 {
        let total = self.total.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        self.rendered.load(Ordering::Relaxed) as f64 / total as f64
    }

    /// Frames rendered so far.
    pub fn rendered_frames(&self) -> u64 {
        self.rendered.load(Ordering::Relaxed)
    }

    /// Requests cancellation. Takes effect at the next block boundary.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Saved context state, restored when a render finishes or aborts.
struct SavedState {
    play_state: PlayState,
    playhead: u64,
    enabled: Vec<(ChannelId, bool)>,
}

/// Offline renderer.
pub struct Exporter;

impl Exporter {
    /// Renders the configured range into a stereo clip.
    ///
    /// The caller must not run live cycles concurrently; in practice the
    /// engine lock guarantees that.
    pub fn export(
        ctx: &mut EngineContext,
        settings: &ExportSettings,
        progress: &Progress,
    ) -> std::result::Result<AudioClip, ExportError> {
        Self::export_inner(ctx, settings, progress).map(|(clip, _)| clip)
    }

    fn export_inner(
        ctx: &mut EngineContext,
        settings: &ExportSettings,
        progress: &Progress,
    ) -> std::result::Result<(AudioClip, PoolId), ExportError> {
        let (start, end) = match settings.range {
            TimeRange::Loop => ctx.transport().loop_region(),
            TimeRange::Frames { start, end } => (start, end),
        };
        if end <= start {
            return Err(ExportError::InvalidRange { start, end });
        }
        let tap_channel = settings.tap_channel.unwrap_or_else(|| ctx.master());
        let (tap_l, tap_r) = ctx
            .mixer()
            .tap_ports(tap_channel, settings.tap)
            .ok_or(ExportError::ChannelNotFound(tap_channel.index()))?;

        let saved = save_state(ctx);
        let result = render(ctx, settings, progress, start, end, (tap_l, tap_r));
        restore_state(ctx, saved);
        let clip = result?;
        let id = ctx.pool_mut().add_clip(clip.clone());
        Ok((clip, id))
    }

    /// Renders and writes straight to a WAV file.
    pub fn export_to_file<P: AsRef<Path>>(
        ctx: &mut EngineContext,
        settings: &ExportSettings,
        progress: &Progress,
        path: P,
    ) -> std::result::Result<AudioClip, ExportError> {
        let (clip, id) = Self::export_inner(ctx, settings, progress)?;
        crate::wav::write_clip(path, &clip, settings.bit_depth)?;
        ctx.pool_mut().write_to_pool(id);
        Ok(clip)
    }
}

fn save_state(ctx: &EngineContext) -> SavedState {
    SavedState {
        play_state: ctx.transport().play_state(),
        playhead: ctx.transport().playhead_frames(),
        enabled: ctx
            .mixer()
            .channels()
            .map(|ch| (ch.id(), ctx.mixer().is_enabled(ch.id())))
            .collect(),
    }
}

fn restore_state(ctx: &mut EngineContext, saved: SavedState) {
    for (channel, enabled) in saved.enabled {
        let _ = ctx.mixer_mut().set_enabled(channel, enabled);
    }
    let transport = ctx.transport_mut();
    transport.set_playhead(saved.playhead);
    transport.set_state_direct(match saved.play_state {
        PlayState::Rolling | PlayState::RollRequested => PlayState::Paused,
        other => other,
    });
}

fn render(
    ctx: &mut EngineContext,
    settings: &ExportSettings,
    progress: &Progress,
    start: u64,
    end: u64,
    tap: (ritmo_core::PortId, ritmo_core::PortId),
) -> std::result::Result<AudioClip, ExportError> {
    if settings.scope == ExportScope::BouncedTracks {
        mute_unbounced(ctx, settings.with_parents);
    }

    // A deterministic render starts from quiet processors and empty
    // feedback snapshots.
    ctx.mixer_mut().reset_all();
    ctx.ports_mut().clear_feedback();
    ctx.transport_mut().set_playhead(start);
    ctx.transport_mut().set_state_direct(PlayState::Rolling);

    let total = end - start;
    progress.total.store(total, Ordering::Relaxed);
    progress.rendered.store(0, Ordering::Relaxed);

    let block = ctx.block_len();
    let sample_rate = ctx.sample_rate();
    let mut out_left = vec![0.0f32; block];
    let mut out_right = vec![0.0f32; block];
    let mut left = Vec::with_capacity(total as usize);
    let mut right = Vec::with_capacity(total as usize);

    tracing::info!(
        start,
        end,
        title = %settings.title,
        artist = %settings.artist,
        genre = %settings.genre,
        "export started"
    );

    let mut remaining = total;
    while remaining > 0 {
        if progress.is_cancelled() {
            tracing::info!(rendered = total - remaining, "export cancelled");
            return Err(ExportError::Cancelled);
        }
        let n = block.min(remaining as usize);
        ctx.process_cycle(&[], None, &mut out_left[..n], &mut out_right[..n]);
        capture(ctx, tap.0, &mut left, n);
        capture(ctx, tap.1, &mut right, n);
        remaining -= n as u64;
        progress.rendered.fetch_add(n as u64, Ordering::Relaxed);
    }

    tracing::info!(frames = left.len(), "export finished");
    let name = if settings.title.is_empty() {
        "bounce".to_owned()
    } else {
        settings.title.clone()
    };
    Ok(AudioClip::from_stereo(name, sample_rate, &left, &right))
}

/// Disables every non-master channel that is not marked for bounce. With
/// parents, a bounced channel's whole output chain stays live.
fn mute_unbounced(ctx: &mut EngineContext, with_parents: bool) {
    let master = ctx.master();
    let mut keep: Vec<ChannelId> = vec![master];
    for channel in ctx.mixer().channels() {
        if !channel.bounce() {
            continue;
        }
        keep.push(channel.id());
        if with_parents {
            let mut current = channel.output();
            while let Some(parent) = current {
                if keep.contains(&parent) {
                    break;
                }
                keep.push(parent);
                current = ctx.mixer().channel(parent).and_then(|ch| ch.output());
            }
        }
    }
    let all: Vec<ChannelId> = ctx.mixer().channels().map(|ch| ch.id()).collect();
    for channel in all {
        let _ = ctx
            .mixer_mut()
            .set_enabled(channel, keep.contains(&channel));
    }
}

fn capture(ctx: &EngineContext, port: ritmo_core::PortId, out: &mut Vec<f32>, n: usize) {
    if let Some(p) = ctx.ports().get(port) {
        out.extend_from_slice(&p.buffer().samples()[..n]);
    }
}
