//! Integration tests for offline export and WAV I/O.

use ritmo_core::{
    AudioClip, BounceStep, EngineContext, IoSpec, MidiMessage, PatternSequencer, PatternStep,
    PlayState, SineInstrument,
};
use ritmo_engine::{
    BitDepth, ExportError, ExportScope, ExportSettings, Exporter, Progress, TimeRange, read_clip,
    write_clip,
};
use tempfile::NamedTempFile;

// ---------------------------------------------------------------------------
// Project fixture: one instrument channel playing a short pattern
// ---------------------------------------------------------------------------

fn note_pattern() -> Vec<PatternStep> {
    vec![
        PatternStep {
            tick: 0,
            message: MidiMessage::NoteOn {
                channel: 0,
                pitch: 57,
                velocity: 120,
            },
        },
        PatternStep {
            tick: 960,
            message: MidiMessage::NoteOff {
                channel: 0,
                pitch: 57,
                velocity: 0,
            },
        },
    ]
}

fn build_project(block_len: usize) -> (EngineContext, ritmo_core::ChannelId) {
    let mut ctx = EngineContext::new(48_000, block_len);
    let (mixer, ports) = ctx.mixer_and_ports_mut();
    let channel = mixer.add_channel(ports, "synth").unwrap();
    let synth = mixer
        .add_source(
            ports,
            channel,
            Box::new(SineInstrument::new(48_000)),
            IoSpec::instrument(),
        )
        .unwrap();
    let sequencer = mixer
        .add_source(
            ports,
            channel,
            Box::new(PatternSequencer::new(note_pattern())),
            IoSpec::midi_source(),
        )
        .unwrap();
    let (synth_ins, _) = mixer.processor_ports(synth).unwrap();
    let (_, seq_outs) = mixer.processor_ports(sequencer).unwrap();
    let (synth_midi, seq_midi) = (synth_ins[0], seq_outs[0]);
    ports.connect(seq_midi, synth_midi).unwrap();
    (ctx, channel)
}

fn settings(end: u64) -> ExportSettings {
    ExportSettings {
        range: TimeRange::Frames { start: 0, end },
        ..ExportSettings::default()
    }
}

// ---------------------------------------------------------------------------
// Export behavior
// ---------------------------------------------------------------------------

#[test]
fn full_export_renders_audio() {
    let (mut ctx, _) = build_project(256);
    let clip = Exporter::export(&mut ctx, &settings(48_000), &Progress::new()).unwrap();
    assert_eq!(clip.num_frames(), 48_000);
    assert_eq!(clip.channels(), 2);
    assert!(!clip.is_silent(1e-6));
}

#[test]
fn export_is_deterministic() {
    let (mut ctx, _) = build_project(256);
    let progress = Progress::new();
    let first = Exporter::export(&mut ctx, &settings(24_000), &progress).unwrap();
    let second = Exporter::export(&mut ctx, &settings(24_000), &progress).unwrap();
    assert_eq!(first.frames(), second.frames());
}

#[test]
fn export_ignores_feedback_residue_from_live_playback() {
    // Same project twice, each with the channel fader routed back into
    // its own input stage. One context plays live first, filling the
    // feedback snapshots; the export must still match a fresh context.
    let build = || {
        let (mut ctx, channel) = build_project(256);
        let (mixer, ports) = ctx.mixer_and_ports_mut();
        mixer.set_fader_amp(channel, 0.5).unwrap();
        let (fader_l, fader_r) = mixer.tap_ports(channel, BounceStep::PostFader).unwrap();
        let input = mixer.channel(channel).unwrap().input();
        let (ins, _) = mixer.processor_ports(input).unwrap();
        ports.connect(fader_l, ins[0]).unwrap();
        ports.connect(fader_r, ins[1]).unwrap();
        ctx
    };

    let mut primed = build();
    primed.transport_mut().set_state_direct(PlayState::Rolling);
    let mut left = vec![0.0f32; 256];
    let mut right = vec![0.0f32; 256];
    for _ in 0..20 {
        primed.process_cycle(&[], None, &mut left, &mut right);
    }
    primed.transport_mut().set_state_direct(PlayState::Stopped);

    let mut fresh = build();
    let lived = Exporter::export(&mut primed, &settings(4_800), &Progress::new()).unwrap();
    let clean = Exporter::export(&mut fresh, &settings(4_800), &Progress::new()).unwrap();
    assert_eq!(lived.frames(), clean.frames());
}

#[test]
fn export_length_is_exact_for_odd_blocks() {
    // A range that is not a multiple of the block length must not be
    // padded or truncated.
    let (mut ctx, _) = build_project(256);
    let clip = Exporter::export(&mut ctx, &settings(1000), &Progress::new()).unwrap();
    assert_eq!(clip.num_frames(), 1000);
}

#[test]
fn export_restores_transport_state() {
    let (mut ctx, _) = build_project(256);
    ctx.transport_mut().set_playhead(12_345);
    Exporter::export(&mut ctx, &settings(4_800), &Progress::new()).unwrap();
    assert_eq!(ctx.transport().playhead_frames(), 12_345);
    assert_eq!(ctx.transport().play_state(), PlayState::Stopped);
}

#[test]
fn bounce_scope_without_marked_tracks_is_silent() {
    let (mut ctx, _) = build_project(256);
    let mut s = settings(24_000);
    s.scope = ExportScope::BouncedTracks;
    let clip = Exporter::export(&mut ctx, &s, &Progress::new()).unwrap();
    assert!(clip.is_silent(0.0));
}

#[test]
fn bounce_scope_with_marked_track_matches_full_export() {
    let (mut ctx, channel) = build_project(256);
    let full = Exporter::export(&mut ctx, &settings(24_000), &Progress::new()).unwrap();

    ctx.mixer_mut().set_bounce(channel, true).unwrap();
    let mut s = settings(24_000);
    s.scope = ExportScope::BouncedTracks;
    let bounced = Exporter::export(&mut ctx, &s, &Progress::new()).unwrap();

    assert_eq!(full.frames(), bounced.frames());
    assert!(!bounced.is_silent(1e-6));
}

#[test]
fn bounce_through_bus_is_silent_without_parents() {
    let (mut ctx, channel) = build_project(256);
    {
        let (mixer, ports) = ctx.mixer_and_ports_mut();
        let bus = mixer.add_channel(ports, "bus").unwrap();
        mixer.route(ports, channel, bus).unwrap();
        mixer.set_bounce(channel, true).unwrap();
    }

    let mut s = settings(24_000);
    s.scope = ExportScope::BouncedTracks;
    s.with_parents = false;
    let orphaned = Exporter::export(&mut ctx, &s, &Progress::new()).unwrap();
    // The muted bus swallows the marked channel's signal.
    assert!(orphaned.is_silent(0.0));

    s.with_parents = true;
    let grouped = Exporter::export(&mut ctx, &s, &Progress::new()).unwrap();
    assert!(!grouped.is_silent(1e-6));
}

#[test]
fn bounce_scope_restores_channel_enables() {
    let (mut ctx, channel) = build_project(256);
    let mut s = settings(4_800);
    s.scope = ExportScope::BouncedTracks;
    Exporter::export(&mut ctx, &s, &Progress::new()).unwrap();
    assert!(ctx.mixer().is_enabled(channel));
}

#[test]
fn cancelled_export_fails_and_restores() {
    let (mut ctx, channel) = build_project(256);
    let progress = Progress::new();
    progress.cancel();
    let err = Exporter::export(&mut ctx, &settings(48_000), &progress).unwrap_err();
    assert!(matches!(err, ExportError::Cancelled));
    assert!(ctx.mixer().is_enabled(channel));
    assert_eq!(ctx.transport().play_state(), PlayState::Stopped);
}

#[test]
fn empty_range_is_rejected() {
    let (mut ctx, _) = build_project(256);
    let err = Exporter::export(
        &mut ctx,
        &ExportSettings {
            range: TimeRange::Frames { start: 100, end: 100 },
            ..ExportSettings::default()
        },
        &Progress::new(),
    )
    .unwrap_err();
    assert!(matches!(err, ExportError::InvalidRange { .. }));
}

#[test]
fn loop_range_uses_transport_loop() {
    let (mut ctx, _) = build_project(256);
    ctx.transport_mut().set_loop_region(0, 4_800, true);
    let clip = Exporter::export(
        &mut ctx,
        &ExportSettings {
            range: TimeRange::Loop,
            ..ExportSettings::default()
        },
        &Progress::new(),
    )
    .unwrap();
    assert_eq!(clip.num_frames(), 4_800);
}

#[test]
fn progress_reaches_completion() {
    let (mut ctx, _) = build_project(256);
    let progress = Progress::new();
    Exporter::export(&mut ctx, &settings(9_600), &progress).unwrap();
    assert!((progress.fraction() - 1.0).abs() < 1e-12);
    assert_eq!(progress.rendered_frames(), 9_600);
}

// ---------------------------------------------------------------------------
// WAV roundtrips
// ---------------------------------------------------------------------------

#[test]
fn wav_roundtrip_float32() {
    let samples: Vec<f32> = (0..2_000)
        .map(|i| (i as f32 * 0.01).sin() * 0.8)
        .collect();
    let clip = AudioClip::new("rt", 2, 48_000, samples);
    let file = NamedTempFile::new().unwrap();
    write_clip(file.path(), &clip, BitDepth::Float32).unwrap();
    let loaded = read_clip(file.path(), "rt").unwrap();
    assert_eq!(loaded.channels(), 2);
    assert_eq!(loaded.sample_rate(), 48_000);
    assert_eq!(loaded.frames(), clip.frames());
}

#[test]
fn wav_roundtrip_pcm16_within_quantization() {
    let samples: Vec<f32> = (0..1_000).map(|i| (i as f32 * 0.02).sin() * 0.5).collect();
    let clip = AudioClip::new("rt16", 1, 44_100, samples);
    let file = NamedTempFile::new().unwrap();
    write_clip(file.path(), &clip, BitDepth::Pcm16).unwrap();
    let loaded = read_clip(file.path(), "rt16").unwrap();
    for (a, b) in clip.frames().iter().zip(loaded.frames().iter()) {
        assert!(
            (a - b).abs() < 1.0 / 32_000.0,
            "sample mismatch: {a} vs {b}"
        );
    }
}

#[test]
fn export_to_file_produces_readable_wav() {
    let (mut ctx, _) = build_project(256);
    let file = NamedTempFile::new().unwrap();
    let clip = Exporter::export_to_file(
        &mut ctx,
        &settings(9_600),
        &Progress::new(),
        file.path(),
    )
    .unwrap();
    let loaded = read_clip(file.path(), "readback").unwrap();
    assert_eq!(loaded.num_frames(), clip.num_frames());
    assert_eq!(loaded.frames(), clip.frames());
}
