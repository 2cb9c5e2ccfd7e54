//! Property-based tests for ritmo-core audio functions and transport math.

use proptest::prelude::*;
use ritmo_core::{
    AudioClip, AudioFunction, FunctionOptions, Pool, Selection, Transport, TICKS_PER_BAR,
};

fn apply_all(clip: &AudioClip, function: AudioFunction, opts: &FunctionOptions<'_>) -> AudioClip {
    let mut pool = Pool::new();
    let id = ritmo_core::audio_function::apply(
        &mut pool,
        clip,
        Selection::all(clip),
        function,
        opts,
    )
    .unwrap();
    pool.get(id).unwrap().clone()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Inverting twice restores the original samples exactly.
    #[test]
    fn invert_is_an_involution(samples in prop::collection::vec(-1.0f32..=1.0f32, 2..512)) {
        let clip = AudioClip::new("p", 1, 48_000, samples.clone());
        let twice = apply_all(
            &apply_all(&clip, AudioFunction::Invert, &FunctionOptions::default()),
            AudioFunction::Invert,
            &FunctionOptions::default(),
        );
        prop_assert_eq!(twice.frames(), &samples[..]);
    }

    /// Reversing twice restores the original samples exactly, for any
    /// channel count that divides the buffer.
    #[test]
    fn reverse_is_an_involution(
        frames in prop::collection::vec(-1.0f32..=1.0f32, 1..256),
        channels in 1u16..=2,
    ) {
        let mut samples = frames.clone();
        samples.truncate(frames.len() / channels as usize * channels as usize);
        prop_assume!(!samples.is_empty());
        let clip = AudioClip::new("p", channels, 48_000, samples.clone());
        let twice = apply_all(
            &apply_all(&clip, AudioFunction::Reverse, &FunctionOptions::default()),
            AudioFunction::Reverse,
            &FunctionOptions::default(),
        );
        prop_assert_eq!(twice.frames(), &samples[..]);
    }

    /// Normalizing a non-silent clip yields a peak of exactly 1, and
    /// normalizing is idempotent after the first application.
    #[test]
    fn normalize_peaks_at_unity(samples in prop::collection::vec(-1.0f32..=1.0f32, 2..512)) {
        prop_assume!(samples.iter().any(|s| s.abs() > 1e-3));
        let clip = AudioClip::new("p", 1, 48_000, samples);
        let once = apply_all(&clip, AudioFunction::NormalizePeak, &FunctionOptions::default());
        prop_assert!((once.peak() - 1.0).abs() < 1e-6);
        let twice = apply_all(&once, AudioFunction::NormalizePeak, &FunctionOptions::default());
        prop_assert_eq!(twice.frames(), once.frames());
    }

    /// A nudge never changes the selection length and zero-fills exactly
    /// `nudge` frames at the vacated edge.
    #[test]
    fn nudge_preserves_length(
        samples in prop::collection::vec(0.5f32..=1.0f32, 8..256),
        nudge in 1usize..8,
    ) {
        let clip = AudioClip::new("p", 1, 48_000, samples.clone());
        let opts = FunctionOptions { nudge_frames: nudge, ..FunctionOptions::default() };
        let left = apply_all(&clip, AudioFunction::NudgeLeft, &opts);
        prop_assert_eq!(left.num_frames(), samples.len());
        prop_assert!(left.frames()[samples.len() - nudge..].iter().all(|&s| s == 0.0));
        let right = apply_all(&clip, AudioFunction::NudgeRight, &opts);
        prop_assert_eq!(right.num_frames(), samples.len());
        prop_assert!(right.frames()[..nudge].iter().all(|&s| s == 0.0));
    }

    /// Nudging right then left restores everything except the tail the
    /// round trip pushed past the selection edge.
    #[test]
    fn nudge_right_then_left_restores_interior(
        samples in prop::collection::vec(-1.0f32..=1.0f32, 8..256),
        nudge in 1usize..8,
    ) {
        let clip = AudioClip::new("p", 1, 48_000, samples.clone());
        let opts = FunctionOptions { nudge_frames: nudge, ..FunctionOptions::default() };
        let round = apply_all(
            &apply_all(&clip, AudioFunction::NudgeRight, &opts),
            AudioFunction::NudgeLeft,
            &opts,
        );
        let keep = samples.len() - nudge;
        prop_assert_eq!(&round.frames()[..keep], &samples[..keep]);
        prop_assert!(round.frames()[keep..].iter().all(|&s| s == 0.0));
    }

    /// Fades keep every sample within the original magnitude.
    #[test]
    fn fades_never_amplify(samples in prop::collection::vec(-1.0f32..=1.0f32, 2..256)) {
        let clip = AudioClip::new("p", 1, 48_000, samples.clone());
        for function in [AudioFunction::FadeIn, AudioFunction::FadeOut] {
            let out = apply_all(&clip, function, &FunctionOptions::default());
            for (o, s) in out.frames().iter().zip(samples.iter()) {
                prop_assert!(o.abs() <= s.abs() + 1e-7);
            }
        }
    }

    /// Ticks-to-frames round-trips through frames_per_tick within a frame.
    #[test]
    fn tick_frame_conversion_is_consistent(
        bpm in 30.0f64..300.0,
        sample_rate in prop::sample::select(vec![44_100u32, 48_000, 96_000]),
        ticks in 0u32..(TICKS_PER_BAR * 64),
    ) {
        let mut transport = Transport::new(sample_rate);
        transport.set_bpm(bpm);
        let frames = transport.ticks_to_frames(f64::from(ticks));
        let back = frames as f64 / transport.frames_per_tick();
        prop_assert!((back - f64::from(ticks)).abs() < 1.0);
    }
}
