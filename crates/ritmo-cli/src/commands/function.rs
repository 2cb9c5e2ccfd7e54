//! Offline audio function command.

use anyhow::Context;
use clap::Args;
use ritmo_core::{AudioFunction, FunctionOptions, Pool, Selection, audio_function};
use ritmo_engine::{BitDepth, read_clip, write_clip};
use std::path::PathBuf;

#[derive(Args)]
pub struct FunctionArgs {
    /// Input WAV file
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Function to apply: invert, normalize, fade-in, fade-out,
    /// nudge-left, nudge-right, reverse, identity
    #[arg(value_name = "FUNCTION")]
    function: String,

    /// Output WAV file
    #[arg(short, long, default_value = "function.wav")]
    output: PathBuf,

    /// First frame of the selection
    #[arg(long, default_value_t = 0)]
    start: usize,

    /// One past the last frame of the selection (end of file when omitted)
    #[arg(long)]
    end: Option<usize>,

    /// Nudge distance in frames
    #[arg(long, default_value_t = 1200)]
    nudge: usize,

    /// Bits per sample: 16, 24, or 32 (float)
    #[arg(short, long, default_value_t = 32)]
    bit_depth: u16,
}

pub fn run(args: FunctionArgs) -> anyhow::Result<()> {
    let function = parse_function(&args.function)?;
    let bit_depth = match args.bit_depth {
        16 => BitDepth::Pcm16,
        24 => BitDepth::Pcm24,
        32 => BitDepth::Float32,
        other => anyhow::bail!("unsupported bit depth: {other} (use 16, 24 or 32)"),
    };

    let name = args
        .input
        .file_stem()
        .map_or_else(|| "clip".to_owned(), |s| s.to_string_lossy().into_owned());
    let clip = read_clip(&args.input, name)?;
    println!(
        "Loaded {}: {} frames, {} ch, {} Hz",
        args.input.display(),
        clip.num_frames(),
        clip.channels(),
        clip.sample_rate()
    );

    let selection = match args.end {
        Some(end) => Selection::new(args.start, end),
        None => Selection::new(args.start, clip.num_frames()),
    };
    let opts = FunctionOptions {
        nudge_frames: args.nudge,
        ..FunctionOptions::default()
    };

    let mut pool = Pool::new();
    let id = audio_function::apply(&mut pool, &clip, selection, function, &opts)?;
    let edited = pool.get(id).context("edited clip missing from pool")?;

    write_clip(&args.output, edited, bit_depth)?;
    println!(
        "Applied {} to frames {}..{} -> {}",
        function,
        selection.start,
        selection.end,
        args.output.display()
    );
    Ok(())
}

fn parse_function(name: &str) -> anyhow::Result<AudioFunction> {
    Ok(match name {
        "invert" => AudioFunction::Invert,
        "normalize" => AudioFunction::NormalizePeak,
        "fade-in" => AudioFunction::FadeIn,
        "fade-out" => AudioFunction::FadeOut,
        "nudge-left" => AudioFunction::NudgeLeft,
        "nudge-right" => AudioFunction::NudgeRight,
        "reverse" => AudioFunction::Reverse,
        "identity" => AudioFunction::Identity,
        other => anyhow::bail!(
            "unknown function: {other} (expected invert, normalize, fade-in, fade-out, \
             nudge-left, nudge-right, reverse or identity)"
        ),
    })
}
