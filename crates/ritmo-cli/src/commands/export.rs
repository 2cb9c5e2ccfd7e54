//! Offline render command.

use crate::project::Project;
use anyhow::Context;
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use ritmo_core::EngineContext;
use ritmo_engine::{BitDepth, ExportScope, ExportSettings, Exporter, Progress, TimeRange};
use std::path::PathBuf;
use std::time::Duration;

const SAMPLE_RATE: u32 = 48_000;
const BLOCK_LEN: usize = 256;

#[derive(Args)]
pub struct ExportArgs {
    /// Project file (TOML); the built-in demo project when omitted
    #[arg(value_name = "PROJECT")]
    project: Option<PathBuf>,

    /// Output WAV file
    #[arg(short, long, default_value = "export.wav")]
    output: PathBuf,

    /// Length to render in seconds (defaults to the project's pattern length)
    #[arg(short, long)]
    duration: Option<f64>,

    /// Bits per sample: 16, 24, or 32 (float)
    #[arg(short, long, default_value_t = 32)]
    bit_depth: u16,

    /// Render only the named channels, muting the rest
    #[arg(long = "track", value_name = "NAME")]
    tracks: Vec<String>,

    /// With --track, mute the bounced channels' routing targets too
    #[arg(long)]
    no_parents: bool,

    /// Title written to logs and file metadata
    #[arg(long, default_value = "")]
    title: String,

    /// Artist written to logs and file metadata
    #[arg(long, default_value = "")]
    artist: String,
}

pub fn run(args: ExportArgs) -> anyhow::Result<()> {
    let project = match &args.project {
        Some(path) => Project::load(path)?,
        None => Project::demo(),
    };

    let bit_depth = match args.bit_depth {
        16 => BitDepth::Pcm16,
        24 => BitDepth::Pcm24,
        32 => BitDepth::Float32,
        other => anyhow::bail!("unsupported bit depth: {other} (use 16, 24 or 32)"),
    };

    let mut ctx = EngineContext::new(SAMPLE_RATE, BLOCK_LEN);
    project.build(&mut ctx)?;

    let end = match args.duration {
        Some(secs) => {
            anyhow::ensure!(secs > 0.0, "duration must be positive");
            (secs * f64::from(SAMPLE_RATE)) as u64
        }
        None => {
            let ticks = project.length_ticks().max(1);
            ctx.transport().ticks_to_frames(ticks as f64)
        }
    };

    let scope = if args.tracks.is_empty() {
        ExportScope::Full
    } else {
        mark_bounced(&mut ctx, &args.tracks)?;
        ExportScope::BouncedTracks
    };

    let settings = ExportSettings {
        scope,
        range: TimeRange::Frames { start: 0, end },
        bit_depth,
        with_parents: !args.no_parents,
        title: args.title.clone(),
        artist: args.artist.clone(),
        ..ExportSettings::default()
    };

    println!(
        "Rendering {} frames ({:.1}s) to {}...",
        end,
        end as f64 / f64::from(SAMPLE_RATE),
        args.output.display()
    );

    let progress = Progress::new();
    let cancel = progress.clone();
    ctrlc::set_handler(move || {
        println!("\nCancelling...");
        cancel.cancel();
    })?;

    let pb = ProgressBar::new(end);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("##-"),
    );

    let clip = std::thread::scope(|s| {
        let handle =
            s.spawn(|| Exporter::export_to_file(&mut ctx, &settings, &progress, &args.output));
        while !handle.is_finished() {
            pb.set_position(progress.rendered_frames());
            std::thread::sleep(Duration::from_millis(50));
        }
        handle.join().expect("export thread panicked")
    })?;
    pb.finish_and_clear();

    println!(
        "Done: {} frames, peak {:.3}, {} bit -> {}",
        clip.num_frames(),
        clip.peak(),
        bit_depth.bits(),
        args.output.display()
    );
    Ok(())
}

fn mark_bounced(ctx: &mut EngineContext, names: &[String]) -> anyhow::Result<()> {
    let (mixer, _ports) = ctx.mixer_and_ports_mut();
    for name in names {
        let id = mixer
            .channels()
            .find(|ch| ch.name() == name)
            .map(|ch| ch.id())
            .with_context(|| format!("no channel named \"{name}\""))?;
        mixer.set_bounce(id, true)?;
    }
    Ok(())
}
