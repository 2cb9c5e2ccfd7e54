//! Live playback command.

use crate::project::Project;
use clap::Args;
use ritmo_engine::{BackendStreamConfig, CpalBackend, Engine};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Args)]
pub struct PlayArgs {
    /// Project file (TOML); the built-in demo project when omitted
    #[arg(value_name = "PROJECT")]
    project: Option<PathBuf>,

    /// Output device (exact or partial name)
    #[arg(short, long)]
    device: Option<String>,

    /// Buffer size in frames
    #[arg(short, long, default_value_t = 256)]
    buffer_size: u32,

    /// Loop the project
    #[arg(short, long, alias = "repeat")]
    r#loop: bool,

    /// Stop after this many seconds
    #[arg(long)]
    duration: Option<f64>,
}

pub fn run(args: PlayArgs) -> anyhow::Result<()> {
    let project = match &args.project {
        Some(path) => Project::load(path)?,
        None => Project::demo(),
    };

    let config = BackendStreamConfig {
        buffer_size: args.buffer_size,
        device_name: args.device.clone(),
        ..BackendStreamConfig::default()
    };
    let mut engine = Engine::new(Box::new(CpalBackend::new()), config);

    let project_frames = {
        let context = engine.context();
        let mut ctx = context.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        project.build(&mut ctx)?;
        let frames = ctx
            .transport()
            .ticks_to_frames(project.length_ticks().max(1) as f64);
        if args.r#loop {
            ctx.transport_mut().set_loop_region(0, frames, true);
        }
        frames
    };

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        println!("\nStopping...");
        r.store(false, Ordering::SeqCst);
    })?;

    engine.start()?;
    let transport = engine.transport_handle();
    transport.request_roll();

    let sample_rate = {
        let context = engine.context();
        let ctx = context.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        ctx.sample_rate()
    };
    let project_secs = project_frames as f64 / f64::from(sample_rate);
    println!(
        "Playing{} ({:.1}s of material)... Press Ctrl+C to stop.",
        if args.r#loop { " (looping)" } else { "" },
        project_secs
    );

    let deadline = args.duration.or(if args.r#loop {
        None
    } else {
        // Give release tails a moment past the last note.
        Some(project_secs + 0.5)
    });
    let start = std::time::Instant::now();

    while running.load(Ordering::SeqCst) {
        if let Some(limit) = deadline
            && start.elapsed().as_secs_f64() >= limit
        {
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    transport.request_pause();
    transport.wait_until_paused();
    engine.stop();
    println!("Done!");
    Ok(())
}
