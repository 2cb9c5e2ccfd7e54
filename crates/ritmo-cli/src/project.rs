//! Project files: a TOML description of channels, patterns and tempo,
//! turned into a live engine graph.

use anyhow::Context;
use ritmo_core::{
    ChannelId, EngineContext, IoSpec, MidiMessage, PatternSequencer, PatternStep, SineInstrument,
};
use serde::Deserialize;
use std::path::Path;

/// A project file.
#[derive(Debug, Deserialize)]
pub struct Project {
    /// Tempo in beats per minute.
    #[serde(default = "default_bpm")]
    pub bpm: f64,
    /// Channels in mixer order.
    pub channels: Vec<ChannelConfig>,
}

fn default_bpm() -> f64 {
    120.0
}

/// One mixer channel with an instrument and a note pattern.
#[derive(Debug, Deserialize)]
pub struct ChannelConfig {
    /// Display name.
    pub name: String,
    /// Linear fader gain.
    #[serde(default = "default_gain")]
    pub gain: f32,
    /// Notes the channel plays.
    #[serde(default)]
    pub notes: Vec<Note>,
}

fn default_gain() -> f32 {
    1.0
}

/// A note in a pattern.
#[derive(Debug, Deserialize)]
pub struct Note {
    /// Start position in ticks.
    pub tick: u64,
    /// Length in ticks.
    pub length: u64,
    /// MIDI pitch.
    pub pitch: u8,
    /// MIDI velocity.
    #[serde(default = "default_velocity")]
    pub velocity: u8,
}

fn default_velocity() -> u8 {
    100
}

impl Project {
    /// Loads a project from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.as_ref().display()))?;
        let project: Self = toml::from_str(&text)
            .with_context(|| format!("parsing {}", path.as_ref().display()))?;
        tracing::info!(
            path = %path.as_ref().display(),
            channels = project.channels.len(),
            bpm = project.bpm,
            "project loaded"
        );
        Ok(project)
    }

    /// A small built-in demo project, used when no file is given.
    pub fn demo() -> Self {
        Self {
            bpm: 120.0,
            channels: vec![ChannelConfig {
                name: "demo synth".into(),
                gain: 0.8,
                notes: vec![
                    Note {
                        tick: 0,
                        length: 900,
                        pitch: 57,
                        velocity: 110,
                    },
                    Note {
                        tick: 960,
                        length: 900,
                        pitch: 60,
                        velocity: 100,
                    },
                    Note {
                        tick: 1920,
                        length: 900,
                        pitch: 64,
                        velocity: 100,
                    },
                    Note {
                        tick: 2880,
                        length: 900,
                        pitch: 69,
                        velocity: 115,
                    },
                ],
            }],
        }
    }

    /// Total pattern length in ticks, padded out to the end of the bar.
    pub fn length_ticks(&self) -> u64 {
        let last = self
            .channels
            .iter()
            .flat_map(|ch| ch.notes.iter())
            .map(|n| n.tick + n.length)
            .max()
            .unwrap_or(0);
        let bar = u64::from(ritmo_core::TICKS_PER_BAR);
        last.div_ceil(bar) * bar
    }

    /// Builds the project's graph into an engine context.
    pub fn build(&self, ctx: &mut EngineContext) -> anyhow::Result<Vec<ChannelId>> {
        let sample_rate = ctx.sample_rate();
        ctx.transport_mut().set_bpm(self.bpm);
        let (mixer, ports) = ctx.mixer_and_ports_mut();

        let mut ids = Vec::with_capacity(self.channels.len());
        for config in &self.channels {
            let channel = mixer.add_channel(ports, config.name.clone())?;
            mixer.set_fader_amp(channel, config.gain)?;

            let synth = mixer.add_source(
                ports,
                channel,
                Box::new(SineInstrument::new(sample_rate)),
                IoSpec::instrument(),
            )?;
            let sequencer = mixer.add_source(
                ports,
                channel,
                Box::new(PatternSequencer::new(pattern_steps(&config.notes))),
                IoSpec::midi_source(),
            )?;

            let synth_midi = mixer
                .processor_ports(synth)
                .and_then(|(ins, _)| ins.first().copied())
                .context("instrument has no MIDI input")?;
            let seq_midi = mixer
                .processor_ports(sequencer)
                .and_then(|(_, outs)| outs.first().copied())
                .context("sequencer has no MIDI output")?;
            ports.connect(seq_midi, synth_midi)?;
            ids.push(channel);
        }
        Ok(ids)
    }
}

fn pattern_steps(notes: &[Note]) -> Vec<PatternStep> {
    let mut steps = Vec::with_capacity(notes.len() * 2);
    for note in notes {
        steps.push(PatternStep {
            tick: note.tick,
            message: MidiMessage::NoteOn {
                channel: 0,
                pitch: note.pitch,
                velocity: note.velocity,
            },
        });
        steps.push(PatternStep {
            tick: note.tick + note.length,
            message: MidiMessage::NoteOff {
                channel: 0,
                pitch: note.pitch,
                velocity: 0,
            },
        });
    }
    steps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_project_builds() {
        let mut ctx = EngineContext::new(48_000, 256);
        let channels = Project::demo().build(&mut ctx).unwrap();
        assert_eq!(channels.len(), 1);
        assert!(Project::demo().length_ticks() >= 3780);
    }

    #[test]
    fn toml_project_parses() {
        let text = r#"
            bpm = 140.0

            [[channels]]
            name = "lead"
            gain = 0.5

            [[channels.notes]]
            tick = 0
            length = 480
            pitch = 60
        "#;
        let project: Project = toml::from_str(text).unwrap();
        assert_eq!(project.bpm, 140.0);
        assert_eq!(project.channels.len(), 1);
        assert_eq!(project.channels[0].notes[0].pitch, 60);
    }
}
