//! Typed MIDI events for event ports.
//!
//! The engine ingests raw MIDI from the audio backend once per cycle and
//! decodes it into [`MidiMessage`]s before they reach any processor, so the
//! realtime path never re-parses status bytes.

/// A decoded MIDI message.
///
/// Only the channel-voice messages the routing core reacts to are decoded;
/// anything else is carried verbatim as [`MidiMessage::Raw`] so processors
/// that care can still see it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MidiMessage {
    /// Note on (status `0x9n`).
    NoteOn {
        /// MIDI channel (0-15).
        channel: u8,
        /// Note number (0-127).
        pitch: u8,
        /// Velocity (1-127; velocity 0 is normalized to [`MidiMessage::NoteOff`]).
        velocity: u8,
    },
    /// Note off (status `0x8n`, or `0x9n` with velocity 0).
    NoteOff {
        /// MIDI channel (0-15).
        channel: u8,
        /// Note number (0-127).
        pitch: u8,
        /// Release velocity.
        velocity: u8,
    },
    /// Control change (status `0xBn`).
    ControlChange {
        /// MIDI channel (0-15).
        channel: u8,
        /// Controller number.
        controller: u8,
        /// Controller value.
        value: u8,
    },
    /// Any other message, carried as up to three raw bytes.
    Raw([u8; 3]),
}

impl MidiMessage {
    /// Decodes a raw MIDI message.
    ///
    /// Returns `None` for empty input or a data byte where a status byte is
    /// expected. Note-on with velocity 0 is normalized to note-off.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let status = *bytes.first()?;
        if status < 0x80 {
            return None;
        }
        let channel = status & 0x0f;
        match status & 0xf0 {
            0x90 if bytes.len() >= 3 => {
                let (pitch, velocity) = (bytes[1], bytes[2]);
                if velocity == 0 {
                    Some(Self::NoteOff {
                        channel,
                        pitch,
                        velocity,
                    })
                } else {
                    Some(Self::NoteOn {
                        channel,
                        pitch,
                        velocity,
                    })
                }
            }
            0x80 if bytes.len() >= 3 => Some(Self::NoteOff {
                channel,
                pitch: bytes[1],
                velocity: bytes[2],
            }),
            0xb0 if bytes.len() >= 3 => Some(Self::ControlChange {
                channel,
                controller: bytes[1],
                value: bytes[2],
            }),
            _ => {
                let mut raw = [0u8; 3];
                for (dst, src) in raw.iter_mut().zip(bytes.iter()) {
                    *dst = *src;
                }
                Some(Self::Raw(raw))
            }
        }
    }
}

/// A MIDI message stamped with its frame offset inside the current block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MidiEvent {
    /// Frame offset within the current processing block.
    pub time: u32,
    /// The decoded message.
    pub message: MidiMessage,
}

impl MidiEvent {
    /// Creates an event at the given frame offset.
    pub fn new(time: u32, message: MidiMessage) -> Self {
        Self { time, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_note_on() {
        let msg = MidiMessage::parse(&[0x92, 60, 100]).unwrap();
        assert_eq!(
            msg,
            MidiMessage::NoteOn {
                channel: 2,
                pitch: 60,
                velocity: 100
            }
        );
    }

    #[test]
    fn parse_note_on_zero_velocity_is_note_off() {
        let msg = MidiMessage::parse(&[0x90, 60, 0]).unwrap();
        assert_eq!(
            msg,
            MidiMessage::NoteOff {
                channel: 0,
                pitch: 60,
                velocity: 0
            }
        );
    }

    #[test]
    fn parse_control_change() {
        let msg = MidiMessage::parse(&[0xb1, 7, 127]).unwrap();
        assert_eq!(
            msg,
            MidiMessage::ControlChange {
                channel: 1,
                controller: 7,
                value: 127
            }
        );
    }

    #[test]
    fn parse_rejects_data_byte() {
        assert!(MidiMessage::parse(&[0x45, 0, 0]).is_none());
        assert!(MidiMessage::parse(&[]).is_none());
    }

    #[test]
    fn parse_unknown_status_is_raw() {
        let msg = MidiMessage::parse(&[0xe0, 1, 2]).unwrap();
        assert_eq!(msg, MidiMessage::Raw([0xe0, 1, 2]));
    }
}
