// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::error::Error;

use midly::{
    live::{LiveEvent, SystemCommon, SystemRealtime},
    MidiMessage,
};

pub mod midir;

/// Status of a note off message.
pub const NOTE_OFF: u8 = 0x80;
/// Status of a note on message.
pub const NOTE_ON: u8 = 0x90;
/// Status of a polyphonic key pressure message.
pub const POLY_PRESSURE: u8 = 0xA0;
/// Status of a control change message.
pub const CONTROL_CHANGE: u8 = 0xB0;
/// Status of a program change message.
pub const PROGRAM_CHANGE: u8 = 0xC0;
/// Status of a channel pressure message.
pub const CHANNEL_PRESSURE: u8 = 0xD0;
/// Status of a pitch bend message.
pub const PITCH_BEND: u8 = 0xE0;
/// Active sensing keep-alive.
pub const ACTIVE_SENSING: u8 = 0xFE;
/// System reset.
pub const SYSTEM_RESET: u8 = 0xFF;

/// A MIDI event as the engine consumes it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MidiEvent {
    /// A channel voice message, or a system real-time message with `channel` 0.
    /// `command` is the status byte with the channel nibble cleared.
    Short {
        command: u8,
        channel: u8,
        data1: u8,
        data2: u8,
    },
    /// A complete system exclusive message, starting with F0.
    SysEx(Vec<u8>),
}

impl MidiEvent {
    pub fn short(command: u8, channel: u8, data1: u8, data2: u8) -> MidiEvent {
        MidiEvent::Short {
            command: command & 0xF0,
            channel: channel & 0x0F,
            data1: data1 & 0x7F,
            data2: data2 & 0x7F,
        }
    }

    pub fn note_on(channel: u8, key: u8, velocity: u8) -> MidiEvent {
        MidiEvent::short(NOTE_ON, channel, key, velocity)
    }

    pub fn note_off(channel: u8, key: u8, velocity: u8) -> MidiEvent {
        MidiEvent::short(NOTE_OFF, channel, key, velocity)
    }

    pub fn control_change(channel: u8, control: u8, value: u8) -> MidiEvent {
        MidiEvent::short(CONTROL_CHANGE, channel, control, value)
    }

    pub fn program_change(channel: u8, program: u8) -> MidiEvent {
        MidiEvent::short(PROGRAM_CHANGE, channel, program, 0)
    }

    /// A pitch bend with a 14-bit value, 8192 being centered.
    pub fn pitch_bend(channel: u8, value: u16) -> MidiEvent {
        MidiEvent::short(
            PITCH_BEND,
            channel,
            (value & 0x7F) as u8,
            ((value >> 7) & 0x7F) as u8,
        )
    }

    /// A system real-time message such as active sensing.
    pub fn system(status: u8) -> MidiEvent {
        MidiEvent::Short {
            command: status,
            channel: 0,
            data1: 0,
            data2: 0,
        }
    }

    /// Decodes a raw wire message. Messages the engine has no use for (clock,
    /// song position and the like) return None.
    pub fn parse(raw: &[u8]) -> Result<Option<MidiEvent>, Box<dyn Error>> {
        let event = LiveEvent::parse(raw).map_err(|e| format!("{}", e))?;
        Ok(match event {
            LiveEvent::Midi { channel, message } => {
                let channel = channel.as_int();
                Some(match message {
                    MidiMessage::NoteOff { key, vel } => {
                        MidiEvent::note_off(channel, key.as_int(), vel.as_int())
                    }
                    MidiMessage::NoteOn { key, vel } => {
                        MidiEvent::note_on(channel, key.as_int(), vel.as_int())
                    }
                    MidiMessage::Aftertouch { key, vel } => {
                        MidiEvent::short(POLY_PRESSURE, channel, key.as_int(), vel.as_int())
                    }
                    MidiMessage::Controller { controller, value } => {
                        MidiEvent::control_change(channel, controller.as_int(), value.as_int())
                    }
                    MidiMessage::ProgramChange { program } => {
                        MidiEvent::program_change(channel, program.as_int())
                    }
                    MidiMessage::ChannelAftertouch { vel } => {
                        MidiEvent::short(CHANNEL_PRESSURE, channel, vel.as_int(), 0)
                    }
                    MidiMessage::PitchBend { bend } => MidiEvent::pitch_bend(channel, bend.0.as_int()),
                })
            }
            LiveEvent::Common(SystemCommon::SysEx(data)) => {
                // midly strips both framing bytes.
                let mut bytes = Vec::with_capacity(data.len() + 2);
                bytes.push(0xF0);
                bytes.extend(data.iter().map(|b| b.as_int()));
                bytes.push(0xF7);
                Some(MidiEvent::SysEx(bytes))
            }
            LiveEvent::Realtime(SystemRealtime::ActiveSensing) => {
                Some(MidiEvent::system(ACTIVE_SENSING))
            }
            LiveEvent::Realtime(SystemRealtime::Reset) => Some(MidiEvent::system(SYSTEM_RESET)),
            _ => None,
        })
    }
}

/// Lists the names of the MIDI input ports known to midir.
pub fn list_inputs() -> Result<Vec<String>, Box<dyn Error>> {
    midir::list()
}

/// Gets the input port whose name contains `name`.
pub fn get_input(name: &str) -> Result<midir::Input, Box<dyn Error>> {
    midir::get(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_channel_messages() {
        assert_eq!(
            Some(MidiEvent::note_on(3, 60, 100)),
            MidiEvent::parse(&[0x93, 60, 100]).unwrap()
        );
        assert_eq!(
            Some(MidiEvent::control_change(0, 7, 127)),
            MidiEvent::parse(&[0xB0, 7, 127]).unwrap()
        );
        assert_eq!(
            Some(MidiEvent::Short {
                command: PITCH_BEND,
                channel: 1,
                data1: 0x00,
                data2: 0x40,
            }),
            MidiEvent::parse(&[0xE1, 0x00, 0x40]).unwrap()
        );
    }

    #[test]
    fn test_parse_system_messages() {
        let sysex = [0xF0, 0x7E, 0x7F, 0x09, 0x01, 0xF7];
        assert_eq!(
            Some(MidiEvent::SysEx(sysex.to_vec())),
            MidiEvent::parse(&sysex).unwrap()
        );
        assert_eq!(
            Some(MidiEvent::system(ACTIVE_SENSING)),
            MidiEvent::parse(&[0xFE]).unwrap()
        );
        // Timing clock is not used by the engine.
        assert_eq!(None, MidiEvent::parse(&[0xF8]).unwrap());
    }

    #[test]
    fn test_pitch_bend_split() {
        assert_eq!(
            MidiEvent::Short {
                command: PITCH_BEND,
                channel: 0,
                data1: 0x7F,
                data2: 0x7F,
            },
            MidiEvent::pitch_bend(0, 0x3FFF)
        );
    }
}
