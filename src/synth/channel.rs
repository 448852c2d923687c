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

//! Persistent per-MIDI-channel state: controllers, pitch bend, pressure, registered
//! parameters and control destination mappings.

use super::{soundbank::Patch, tuning::TuningKey};

pub const CC_BANK_MSB: u8 = 0;
pub const CC_MODULATION: u8 = 1;
pub const CC_DATA_ENTRY_MSB: u8 = 6;
pub const CC_VOLUME: u8 = 7;
pub const CC_BALANCE: u8 = 8;
pub const CC_PAN: u8 = 10;
pub const CC_EXPRESSION: u8 = 11;
pub const CC_BANK_LSB: u8 = 32;
pub const CC_DATA_ENTRY_LSB: u8 = 38;
pub const CC_SUSTAIN: u8 = 64;
pub const CC_SOSTENUTO: u8 = 66;
pub const CC_SOFT_PEDAL: u8 = 67;
pub const CC_REVERB_SEND: u8 = 91;
pub const CC_CHORUS_SEND: u8 = 93;
pub const CC_DATA_INCREMENT: u8 = 96;
pub const CC_DATA_DECREMENT: u8 = 97;
pub const CC_NRPN_LSB: u8 = 98;
pub const CC_NRPN_MSB: u8 = 99;
pub const CC_RPN_LSB: u8 = 100;
pub const CC_RPN_MSB: u8 = 101;
pub const CC_ALL_SOUND_OFF: u8 = 120;
pub const CC_RESET_ALL_CONTROLLERS: u8 = 121;
pub const CC_ALL_NOTES_OFF: u8 = 123;
pub const CC_OMNI_OFF: u8 = 124;
pub const CC_OMNI_ON: u8 = 125;
pub const CC_MONO_ON: u8 = 126;
pub const CC_POLY_ON: u8 = 127;

/// The bank MSB that selects the percussion set in GM2 mode.
pub const GM2_PERCUSSION_BANK_MSB: u8 = 0x78;
/// The bank MSB of the GM2 melodic set.
pub const GM2_MELODIC_BANK_MSB: u8 = 0x79;

/// Pitch bend center.
const PITCH_BEND_CENTER: u16 = 8192;

/// The number of registered parameters the engine implements.
const RPN_COUNT: usize = 6;

const RPN_PITCH_BEND_SENSITIVITY: usize = 0;
const RPN_FINE_TUNING: usize = 1;
const RPN_COARSE_TUNING: usize = 2;
const RPN_TUNING_PROGRAM: usize = 3;
const RPN_TUNING_BANK: usize = 4;
const RPN_MODULATION_DEPTH: usize = 5;

/// Power-on values (MSB, LSB) for the registered parameters.
const RPN_DEFAULTS: [[u8; 2]; RPN_COUNT] = [[2, 0], [64, 0], [64, 0], [0, 0], [0, 0], [0, 64]];

/// The number of control destinations.
pub const DESTINATION_COUNT: usize = 6;

/// Per-destination ranges that leave a source without effect.
const NEUTRAL_RANGES: [u8; DESTINATION_COUNT] = [64, 64, 64, 0, 0, 0];

/// Maps a controller source onto the six control destinations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DestinationMap {
    ranges: [u8; DESTINATION_COUNT],
}

impl Default for DestinationMap {
    fn default() -> Self {
        DestinationMap {
            ranges: NEUTRAL_RANGES,
        }
    }
}

impl DestinationMap {
    /// Sets the range of a destination. Unknown destinations are ignored.
    pub fn set(&mut self, destination: u8, range: u8) -> bool {
        match self.ranges.get_mut(destination as usize) {
            Some(slot) => {
                *slot = range & 0x7F;
                true
            }
            None => false,
        }
    }

    pub fn range(&self, destination: usize) -> u8 {
        self.ranges[destination]
    }

    pub fn is_neutral(&self) -> bool {
        self.ranges == NEUTRAL_RANGES
    }

    /// Adds the effect of a source at `level` (0.0 to 1.0) into the modulation.
    fn apply(&self, level: f64, modulation: &mut Modulation) {
        if level <= 0.0 {
            return;
        }
        let r = self.ranges.map(f64::from);
        modulation.pitch_cents += level * (r[0] - 64.0) * 100.0;
        modulation.filter_cents += level * (r[1] - 64.0) * 150.0;
        modulation.amplitude *= 1.0 + level * (r[2] / 64.0 - 1.0);
        modulation.lfo_pitch_cents += level * r[3] * 600.0 / 127.0;
        modulation.lfo_filter_cents += level * r[4] * 2400.0 / 127.0;
        modulation.lfo_amplitude += level * r[5] / 127.0;
    }
}

/// The summed effect of all mapped controller sources on a voice.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Modulation {
    pub pitch_cents: f64,
    /// Cutoff offset for a low-pass stage. The engine renders unfiltered, so this is
    /// carried for channel mixers and inspection only.
    pub filter_cents: f64,
    pub amplitude: f64,
    pub lfo_pitch_cents: f64,
    pub lfo_filter_cents: f64,
    pub lfo_amplitude: f64,
}

impl Default for Modulation {
    fn default() -> Self {
        Modulation {
            pitch_cents: 0.0,
            filter_cents: 0.0,
            amplitude: 1.0,
            lfo_pitch_cents: 0.0,
            lfo_filter_cents: 0.0,
            lfo_amplitude: 0.0,
        }
    }
}

/// A controller source that can be mapped to destinations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlSource {
    ChannelPressure,
    PolyPressure,
    Control(u8),
}

/// Per-key controller overrides.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KeyControl {
    pub volume: Option<u8>,
    pub pan: Option<u8>,
    pub reverb: Option<u8>,
    pub chorus: Option<u8>,
}

impl KeyControl {
    /// Applies a control change to the key. Returns false for controllers that can't
    /// be set per key.
    pub fn set(&mut self, control: u8, value: u8) -> bool {
        let slot = match control {
            CC_VOLUME => &mut self.volume,
            CC_PAN => &mut self.pan,
            CC_REVERB_SEND => &mut self.reverb,
            CC_CHORUS_SEND => &mut self.chorus,
            _ => return false,
        };
        *slot = Some(value & 0x7F);
        true
    }
}

/// Which parameter the data entry controllers currently address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ParameterSelect {
    None,
    Registered(u16),
    NonRegistered(u16),
}

/// Follow-up work the router must do after a controller was applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelEffect {
    None,
    SustainReleased,
    SostenutoPressed,
    SostenutoReleased,
    AllSoundOff,
    ResetAllControllers,
    AllNotesOff,
    TuningSelected,
}

/// Maps a 7-bit controller value to 0.0 (left) through 1.0 (right).
fn position(value: u8) -> f64 {
    (0.5 + (value as f64 - 64.0) / 128.0).clamp(0.0, 1.0)
}

fn fourteen_bit(msb: u8, lsb: u8) -> u16 {
    ((msb as u16 & 0x7F) << 7) | (lsb as u16 & 0x7F)
}

pub struct Channel {
    index: usize,
    controllers: [u8; 128],
    program: u8,
    bank: u16,
    pitch_bend: u16,
    channel_pressure: u8,
    poly_pressure: [u8; 128],
    parameter: ParameterSelect,
    rpn: [[u8; 2]; RPN_COUNT],
    mono: bool,
    tuning: TuningKey,
    channel_pressure_map: DestinationMap,
    poly_pressure_map: DestinationMap,
    control_maps: [DestinationMap; 128],
    mapped_controls: Vec<u8>,
    key_controls: [KeyControl; 128],
}

impl Channel {
    pub fn new(index: usize) -> Channel {
        let mut channel = Channel {
            index,
            controllers: [0; 128],
            program: 0,
            bank: 0,
            pitch_bend: PITCH_BEND_CENTER,
            channel_pressure: 0,
            poly_pressure: [0; 128],
            parameter: ParameterSelect::None,
            rpn: RPN_DEFAULTS,
            mono: false,
            tuning: TuningKey::default(),
            channel_pressure_map: DestinationMap::default(),
            poly_pressure_map: DestinationMap::default(),
            control_maps: [DestinationMap::default(); 128],
            mapped_controls: Vec::with_capacity(128),
            key_controls: [KeyControl::default(); 128],
        };
        channel.reset();
        channel
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Restores power-on state, including the values reset-all-controllers leaves alone.
    pub fn reset(&mut self) {
        self.controllers = [0; 128];
        self.controllers[CC_VOLUME as usize] = 100;
        self.controllers[CC_BALANCE as usize] = 64;
        self.controllers[CC_PAN as usize] = 64;
        self.controllers[CC_REVERB_SEND as usize] = 40;
        self.controllers[CC_CHORUS_SEND as usize] = 0;
        self.program = 0;
        self.bank = 0;
        self.rpn = RPN_DEFAULTS;
        self.mono = false;
        self.tuning = TuningKey::default();
        self.channel_pressure_map = DestinationMap::default();
        self.poly_pressure_map = DestinationMap::default();
        for control in self.mapped_controls.drain(..) {
            self.control_maps[control as usize] = DestinationMap::default();
        }
        self.key_controls = [KeyControl::default(); 128];
        self.reset_controllers();
    }

    /// Reset all controllers. Volume, pan, sends, bank and program are kept.
    pub fn reset_controllers(&mut self) {
        self.controllers[CC_MODULATION as usize] = 0;
        self.controllers[CC_EXPRESSION as usize] = 127;
        self.controllers[CC_SUSTAIN as usize] = 0;
        self.controllers[CC_SOSTENUTO as usize] = 0;
        self.controllers[CC_SOFT_PEDAL as usize] = 0;
        self.controllers[CC_RPN_LSB as usize] = 127;
        self.controllers[CC_RPN_MSB as usize] = 127;
        self.controllers[CC_NRPN_LSB as usize] = 127;
        self.controllers[CC_NRPN_MSB as usize] = 127;
        self.parameter = ParameterSelect::None;
        self.pitch_bend = PITCH_BEND_CENTER;
        self.channel_pressure = 0;
        self.poly_pressure = [0; 128];
    }

    pub fn controller(&self, control: u8) -> u8 {
        self.controllers[(control & 0x7F) as usize]
    }

    /// Applies a control change and reports what else must happen.
    pub fn control_change(&mut self, control: u8, value: u8) -> ChannelEffect {
        let control = control & 0x7F;
        let value = value & 0x7F;
        let previous = self.controllers[control as usize];
        self.controllers[control as usize] = value;

        match control {
            CC_SUSTAIN if previous >= 64 && value < 64 => ChannelEffect::SustainReleased,
            CC_SOSTENUTO if previous < 64 && value >= 64 => ChannelEffect::SostenutoPressed,
            CC_SOSTENUTO if previous >= 64 && value < 64 => ChannelEffect::SostenutoReleased,
            CC_RPN_LSB | CC_RPN_MSB => {
                let number = fourteen_bit(
                    self.controllers[CC_RPN_MSB as usize],
                    self.controllers[CC_RPN_LSB as usize],
                );
                self.parameter = if number == 0x3FFF {
                    ParameterSelect::None
                } else {
                    ParameterSelect::Registered(number)
                };
                ChannelEffect::None
            }
            CC_NRPN_LSB | CC_NRPN_MSB => {
                let number = fourteen_bit(
                    self.controllers[CC_NRPN_MSB as usize],
                    self.controllers[CC_NRPN_LSB as usize],
                );
                self.parameter = if number == 0x3FFF {
                    ParameterSelect::None
                } else {
                    ParameterSelect::NonRegistered(number)
                };
                ChannelEffect::None
            }
            CC_DATA_ENTRY_MSB => self.data_entry(|data| data[0] = value),
            CC_DATA_ENTRY_LSB => self.data_entry(|data| data[1] = value),
            CC_DATA_INCREMENT => self.data_entry(|data| {
                let v = fourteen_bit(data[0], data[1]).saturating_add(1).min(0x3FFF);
                *data = [(v >> 7) as u8, (v & 0x7F) as u8];
            }),
            CC_DATA_DECREMENT => self.data_entry(|data| {
                let v = fourteen_bit(data[0], data[1]).saturating_sub(1);
                *data = [(v >> 7) as u8, (v & 0x7F) as u8];
            }),
            CC_ALL_SOUND_OFF => ChannelEffect::AllSoundOff,
            CC_RESET_ALL_CONTROLLERS => {
                self.reset_controllers();
                ChannelEffect::ResetAllControllers
            }
            // Every channel receives on the single input, so omni only silences.
            CC_ALL_NOTES_OFF | CC_OMNI_OFF | CC_OMNI_ON => ChannelEffect::AllNotesOff,
            CC_MONO_ON => {
                self.mono = true;
                ChannelEffect::AllNotesOff
            }
            CC_POLY_ON => {
                self.mono = false;
                ChannelEffect::AllNotesOff
            }
            _ => ChannelEffect::None,
        }
    }

    fn data_entry(&mut self, apply: impl FnOnce(&mut [u8; 2])) -> ChannelEffect {
        let ParameterSelect::Registered(number) = self.parameter else {
            return ChannelEffect::None;
        };
        let Some(data) = self.rpn.get_mut(number as usize) else {
            return ChannelEffect::None;
        };
        apply(data);

        match number as usize {
            RPN_TUNING_PROGRAM | RPN_TUNING_BANK => {
                self.tuning = TuningKey::Program {
                    bank: self.rpn[RPN_TUNING_BANK][0],
                    program: self.rpn[RPN_TUNING_PROGRAM][0],
                };
                ChannelEffect::TuningSelected
            }
            _ => ChannelEffect::None,
        }
    }

    pub fn program_change(&mut self, program: u8) {
        self.program = program & 0x7F;
        self.bank = fourteen_bit(
            self.controllers[CC_BANK_MSB as usize],
            self.controllers[CC_BANK_LSB as usize],
        );
    }

    /// Selects the bank and program in one step.
    pub fn select_patch(&mut self, bank: u16, program: u8) {
        self.controllers[CC_BANK_MSB as usize] = ((bank >> 7) & 0x7F) as u8;
        self.controllers[CC_BANK_LSB as usize] = (bank & 0x7F) as u8;
        self.program_change(program);
    }

    pub fn program(&self) -> u8 {
        self.program
    }

    pub fn bank(&self) -> u16 {
        self.bank
    }

    pub fn is_percussion(&self, gm_mode: u8) -> bool {
        if gm_mode == 2 {
            (self.bank >> 7) as u8 == GM2_PERCUSSION_BANK_MSB
        } else {
            self.index == 9
        }
    }

    pub fn patch(&self, gm_mode: u8) -> Patch {
        Patch {
            bank: self.bank,
            program: self.program,
            percussion: self.is_percussion(gm_mode),
        }
    }

    pub fn set_pitch_bend(&mut self, value: u16) {
        self.pitch_bend = value & 0x3FFF;
    }

    pub fn pitch_bend(&self) -> u16 {
        self.pitch_bend
    }

    pub fn set_channel_pressure(&mut self, value: u8) {
        self.channel_pressure = value & 0x7F;
    }

    pub fn set_poly_pressure(&mut self, key: u8, value: u8) {
        self.poly_pressure[(key & 0x7F) as usize] = value & 0x7F;
    }

    fn rpn_value(&self, rpn: usize) -> u16 {
        fourteen_bit(self.rpn[rpn][0], self.rpn[rpn][1])
    }

    /// Pitch bend range in cents.
    pub fn bend_sensitivity(&self) -> f64 {
        let [msb, lsb] = self.rpn[RPN_PITCH_BEND_SENSITIVITY];
        msb as f64 * 100.0 + lsb as f64
    }

    /// Maximum vibrato depth of the modulation wheel in cents.
    pub fn modulation_depth(&self) -> f64 {
        let [msb, lsb] = self.rpn[RPN_MODULATION_DEPTH];
        msb as f64 * 100.0 + lsb as f64 * 100.0 / 128.0
    }

    /// The channel's pitch offset in cents from bend, fine and coarse tuning.
    pub fn pitch_cents(&self) -> f64 {
        let bend = (self.pitch_bend as f64 - PITCH_BEND_CENTER as f64) / PITCH_BEND_CENTER as f64;
        let fine = (self.rpn_value(RPN_FINE_TUNING) as f64 - 8192.0) / 8192.0 * 100.0;
        let coarse = (self.rpn[RPN_COARSE_TUNING][0] as f64 - 64.0) * 100.0;
        bend * self.bend_sensitivity() + fine + coarse
    }

    pub fn tuning(&self) -> TuningKey {
        self.tuning
    }

    pub fn set_tuning(&mut self, tuning: TuningKey) {
        self.tuning = tuning;
    }

    pub fn is_mono(&self) -> bool {
        self.mono
    }

    pub fn sustain(&self) -> bool {
        self.controllers[CC_SUSTAIN as usize] >= 64
    }

    pub fn sostenuto(&self) -> bool {
        self.controllers[CC_SOSTENUTO as usize] >= 64
    }

    pub fn soft(&self) -> bool {
        self.controllers[CC_SOFT_PEDAL as usize] >= 64
    }

    /// Linear gain from volume and expression.
    pub fn gain(&self) -> f64 {
        let volume = self.controllers[CC_VOLUME as usize] as f64 / 127.0;
        let expression = self.controllers[CC_EXPRESSION as usize] as f64 / 127.0;
        volume * volume * expression * expression
    }

    /// The per-key volume factor. 64 leaves the channel volume unchanged.
    pub fn key_volume(&self, key: u8) -> f64 {
        match self.key_controls[(key & 0x7F) as usize].volume {
            Some(volume) => volume as f64 / 64.0,
            None => 1.0,
        }
    }

    /// Pan position of the key, 0.0 (left) to 1.0 (right).
    pub fn pan(&self, key: u8) -> f64 {
        let value = self.key_controls[(key & 0x7F) as usize]
            .pan
            .unwrap_or(self.controllers[CC_PAN as usize]);
        position(value)
    }

    pub fn balance(&self) -> f64 {
        position(self.controllers[CC_BALANCE as usize])
    }

    /// Reverb send of the key, 0.0 to 1.0.
    pub fn reverb_send(&self, key: u8) -> f64 {
        self.key_controls[(key & 0x7F) as usize]
            .reverb
            .unwrap_or(self.controllers[CC_REVERB_SEND as usize]) as f64
            / 127.0
    }

    /// Chorus send of the key, 0.0 to 1.0.
    pub fn chorus_send(&self, key: u8) -> f64 {
        self.key_controls[(key & 0x7F) as usize]
            .chorus
            .unwrap_or(self.controllers[CC_CHORUS_SEND as usize]) as f64
            / 127.0
    }

    /// Replaces the destination map of a source.
    pub fn set_destinations(&mut self, source: ControlSource, map: DestinationMap) {
        match source {
            ControlSource::ChannelPressure => self.channel_pressure_map = map,
            ControlSource::PolyPressure => self.poly_pressure_map = map,
            ControlSource::Control(control) => {
                let control = control & 0x7F;
                self.control_maps[control as usize] = map;
                let mapped = self.mapped_controls.contains(&control);
                if map.is_neutral() {
                    self.mapped_controls.retain(|c| *c != control);
                } else if !mapped {
                    self.mapped_controls.push(control);
                }
            }
        }
    }

    pub fn destinations(&self, source: ControlSource) -> &DestinationMap {
        match source {
            ControlSource::ChannelPressure => &self.channel_pressure_map,
            ControlSource::PolyPressure => &self.poly_pressure_map,
            ControlSource::Control(control) => &self.control_maps[(control & 0x7F) as usize],
        }
    }

    /// Sets per-key controller overrides.
    pub fn set_key_control(&mut self, key: u8, control: u8, value: u8) -> bool {
        self.key_controls[(key & 0x7F) as usize].set(control, value)
    }

    /// The combined effect of every mapped source on the given key.
    pub fn modulation(&self, key: u8) -> Modulation {
        let mut modulation = Modulation::default();

        let wheel = self.controllers[CC_MODULATION as usize] as f64 / 127.0;
        modulation.lfo_pitch_cents += wheel * self.modulation_depth();

        self.channel_pressure_map
            .apply(self.channel_pressure as f64 / 127.0, &mut modulation);
        self.poly_pressure_map.apply(
            self.poly_pressure[(key & 0x7F) as usize] as f64 / 127.0,
            &mut modulation,
        );
        for control in &self.mapped_controls {
            let level = self.controllers[*control as usize] as f64 / 127.0;
            self.control_maps[*control as usize].apply(level, &mut modulation);
        }

        modulation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_on_state() {
        let channel = Channel::new(0);
        assert_eq!(100, channel.controller(CC_VOLUME));
        assert_eq!(127, channel.controller(CC_EXPRESSION));
        assert_eq!(40, channel.controller(CC_REVERB_SEND));
        assert_eq!(8192, channel.pitch_bend());
        assert_eq!(200.0, channel.bend_sensitivity());
        assert_eq!(50.0, channel.modulation_depth());
        assert_eq!(0.0, channel.pitch_cents());
        assert_eq!(0.5, channel.pan(60));
        assert_eq!(TuningKey::default(), channel.tuning());
    }

    #[test]
    fn test_gain_is_squared() {
        let mut channel = Channel::new(0);
        channel.control_change(CC_VOLUME, 127);
        assert_eq!(1.0, channel.gain());
        channel.control_change(CC_EXPRESSION, 0);
        assert_eq!(0.0, channel.gain());
        channel.control_change(CC_EXPRESSION, 127);
        channel.control_change(CC_VOLUME, 64);
        let v = 64.0 / 127.0;
        assert!((channel.gain() - v * v).abs() < 1e-12);
    }

    #[test]
    fn test_pitch_bend_and_sensitivity() {
        let mut channel = Channel::new(0);
        channel.set_pitch_bend(16383);
        assert!((channel.pitch_cents() - 200.0 * 8191.0 / 8192.0).abs() < 1e-9);

        // RPN 0 -> 12 semitones.
        channel.control_change(CC_RPN_MSB, 0);
        channel.control_change(CC_RPN_LSB, 0);
        channel.control_change(CC_DATA_ENTRY_MSB, 12);
        channel.control_change(CC_DATA_ENTRY_LSB, 0);
        assert_eq!(1200.0, channel.bend_sensitivity());

        channel.set_pitch_bend(0);
        assert_eq!(-1200.0, channel.pitch_cents());
    }

    #[test]
    fn test_coarse_and_fine_tuning() {
        let mut channel = Channel::new(0);
        channel.control_change(CC_RPN_MSB, 0);
        channel.control_change(CC_RPN_LSB, 2);
        channel.control_change(CC_DATA_ENTRY_MSB, 66);
        assert_eq!(200.0, channel.pitch_cents());

        channel.control_change(CC_RPN_LSB, 1);
        channel.control_change(CC_DATA_ENTRY_MSB, 96);
        channel.control_change(CC_DATA_ENTRY_LSB, 0);
        assert_eq!(250.0, channel.pitch_cents());

        // The null RPN stops data entry from reaching any parameter.
        channel.control_change(CC_RPN_MSB, 127);
        channel.control_change(CC_RPN_LSB, 127);
        channel.control_change(CC_DATA_ENTRY_MSB, 0);
        assert_eq!(250.0, channel.pitch_cents());
    }

    #[test]
    fn test_data_increment() {
        let mut channel = Channel::new(0);
        channel.control_change(CC_RPN_MSB, 0);
        channel.control_change(CC_RPN_LSB, 0);
        channel.control_change(CC_DATA_INCREMENT, 0);
        assert_eq!(201.0, channel.bend_sensitivity());
        channel.control_change(CC_DATA_DECREMENT, 0);
        assert_eq!(200.0, channel.bend_sensitivity());
    }

    #[test]
    fn test_tuning_program_selection() {
        let mut channel = Channel::new(0);
        channel.control_change(CC_RPN_MSB, 0);
        channel.control_change(CC_RPN_LSB, 4);
        assert_eq!(
            ChannelEffect::TuningSelected,
            channel.control_change(CC_DATA_ENTRY_MSB, 2)
        );
        channel.control_change(CC_RPN_LSB, 3);
        channel.control_change(CC_DATA_ENTRY_MSB, 5);
        assert_eq!(
            TuningKey::Program {
                bank: 2,
                program: 5
            },
            channel.tuning()
        );
    }

    #[test]
    fn test_pedal_effects() {
        let mut channel = Channel::new(0);
        assert_eq!(ChannelEffect::None, channel.control_change(CC_SUSTAIN, 127));
        assert!(channel.sustain());
        assert_eq!(
            ChannelEffect::SustainReleased,
            channel.control_change(CC_SUSTAIN, 0)
        );
        assert_eq!(ChannelEffect::None, channel.control_change(CC_SUSTAIN, 0));

        assert_eq!(
            ChannelEffect::SostenutoPressed,
            channel.control_change(CC_SOSTENUTO, 100)
        );
        assert_eq!(
            ChannelEffect::SostenutoReleased,
            channel.control_change(CC_SOSTENUTO, 10)
        );
    }

    #[test]
    fn test_mode_messages() {
        let mut channel = Channel::new(3);
        assert_eq!(
            ChannelEffect::AllSoundOff,
            channel.control_change(CC_ALL_SOUND_OFF, 0)
        );
        assert_eq!(
            ChannelEffect::AllNotesOff,
            channel.control_change(CC_MONO_ON, 1)
        );
        assert!(channel.is_mono());
        channel.control_change(CC_POLY_ON, 0);
        assert!(!channel.is_mono());
        for control in [CC_OMNI_OFF, CC_OMNI_ON] {
            assert_eq!(
                ChannelEffect::AllNotesOff,
                channel.control_change(control, 0)
            );
        }
    }

    #[test]
    fn test_reset_controllers_keeps_volume() {
        let mut channel = Channel::new(0);
        channel.control_change(CC_VOLUME, 90);
        channel.control_change(CC_MODULATION, 90);
        channel.set_pitch_bend(0);
        channel.set_channel_pressure(70);

        assert_eq!(
            ChannelEffect::ResetAllControllers,
            channel.control_change(CC_RESET_ALL_CONTROLLERS, 0)
        );
        assert_eq!(90, channel.controller(CC_VOLUME));
        assert_eq!(0, channel.controller(CC_MODULATION));
        assert_eq!(8192, channel.pitch_bend());
        assert_eq!(Modulation::default(), channel.modulation(60));
    }

    #[test]
    fn test_program_latches_bank() {
        let mut channel = Channel::new(0);
        channel.control_change(CC_BANK_MSB, GM2_PERCUSSION_BANK_MSB);
        channel.control_change(CC_BANK_LSB, 1);
        // Bank select alone doesn't change the patch.
        assert_eq!(0, channel.bank());
        channel.program_change(25);
        assert_eq!(0x78 * 128 + 1, channel.bank());
        assert_eq!(25, channel.program());
        assert!(channel.is_percussion(2));
        assert!(!channel.is_percussion(1));
        assert!(Channel::new(9).is_percussion(1));
    }

    #[test]
    fn test_balance_and_pan_positions() {
        let mut channel = Channel::new(0);
        channel.control_change(CC_BALANCE, 0);
        assert_eq!(0.0, channel.balance());
        channel.control_change(CC_PAN, 127);
        assert!((channel.pan(0) - (0.5 + 63.0 / 128.0)).abs() < 1e-12);
    }

    #[test]
    fn test_destination_mapping() {
        let mut channel = Channel::new(0);
        let mut map = DestinationMap::default();
        // Full pressure raises the pitch one semitone and doubles amplitude.
        assert!(map.set(0, 65));
        assert!(map.set(2, 127));
        assert!(!map.set(6, 10));
        channel.set_destinations(ControlSource::ChannelPressure, map);

        channel.set_channel_pressure(127);
        let modulation = channel.modulation(60);
        assert!((modulation.pitch_cents - 100.0).abs() < 1e-9);
        assert!((modulation.amplitude - 127.0 / 64.0).abs() < 1e-9);

        let mut cc_map = DestinationMap::default();
        cc_map.set(5, 127);
        channel.set_destinations(ControlSource::Control(16), cc_map);
        channel.control_change(16, 127);
        assert!((channel.modulation(60).lfo_amplitude - 1.0).abs() < 1e-9);

        // A neutral map removes the routing.
        channel.set_destinations(ControlSource::Control(16), DestinationMap::default());
        assert_eq!(0.0, channel.modulation(60).lfo_amplitude);
    }

    #[test]
    fn test_mod_wheel_vibrato_depth() {
        let mut channel = Channel::new(0);
        channel.control_change(CC_MODULATION, 127);
        assert!((channel.modulation(60).lfo_pitch_cents - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_key_controls() {
        let mut channel = Channel::new(0);
        assert!(channel.set_key_control(36, CC_VOLUME, 32));
        assert!(channel.set_key_control(36, CC_PAN, 0));
        assert!(channel.set_key_control(36, CC_REVERB_SEND, 127));
        assert!(!channel.set_key_control(36, CC_MODULATION, 10));

        assert_eq!(0.5, channel.key_volume(36));
        assert_eq!(0.0, channel.pan(36));
        assert_eq!(1.0, channel.reverb_send(36));
        assert_eq!(1.0, channel.key_volume(37));
        assert_eq!(40.0 / 127.0, channel.reverb_send(37));

        channel.reset();
        assert_eq!(1.0, channel.key_volume(36));
    }
}
