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

//! Applies MIDI messages to the control state.
//!
//! Channel voice messages and the universal system exclusive sub-protocols the
//! engine understands are decoded here. Anything malformed or unknown is dropped
//! with a debug log and never reaches the caller.

use tracing::{debug, info};

use super::{
    channel::{
        ChannelEffect, ControlSource, DestinationMap, GM2_MELODIC_BANK_MSB,
        GM2_PERCUSSION_BANK_MSB,
    },
    effects::{
        chorus::DEFAULT_CHORUS_TYPE, reverb::DEFAULT_ROOM_TYPE, ParameterChange, CHORUS_SLOT,
        MAX_SLOT_DEPTH, REVERB_SLOT,
    },
    mixer::{normalize_14bit, ControlState, MasterControls},
    tuning::TuningKey,
    voice::{allocate, Allocation, PendingNote, Voice, VoiceAllocation},
};
use crate::midi::{
    MidiEvent, ACTIVE_SENSING, CHANNEL_PRESSURE, CONTROL_CHANGE, NOTE_OFF, NOTE_ON, PITCH_BEND,
    POLY_PRESSURE, PROGRAM_CHANGE, SYSTEM_RESET,
};

const SYSEX_START: u8 = 0xF0;
const SYSEX_END: u8 = 0xF7;
const NON_REAL_TIME: u8 = 0x7E;
const REAL_TIME: u8 = 0x7F;
const ALL_DEVICES: u8 = 0x7F;

const SUB_DEVICE_CONTROL: u8 = 0x04;
const SUB_TUNING: u8 = 0x08;
const SUB_GENERAL_MIDI: u8 = 0x09;
const SUB_DLS: u8 = 0x0A;

impl ControlState {
    /// Applies one event. `delay` is the event's frame offset within the cycle.
    pub fn route(&mut self, event: &MidiEvent, delay: usize) {
        self.activity();
        match event {
            MidiEvent::Short {
                command,
                channel,
                data1,
                data2,
            } => self.route_short(*command, *channel as usize, *data1, *data2, delay),
            MidiEvent::SysEx(data) => self.route_sysex(data),
        }
    }

    fn route_short(&mut self, command: u8, channel: usize, data1: u8, data2: u8, delay: usize) {
        match command {
            ACTIVE_SENSING => {
                self.active_sensing = true;
                return;
            }
            SYSTEM_RESET => {
                self.reset();
                return;
            }
            _ => {}
        }

        if channel >= self.channels.len() {
            debug!(channel, command, "Dropping message for unknown channel");
            return;
        }

        match command & 0xF0 {
            NOTE_OFF => self.note_off(channel, data1),
            NOTE_ON if data2 == 0 => self.note_off(channel, data1),
            NOTE_ON => self.note_on(channel, data1, data2, delay),
            POLY_PRESSURE => self.channels[channel].set_poly_pressure(data1, data2),
            CONTROL_CHANGE => self.control_change(channel, data1, data2),
            PROGRAM_CHANGE => self.channels[channel].program_change(data1),
            CHANNEL_PRESSURE => self.channels[channel].set_channel_pressure(data1),
            PITCH_BEND => self.channels[channel]
                .set_pitch_bend(data1 as u16 + data2 as u16 * 128),
            _ => debug!(command, "Ignoring unsupported message"),
        }
    }

    fn note_on(&mut self, channel: usize, note: u8, velocity: u8, delay: usize) {
        let mono = self.channels[channel].is_mono();
        for voice in self.voices.iter_mut() {
            if voice.is_active()
                && voice.is_on()
                && voice.channel() == channel
                && (mono || voice.note() == note)
            {
                voice.release();
            }
            if let Some(stealer) = voice.stealer_mut() {
                if stealer.channel == channel && (mono || stealer.note == note) {
                    stealer.released = true;
                }
            }
        }

        let patch = self.channels[channel].patch(self.gm_mode);
        let Some(instrument) = self.soundbank.instrument(patch) else {
            debug!(channel, ?patch, "No instrument for patch");
            return;
        };

        let tuning = self.channels[channel].tuning();
        let tuning_cents = self.tunings.key_cents(tuning, note);
        let mixer = self
            .mixers
            .iter()
            .find(|entry| entry.channel == channel && !entry.stopped && !entry.is_orphaned())
            .map(|entry| entry.id);

        for region in instrument.regions().iter().filter(|r| r.matches(note, velocity)) {
            let pending = PendingNote {
                channel,
                note,
                velocity,
                region: region.clone(),
                tuning,
                tuning_cents,
                mixer,
                delay,
                released: false,
            };
            match allocate(
                &self.voices,
                self.voice_allocation,
                channel,
                self.channels.len(),
            ) {
                Some(Allocation::Free(index)) => {
                    self.next_serial += 1;
                    self.voices[index].begin(pending, self.next_serial, self.sample_rate);
                }
                Some(Allocation::Steal(index)) => self.voices[index].steal(pending),
                None => break,
            }
        }
    }

    fn note_off(&mut self, channel: usize, note: u8) {
        let sustain = self.channels[channel].sustain();
        for voice in self.voices.iter_mut() {
            if voice.is_active() && voice.channel() == channel && voice.note() == note {
                voice.note_off(sustain);
            }
            if let Some(stealer) = voice.stealer_mut() {
                if stealer.channel == channel && stealer.note == note {
                    stealer.released = true;
                }
            }
        }
    }

    fn control_change(&mut self, channel: usize, control: u8, value: u8) {
        let effect = self.channels[channel].control_change(control, value);
        let sustain = self.channels[channel].sustain();
        let on_channel = move |voice: &&mut Voice| voice.is_active() && voice.channel() == channel;

        match effect {
            ChannelEffect::None => {}
            ChannelEffect::SustainReleased => self
                .voices
                .iter_mut()
                .filter(on_channel)
                .for_each(|voice| voice.sustain_released()),
            ChannelEffect::SostenutoPressed => self
                .voices
                .iter_mut()
                .filter(on_channel)
                .for_each(|voice| voice.sostenuto_pressed()),
            ChannelEffect::SostenutoReleased => self
                .voices
                .iter_mut()
                .filter(on_channel)
                .for_each(|voice| voice.sostenuto_released(sustain)),
            ChannelEffect::AllSoundOff => self.all_sound_off(channel),
            ChannelEffect::ResetAllControllers => {
                self.voices.iter_mut().filter(on_channel).for_each(|voice| {
                    voice.sostenuto_released(false);
                    voice.sustain_released();
                })
            }
            ChannelEffect::AllNotesOff => {
                for voice in self.voices.iter_mut() {
                    if voice.is_active() && voice.channel() == channel {
                        voice.note_off(sustain);
                    }
                    if let Some(stealer) = voice.stealer_mut() {
                        if stealer.channel == channel {
                            stealer.released = true;
                        }
                    }
                }
            }
            ChannelEffect::TuningSelected => self.retune_channel(channel),
        }
    }

    /// Silences every voice on the channel by the next cycle, including notes still
    /// waiting on a stolen voice.
    pub fn all_sound_off(&mut self, channel: usize) {
        for voice in self.voices.iter_mut() {
            if voice.is_active() && voice.channel() == channel {
                voice.sound_off();
            } else if voice.stealer_mut().is_some_and(|s| s.channel == channel) {
                voice.cancel_stealer();
            }
        }
    }

    /// Recomputes the pitch of every active voice playing from the table.
    fn retune_table(&mut self, key: TuningKey) {
        let tunings = &self.tunings;
        for voice in self.voices.iter_mut() {
            if voice.is_active() && voice.tuning() == key {
                voice.update_tuning(key, tunings.key_cents(key, voice.note()));
            }
        }
    }

    /// Moves the channel's active voices to the channel's current table.
    fn retune_channel(&mut self, channel: usize) {
        let key = self.channels[channel].tuning();
        let tunings = &self.tunings;
        for voice in self.voices.iter_mut() {
            if voice.is_active() && voice.channel() == channel {
                voice.update_tuning(key, tunings.key_cents(key, voice.note()));
            }
        }
        self.collect_tunings();
    }

    /// Drops channel-mask tunings that nothing references anymore.
    fn collect_tunings(&mut self) {
        let channels = &self.channels;
        let voices = &self.voices;
        self.tunings.collect_garbage(|key| {
            channels.iter().any(|channel| channel.tuning() == *key)
                || voices
                    .iter()
                    .any(|voice| voice.is_active() && voice.tuning() == *key)
        });
    }

    /// Silences everything and restores power-on state for the current GM mode.
    pub fn reset(&mut self) {
        for voice in self.voices.iter_mut() {
            voice.sound_off();
        }
        for channel in self.channels.iter_mut() {
            channel.reset();
            if self.gm_mode == 2 {
                let msb = if channel.index() == 9 {
                    GM2_PERCUSSION_BANK_MSB
                } else {
                    GM2_MELODIC_BANK_MSB
                };
                channel.select_patch(msb as u16 * 128, 0);
            }
        }
        self.master = MasterControls::default();
        self.pending_gpc
            .push(ParameterChange::new(&[REVERB_SLOT], 0, DEFAULT_ROOM_TYPE));
        self.pending_gpc
            .push(ParameterChange::new(&[CHORUS_SLOT], 0, DEFAULT_CHORUS_TYPE));
        self.collect_tunings();
        info!(gm_mode = self.gm_mode, "Engine reset.");
    }

    fn route_sysex(&mut self, data: &[u8]) {
        if data.len() < 5 || data[0] != SYSEX_START {
            debug!(len = data.len(), "Dropping truncated system exclusive message");
            return;
        }
        let body = match data.last() {
            Some(&SYSEX_END) => &data[..data.len() - 1],
            _ => data,
        };
        let device = data[2];
        if device != ALL_DEVICES && device != self.device_id {
            debug!(device, "System exclusive message for another device");
            return;
        }

        let handled = match data[1] {
            NON_REAL_TIME => self.non_real_time(data, body),
            REAL_TIME => self.real_time(data, body),
            _ => false,
        };
        if !handled {
            debug!(
                kind = data[1],
                sub_id1 = data[3],
                sub_id2 = data[4],
                "Ignoring system exclusive message"
            );
        }
    }

    fn non_real_time(&mut self, data: &[u8], body: &[u8]) -> bool {
        match (body[3], body[4]) {
            (SUB_TUNING, 0x01) => match body.get(5) {
                Some(&program) => self.load_tuning(TuningKey::Program { bank: 0, program }, data),
                None => false,
            },
            (SUB_TUNING, 0x04..=0x07) => match (body.get(5), body.get(6)) {
                (Some(&bank), Some(&program)) => {
                    self.load_tuning(TuningKey::Program { bank, program }, data)
                }
                _ => false,
            },
            (SUB_TUNING, 0x08 | 0x09) => self.load_masked_tuning(data, body),
            (SUB_GENERAL_MIDI, 0x01..=0x03) => {
                self.gm_mode = match body[4] {
                    0x01 => 1,
                    0x02 => 0,
                    _ => 2,
                };
                info!(gm_mode = self.gm_mode, "General MIDI mode changed.");
                self.reset();
                true
            }
            (SUB_DLS, 0x01) => {
                if self.gm_mode == 0 {
                    self.gm_mode = 1;
                }
                self.voice_allocation = VoiceAllocation::Static;
                info!("DLS on.");
                self.reset();
                true
            }
            (SUB_DLS, 0x02) => {
                self.gm_mode = 0;
                self.voice_allocation = VoiceAllocation::Dynamic;
                info!("DLS off.");
                self.reset();
                true
            }
            (SUB_DLS, 0x03) => {
                self.voice_allocation = VoiceAllocation::Dynamic;
                true
            }
            (SUB_DLS, 0x04) => {
                self.voice_allocation = VoiceAllocation::Static;
                true
            }
            _ => false,
        }
    }

    fn real_time(&mut self, data: &[u8], body: &[u8]) -> bool {
        match (body[3], body[4]) {
            (SUB_DEVICE_CONTROL, 0x01..=0x04) => {
                let (Some(&lsb), Some(&msb)) = (body.get(5), body.get(6)) else {
                    return false;
                };
                let value = normalize_14bit(lsb, msb);
                match body[4] {
                    0x01 => self.master.volume = value,
                    0x02 => self.master.balance = value,
                    0x03 => self.master.fine_tuning = value,
                    _ => self.master.coarse_tuning = value,
                }
                true
            }
            (SUB_DEVICE_CONTROL, 0x05) => self.global_parameter_control(body),
            (SUB_TUNING, 0x02) => match body.get(5) {
                Some(&program) => self.load_tuning(TuningKey::Program { bank: 0, program }, data),
                None => false,
            },
            (SUB_TUNING, 0x07) => match (body.get(5), body.get(6)) {
                (Some(&bank), Some(&program)) => {
                    self.load_tuning(TuningKey::Program { bank, program }, data)
                }
                _ => false,
            },
            (SUB_TUNING, 0x08 | 0x09) => self.load_masked_tuning(data, body),
            (SUB_GENERAL_MIDI, 0x01) => {
                self.control_destinations(body, 6, |_| ControlSource::ChannelPressure)
            }
            (SUB_GENERAL_MIDI, 0x02) => {
                self.control_destinations(body, 6, |_| ControlSource::PolyPressure)
            }
            (SUB_GENERAL_MIDI, 0x03) => {
                self.control_destinations(body, 7, |body| ControlSource::Control(body[6]))
            }
            (SUB_DLS, 0x01) => self.key_based_control(body),
            _ => false,
        }
    }

    /// Loads a keyed tuning dump and retunes the voices playing from it.
    fn load_tuning(&mut self, key: TuningKey, data: &[u8]) -> bool {
        if !self.tunings.get_or_default(key).load(data) {
            return false;
        }
        self.retune_table(key);
        true
    }

    /// Loads a scale/octave tuning into a new table for the channels in the mask.
    fn load_masked_tuning(&mut self, data: &[u8], body: &[u8]) -> bool {
        let (Some(&high), Some(&mid), Some(&low)) = (body.get(5), body.get(6), body.get(7)) else {
            return false;
        };
        let mask = (high as u32) << 14 | (mid as u32) << 7 | low as u32;

        let key = self.tunings.create_anonymous();
        if !self.tunings.get_or_default(key).load(data) {
            self.collect_tunings();
            return false;
        }
        for channel in 0..self.channels.len() {
            if mask & (1 << channel) != 0 {
                self.channels[channel].set_tuning(key);
                self.retune_channel(channel);
            }
        }
        self.collect_tunings();
        true
    }

    /// Queues reverb and chorus parameter changes. Parameter and value fields are
    /// packed most significant byte first, seven bits per byte.
    fn global_parameter_control(&mut self, body: &[u8]) -> bool {
        let (Some(&slot_width), Some(&param_width), Some(&value_width)) =
            (body.get(5), body.get(6), body.get(7))
        else {
            return false;
        };
        let (slot_width, param_width, value_width) =
            (slot_width as usize, param_width as usize, value_width as usize);
        if param_width == 0 || value_width == 0 || param_width > 9 || value_width > 9 {
            return false;
        }

        let mut slots = [0u32; MAX_SLOT_DEPTH];
        let depth = slot_width.min(MAX_SLOT_DEPTH);
        let mut pos = 8;
        for i in 0..slot_width {
            let (Some(&msb), Some(&lsb)) = (body.get(pos), body.get(pos + 1)) else {
                return false;
            };
            if i < depth {
                slots[i] = msb as u32 * 128 + lsb as u32;
            }
            pos += 2;
        }

        let entry = param_width + value_width;
        while pos + entry <= body.len() {
            let param = pack_7bit(&body[pos..pos + param_width]);
            let value = pack_7bit(&body[pos + param_width..pos + entry]);
            self.pending_gpc
                .push(ParameterChange::new(&slots[..depth], param, value));
            pos += entry;
        }
        true
    }

    /// Replaces a source's destination map with (destination, range) pairs.
    fn control_destinations(
        &mut self,
        body: &[u8],
        start: usize,
        source: impl Fn(&[u8]) -> ControlSource,
    ) -> bool {
        if body.len() < start || (body.len() - start) % 2 != 0 {
            return false;
        }
        let channel = body[5] as usize;
        if channel >= self.channels.len() {
            return false;
        }
        let mut map = DestinationMap::default();
        for pair in body[start..].chunks_exact(2) {
            map.set(pair[0], pair[1]);
        }
        self.channels[channel].set_destinations(source(body), map);
        true
    }

    /// Applies (control, value) overrides to a single key.
    fn key_based_control(&mut self, body: &[u8]) -> bool {
        if body.len() < 7 || (body.len() - 7) % 2 != 0 {
            return false;
        }
        let channel = body[5] as usize;
        let key = body[6];
        let Some(channel) = self.channels.get_mut(channel) else {
            return false;
        };
        for pair in body[7..].chunks_exact(2) {
            channel.set_key_control(key, pair[0], pair[1]);
        }
        true
    }
}

fn pack_7bit(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(0u64, |acc, byte| (acc << 7) | (byte & 0x7F) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::{
        channel::{CC_ALL_SOUND_OFF, CC_SUSTAIN},
        mixer::tests::test_state,
    };

    fn route(state: &mut ControlState, event: MidiEvent) {
        state.route(&event, 0);
    }

    fn sysex(bytes: &[u8]) -> MidiEvent {
        MidiEvent::SysEx(bytes.to_vec())
    }

    #[test]
    fn test_note_on_and_off() {
        let mut state = test_state(4);
        route(&mut state, MidiEvent::note_on(0, 60, 100));
        assert_eq!(1, state.active_voices());
        assert!(state.voices[0].is_on());

        route(&mut state, MidiEvent::note_on(0, 60, 0));
        assert!(!state.voices[0].is_on());
        assert!(state.voices[0].is_active());
    }

    #[test]
    fn test_retrigger_releases_held_key() {
        let mut state = test_state(4);
        route(&mut state, MidiEvent::note_on(0, 60, 100));
        route(&mut state, MidiEvent::note_on(0, 60, 100));
        assert_eq!(2, state.active_voices());
        assert_eq!(1, state.voices.iter().filter(|v| v.is_on()).count());
    }

    #[test]
    fn test_sustain_holds_notes() {
        let mut state = test_state(4);
        route(&mut state, MidiEvent::control_change(0, CC_SUSTAIN, 127));
        route(&mut state, MidiEvent::note_on(0, 60, 100));
        route(&mut state, MidiEvent::note_off(0, 60, 0));
        assert!(state.voices[0].is_sustained());

        route(&mut state, MidiEvent::control_change(0, CC_SUSTAIN, 0));
        assert!(!state.voices[0].is_sustained());
        assert!(state.voices[0].params().released);
    }

    #[test]
    fn test_steals_when_full() {
        let mut state = test_state(2);
        route(&mut state, MidiEvent::note_on(0, 60, 100));
        route(&mut state, MidiEvent::note_on(0, 62, 100));
        route(&mut state, MidiEvent::note_on(0, 64, 100));
        assert_eq!(2, state.active_voices());
        assert!(state.voices[0].has_stealer());

        route(&mut state, MidiEvent::control_change(0, CC_ALL_SOUND_OFF, 0));
        assert!(!state.voices[0].has_stealer());
    }

    #[test]
    fn test_drops_unknown_channel() {
        let mut state = test_state(4);
        state.channels.truncate(8);
        route(&mut state, MidiEvent::note_on(9, 60, 100));
        assert_eq!(0, state.active_voices());
    }

    #[test]
    fn test_pitch_bend_assembles_14_bits() {
        let mut state = test_state(4);
        route(&mut state, MidiEvent::pitch_bend(3, 0x2345));
        assert_eq!(0x2345, state.channels[3].pitch_bend());
    }

    #[test]
    fn test_active_sensing_and_reset() {
        let mut state = test_state(4);
        route(&mut state, MidiEvent::system(ACTIVE_SENSING));
        assert!(state.active_sensing);

        state.master.volume = 0.1;
        state.pending_gpc.clear();
        route(&mut state, MidiEvent::system(SYSTEM_RESET));
        assert_eq!(MasterControls::default(), state.master);
        assert_eq!(
            vec![
                ParameterChange::new(&[REVERB_SLOT], 0, DEFAULT_ROOM_TYPE),
                ParameterChange::new(&[CHORUS_SLOT], 0, DEFAULT_CHORUS_TYPE),
            ],
            state.pending_gpc
        );
    }

    #[test]
    fn test_gm2_selects_banks() {
        let mut state = test_state(4);
        route(&mut state, sysex(&[0xF0, 0x7E, 0x7F, 0x09, 0x03, 0xF7]));
        assert_eq!(2, state.gm_mode);
        assert_eq!(0x78 * 128, state.channels[9].bank());
        assert_eq!(0x79 * 128, state.channels[0].bank());
        assert!(state.channels[9].patch(2).percussion);
        assert!(!state.channels[0].patch(2).percussion);

        route(&mut state, sysex(&[0xF0, 0x7E, 0x7F, 0x09, 0x02, 0xF7]));
        assert_eq!(0, state.gm_mode);
        assert_eq!(0, state.channels[9].bank());
    }

    #[test]
    fn test_dls_modes() {
        let mut state = test_state(4);
        route(&mut state, sysex(&[0xF0, 0x7E, 0x10, 0x0A, 0x01, 0xF7]));
        assert_eq!(1, state.gm_mode);
        assert_eq!(VoiceAllocation::Static, state.voice_allocation);

        route(&mut state, sysex(&[0xF0, 0x7E, 0x10, 0x0A, 0x03, 0xF7]));
        assert_eq!(VoiceAllocation::Dynamic, state.voice_allocation);

        route(&mut state, sysex(&[0xF0, 0x7E, 0x10, 0x0A, 0x02, 0xF7]));
        assert_eq!(0, state.gm_mode);
    }

    #[test]
    fn test_device_control() {
        let mut state = test_state(4);
        route(&mut state, sysex(&[0xF0, 0x7F, 0x7F, 0x04, 0x01, 0x00, 0x20, 0xF7]));
        assert_eq!(0.25, state.master.volume);

        route(&mut state, sysex(&[0xF0, 0x7F, 0x7F, 0x04, 0x02, 0x00, 0x00, 0xF7]));
        assert_eq!((1.0, 0.0), state.master.attenuation());

        route(&mut state, sysex(&[0xF0, 0x7F, 0x10, 0x04, 0x04, 0x00, 0x41, 0xF7]));
        assert!((state.master.tuning_cents() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_wrong_device_is_ignored() {
        let mut state = test_state(4);
        route(&mut state, sysex(&[0xF0, 0x7F, 0x11, 0x04, 0x01, 0x00, 0x20, 0xF7]));
        assert_eq!(MasterControls::default(), state.master);
    }

    #[test]
    fn test_short_sysex_is_ignored() {
        let mut state = test_state(4);
        route(&mut state, sysex(&[0xF0, 0x7F, 0x7F, 0x04, 0x01, 0xF7]));
        route(&mut state, sysex(&[0xF0, 0x7F, 0xF7]));
        route(&mut state, sysex(&[0xF0, 0x7F, 0x7F, 0x09, 0x03, 0x00, 0x01, 0x00, 0xF7]));
        assert_eq!(MasterControls::default(), state.master);
    }

    #[test]
    fn test_global_parameter_control() {
        let mut state = test_state(4);
        state.pending_gpc.clear();
        route(
            &mut state,
            sysex(&[
                0xF0, 0x7F, 0x7F, 0x04, 0x05, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x40, 0xF7,
            ]),
        );
        assert_eq!(vec![ParameterChange::new(&[129], 1, 64)], state.pending_gpc);

        state.pending_gpc.clear();
        // Two-byte values, two changes.
        route(
            &mut state,
            sysex(&[
                0xF0, 0x7F, 0x7F, 0x04, 0x05, 0x01, 0x01, 0x02, 0x01, 0x02, 0x03, 0x01, 0x00,
                0x04, 0x00, 0x7F, 0xF7,
            ]),
        );
        assert_eq!(
            vec![
                ParameterChange::new(&[130], 3, 128),
                ParameterChange::new(&[130], 4, 127),
            ],
            state.pending_gpc
        );
    }

    #[test]
    fn test_control_destination_settings() {
        let mut state = test_state(4);
        route(
            &mut state,
            sysex(&[0xF0, 0x7F, 0x7F, 0x09, 0x01, 0x02, 0x00, 0x42, 0xF7]),
        );
        let map = state.channels[2].destinations(ControlSource::ChannelPressure);
        assert_eq!(0x42, map.range(0));

        route(
            &mut state,
            sysex(&[0xF0, 0x7F, 0x7F, 0x09, 0x03, 0x02, 0x10, 0x02, 0x7F, 0xF7]),
        );
        let map = state.channels[2].destinations(ControlSource::Control(0x10));
        assert_eq!(0x7F, map.range(2));

        // A dangling byte drops the whole message.
        route(
            &mut state,
            sysex(&[0xF0, 0x7F, 0x7F, 0x09, 0x02, 0x02, 0x00, 0x50, 0x01, 0xF7]),
        );
        assert!(state.channels[2]
            .destinations(ControlSource::PolyPressure)
            .is_neutral());
    }

    #[test]
    fn test_key_based_instrument_control() {
        let mut state = test_state(4);
        let before = state.channels[0].key_volume(60);
        route(
            &mut state,
            sysex(&[0xF0, 0x7F, 0x7F, 0x0A, 0x01, 0x00, 0x3C, 0x07, 0x00, 0xF7]),
        );
        assert!(before > 0.0);
        assert_eq!(0.0, state.channels[0].key_volume(60));
        assert_eq!(before, state.channels[0].key_volume(61));
    }

    #[test]
    fn test_single_note_tuning_is_immediate() {
        let mut state = test_state(4);
        route(&mut state, MidiEvent::note_on(0, 60, 100));
        let before = state.voices[0].params().pitch;

        // Key 60 to 61 semitones.
        route(
            &mut state,
            sysex(&[
                0xF0, 0x7F, 0x10, 0x08, 0x02, 0x00, 0x01, 0x3C, 0x3D, 0x00, 0x00, 0xF7,
            ]),
        );
        let after = state.voices[0].params().pitch;
        let expected = 2f32.powf(100.0 / 1200.0);
        assert!((after / before - expected).abs() < 1e-4);
        assert_eq!(6100.0, state.tunings.key_cents(TuningKey::default(), 60));
    }

    #[test]
    fn test_channel_mask_scale_tuning() {
        let mut state = test_state(4);
        route(&mut state, MidiEvent::note_on(0, 60, 100));
        route(&mut state, MidiEvent::note_on(1, 60, 100));
        let before = state.voices[0].params().pitch;

        let mut message = vec![0xF0, 0x7E, 0x10, 0x08, 0x08, 0x00, 0x00, 0x01, 74];
        message.extend([64; 11]);
        message.push(0xF7);
        route(&mut state, MidiEvent::SysEx(message));

        let key = state.channels[0].tuning();
        assert!(matches!(key, TuningKey::Anonymous(_)));
        assert_eq!(6010.0, state.tunings.key_cents(key, 60));
        assert_eq!(6100.0, state.tunings.key_cents(key, 61));
        assert_eq!(TuningKey::default(), state.channels[1].tuning());

        let ratio = state.voices[0].params().pitch / before;
        assert!((ratio - 2f32.powf(10.0 / 1200.0)).abs() < 1e-4);
        assert_eq!(before, state.voices[1].params().pitch);
    }

    #[test]
    fn test_mask_high_byte_selects_no_extra_channels() {
        let mut state = test_state(4);
        let mut message = vec![0xF0, 0x7E, 0x10, 0x08, 0x08, 0x7F, 0x00, 0x02];
        message.extend([70; 12]);
        message.push(0xF7);
        route(&mut state, MidiEvent::SysEx(message));

        assert!(matches!(state.channels[1].tuning(), TuningKey::Anonymous(_)));
        for channel in (0..16).filter(|c| *c != 1) {
            assert_eq!(TuningKey::default(), state.channels[channel].tuning());
        }
    }

    #[test]
    fn test_unused_mask_tunings_are_collected() {
        let mut state = test_state(4);
        let mut message = vec![0xF0, 0x7E, 0x10, 0x08, 0x08, 0x00, 0x00, 0x01];
        message.extend([64; 12]);
        message.push(0xF7);

        route(&mut state, MidiEvent::SysEx(message.clone()));
        route(&mut state, MidiEvent::SysEx(message));
        let anonymous = |state: &ControlState| {
            (0..8)
                .filter(|i| state.tunings.get(TuningKey::Anonymous(*i)).is_some())
                .count()
        };
        assert_eq!(1, anonymous(&state));
    }
}
