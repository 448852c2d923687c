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

//! Voices for polyphonic sample playback.
//!
//! A voice is split in two halves. [Voice] lives in the engine's control state and
//! is only touched under the control lock: it tracks the note, the envelope and
//! computes per-cycle parameters. [VoiceRenderer] lives on the render side and owns
//! the sample stream. Once per cycle the renderer copies the voice's parameters and
//! then renders a block without holding the lock.

use std::{f64::consts::PI, sync::Arc};

use tracing::debug;

use super::{
    buffer::{Bus, BusSet},
    channel::Channel,
    channel_mixer::MixerId,
    envelope::Envelope,
    resampler::{Interpolation, SampleStream},
    soundbank::Region,
    tuning::TuningKey,
};

/// Gains below this are treated as silence.
pub const GAIN_EPSILON: f32 = 0.0001;

/// Vibrato rate of the voice LFO in Hz.
const LFO_RATE: f64 = 5.0;

/// Upper bound on the per-sample read step.
const MAX_PITCH_STEP: f64 = 256.0;

/// Gain destinations, in the order of [VoiceParams::gains].
pub const DEST_LEFT: usize = 0;
pub const DEST_RIGHT: usize = 1;
pub const DEST_REVERB: usize = 2;
pub const DEST_CHORUS: usize = 3;

/// A note waiting to start on a voice.
#[derive(Clone, Debug)]
pub struct PendingNote {
    pub channel: usize,
    pub note: u8,
    pub velocity: u8,
    pub region: Arc<Region>,
    pub tuning: TuningKey,
    pub tuning_cents: f64,
    pub mixer: Option<MixerId>,
    /// Frame offset of the note within its first block.
    pub delay: usize,
    /// Set if the note was released before it could start.
    pub released: bool,
}

/// The parameters a renderer needs for one block.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct VoiceParams {
    /// Read step in source samples per output sample.
    pub pitch: f32,
    /// Gains for left, right, reverb and chorus.
    pub gains: [f32; 4],
    pub released: bool,
}

/// Per-cycle values shared by every voice on a channel.
pub struct VoiceContext<'a> {
    pub channel: &'a Channel,
    /// Master fine and coarse tuning in cents.
    pub master_cents: f64,
    /// The control period in seconds.
    pub period: f64,
    /// The output sample rate.
    pub sample_rate: f64,
}

/// The control-rate half of a voice.
#[derive(Debug)]
pub struct Voice {
    active: bool,
    on: bool,
    sustained: bool,
    sostenuto: bool,
    sound_off: bool,
    fading: bool,
    channel: usize,
    note: u8,
    velocity: u8,
    serial: u64,
    region: Option<Arc<Region>>,
    tuning: TuningKey,
    tuning_cents: f64,
    /// Every pitch contribution other than the tuning table, from the last cycle.
    pitch_offset_cents: f64,
    mixer: Option<MixerId>,
    delay: usize,
    envelope: Envelope,
    lfo_phase: f64,
    stealer: Option<PendingNote>,
    params: VoiceParams,
    sample_rate: f64,
}

impl Default for Voice {
    fn default() -> Self {
        Voice::new()
    }
}

fn pitch_step(cents: f64, source_rate: f64, output_rate: f64) -> f32 {
    let step = 2f64.powf(cents / 1200.0) * source_rate / output_rate;
    step.clamp(0.0, MAX_PITCH_STEP) as f32
}

impl Voice {
    pub fn new() -> Voice {
        Voice {
            active: false,
            on: false,
            sustained: false,
            sostenuto: false,
            sound_off: false,
            fading: false,
            channel: 0,
            note: 0,
            velocity: 0,
            serial: 0,
            region: None,
            tuning: TuningKey::default(),
            tuning_cents: 0.0,
            pitch_offset_cents: 0.0,
            mixer: None,
            delay: 0,
            envelope: Envelope::new(Default::default()),
            lfo_phase: 0.0,
            stealer: None,
            params: VoiceParams::default(),
            sample_rate: 44100.0,
        }
    }

    /// Starts a note on this voice. `serial` must be unique per started note.
    pub fn begin(&mut self, note: PendingNote, serial: u64, sample_rate: f64) {
        self.active = true;
        self.on = !note.released;
        self.sustained = false;
        self.sostenuto = false;
        self.sound_off = false;
        self.fading = false;
        self.channel = note.channel;
        self.note = note.note;
        self.velocity = note.velocity;
        self.serial = serial;
        self.tuning = note.tuning;
        self.tuning_cents = note.tuning_cents;
        self.pitch_offset_cents = note.region.fine_tune - note.region.root_key as f64 * 100.0;
        self.mixer = note.mixer;
        self.delay = note.delay;
        self.envelope.restart(note.region.envelope);
        if note.released {
            self.envelope.release();
        }
        self.lfo_phase = 0.0;
        self.sample_rate = sample_rate;
        self.params = VoiceParams {
            pitch: pitch_step(
                note.tuning_cents + self.pitch_offset_cents,
                note.region.sample.sample_rate() as f64,
                sample_rate,
            ),
            gains: [0.0; 4],
            released: note.released,
        };
        self.region = Some(note.region);
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Returns true if the key is still held.
    pub fn is_on(&self) -> bool {
        self.on
    }

    pub fn is_fading(&self) -> bool {
        self.fading
    }

    pub fn is_sustained(&self) -> bool {
        self.sustained
    }

    pub fn channel(&self) -> usize {
        self.channel
    }

    pub fn note(&self) -> u8 {
        self.note
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn tuning(&self) -> TuningKey {
        self.tuning
    }

    pub fn mixer(&self) -> Option<MixerId> {
        self.mixer
    }

    pub fn region(&self) -> Option<&Arc<Region>> {
        self.region.as_ref()
    }

    pub fn delay(&self) -> usize {
        self.delay
    }

    pub fn params(&self) -> &VoiceParams {
        &self.params
    }

    pub fn has_stealer(&self) -> bool {
        self.stealer.is_some()
    }

    /// Returns the note waiting to take over this voice, if any.
    pub fn stealer_mut(&mut self) -> Option<&mut PendingNote> {
        self.stealer.as_mut()
    }

    /// Key release. Sustain defers the envelope release until the pedal is lifted.
    pub fn note_off(&mut self, sustain: bool) {
        if !self.on {
            return;
        }
        self.on = false;
        if sustain {
            self.sustained = true;
        } else if !self.sostenuto {
            self.release();
        }
    }

    /// Starts the envelope release.
    pub fn release(&mut self) {
        self.on = false;
        self.sustained = false;
        self.envelope.release();
        self.params.released = true;
    }

    /// The sustain pedal was lifted.
    pub fn sustain_released(&mut self) {
        if self.sustained && !self.sostenuto {
            self.release();
        }
        self.sustained = false;
    }

    /// The sostenuto pedal was pressed; held notes latch.
    pub fn sostenuto_pressed(&mut self) {
        if self.on {
            self.sostenuto = true;
        }
    }

    /// The sostenuto pedal was lifted; latched notes whose key is up release.
    pub fn sostenuto_released(&mut self, sustain: bool) {
        if !self.sostenuto {
            return;
        }
        self.sostenuto = false;
        if !self.on {
            if sustain {
                self.sustained = true;
            } else {
                self.release();
            }
        }
    }

    /// Silences the voice at the next control cycle.
    pub fn sound_off(&mut self) {
        self.sound_off = true;
        self.stealer = None;
    }

    /// Drops the note waiting to take over this voice.
    pub fn cancel_stealer(&mut self) {
        self.stealer = None;
    }

    /// Hands the voice to another note. The current note fades out over one block.
    pub fn steal(&mut self, note: PendingNote) {
        self.stealer = Some(note);
    }

    /// Called when the renderer ran out of sample data.
    pub fn exhausted(&mut self) {
        if self.stealer.is_some() {
            self.fading = true;
        } else {
            self.deactivate();
        }
    }

    fn deactivate(&mut self) {
        self.active = false;
        self.on = false;
        self.fading = false;
        self.region = None;
        self.params.gains = [0.0; 4];
    }

    /// Switches the voice to a new tuning table value and recomputes its pitch
    /// immediately.
    pub fn update_tuning(&mut self, tuning: TuningKey, tuning_cents: f64) {
        if !self.active {
            return;
        }
        self.tuning = tuning;
        self.tuning_cents = tuning_cents;
        if let Some(region) = self.region.as_ref() {
            self.params.pitch = pitch_step(
                self.tuning_cents + self.pitch_offset_cents,
                region.sample.sample_rate() as f64,
                self.sample_rate,
            );
        }
    }

    /// Runs once per control cycle. `next_serial` hands out serials for stealers.
    pub fn process_control_logic(&mut self, ctx: &VoiceContext, next_serial: &mut u64) {
        if !self.active {
            return;
        }

        if self.fading {
            self.fading = false;
            match self.stealer.take() {
                Some(note) => {
                    *next_serial += 1;
                    self.begin(note, *next_serial, ctx.sample_rate);
                }
                None => {
                    self.deactivate();
                    return;
                }
            }
        } else if self.stealer.is_some() {
            self.fading = true;
            return;
        } else if self.sound_off {
            self.deactivate();
            return;
        }

        self.envelope.advance(ctx.period);
        if self.envelope.is_finished() {
            self.deactivate();
            return;
        }

        let Some(region) = self.region.as_ref() else {
            self.deactivate();
            return;
        };
        let channel = ctx.channel;
        let modulation = channel.modulation(self.note);

        self.lfo_phase = (self.lfo_phase + LFO_RATE * ctx.period).fract();
        let lfo = (2.0 * PI * self.lfo_phase).sin();

        self.pitch_offset_cents = region.fine_tune - region.root_key as f64 * 100.0
            + channel.pitch_cents()
            + ctx.master_cents
            + modulation.pitch_cents
            + lfo * modulation.lfo_pitch_cents;
        self.params.pitch = pitch_step(
            self.tuning_cents + self.pitch_offset_cents,
            region.sample.sample_rate() as f64,
            ctx.sample_rate,
        );

        let velocity = self.velocity as f64 / 127.0;
        let soft = if channel.soft() { 0.5 } else { 1.0 };
        let tremolo = 1.0 - modulation.lfo_amplitude.min(1.0) * 0.5 * (1.0 - lfo);
        let amp = self.envelope.value()
            * region.gain as f64
            * velocity
            * velocity
            * channel.gain()
            * soft
            * modulation.amplitude
            * channel.key_volume(self.note)
            * tremolo;

        let pan = (channel.pan(self.note) + region.pan as f64 - 0.5).clamp(0.0, 1.0);
        let mut left = (pan * PI / 2.0).cos();
        let mut right = if pan == 0.5 {
            left
        } else {
            (pan * PI / 2.0).sin()
        };
        let balance = channel.balance();
        if balance > 0.5 {
            left *= (1.0 - balance) * 2.0;
        } else {
            right *= balance * 2.0;
        }

        self.params.gains[DEST_LEFT] = (amp * left) as f32;
        self.params.gains[DEST_RIGHT] = (amp * right) as f32;
        self.params.gains[DEST_REVERB] =
            (amp * channel.reverb_send(self.note) * region.reverb_send as f64) as f32;
        self.params.gains[DEST_CHORUS] =
            (amp * channel.chorus_send(self.note) * region.chorus_send as f64) as f32;
    }
}

/// How the engine picks a voice for a new note when all are busy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VoiceAllocation {
    /// Steal the oldest released voice, else the oldest voice.
    #[default]
    Dynamic,
    /// Steal from the lowest-priority channel, never from a channel with a higher
    /// priority than the requesting one.
    Static,
}

/// The outcome of a voice search.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Allocation {
    Free(usize),
    Steal(usize),
}

/// Channel indices ordered from lowest to highest static priority: 16..11, 9..1, 10.
fn channel_priority_order(channels: usize) -> impl Iterator<Item = usize> {
    (10..channels)
        .rev()
        .chain((0..channels.min(9)).rev())
        .chain((channels > 9).then_some(9))
}

fn oldest_on_channel(voices: &[Voice], channel: Option<usize>) -> Option<usize> {
    let candidates = || {
        voices.iter().enumerate().filter(move |(_, v)| {
            v.active && v.stealer.is_none() && channel.map_or(true, |c| v.channel == c)
        })
    };
    candidates()
        .filter(|(_, v)| !v.on)
        .min_by_key(|(_, v)| v.serial)
        .or_else(|| candidates().min_by_key(|(_, v)| v.serial))
        .map(|(i, _)| i)
}

/// Finds a voice for a new note on `channel`.
pub fn allocate(
    voices: &[Voice],
    policy: VoiceAllocation,
    channel: usize,
    channels: usize,
) -> Option<Allocation> {
    if let Some(free) = voices.iter().position(|v| !v.active) {
        return Some(Allocation::Free(free));
    }

    let stolen = match policy {
        VoiceAllocation::Dynamic => oldest_on_channel(voices, None),
        VoiceAllocation::Static => {
            let mut found = None;
            for candidate in channel_priority_order(channels) {
                found = oldest_on_channel(voices, Some(candidate));
                if found.is_some() || candidate == channel {
                    break;
                }
            }
            found
        }
    };

    match stolen {
        Some(index) => {
            debug!(
                index,
                channel = voices[index].channel,
                note = voices[index].note,
                "Voice limit reached, stealing"
            );
            Some(Allocation::Steal(index))
        }
        None => {
            debug!(channel, "Voice limit reached, declining note");
            None
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RenderState {
    Idle,
    Playing,
    /// Ramping out over one block.
    Ending,
}

/// The render-side half of a voice.
pub struct VoiceRenderer {
    stream: SampleStream,
    state: RenderState,
    serial: u64,
    channel: usize,
    mixer: Option<MixerId>,
    delay: usize,
    pitch: f32,
    gains: [f32; 4],
    last_gains: [f32; 4],
    exhausted: bool,
}

impl VoiceRenderer {
    pub fn new(interpolation: Interpolation) -> VoiceRenderer {
        VoiceRenderer {
            stream: SampleStream::new(interpolation),
            state: RenderState::Idle,
            serial: 0,
            channel: 0,
            mixer: None,
            delay: 0,
            pitch: 1.0,
            gains: [0.0; 4],
            last_gains: [0.0; 4],
            exhausted: false,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state == RenderState::Idle
    }

    pub fn channel(&self) -> usize {
        self.channel
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn mixer(&self) -> Option<MixerId> {
        self.mixer
    }

    /// Returns true once after the stream ran out of data.
    pub fn take_exhausted(&mut self) -> bool {
        std::mem::take(&mut self.exhausted)
    }

    /// Copies the voice's parameters for the next block. Must be called under the
    /// control lock, after the voice's control logic ran.
    pub fn sync(&mut self, voice: &Voice) {
        if voice.is_active() && !voice.is_fading() {
            if self.state == RenderState::Idle || self.serial != voice.serial() {
                let Some(region) = voice.region() else {
                    return;
                };
                self.stream.start(region, voice.params().pitch);
                self.serial = voice.serial();
                self.delay = voice.delay();
                self.last_gains = voice.params().gains;
                self.exhausted = false;
                self.state = RenderState::Playing;
            }
            let params = voice.params();
            self.pitch = params.pitch;
            self.gains = params.gains;
            if params.released {
                self.stream.release();
            }
            self.channel = voice.channel();
            self.mixer = voice.mixer();
        } else if self.state == RenderState::Playing {
            self.state = RenderState::Ending;
            self.gains = [0.0; 4];
        }
    }

    /// Renders one block into the buses. Scratch buses are overwritten.
    pub fn render(&mut self, buses: &mut BusSet) {
        if self.state == RenderState::Idle {
            return;
        }

        let frames = buses.frames();
        let mut scratch_left = buses.take(Bus::Scratch1);
        let mut scratch_right = buses.take(Bus::Scratch2);
        let stereo_source = self.stream.channels() > 1;

        let produced = {
            let left = scratch_left.samples_mut();
            let right = scratch_right.samples_mut();
            let produced = self.stream.read(
                left,
                if stereo_source { Some(&mut *right) } else { None },
                self.pitch,
            );
            left[produced..].fill(0.0);
            right[produced..].fill(0.0);
            produced
        };

        let from = self.last_gains;
        let to = self.gains;
        let delay = self.delay.min(frames);
        let left = scratch_left.samples();

        if stereo_source {
            let right = scratch_right.samples();
            mix_into(buses, Bus::Left, left, from[DEST_LEFT], to[DEST_LEFT], delay);
            mix_into(buses, Bus::Right, right, from[DEST_RIGHT], to[DEST_RIGHT], delay);
            for (dest, bus) in [(DEST_REVERB, Bus::Effect1), (DEST_CHORUS, Bus::Effect2)] {
                let (g0, g1) = (from[dest] * 0.5, to[dest] * 0.5);
                mix_into(buses, bus, left, g0, g1, delay);
                mix_into(buses, bus, right, g0, g1, delay);
            }
        } else {
            if from[DEST_LEFT] == from[DEST_RIGHT] && to[DEST_LEFT] == to[DEST_RIGHT] {
                mix_into(buses, Bus::Mono, left, from[DEST_LEFT], to[DEST_LEFT], delay);
            } else {
                mix_into(buses, Bus::Left, left, from[DEST_LEFT], to[DEST_LEFT], delay);
                mix_into(buses, Bus::Right, left, from[DEST_RIGHT], to[DEST_RIGHT], delay);
            }
            mix_into(buses, Bus::Effect1, left, from[DEST_REVERB], to[DEST_REVERB], delay);
            mix_into(buses, Bus::Effect2, left, from[DEST_CHORUS], to[DEST_CHORUS], delay);
        }

        buses.put(Bus::Scratch1, scratch_left);
        buses.put(Bus::Scratch2, scratch_right);
        self.last_gains = self.gains;

        if self.state == RenderState::Ending {
            self.stream.stop();
            self.state = RenderState::Idle;
            self.last_gains = [0.0; 4];
        } else if produced < frames || self.stream.is_finished() {
            self.stream.stop();
            self.exhausted = true;
            self.state = RenderState::Idle;
            self.last_gains = [0.0; 4];
        }
    }
}

/// Adds `source` into `bus`, ramping the gain linearly from `from` to `to` across
/// the block. The source is offset by `delay` frames and whatever runs past the end
/// of the block lands in the bus's delay companion.
pub fn mix_into(buses: &mut BusSet, bus: Bus, source: &[f32], from: f32, to: f32, delay: usize) {
    if from.abs() < GAIN_EPSILON && to.abs() < GAIN_EPSILON {
        return;
    }
    let frames = source.len();
    if frames == 0 {
        return;
    }
    let step = (to - from) / frames as f32;
    let delay = delay.min(frames);
    let split = frames - delay;

    {
        let target = buses[bus].samples_mut();
        for (i, sample) in source[..split].iter().enumerate() {
            target[i + delay] += sample * (from + step * i as f32);
        }
    }
    if delay > 0 {
        if let Some(delayed) = bus.delayed() {
            let target = buses[delayed].samples_mut();
            for (i, sample) in source[split..].iter().enumerate() {
                target[i] += sample * (from + step * (split + i) as f32);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::{
        channel::{CC_SUSTAIN, CC_VOLUME},
        envelope::EnvelopeParams,
        soundbank::{LoopMode, SampleData},
    };

    const RATE: f64 = 44100.0;
    const PERIOD: f64 = 300.0 / RATE;

    fn looped_region() -> Arc<Region> {
        let mut region = Region::new(Arc::new(SampleData::mono(vec![0.5; 64], 44100.0)), 60);
        region.loop_mode = LoopMode::Continuous;
        region.envelope = EnvelopeParams {
            attack: 0.0,
            decay: 0.0,
            sustain: 1.0,
            release: 0.05,
            ..Default::default()
        };
        Arc::new(region)
    }

    fn pending(channel: usize, note: u8, region: Arc<Region>) -> PendingNote {
        PendingNote {
            channel,
            note,
            velocity: 127,
            region,
            tuning: TuningKey::default(),
            tuning_cents: note as f64 * 100.0,
            mixer: None,
            delay: 0,
            released: false,
        }
    }

    fn ctx(channel: &Channel) -> VoiceContext<'_> {
        VoiceContext {
            channel,
            master_cents: 0.0,
            period: PERIOD,
            sample_rate: RATE,
        }
    }

    fn started(note: u8, serial: u64) -> Voice {
        let mut voice = Voice::new();
        voice.begin(pending(0, note, looped_region()), serial, RATE);
        voice
    }

    #[test]
    fn test_root_key_plays_at_unity() {
        let channel = Channel::new(0);
        let mut voice = started(60, 1);
        let mut serial = 1;
        voice.process_control_logic(&ctx(&channel), &mut serial);
        assert!((voice.params().pitch - 1.0).abs() < 1e-6);

        let mut octave = started(72, 2);
        octave.process_control_logic(&ctx(&channel), &mut serial);
        assert!((octave.params().pitch - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_center_pan_gains() {
        let mut channel = Channel::new(0);
        channel.control_change(CC_VOLUME, 127);
        let mut voice = started(60, 1);
        let mut serial = 1;
        voice.process_control_logic(&ctx(&channel), &mut serial);

        let gains = voice.params().gains;
        let expected = (PI / 4.0).cos() as f32;
        assert!((gains[DEST_LEFT] - expected).abs() < 1e-6);
        assert_eq!(gains[DEST_LEFT], gains[DEST_RIGHT]);
        // Default reverb send is 40, chorus send 0.
        assert!((gains[DEST_REVERB] - 40.0 / 127.0).abs() < 1e-6);
        assert_eq!(0.0, gains[DEST_CHORUS]);
    }

    #[test]
    fn test_update_tuning_is_immediate() {
        let channel = Channel::new(0);
        let mut voice = started(60, 1);
        let mut serial = 1;
        voice.process_control_logic(&ctx(&channel), &mut serial);

        voice.update_tuning(TuningKey::default(), 6000.0 + 1200.0);
        assert!((voice.params().pitch - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_sustain_defers_release() {
        let mut channel = Channel::new(0);
        channel.control_change(CC_SUSTAIN, 127);
        let mut voice = started(60, 1);

        voice.note_off(channel.sustain());
        assert!(voice.is_sustained());
        assert!(!voice.params().released);

        voice.sustain_released();
        assert!(voice.params().released);
    }

    #[test]
    fn test_sostenuto_latches_held_notes() {
        let mut voice = started(60, 1);
        voice.sostenuto_pressed();
        voice.note_off(false);
        assert!(!voice.params().released);
        voice.sostenuto_released(false);
        assert!(voice.params().released);
    }

    #[test]
    fn test_sound_off_deactivates_in_one_cycle() {
        let channel = Channel::new(0);
        let mut voice = started(60, 1);
        let mut serial = 1;
        voice.sound_off();
        voice.process_control_logic(&ctx(&channel), &mut serial);
        assert!(!voice.is_active());
    }

    #[test]
    fn test_release_finishes_voice() {
        let channel = Channel::new(0);
        let mut voice = started(60, 1);
        let mut serial = 1;
        voice.note_off(false);
        for _ in 0..10 {
            voice.process_control_logic(&ctx(&channel), &mut serial);
        }
        assert!(!voice.is_active());
    }

    #[test]
    fn test_steal_fades_then_starts_stealer() {
        let channel = Channel::new(0);
        let mut voice = started(60, 1);
        let mut serial = 1;
        voice.process_control_logic(&ctx(&channel), &mut serial);

        voice.steal(pending(0, 64, looped_region()));
        voice.process_control_logic(&ctx(&channel), &mut serial);
        assert!(voice.is_fading());
        assert_eq!(60, voice.note());

        voice.process_control_logic(&ctx(&channel), &mut serial);
        assert!(!voice.is_fading());
        assert!(voice.is_active());
        assert_eq!(64, voice.note());
        assert_eq!(2, voice.serial());
    }

    #[test]
    fn test_allocate_prefers_free_then_released() {
        let mut voices: Vec<Voice> = (0..3).map(|_| Voice::new()).collect();
        assert_eq!(
            Some(Allocation::Free(0)),
            allocate(&voices, VoiceAllocation::Dynamic, 0, 16)
        );

        for (i, voice) in voices.iter_mut().enumerate() {
            voice.begin(pending(0, 60 + i as u8, looped_region()), i as u64 + 1, RATE);
        }
        assert_eq!(
            Some(Allocation::Steal(0)),
            allocate(&voices, VoiceAllocation::Dynamic, 0, 16)
        );

        voices[2].note_off(false);
        assert_eq!(
            Some(Allocation::Steal(2)),
            allocate(&voices, VoiceAllocation::Dynamic, 0, 16)
        );
    }

    #[test]
    fn test_static_allocation_respects_priority() {
        let mut voices: Vec<Voice> = (0..2).map(|_| Voice::new()).collect();
        // Percussion (index 9) and channel 1 (index 0) are busy.
        voices[0].begin(pending(9, 36, looped_region()), 1, RATE);
        voices[1].begin(pending(0, 60, looped_region()), 2, RATE);

        // Channel 2 may only steal from lower priorities, and none of those are busy.
        assert_eq!(None, allocate(&voices, VoiceAllocation::Static, 1, 16));
        // Channel 1 may steal from itself.
        assert_eq!(
            Some(Allocation::Steal(1)),
            allocate(&voices, VoiceAllocation::Static, 0, 16)
        );
        // Percussion has the highest priority and steals channel 1 first.
        assert_eq!(
            Some(Allocation::Steal(1)),
            allocate(&voices, VoiceAllocation::Static, 9, 16)
        );
    }

    #[test]
    fn test_priority_order() {
        let order: Vec<usize> = channel_priority_order(16).collect();
        assert_eq!(vec![15, 14, 13, 12, 11, 10, 8, 7, 6, 5, 4, 3, 2, 1, 0, 9], order);
        let short: Vec<usize> = channel_priority_order(4).collect();
        assert_eq!(vec![3, 2, 1, 0], short);
    }

    #[test]
    fn test_mix_into_ramps_and_spills() {
        let mut buses = BusSet::new(4);
        mix_into(&mut buses, Bus::Left, &[1.0; 4], 0.0, 1.0, 1);
        assert_eq!(&[0.0, 0.0, 0.25, 0.5], buses[Bus::Left].samples());
        assert_eq!(&[0.75, 0.0, 0.0, 0.0], buses[Bus::DelayLeft].samples());

        // Quiet gains are skipped entirely.
        mix_into(&mut buses, Bus::Right, &[1.0; 4], 0.00001, 0.00002, 0);
        assert!(buses[Bus::Right].is_silent());
    }

    #[test]
    fn test_renderer_follows_voice() {
        let mut channel = Channel::new(0);
        channel.control_change(CC_VOLUME, 127);
        let mut voice = started(60, 1);
        let mut serial = 1;
        voice.process_control_logic(&ctx(&channel), &mut serial);

        let mut renderer = VoiceRenderer::new(Interpolation::Linear);
        let mut buses = BusSet::new(300);
        renderer.sync(&voice);
        renderer.render(&mut buses);

        // A centered mono source renders through the mono bus.
        assert!(!buses[Bus::Mono].is_silent());
        assert!(buses[Bus::Left].is_silent());
        let gain = voice.params().gains[DEST_LEFT];
        assert!((buses[Bus::Mono].samples()[150] - 0.5 * gain).abs() < 1e-5);

        // Deactivation ramps the voice out over one block, then goes idle.
        voice.sound_off();
        voice.process_control_logic(&ctx(&channel), &mut serial);
        buses.begin_cycle();
        renderer.sync(&voice);
        renderer.render(&mut buses);
        let mono = buses[Bus::Mono].samples();
        assert!(mono[0] > mono[299]);
        assert!(renderer.is_idle());
    }

    #[test]
    fn test_renderer_reports_exhaustion() {
        let channel = Channel::new(0);
        let region = Arc::new(Region::new(
            Arc::new(SampleData::mono(vec![0.5; 100], 44100.0)),
            60,
        ));
        let mut voice = Voice::new();
        voice.begin(pending(0, 60, region), 1, RATE);
        let mut serial = 1;
        voice.process_control_logic(&ctx(&channel), &mut serial);

        let mut renderer = VoiceRenderer::new(Interpolation::Linear);
        let mut buses = BusSet::new(300);
        renderer.sync(&voice);
        renderer.render(&mut buses);
        assert!(renderer.take_exhausted());
        assert!(!renderer.take_exhausted());

        voice.exhausted();
        assert!(!voice.is_active());
    }
}
