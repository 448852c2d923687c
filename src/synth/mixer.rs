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

//! The main mixer and the control state it shares with event producers.
//!
//! Every cycle renders one control period. The control phase runs under the
//! engine's single control mutex: due events are routed, voices and effects run
//! their control logic and each renderer copies its voice's parameters. The lock is
//! then released and the audio phase renders voices, channel mixers and effects
//! into the bus set, applies the master gain ramp and the limiter, and encodes the
//! result into PCM bytes.

use std::{
    collections::BTreeMap,
    io,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, info};

use super::{
    buffer::{period_frames, Bus, BusSet},
    channel::Channel,
    channel_mixer::{ChannelMixer, MixerEntry, MixerId},
    effects::{Chorus, EffectProcessor, Limiter, ParameterChange, Reverb},
    soundbank::SoundBank,
    tuning::TuningSet,
    voice::{Voice, VoiceAllocation, VoiceContext, VoiceRenderer},
};
use crate::{audio::AudioFormat, config, midi::MidiEvent};

/// Events up to this far past the cycle start are applied in the cycle.
pub const EVENT_TOLERANCE_US: u64 = 100;

/// Silence after this long without activity, once active sensing is on.
pub const ACTIVE_SENSING_TIMEOUT_US: u64 = 1_000_000;

/// The number of silent cycles after which the output detaches.
const SILENT_CYCLES_BEFORE_DETACH: usize = 5;

/// Initial capacity of the global parameter change queue.
const GPC_QUEUE_CAPACITY: usize = 64;

/// Tracks whether the output is detached because it has been silent.
///
/// The mixer detaches after a run of silent cycles and any activity reattaches.
/// An audio pusher waits on the gate instead of writing silence.
pub struct SilenceGate {
    silent: AtomicBool,
    signals: AtomicU64,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl Default for SilenceGate {
    fn default() -> Self {
        SilenceGate::new()
    }
}

impl SilenceGate {
    pub fn new() -> SilenceGate {
        let (wake_tx, wake_rx) = bounded(1);
        SilenceGate {
            silent: AtomicBool::new(false),
            signals: AtomicU64::new(0),
            wake_tx,
            wake_rx,
        }
    }

    /// Marks the output silent. Returns true on the transition only.
    pub fn detach(&self) -> bool {
        if self.silent.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.signals.fetch_add(1, Ordering::SeqCst);
        info!("Output silent, detaching.");
        true
    }

    /// Clears the silent mark and wakes a waiting pusher.
    pub fn reattach(&self) {
        if self.silent.swap(false, Ordering::SeqCst) {
            // A full channel already holds a wakeup.
            let _ = self.wake_tx.try_send(());
            info!("Activity, reattaching output.");
        }
    }

    pub fn is_silent(&self) -> bool {
        self.silent.load(Ordering::SeqCst)
    }

    /// The number of times the output has gone silent.
    pub fn signals(&self) -> u64 {
        self.signals.load(Ordering::SeqCst)
    }

    /// Blocks until a reattach or the timeout. Returns true if woken.
    pub fn wait(&self, timeout: Duration) -> bool {
        self.wake_rx.recv_timeout(timeout).is_ok()
    }

    /// Wakes a waiting pusher without changing the silent mark.
    pub fn wake(&self) {
        let _ = self.wake_tx.try_send(());
    }
}

/// Master volume, balance and tuning, each normalized from 14-bit MIDI data.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MasterControls {
    pub volume: f64,
    pub balance: f64,
    pub fine_tuning: f64,
    pub coarse_tuning: f64,
}

impl Default for MasterControls {
    fn default() -> Self {
        MasterControls {
            volume: normalize_14bit(0x7F, 0x7F),
            balance: normalize_14bit(0x00, 0x40),
            fine_tuning: normalize_14bit(0x00, 0x40),
            coarse_tuning: normalize_14bit(0x00, 0x40),
        }
    }
}

impl MasterControls {
    /// Left and right attenuation from the balance. Only one side is attenuated.
    pub fn attenuation(&self) -> (f64, f64) {
        if self.balance > 0.5 {
            ((1.0 - self.balance) * 2.0, 1.0)
        } else {
            (1.0, self.balance * 2.0)
        }
    }

    /// The gains applied to the left and right output.
    pub fn gains(&self) -> [f32; 2] {
        let (left, right) = self.attenuation();
        let volume = self.volume * self.volume;
        [(volume * left) as f32, (volume * right) as f32]
    }

    /// Fine and coarse tuning combined, in cents.
    pub fn tuning_cents(&self) -> f64 {
        (self.fine_tuning * 2.0 - 1.0) * 100.0 + (self.coarse_tuning * 128.0 - 64.0) * 100.0
    }
}

/// Assembles and normalizes a 14-bit value.
pub fn normalize_14bit(lsb: u8, msb: u8) -> f64 {
    ((lsb & 0x7F) as u16 + (msb & 0x7F) as u16 * 128) as f64 / 16384.0
}

/// Converts a normalized value back to 14 bits.
pub fn to_14bit(value: f64) -> u16 {
    (value * 16384.0).round().clamp(0.0, 16383.0) as u16
}

/// All engine state shared between event producers and the render path. Always
/// accessed under the control mutex.
pub(crate) struct ControlState {
    pub sample_rate: f64,
    pub frames: usize,
    pub device_id: u8,
    pub events: BTreeMap<(u64, u64), MidiEvent>,
    next_event: u64,
    pub channels: Vec<Channel>,
    pub voices: Vec<Voice>,
    pub tunings: TuningSet,
    pub master: MasterControls,
    /// 0 off, 1 GM1, 2 GM2.
    pub gm_mode: u8,
    pub voice_allocation: VoiceAllocation,
    pub active_sensing: bool,
    pub last_activity_us: u64,
    /// Frames rendered since the engine opened.
    pub sample_pos: u64,
    pub next_serial: u64,
    pub mixers: Vec<MixerEntry>,
    next_mixer: u64,
    pub mixers_version: u64,
    pub pending_gpc: Vec<ParameterChange>,
    pub gate: Arc<SilenceGate>,
    pub soundbank: Arc<dyn SoundBank>,
    pub open: bool,
}

impl ControlState {
    pub fn new(
        engine: &config::Engine,
        sample_rate: f64,
        soundbank: Arc<dyn SoundBank>,
        gate: Arc<SilenceGate>,
    ) -> ControlState {
        let mut state = ControlState {
            sample_rate,
            frames: period_frames(sample_rate as f32, engine.control_rate()),
            device_id: engine.device_id(),
            events: BTreeMap::new(),
            next_event: 0,
            channels: (0..engine.midi_channels()).map(Channel::new).collect(),
            voices: (0..engine.max_polyphony()).map(|_| Voice::new()).collect(),
            tunings: TuningSet::new(),
            master: MasterControls::default(),
            gm_mode: 0,
            voice_allocation: VoiceAllocation::default(),
            active_sensing: false,
            last_activity_us: 0,
            sample_pos: 0,
            next_serial: 0,
            mixers: Vec::new(),
            next_mixer: 0,
            mixers_version: 0,
            pending_gpc: Vec::with_capacity(GPC_QUEUE_CAPACITY),
            gate,
            soundbank,
            open: true,
        };
        state.reset();
        state
    }

    /// The engine position in microseconds.
    pub fn position_us(&self) -> u64 {
        (self.sample_pos as f64 * 1_000_000.0 / self.sample_rate) as u64
    }

    /// Records activity: resets the active sensing timeout and reattaches the output.
    pub fn activity(&mut self) {
        self.last_activity_us = self.position_us();
        self.gate.reattach();
    }

    /// Queues an event. Without a timestamp the event is due immediately.
    pub fn submit(&mut self, timestamp: Option<u64>, event: MidiEvent) {
        let timestamp = timestamp.unwrap_or_else(|| self.position_us());
        self.events.insert((timestamp, self.next_event), event);
        self.next_event += 1;
        self.activity();
    }

    fn has_due_events(&self, now: u64) -> bool {
        self.events
            .first_key_value()
            .is_some_and(|((timestamp, _), _)| *timestamp <= now + EVENT_TOLERANCE_US)
    }

    /// The frame offset of an event within the cycle starting at `now`.
    fn frame_offset(&self, timestamp: u64, now: u64) -> usize {
        if timestamp <= now {
            return 0;
        }
        let offset = ((timestamp - now) as f64 * self.sample_rate / 1_000_000.0) as usize;
        offset.min(self.frames.saturating_sub(1))
    }

    /// Routes every event due in the cycle starting at `now`, in timestamp order.
    pub fn drain_events(&mut self, now: u64) {
        while let Some(entry) = self.events.first_entry() {
            if entry.key().0 > now + EVENT_TOLERANCE_US {
                break;
            }
            let ((timestamp, _), event) = entry.remove_entry();
            let delay = self.frame_offset(timestamp, now);
            self.route(&event, delay);
        }
    }

    /// Silences everything if active sensing is on and the sender went quiet.
    pub fn check_active_sensing(&mut self, now: u64) {
        if !self.active_sensing
            || now.saturating_sub(self.last_activity_us) <= ACTIVE_SENSING_TIMEOUT_US
        {
            return;
        }
        self.active_sensing = false;
        info!("Active sensing timed out, silencing all channels.");
        for channel in 0..self.channels.len() {
            self.all_sound_off(channel);
        }
    }

    pub fn active_voices(&self) -> usize {
        self.voices.iter().filter(|voice| voice.is_active()).count()
    }

    /// Registers a channel mixer for the voices that start on `channel` from now on.
    pub fn register_mixer(
        &mut self,
        channel: usize,
        mixer: &Arc<Mutex<dyn ChannelMixer>>,
    ) -> MixerId {
        let id = MixerId(self.next_mixer);
        self.next_mixer += 1;
        self.mixers.push(MixerEntry::new(id, channel, mixer));
        self.mixers_version += 1;
        info!(mixer = id.0, channel, "Channel mixer registered.");
        id
    }

    /// Marks a mixer for removal. It is dropped once no voice uses it.
    pub fn stop_mixer(&mut self, id: MixerId) -> bool {
        match self.mixers.iter_mut().find(|entry| entry.id == id) {
            Some(entry) => {
                entry.stopped = true;
                true
            }
            None => false,
        }
    }

    /// Drops mixers that are orphaned, finished, or stopped with no voice left.
    fn prune_mixers(&mut self, finished: impl Fn(MixerId) -> bool) {
        let voices = &self.voices;
        let before = self.mixers.len();
        self.mixers.retain(|entry| {
            let in_use = voices
                .iter()
                .any(|voice| voice.is_active() && voice.mixer() == Some(entry.id));
            let keep = !entry.is_orphaned() && !finished(entry.id) && !(entry.stopped && !in_use);
            if !keep {
                close_mixer(entry);
            }
            keep
        });
        if self.mixers.len() != before {
            self.mixers_version += 1;
        }
    }

    /// Drops every mixer. Used when the engine closes.
    pub fn close_mixers(&mut self) {
        for entry in self.mixers.drain(..) {
            close_mixer(&entry);
        }
        self.mixers_version += 1;
    }
}

fn close_mixer(entry: &MixerEntry) {
    if let Some(mixer) = entry.mixer.upgrade() {
        mixer.lock().close();
    }
    info!(mixer = entry.id.0, channel = entry.channel, "Channel mixer removed.");
}

/// The render-side view of a registered channel mixer.
struct MixerSlot {
    id: MixerId,
    mixer: Weak<Mutex<dyn ChannelMixer>>,
    /// The buses the mixer's voices render into.
    buses: BusSet,
    finished: bool,
}

impl MixerSlot {
    fn new(entry: &MixerEntry, frames: usize) -> MixerSlot {
        MixerSlot {
            id: entry.id,
            mixer: entry.mixer.clone(),
            buses: BusSet::new(frames),
            finished: false,
        }
    }

    /// Runs the mixer over its voices' output and sums the result into the dry buses.
    fn process(&mut self, main: &mut BusSet) {
        if self.finished {
            return;
        }
        let Some(mixer) = self.mixer.upgrade() else {
            self.finished = true;
            return;
        };
        self.buses.fold_mono();

        let frames = main.frames();
        {
            let (left, right) = main.pair_mut(Bus::ChannelMixerLeft, Bus::ChannelMixerRight);
            left.clear();
            right.clear();
            left.add(&self.buses[Bus::Left]);
            right.add(&self.buses[Bus::Right]);
            let mut buffers = [left.samples_mut(), right.samples_mut()];
            if !mixer.lock().process(&mut buffers, frames) {
                self.finished = true;
                debug!(mixer = self.id.0, "Channel mixer finished.");
            }
        }

        for (isolated, dry) in [
            (Bus::ChannelMixerLeft, Bus::LeftDry),
            (Bus::ChannelMixerRight, Bus::RightDry),
        ] {
            let buffer = main.take(isolated);
            main[dry].add(&buffer);
            main.put(isolated, buffer);
        }
    }
}

/// Brings the render-side mixer slots in line with the registry.
fn sync_mixers(
    slots: &mut Vec<MixerSlot>,
    version: &mut u64,
    frames: usize,
    state: &mut ControlState,
) {
    state.prune_mixers(|id| slots.iter().any(|slot| slot.id == id && slot.finished));
    if *version == state.mixers_version {
        return;
    }

    let mut previous = std::mem::take(slots);
    for entry in &state.mixers {
        let slot = match previous.iter().position(|slot| slot.id == entry.id) {
            Some(index) => previous.swap_remove(index),
            None => MixerSlot::new(entry, frames),
        };
        slots.push(slot);
    }
    *version = state.mixers_version;
}

/// Produces the engine's PCM output one control period at a time.
pub struct MainMixer {
    state: Arc<Mutex<ControlState>>,
    gate: Arc<SilenceGate>,
    format: AudioFormat,
    frames: usize,
    buses: BusSet,
    renderers: Vec<VoiceRenderer>,
    reverb: Reverb,
    chorus: Chorus,
    limiter: Limiter,
    reverb_enabled: bool,
    chorus_enabled: bool,
    agc_enabled: bool,
    mixer_slots: Vec<MixerSlot>,
    mixers_version: u64,
    last_gains: [f32; 2],
    silent_cycles: usize,
    /// One encoded cycle.
    bytes: Vec<u8>,
    /// One encoded cycle of silence.
    silence: Vec<u8>,
    read_pos: usize,
}

impl MainMixer {
    /// Creates the mixer and the control state it renders from. All buffers are
    /// allocated here.
    pub(crate) fn new(
        engine: &config::Engine,
        format: AudioFormat,
        soundbank: Arc<dyn SoundBank>,
    ) -> Result<(MainMixer, Arc<Mutex<ControlState>>), config::ConfigError> {
        engine.validate(format.sample_rate)?;
        let interpolation = engine.interpolation()?;
        let sample_rate = format.sample_rate as f32;
        let control_rate = engine.control_rate();

        let gate = Arc::new(SilenceGate::new());
        let state = ControlState::new(engine, sample_rate as f64, soundbank, gate.clone());
        let frames = state.frames;
        let voices = state.voices.len();
        let last_gains = state.master.gains();
        let renderers = (0..state.voices.len())
            .map(|_| VoiceRenderer::new(interpolation))
            .collect();
        let state = Arc::new(Mutex::new(state));

        let mut reverb = Reverb::new();
        reverb.init(sample_rate, control_rate);
        reverb.set_input(0, Bus::Effect1);
        reverb.set_output(0, Bus::Left);
        reverb.set_output(1, Bus::Right);
        reverb.set_mix_mode(true);

        let mut chorus = Chorus::new();
        chorus.init(sample_rate, control_rate);
        chorus.set_input(0, Bus::Effect2);
        chorus.set_output(0, Bus::Left);
        chorus.set_output(1, Bus::Right);
        chorus.set_output(2, Bus::Effect1);
        chorus.set_mix_mode(true);

        let mut limiter = Limiter::new();
        limiter.init(sample_rate, control_rate);
        limiter.set_input(0, Bus::Left);
        limiter.set_input(1, Bus::Right);
        limiter.set_output(0, Bus::Left);
        limiter.set_output(1, Bus::Right);

        let mut silence = vec![0u8; frames * format.frame_size()];
        let zeros = vec![0.0f32; frames];
        format.encode(&zeros, &zeros, &mut silence);

        info!(
            format = %format,
            frames,
            voices,
            "Mixer ready."
        );

        Ok((
            MainMixer {
                state: state.clone(),
                gate,
                format,
                frames,
                buses: BusSet::new(frames),
                renderers,
                reverb,
                chorus,
                limiter,
                reverb_enabled: engine.reverb(),
                chorus_enabled: engine.chorus(),
                agc_enabled: engine.agc(),
                mixer_slots: Vec::new(),
                mixers_version: 0,
                last_gains,
                silent_cycles: 0,
                bytes: silence.clone(),
                silence,
                // Nothing has been rendered yet.
                read_pos: frames * format.frame_size(),
            },
            state,
        ))
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// The number of frames rendered per cycle.
    pub fn frames_per_cycle(&self) -> usize {
        self.frames
    }

    pub fn gate(&self) -> &Arc<SilenceGate> {
        &self.gate
    }

    /// Encoded bytes rendered but not yet read.
    pub fn available(&self) -> usize {
        self.bytes.len() - self.read_pos
    }

    /// Fills `out` with PCM bytes, running as many cycles as needed. Always fills
    /// the whole buffer.
    pub fn produce(&mut self, out: &mut [u8]) -> usize {
        let mut written = 0;
        while written < out.len() {
            if self.read_pos >= self.bytes.len() {
                self.process_cycle();
            }
            let count = (out.len() - written).min(self.bytes.len() - self.read_pos);
            out[written..written + count]
                .copy_from_slice(&self.bytes[self.read_pos..self.read_pos + count]);
            written += count;
            self.read_pos += count;
        }
        written
    }

    /// Advances the engine position without rendering, for time spent detached.
    pub fn skip(&mut self, frames: usize) {
        self.state.lock().sample_pos += frames as u64;
    }

    /// Marks the engine closed after its output has failed. Submissions are
    /// rejected from then on.
    pub(crate) fn mark_closed(&self) {
        let mut state = self.state.lock();
        state.open = false;
        state.events.clear();
    }

    /// Runs one control period and refills the output buffer.
    pub fn process_cycle(&mut self) {
        match self.control_phase() {
            Some((gains, busy)) => self.render_phase(gains, busy),
            None => self.bytes.copy_from_slice(&self.silence),
        }
        self.read_pos = 0;
    }

    /// Everything that happens under the control lock. Returns the master gains and
    /// whether anything is still pending, or None if the output is detached and
    /// there is nothing to do.
    fn control_phase(&mut self) -> Option<([f32; 2], bool)> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let now = state.position_us();

        if self.gate.is_silent() && !state.has_due_events(now) {
            state.sample_pos += self.frames as u64;
            return None;
        }

        self.buses.begin_cycle();
        for slot in self.mixer_slots.iter_mut() {
            slot.buses.begin_cycle();
        }

        state.drain_events(now);
        state.check_active_sensing(now);

        let master_cents = state.master.tuning_cents();
        let period = self.frames as f64 / state.sample_rate;
        {
            let ControlState {
                voices,
                channels,
                next_serial,
                sample_rate,
                ..
            } = &mut *state;
            for (voice, renderer) in voices.iter_mut().zip(self.renderers.iter_mut()) {
                if renderer.take_exhausted() && renderer.serial() == voice.serial() {
                    voice.exhausted();
                }
                if let Some(channel) = channels.get(voice.channel()) {
                    let ctx = VoiceContext {
                        channel,
                        master_cents,
                        period,
                        sample_rate: *sample_rate,
                    };
                    voice.process_control_logic(&ctx, next_serial);
                }
                renderer.sync(voice);
            }
        }
        state.sample_pos += self.frames as u64;

        for change in state.pending_gpc.drain(..) {
            for effect in [
                &mut self.reverb as &mut dyn EffectProcessor,
                &mut self.chorus,
                &mut self.limiter,
            ] {
                effect.global_parameter_control_change(change.slot_path(), change.param, change.value);
            }
        }
        self.reverb.process_control_logic();
        self.chorus.process_control_logic();
        self.limiter.process_control_logic();

        sync_mixers(
            &mut self.mixer_slots,
            &mut self.mixers_version,
            self.frames,
            state,
        );

        let busy = !state.events.is_empty() || state.voices.iter().any(|v| v.is_active());
        Some((state.master.gains(), busy))
    }

    /// Renders the block. Runs without the control lock.
    fn render_phase(&mut self, gains: [f32; 2], busy: bool) {
        for renderer in self.renderers.iter_mut() {
            if renderer.is_idle() {
                continue;
            }
            let slot = renderer.mixer().and_then(|id| {
                self.mixer_slots
                    .iter_mut()
                    .find(|slot| slot.id == id && !slot.finished)
            });
            match slot {
                Some(slot) => renderer.render(&mut slot.buses),
                None => renderer.render(&mut self.buses),
            }
        }
        for slot in self.mixer_slots.iter_mut() {
            slot.process(&mut self.buses);
        }

        self.buses.fold_mono();
        if self.chorus_enabled {
            self.chorus.process_audio(&mut self.buses);
        }
        if self.reverb_enabled {
            self.reverb.process_audio(&mut self.buses);
        }
        for (dry, bus) in [(Bus::LeftDry, Bus::Left), (Bus::RightDry, Bus::Right)] {
            let buffer = self.buses.take(dry);
            self.buses[bus].add(&buffer);
            self.buses.put(dry, buffer);
        }

        self.apply_master_gain(gains);
        if !self.format.is_stereo() {
            self.buses.downmix();
        }
        if self.agc_enabled {
            self.limiter.process_audio(&mut self.buses);
        }

        if self.buses[Bus::Left].is_silent() && self.buses[Bus::Right].is_silent() && !busy {
            self.silent_cycles += 1;
            if self.silent_cycles > SILENT_CYCLES_BEFORE_DETACH {
                self.gate.detach();
                self.silent_cycles = 0;
            }
        } else {
            self.silent_cycles = 0;
        }

        self.format.encode(
            self.buses[Bus::Left].samples(),
            self.buses[Bus::Right].samples(),
            &mut self.bytes,
        );
    }

    /// Ramps each side linearly from last cycle's gain to this cycle's.
    fn apply_master_gain(&mut self, gains: [f32; 2]) {
        let frames = self.frames as f32;
        for (side, bus) in [Bus::Left, Bus::Right].into_iter().enumerate() {
            let from = self.last_gains[side];
            let to = gains[side];
            self.last_gains[side] = to;
            if self.buses[bus].is_silent() {
                continue;
            }

            let samples = self.buses[bus].samples_mut();
            if from == to {
                if to != 1.0 {
                    samples.iter_mut().for_each(|sample| *sample *= to);
                }
            } else {
                let delta = (to - from) / frames;
                let mut amp = from;
                for sample in samples.iter_mut() {
                    amp += delta;
                    *sample *= amp;
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn buses(&self) -> &BusSet {
        &self.buses
    }
}

impl io::Read for MainMixer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.produce(buf))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::synth::soundbank::WaveformBank;

    /// A control state over the waveform bank with a small voice pool.
    pub(crate) fn test_state(voices: usize) -> ControlState {
        let engine = config::Engine::default().with_polyphony(voices);
        ControlState::new(
            &engine,
            44100.0,
            Arc::new(WaveformBank::new()),
            Arc::new(SilenceGate::new()),
        )
    }

    #[test]
    fn test_master_defaults() {
        let master = MasterControls::default();
        assert_eq!(16383, to_14bit(master.volume));
        assert_eq!(0x40 * 128, to_14bit(master.balance));
        assert_eq!((1.0, 1.0), master.attenuation());
        assert_eq!(0.0, master.tuning_cents());
    }

    #[test]
    fn test_balance_is_piecewise() {
        let mut master = MasterControls::default();
        master.balance = 0.0;
        assert_eq!((1.0, 0.0), master.attenuation());
        master.balance = 0.75;
        assert_eq!((0.5, 1.0), master.attenuation());
        master.balance = 0.25;
        assert_eq!((1.0, 0.5), master.attenuation());
    }

    #[test]
    fn test_master_tuning() {
        let mut master = MasterControls::default();
        master.coarse_tuning = normalize_14bit(0, 0x41);
        assert!((master.tuning_cents() - 100.0).abs() < 1e-9);
        master.coarse_tuning = normalize_14bit(0, 0x40);
        master.fine_tuning = normalize_14bit(0x7F, 0x7F);
        assert!((master.tuning_cents() - 100.0).abs() < 0.1);
    }

    #[test]
    fn test_silence_gate_signals_once() {
        let gate = SilenceGate::new();
        assert!(gate.detach());
        assert!(!gate.detach());
        assert_eq!(1, gate.signals());
        assert!(gate.is_silent());

        gate.reattach();
        assert!(!gate.is_silent());
        assert!(gate.wait(Duration::from_millis(1)));
        assert!(!gate.wait(Duration::from_millis(1)));
    }

    #[test]
    fn test_events_drain_in_order_with_tolerance() {
        let mut state = test_state(4);
        state.submit(Some(5_000), MidiEvent::note_on(0, 64, 100));
        state.submit(Some(50), MidiEvent::note_on(0, 60, 100));
        state.submit(Some(0), MidiEvent::note_on(0, 62, 100));

        state.drain_events(0);
        assert_eq!(2, state.active_voices());
        assert_eq!(1, state.events.len());
        // The later event lands 50us into the block.
        let delayed = state.voices.iter().find(|v| v.note() == 60).unwrap();
        assert_eq!(2, delayed.delay());

        state.drain_events(4_950);
        assert_eq!(3, state.active_voices());
        assert!(state.events.is_empty());
    }

    #[test]
    fn test_active_sensing_timeout() {
        let mut state = test_state(4);
        state.submit(None, MidiEvent::system(crate::midi::ACTIVE_SENSING));
        state.submit(None, MidiEvent::note_on(0, 60, 100));
        state.drain_events(0);
        assert!(state.active_sensing);

        state.check_active_sensing(ACTIVE_SENSING_TIMEOUT_US);
        assert!(state.active_sensing);

        state.check_active_sensing(ACTIVE_SENSING_TIMEOUT_US + 1);
        assert!(!state.active_sensing);
        let ControlState {
            voices,
            channels,
            next_serial,
            ..
        } = &mut state;
        for voice in voices.iter_mut() {
            let ctx = VoiceContext {
                channel: &channels[voice.channel()],
                master_cents: 0.0,
                period: 0.0068,
                sample_rate: 44100.0,
            };
            voice.process_control_logic(&ctx, next_serial);
        }
        assert_eq!(0, state.active_voices());
    }

    #[test]
    fn test_mixer_registry() {
        use crate::synth::channel_mixer::tests::GainMixer;

        let mut state = test_state(4);
        let mixer: Arc<Mutex<dyn ChannelMixer>> = Arc::new(Mutex::new(GainMixer::new(0.5)));
        let id = state.register_mixer(0, &mixer);
        assert_eq!(1, state.mixers.len());

        assert!(state.stop_mixer(id));
        state.prune_mixers(|_| false);
        assert!(state.mixers.is_empty());
        assert!(!state.stop_mixer(id));
    }
}
