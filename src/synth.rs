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

//! The synthesis engine.
//!
//! A [Synthesizer] owns the shared control state. Events and control changes go in
//! through it (or through a cloned [Submitter]) from any thread. Audio comes out of
//! the [MainMixer], either pulled directly by the caller or pushed to a sink by an
//! [AudioPusher] thread.

use std::{io, sync::Arc};

use crossbeam_channel::{unbounded, Receiver};
use parking_lot::Mutex;
use tracing::{debug, info, span, Level};

pub mod buffer;
pub mod channel;
pub mod channel_mixer;
pub mod effects;
pub mod envelope;
pub mod mixer;
pub mod resampler;
mod router;
pub mod soundbank;
pub mod tuning;
pub mod voice;

pub use channel_mixer::{ChannelMixer, MixerId};
pub use mixer::MainMixer;
pub use resampler::Interpolation;
pub use soundbank::{Instrument, LoopMode, Patch, Region, SampleData, SoundBank, WaveformBank};

use crate::{
    audio::{self, AudioFormat, AudioPusher, PusherExit, Sink, SinkError},
    config::{self, ConfigError},
    midi::MidiEvent,
};
use effects::ParameterChange;
use mixer::{normalize_14bit, to_14bit, ControlState};

/// Errors raised by the engine's control surface.
#[derive(Debug, thiserror::Error)]
pub enum SynthError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("Synthesizer is already closed")]
    AlreadyClosed,

    #[error("Unable to start thread: {0}")]
    Spawn(#[from] io::Error),
}

/// Largest 14-bit MIDI value.
const MAX_14BIT: u16 = 0x3FFF;

fn from_14bit(value: u16) -> f64 {
    let value = value.min(MAX_14BIT);
    normalize_14bit((value & 0x7F) as u8, (value >> 7) as u8)
}

/// A cheap, cloneable handle for submitting events from other threads, such as a
/// MIDI input callback.
#[derive(Clone)]
pub struct Submitter {
    state: Arc<Mutex<ControlState>>,
}

impl Submitter {
    /// Queues an event at `timestamp` microseconds of engine time. Without a
    /// timestamp the event applies at the next cycle.
    pub fn submit(&self, timestamp: Option<u64>, event: MidiEvent) -> Result<(), SynthError> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(SynthError::AlreadyClosed);
        }
        state.submit(timestamp, event);
        Ok(())
    }

    /// Queues a raw MIDI message. Messages that don't decode, or that the engine
    /// has no use for, are dropped.
    pub fn submit_raw(&self, timestamp: Option<u64>, raw: &[u8]) -> Result<(), SynthError> {
        match MidiEvent::parse(raw) {
            Ok(Some(event)) => self.submit(timestamp, event),
            Ok(None) => Ok(()),
            Err(e) => {
                debug!(err = %e, len = raw.len(), "Dropping undecodable MIDI message.");
                Ok(())
            }
        }
    }

    /// The current engine position in microseconds.
    pub fn position_us(&self) -> u64 {
        self.state.lock().position_us()
    }
}

/// The engine's control surface.
pub struct Synthesizer {
    submitter: Submitter,
    gate: Arc<mixer::SilenceGate>,
    format: AudioFormat,
    pusher: Option<AudioPusher>,
    exit_rx: Receiver<PusherExit>,
    closed: bool,
}

impl Synthesizer {
    /// Opens the engine for pulling. The caller drives the returned mixer through
    /// [MainMixer::produce] or [io::Read].
    pub fn open_stream(
        engine: &config::Engine,
        format: AudioFormat,
        soundbank: Arc<dyn SoundBank>,
    ) -> Result<(Synthesizer, MainMixer), SynthError> {
        let (mixer, state) = MainMixer::new(engine, format, soundbank)?;
        // Pull mode never sends on this channel.
        let (_, exit_rx) = unbounded();
        let synth = Synthesizer {
            submitter: Submitter { state },
            gate: mixer.gate().clone(),
            format,
            pusher: None,
            exit_rx,
            closed: false,
        };
        info!(format = %format, "Synthesizer opened for pulling.");
        Ok((synth, mixer))
    }

    /// Opens the engine and starts pushing its output to `sink`.
    pub fn open(
        engine: &config::Engine,
        format: AudioFormat,
        soundbank: Arc<dyn SoundBank>,
        sink: Box<dyn Sink>,
    ) -> Result<Synthesizer, SynthError> {
        let span = span!(Level::INFO, "open synthesizer");
        let _enter = span.enter();

        let (mixer, state) = MainMixer::new(engine, format, soundbank)?;
        let gate = mixer.gate().clone();
        let (exit_tx, exit_rx) = unbounded();
        let sink_name = sink.to_string();
        let pusher = AudioPusher::start(mixer, sink, exit_tx)?;

        info!(format = %format, sink = sink_name, "Synthesizer opened.");
        Ok(Synthesizer {
            submitter: Submitter { state },
            gate,
            format,
            pusher: Some(pusher),
            exit_rx,
            closed: false,
        })
    }

    /// Opens the engine on the sink named by the configuration.
    pub fn open_configured(
        config: &config::Synth,
        soundbank: Arc<dyn SoundBank>,
    ) -> Result<Synthesizer, SynthError> {
        let format = config.audio().format()?;
        let sink = audio::get_sink(config.audio())?;
        Synthesizer::open(config.engine(), format, soundbank, sink)
    }

    fn state(&self) -> &Arc<Mutex<ControlState>> {
        &self.submitter.state
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// See [Submitter::submit].
    pub fn submit(&self, timestamp: Option<u64>, event: MidiEvent) -> Result<(), SynthError> {
        self.submitter.submit(timestamp, event)
    }

    /// See [Submitter::submit_raw].
    pub fn submit_raw(&self, timestamp: Option<u64>, raw: &[u8]) -> Result<(), SynthError> {
        self.submitter.submit_raw(timestamp, raw)
    }

    /// Returns a handle for submitting events from another thread.
    pub fn submitter(&self) -> Submitter {
        self.submitter.clone()
    }

    /// Master volume as a 14-bit value.
    pub fn volume(&self) -> u16 {
        to_14bit(self.state().lock().master.volume)
    }

    pub fn set_volume(&self, value: u16) {
        let mut state = self.state().lock();
        state.master.volume = from_14bit(value);
        state.activity();
    }

    /// Master balance as a 14-bit value, 0x2000 being centered.
    pub fn balance(&self) -> u16 {
        to_14bit(self.state().lock().master.balance)
    }

    pub fn set_balance(&self, value: u16) {
        let mut state = self.state().lock();
        state.master.balance = from_14bit(value);
        state.activity();
    }

    /// The (left, right) attenuation the current balance applies.
    pub fn balance_attenuation(&self) -> (f64, f64) {
        self.state().lock().master.attenuation()
    }

    /// Master fine tuning as a 14-bit value, 0x2000 being centered.
    pub fn fine_tuning(&self) -> u16 {
        to_14bit(self.state().lock().master.fine_tuning)
    }

    pub fn set_fine_tuning(&self, value: u16) {
        let mut state = self.state().lock();
        state.master.fine_tuning = from_14bit(value);
        state.activity();
    }

    /// Master coarse tuning as a 14-bit value, 0x2000 being centered.
    pub fn coarse_tuning(&self) -> u16 {
        to_14bit(self.state().lock().master.coarse_tuning)
    }

    pub fn set_coarse_tuning(&self, value: u16) {
        let mut state = self.state().lock();
        state.master.coarse_tuning = from_14bit(value);
        state.activity();
    }

    /// Routes the voices that start on `channel` from now on through `mixer`. The
    /// engine only holds a weak reference: dropping the mixer unregisters it.
    pub fn register_mixer(
        &self,
        channel: usize,
        mixer: &Arc<Mutex<dyn ChannelMixer>>,
    ) -> Result<MixerId, SynthError> {
        let mut state = self.state().lock();
        if !state.open {
            return Err(SynthError::AlreadyClosed);
        }
        Ok(state.register_mixer(channel, mixer))
    }

    /// Stops routing new voices to the mixer. It is removed once its voices end.
    /// Returns false for an unknown mixer.
    pub fn stop_mixer(&self, id: MixerId) -> bool {
        self.state().lock().stop_mixer(id)
    }

    /// Applies a Global Parameter Control change to the effects. `slot_path` holds
    /// the slot numbers as assembled from their MSB/LSB pairs.
    pub fn global_parameter_control_change(&self, slot_path: &[u32], param: u64, value: u64) {
        let mut state = self.state().lock();
        state
            .pending_gpc
            .push(ParameterChange::new(slot_path, param, value));
        state.activity();
    }

    /// The number of sounding voices.
    pub fn active_voices(&self) -> usize {
        self.state().lock().active_voices()
    }

    /// Returns true while the output is detached for silence.
    pub fn is_silent(&self) -> bool {
        self.gate.is_silent()
    }

    /// How many times the output has detached for silence.
    pub fn silence_signals(&self) -> u64 {
        self.gate.signals()
    }

    /// Returns false once closed, or once the sink has failed.
    pub fn is_open(&self) -> bool {
        !self.closed && self.state().lock().open
    }

    /// The current engine position in microseconds.
    pub fn position_us(&self) -> u64 {
        self.submitter.position_us()
    }

    /// Receives a [PusherExit] when the pusher thread ends.
    pub fn exit_notifications(&self) -> &Receiver<PusherExit> {
        &self.exit_rx
    }

    /// Closes the engine: stops the pusher, closes the sink, then silences every
    /// channel and drops the channel mixers.
    pub fn close(&mut self) -> Result<(), SynthError> {
        if self.closed {
            return Err(SynthError::AlreadyClosed);
        }
        self.closed = true;

        // The pusher takes the control lock every cycle, so stop it first.
        let mut result = Ok(());
        if let Some(mut pusher) = self.pusher.take() {
            match pusher.stop() {
                Ok(mut sink) => {
                    if let Err(e) = sink.close() {
                        result = Err(e.into());
                    }
                }
                Err(e) => debug!(err = %e, "Audio pusher had already failed."),
            }
        }

        {
            let mut state = self.state().lock();
            state.open = false;
            for channel in 0..state.channels.len() {
                state.all_sound_off(channel);
            }
            state.close_mixers();
            state.events.clear();
        }

        info!("Synthesizer closed.");
        result
    }
}

impl Drop for Synthesizer {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.close();
        }
    }
}
