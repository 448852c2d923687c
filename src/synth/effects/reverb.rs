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

//! Freeverb-style reverb: predelay, a series allpass diffuser and eight damped
//! feedback combs per side.

use std::f64::consts::PI;

use tracing::debug;

use super::{assign_pin, write_output, EffectProcessor, REVERB_SLOT};
use crate::synth::buffer::{period_frames, Bus, BusSet};

/// Comb lengths at 44.1kHz.
const COMB_TUNING: [usize; 8] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];
/// Allpass lengths at 44.1kHz.
const ALLPASS_TUNING: [usize; 4] = [556, 441, 341, 225];
/// Extra length of the right combs.
const STEREO_SPREAD: usize = 23;
const ALLPASS_FEEDBACK: f32 = 0.5;
/// Longest predelay in seconds.
const MAX_PREDELAY: f64 = 0.05;
/// Wet output below this with silent input stops processing.
const SILENCE_THRESHOLD: f32 = 1e-10;
/// Keeps the feedback paths out of the denormal range.
const DENORMAL_OFFSET: f32 = 1e-20;

/// Room presets: (room size, damping frequency, predelay, gain).
fn room_preset(room_type: u64) -> Option<(f64, f64, f64, f64)> {
    match room_type {
        0 => Some((1.1, 5000.0, 0.0, 4.0)),
        1 => Some((1.3, 5000.0, 0.0, 3.0)),
        2 => Some((1.5, 5000.0, 0.0, 2.0)),
        3 => Some((1.8, 24000.0, 0.02, 1.5)),
        4 => Some((1.8, 24000.0, 0.03, 1.5)),
        8 => Some((1.3, 2500.0, 0.0, 6.0)),
        _ => None,
    }
}

/// The default room type: large hall.
pub(crate) const DEFAULT_ROOM_TYPE: u64 = 4;

struct Comb {
    buffer: Vec<f32>,
    pos: usize,
    feedback: f32,
    damp1: f32,
    damp2: f32,
    filter_store: f32,
}

impl Comb {
    fn new(size: usize) -> Comb {
        Comb {
            buffer: vec![0.0; size.max(1)],
            pos: 0,
            feedback: 0.0,
            damp1: 0.0,
            damp2: 0.0,
            filter_store: 0.0,
        }
    }

    fn set_feedback(&mut self, feedback: f32) {
        self.feedback = feedback;
        self.damp2 = (1.0 - self.damp1) * feedback;
    }

    fn set_damp(&mut self, damp: f32) {
        self.damp1 = damp;
        self.damp2 = (1.0 - damp) * self.feedback;
    }

    fn process_mix(&mut self, input: &[f32], output: &mut [f32]) {
        let len = self.buffer.len();
        for (i, o) in input.iter().zip(output.iter_mut()) {
            let r = self.buffer[self.pos];
            *o += r;
            self.filter_store = r * self.damp2 + self.filter_store * self.damp1;
            self.buffer[self.pos] = i + self.filter_store;
            self.pos += 1;
            if self.pos == len {
                self.pos = 0;
            }
        }
    }
}

struct AllPass {
    buffer: Vec<f32>,
    pos: usize,
}

impl AllPass {
    fn new(size: usize) -> AllPass {
        AllPass {
            buffer: vec![0.0; size.max(1)],
            pos: 0,
        }
    }

    fn process_replace(&mut self, data: &mut [f32]) {
        let len = self.buffer.len();
        for sample in data.iter_mut() {
            let delayed = self.buffer[self.pos];
            let input = *sample;
            *sample = delayed - input;
            self.buffer[self.pos] = input + delayed * ALLPASS_FEEDBACK;
            self.pos += 1;
            if self.pos == len {
                self.pos = 0;
            }
        }
    }
}

struct Delay {
    buffer: Vec<f32>,
    pos: usize,
    delay: usize,
}

impl Delay {
    fn new(max_delay: usize) -> Delay {
        Delay {
            buffer: vec![0.0; max_delay + 1],
            pos: 0,
            delay: 0,
        }
    }

    fn set_delay(&mut self, delay: usize) {
        self.delay = delay.min(self.buffer.len() - 1);
    }

    fn process_replace(&mut self, data: &mut [f32]) {
        if self.delay == 0 {
            return;
        }
        let len = self.buffer.len();
        for sample in data.iter_mut() {
            let read = (self.pos + len - self.delay) % len;
            let input = *sample;
            *sample = self.buffer[read];
            self.buffer[self.pos] = input;
            self.pos += 1;
            if self.pos == len {
                self.pos = 0;
            }
        }
    }
}

pub struct Reverb {
    inputs: [Option<Bus>; 1],
    outputs: [Option<Bus>; 2],
    mix: bool,
    sample_rate: f64,
    combs_left: Vec<Comb>,
    combs_right: Vec<Comb>,
    allpasses: Vec<AllPass>,
    predelay: Delay,
    room_size: f64,
    damp_frequency: f64,
    predelay_seconds: f64,
    gain: f64,
    input_gain: f32,
    dirty: bool,
    silent: bool,
    /// Consecutive frames of silent input.
    silent_frames: usize,
    /// Frames an impulse takes to reach the output.
    latency: usize,
    dc: f32,
    work: Vec<f32>,
    wet_left: Vec<f32>,
    wet_right: Vec<f32>,
}

impl Default for Reverb {
    fn default() -> Self {
        Reverb::new()
    }
}

impl Reverb {
    pub fn new() -> Reverb {
        let mut reverb = Reverb {
            inputs: [None],
            outputs: [None, None],
            mix: true,
            sample_rate: 44100.0,
            combs_left: Vec::new(),
            combs_right: Vec::new(),
            allpasses: Vec::new(),
            predelay: Delay::new(0),
            room_size: 1.0,
            damp_frequency: 0.0,
            predelay_seconds: 0.0,
            gain: 1.0,
            input_gain: 0.0,
            dirty: true,
            silent: true,
            silent_frames: 0,
            latency: 0,
            dc: DENORMAL_OFFSET,
            work: Vec::new(),
            wet_left: Vec::new(),
            wet_right: Vec::new(),
        };
        reverb.set_room_type(DEFAULT_ROOM_TYPE);
        reverb
    }

    fn set_room_type(&mut self, room_type: u64) {
        match room_preset(room_type) {
            Some((room_size, damp_frequency, predelay, gain)) => {
                self.room_size = room_size;
                self.damp_frequency = damp_frequency;
                self.predelay_seconds = predelay;
                self.gain = gain;
                self.dirty = true;
            }
            None => debug!(room_type, "Ignoring unknown reverb type"),
        }
    }

    /// Comb feedback for a room size.
    fn feedback(room_size: f64) -> f32 {
        (1.0 - 0.17 / room_size) as f32
    }

    /// One-pole damping coefficient for a cutoff frequency.
    fn damping(&self) -> f32 {
        let cx = 2.0 - (self.damp_frequency / self.sample_rate * 2.0 * PI).cos();
        (cx - (cx * cx - 1.0).sqrt()).clamp(0.0, 1.0) as f32
    }

    fn ensure_capacity(&mut self, frames: usize) {
        if self.work.len() != frames {
            self.work.resize(frames, 0.0);
            self.wet_left.resize(frames, 0.0);
            self.wet_right.resize(frames, 0.0);
        }
    }
}

impl EffectProcessor for Reverb {
    fn init(&mut self, sample_rate: f32, control_rate: f32) {
        self.sample_rate = sample_rate as f64;
        let scale = self.sample_rate / 44100.0;
        let scaled = |length: usize| (length as f64 * scale) as usize;

        self.combs_left = COMB_TUNING.iter().map(|l| Comb::new(scaled(*l))).collect();
        self.combs_right = COMB_TUNING
            .iter()
            .map(|l| Comb::new(scaled(*l + STEREO_SPREAD)))
            .collect();
        self.allpasses = ALLPASS_TUNING
            .iter()
            .map(|l| AllPass::new(scaled(*l)))
            .collect();
        self.predelay = Delay::new((MAX_PREDELAY * self.sample_rate) as usize);
        self.latency = self.predelay.buffer.len()
            + self.combs_right.iter().map(|c| c.buffer.len()).max().unwrap_or(0)
            + self.allpasses.iter().map(|a| a.buffer.len()).sum::<usize>();
        self.ensure_capacity(period_frames(sample_rate, control_rate));
        self.dirty = true;
        self.process_control_logic();
    }

    fn set_input(&mut self, pin: usize, bus: Bus) {
        assign_pin(&mut self.inputs, pin, bus);
    }

    fn set_output(&mut self, pin: usize, bus: Bus) {
        assign_pin(&mut self.outputs, pin, bus);
    }

    fn set_mix_mode(&mut self, mix: bool) {
        self.mix = mix;
    }

    fn global_parameter_control_change(&mut self, slot_path: &[u32], param: u64, value: u64) {
        if slot_path != [REVERB_SLOT] {
            return;
        }
        match param {
            0 => self.set_room_type(value),
            1 => {
                self.room_size = ((value.min(127) as f64 - 40.0) * 0.025).exp();
                self.dirty = true;
            }
            _ => debug!(param, "Ignoring unknown reverb parameter"),
        }
    }

    fn process_control_logic(&mut self) {
        if !self.dirty {
            return;
        }
        self.dirty = false;

        let feedback = Reverb::feedback(self.room_size);
        let damp = self.damping();
        for comb in self.combs_left.iter_mut().chain(self.combs_right.iter_mut()) {
            comb.set_feedback(feedback);
            comb.set_damp(damp);
        }
        self.predelay
            .set_delay((self.predelay_seconds * self.sample_rate) as usize);
        self.input_gain = (self.gain * 0.018 / 2.0) as f32;
    }

    fn process_audio(&mut self, buses: &mut BusSet) {
        let (Some(input), Some(left), Some(right)) =
            (self.inputs[0], self.outputs[0], self.outputs[1])
        else {
            return;
        };

        let input_silent = buses[input].is_silent();
        if input_silent && self.silent {
            return;
        }
        self.ensure_capacity(buses.frames());

        self.dc = -self.dc;
        for (w, s) in self.work.iter_mut().zip(buses[input].samples()) {
            *w = s * self.input_gain + self.dc;
        }

        self.predelay.process_replace(&mut self.work);
        for allpass in self.allpasses.iter_mut() {
            allpass.process_replace(&mut self.work);
        }

        self.wet_left.fill(0.0);
        self.wet_right.fill(0.0);
        for comb in self.combs_left.iter_mut() {
            comb.process_mix(&self.work, &mut self.wet_left);
        }
        for comb in self.combs_right.iter_mut() {
            comb.process_mix(&self.work, &mut self.wet_right);
        }

        let peak = self
            .wet_left
            .iter()
            .chain(self.wet_right.iter())
            .fold(0.0f32, |peak, s| peak.max(s.abs()));
        if input_silent {
            self.silent_frames = self.silent_frames.saturating_add(self.work.len());
        } else {
            self.silent_frames = 0;
        }
        // The tail is still inside the delay lines until the latency has passed.
        self.silent = self.silent_frames > self.latency && peak < SILENCE_THRESHOLD;

        let (out_left, out_right) = buses.pair_mut(left, right);
        write_output(out_left.samples_mut(), &self.wet_left, self.mix);
        write_output(out_right.samples_mut(), &self.wet_right, self.mix);
    }
}
