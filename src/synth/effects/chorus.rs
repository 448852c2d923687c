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

//! Stereo chorus built from two LFO-modulated variable delays.

use std::f64::consts::PI;

use tracing::debug;

use super::{assign_pin, EffectProcessor, CHORUS_SLOT};
use crate::synth::buffer::{period_frames, Bus, BusSet};

/// Longest modulated delay in seconds.
const MAX_DELAY: f64 = 0.04;

/// Chorus presets as (feedback, rate, depth, reverb send) GPC values.
fn chorus_preset(chorus_type: u64) -> Option<[u64; 4]> {
    match chorus_type {
        0 => Some([0, 3, 5, 0]),
        1 => Some([5, 9, 19, 0]),
        2 => Some([8, 3, 19, 0]),
        3 => Some([16, 9, 16, 0]),
        4 => Some([64, 2, 24, 0]),
        5 => Some([112, 1, 5, 0]),
        _ => None,
    }
}

/// Chorus 3.
pub(crate) const DEFAULT_CHORUS_TYPE: u64 = 2;

/// A delay line read at a fractional, per-sample interpolated position.
struct VariableDelay {
    buffer: Vec<f32>,
    pos: usize,
    last_delay: f64,
    feedback: f32,
    gain: f32,
    reverb_gain: f32,
}

impl VariableDelay {
    fn new(len: usize) -> VariableDelay {
        VariableDelay {
            buffer: vec![0.0; len.max(4)],
            pos: 0,
            last_delay: 0.0,
            feedback: 0.0,
            gain: 1.0,
            reverb_gain: 0.0,
        }
    }

    /// Moves the delay linearly from its last value to `delay` samples across the
    /// block.
    fn process_mix(&mut self, input: &[f32], output: &mut [f32], reverb: &mut [f32], delay: f64) {
        let len = self.buffer.len();
        let max_delay = (len - 3) as f64;
        let delay = delay.clamp(0.0, max_delay);
        let step = (delay - self.last_delay) / input.len().max(1) as f64;
        let mut current = self.last_delay;

        for (i, sample) in input.iter().enumerate() {
            let r = self.pos as f64 - (current + 2.0) + len as f64;
            let ri = r as usize;
            let s = (r - ri as f64) as f32;
            let a = self.buffer[ri % len];
            let b = self.buffer[(ri + 1) % len];
            let o = a * (1.0 - s) + b * s;

            output[i] += o * self.gain;
            reverb[i] += o * self.reverb_gain;
            self.buffer[self.pos] = sample + o * self.feedback;

            self.pos += 1;
            if self.pos == len {
                self.pos = 0;
            }
            current += step;
        }
        self.last_delay = delay;
    }
}

/// One side of the chorus.
struct LfoDelay {
    delay: VariableDelay,
    phase: f64,
    phase_step: f64,
    depth: f64,
}

impl LfoDelay {
    fn new(len: usize, phase: f64) -> LfoDelay {
        LfoDelay {
            delay: VariableDelay::new(len),
            phase,
            phase_step: 0.0,
            depth: 0.0,
        }
    }

    fn process_mix(&mut self, input: &[f32], output: &mut [f32], reverb: &mut [f32]) {
        self.phase = (self.phase + self.phase_step).rem_euclid(2.0 * PI);
        let delay = self.depth * 0.5 * (self.phase.cos() + 2.0);
        self.delay.process_mix(input, output, reverb, delay);
    }
}

pub struct Chorus {
    inputs: [Option<Bus>; 1],
    outputs: [Option<Bus>; 3],
    mix: bool,
    sample_rate: f64,
    control_rate: f64,
    left: LfoDelay,
    right: LfoDelay,
    rate: f64,
    depth: f64,
    feedback: f64,
    reverb_send: f64,
    dirty: bool,
    /// Consecutive frames of silent input.
    silent_frames: usize,
    /// Left, right and reverb output for one block.
    scratch: [Vec<f32>; 3],
}

impl Default for Chorus {
    fn default() -> Self {
        Chorus::new()
    }
}

impl Chorus {
    pub fn new() -> Chorus {
        let mut chorus = Chorus {
            inputs: [None],
            outputs: [None; 3],
            mix: true,
            sample_rate: 44100.0,
            control_rate: 147.0,
            left: LfoDelay::new(4, PI / 2.0),
            right: LfoDelay::new(4, 0.0),
            rate: 0.0,
            depth: 0.0,
            feedback: 0.0,
            reverb_send: 0.0,
            dirty: true,
            silent_frames: 0,
            scratch: [Vec::new(), Vec::new(), Vec::new()],
        };
        chorus.set_type(DEFAULT_CHORUS_TYPE);
        chorus
    }

    fn set_type(&mut self, chorus_type: u64) {
        let Some([feedback, rate, depth, send]) = chorus_preset(chorus_type) else {
            debug!(chorus_type, "Ignoring unknown chorus type");
            return;
        };
        self.set_param(3, feedback);
        self.set_param(1, rate);
        self.set_param(2, depth);
        self.set_param(4, send);
    }

    /// Values are 7-bit; wider ones clamp to 127.
    fn set_param(&mut self, param: u64, value: u64) {
        let v = value.min(127) as f64;
        match param {
            0 => self.set_type(value),
            1 => self.rate = v * 0.122,
            2 => self.depth = (v + 1.0) / 3200.0,
            3 => self.feedback = v * 0.00763,
            4 => self.reverb_send = v * 0.00787,
            _ => {
                debug!(param, "Ignoring unknown chorus parameter");
                return;
            }
        }
        self.dirty = true;
    }

    fn ensure_capacity(&mut self, frames: usize) {
        for scratch in self.scratch.iter_mut() {
            if scratch.len() != frames {
                scratch.resize(frames, 0.0);
            }
        }
    }
}

impl EffectProcessor for Chorus {
    fn init(&mut self, sample_rate: f32, control_rate: f32) {
        self.sample_rate = sample_rate as f64;
        self.control_rate = control_rate as f64;
        let len = ((MAX_DELAY * self.sample_rate) as usize + 10) * 2;
        self.left = LfoDelay::new(len, PI / 2.0);
        self.right = LfoDelay::new(len, 0.0);
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
        if slot_path == [CHORUS_SLOT] {
            self.set_param(param, value);
        }
    }

    fn process_control_logic(&mut self) {
        if !self.dirty {
            return;
        }
        self.dirty = false;

        let phase_step = 2.0 * PI * self.rate / self.control_rate;
        let depth = self.depth * self.sample_rate;
        for side in [&mut self.left, &mut self.right] {
            side.phase_step = phase_step;
            side.depth = depth;
            side.delay.feedback = self.feedback as f32;
            side.delay.gain = 1.0;
            side.delay.reverb_gain = self.reverb_send as f32;
        }
    }

    fn process_audio(&mut self, buses: &mut BusSet) {
        let Some(input) = self.inputs[0] else {
            return;
        };

        let frames = buses.frames();
        if buses[input].is_silent() {
            self.silent_frames = self.silent_frames.saturating_add(frames);
            if self.silent_frames > self.sample_rate as usize {
                return;
            }
        } else {
            self.silent_frames = 0;
        }
        self.ensure_capacity(frames);

        let source = buses.take(input);
        for scratch in self.scratch.iter_mut() {
            scratch.fill(0.0);
        }
        {
            let [left, right, reverb] = &mut self.scratch;
            self.left.process_mix(source.samples(), left, reverb);
            self.right.process_mix(source.samples(), right, reverb);
        }
        buses.put(input, source);

        for (pin, scratch) in self.outputs.iter().zip(self.scratch.iter()) {
            if let Some(bus) = pin {
                super::write_output(buses[*bus].samples_mut(), scratch, self.mix);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chorus() -> Chorus {
        let mut chorus = Chorus::new();
        chorus.init(44100.0, 147.0);
        chorus.set_input(0, Bus::Effect2);
        chorus.set_output(0, Bus::Left);
        chorus.set_output(1, Bus::Right);
        chorus.set_output(2, Bus::Effect1);
        chorus
    }

    #[test]
    fn test_default_type() {
        let chorus = chorus();
        assert!((chorus.rate - 3.0 * 0.122).abs() < 1e-12);
        assert!((chorus.depth - 20.0 / 3200.0).abs() < 1e-12);
        assert!((chorus.feedback - 8.0 * 0.00763).abs() < 1e-12);
        assert_eq!(0.0, chorus.reverb_send);
        assert!((chorus.left.depth - 20.0 / 3200.0 * 44100.0).abs() < 1e-9);
    }

    #[test]
    fn test_parameter_changes() {
        let mut chorus = chorus();
        chorus.global_parameter_control_change(&[CHORUS_SLOT], 0, 5);
        chorus.global_parameter_control_change(&[CHORUS_SLOT], 4, 127);
        chorus.process_control_logic();
        assert!((chorus.feedback - 112.0 * 0.00763).abs() < 1e-12);
        assert!((chorus.left.delay.reverb_gain - (127.0 * 0.00787) as f32).abs() < 1e-6);

        // Changes addressed to the reverb are ignored.
        chorus.global_parameter_control_change(&[super::super::REVERB_SLOT], 1, 0);
        assert!(!chorus.dirty);
    }

    #[test]
    fn test_wide_values_clamp() {
        let mut chorus = chorus();
        chorus.global_parameter_control_change(&[CHORUS_SLOT], 1, 1 << 62);
        chorus.global_parameter_control_change(&[CHORUS_SLOT], 2, u64::MAX);
        chorus.process_control_logic();
        assert!((chorus.rate - 127.0 * 0.122).abs() < 1e-12);
        assert!((chorus.depth - 128.0 / 3200.0).abs() < 1e-12);

        let mut buses = BusSet::new(300);
        for _ in 0..50 {
            buses[Bus::Effect2].samples_mut().fill(0.5);
            chorus.process_audio(&mut buses);
            assert!((0.0..2.0 * PI).contains(&chorus.left.phase));
            assert!(buses[Bus::Left].samples().iter().all(|s| s.is_finite()));
            buses.begin_cycle();
        }
    }

    #[test]
    fn test_phase_wraps_for_any_step() {
        let mut side = LfoDelay::new(64, 0.0);
        side.phase_step = 1.0e300;
        let input = [0.25f32; 16];
        let mut output = [0.0f32; 16];
        let mut reverb = [0.0f32; 16];
        side.process_mix(&input, &mut output, &mut reverb);
        assert!((0.0..2.0 * PI).contains(&side.phase));
    }

    #[test]
    fn test_delayed_output() {
        let mut chorus = chorus();
        let mut buses = BusSet::new(300);
        buses[Bus::Effect2].samples_mut().fill(1.0);

        let mut heard = false;
        for _ in 0..10 {
            chorus.process_audio(&mut buses);
            if buses[Bus::Left].samples().iter().any(|s| s.abs() > 0.1) {
                heard = true;
            }
            buses.begin_cycle();
            buses[Bus::Effect2].samples_mut().fill(1.0);
        }
        assert!(heard);
    }

    #[test]
    fn test_stops_after_a_second_of_silence() {
        let mut chorus = chorus();
        let mut buses = BusSet::new(300);
        buses[Bus::Effect2].samples_mut()[0] = 1.0;
        chorus.process_audio(&mut buses);

        for _ in 0..200 {
            buses.begin_cycle();
            chorus.process_audio(&mut buses);
        }
        assert!(buses[Bus::Left].is_silent());
    }
}
