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

//! Automatic gain control that keeps the master output below full scale.
//!
//! The limiter delays its output by one block. The gain applied to a block is
//! derived from the peak of that block and of the block after it, so a peak is
//! attenuated before it arrives. Gain falls at full speed and recovers with a 9:1
//! weighted blend, and every change is ramped across the block per sample.

use super::{assign_pin, EffectProcessor};
use crate::synth::buffer::{period_frames, Bus, BusSet};

/// Peaks above this are limited.
const CEILING: f32 = 0.99;

pub struct Limiter {
    inputs: [Option<Bus>; 2],
    outputs: [Option<Bus>; 2],
    gain: f32,
    last_max: f32,
    /// The previous block of input, waiting to be output.
    delayed: [Vec<f32>; 2],
    delayed_silent: bool,
}

impl Default for Limiter {
    fn default() -> Self {
        Limiter::new()
    }
}

impl Limiter {
    pub fn new() -> Limiter {
        Limiter {
            inputs: [None; 2],
            outputs: [None; 2],
            gain: 1.0,
            last_max: 0.0,
            delayed: [Vec::new(), Vec::new()],
            delayed_silent: true,
        }
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    fn ensure_capacity(&mut self, frames: usize) {
        for delayed in self.delayed.iter_mut() {
            if delayed.len() != frames {
                delayed.resize(frames, 0.0);
            }
        }
    }
}

fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |peak, s| peak.max(s.abs()))
}

impl EffectProcessor for Limiter {
    fn init(&mut self, sample_rate: f32, control_rate: f32) {
        self.ensure_capacity(period_frames(sample_rate, control_rate));
    }

    fn set_input(&mut self, pin: usize, bus: Bus) {
        assign_pin(&mut self.inputs, pin, bus);
    }

    fn set_output(&mut self, pin: usize, bus: Bus) {
        assign_pin(&mut self.outputs, pin, bus);
    }

    /// The limiter always replaces its output.
    fn set_mix_mode(&mut self, _mix: bool) {}

    fn global_parameter_control_change(&mut self, _slot_path: &[u32], _param: u64, _value: u64) {}

    fn process_control_logic(&mut self) {}

    fn process_audio(&mut self, buses: &mut BusSet) {
        let (Some(in_left), Some(in_right)) = (self.inputs[0], self.inputs[1]) else {
            return;
        };
        let out_left = self.outputs[0].unwrap_or(in_left);
        let out_right = self.outputs[1].unwrap_or(in_right);

        let input_silent = buses[in_left].is_silent() && buses[in_right].is_silent();
        if input_silent && self.delayed_silent {
            return;
        }

        let frames = buses.frames();
        self.ensure_capacity(frames);

        let mut max = peak(buses[in_left].samples()).max(peak(buses[in_right].samples()));
        let lmax = self.last_max;
        self.last_max = max;
        max = max.max(lmax);

        let mut new_gain = if max > CEILING { CEILING / max } else { 1.0 };
        if new_gain > self.gain {
            new_gain = (new_gain + 9.0 * self.gain) / 10.0;
        }
        let delta = (new_gain - self.gain) / frames as f32;

        for (side, (input, output)) in [(in_left, out_left), (in_right, out_right)]
            .into_iter()
            .enumerate()
        {
            let mut gain = self.gain;
            let delayed = &mut self.delayed[side];
            if input == output {
                for (sample, held) in buses[input].samples_mut().iter_mut().zip(delayed.iter_mut()) {
                    gain += delta;
                    let current = *sample;
                    *sample = *held * gain;
                    *held = current;
                }
            } else {
                let (source, target) = buses.pair_mut(input, output);
                let target = target.samples_mut();
                for ((sample, held), out) in source
                    .samples()
                    .iter()
                    .zip(delayed.iter_mut())
                    .zip(target.iter_mut())
                {
                    gain += delta;
                    *out = *held * gain;
                    *held = *sample;
                }
            }
        }

        self.gain = new_gain;
        self.delayed_silent = input_silent;
    }
}
