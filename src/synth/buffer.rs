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

//! Per-cycle audio buses.
//!
//! Every control period renders into a fixed set of sixteen float buses. Each bus
//! carries a silent flag so that processors can skip work on buses nobody wrote to.

use std::{
    mem,
    ops::{Index, IndexMut},
};

/// The number of logical buses rendered every control period.
pub const BUS_COUNT: usize = 16;

/// The number of frames rendered per control period.
pub fn period_frames(sample_rate: f32, control_rate: f32) -> usize {
    (sample_rate / control_rate).round().max(1.0) as usize
}

/// A logical audio bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Bus {
    Left,
    Right,
    Mono,
    DelayLeft,
    DelayRight,
    DelayMono,
    /// Reverb send.
    Effect1,
    /// Chorus send.
    Effect2,
    DelayEffect1,
    DelayEffect2,
    /// Channel mixer output, bypasses the effects.
    LeftDry,
    RightDry,
    /// Oscillator output of the voice currently rendering.
    Scratch1,
    Scratch2,
    /// Isolated left/right while a channel mixer's voices render.
    ChannelMixerLeft,
    ChannelMixerRight,
}

impl Bus {
    pub const ALL: [Bus; BUS_COUNT] = [
        Bus::Left,
        Bus::Right,
        Bus::Mono,
        Bus::DelayLeft,
        Bus::DelayRight,
        Bus::DelayMono,
        Bus::Effect1,
        Bus::Effect2,
        Bus::DelayEffect1,
        Bus::DelayEffect2,
        Bus::LeftDry,
        Bus::RightDry,
        Bus::Scratch1,
        Bus::Scratch2,
        Bus::ChannelMixerLeft,
        Bus::ChannelMixerRight,
    ];

    /// The buses that have a delay companion, paired with it.
    pub const DELAYED: [(Bus, Bus); 5] = [
        (Bus::Left, Bus::DelayLeft),
        (Bus::Right, Bus::DelayRight),
        (Bus::Mono, Bus::DelayMono),
        (Bus::Effect1, Bus::DelayEffect1),
        (Bus::Effect2, Bus::DelayEffect2),
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Returns true for buses that carry spill-over into the next cycle.
    pub fn is_delay(self) -> bool {
        matches!(
            self,
            Bus::DelayLeft | Bus::DelayRight | Bus::DelayMono | Bus::DelayEffect1 | Bus::DelayEffect2
        )
    }

    /// Returns the delay companion of this bus, if it has one.
    pub fn delayed(self) -> Option<Bus> {
        Bus::DELAYED
            .iter()
            .find(|(bus, _)| *bus == self)
            .map(|(_, delayed)| *delayed)
    }
}

/// A fixed-length float buffer with a silent flag.
#[derive(Clone, Debug)]
pub struct AudioBuffer {
    data: Vec<f32>,
    silent: bool,
}

impl Default for AudioBuffer {
    fn default() -> Self {
        AudioBuffer {
            data: Vec::new(),
            silent: true,
        }
    }
}

impl AudioBuffer {
    /// Creates a silent buffer of the given length.
    pub fn new(len: usize) -> AudioBuffer {
        AudioBuffer {
            data: vec![0.0; len],
            silent: true,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns true if nothing has been written since the last clear.
    pub fn is_silent(&self) -> bool {
        self.silent
    }

    pub fn samples(&self) -> &[f32] {
        &self.data
    }

    /// Returns the samples for writing. The buffer is no longer considered silent.
    pub fn samples_mut(&mut self) -> &mut [f32] {
        self.silent = false;
        &mut self.data
    }

    /// Zeroes the buffer if anything was written to it.
    pub fn clear(&mut self) {
        if !self.silent {
            self.data.fill(0.0);
            self.silent = true;
        }
    }

    /// Adds the other buffer into this one. Silent sources are skipped.
    pub fn add(&mut self, other: &AudioBuffer) {
        if other.silent {
            return;
        }
        for (dst, src) in self.samples_mut().iter_mut().zip(other.data.iter()) {
            *dst += *src;
        }
    }
}

/// The full set of buses for one control period.
pub struct BusSet {
    buses: [AudioBuffer; BUS_COUNT],
    frames: usize,
}

impl BusSet {
    /// Creates a set of silent buses, each holding `frames` samples.
    pub fn new(frames: usize) -> BusSet {
        BusSet {
            buses: std::array::from_fn(|_| AudioBuffer::new(frames)),
            frames,
        }
    }

    /// The number of frames in every bus.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Clears every bus except the delay buses, then moves any spill-over from the
    /// previous cycle into place as this cycle's starting content.
    pub fn begin_cycle(&mut self) {
        for bus in Bus::ALL {
            if !bus.is_delay() {
                self.buses[bus.index()].clear();
            }
        }
        for (bus, delayed) in Bus::DELAYED {
            if !self.buses[delayed.index()].is_silent() {
                self.buses.swap(bus.index(), delayed.index());
            }
        }
    }

    /// Borrows two distinct buses mutably.
    pub fn pair_mut(&mut self, a: Bus, b: Bus) -> (&mut AudioBuffer, &mut AudioBuffer) {
        let (i, j) = (a.index(), b.index());
        assert_ne!(i, j, "cannot borrow the same bus twice");
        if i < j {
            let (lo, hi) = self.buses.split_at_mut(j);
            (&mut lo[i], &mut hi[0])
        } else {
            let (lo, hi) = self.buses.split_at_mut(i);
            (&mut hi[0], &mut lo[j])
        }
    }

    /// Moves a bus out of the set, leaving an empty buffer behind. Does not allocate.
    pub fn take(&mut self, bus: Bus) -> AudioBuffer {
        mem::take(&mut self.buses[bus.index()])
    }

    /// Puts a bus previously taken with [BusSet::take] back.
    pub fn put(&mut self, bus: Bus, buffer: AudioBuffer) {
        self.buses[bus.index()] = buffer;
    }

    /// Exchanges a bus with an external buffer of the same length.
    pub fn swap(&mut self, bus: Bus, other: &mut AudioBuffer) {
        mem::swap(&mut self.buses[bus.index()], other);
    }

    /// Mixes the mono bus into left and right.
    pub fn fold_mono(&mut self) {
        if self.buses[Bus::Mono.index()].is_silent() {
            return;
        }
        let mono = self.take(Bus::Mono);
        self.buses[Bus::Left.index()].add(&mono);
        self.buses[Bus::Right.index()].add(&mono);
        self.put(Bus::Mono, mono);
    }

    /// Replaces left and right with their average, for single channel output.
    pub fn downmix(&mut self) {
        if self.buses[Bus::Left.index()].is_silent() && self.buses[Bus::Right.index()].is_silent()
        {
            return;
        }
        let (left, right) = self.pair_mut(Bus::Left, Bus::Right);
        let right_silent = right.is_silent();
        let left = left.samples_mut();
        let right = right.samples_mut();
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let sample = if right_silent { *l * 0.5 } else { (*l + *r) * 0.5 };
            *l = sample;
            *r = sample;
        }
    }
}

impl Index<Bus> for BusSet {
    type Output = AudioBuffer;

    fn index(&self, bus: Bus) -> &AudioBuffer {
        &self.buses[bus.index()]
    }
}

impl IndexMut<Bus> for BusSet {
    fn index_mut(&mut self, bus: Bus) -> &mut AudioBuffer {
        &mut self.buses[bus.index()]
    }
}
