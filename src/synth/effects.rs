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

//! Fixed-topology effect processors that run once per cycle on the bus set.

pub mod chorus;
pub mod limiter;
pub mod reverb;

use super::buffer::{Bus, BusSet};

pub use chorus::Chorus;
pub use limiter::Limiter;
pub use reverb::Reverb;

/// GPC slot path of the reverb (slot 01 01).
pub const REVERB_SLOT: u32 = 0x01 * 128 + 0x01;
/// GPC slot path of the chorus (slot 01 02).
pub const CHORUS_SLOT: u32 = 0x01 * 128 + 0x02;

/// The deepest slot path a global parameter change may carry.
pub const MAX_SLOT_DEPTH: usize = 8;

/// A decoded Global Parameter Control change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParameterChange {
    slots: [u32; MAX_SLOT_DEPTH],
    depth: usize,
    pub param: u64,
    pub value: u64,
}

impl ParameterChange {
    /// Creates a change for the given slot path. Paths deeper than
    /// [MAX_SLOT_DEPTH] are truncated.
    pub fn new(path: &[u32], param: u64, value: u64) -> ParameterChange {
        let depth = path.len().min(MAX_SLOT_DEPTH);
        let mut slots = [0; MAX_SLOT_DEPTH];
        slots[..depth].copy_from_slice(&path[..depth]);
        ParameterChange {
            slots,
            depth,
            param,
            value,
        }
    }

    pub fn slot_path(&self) -> &[u32] {
        &self.slots[..self.depth]
    }
}

/// An audio-rate effect wired to buses by pin number.
pub trait EffectProcessor: Send {
    /// Prepares internal buffers. Called once before any processing.
    fn init(&mut self, sample_rate: f32, control_rate: f32);

    fn set_input(&mut self, pin: usize, bus: Bus);

    fn set_output(&mut self, pin: usize, bus: Bus);

    /// True adds into the output buses, false overwrites them.
    fn set_mix_mode(&mut self, mix: bool);

    /// Applies a Global Parameter Control change. Changes for other slots are
    /// ignored.
    fn global_parameter_control_change(&mut self, slot_path: &[u32], param: u64, value: u64);

    /// Applies pending parameter changes. Runs once per cycle under the control lock.
    fn process_control_logic(&mut self);

    fn process_audio(&mut self, buses: &mut BusSet);
}

/// Stores `bus` at `pin`. Pins the effect doesn't have are ignored.
fn assign_pin<const N: usize>(pins: &mut [Option<Bus>; N], pin: usize, bus: Bus) {
    if let Some(slot) = pins.get_mut(pin) {
        *slot = Some(bus);
    }
}

/// Writes `source` into `target`, adding or overwriting.
fn write_output(target: &mut [f32], source: &[f32], mix: bool) {
    if mix {
        for (t, s) in target.iter_mut().zip(source.iter()) {
            *t += *s;
        }
    } else {
        target.copy_from_slice(&source[..target.len()]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_change_path() {
        let change = ParameterChange::new(&[REVERB_SLOT], 0, 4);
        assert_eq!(&[129], change.slot_path());

        let deep = ParameterChange::new(&[1; 12], 1, 2);
        assert_eq!(MAX_SLOT_DEPTH, deep.slot_path().len());
    }

    #[test]
    fn test_write_output_modes() {
        let mut target = [1.0, 1.0];
        write_output(&mut target, &[0.5, 0.25], true);
        assert_eq!([1.5, 1.25], target);
        write_output(&mut target, &[0.5, 0.25], false);
        assert_eq!([0.5, 0.25], target);
    }
}
