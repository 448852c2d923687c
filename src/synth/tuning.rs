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

//! MIDI Tuning Standard tables.

use std::collections::HashMap;

use tracing::debug;

/// Identifies a tuning table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TuningKey {
    /// A tuning selected through the tuning bank and program RPNs.
    Program { bank: u8, program: u8 },
    /// A tuning created by a scale/octave message addressed to a channel mask.
    Anonymous(u64),
}

impl Default for TuningKey {
    fn default() -> Self {
        TuningKey::Program {
            bank: 0,
            program: 0,
        }
    }
}

/// The pitch of every MIDI key, in cents above key 0.
#[derive(Clone, Debug)]
pub struct Tuning {
    name: String,
    cents: [f64; 128],
}

impl Default for Tuning {
    fn default() -> Self {
        Tuning {
            name: String::new(),
            cents: std::array::from_fn(|i| i as f64 * 100.0),
        }
    }
}

/// The marker for "no change" in a frequency entry.
const NO_CHANGE: [u8; 3] = [0x7F, 0x7F, 0x7F];

impl Tuning {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cents(&self) -> &[f64; 128] {
        &self.cents
    }

    /// Returns the tuning of a single key in cents.
    pub fn key_cents(&self, key: u8) -> f64 {
        self.cents[(key & 0x7F) as usize]
    }

    /// Applies a tuning SysEx message, starting at the F0 byte. Returns false if the
    /// message isn't a recognized tuning message or is too short.
    pub fn load(&mut self, data: &[u8]) -> bool {
        if data.len() < 5 || (data[1] != 0x7E && data[1] != 0x7F) || data[3] != 0x08 {
            return false;
        }
        let realtime = data[1] == 0x7F;

        match (realtime, data[4]) {
            // Bulk dump: name, then 128 entries.
            (false, 0x01) => {
                if data.len() < 22 + 128 * 3 {
                    return false;
                }
                self.name = read_name(&data[6..22]);
                for (key, entry) in data[22..22 + 128 * 3].chunks_exact(3).enumerate() {
                    self.apply_frequency(key as u8, entry);
                }
                true
            }
            // Single note change.
            (true, 0x02) => {
                if data.len() < 7 {
                    return false;
                }
                self.apply_note_changes(data, data[6] as usize, 7)
            }
            // Bulk dump with bank and checksum.
            (false, 0x04) => {
                if data.len() < 23 + 128 * 3 + 2 || !checksum_ok(data) {
                    return false;
                }
                self.name = read_name(&data[7..23]);
                for (key, entry) in data[23..23 + 128 * 3].chunks_exact(3).enumerate() {
                    self.apply_frequency(key as u8, entry);
                }
                true
            }
            // Scale/octave dump, 1 byte per note.
            (false, 0x05) => {
                if data.len() < 23 + 12 + 2 || !checksum_ok(data) {
                    return false;
                }
                self.name = read_name(&data[7..23]);
                let octave: [f64; 12] = std::array::from_fn(|i| data[23 + i] as f64 - 64.0);
                self.apply_octave(&octave);
                true
            }
            // Scale/octave dump, 2 bytes per note.
            (false, 0x06) => {
                if data.len() < 23 + 24 + 2 || !checksum_ok(data) {
                    return false;
                }
                self.name = read_name(&data[7..23]);
                let octave: [f64; 12] =
                    std::array::from_fn(|i| two_byte_cents(data[23 + 2 * i], data[24 + 2 * i]));
                self.apply_octave(&octave);
                true
            }
            // Single note change with bank select.
            (_, 0x07) => {
                if data.len() < 8 {
                    return false;
                }
                self.apply_note_changes(data, data[7] as usize, 8)
            }
            // Scale/octave tuning, 1 byte per note.
            (_, 0x08) => {
                if data.len() < 8 + 12 {
                    return false;
                }
                let octave: [f64; 12] = std::array::from_fn(|i| data[8 + i] as f64 - 64.0);
                self.apply_octave(&octave);
                true
            }
            // Scale/octave tuning, 2 bytes per note.
            (_, 0x09) => {
                if data.len() < 8 + 24 {
                    return false;
                }
                let octave: [f64; 12] =
                    std::array::from_fn(|i| two_byte_cents(data[8 + 2 * i], data[9 + 2 * i]));
                self.apply_octave(&octave);
                true
            }
            (_, sub_id) => {
                debug!(sub_id, "Ignoring unsupported tuning message");
                false
            }
        }
    }

    fn apply_frequency(&mut self, key: u8, entry: &[u8]) {
        if entry == NO_CHANGE {
            return;
        }
        let value = (entry[0] as f64 * 16384.0 + entry[1] as f64 * 128.0 + entry[2] as f64) / 16384.0;
        self.cents[(key & 0x7F) as usize] = value * 100.0;
    }

    /// Applies `count` (key, xx, yy, zz) entries starting at `start`.
    fn apply_note_changes(&mut self, data: &[u8], count: usize, start: usize) -> bool {
        if data.len() < start + count * 4 {
            return false;
        }
        for entry in data[start..start + count * 4].chunks_exact(4) {
            self.apply_frequency(entry[0], &entry[1..]);
        }
        true
    }

    fn apply_octave(&mut self, octave: &[f64; 12]) {
        for (i, cents) in self.cents.iter_mut().enumerate() {
            *cents = i as f64 * 100.0 + octave[i % 12];
        }
    }
}

fn read_name(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim_end().to_string()
}

fn two_byte_cents(msb: u8, lsb: u8) -> f64 {
    let value = (msb as f64) * 128.0 + lsb as f64;
    (value / 8192.0 - 1.0) * 100.0
}

/// Verifies the XOR checksum that precedes the trailing F7.
fn checksum_ok(data: &[u8]) -> bool {
    let len = data.len();
    if len < 4 {
        return false;
    }
    let mut x = data[1];
    for byte in &data[2..len - 2] {
        x ^= byte;
    }
    x == data[len - 2] & 0x7F
}

/// The tuning tables referenced by the engine.
#[derive(Default)]
pub struct TuningSet {
    tunings: HashMap<TuningKey, Tuning>,
    next_anonymous: u64,
}

impl TuningSet {
    pub fn new() -> TuningSet {
        TuningSet::default()
    }

    /// Returns the tuning for the key, creating the default equal temperament table if
    /// it doesn't exist yet.
    pub fn get_or_default(&mut self, key: TuningKey) -> &mut Tuning {
        self.tunings.entry(key).or_default()
    }

    pub fn get(&self, key: TuningKey) -> Option<&Tuning> {
        self.tunings.get(&key)
    }

    /// Returns the cents of the key in the given tuning, falling back to equal
    /// temperament.
    pub fn key_cents(&self, key: TuningKey, note: u8) -> f64 {
        match self.tunings.get(&key) {
            Some(tuning) => tuning.key_cents(note),
            None => (note & 0x7F) as f64 * 100.0,
        }
    }

    /// Creates a fresh anonymous tuning and returns its key.
    pub fn create_anonymous(&mut self) -> TuningKey {
        let key = TuningKey::Anonymous(self.next_anonymous);
        self.next_anonymous += 1;
        self.tunings.insert(key, Tuning::default());
        key
    }

    /// Drops anonymous tunings for which `in_use` returns false.
    pub fn collect_garbage(&mut self, in_use: impl Fn(&TuningKey) -> bool) {
        self.tunings
            .retain(|key, _| !matches!(key, TuningKey::Anonymous(_)) || in_use(key));
    }

    pub fn len(&self) -> usize {
        self.tunings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tunings.is_empty()
    }
}
