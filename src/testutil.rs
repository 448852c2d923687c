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
use std::{
    sync::Arc,
    thread,
    time::{Duration, SystemTime},
};

use crate::synth::{
    envelope::EnvelopeParams,
    soundbank::{Instrument, LoopMode, Patch, Region, SampleData, SoundBank},
};

/// Wait for the given predicate to return true or fail.
pub fn eventually<F>(predicate: F, error_msg: &str)
where
    F: Fn() -> bool,
{
    let start = SystemTime::now();
    let tick = Duration::from_millis(10);
    let timeout = Duration::from_secs(3);

    loop {
        let elapsed = start.elapsed().expect("System time error");
        if elapsed > timeout {
            panic!("{}", error_msg);
        }
        if predicate() {
            return;
        }
        thread::sleep(tick);
    }
}

/// Calculate RMS (Root Mean Square) of a signal
pub fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|&x| x * x).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Splits interleaved 16-bit little endian stereo PCM into normalized left and
/// right samples.
pub fn decode_stereo_i16(bytes: &[u8]) -> (Vec<f32>, Vec<f32>) {
    let mut left = Vec::with_capacity(bytes.len() / 4);
    let mut right = Vec::with_capacity(bytes.len() / 4);
    for frame in bytes.chunks_exact(4) {
        left.push(i16::from_le_bytes([frame[0], frame[1]]) as f32 / 32767.0);
        right.push(i16::from_le_bytes([frame[2], frame[3]]) as f32 / 32767.0);
    }
    (left, right)
}

/// A soundbank whose every instrument is a looped constant level with instant
/// attack and release. Makes the output level easy to predict.
pub struct ConstantBank {
    instrument: Arc<Instrument>,
}

impl ConstantBank {
    pub fn new(level: f32) -> ConstantBank {
        let frames = 64;
        let mut region = Region::new(
            Arc::new(SampleData::mono(vec![level; frames], 44100.0)),
            60,
        );
        region.loop_mode = LoopMode::Continuous;
        region.loop_start = 0;
        region.loop_end = frames;
        region.envelope = EnvelopeParams {
            attack: 0.0,
            decay: 0.0,
            sustain: 1.0,
            release: 0.0,
            ..Default::default()
        };
        ConstantBank {
            instrument: Arc::new(Instrument::new("Constant", vec![region])),
        }
    }
}

impl SoundBank for ConstantBank {
    fn instrument(&self, _: Patch) -> Option<Arc<Instrument>> {
        Some(self.instrument.clone())
    }
}
