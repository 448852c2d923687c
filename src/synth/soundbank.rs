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

//! Resolved instrument data consumed by the voices.
//!
//! The engine doesn't parse any soundbank format. A [SoundBank] hands it fully
//! resolved [Region]s: sample data, loop points, envelope and routing.

use std::{f32::consts::PI, fmt, ops::RangeInclusive, sync::Arc};

use rand::{rngs::StdRng, Rng, SeedableRng};

use super::envelope::EnvelopeParams;

/// Decoded sample frames, one vector per channel.
pub struct SampleData {
    channels: Vec<Vec<f32>>,
    sample_rate: f32,
}

impl SampleData {
    pub fn mono(data: Vec<f32>, sample_rate: f32) -> SampleData {
        SampleData {
            channels: vec![data],
            sample_rate,
        }
    }

    /// Creates stereo sample data. The shorter channel is zero padded.
    pub fn stereo(mut left: Vec<f32>, mut right: Vec<f32>, sample_rate: f32) -> SampleData {
        let frames = left.len().max(right.len());
        left.resize(frames, 0.0);
        right.resize(frames, 0.0);
        SampleData {
            channels: vec![left, right],
            sample_rate,
        }
    }

    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Returns the given channel, falling back to the first one for mono data.
    pub fn channel(&self, channel: usize) -> &[f32] {
        match self.channels.get(channel).or_else(|| self.channels.first()) {
            Some(data) => data,
            None => &[],
        }
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }
}

impl fmt::Debug for SampleData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleData")
            .field("channels", &self.channels.len())
            .field("frames", &self.frames())
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

/// How a region's sample loops.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoopMode {
    #[default]
    NoLoop,
    /// Loops for the lifetime of the voice.
    Continuous,
    /// Loops until the note is released, then plays out to the end.
    UntilRelease,
}

/// A resolved key/velocity zone of an instrument.
#[derive(Clone, Debug)]
pub struct Region {
    pub sample: Arc<SampleData>,
    pub keys: RangeInclusive<u8>,
    pub velocities: RangeInclusive<u8>,
    /// The key at which the sample plays at its recorded pitch.
    pub root_key: u8,
    /// Fine tuning in cents.
    pub fine_tune: f64,
    pub loop_mode: LoopMode,
    pub loop_start: usize,
    pub loop_end: usize,
    pub envelope: EnvelopeParams,
    /// Linear gain.
    pub gain: f32,
    /// Pan offset, 0.0 (left) to 1.0 (right).
    pub pan: f32,
    /// Scales the channel's reverb send.
    pub reverb_send: f32,
    /// Scales the channel's chorus send.
    pub chorus_send: f32,
}

impl Region {
    /// Creates a full-range region with default routing.
    pub fn new(sample: Arc<SampleData>, root_key: u8) -> Region {
        let frames = sample.frames();
        Region {
            sample,
            keys: 0..=127,
            velocities: 0..=127,
            root_key,
            fine_tune: 0.0,
            loop_mode: LoopMode::NoLoop,
            loop_start: 0,
            loop_end: frames,
            envelope: EnvelopeParams::default(),
            gain: 1.0,
            pan: 0.5,
            reverb_send: 1.0,
            chorus_send: 1.0,
        }
    }

    pub fn matches(&self, key: u8, velocity: u8) -> bool {
        self.keys.contains(&key) && self.velocities.contains(&velocity)
    }
}

/// A named set of regions.
#[derive(Debug)]
pub struct Instrument {
    name: String,
    regions: Vec<Arc<Region>>,
}

impl Instrument {
    pub fn new(name: &str, regions: Vec<Region>) -> Instrument {
        Instrument {
            name: name.to_string(),
            regions: regions.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn regions(&self) -> &[Arc<Region>] {
        &self.regions
    }
}

/// Identifies an instrument within a soundbank.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Patch {
    /// 14-bit bank number, MSB * 128 + LSB.
    pub bank: u16,
    pub program: u8,
    pub percussion: bool,
}

/// A provider of resolved instruments.
pub trait SoundBank: Send + Sync {
    /// Returns the instrument for the given patch, if the bank has one.
    fn instrument(&self, patch: Patch) -> Option<Arc<Instrument>>;
}

/// The length of one waveform cycle in frames.
const CYCLE_FRAMES: usize = 128;

/// The key the waveform cycles are tuned to.
const WAVEFORM_ROOT_KEY: u8 = 69;

/// A soundbank built from generated single-cycle waveforms and a noise kit.
///
/// Programs are grouped in families of eight, as in General MIDI, and each family
/// is assigned one of sine, triangle, saw or square.
pub struct WaveformBank {
    melodic: [Arc<Instrument>; 4],
    percussion: Arc<Instrument>,
}

impl Default for WaveformBank {
    fn default() -> Self {
        WaveformBank::new()
    }
}

impl WaveformBank {
    pub fn new() -> WaveformBank {
        WaveformBank {
            melodic: [
                Arc::new(waveform_instrument("Sine", |phase| (2.0 * PI * phase).sin())),
                Arc::new(waveform_instrument("Triangle", |phase| {
                    1.0 - 4.0 * (phase - 0.5).abs()
                })),
                Arc::new(waveform_instrument("Saw", |phase| 2.0 * phase - 1.0)),
                Arc::new(waveform_instrument("Square", |phase| {
                    if phase < 0.5 {
                        1.0
                    } else {
                        -1.0
                    }
                })),
            ],
            percussion: Arc::new(noise_kit()),
        }
    }
}

impl SoundBank for WaveformBank {
    fn instrument(&self, patch: Patch) -> Option<Arc<Instrument>> {
        if patch.percussion {
            return Some(self.percussion.clone());
        }
        let family = (patch.program as usize / 8) % self.melodic.len();
        Some(self.melodic[family].clone())
    }
}

fn waveform_instrument(name: &str, wave: impl Fn(f32) -> f32) -> Instrument {
    let data: Vec<f32> = (0..CYCLE_FRAMES)
        .map(|i| 0.5 * wave(i as f32 / CYCLE_FRAMES as f32))
        .collect();

    // One cycle per 128 frames at A4.
    let sample_rate = 440.0 * CYCLE_FRAMES as f32;
    let mut region = Region::new(Arc::new(SampleData::mono(data, sample_rate)), WAVEFORM_ROOT_KEY);
    region.loop_mode = LoopMode::Continuous;
    region.loop_start = 0;
    region.loop_end = CYCLE_FRAMES;

    Instrument::new(name, vec![region])
}

fn noise_kit() -> Instrument {
    let sample_rate = 44100.0;
    let frames = (sample_rate * 0.3) as usize;
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let data: Vec<f32> = (0..frames)
        .map(|i| {
            let decay = (-(i as f32) / (sample_rate * 0.05)).exp();
            rng.gen_range(-0.5f32..0.5) * decay
        })
        .collect();

    let mut region = Region::new(Arc::new(SampleData::mono(data, sample_rate)), 60);
    region.envelope = EnvelopeParams {
        attack: 0.0,
        decay: 0.0,
        sustain: 1.0,
        release: 0.1,
        ..Default::default()
    };

    Instrument::new("Noise Kit", vec![region])
}
