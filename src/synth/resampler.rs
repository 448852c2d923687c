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

//! Pitch-shifting sample interpolation.
//!
//! The interpolators read from a padded block of sample data: `padding()` samples of
//! context must exist on both sides of every position they are asked to read, which
//! [SampleStream] guarantees by construction. The kernels never bounds-check the
//! source past that contract.

use std::{error::Error, f64::consts::PI, fmt, str::FromStr, sync::Arc};

use lazy_static::lazy_static;

use super::soundbank::{LoopMode, Region, SampleData};

/// Fractional subdivisions per integer sample in the Lanczos table.
const SINC_TABLE_FSIZE: usize = 2000;
/// Taps per Lanczos kernel.
const SINC_TABLE_SIZE: usize = 5;
const SINC_TABLE_CENTER: usize = SINC_TABLE_SIZE / 2;

lazy_static! {
    static ref LANCZOS_TABLE: Vec<[f32; SINC_TABLE_SIZE]> = build_lanczos_table();
}

fn build_lanczos_table() -> Vec<[f32; SINC_TABLE_SIZE]> {
    (0..SINC_TABLE_FSIZE)
        .map(|i| {
            let offset = -(i as f64) / SINC_TABLE_FSIZE as f64;
            let mut row = [0.0f32; SINC_TABLE_SIZE];
            for (k, weight) in row.iter_mut().enumerate() {
                let x = -(SINC_TABLE_CENTER as f64) + k as f64 + offset;
                *weight = lanczos_window(x) as f32;
            }
            row
        })
        .collect()
}

fn lanczos_window(x: f64) -> f64 {
    if !(-2.0..=2.0).contains(&x) {
        0.0
    } else if x == 0.0 {
        1.0
    } else {
        let px = PI * x;
        2.0 * px.sin() * (px / 2.0).sin() / (px * px)
    }
}

/// The interpolation kernel used to read samples at fractional positions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Interpolation {
    /// Nearest lower sample.
    Point,
    Linear,
    /// 5-tap windowed sinc.
    #[default]
    Lanczos,
}

impl FromStr for Interpolation {
    type Err = Box<dyn Error>;

    fn from_str(s: &str) -> Result<Self, Box<dyn Error>> {
        match s {
            "point" | "Point" => Ok(Interpolation::Point),
            "linear" | "Linear" => Ok(Interpolation::Linear),
            "lanczos" | "Lanczos" | "sinc" => Ok(Interpolation::Lanczos),
            _ => Err(format!("Unsupported interpolation: {}", s).into()),
        }
    }
}

impl Interpolation {
    pub fn as_str(self) -> &'static str {
        match self {
            Interpolation::Point => "point",
            Interpolation::Linear => "linear",
            Interpolation::Lanczos => "lanczos",
        }
    }

    /// Samples of context required before and after any position read.
    pub fn padding(self) -> usize {
        match self {
            Interpolation::Point => 1,
            Interpolation::Linear => 2,
            Interpolation::Lanczos => SINC_TABLE_SIZE / 2 + 2,
        }
    }

    /// Interpolates `input` from position `ix` until either `ix` reaches `ix_end` or
    /// `ox` reaches `ox_end`. The pitch advances by `pitch_step` per output sample.
    /// Position, pitch and output index are written back so a caller can resume.
    #[allow(clippy::too_many_arguments)]
    pub fn interpolate(
        self,
        input: &[f32],
        ix: &mut f32,
        ix_end: f32,
        pitch: &mut f32,
        pitch_step: f32,
        out: &mut [f32],
        ox: &mut usize,
        ox_end: usize,
    ) {
        let mut x = *ix;
        let mut p = *pitch;
        let mut o = *ox;

        match self {
            Interpolation::Point => {
                while x < ix_end && o < ox_end {
                    out[o] = input[x as usize];
                    o += 1;
                    x += p;
                    p += pitch_step;
                }
            }
            Interpolation::Linear => {
                while x < ix_end && o < ox_end {
                    let iix = x as usize;
                    let fix = x - iix as f32;
                    let i = input[iix];
                    out[o] = i + (input[iix + 1] - i) * fix;
                    o += 1;
                    x += p;
                    p += pitch_step;
                }
            }
            Interpolation::Lanczos => {
                let table = &*LANCZOS_TABLE;
                while x < ix_end && o < ox_end {
                    let iix = x as usize;
                    let row = ((x - iix as f32) * SINC_TABLE_FSIZE as f32) as usize;
                    let weights = &table[row.min(SINC_TABLE_FSIZE - 1)];
                    let start = iix - SINC_TABLE_CENTER;
                    let taps = &input[start..start + SINC_TABLE_SIZE];
                    let mut y = 0.0f32;
                    for (sample, weight) in taps.iter().zip(weights.iter()) {
                        y += sample * weight;
                    }
                    out[o] = y;
                    o += 1;
                    x += p;
                    p += pitch_step;
                }
            }
        }

        *ix = x;
        *pitch = p;
        *ox = o;
    }
}

impl fmt::Display for Interpolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Frames per block streamed out of the sample data.
const SECTOR: usize = 512;

/// The maximum number of channels a stream reads.
const MAX_CHANNELS: usize = 2;

/// Streams a region's sample data through an interpolator.
///
/// The source is copied into a block laid out as `[history | sector | lookahead]`,
/// each side `padding` samples wide. Loops are resolved while the block is filled,
/// so the kernels only ever see contiguous data. All storage is allocated when the
/// stream is created; starting notes and reading never allocate.
pub struct SampleStream {
    interpolation: Interpolation,
    pad: usize,
    blocks: [Vec<f32>; MAX_CHANNELS],
    sample: Option<Arc<SampleData>>,
    channels: usize,
    loop_mode: LoopMode,
    loop_start: usize,
    loop_end: usize,
    released: bool,
    read_pos: usize,
    ix: f32,
    end_ix: Option<f32>,
    pitch: f32,
    finished: bool,
}

impl SampleStream {
    pub fn new(interpolation: Interpolation) -> SampleStream {
        let pad = interpolation.padding();
        SampleStream {
            interpolation,
            pad,
            blocks: std::array::from_fn(|_| vec![0.0; SECTOR + 2 * pad]),
            sample: None,
            channels: 1,
            loop_mode: LoopMode::NoLoop,
            loop_start: 0,
            loop_end: 0,
            released: false,
            read_pos: 0,
            ix: pad as f32,
            end_ix: None,
            pitch: 1.0,
            finished: true,
        }
    }

    /// Starts streaming the region's sample from its first frame.
    pub fn start(&mut self, region: &Region, pitch: f32) {
        let frames = region.sample.frames();
        self.channels = region.sample.channel_count().clamp(1, MAX_CHANNELS);
        self.loop_mode = region.loop_mode;
        self.loop_end = region.loop_end.min(frames);
        self.loop_start = region.loop_start.min(self.loop_end);
        self.sample = Some(region.sample.clone());
        self.released = false;
        self.read_pos = 0;
        self.ix = self.pad as f32;
        self.end_ix = None;
        self.pitch = pitch;
        self.finished = false;

        for block in self.blocks.iter_mut() {
            block[..self.pad].fill(0.0);
        }
        self.fill(self.pad);
    }

    /// Stops looping if the loop only lasts until release.
    pub fn release(&mut self) {
        self.released = true;
    }

    /// Drops the reference to the sample data.
    pub fn stop(&mut self) {
        self.sample = None;
        self.finished = true;
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    fn looping(&self) -> bool {
        let looped = match self.loop_mode {
            LoopMode::NoLoop => false,
            LoopMode::Continuous => true,
            LoopMode::UntilRelease => !self.released,
        };
        looped && self.loop_end > self.loop_start
    }

    /// Fills the block from index `from` up to its end.
    fn fill(&mut self, from: usize) {
        let total = SECTOR + 2 * self.pad;
        let mut i = from;

        while i < total {
            let looping = self.looping();
            let Some(sample) = self.sample.as_ref() else {
                break;
            };
            let limit = if looping {
                self.loop_end
            } else {
                sample.frames()
            };

            if self.read_pos >= limit {
                if looping {
                    self.read_pos = self.loop_start;
                    continue;
                }
                break;
            }

            let n = (limit - self.read_pos).min(total - i);
            for (ch, block) in self.blocks.iter_mut().take(self.channels).enumerate() {
                block[i..i + n].copy_from_slice(&sample.channel(ch)[self.read_pos..self.read_pos + n]);
            }
            i += n;
            self.read_pos += n;
        }

        if i < total {
            if self.end_ix.is_none() {
                self.end_ix = Some(i as f32);
            }
            for block in self.blocks.iter_mut() {
                block[i..total].fill(0.0);
            }
        }
    }

    /// Moves the sector window forward by one sector.
    fn shift(&mut self) {
        let pad = self.pad;
        for block in self.blocks.iter_mut() {
            block.copy_within(SECTOR..SECTOR + 2 * pad, 0);
        }
        self.ix -= SECTOR as f32;
        if let Some(end) = self.end_ix.as_mut() {
            *end -= SECTOR as f32;
        }
        self.fill(2 * pad);
    }

    /// Renders `left.len()` frames, ramping the pitch linearly towards `target_pitch`.
    /// Stereo data renders its second channel into `right`; mono data is copied there.
    /// Returns the number of frames produced, which is short once the sample ends.
    pub fn read(&mut self, left: &mut [f32], mut right: Option<&mut [f32]>, target_pitch: f32) -> usize {
        if self.finished {
            return 0;
        }

        let len = left.len();
        let pitch_step = (target_pitch - self.pitch) / len as f32;
        let sector_end = (self.pad + SECTOR) as f32;
        let mut ox = 0;

        while ox < len {
            while self.ix >= sector_end {
                self.shift();
            }
            let ix_end = self.end_ix.map_or(sector_end, |end| end.min(sector_end));
            if self.ix >= ix_end {
                self.finished = true;
                break;
            }

            let (mut ix, mut pitch, mut o) = (self.ix, self.pitch, ox);
            self.interpolation.interpolate(
                &self.blocks[0],
                &mut ix,
                ix_end,
                &mut pitch,
                pitch_step,
                left,
                &mut o,
                len,
            );

            if let Some(right) = right.as_deref_mut() {
                if self.channels > 1 {
                    let (mut rix, mut rpitch, mut ro) = (self.ix, self.pitch, ox);
                    self.interpolation.interpolate(
                        &self.blocks[1],
                        &mut rix,
                        ix_end,
                        &mut rpitch,
                        pitch_step,
                        right,
                        &mut ro,
                        len,
                    );
                } else {
                    right[ox..o].copy_from_slice(&left[ox..o]);
                }
            }

            self.ix = ix;
            self.pitch = pitch;
            ox = o;
        }

        if self.finished {
            self.sample = None;
        } else {
            self.pitch = target_pitch;
        }
        ox
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn padded_ramp(pad: usize, len: usize) -> Vec<f32> {
        let mut data = vec![0.0; pad];
        data.extend((0..len).map(|i| i as f32));
        data.extend(std::iter::repeat(0.0).take(pad));
        data
    }

    #[test]
    fn test_from_str() {
        assert_eq!(Interpolation::Lanczos, Interpolation::from_str("lanczos").unwrap());
        assert_eq!(Interpolation::Linear, Interpolation::from_str("Linear").unwrap());
        assert_eq!(Interpolation::Point, Interpolation::from_str("point").unwrap());
        assert!(Interpolation::from_str("cubic").is_err());
    }

    #[test]
    fn test_padding() {
        assert_eq!(4, Interpolation::Lanczos.padding());
        assert_eq!(2, Interpolation::Linear.padding());
        assert_eq!(1, Interpolation::Point.padding());
    }

    #[test]
    fn test_lanczos_table_shape() {
        let table = &*LANCZOS_TABLE;
        assert_eq!(SINC_TABLE_FSIZE, table.len());
        // At an integer position the kernel passes the center tap through.
        for (k, weight) in table[0].iter().enumerate() {
            let expected = if k == SINC_TABLE_CENTER { 1.0 } else { 0.0 };
            assert!((weight - expected).abs() < 1e-6);
        }
        // Halfway between samples the kernel is symmetric about the midpoint.
        let half = &table[SINC_TABLE_FSIZE / 2];
        assert_eq!(0.0, half[0]);
        assert!((half[2] - half[3]).abs() < 1e-6);
        assert!((half[1] - half[4]).abs() < 1e-6);
        assert!(half[2] > 0.5);
        assert!(half[1] < 0.0);
    }

    #[test]
    fn test_lanczos_determinism() {
        let pad = Interpolation::Lanczos.padding();
        let input: Vec<f32> = (0..64).map(|i| ((i as f32) * 0.37).sin()).collect();

        let render = || {
            let mut out = vec![0.0; 20];
            let mut ix = pad as f32 + 0.123;
            let mut pitch = 1.37;
            let mut ox = 0;
            Interpolation::Lanczos.interpolate(
                &input, &mut ix, 50.0, &mut pitch, 0.001, &mut out, &mut ox, 20,
            );
            (out, ix, pitch, ox)
        };

        let (a, a_ix, a_pitch, a_ox) = render();
        let (b, b_ix, b_pitch, b_ox) = render();
        assert_eq!(20, a_ox);
        assert_eq!(a_ox, b_ox);
        assert_eq!(a_ix.to_bits(), b_ix.to_bits());
        assert_eq!(a_pitch.to_bits(), b_pitch.to_bits());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.to_bits(), y.to_bits());
        }
    }

    #[test]
    fn test_unity_pitch_reproduces_input() {
        for interpolation in [
            Interpolation::Point,
            Interpolation::Linear,
            Interpolation::Lanczos,
        ] {
            let pad = interpolation.padding();
            let input = padded_ramp(pad, 16);
            let mut out = vec![0.0; 8];
            let mut ix = pad as f32;
            let mut pitch = 1.0;
            let mut ox = 0;
            interpolation.interpolate(
                &input,
                &mut ix,
                (pad + 16) as f32,
                &mut pitch,
                0.0,
                &mut out,
                &mut ox,
                8,
            );
            for (i, sample) in out.iter().enumerate() {
                assert!(
                    (sample - i as f32).abs() < 1e-5,
                    "{} at {}: {}",
                    interpolation,
                    i,
                    sample
                );
            }
        }
    }

    #[test]
    fn test_linear_half_step() {
        let input = padded_ramp(2, 8);
        let mut out = vec![0.0; 4];
        let mut ix = 2.0;
        let mut pitch = 0.5;
        let mut ox = 0;
        Interpolation::Linear.interpolate(&input, &mut ix, 10.0, &mut pitch, 0.0, &mut out, &mut ox, 4);
        assert_eq!(&[0.0, 0.5, 1.0, 1.5], out.as_slice());
        assert_eq!(4.0, ix);
    }

    #[test]
    fn test_interpolate_stops_at_input_end() {
        let input = padded_ramp(2, 4);
        let mut out = vec![0.0; 10];
        let mut ix = 2.0;
        let mut pitch = 1.0;
        let mut ox = 0;
        Interpolation::Linear.interpolate(&input, &mut ix, 6.0, &mut pitch, 0.0, &mut out, &mut ox, 10);
        assert_eq!(4, ox);
    }

    #[test]
    fn test_stream_plays_to_end() {
        let sample = Arc::new(SampleData::mono((0..1000).map(|i| i as f32).collect(), 44100.0));
        let region = Region::new(sample, 60);
        let mut stream = SampleStream::new(Interpolation::Linear);
        stream.start(&region, 1.0);

        let mut out = vec![0.0; 600];
        assert_eq!(600, stream.read(&mut out, None, 1.0));
        assert_eq!(599.0, out[599]);

        let produced = stream.read(&mut out, None, 1.0);
        assert_eq!(400, produced);
        assert_eq!(999.0, out[399]);
        assert!(stream.is_finished());
        assert_eq!(0, stream.read(&mut out, None, 1.0));
    }

    #[test]
    fn test_stream_loops_continuously() {
        let sample = Arc::new(SampleData::mono(vec![1.0, 2.0, 3.0, 4.0], 44100.0));
        let mut region = Region::new(sample, 60);
        region.loop_mode = LoopMode::Continuous;
        region.loop_start = 1;
        region.loop_end = 4;

        let mut stream = SampleStream::new(Interpolation::Point);
        stream.start(&region, 1.0);

        let mut out = vec![0.0; 2000];
        assert_eq!(2000, stream.read(&mut out, None, 1.0));
        assert_eq!(&[1.0, 2.0, 3.0, 4.0, 2.0, 3.0, 4.0, 2.0], &out[..8]);
        // Across the sector boundary the loop carries on.
        assert_eq!(out[1999], [2.0, 3.0, 4.0][(1999 - 1) % 3]);
        assert!(!stream.is_finished());
    }

    #[test]
    fn test_stream_loop_until_release() {
        let sample = Arc::new(SampleData::mono(vec![1.0, 2.0, 3.0, 4.0, 5.0], 44100.0));
        let mut region = Region::new(sample, 60);
        region.loop_mode = LoopMode::UntilRelease;
        region.loop_start = 0;
        region.loop_end = 2;

        let mut stream = SampleStream::new(Interpolation::Point);
        stream.start(&region, 1.0);
        let mut out = vec![0.0; 1200];
        assert_eq!(1200, stream.read(&mut out, None, 1.0));

        // After release the stream plays out what's buffered and then the tail.
        stream.release();
        let mut total = 0;
        for _ in 0..4 {
            let produced = stream.read(&mut out, None, 1.0);
            total += produced;
            if produced < out.len() {
                assert_eq!(5.0, out[produced - 1]);
                break;
            }
        }
        assert!(stream.is_finished());
        assert!(total > 0);
    }

    #[test]
    fn test_stream_stereo_and_pitch_ramp() {
        let sample = Arc::new(SampleData::stereo(vec![1.0; 4000], vec![-1.0; 4000], 44100.0));
        let region = Region::new(sample, 60);
        let mut stream = SampleStream::new(Interpolation::Lanczos);
        stream.start(&region, 1.0);

        let mut left = vec![0.0; 300];
        let mut right = vec![0.0; 300];
        assert_eq!(300, stream.read(&mut left, Some(&mut right), 2.0));
        // Windowed sinc weights only sum to roughly one between samples.
        assert!((left[100] - 1.0).abs() < 0.05);
        assert!((right[100] + 1.0).abs() < 0.05);
        assert_eq!(2, stream.channels());
    }
}
