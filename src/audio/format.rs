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

use std::{error::Error, fmt, str::FromStr};

/// Sample format enumeration for PCM output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// Integer samples (8, 16, 24 or 32 bit)
    Int,
    /// Floating point samples (32 or 64 bit)
    Float,
}

impl FromStr for SampleFormat {
    fn from_str(s: &str) -> Result<Self, Box<dyn Error>> {
        match s {
            "float" | "Float" => Ok(SampleFormat::Float),
            "int" | "Int" => Ok(SampleFormat::Int),
            _ => Err(format!("Unsupported sample format: {}", s).into()),
        }
    }

    type Err = Box<dyn Error>;
}

impl SampleFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            SampleFormat::Float => "float",
            SampleFormat::Int => "int",
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The PCM byte format the engine produces. Fixed when the engine opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// 1 or 2
    pub channels: u16,
    pub sample_format: SampleFormat,
    pub bits_per_sample: u16,
    pub big_endian: bool,
}

impl AudioFormat {
    /// Creates a new AudioFormat, rejecting layouts the encoder can't produce.
    pub fn new(
        sample_rate: u32,
        channels: u16,
        sample_format: SampleFormat,
        bits_per_sample: u16,
        big_endian: bool,
    ) -> Result<Self, Box<dyn Error>> {
        if sample_rate == 0 {
            return Err("Sample rate must be greater than 0".into());
        }
        if channels != 1 && channels != 2 {
            return Err(format!("Unsupported channel count: {}", channels).into());
        }
        let supported = match sample_format {
            SampleFormat::Int => matches!(bits_per_sample, 8 | 16 | 24 | 32),
            SampleFormat::Float => matches!(bits_per_sample, 32 | 64),
        };
        if !supported {
            return Err(format!(
                "Unsupported sample layout: {}-bit {}",
                bits_per_sample, sample_format
            )
            .into());
        }

        Ok(AudioFormat {
            sample_rate,
            channels,
            sample_format,
            bits_per_sample,
            big_endian,
        })
    }

    pub fn bytes_per_sample(&self) -> usize {
        self.bits_per_sample as usize / 8
    }

    /// The size of one frame (a sample for every channel) in bytes.
    pub fn frame_size(&self) -> usize {
        self.bytes_per_sample() * self.channels as usize
    }

    pub fn is_stereo(&self) -> bool {
        self.channels == 2
    }

    /// Interleaves and encodes the buffers into `out`, which must hold
    /// `left.len()` frames. `right` is ignored for mono output.
    pub fn encode(&self, left: &[f32], right: &[f32], out: &mut [u8]) {
        let width = self.bytes_per_sample();
        let mut chunks = out.chunks_exact_mut(width);
        for (i, l) in left.iter().enumerate() {
            if let Some(chunk) = chunks.next() {
                self.encode_sample(*l, chunk);
            }
            if self.is_stereo() {
                if let Some(chunk) = chunks.next() {
                    self.encode_sample(right.get(i).copied().unwrap_or(0.0), chunk);
                }
            }
        }
    }

    /// Encodes a single sample into `out`, which must be exactly one sample wide.
    fn encode_sample(&self, sample: f32, out: &mut [u8]) {
        match (self.sample_format, self.bits_per_sample) {
            (SampleFormat::Float, 64) => self.put(&(sample as f64).to_le_bytes(), out),
            (SampleFormat::Float, _) => self.put(&sample.to_le_bytes(), out),
            (SampleFormat::Int, 8) => {
                out[0] = ((clamp(sample) * 127.0).round() as i32 + 128) as u8;
            }
            (SampleFormat::Int, 16) => {
                let v = (clamp(sample) * i16::MAX as f32).round() as i16;
                self.put(&v.to_le_bytes(), out);
            }
            (SampleFormat::Int, 24) => {
                let v = (clamp(sample) as f64 * 8_388_607.0).round() as i32;
                self.put(&v.to_le_bytes()[..3], out);
            }
            (SampleFormat::Int, _) => {
                let v = (clamp(sample) as f64 * i32::MAX as f64).round() as i32;
                self.put(&v.to_le_bytes(), out);
            }
        }
    }

    /// Writes little endian bytes in the configured byte order.
    fn put(&self, le: &[u8], out: &mut [u8]) {
        if self.big_endian {
            for (dst, src) in out.iter_mut().zip(le.iter().rev()) {
                *dst = *src;
            }
        } else {
            out.copy_from_slice(le);
        }
    }

    /// Decodes one sample, exactly one sample wide, back to a float in [-1, 1].
    pub fn decode_sample(&self, bytes: &[u8]) -> f64 {
        let mut le = [0u8; 8];
        let width = bytes.len().min(8);
        if self.big_endian {
            for (dst, src) in le[..width].iter_mut().zip(bytes.iter().rev()) {
                *dst = *src;
            }
        } else {
            le[..width].copy_from_slice(&bytes[..width]);
        }

        match (self.sample_format, self.bits_per_sample) {
            (SampleFormat::Float, 64) => f64::from_le_bytes(le),
            (SampleFormat::Float, _) => f32::from_le_bytes([le[0], le[1], le[2], le[3]]) as f64,
            (SampleFormat::Int, 8) => (le[0] as i32 - 128) as f64 / 127.0,
            (SampleFormat::Int, 16) => i16::from_le_bytes([le[0], le[1]]) as f64 / i16::MAX as f64,
            (SampleFormat::Int, 24) => {
                // Sign-extend from the third byte.
                let v = i32::from_le_bytes([0, le[0], le[1], le[2]]) >> 8;
                v as f64 / 8_388_607.0
            }
            (SampleFormat::Int, _) => {
                i32::from_le_bytes([le[0], le[1], le[2], le[3]]) as f64 / i32::MAX as f64
            }
        }
    }
}

fn clamp(sample: f32) -> f32 {
    sample.clamp(-1.0, 1.0)
}

impl Default for AudioFormat {
    /// 44.1kHz, 16-bit signed little endian stereo
    fn default() -> Self {
        AudioFormat {
            sample_rate: 44100,
            channels: 2,
            sample_format: SampleFormat::Int,
            bits_per_sample: 16,
            big_endian: false,
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}Hz {}-bit {} {}ch {}",
            self.sample_rate,
            self.bits_per_sample,
            self.sample_format,
            self.channels,
            if self.big_endian { "BE" } else { "LE" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_format_from_str() {
        assert_eq!(
            SampleFormat::from_str("float").unwrap(),
            SampleFormat::Float
        );
        assert_eq!(SampleFormat::from_str("Int").unwrap(), SampleFormat::Int);
        assert!(SampleFormat::from_str("double").is_err());
    }

    #[test]
    fn test_format_validation() {
        assert!(AudioFormat::new(44100, 2, SampleFormat::Int, 24, false).is_ok());
        assert!(AudioFormat::new(0, 2, SampleFormat::Int, 16, false).is_err());
        assert!(AudioFormat::new(44100, 3, SampleFormat::Int, 16, false).is_err());
        assert!(AudioFormat::new(44100, 2, SampleFormat::Int, 12, false).is_err());
        assert!(AudioFormat::new(44100, 2, SampleFormat::Float, 16, false).is_err());
    }

    #[test]
    fn test_frame_size() {
        let format = AudioFormat::new(48000, 2, SampleFormat::Int, 24, false).unwrap();
        assert_eq!(6, format.frame_size());
        let format = AudioFormat::new(48000, 1, SampleFormat::Float, 64, false).unwrap();
        assert_eq!(8, format.frame_size());
    }

    #[test]
    fn test_encode_16_bit_little_endian() {
        let format = AudioFormat::default();
        let mut out = [0u8; 8];
        format.encode(&[1.0, -1.0], &[0.0, 2.0], &mut out);
        assert_eq!(i16::MAX.to_le_bytes(), [out[0], out[1]]);
        assert_eq!([0, 0], [out[2], out[3]]);
        assert_eq!((-i16::MAX).to_le_bytes(), [out[4], out[5]]);
        // Out of range samples clamp.
        assert_eq!(i16::MAX.to_le_bytes(), [out[6], out[7]]);
    }

    #[test]
    fn test_encode_big_endian_and_mono() {
        let format = AudioFormat::new(44100, 1, SampleFormat::Int, 16, true).unwrap();
        let mut out = [0u8; 2];
        format.encode(&[0.5], &[1.0], &mut out);
        assert_eq!(16384i16.to_be_bytes(), out);
    }

    #[test]
    fn test_encode_8_bit_is_unsigned() {
        let format = AudioFormat::new(44100, 1, SampleFormat::Int, 8, false).unwrap();
        let mut out = [0u8; 3];
        format.encode(&[0.0, 1.0, -1.0], &[], &mut out);
        assert_eq!([128, 255, 1], out);
    }

    #[test]
    fn test_decode_matches_encode() {
        for (format, bits) in [
            (SampleFormat::Int, 8),
            (SampleFormat::Int, 16),
            (SampleFormat::Int, 24),
            (SampleFormat::Int, 32),
            (SampleFormat::Float, 32),
            (SampleFormat::Float, 64),
        ] {
            for big_endian in [false, true] {
                let format = AudioFormat::new(44100, 1, format, bits, big_endian).unwrap();
                let mut out = vec![0u8; format.frame_size()];
                format.encode(&[-0.5], &[], &mut out);
                let decoded = format.decode_sample(&out);
                assert!((decoded + 0.5).abs() < 0.01, "{}: {}", format, decoded);
            }
        }
    }
}
