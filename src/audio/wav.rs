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
    fmt,
    fs::File,
    io::BufWriter,
    path::{Path, PathBuf},
};

use hound::{WavSpec, WavWriter};
use tracing::info;

use super::{AudioFormat, SampleFormat, SinkError};

/// Writes the engine's output to a WAV file.
///
/// The PCM bytes are decoded and handed to hound sample by sample, so any engine
/// byte order works. 64-bit float output is stored as 32-bit float.
pub struct Sink {
    path: PathBuf,
    format: AudioFormat,
    writer: Option<WavWriter<BufWriter<File>>>,
}

impl Sink {
    pub fn create(path: &Path, format: AudioFormat) -> Result<Sink, SinkError> {
        let spec = WavSpec {
            channels: format.channels,
            sample_rate: format.sample_rate,
            bits_per_sample: match format.sample_format {
                SampleFormat::Float => 32,
                SampleFormat::Int => format.bits_per_sample,
            },
            sample_format: match format.sample_format {
                SampleFormat::Float => hound::SampleFormat::Float,
                SampleFormat::Int => hound::SampleFormat::Int,
            },
        };
        let writer = WavWriter::create(path, spec)?;
        info!(path = %path.display(), format = %format, "Writing WAV file.");
        Ok(Sink {
            path: path.to_path_buf(),
            format,
            writer: Some(writer),
        })
    }
}

impl super::Sink for Sink {
    fn write(&mut self, bytes: &[u8]) -> Result<(), SinkError> {
        let writer = self.writer.as_mut().ok_or(SinkError::Closed)?;
        let sample_size = self.format.bytes_per_sample();
        for sample in bytes.chunks_exact(sample_size) {
            let value = self.format.decode_sample(sample);
            match self.format.sample_format {
                SampleFormat::Float => writer.write_sample(value as f32)?,
                SampleFormat::Int => {
                    let max = ((1i64 << (self.format.bits_per_sample - 1)) - 1) as f64;
                    writer.write_sample((value * max).round() as i32)?
                }
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
            info!(path = %self.path.display(), "WAV file finalized.");
        }
        Ok(())
    }
}

impl fmt::Display for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.path.display(), self.format)
    }
}
