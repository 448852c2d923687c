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
use std::{error::Error, fmt, path::Path};

use crate::config;

pub mod cpal;
pub mod format;
pub mod mock;
pub mod pusher;
pub mod thread_priority;
pub mod wav;

pub use format::{AudioFormat, SampleFormat};
pub use pusher::{AudioPusher, PusherExit};

/// Errors raised by audio sinks.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Audio stream error: {0}")]
    Stream(String),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sink is closed")]
    Closed,

    #[error("Audio pusher thread panicked")]
    Panicked,
}

/// A destination for the engine's PCM bytes. Writes may block.
pub trait Sink: fmt::Display + Send {
    /// Writes PCM bytes in the format the sink was opened with.
    fn write(&mut self, bytes: &[u8]) -> Result<(), SinkError>;

    /// Flushes and releases the sink. Further writes fail.
    fn close(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Lists output devices known to cpal.
pub fn list_devices() -> Result<Vec<String>, Box<dyn Error>> {
    cpal::list()
}

/// Opens the configured output device.
pub fn get_sink(config: &config::Audio) -> Result<Box<dyn Sink>, SinkError> {
    let format = config
        .format()
        .map_err(|e| SinkError::Device(e.to_string()))?;
    let device = config.device();
    if device.starts_with("mock") {
        return Ok(Box::new(mock::Sink::new(device)));
    }
    let latency = config
        .latency()
        .map_err(|e| SinkError::Device(e.to_string()))?;
    Ok(Box::new(cpal::Sink::open(device, format, latency)?))
}

/// Opens a WAV file sink.
pub fn wav_sink(path: &Path, format: AudioFormat) -> Result<Box<dyn Sink>, SinkError> {
    Ok(Box::new(wav::Sink::create(path, format)?))
}
