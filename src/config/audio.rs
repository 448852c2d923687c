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
use std::{str::FromStr, time::Duration};

use duration_string::DurationString;
use serde::{Deserialize, Serialize};

use super::error::ConfigError;
use crate::audio::{AudioFormat, SampleFormat};

const DEFAULT_DEVICE: &str = "default";
const DEFAULT_SAMPLE_RATE: u32 = 44100;
const DEFAULT_CHANNELS: u16 = 2;
const DEFAULT_BITS_PER_SAMPLE: u16 = 16;
const DEFAULT_LATENCY: Duration = Duration::from_millis(100);

/// A YAML representation of the audio output configuration.
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct Audio {
    /// The cpal output device, or "default".
    #[serde(skip_serializing_if = "Option::is_none")]
    device: Option<String>,

    /// Output sample rate in Hz (default: 44100)
    #[serde(skip_serializing_if = "Option::is_none")]
    sample_rate: Option<u32>,

    /// 1 or 2 (default: 2)
    #[serde(skip_serializing_if = "Option::is_none")]
    channels: Option<u16>,

    /// Output bits per sample (default: 16)
    #[serde(skip_serializing_if = "Option::is_none")]
    bits_per_sample: Option<u16>,

    /// Output sample format, "int" or "float" (default: "int")
    #[serde(skip_serializing_if = "Option::is_none")]
    sample_format: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    big_endian: Option<bool>,

    /// How much audio the sink may buffer ahead of the device (default: 100ms)
    #[serde(skip_serializing_if = "Option::is_none")]
    latency: Option<String>,
}

impl Audio {
    /// New will create a new Audio configuration with defaults for everything but
    /// the device.
    pub fn new(device: &str) -> Audio {
        Audio {
            device: Some(device.to_string()),
            ..Default::default()
        }
    }

    pub fn device(&self) -> &str {
        self.device.as_deref().unwrap_or(DEFAULT_DEVICE)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE)
    }

    pub fn channels(&self) -> u16 {
        self.channels.unwrap_or(DEFAULT_CHANNELS)
    }

    pub fn bits_per_sample(&self) -> u16 {
        self.bits_per_sample.unwrap_or(DEFAULT_BITS_PER_SAMPLE)
    }

    /// Returns the output sample format (default: Int)
    pub fn sample_format(&self) -> Result<SampleFormat, ConfigError> {
        match self.sample_format.as_deref() {
            Some(format) => SampleFormat::from_str(format)
                .map_err(|e| ConfigError::UnsupportedFormat(e.to_string())),
            None => Ok(SampleFormat::Int),
        }
    }

    pub fn big_endian(&self) -> bool {
        self.big_endian.unwrap_or(false)
    }

    /// Returns the sink latency from the configuration.
    pub fn latency(&self) -> Result<Duration, ConfigError> {
        match &self.latency {
            Some(latency) => Ok(DurationString::from_string(latency.clone())
                .map_err(|e| ConfigError::Duration(format!("{}: {}", latency, e)))?
                .into()),
            None => Ok(DEFAULT_LATENCY),
        }
    }

    /// Returns the PCM format the engine will produce.
    pub fn format(&self) -> Result<AudioFormat, ConfigError> {
        AudioFormat::new(
            self.sample_rate(),
            self.channels(),
            self.sample_format()?,
            self.bits_per_sample(),
            self.big_endian(),
        )
        .map_err(|e| ConfigError::UnsupportedFormat(e.to_string()))
    }

    /// Returns a copy with every default filled in.
    pub fn resolved(&self) -> Result<Audio, ConfigError> {
        let latency = self.latency()?;
        Ok(Audio {
            device: Some(self.device().to_string()),
            sample_rate: Some(self.sample_rate()),
            channels: Some(self.channels()),
            bits_per_sample: Some(self.bits_per_sample()),
            sample_format: Some(self.sample_format()?.to_string()),
            big_endian: Some(self.big_endian()),
            latency: Some(format!("{}ms", latency.as_millis())),
        })
    }
}
