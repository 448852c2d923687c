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
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::ConfigError;
use crate::synth::resampler::Interpolation;

const DEFAULT_CONTROL_RATE: f32 = 147.0;
const DEFAULT_MAX_POLYPHONY: usize = 64;
const DEFAULT_MIDI_CHANNELS: usize = 16;
const DEFAULT_DEVICE_ID: u8 = 0x10;

/// Upper bound on the voice pool.
const MAX_POLYPHONY: usize = 1024;

/// A YAML representation of the synthesis engine settings.
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct Engine {
    /// Control cycles per second (default: 147)
    #[serde(skip_serializing_if = "Option::is_none")]
    control_rate: Option<f32>,

    /// The size of the voice pool (default: 64)
    #[serde(skip_serializing_if = "Option::is_none")]
    max_polyphony: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    midi_channels: Option<usize>,

    /// The device ID that system exclusive messages must address. 0x7F always matches.
    #[serde(skip_serializing_if = "Option::is_none")]
    device_id: Option<u8>,

    /// "point", "linear" or "lanczos" (default: "lanczos")
    #[serde(skip_serializing_if = "Option::is_none")]
    interpolation: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    reverb: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    chorus: Option<bool>,

    /// Automatic gain control on the master output.
    #[serde(skip_serializing_if = "Option::is_none")]
    agc: Option<bool>,
}

impl Engine {
    pub fn control_rate(&self) -> f32 {
        self.control_rate.unwrap_or(DEFAULT_CONTROL_RATE)
    }

    pub fn max_polyphony(&self) -> usize {
        self.max_polyphony.unwrap_or(DEFAULT_MAX_POLYPHONY)
    }

    pub fn midi_channels(&self) -> usize {
        self.midi_channels.unwrap_or(DEFAULT_MIDI_CHANNELS)
    }

    pub fn device_id(&self) -> u8 {
        self.device_id.unwrap_or(DEFAULT_DEVICE_ID)
    }

    pub fn interpolation(&self) -> Result<Interpolation, ConfigError> {
        match self.interpolation.as_deref() {
            Some(interpolation) => Interpolation::from_str(interpolation)
                .map_err(|e| ConfigError::InvalidEngine(e.to_string())),
            None => Ok(Interpolation::default()),
        }
    }

    pub fn reverb(&self) -> bool {
        self.reverb.unwrap_or(true)
    }

    pub fn chorus(&self) -> bool {
        self.chorus.unwrap_or(true)
    }

    pub fn agc(&self) -> bool {
        self.agc.unwrap_or(true)
    }

    /// Sets the voice pool size.
    pub fn with_polyphony(mut self, max_polyphony: usize) -> Engine {
        self.max_polyphony = Some(max_polyphony);
        self
    }

    /// Enables or disables the reverb, the chorus and the limiter.
    pub fn with_effects(mut self, reverb: bool, chorus: bool, agc: bool) -> Engine {
        self.reverb = Some(reverb);
        self.chorus = Some(chorus);
        self.agc = Some(agc);
        self
    }

    pub fn with_interpolation(mut self, interpolation: Interpolation) -> Engine {
        self.interpolation = Some(interpolation.as_str().to_string());
        self
    }

    pub fn with_control_rate(mut self, control_rate: f32) -> Engine {
        self.control_rate = Some(control_rate);
        self
    }

    /// Checks the settings against the output sample rate.
    pub fn validate(&self, sample_rate: u32) -> Result<(), ConfigError> {
        let control_rate = self.control_rate();
        if !(control_rate > 0.0 && control_rate <= sample_rate as f32) {
            return Err(ConfigError::InvalidEngine(format!(
                "control rate {} must be between 0 and the sample rate {}",
                control_rate, sample_rate
            )));
        }
        let polyphony = self.max_polyphony();
        if polyphony == 0 || polyphony > MAX_POLYPHONY {
            return Err(ConfigError::InvalidEngine(format!(
                "max polyphony {} must be between 1 and {}",
                polyphony, MAX_POLYPHONY
            )));
        }
        let channels = self.midi_channels();
        if channels == 0 || channels > 16 {
            return Err(ConfigError::InvalidEngine(format!(
                "MIDI channel count {} must be between 1 and 16",
                channels
            )));
        }
        if self.device_id() > 0x7F {
            return Err(ConfigError::InvalidEngine(format!(
                "device ID {:#x} is not a 7-bit value",
                self.device_id()
            )));
        }
        self.interpolation()?;
        Ok(())
    }

    /// Returns a copy with every default filled in.
    pub fn resolved(&self) -> Result<Engine, ConfigError> {
        Ok(Engine {
            control_rate: Some(self.control_rate()),
            max_polyphony: Some(self.max_polyphony()),
            midi_channels: Some(self.midi_channels()),
            device_id: Some(self.device_id()),
            interpolation: Some(self.interpolation()?.as_str().to_string()),
            reverb: Some(self.reverb()),
            chorus: Some(self.chorus()),
            agc: Some(self.agc()),
        })
    }
}

#[cfg(test)]
mod tests {
    use config::{Config, File, FileFormat};

    use super::*;

    fn parse(yaml: &str) -> Engine {
        Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let engine = Engine::default();
        assert_eq!(147.0, engine.control_rate());
        assert_eq!(64, engine.max_polyphony());
        assert_eq!(16, engine.midi_channels());
        assert_eq!(0x10, engine.device_id());
        assert_eq!(Interpolation::Lanczos, engine.interpolation().unwrap());
        assert!(engine.reverb() && engine.chorus() && engine.agc());
        assert!(engine.validate(44100).is_ok());
    }

    #[test]
    fn test_engine_deserialize() {
        let engine = parse(
            r#"
            control_rate: 200
            max_polyphony: 8
            interpolation: linear
            reverb: false
            agc: false
        "#,
        );
        assert_eq!(200.0, engine.control_rate());
        assert_eq!(8, engine.max_polyphony());
        assert_eq!(Interpolation::Linear, engine.interpolation().unwrap());
        assert!(!engine.reverb());
        assert!(engine.chorus());
        assert!(!engine.agc());
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            Engine::default().with_polyphony(0).validate(44100),
            Err(ConfigError::InvalidEngine(_))
        ));
        assert!(matches!(
            Engine::default().with_control_rate(0.0).validate(44100),
            Err(ConfigError::InvalidEngine(_))
        ));
        assert!(matches!(
            parse("interpolation: cubic").validate(44100),
            Err(ConfigError::InvalidEngine(_))
        ));
        assert!(matches!(
            parse("midi_channels: 17").validate(44100),
            Err(ConfigError::InvalidEngine(_))
        ));
    }
}
