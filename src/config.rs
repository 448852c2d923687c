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
use std::path::Path;

use ::config::{Config, File, FileFormat};
use serde::{Deserialize, Serialize};

mod audio;
mod engine;
mod error;
mod midi;

pub use self::audio::Audio;
pub use self::engine::Engine;
pub use self::error::ConfigError;
pub use self::midi::Midi;

/// The top level synthesizer configuration.
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct Synth {
    #[serde(default)]
    audio: Audio,
    #[serde(default)]
    engine: Engine,
    #[serde(default)]
    midi: Midi,
}

impl Synth {
    pub fn new(audio: Audio, engine: Engine, midi: Midi) -> Synth {
        Synth {
            audio,
            engine,
            midi,
        }
    }

    /// Parse the configuration from a YAML file.
    pub fn deserialize(path: &Path) -> Result<Synth, ConfigError> {
        Ok(Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize::<Synth>()?)
    }

    /// Parse the configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Synth, ConfigError> {
        Ok(Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize::<Synth>()?)
    }

    pub fn audio(&self) -> &Audio {
        &self.audio
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn midi(&self) -> &Midi {
        &self.midi
    }

    /// Renders the effective configuration, defaults included, as YAML.
    pub fn dump(&self) -> Result<String, ConfigError> {
        let resolved = Synth {
            audio: self.audio.resolved()?,
            engine: self.engine.resolved()?,
            midi: self.midi.clone(),
        };
        Ok(serde_yml::to_string(&resolved)?)
    }
}
