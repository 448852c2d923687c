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
use serde::{Deserialize, Serialize};

/// A YAML representation of the live MIDI input.
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct Midi {
    /// A substring of the midir input port name.
    #[serde(skip_serializing_if = "Option::is_none")]
    input: Option<String>,
}

impl Midi {
    pub fn new(input: &str) -> Midi {
        Midi {
            input: Some(input.to_string()),
        }
    }

    pub fn input(&self) -> Option<&str> {
        self.input.as_deref()
    }
}
