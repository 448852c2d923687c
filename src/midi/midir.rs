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
use std::{error::Error, fmt, mem};

use midir::{MidiInput, MidiInputConnection, MidiInputPort};
use tracing::{debug, info, span, warn, Level};

use super::MidiEvent;

/// A live MIDI input that forwards decoded events to a handler.
pub struct Input {
    name: String,
    port: MidiInputPort,
    connection: Option<MidiInputConnection<()>>,
}

impl fmt::Display for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (midir)", self.name)
    }
}

impl Input {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Starts forwarding events from the port to `handler`. Raw messages that don't
    /// decode are dropped.
    pub fn connect<F>(&mut self, mut handler: F) -> Result<(), Box<dyn Error>>
    where
        F: FnMut(MidiEvent) + Send + 'static,
    {
        let span = span!(Level::INFO, "connect input (midir)");
        let _enter = span.enter();

        if self.connection.is_some() {
            return Err("Already connected.".into());
        }

        info!(device = self.name, "Listening for MIDI events.");
        let input = MidiInput::new("softsynth input")?;
        self.connection = Some(input.connect(
            &self.port,
            "softsynth input watcher",
            move |_, raw_event, _| match MidiEvent::parse(raw_event) {
                Ok(Some(event)) => handler(event),
                Ok(None) => {}
                Err(e) => debug!(err = e.to_string(), "Dropping undecodable MIDI message."),
            },
            (),
        )?);

        Ok(())
    }

    /// Stops forwarding events.
    pub fn disconnect(&mut self) {
        if let Some(connection) = self.connection.take() {
            mem::drop(connection.close());
            info!(device = self.name, "Stopped listening for MIDI events.");
        }
    }
}

impl Drop for Input {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn list_ports() -> Result<Vec<(String, MidiInputPort)>, Box<dyn Error>> {
    let input = MidiInput::new("softsynth input listing")?;
    let mut ports = Vec::new();
    for port in input.ports() {
        match input.port_name(&port) {
            Ok(name) => ports.push((name, port)),
            Err(e) => warn!(err = e.to_string(), "Unable to read MIDI port name."),
        }
    }
    Ok(ports)
}

/// Lists the names of the available input ports.
pub fn list() -> Result<Vec<String>, Box<dyn Error>> {
    Ok(list_ports()?.into_iter().map(|(name, _)| name).collect())
}

/// Gets the single input port whose name contains `name`.
pub fn get(name: &str) -> Result<Input, Box<dyn Error>> {
    let mut matches = list_ports()?
        .into_iter()
        .filter(|(port_name, _)| port_name.contains(name))
        .collect::<Vec<(String, MidiInputPort)>>();

    if matches.is_empty() {
        return Err(format!("no MIDI input found with name {}", name).into());
    }
    if matches.len() > 1 {
        return Err(format!(
            "found too many MIDI inputs that match ({}), use a less ambiguous name",
            matches
                .iter()
                .map(|(port_name, _)| port_name.clone())
                .collect::<Vec<String>>()
                .join(", ")
        )
        .into());
    }

    let (name, port) = matches.swap_remove(0);
    Ok(Input {
        name,
        port,
        connection: None,
    })
}
