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
use std::{error::Error, io, path::PathBuf, sync::Arc, time::Duration};

use clap::{crate_version, Parser, Subcommand};
use duration_string::DurationString;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use softsynth::{
    audio,
    config::Synth,
    midi::{self, MidiEvent},
    synth::{Synthesizer, WaveformBank},
};

/// Renders when no length is given.
const DEFAULT_RENDER_LENGTH: Duration = Duration::from_secs(6);

/// GM1 system on.
const GM_SYSTEM_ON: [u8; 6] = [0xF0, 0x7E, 0x7F, 0x09, 0x01, 0xF7];

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A software MIDI synthesizer."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available audio output devices.
    Devices {},
    /// Lists the available MIDI input devices.
    MidiDevices {},
    /// Plays a MIDI input through an audio device until Enter is pressed.
    Play {
        /// The path to the synthesizer config.
        config_path: PathBuf,
    },
    /// Renders a short demo sequence into a WAV file.
    Render {
        /// The path to the synthesizer config.
        config_path: PathBuf,
        /// The WAV file to write.
        output_path: PathBuf,
        /// How much audio to render, e.g. 10s.
        #[arg[short, long]]
        length: Option<String>,
    },
    /// Prints the effective configuration.
    Config {
        /// The path to the synthesizer config.
        config_path: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices {} => {
            let devices = audio::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::MidiDevices {} => {
            let devices = midi::list_inputs()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Play { config_path } => play(config_path)?,
        Commands::Render {
            config_path,
            output_path,
            length,
        } => {
            let length: Duration = match length {
                Some(length) => DurationString::from_string(length)?.into(),
                None => DEFAULT_RENDER_LENGTH,
            };
            render(config_path, output_path, length)?
        }
        Commands::Config { config_path } => {
            let config = Synth::deserialize(&config_path)?;
            print!("{}", config.dump()?);
        }
    }

    Ok(())
}

fn play(config_path: PathBuf) -> Result<(), Box<dyn Error>> {
    let config = Synth::deserialize(&config_path)?;
    let mut synth = Synthesizer::open_configured(&config, Arc::new(WaveformBank::new()))?;

    let mut input = match config.midi().input() {
        Some(name) => {
            let mut input = midi::get_input(name)?;
            let submitter = synth.submitter();
            input.connect(move |event| {
                if let Err(e) = submitter.submit(None, event) {
                    error!(err = %e, "Unable to submit MIDI event.");
                }
            })?;
            Some(input)
        }
        None => None,
    };

    println!("Playing. Press Enter to stop.");
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;

    if let Some(input) = input.as_mut() {
        input.disconnect();
    }
    if let Ok(exit) = synth.exit_notifications().try_recv() {
        info!(exit = ?exit, "Audio output ended early.");
    }
    synth.close()?;
    Ok(())
}

/// Queues a short arpeggio over a drum pattern, then a held chord.
fn queue_demo(synth: &Synthesizer) -> Result<(), Box<dyn Error>> {
    const BEAT_US: u64 = 250_000;

    synth.submit_raw(Some(0), &GM_SYSTEM_ON)?;
    synth.submit(Some(1), MidiEvent::control_change(0, 91, 80))?;
    synth.submit(Some(1), MidiEvent::control_change(0, 93, 40))?;
    synth.submit(Some(1), MidiEvent::program_change(1, 16))?;

    for (beat, key) in [60u8, 64, 67, 72, 67, 64, 60, 55].into_iter().enumerate() {
        let start = 10_000 + beat as u64 * BEAT_US;
        synth.submit(Some(start), MidiEvent::note_on(0, key, 100))?;
        synth.submit(Some(start + BEAT_US * 4 / 5), MidiEvent::note_off(0, key, 0))?;

        let drum = if beat % 2 == 0 { 36 } else { 38 };
        synth.submit(Some(start), MidiEvent::note_on(9, drum, 110))?;
        synth.submit(Some(start + BEAT_US / 2), MidiEvent::note_off(9, drum, 0))?;
    }

    let chord_start = 10_000 + 8 * BEAT_US;
    for key in [48u8, 55, 60, 64] {
        synth.submit(Some(chord_start), MidiEvent::note_on(1, key, 90))?;
        synth.submit(Some(chord_start + 6 * BEAT_US), MidiEvent::note_off(1, key, 0))?;
    }
    Ok(())
}

fn render(
    config_path: PathBuf,
    output_path: PathBuf,
    length: Duration,
) -> Result<(), Box<dyn Error>> {
    let config = Synth::deserialize(&config_path)?;
    let format = config.audio().format()?;
    let (mut synth, mut mixer) =
        Synthesizer::open_stream(config.engine(), format, Arc::new(WaveformBank::new()))?;
    queue_demo(&synth)?;

    let mut sink = audio::wav_sink(&output_path, format)?;
    let total_frames = (length.as_secs_f64() * format.sample_rate as f64) as usize;
    let mut chunk = vec![0u8; mixer.frames_per_cycle() * format.frame_size()];
    let mut rendered = 0;
    while rendered < total_frames {
        let frames = (total_frames - rendered).min(mixer.frames_per_cycle());
        let bytes = &mut chunk[..frames * format.frame_size()];
        mixer.produce(bytes);
        sink.write(bytes)?;
        rendered += frames;
    }
    sink.close()?;
    synth.close()?;

    info!(path = %output_path.display(), frames = rendered, "Render finished.");
    println!("Rendered {:?} to {}.", length, output_path.display());
    Ok(())
}
