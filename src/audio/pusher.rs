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
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use crossbeam_channel::Sender;
use tracing::{error, info, span, Level};

use super::{thread_priority, Sink, SinkError};
use crate::synth::mixer::{MainMixer, SilenceGate};

/// How the pusher thread ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PusherExit {
    Stopped,
    /// The sink failed and the engine closed.
    Failed(String),
}

/// Moves audio from the mixer to a sink on a dedicated thread.
///
/// Each iteration renders one control period and writes it to the sink. While the
/// mixer's output is detached for silence the thread waits on the gate instead,
/// advancing the engine clock by the time spent waiting.
pub struct AudioPusher {
    running: Arc<AtomicBool>,
    gate: Arc<SilenceGate>,
    handle: Option<thread::JoinHandle<Result<Box<dyn Sink>, SinkError>>>,
}

impl AudioPusher {
    /// Starts the pusher thread. Exactly one [PusherExit] is sent on `exit_tx` when
    /// the thread ends.
    pub fn start(
        mut mixer: MainMixer,
        mut sink: Box<dyn Sink>,
        exit_tx: Sender<PusherExit>,
    ) -> io::Result<AudioPusher> {
        let running = Arc::new(AtomicBool::new(true));
        let gate = mixer.gate().clone();

        let handle = {
            let running = running.clone();
            let gate = gate.clone();
            thread::Builder::new()
                .name("softsynth-pusher".to_string())
                .spawn(move || {
                    let span = span!(Level::INFO, "audio pusher");
                    let _enter = span.enter();

                    if let Some(priority) = thread_priority::pusher_thread_priority() {
                        thread_priority::configure_pusher_thread_priority(
                            priority,
                            thread_priority::rt_audio_enabled(),
                        );
                    }

                    let frames = mixer.frames_per_cycle();
                    let format = mixer.format();
                    let chunk_duration =
                        Duration::from_secs_f64(frames as f64 / format.sample_rate as f64);
                    let mut chunk = vec![0u8; frames * format.frame_size()];
                    info!(sink = %sink, frames, "Audio pusher started.");

                    while running.load(Ordering::Relaxed) {
                        if gate.is_silent() {
                            if !gate.wait(chunk_duration) {
                                mixer.skip(frames);
                            }
                            continue;
                        }

                        mixer.produce(&mut chunk);
                        if let Err(e) = sink.write(&chunk) {
                            error!(err = %e, sink = %sink, "Audio sink failed, closing engine.");
                            mixer.mark_closed();
                            let _ = exit_tx.send(PusherExit::Failed(e.to_string()));
                            return Err(e);
                        }
                    }

                    info!("Audio pusher stopped.");
                    let _ = exit_tx.send(PusherExit::Stopped);
                    Ok(sink)
                })?
        };

        Ok(AudioPusher {
            running,
            gate,
            handle: Some(handle),
        })
    }

    /// Returns true while the pusher thread is running.
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stops the thread and hands back the sink, or the error that ended the thread.
    pub fn stop(&mut self) -> Result<Box<dyn Sink>, SinkError> {
        self.running.store(false, Ordering::Relaxed);
        self.gate.wake();
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| SinkError::Panicked)?,
            None => Err(SinkError::Closed),
        }
    }
}

impl Drop for AudioPusher {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let _ = self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use crossbeam_channel::unbounded;

    use super::*;
    use crate::{
        audio::{mock, AudioFormat},
        config,
        synth::soundbank::WaveformBank,
        testutil::eventually,
    };

    fn test_mixer() -> MainMixer {
        let (mixer, _) = MainMixer::new(
            &config::Engine::default(),
            AudioFormat::default(),
            Arc::new(WaveformBank::new()),
        )
        .unwrap();
        mixer
    }

    #[test]
    fn test_stop_returns_sink() {
        let sink = mock::Sink::new("mock");
        let observer = sink.clone();
        let (exit_tx, exit_rx) = unbounded();

        let mut pusher = AudioPusher::start(test_mixer(), Box::new(sink), exit_tx).unwrap();
        eventually(|| observer.writes() > 0, "pusher never wrote to the sink");
        assert!(pusher.is_running());

        let sink = pusher.stop().unwrap();
        assert_eq!("mock (Mock)", sink.to_string());
        assert_eq!(Ok(PusherExit::Stopped), exit_rx.recv_timeout(Duration::from_secs(1)));
        assert!(!pusher.is_running());
        assert_eq!(0, observer.captured_len() % AudioFormat::default().frame_size());
    }

    #[test]
    fn test_sink_failure_closes_engine() {
        let (mixer, state) = MainMixer::new(
            &config::Engine::default(),
            AudioFormat::default(),
            Arc::new(WaveformBank::new()),
        )
        .unwrap();
        let sink = mock::Sink::failing_after("mock", 2);
        let observer = sink.clone();
        let (exit_tx, exit_rx) = unbounded();

        let mut pusher = AudioPusher::start(mixer, Box::new(sink), exit_tx).unwrap();
        let exit = exit_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(exit, PusherExit::Failed(_)));
        assert_eq!(2, observer.writes());
        assert!(!state.lock().open);
        assert!(matches!(pusher.stop(), Err(SinkError::Device(_))));
    }
}
