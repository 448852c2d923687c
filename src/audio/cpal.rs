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
    error::Error,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::bounded;
use tracing::{error, info, span, Level};

use super::{AudioFormat, SampleFormat, SinkError};

/// How long a blocked write waits before checking the ring again.
const WRITE_POLL: Duration = Duration::from_millis(1);

/// Lock-free single producer, single consumer ring of f32 samples. Samples are
/// stored as their bit patterns.
struct CircularBuffer {
    buffer: Box<[AtomicU32]>,
    /// Capacity (must be power of 2)
    capacity: usize,
    read_pos: AtomicUsize,
    write_pos: AtomicUsize,
}

impl CircularBuffer {
    fn new(capacity: usize) -> Self {
        let cap = capacity.next_power_of_two();
        Self {
            buffer: (0..cap).map(|_| AtomicU32::new(0)).collect(),
            capacity: cap,
            read_pos: AtomicUsize::new(0),
            write_pos: AtomicUsize::new(0),
        }
    }

    /// Get number of samples available to read
    #[inline]
    fn available(&self) -> usize {
        let write = self.write_pos.load(Ordering::Acquire);
        let read = self.read_pos.load(Ordering::Acquire);
        if write >= read {
            write - read
        } else {
            self.capacity - read + write
        }
    }

    #[inline]
    fn space(&self) -> usize {
        self.capacity - self.available() - 1
    }

    /// Returns the number of samples actually written.
    fn write(&self, samples: &[f32]) -> usize {
        let to_write = self.space().min(samples.len());
        let write = self.write_pos.load(Ordering::Acquire);
        let mask = self.capacity - 1;
        for (i, sample) in samples[..to_write].iter().enumerate() {
            self.buffer[(write + i) & mask].store(sample.to_bits(), Ordering::Relaxed);
        }
        self.write_pos
            .store((write + to_write) & mask, Ordering::Release);
        to_write
    }

    /// Returns the number of samples actually read.
    fn read(&self, output: &mut [f32]) -> usize {
        let to_read = self.available().min(output.len());
        let read = self.read_pos.load(Ordering::Acquire);
        let mask = self.capacity - 1;
        for (i, sample) in output[..to_read].iter_mut().enumerate() {
            *sample = f32::from_bits(self.buffer[(read + i) & mask].load(Ordering::Relaxed));
        }
        self.read_pos
            .store((read + to_read) & mask, Ordering::Release);
        to_read
    }
}

/// f32 callback: read directly into the cpal buffer.
fn create_f32_callback(
    ring: Arc<CircularBuffer>,
) -> impl FnMut(&mut [f32], &cpal::OutputCallbackInfo) + Send + 'static {
    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
        let read = ring.read(data);
        // Zero-fill any shortfall
        data[read..].fill(0.0);
    }
}

/// Integer callback: read from the ring and convert.
fn create_int_callback<T: cpal::Sample + cpal::FromSample<f32>>(
    ring: Arc<CircularBuffer>,
) -> impl FnMut(&mut [T], &cpal::OutputCallbackInfo) + Send + 'static {
    let mut temp: Vec<f32> = Vec::new();
    move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
        temp.resize(data.len(), 0.0);
        let read = ring.read(&mut temp);
        temp[read..].fill(0.0);
        for (dst, &src) in data.iter_mut().zip(temp.iter()) {
            *dst = T::from_sample(src);
        }
    }
}

/// Streams the engine's output to a cpal device through a ring buffer sized by the
/// configured latency. Writes block while the ring is full.
pub struct Sink {
    name: String,
    format: AudioFormat,
    ring: Arc<CircularBuffer>,
    running: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
    stream_thread: Option<thread::JoinHandle<()>>,
    scratch: Vec<f32>,
}

impl Sink {
    /// Opens the named device and starts its output stream.
    pub fn open(name: &str, format: AudioFormat, latency: Duration) -> Result<Sink, SinkError> {
        let span = span!(Level::INFO, "cpal sink");
        let _enter = span.enter();

        let device = find_device(name)?;
        let capacity = (latency.as_secs_f64() * format.sample_rate as f64) as usize
            * format.channels as usize;
        let ring = Arc::new(CircularBuffer::new(capacity.max(1024)));
        let running = Arc::new(AtomicBool::new(true));
        let failed = Arc::new(AtomicBool::new(false));

        // Streams aren't Send on every host, so the stream lives on its own thread.
        let (ready_tx, ready_rx) = bounded::<Result<(), SinkError>>(1);
        let stream_thread = {
            let ring = ring.clone();
            let running = running.clone();
            let failed = failed.clone();
            thread::Builder::new()
                .name("softsynth-cpal".to_string())
                .spawn(move || {
                    let stream = match build_stream(&device, format, ring, failed) {
                        Ok(stream) => stream,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    if let Err(e) = stream.play() {
                        let _ = ready_tx.send(Err(SinkError::Stream(e.to_string())));
                        return;
                    }
                    let _ = ready_tx.send(Ok(()));

                    while running.load(Ordering::Relaxed) {
                        thread::sleep(Duration::from_millis(50));
                    }
                })?
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = stream_thread.join();
                return Err(e);
            }
            Err(_) => return Err(SinkError::Stream("stream thread exited".to_string())),
        }

        info!(device = name, format = %format, "CPAL output stream started.");
        Ok(Sink {
            name: name.to_string(),
            format,
            ring,
            running,
            failed,
            stream_thread: Some(stream_thread),
            scratch: Vec::new(),
        })
    }

    /// Stops the stream thread.
    fn shutdown(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.stream_thread.take() {
            let _ = handle.join();
        }
    }
}

impl super::Sink for Sink {
    fn write(&mut self, bytes: &[u8]) -> Result<(), SinkError> {
        let sample_size = self.format.bytes_per_sample();
        self.scratch.clear();
        self.scratch.extend(
            bytes
                .chunks_exact(sample_size)
                .map(|sample| self.format.decode_sample(sample) as f32),
        );

        let mut offset = 0;
        while offset < self.scratch.len() {
            if !self.running.load(Ordering::Relaxed) {
                return Err(SinkError::Closed);
            }
            if self.failed.load(Ordering::Relaxed) {
                return Err(SinkError::Stream(format!("{} stream failed", self.name)));
            }
            let written = self.ring.write(&self.scratch[offset..]);
            offset += written;
            if written == 0 {
                spin_sleep::sleep(WRITE_POLL);
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.shutdown();
        info!(device = self.name, "CPAL output stream stopped.");
        Ok(())
    }
}

impl Drop for Sink {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Display for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.format)
    }
}

fn build_stream(
    device: &cpal::Device,
    format: AudioFormat,
    ring: Arc<CircularBuffer>,
    failed: Arc<AtomicBool>,
) -> Result<cpal::Stream, SinkError> {
    let config = cpal::StreamConfig {
        channels: format.channels,
        sample_rate: format.sample_rate,
        buffer_size: cpal::BufferSize::Default,
    };
    let on_error = move |err: cpal::StreamError| {
        error!("CPAL output stream error: {}", err);
        failed.store(true, Ordering::Relaxed);
    };

    let stream = match (format.sample_format, format.bits_per_sample) {
        (SampleFormat::Float, _) => {
            device.build_output_stream(&config, create_f32_callback(ring), on_error, None)
        }
        (SampleFormat::Int, 8 | 16) => device.build_output_stream(
            &config,
            create_int_callback::<i16>(ring),
            on_error,
            None,
        ),
        (SampleFormat::Int, _) => device.build_output_stream(
            &config,
            create_int_callback::<i32>(ring),
            on_error,
            None,
        ),
    };
    stream.map_err(|e| SinkError::Stream(e.to_string()))
}

/// Finds an output device by name. "default" picks the default host's default output.
fn find_device(name: &str) -> Result<cpal::Device, SinkError> {
    // Suppress noisy output here.
    let _shh_stdout = shh::stdout()?;
    let _shh_stderr = shh::stderr()?;

    if name == "default" {
        return cpal::default_host()
            .default_output_device()
            .ok_or_else(|| SinkError::Device("no default output device".to_string()));
    }

    for host_id in cpal::available_hosts() {
        let host = cpal::host_from_id(host_id).map_err(|e| SinkError::Device(e.to_string()))?;
        let devices = match host.output_devices() {
            Ok(devices) => devices,
            Err(e) => {
                error!(
                    err = e.to_string(),
                    host = host_id.name(),
                    "Unable to list devices for host"
                );
                continue;
            }
        };
        for device in devices {
            if device.name().map(|n| n.trim() == name).unwrap_or(false) {
                return Ok(device);
            }
        }
    }
    Err(SinkError::Device(format!("no device found with name {}", name)))
}

/// Lists output devices with their maximum channel count.
pub fn list() -> Result<Vec<String>, Box<dyn Error>> {
    // Suppress noisy output here.
    let _shh_stdout = shh::stdout()?;
    let _shh_stderr = shh::stderr()?;

    let mut devices: Vec<String> = Vec::new();
    for host_id in cpal::available_hosts() {
        let host_devices = match cpal::host_from_id(host_id)?.output_devices() {
            Ok(host_devices) => host_devices,
            Err(e) => {
                error!(
                    err = e.to_string(),
                    host = host_id.name(),
                    "Unable to list devices for host"
                );
                continue;
            }
        };

        for device in host_devices {
            let Ok(output_configs) = device.supported_output_configs() else {
                continue;
            };
            let max_channels = output_configs
                .map(|config| config.channels())
                .max()
                .unwrap_or(0);
            if max_channels > 0 {
                devices.push(format!(
                    "{} (Channels={}) ({})",
                    device.name()?,
                    max_channels,
                    host_id.name()
                ));
            }
        }
    }

    devices.sort();
    Ok(devices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_wraps() {
        let ring = CircularBuffer::new(8);
        assert_eq!(7, ring.space());
        assert_eq!(5, ring.write(&[1.0, 2.0, 3.0, 4.0, 5.0]));

        let mut out = [0.0; 4];
        assert_eq!(4, ring.read(&mut out));
        assert_eq!([1.0, 2.0, 3.0, 4.0], out);

        assert_eq!(6, ring.write(&[6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0]));
        let mut out = [0.0; 8];
        assert_eq!(7, ring.read(&mut out));
        assert_eq!([5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0], out[..7]);
        assert_eq!(0, ring.available());
    }
}
