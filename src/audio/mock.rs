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
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;
use tracing::info;

use super::SinkError;

/// A mock sink. Captures everything written to it. Clones share the capture.
#[derive(Clone)]
pub struct Sink {
    name: String,
    captured: Arc<Mutex<Vec<u8>>>,
    writes: Arc<AtomicUsize>,
    /// Writes fail once this many have succeeded.
    fail_after: Option<usize>,
    closed: Arc<AtomicBool>,
}

impl Sink {
    pub fn new(name: &str) -> Sink {
        Sink {
            name: name.to_string(),
            captured: Arc::new(Mutex::new(Vec::new())),
            writes: Arc::new(AtomicUsize::new(0)),
            fail_after: None,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A sink whose writes fail after `writes` successful ones.
    pub fn failing_after(name: &str, writes: usize) -> Sink {
        Sink {
            fail_after: Some(writes),
            ..Sink::new(name)
        }
    }

    /// The bytes written so far.
    pub fn captured(&self) -> Vec<u8> {
        self.captured.lock().clone()
    }

    pub fn captured_len(&self) -> usize {
        self.captured.lock().len()
    }

    /// The number of successful writes.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

impl super::Sink for Sink {
    fn write(&mut self, bytes: &[u8]) -> Result<(), SinkError> {
        if self.is_closed() {
            return Err(SinkError::Closed);
        }
        if self.fail_after.is_some_and(|limit| self.writes() >= limit) {
            return Err(SinkError::Device(format!("{} write failed", self.name)));
        }
        self.captured.lock().extend_from_slice(bytes);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.closed.store(true, Ordering::Relaxed);
        info!(device = self.name, bytes = self.captured_len(), "Mock sink closed.");
        Ok(())
    }
}

impl fmt::Display for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::Sink as _;

    #[test]
    fn test_captures_until_closed() {
        let mut sink = Sink::new("mock");
        let observer = sink.clone();
        sink.write(&[1, 2]).unwrap();
        sink.write(&[3]).unwrap();
        assert_eq!(vec![1, 2, 3], observer.captured());
        assert_eq!(2, observer.writes());

        sink.close().unwrap();
        assert!(observer.is_closed());
        assert!(matches!(sink.write(&[4]), Err(SinkError::Closed)));
    }

    #[test]
    fn test_failure_injection() {
        let mut sink = Sink::failing_after("mock", 1);
        sink.write(&[1]).unwrap();
        assert!(matches!(sink.write(&[2]), Err(SinkError::Device(_))));
        assert_eq!(vec![1], sink.captured());
    }
}
