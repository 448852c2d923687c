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

//! External post-processors for the voices of a MIDI channel.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// Identifies a registered channel mixer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MixerId(pub(crate) u64);

/// Post-processes the isolated output of a channel's voices.
///
/// Voices routed to a mixer render into a private left/right pair. The mixer then
/// processes that pair in place and the result is summed into the dry output,
/// bypassing reverb and chorus.
pub trait ChannelMixer: Send {
    /// Processes `len` frames of the left/right buffers in place. Returning false
    /// marks the mixer as finished and removes it at the end of the cycle.
    fn process(&mut self, buffers: &mut [&mut [f32]], len: usize) -> bool;

    /// Called once when the engine drops the mixer.
    fn close(&mut self) {}
}

/// Engine-side bookkeeping for a registered mixer. Only a weak reference is held:
/// the owner controls the mixer's lifetime.
pub(crate) struct MixerEntry {
    pub id: MixerId,
    pub channel: usize,
    pub mixer: Weak<Mutex<dyn ChannelMixer>>,
    /// Set by `stop_mixer`. The entry is removed once no voice uses it.
    pub stopped: bool,
}

impl MixerEntry {
    pub fn new(id: MixerId, channel: usize, mixer: &Arc<Mutex<dyn ChannelMixer>>) -> MixerEntry {
        MixerEntry {
            id,
            channel,
            mixer: Arc::downgrade(mixer),
            stopped: false,
        }
    }

    /// Returns true if the owner has dropped the mixer.
    pub fn is_orphaned(&self) -> bool {
        self.mixer.strong_count() == 0
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Scales its input and counts calls. Finishes after `limit` calls if set.
    pub struct GainMixer {
        pub gain: f32,
        pub calls: usize,
        pub limit: Option<usize>,
        pub closed: bool,
    }

    impl GainMixer {
        pub fn new(gain: f32) -> GainMixer {
            GainMixer {
                gain,
                calls: 0,
                limit: None,
                closed: false,
            }
        }
    }

    impl ChannelMixer for GainMixer {
        fn process(&mut self, buffers: &mut [&mut [f32]], len: usize) -> bool {
            self.calls += 1;
            for buffer in buffers.iter_mut() {
                for sample in buffer[..len].iter_mut() {
                    *sample *= self.gain;
                }
            }
            self.limit.map_or(true, |limit| self.calls < limit)
        }

        fn close(&mut self) {
            self.closed = true;
        }
    }

    #[test]
    fn test_entry_tracks_owner() {
        let mixer: Arc<Mutex<dyn ChannelMixer>> = Arc::new(Mutex::new(GainMixer::new(0.5)));
        let entry = MixerEntry::new(MixerId(1), 3, &mixer);
        assert!(!entry.is_orphaned());
        assert_eq!(3, entry.channel);

        drop(mixer);
        assert!(entry.is_orphaned());
    }

    #[test]
    fn test_gain_mixer_processes_in_place() {
        let mut mixer = GainMixer::new(0.5);
        let mut left = vec![1.0; 4];
        let mut right = vec![-1.0; 4];
        {
            let mut buffers: [&mut [f32]; 2] = [&mut left, &mut right];
            assert!(mixer.process(&mut buffers, 4));
        }
        assert_eq!(vec![0.5; 4], left);
        assert_eq!(vec![-0.5; 4], right);
    }
}
