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

use thread_priority::{set_current_thread_priority, ThreadPriority, ThreadPriorityValue};
use tracing::{info, warn};

/// Default priority for the audio pusher thread when SOFTSYNTH_AUDIO_PRIORITY is unset.
const DEFAULT_PUSHER_PRIORITY: u8 = 70;

/// Reads SOFTSYNTH_AUDIO_PRIORITY (0-99). Out of range or unparseable values fall
/// back to the default.
pub fn pusher_thread_priority() -> Option<ThreadPriorityValue> {
    let priority = std::env::var("SOFTSYNTH_AUDIO_PRIORITY")
        .ok()
        .and_then(|v| v.parse::<u8>().ok())
        .filter(|n| *n < 100)
        .unwrap_or(DEFAULT_PUSHER_PRIORITY);
    ThreadPriorityValue::try_from(priority).ok()
}

pub(crate) fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .ok()
        .map(|v| {
            v == "1"
                || v.eq_ignore_ascii_case("true")
                || v.eq_ignore_ascii_case("yes")
                || v.eq_ignore_ascii_case("on")
        })
        .unwrap_or(false)
}

/// Returns whether the pusher should attempt RT (SCHED_FIFO) scheduling.
/// Default: enabled. Opt out with SOFTSYNTH_DISABLE_RT_AUDIO=1.
pub fn rt_audio_enabled() -> bool {
    !env_flag("SOFTSYNTH_DISABLE_RT_AUDIO")
}

/// Raises the priority of the calling thread. Failures are logged and ignored.
pub fn configure_pusher_thread_priority(priority: ThreadPriorityValue, rt_audio: bool) {
    let tp = ThreadPriority::Crossplatform(priority);
    if let Err(e) = set_current_thread_priority(tp) {
        warn!(error = ?e, "Failed to raise audio pusher thread priority");
    }

    #[cfg(unix)]
    if rt_audio {
        use thread_priority::unix::{
            set_thread_priority_and_policy, thread_native_id, RealtimeThreadSchedulePolicy,
            ThreadSchedulePolicy,
        };
        let tid = thread_native_id();
        match set_thread_priority_and_policy(
            tid,
            tp,
            ThreadSchedulePolicy::Realtime(RealtimeThreadSchedulePolicy::Fifo),
        ) {
            Ok(()) => {
                info!("Enabled RT SCHED_FIFO for audio pusher thread");
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "Failed to set RT SCHED_FIFO for audio pusher thread"
                );
            }
        }
    }
    #[cfg(not(unix))]
    let _ = rt_audio;
}
