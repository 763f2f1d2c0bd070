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

/// Priority for the render thread when BINAURAL_THREAD_PRIORITY is unset or invalid.
const DEFAULT_RENDER_THREAD_PRIORITY: u8 = 70;

const THREAD_PRIORITY_VAR: &str = "BINAURAL_THREAD_PRIORITY";
const DISABLE_RT_AUDIO_VAR: &str = "BINAURAL_DISABLE_RT_AUDIO";

/// Reads BINAURAL_THREAD_PRIORITY (0-99). Read once at setup, never from the render loop.
pub fn render_thread_priority() -> ThreadPriorityValue {
    std::env::var(THREAD_PRIORITY_VAR)
        .ok()
        .and_then(|v| {
            let n = v.parse::<u8>().ok()?;
            if n < 100 {
                ThreadPriorityValue::try_from(n).ok()
            } else {
                None
            }
        })
        .unwrap_or_else(default_priority)
}

fn default_priority() -> ThreadPriorityValue {
    ThreadPriorityValue::try_from(DEFAULT_RENDER_THREAD_PRIORITY)
        .expect("default render thread priority is in range")
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

/// Whether to try SCHED_FIFO for the render thread. On unless BINAURAL_DISABLE_RT_AUDIO is set.
pub fn rt_audio_enabled() -> bool {
    !env_flag(DISABLE_RT_AUDIO_VAR)
}

/// Raises the priority of the calling thread. Failures are logged, never fatal.
pub fn configure_render_thread_priority(priority: ThreadPriorityValue, rt_audio: bool) {
    let tp = ThreadPriority::Crossplatform(priority);
    if let Err(e) = set_current_thread_priority(tp) {
        warn!(error = ?e, "Failed to raise render thread priority");
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
            Ok(()) => info!("Enabled RT SCHED_FIFO for render thread"),
            Err(e) => warn!(error = %e, "Failed to set RT SCHED_FIFO for render thread"),
        }
    }
    #[cfg(not(unix))]
    let _ = rt_audio;
}
