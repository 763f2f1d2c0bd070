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
// Transport requests from the control side. Requests only set flags; the
// render thread consumes them at a block boundary, so a block is always
// rendered entirely before or entirely after a transition.
//
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::audio::FadeDirection;

/// Where the render thread is in the transport cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransportPhase {
    Resuming,
    Playing,
    Pausing,
    Paused,
    Rewinding,
    Quitting,
    Quit,
}

impl TransportPhase {
    fn from_u8(value: u8) -> TransportPhase {
        match value {
            0 => TransportPhase::Resuming,
            1 => TransportPhase::Playing,
            2 => TransportPhase::Pausing,
            3 => TransportPhase::Paused,
            4 => TransportPhase::Rewinding,
            5 => TransportPhase::Quitting,
            _ => TransportPhase::Quit,
        }
    }
}

impl fmt::Display for TransportPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self {
            TransportPhase::Resuming => "resuming",
            TransportPhase::Playing => "playing",
            TransportPhase::Pausing => "pausing",
            TransportPhase::Paused => "paused",
            TransportPhase::Rewinding => "rewinding",
            TransportPhase::Quitting => "quitting",
            TransportPhase::Quit => "quit",
        };
        write!(f, "{phase}")
    }
}

#[derive(Debug, Default)]
struct Requests {
    pause: bool,
    resume: bool,
    rewind: bool,
    quit: bool,
    /// Set while the render thread is parked waiting for resume or quit.
    paused: bool,
}

/// What the render thread does at one block boundary.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BlockActions {
    /// Restart sink output before writing.
    pub resume: bool,
    pub fade: Option<FadeDirection>,
    /// Flush the sink and wait for resume or quit after writing.
    pub pause: bool,
    /// Rewind every source after writing.
    pub rewind: bool,
    pub quit: bool,
}

/// How a paused render thread was woken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// Resume, rewinding first if a rewind came in while paused.
    Resume { rewind: bool },
    Quit,
}

/// Transport requests shared between the control side and the render thread.
pub struct Transport {
    requests: Mutex<Requests>,
    wake: Condvar,
    phase: AtomicU8,
}

impl Transport {
    /// A transport that resumes on the first block.
    pub fn new() -> Transport {
        Transport {
            requests: Mutex::new(Requests {
                resume: true,
                ..Requests::default()
            }),
            wake: Condvar::new(),
            phase: AtomicU8::new(TransportPhase::Resuming as u8),
        }
    }

    /// Requests playback. Cancels a pause that hasn't been applied yet.
    pub fn play(&self) {
        let mut requests = self.requests.lock();
        requests.pause = false;
        if requests.paused {
            requests.resume = true;
            self.wake.notify_all();
        }
    }

    /// Requests a pause. Cancels a resume that hasn't been applied yet.
    pub fn pause(&self) {
        let mut requests = self.requests.lock();
        if requests.paused {
            requests.resume = false;
        } else {
            requests.pause = true;
        }
    }

    /// Requests a rewind. While paused, the rewind happens on resume.
    pub fn rewind(&self) {
        self.requests.lock().rewind = true;
    }

    /// Requests the render thread to finish. Wakes it if paused.
    pub fn quit(&self) {
        let mut requests = self.requests.lock();
        requests.quit = true;
        if requests.paused {
            self.wake.notify_all();
        }
    }

    pub fn phase(&self) -> TransportPhase {
        TransportPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub(super) fn set_phase(&self, phase: TransportPhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    /// Consumes the pending requests for this block boundary. A resume block is
    /// handled alone: pause, rewind and quit stay pending until the next boundary so
    /// they fade out from full level. `all_ended` schedules a rewind without a fade,
    /// since the sources simply looped as a scene.
    pub fn consume(&self, all_ended: bool) -> BlockActions {
        let mut requests = self.requests.lock();
        let mut actions = BlockActions {
            rewind: all_ended,
            ..BlockActions::default()
        };

        if requests.resume {
            requests.resume = false;
            actions.resume = true;
            actions.fade = Some(FadeDirection::In);
        } else if requests.quit {
            // Quit wins over anything else pending.
            requests.pause = false;
            requests.rewind = false;
            actions.fade = Some(FadeDirection::Out);
            actions.rewind = false;
            actions.quit = true;
        } else if requests.pause {
            // A rewind requested alongside the pause is applied on resume.
            requests.pause = false;
            requests.paused = true;
            actions.fade = Some(FadeDirection::Out);
            actions.pause = true;
        } else if requests.rewind {
            requests.rewind = false;
            actions.fade = Some(FadeDirection::Out);
            actions.rewind = true;
        }

        let phase = if actions.quit {
            TransportPhase::Quitting
        } else if actions.pause {
            TransportPhase::Pausing
        } else if actions.rewind {
            TransportPhase::Rewinding
        } else if actions.resume {
            TransportPhase::Resuming
        } else {
            TransportPhase::Playing
        };
        self.set_phase(phase);
        actions
    }

    /// Parks the render thread until resume or quit. Only called after `consume`
    /// returned a pause.
    pub fn wait_for_resume(&self) -> Wake {
        let mut requests = self.requests.lock();
        requests.paused = true;
        self.set_phase(TransportPhase::Paused);
        while !requests.resume && !requests.quit {
            self.wake.wait(&mut requests);
        }
        requests.paused = false;

        if requests.quit {
            return Wake::Quit;
        }
        // The resume itself stays pending so the next block fades in.
        let rewind = std::mem::take(&mut requests.rewind);
        Wake::Resume { rewind }
    }
}

impl Default for Transport {
    fn default() -> Self {
        Transport::new()
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::testutil::eventually;

    fn playing() -> Transport {
        let transport = Transport::new();
        assert!(transport.consume(false).resume);
        transport
    }

    #[test]
    fn test_first_block_resumes() {
        let transport = Transport::new();
        assert_eq!(TransportPhase::Resuming, transport.phase());
        let actions = transport.consume(false);
        assert!(actions.resume);
        assert_eq!(Some(FadeDirection::In), actions.fade);
        assert_eq!(BlockActions::default(), transport.consume(false));
        assert_eq!(TransportPhase::Playing, transport.phase());
    }

    #[test]
    fn test_resume_block_is_handled_alone() {
        let resume = BlockActions {
            resume: true,
            fade: Some(FadeDirection::In),
            ..BlockActions::default()
        };

        let transport = Transport::new();
        transport.pause();
        assert_eq!(resume, transport.consume(false));
        assert_eq!(TransportPhase::Resuming, transport.phase());
        assert_eq!(
            BlockActions {
                fade: Some(FadeDirection::Out),
                pause: true,
                ..BlockActions::default()
            },
            transport.consume(false)
        );

        let transport = Transport::new();
        transport.rewind();
        assert_eq!(resume, transport.consume(false));
        assert_eq!(
            BlockActions {
                fade: Some(FadeDirection::Out),
                rewind: true,
                ..BlockActions::default()
            },
            transport.consume(false)
        );

        let transport = Transport::new();
        transport.quit();
        assert_eq!(resume, transport.consume(false));
        assert_eq!(
            BlockActions {
                fade: Some(FadeDirection::Out),
                quit: true,
                ..BlockActions::default()
            },
            transport.consume(false)
        );
    }

    #[test]
    fn test_pause_after_wake_waits_for_the_resume_block() {
        let transport = Arc::new(playing());
        transport.pause();
        assert!(transport.consume(false).pause);

        let waiter = {
            let transport = transport.clone();
            thread::spawn(move || transport.wait_for_resume())
        };
        eventually(
            || transport.phase() == TransportPhase::Paused,
            "Render thread never paused",
        );
        transport.play();
        assert_eq!(Wake::Resume { rewind: false }, waiter.join().unwrap());

        // Arrives after the wake but before the next boundary.
        transport.pause();
        let actions = transport.consume(false);
        assert!(actions.resume);
        assert!(!actions.pause);
        assert_eq!(Some(FadeDirection::In), actions.fade);

        let actions = transport.consume(false);
        assert!(actions.pause);
        assert_eq!(Some(FadeDirection::Out), actions.fade);
    }

    #[test]
    fn test_all_ended_still_rewinds_on_a_resume_block() {
        let transport = Transport::new();
        transport.quit();
        let actions = transport.consume(true);
        assert!(actions.resume);
        assert!(actions.rewind);
        assert!(!actions.quit);
        assert_eq!(TransportPhase::Rewinding, transport.phase());
        assert!(transport.consume(false).quit);
    }

    #[test]
    fn test_pause_then_play_coalesces() {
        let transport = playing();
        transport.pause();
        transport.play();
        assert_eq!(BlockActions::default(), transport.consume(false));
    }

    #[test]
    fn test_pause_fades_out() {
        let transport = playing();
        transport.pause();
        let actions = transport.consume(false);
        assert!(actions.pause);
        assert_eq!(Some(FadeDirection::Out), actions.fade);
        assert_eq!(TransportPhase::Pausing, transport.phase());
    }

    #[test]
    fn test_quit_suppresses_pause_and_rewind() {
        let transport = playing();
        transport.pause();
        transport.rewind();
        transport.quit();
        let actions = transport.consume(true);
        assert_eq!(
            BlockActions {
                fade: Some(FadeDirection::Out),
                quit: true,
                ..BlockActions::default()
            },
            actions
        );
        assert_eq!(TransportPhase::Quitting, transport.phase());
    }

    #[test]
    fn test_rewind_fades_out_once() {
        let transport = playing();
        transport.rewind();
        let actions = transport.consume(false);
        assert!(actions.rewind);
        assert_eq!(Some(FadeDirection::Out), actions.fade);
        assert_eq!(BlockActions::default(), transport.consume(false));
    }

    #[test]
    fn test_all_ended_rewinds_without_fade() {
        let transport = playing();
        let actions = transport.consume(true);
        assert!(actions.rewind);
        assert_eq!(None, actions.fade);
        assert_eq!(TransportPhase::Rewinding, transport.phase());
    }

    #[test]
    fn test_paused_wakes_on_play_with_pending_rewind() {
        let transport = Arc::new(playing());
        transport.pause();
        assert!(transport.consume(false).pause);

        let waiter = {
            let transport = transport.clone();
            thread::spawn(move || transport.wait_for_resume())
        };
        eventually(
            || transport.phase() == TransportPhase::Paused,
            "Render thread never paused",
        );

        // Neither of these wakes a paused thread.
        transport.rewind();
        transport.pause();
        transport.play();

        assert_eq!(Wake::Resume { rewind: true }, waiter.join().unwrap());
        let actions = transport.consume(false);
        assert!(actions.resume);
        assert!(!actions.rewind);
        assert_eq!(Some(FadeDirection::In), actions.fade);
    }

    #[test]
    fn test_paused_wakes_on_quit() {
        let transport = Arc::new(playing());
        transport.pause();
        transport.consume(false);

        let waiter = {
            let transport = transport.clone();
            thread::spawn(move || transport.wait_for_resume())
        };
        eventually(
            || transport.phase() == TransportPhase::Paused,
            "Render thread never paused",
        );
        transport.quit();
        assert_eq!(Wake::Quit, waiter.join().unwrap());
    }
}
