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
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

use super::{OutputError, OutputSettings, OutputSink};

/// Transport calls seen by a mock sink, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkCall {
    Start,
    Play,
    Pause,
    FlushAndPause,
    Shutdown,
}

#[derive(Default)]
struct Recording {
    frames_written: usize,
    blocks_written: usize,
    calls: Vec<SinkCall>,
    /// Kept blocks, if retention is on.
    blocks: Vec<Vec<i16>>,
    retain_blocks: bool,
    /// Fail writes once this many blocks have been written.
    fail_after: Option<usize>,
    /// Block writes once this many blocks have been written, like a device that
    /// stopped pulling audio.
    hold_after: Option<usize>,
    playing: bool,
}

impl Recording {
    fn holding(&self) -> bool {
        self.hold_after
            .is_some_and(|limit| self.blocks_written >= limit)
    }
}

#[derive(Default)]
struct Shared {
    recording: Mutex<Recording>,
    released: Condvar,
}

/// A handle for inspecting a mock sink after it has moved to the render thread.
#[derive(Clone)]
pub struct SinkProbe {
    shared: Arc<Shared>,
}

impl SinkProbe {
    pub fn frames_written(&self) -> usize {
        self.shared.recording.lock().frames_written
    }

    pub fn blocks_written(&self) -> usize {
        self.shared.recording.lock().blocks_written
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.shared.recording.lock().calls.clone()
    }

    pub fn is_playing(&self) -> bool {
        self.shared.recording.lock().playing
    }

    /// Copies of every block written since retention was turned on.
    pub fn blocks(&self) -> Vec<Vec<i16>> {
        self.shared.recording.lock().blocks.clone()
    }

    /// Moves the write hold to `blocks` total, or removes it. Releases a held writer if
    /// the new limit allows.
    pub fn hold_at(&self, blocks: Option<usize>) {
        self.shared.recording.lock().hold_after = blocks;
        self.shared.released.notify_all();
    }
}

/// A mock sink. Doesn't play anything and records what it was given. Writes only block
/// when asked to.
pub struct Sink {
    name: String,
    settings: OutputSettings,
    shared: Arc<Shared>,
    pace: Option<Duration>,
}

impl Sink {
    pub fn new(name: &str, settings: OutputSettings) -> Sink {
        Sink {
            name: name.to_string(),
            settings,
            shared: Arc::new(Shared::default()),
            pace: None,
        }
    }

    pub fn probe(&self) -> SinkProbe {
        SinkProbe {
            shared: self.shared.clone(),
        }
    }

    /// Keeps a copy of every written block.
    pub fn retain_blocks(self) -> Sink {
        self.shared.recording.lock().retain_blocks = true;
        self
    }

    /// Makes writes fail once `blocks` blocks have been written.
    pub fn fail_after(self, blocks: usize) -> Sink {
        self.shared.recording.lock().fail_after = Some(blocks);
        self
    }

    /// Sleeps for the given time on every write, like a device consuming in real time.
    pub fn paced(mut self, per_block: Duration) -> Sink {
        self.pace = Some(per_block);
        self
    }

    /// Makes writes block once `blocks` blocks have been written, until the probe moves
    /// or removes the hold.
    pub fn hold_after(self, blocks: usize) -> Sink {
        self.shared.recording.lock().hold_after = Some(blocks);
        self
    }
}

impl OutputSink for Sink {
    fn start(&mut self) -> Result<(), OutputError> {
        info!(device = self.name, "Starting output.");
        let mut recording = self.shared.recording.lock();
        recording.calls.push(SinkCall::Start);
        recording.playing = true;
        Ok(())
    }

    fn write(&mut self, block: &[i16]) -> Result<(), OutputError> {
        let expected = self.settings.internal_block_frames * 2;
        if block.len() != expected {
            return Err(OutputError::BlockSize {
                expected,
                actual: block.len(),
            });
        }

        if let Some(pace) = self.pace {
            thread::sleep(pace);
        }
        let mut recording = self.shared.recording.lock();
        while recording.holding() {
            self.shared.released.wait(&mut recording);
        }
        if recording
            .fail_after
            .is_some_and(|limit| recording.blocks_written >= limit)
        {
            return Err(OutputError::Injected);
        }
        recording.frames_written += block.len() / 2;
        recording.blocks_written += 1;
        if recording.retain_blocks {
            recording.blocks.push(block.to_vec());
        }
        Ok(())
    }

    fn play(&mut self) {
        debug!(device = self.name, "Play.");
        let mut recording = self.shared.recording.lock();
        recording.calls.push(SinkCall::Play);
        recording.playing = true;
    }

    fn pause(&mut self) {
        debug!(device = self.name, "Pause.");
        let mut recording = self.shared.recording.lock();
        recording.calls.push(SinkCall::Pause);
        recording.playing = false;
    }

    fn flush_and_pause(&mut self) {
        debug!(device = self.name, "Flush and pause.");
        let mut recording = self.shared.recording.lock();
        recording.calls.push(SinkCall::FlushAndPause);
        recording.playing = false;
    }

    fn shutdown(&mut self) {
        info!(device = self.name, "Shutting down output.");
        let mut recording = self.shared.recording.lock();
        recording.calls.push(SinkCall::Shutdown);
        recording.playing = false;
    }
}

impl fmt::Display for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}
