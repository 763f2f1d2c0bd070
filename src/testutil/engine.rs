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

use std::sync::Arc;

use parking_lot::Mutex;

use crate::audio::convolver::{ConvolutionEngine, FilterError};

/// Every output sample of a block with at least one filtered source.
pub const ENGINE_OUTPUT_LEVEL: i16 = 1000;

/// One `filter` call.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterCall {
    pub angle: u16,
    pub gain: f32,
    /// The first sample after the overlap, i.e. the first new sample of the chunk.
    pub first_new_sample: i16,
}

/// One finished block.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockLog {
    pub filters: Vec<FilterCall>,
    pub crossfade: bool,
}

/// What a recording engine has seen, shared with the test.
#[derive(Clone, Default)]
pub struct EngineLog {
    blocks: Arc<Mutex<Vec<BlockLog>>>,
}

impl EngineLog {
    pub fn blocks(&self) -> Vec<BlockLog> {
        self.blocks.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.blocks.lock().len()
    }

    pub fn crossfades(&self) -> Vec<bool> {
        self.blocks.lock().iter().map(|block| block.crossfade).collect()
    }
}

/// A convolution engine that records calls instead of convolving. Blocks with any
/// filtered source come out at a constant level, so fades are visible in the output.
pub struct RecordingEngine {
    log: EngineLog,
    overlap: usize,
    current: Vec<FilterCall>,
    fail_at_block: Option<usize>,
}

impl RecordingEngine {
    /// `overlap` is the number of carried-over samples at the head of each chunk.
    pub fn new(overlap: usize) -> RecordingEngine {
        RecordingEngine {
            log: EngineLog::default(),
            overlap,
            current: Vec::new(),
            fail_at_block: None,
        }
    }

    pub fn log(&self) -> EngineLog {
        self.log.clone()
    }

    /// Fails every filter call from the given block index on.
    pub fn fail_at_block(mut self, block: usize) -> RecordingEngine {
        self.fail_at_block = Some(block);
        self
    }
}

impl ConvolutionEngine for RecordingEngine {
    fn begin_block(&mut self) {
        self.current.clear();
    }

    fn filter(&mut self, input: &[i16], angle: u16, gain: f32) -> Result<(), FilterError> {
        if self
            .fail_at_block
            .is_some_and(|block| self.log.len() >= block)
        {
            return Err(FilterError::AngleOutOfRange(angle));
        }
        self.current.push(FilterCall {
            angle,
            gain,
            first_new_sample: input[self.overlap],
        });
        Ok(())
    }

    fn end_block(&mut self, crossfade: bool, out: &mut [i16]) -> Result<(), FilterError> {
        let level = if self.current.is_empty() {
            0
        } else {
            ENGINE_OUTPUT_LEVEL
        };
        out.fill(level);
        self.log.blocks.lock().push(BlockLog {
            filters: std::mem::take(&mut self.current),
            crossfade,
        });
        Ok(())
    }
}
