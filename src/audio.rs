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

pub mod convolver;
pub mod cpal;
pub mod format;
pub mod mock;
pub mod sizing;
pub mod streaming;
pub mod thread_priority;

pub use format::{SampleFormat, WavInfo};
pub use sizing::BufferSizing;

#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("invalid output settings: {0}")]
    InvalidSettings(String),

    #[error("output block has {actual} samples, expected {expected}")]
    BlockSize { expected: usize, actual: usize },

    #[error("output stream is closed")]
    Closed,

    #[error("no output device found with name {0}")]
    NoDevice(String),

    #[error("injected write failure")]
    Injected,

    #[error("output device error: {0}")]
    Device(String),

    #[error("resampler error: {0}")]
    Resampler(String),
}

/// Everything a sink needs to know to take blocks from the render thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSettings {
    /// Stereo frames per block written by the render thread.
    pub internal_block_frames: usize,
    /// Stereo frames per buffer handed to the device.
    pub native_block_frames: usize,
    pub internal_sample_rate: u32,
    pub native_sample_rate: u32,
    /// Device-side queue length, in native buffers. Must be at least 1.
    pub ring_buffer_multiplier: usize,
}

impl OutputSettings {
    pub fn validate(&self) -> Result<(), OutputError> {
        if self.ring_buffer_multiplier < 1 {
            return Err(OutputError::InvalidSettings(
                "ring buffer multiplier must be at least 1".into(),
            ));
        }
        if self.internal_block_frames == 0 || self.native_block_frames == 0 {
            return Err(OutputError::InvalidSettings(
                "block sizes must be greater than 0".into(),
            ));
        }
        if self.internal_sample_rate == 0 || self.native_sample_rate == 0 {
            return Err(OutputError::InvalidSettings(
                "sample rates must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Direction of a linear fade over one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeDirection {
    In,
    Out,
}

/// Ramps the first `frames` stereo frames of `block` linearly in or out.
pub fn linear_fade(block: &mut [i16], frames: usize, direction: FadeDirection) {
    if frames == 0 {
        return;
    }
    let step = 1.0 / frames as f32;
    let mut scaling = match direction {
        FadeDirection::In => 0.0,
        FadeDirection::Out => 1.0,
    };
    for frame in block.chunks_exact_mut(2).take(frames) {
        for sample in frame.iter_mut() {
            *sample = (f32::from(*sample) * scaling).round() as i16;
        }
        match direction {
            FadeDirection::In => scaling += step,
            FadeDirection::Out => scaling -= step,
        }
    }
}

/// Where rendered stereo blocks go.
///
/// `write` may block to apply back-pressure. Transport calls come from the render thread
/// only, at block boundaries.
pub trait OutputSink: fmt::Display + Send {
    /// Begins output. Called once when the render thread starts.
    fn start(&mut self) -> Result<(), OutputError>;

    /// Queues one interleaved stereo block.
    fn write(&mut self, block: &[i16]) -> Result<(), OutputError>;

    /// Fades the block in place.
    fn linear_fade(&self, block: &mut [i16], frames: usize, direction: FadeDirection) {
        linear_fade(block, frames, direction);
    }

    /// Resumes output, discarding anything left queued from before a pause.
    fn play(&mut self);

    /// Stops output immediately.
    fn pause(&mut self);

    /// Lets everything queued play out, then pauses.
    fn flush_and_pause(&mut self);

    /// Stops output and releases the device.
    fn shutdown(&mut self);
}

/// Lists output devices known to cpal.
pub fn list_devices() -> Result<Vec<cpal::DeviceInfo>, OutputError> {
    cpal::list_devices()
}

/// Gets a sink for the named device. Names starting with "mock" produce a mock sink.
pub fn get_sink(
    device: &str,
    settings: OutputSettings,
) -> Result<Box<dyn OutputSink>, OutputError> {
    settings.validate()?;
    if device.starts_with("mock") {
        return Ok(Box::new(mock::Sink::new(device, settings)));
    }
    Ok(Box::new(cpal::Sink::new(device, settings)?))
}
