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
use serde::Deserialize;

use super::error::ConfigError;
use crate::audio::{BufferSizing, OutputSettings};

const DEFAULT_PROCESSING_BLOCK_MS: f32 = 5.0;
const DEFAULT_CROSSFADE_MS: f32 = 5.0;
const DEFAULT_RING_BUFFER_MULTIPLIER: usize = 5;

/// A YAML representation of the audio configuration.
#[derive(Deserialize, Clone, Debug)]
pub struct Audio {
    /// The output device. "default" picks the host default, names starting with "mock"
    /// render without a device.
    device: String,

    /// Length of one render block in milliseconds (default: 5.0)
    processing_block_ms: Option<f32>,

    /// Length of the crossfade between consecutive blocks in milliseconds (default: 5.0)
    crossfade_ms: Option<f32>,

    /// Device queue length in native buffers (default: 5). Must be at least 1.
    ring_buffer_multiplier: Option<usize>,

    /// Device sample rate. Defaults to the scene's rate, which disables resampling.
    native_sample_rate: Option<u32>,

    /// Frames per device buffer. Defaults to the render block size.
    native_block_frames: Option<usize>,
}

impl Audio {
    /// New will create a new Audio configuration.
    pub fn new(device: &str) -> Audio {
        Audio {
            device: device.to_string(),
            processing_block_ms: None,
            crossfade_ms: None,
            ring_buffer_multiplier: None,
            native_sample_rate: None,
            native_block_frames: None,
        }
    }

    /// Returns the device from the configuration.
    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn processing_block_ms(&self) -> f32 {
        self.processing_block_ms
            .unwrap_or(DEFAULT_PROCESSING_BLOCK_MS)
    }

    pub fn crossfade_ms(&self) -> f32 {
        self.crossfade_ms.unwrap_or(DEFAULT_CROSSFADE_MS)
    }

    pub fn ring_buffer_multiplier(&self) -> usize {
        self.ring_buffer_multiplier
            .unwrap_or(DEFAULT_RING_BUFFER_MULTIPLIER)
    }

    /// Computes the buffer sizes for a session with the given filter length and scene rate.
    pub fn buffer_sizing(
        &self,
        filter_len: usize,
        sample_rate: u32,
    ) -> Result<BufferSizing, ConfigError> {
        BufferSizing::compute(
            self.processing_block_ms(),
            self.crossfade_ms(),
            filter_len,
            sample_rate,
        )
    }

    /// Builds the sink settings for the given sizing and scene rate.
    pub fn output_settings(&self, sizing: &BufferSizing, sample_rate: u32) -> OutputSettings {
        OutputSettings {
            internal_block_frames: sizing.block_samples,
            native_block_frames: self
                .native_block_frames
                .unwrap_or(sizing.block_samples),
            internal_sample_rate: sample_rate,
            native_sample_rate: self.native_sample_rate.unwrap_or(sample_rate),
            ring_buffer_multiplier: self.ring_buffer_multiplier(),
        }
    }
}
