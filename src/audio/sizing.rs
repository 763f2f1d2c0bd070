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
// Derived buffer sizes for a render session. Everything downstream (streaming
// sources, the convolver and the output sink) is sized from one BufferSizing.
//

use std::fmt;

use crate::config::ConfigError;

/// Source and output samples are 16 bit.
pub const BYTES_PER_SAMPLE: usize = 2;

/// Each ladder is `base * 2^k`. The convolver accepts any size, but sizes that factor
/// into twos plus at most two threes or two fives are the fast ones.
const FFT_LADDER_BASES: [usize; 5] = [1, 3, 9, 5, 25];

/// Sizes (in samples unless noted) derived once per session from the audio settings and
/// the HRIR filter length. Immutable for the lifetime of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSizing {
    /// Mono samples rendered per block (also stereo frames per output block).
    pub block_samples: usize,
    /// Filter length minus one.
    pub filter_overlap_samples: usize,
    /// Samples blended between consecutive blocks.
    pub crossfade_overlap_samples: usize,
    /// block + filter overlap + crossfade overlap.
    pub min_fft_block_samples: usize,
    /// Chosen FFT size, the smallest ladder value that fits the minimum.
    pub fft_block_samples: usize,
    /// fft_block_samples - min_fft_block_samples.
    pub fft_padding_samples: usize,
}

impl BufferSizing {
    /// Computes the sizes for the given settings. Same inputs always produce the same sizes.
    pub fn compute(
        processing_block_ms: f32,
        crossfade_ms: f32,
        filter_len: usize,
        sample_rate: u32,
    ) -> Result<BufferSizing, ConfigError> {
        if sample_rate == 0 {
            return Err(ConfigError::InvalidSettings(
                "sample rate must be greater than 0".into(),
            ));
        }
        if filter_len == 0 {
            return Err(ConfigError::InvalidSettings(
                "filter length must be at least one tap".into(),
            ));
        }
        if !processing_block_ms.is_finite() || processing_block_ms <= 0.0 {
            return Err(ConfigError::InvalidSettings(format!(
                "processing block of {processing_block_ms} ms is not usable"
            )));
        }
        if !crossfade_ms.is_finite() || crossfade_ms < 0.0 {
            return Err(ConfigError::InvalidSettings(format!(
                "crossfade of {crossfade_ms} ms is not usable"
            )));
        }

        let block_samples = millis_to_samples(processing_block_ms, sample_rate);
        if block_samples == 0 {
            return Err(ConfigError::InvalidSettings(format!(
                "processing block of {processing_block_ms} ms is shorter than one sample"
            )));
        }
        let filter_overlap_samples = filter_len - 1;
        let crossfade_overlap_samples = millis_to_samples(crossfade_ms, sample_rate);
        let min_fft_block_samples =
            block_samples + filter_overlap_samples + crossfade_overlap_samples;
        let fft_block_samples = fft_block_size(min_fft_block_samples);

        Ok(BufferSizing {
            block_samples,
            filter_overlap_samples,
            crossfade_overlap_samples,
            min_fft_block_samples,
            fft_block_samples,
            fft_padding_samples: fft_block_samples - min_fft_block_samples,
        })
    }

    /// Samples carried over from the previous chunk at the head of each source buffer.
    pub fn overlap_samples(&self) -> usize {
        self.filter_overlap_samples + self.crossfade_overlap_samples
    }

    /// Total samples in each source buffer: overlap followed by one block of new samples.
    pub fn source_buffer_samples(&self) -> usize {
        self.fft_block_samples - self.fft_padding_samples
    }

    /// Interleaved stereo samples in one output block.
    pub fn output_block_samples(&self) -> usize {
        self.block_samples * 2
    }

    pub fn block_bytes(&self) -> usize {
        self.block_samples * BYTES_PER_SAMPLE
    }

    pub fn overlap_bytes(&self) -> usize {
        self.overlap_samples() * BYTES_PER_SAMPLE
    }

    pub fn source_buffer_bytes(&self) -> usize {
        self.source_buffer_samples() * BYTES_PER_SAMPLE
    }
}

impl fmt::Display for BufferSizing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "block={} filter_overlap={} crossfade_overlap={} fft={} (min={}, padding={})",
            self.block_samples,
            self.filter_overlap_samples,
            self.crossfade_overlap_samples,
            self.fft_block_samples,
            self.min_fft_block_samples,
            self.fft_padding_samples,
        )
    }
}

/// Returns the smallest size across all FFT ladders that is at least `min_required`.
pub fn fft_block_size(min_required: usize) -> usize {
    FFT_LADDER_BASES
        .iter()
        .map(|base| next_size_on_ladder(min_required, *base))
        .min()
        .unwrap_or(min_required)
}

/// Doubles `base` until it reaches `min_required`.
pub fn next_size_on_ladder(min_required: usize, base: usize) -> usize {
    let mut size = base.max(1);
    while size < min_required {
        size <<= 1;
    }
    size
}

fn millis_to_samples(ms: f32, sample_rate: u32) -> usize {
    (f64::from(ms) * f64::from(sample_rate) / 1000.0).round() as usize
}
