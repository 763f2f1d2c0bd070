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
// Tiny render sessions: 8 frame blocks, 4 filter taps and 4 samples of crossfade.
//
use std::io::Cursor;

use crate::audio::streaming::{PcmStream, StreamingSource};
use crate::audio::{BufferSizing, OutputSettings};

pub fn tiny_sizing() -> BufferSizing {
    BufferSizing {
        block_samples: 8,
        filter_overlap_samples: 3,
        crossfade_overlap_samples: 4,
        min_fft_block_samples: 15,
        fft_block_samples: 16,
        fft_padding_samples: 1,
    }
}

/// Output settings matching the sizing, with no resampling and a one-buffer queue.
pub fn tiny_output_settings(sizing: &BufferSizing) -> OutputSettings {
    OutputSettings {
        internal_block_frames: sizing.block_samples,
        native_block_frames: sizing.block_samples,
        internal_sample_rate: 44100,
        native_sample_rate: 44100,
        ring_buffer_multiplier: 1,
    }
}

/// 1, 2, 3, ... so the first new sample of each chunk tells where the stream is.
pub fn ramp(len: i16) -> Vec<i16> {
    (1..=len).collect()
}

/// A tiny-sized source over the given stream, first chunk already requested.
pub fn pcm_source_over(name: &str, stream: Box<dyn PcmStream>, looping: bool) -> StreamingSource {
    let sizing = tiny_sizing();
    let mut source = StreamingSource::new(
        name,
        sizing.source_buffer_samples(),
        sizing.overlap_samples(),
    )
    .unwrap();
    source.set_loop(looping);
    source.configure(stream, 0, None).unwrap();
    source.request_next_chunk().unwrap();
    source
}

/// A tiny-sized source over in-memory samples.
pub fn pcm_source(name: &str, samples: &[i16], looping: bool) -> StreamingSource {
    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    pcm_source_over(name, Box::new(Cursor::new(bytes)), looping)
}
