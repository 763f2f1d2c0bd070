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
use std::any::TypeId;
use std::error::Error;
use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};

/// Writes a WAV file with one inner vector per channel. Channels are interleaved and must
/// all have the same length. `f32` samples are written as float, `i16`/`i32` as integer.
pub fn write_wav<S: hound::Sample + Copy + 'static>(
    path: &Path,
    channels: Vec<Vec<S>>,
    sample_rate: u32,
    bits_per_sample: u16,
) -> Result<(), Box<dyn Error>> {
    let sample_format = if TypeId::of::<S>() == TypeId::of::<f32>() {
        SampleFormat::Float
    } else if TypeId::of::<S>() == TypeId::of::<i16>() || TypeId::of::<S>() == TypeId::of::<i32>()
    {
        SampleFormat::Int
    } else {
        return Err("unsupported sample type".into());
    };
    let frames = channels.first().map_or(0, Vec::len);
    if channels.iter().any(|channel| channel.len() != frames) {
        return Err("channels have different lengths".into());
    }

    let mut writer = WavWriter::create(
        path,
        WavSpec {
            channels: u16::try_from(channels.len())?,
            sample_rate,
            bits_per_sample,
            sample_format,
        },
    )?;
    for frame in 0..frames {
        for channel in &channels {
            writer.write_sample(channel[frame])?;
        }
    }
    writer.finalize()?;
    Ok(())
}
