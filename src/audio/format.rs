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
use std::fs::File;
use std::io::{BufReader, Seek};
use std::path::{Path, PathBuf};

use hound::WavReader;

/// Sample encoding of a WAV file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    /// Integer PCM.
    Int,
    /// IEEE float.
    Float,
}

impl SampleFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            SampleFormat::Float => "float",
            SampleFormat::Int => "int",
        }
    }
}

impl From<hound::SampleFormat> for SampleFormat {
    fn from(format: hound::SampleFormat) -> Self {
        match format {
            hound::SampleFormat::Int => SampleFormat::Int,
            hound::SampleFormat::Float => SampleFormat::Float,
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WavError {
    #[error("unable to read WAV file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    #[error("I/O error on WAV file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} is {1} bit {2}, only 16 bit integer PCM is supported")]
    UnsupportedFormat(PathBuf, u16, SampleFormat),

    #[error("{0} has {1} channels, only mono sources are supported")]
    NotMono(PathBuf, u16),

    #[error("{path} is {actual} Hz but the scene runs at {expected} Hz")]
    SampleRateMismatch {
        path: PathBuf,
        expected: u32,
        actual: u32,
    },

    #[error("{path} is {actual} bit but the scene expects {expected} bit")]
    BitsPerSampleMismatch {
        path: PathBuf,
        expected: u16,
        actual: u16,
    },
}

/// Header facts about a WAV file, enough to stream its PCM data directly.
#[derive(Debug, Clone, PartialEq)]
pub struct WavInfo {
    pub path: PathBuf,
    pub format: SampleFormat,
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    /// Byte offset of the first sample of the data chunk.
    pub first_audio_byte_offset: u64,
    /// Length of the data chunk in bytes.
    pub data_len: u64,
}

impl WavInfo {
    /// Reads the header of the given WAV file.
    pub fn read(path: &Path) -> Result<WavInfo, WavError> {
        let io_error = |source| WavError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(io_error)?;
        let reader = WavReader::new(BufReader::new(file)).map_err(|source| WavError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let spec = reader.spec();
        // len() counts samples across all channels.
        let data_len = u64::from(reader.len()) * u64::from(spec.bits_per_sample.div_ceil(8));
        // hound leaves the reader positioned at the start of the data chunk.
        let first_audio_byte_offset = reader.into_inner().stream_position().map_err(io_error)?;

        Ok(WavInfo {
            path: path.to_path_buf(),
            format: spec.sample_format.into(),
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            bits_per_sample: spec.bits_per_sample,
            first_audio_byte_offset,
            data_len,
        })
    }

    /// Checks that this file can be streamed into a scene with the given format.
    pub fn check_streamable(&self, sample_rate: u32, bits_per_sample: u16) -> Result<(), WavError> {
        if self.format != SampleFormat::Int || self.bits_per_sample != 16 {
            return Err(WavError::UnsupportedFormat(
                self.path.clone(),
                self.bits_per_sample,
                self.format,
            ));
        }
        if self.bits_per_sample != bits_per_sample {
            return Err(WavError::BitsPerSampleMismatch {
                path: self.path.clone(),
                expected: bits_per_sample,
                actual: self.bits_per_sample,
            });
        }
        if self.sample_rate != sample_rate {
            return Err(WavError::SampleRateMismatch {
                path: self.path.clone(),
                expected: sample_rate,
                actual: self.sample_rate,
            });
        }
        if self.channels != 1 {
            return Err(WavError::NotMono(self.path.clone(), self.channels));
        }
        Ok(())
    }
}

impl fmt::Display for WavInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} Hz, {} bit {}, {} ch, {} bytes at offset {})",
            self.path.display(),
            self.sample_rate,
            self.bits_per_sample,
            self.format,
            self.channels,
            self.data_len,
            self.first_audio_byte_offset,
        )
    }
}
