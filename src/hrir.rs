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
// Head-related impulse responses, one left/right pair per degree of azimuth.
//
// File layout: little-endian f32, for each angle 0..360 the left-ear
// coefficients followed by the right-ear coefficients. All pairs share one
// filter length, which is derived from the file size.
//

use std::fs;
use std::io;
use std::path::Path;

use tracing::info;

/// One impulse response pair per degree.
pub const HRIR_ANGLES: usize = 360;

const BYTES_PER_COEFFICIENT: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum HrirError {
    #[error("unable to read HRIR file: {0}")]
    Io(#[from] io::Error),

    #[error("HRIR data is empty")]
    Empty,

    #[error("HRIR data of {0} bytes does not split into 360 left/right f32 pairs")]
    Misaligned(usize),

    #[error("expected {expected} HRIR angles, got {actual}")]
    AngleCount { expected: usize, actual: usize },

    #[error("HRIR for angle {angle} has {actual} coefficients, expected {expected}")]
    LengthMismatch {
        angle: usize,
        expected: usize,
        actual: usize,
    },
}

/// A full set of HRIRs, stored angle-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Hrirs {
    filter_len: usize,
    left: Vec<f32>,
    right: Vec<f32>,
}

impl Hrirs {
    /// Builds a set from per-angle left and right responses.
    pub fn new(left: Vec<Vec<f32>>, right: Vec<Vec<f32>>) -> Result<Hrirs, HrirError> {
        for ear in [&left, &right] {
            if ear.len() != HRIR_ANGLES {
                return Err(HrirError::AngleCount {
                    expected: HRIR_ANGLES,
                    actual: ear.len(),
                });
            }
        }

        let filter_len = left[0].len();
        if filter_len == 0 {
            return Err(HrirError::Empty);
        }
        for (angle, response) in left.iter().chain(right.iter()).enumerate() {
            if response.len() != filter_len {
                return Err(HrirError::LengthMismatch {
                    angle: angle % HRIR_ANGLES,
                    expected: filter_len,
                    actual: response.len(),
                });
            }
        }

        Ok(Hrirs {
            filter_len,
            left: left.into_iter().flatten().collect(),
            right: right.into_iter().flatten().collect(),
        })
    }

    /// Loads HRIRs from a binary file.
    pub fn load(path: &Path) -> Result<Hrirs, HrirError> {
        let hrirs = Hrirs::from_bytes(&fs::read(path)?)?;
        info!(
            path = %path.display(),
            filter_len = hrirs.filter_len,
            "Loaded HRIRs."
        );
        Ok(hrirs)
    }

    /// Parses HRIRs from the binary layout.
    pub fn from_bytes(bytes: &[u8]) -> Result<Hrirs, HrirError> {
        if bytes.is_empty() {
            return Err(HrirError::Empty);
        }
        let pair_bytes = BYTES_PER_COEFFICIENT * 2 * HRIR_ANGLES;
        if bytes.len() % pair_bytes != 0 {
            return Err(HrirError::Misaligned(bytes.len()));
        }

        let filter_len = bytes.len() / pair_bytes;
        let mut left = Vec::with_capacity(filter_len * HRIR_ANGLES);
        let mut right = Vec::with_capacity(filter_len * HRIR_ANGLES);
        let coefficients = bytes
            .chunks_exact(BYTES_PER_COEFFICIENT)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect::<Vec<f32>>();
        for pair in coefficients.chunks_exact(filter_len * 2) {
            left.extend_from_slice(&pair[..filter_len]);
            right.extend_from_slice(&pair[filter_len..]);
        }

        Ok(Hrirs {
            filter_len,
            left,
            right,
        })
    }

    /// Number of taps per impulse response.
    pub fn filter_len(&self) -> usize {
        self.filter_len
    }

    pub fn left(&self, angle: usize) -> &[f32] {
        &self.left[angle * self.filter_len..(angle + 1) * self.filter_len]
    }

    pub fn right(&self, angle: usize) -> &[f32] {
        &self.right[angle * self.filter_len..(angle + 1) * self.filter_len]
    }
}
