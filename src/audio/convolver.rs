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
// Overlap-save HRTF convolution. Every source chunk is transformed once,
// multiplied by the left and right spectra of the HRIR pair for its angle and
// accumulated into a stereo mix. The mix is `block + crossfade` samples long;
// its head overlaps the tail of the previous block so filter and gain changes
// can be blended instead of clicking.
//

use std::f32::consts::PI;
use std::sync::Arc;

use realfft::num_complex::Complex;
use realfft::{ComplexToReal, FftError, RealFftPlanner, RealToComplex};

use crate::hrir::{Hrirs, HRIR_ANGLES};

#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("HRIRs have no coefficients")]
    NoCoefficients,

    #[error("FFT block of {fft_block} samples leaves no room for a block after {filter_overlap} filter, {crossfade} crossfade and {padding} padding samples")]
    NoRoomForBlock {
        fft_block: usize,
        filter_overlap: usize,
        crossfade: usize,
        padding: usize,
    },

    #[error("angle {0} is outside 0..360")]
    AngleOutOfRange(u16),

    #[error("input chunk has {actual} samples, expected {expected}")]
    InputLength { expected: usize, actual: usize },

    #[error("output block has {actual} samples, expected {expected}")]
    OutputLength { expected: usize, actual: usize },

    #[error("FFT failed: {0}")]
    Fft(#[from] FftError),
}

/// The per-block contract the render loop drives.
///
/// Each block is `begin_block`, any number of `filter` calls (one per audible source),
/// then `end_block` which writes interleaved 16 bit stereo.
pub trait ConvolutionEngine: Send {
    /// Starts accumulating a new block.
    fn begin_block(&mut self);

    /// Convolves one source chunk with the HRIR pair at `angle` (0..360) and adds it to
    /// the block, scaled by `gain`.
    fn filter(&mut self, input: &[i16], angle: u16, gain: f32) -> Result<(), FilterError>;

    /// Finishes the block into `out`, optionally crossfading against the previous block.
    fn end_block(&mut self, crossfade: bool, out: &mut [i16]) -> Result<(), FilterError>;
}

/// Stereo accumulation for one ear pair.
struct Mix {
    left: Vec<f32>,
    right: Vec<f32>,
}

impl Mix {
    fn new(len: usize) -> Mix {
        Mix {
            left: vec![0.0; len],
            right: vec![0.0; len],
        }
    }
}

/// FFT based HRTF convolver.
pub struct HrtfConvolver {
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
    /// Per-angle HRIR spectra, pre-scaled by 1/N.
    left_spectra: Vec<Vec<Complex<f32>>>,
    right_spectra: Vec<Vec<Complex<f32>>>,

    fft_block: usize,
    input_len: usize,
    filter_overlap: usize,
    crossfade: usize,
    block: usize,

    time: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    product: Vec<Complex<f32>>,
    result: Vec<f32>,
    forward_scratch: Vec<Complex<f32>>,
    inverse_scratch: Vec<Complex<f32>>,

    mix: Mix,
    /// Tail of the previous block's mix, saved at begin_block.
    history: Mix,
    fade_in: Vec<f32>,
    fade_out: Vec<f32>,
}

impl HrtfConvolver {
    /// Creates a convolver for the given HRIRs. `fft_block` must fit the filter overlap,
    /// the crossfade, the padding and at least one sample of new audio.
    pub fn new(
        hrirs: &Hrirs,
        fft_block: usize,
        crossfade: usize,
        padding: usize,
    ) -> Result<HrtfConvolver, FilterError> {
        if hrirs.filter_len() == 0 {
            return Err(FilterError::NoCoefficients);
        }
        let filter_overlap = hrirs.filter_len() - 1;
        let mix_len = fft_block
            .checked_sub(filter_overlap + padding)
            .filter(|mix_len| *mix_len > crossfade)
            .ok_or(FilterError::NoRoomForBlock {
                fft_block,
                filter_overlap,
                crossfade,
                padding,
            })?;

        let mut planner = RealFftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(fft_block);
        let inverse = planner.plan_fft_inverse(fft_block);

        let mut time = forward.make_input_vec();
        let mut forward_scratch = forward.make_scratch_vec();
        let scale = 1.0 / fft_block as f32;
        let mut transform = |response: &[f32]| -> Result<Vec<Complex<f32>>, FilterError> {
            time.fill(0.0);
            time[..response.len()].copy_from_slice(response);
            let mut spectrum = forward.make_output_vec();
            forward.process_with_scratch(&mut time, &mut spectrum, &mut forward_scratch)?;
            spectrum.iter_mut().for_each(|bin| *bin *= scale);
            Ok(spectrum)
        };

        let mut left_spectra = Vec::with_capacity(HRIR_ANGLES);
        let mut right_spectra = Vec::with_capacity(HRIR_ANGLES);
        for angle in 0..HRIR_ANGLES {
            left_spectra.push(transform(hrirs.left(angle))?);
            right_spectra.push(transform(hrirs.right(angle))?);
        }

        let (fade_in, fade_out) = crossfade_tables(crossfade);
        Ok(HrtfConvolver {
            spectrum: forward.make_output_vec(),
            product: inverse.make_input_vec(),
            result: inverse.make_output_vec(),
            inverse_scratch: inverse.make_scratch_vec(),
            time,
            forward_scratch,
            forward,
            inverse,
            left_spectra,
            right_spectra,
            fft_block,
            input_len: fft_block - padding,
            filter_overlap,
            crossfade,
            block: mix_len - crossfade,
            mix: Mix::new(mix_len),
            history: Mix::new(crossfade),
            fade_in,
            fade_out,
        })
    }

    /// Samples of new audio per block.
    pub fn block_samples(&self) -> usize {
        self.block
    }

    fn accumulate(
        &mut self,
        spectra: &[Complex<f32>],
        gain: f32,
        left: bool,
    ) -> Result<(), FilterError> {
        for ((product, bin), response) in self
            .product
            .iter_mut()
            .zip(self.spectrum.iter())
            .zip(spectra.iter())
        {
            *product = bin * response;
        }
        // The inverse real transform requires real DC and Nyquist bins.
        self.product[0].im = 0.0;
        if self.fft_block % 2 == 0 {
            if let Some(nyquist) = self.product.last_mut() {
                nyquist.im = 0.0;
            }
        }
        self.inverse.process_with_scratch(
            &mut self.product,
            &mut self.result,
            &mut self.inverse_scratch,
        )?;

        let mix = if left {
            &mut self.mix.left
        } else {
            &mut self.mix.right
        };
        let valid = &self.result[self.filter_overlap..self.filter_overlap + mix.len()];
        for (out, sample) in mix.iter_mut().zip(valid) {
            *out += sample * gain;
        }
        Ok(())
    }
}

impl ConvolutionEngine for HrtfConvolver {
    fn begin_block(&mut self) {
        self.history
            .left
            .copy_from_slice(&self.mix.left[self.block..]);
        self.history
            .right
            .copy_from_slice(&self.mix.right[self.block..]);
        self.mix.left.fill(0.0);
        self.mix.right.fill(0.0);
    }

    fn filter(&mut self, input: &[i16], angle: u16, gain: f32) -> Result<(), FilterError> {
        let angle_index = usize::from(angle);
        if angle_index >= HRIR_ANGLES {
            return Err(FilterError::AngleOutOfRange(angle));
        }
        if input.len() != self.input_len {
            return Err(FilterError::InputLength {
                expected: self.input_len,
                actual: input.len(),
            });
        }

        for (time, sample) in self.time.iter_mut().zip(input) {
            *time = f32::from(*sample);
        }
        self.time[self.input_len..].fill(0.0);
        self.forward.process_with_scratch(
            &mut self.time,
            &mut self.spectrum,
            &mut self.forward_scratch,
        )?;

        // Move the spectra out while accumulating so the borrow of self stays simple.
        let left = std::mem::take(&mut self.left_spectra[angle_index]);
        let result = self.accumulate(&left, gain, true);
        self.left_spectra[angle_index] = left;
        result?;

        let right = std::mem::take(&mut self.right_spectra[angle_index]);
        let result = self.accumulate(&right, gain, false);
        self.right_spectra[angle_index] = right;
        result
    }

    fn end_block(&mut self, crossfade: bool, out: &mut [i16]) -> Result<(), FilterError> {
        if out.len() != self.block * 2 {
            return Err(FilterError::OutputLength {
                expected: self.block * 2,
                actual: out.len(),
            });
        }

        if crossfade {
            for i in 0..self.crossfade {
                self.mix.left[i] =
                    self.fade_in[i] * self.mix.left[i] + self.fade_out[i] * self.history.left[i];
                self.mix.right[i] =
                    self.fade_in[i] * self.mix.right[i] + self.fade_out[i] * self.history.right[i];
            }
        }

        for (frame, (left, right)) in out
            .chunks_exact_mut(2)
            .zip(self.mix.left.iter().zip(self.mix.right.iter()))
        {
            frame[0] = to_i16(*left);
            frame[1] = to_i16(*right);
        }
        Ok(())
    }
}

/// Raised-cosine tables: fade_out runs 1 -> 0 over the crossfade, fade_in is its complement.
fn crossfade_tables(len: usize) -> (Vec<f32>, Vec<f32>) {
    let span = len.saturating_sub(1).max(1) as f32;
    let fade_out: Vec<f32> = (0..len)
        .map(|i| (i as f32 / span * PI).cos() / 2.0 + 0.5)
        .collect();
    let fade_in = fade_out.iter().map(|out| 1.0 - out).collect();
    (fade_in, fade_out)
}

#[inline]
fn to_i16(sample: f32) -> i16 {
    sample.round().clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16
}

#[cfg(test)]
mod test {
    use super::*;

    const FILTER_LEN: usize = 4;
    const BLOCK: usize = 8;
    const CROSSFADE: usize = 4;
    // 8 + 3 + 4 = 15 needs a 16 point FFT with one sample of padding.
    const FFT_BLOCK: usize = 16;
    const PADDING: usize = 1;
    const INPUT: usize = FFT_BLOCK - PADDING;
    const OVERLAP: usize = FILTER_LEN - 1 + CROSSFADE;

    /// Identity on the left, half gain on the right, except at 90 degrees where the
    /// left ear is silent and the right is delayed by one sample.
    fn test_hrirs() -> Hrirs {
        let mut left = vec![vec![1.0, 0.0, 0.0, 0.0]; HRIR_ANGLES];
        let mut right = vec![vec![0.5, 0.0, 0.0, 0.0]; HRIR_ANGLES];
        left[90] = vec![0.0; FILTER_LEN];
        right[90] = vec![0.0, 1.0, 0.0, 0.0];
        Hrirs::new(left, right).unwrap()
    }

    fn convolver() -> HrtfConvolver {
        HrtfConvolver::new(&test_hrirs(), FFT_BLOCK, CROSSFADE, PADDING).unwrap()
    }

    fn chunk(overlap: &[i16], new: &[i16]) -> Vec<i16> {
        let mut chunk = overlap.to_vec();
        chunk.extend_from_slice(new);
        assert_eq!(INPUT, chunk.len());
        chunk
    }

    fn left(out: &[i16]) -> Vec<i16> {
        out.iter().step_by(2).copied().collect()
    }

    fn right(out: &[i16]) -> Vec<i16> {
        out.iter().skip(1).step_by(2).copied().collect()
    }

    #[test]
    fn test_identity_filter() {
        let mut convolver = convolver();
        assert_eq!(BLOCK, convolver.block_samples());

        let input = chunk(&[0; OVERLAP], &[100, 200, 300, 400, 500, 600, 700, 800]);
        let mut out = vec![0i16; BLOCK * 2];
        convolver.begin_block();
        convolver.filter(&input, 0, 1.0).unwrap();
        convolver.end_block(false, &mut out).unwrap();

        // Output lags the new audio by the crossfade length.
        assert_eq!(vec![0, 0, 0, 0, 100, 200, 300, 400], left(&out));
        assert_eq!(vec![0, 0, 0, 0, 50, 100, 150, 200], right(&out));
    }

    #[test]
    fn test_gain_and_sum() {
        let mut convolver = convolver();
        let input = chunk(&[0; OVERLAP], &[1000; BLOCK]);
        let mut out = vec![0i16; BLOCK * 2];
        convolver.begin_block();
        convolver.filter(&input, 10, 0.5).unwrap();
        convolver.filter(&input, 20, 0.25).unwrap();
        convolver.end_block(false, &mut out).unwrap();

        assert_eq!(750, left(&out)[BLOCK - 1]);
        assert_eq!(375, right(&out)[BLOCK - 1]);
    }

    #[test]
    fn test_angle_selects_hrir_pair() {
        let mut convolver = convolver();
        let input = chunk(&[0; OVERLAP], &[0, 0, 0, 0, 0, 1000, 0, 0]);
        let mut out = vec![0i16; BLOCK * 2];
        convolver.begin_block();
        convolver.filter(&input, 90, 1.0).unwrap();
        convolver.end_block(false, &mut out).unwrap();

        assert_eq!(vec![0; BLOCK], left(&out));
        // Delayed by one sample the impulse lands at mix 10, past this block's output, and
        // shows up at 2 in the next one.
        let mut next = vec![0i16; BLOCK * 2];
        convolver.begin_block();
        convolver
            .filter(&chunk(&input[BLOCK..], &[0; BLOCK]), 90, 1.0)
            .unwrap();
        convolver.end_block(false, &mut next).unwrap();
        assert_eq!(vec![0, 0, 1000, 0, 0, 0, 0, 0], right(&next));
        assert_eq!(vec![0; BLOCK], left(&next));
    }

    #[test]
    fn test_overlap_save_continuity() {
        // A steady signal split over two chunks stays steady across the seam.
        let mut convolver = convolver();
        let first = chunk(&[0; OVERLAP], &[500; BLOCK]);
        let second = chunk(&first[BLOCK..], &[500; BLOCK]);
        let mut out = vec![0i16; BLOCK * 2];

        convolver.begin_block();
        convolver.filter(&first, 0, 1.0).unwrap();
        convolver.end_block(true, &mut out).unwrap();
        convolver.begin_block();
        convolver.filter(&second, 0, 1.0).unwrap();
        convolver.end_block(true, &mut out).unwrap();

        assert_eq!(vec![500; BLOCK], left(&out));
        assert_eq!(vec![250; BLOCK], right(&out));
    }

    #[test]
    fn test_crossfade_blends_previous_tail() {
        let mut convolver = convolver();
        let first = chunk(&[0; OVERLAP], &[1000; BLOCK]);
        let second = chunk(&first[BLOCK..], &[1000; BLOCK]);
        let mut out = vec![0i16; BLOCK * 2];

        convolver.begin_block();
        convolver.filter(&first, 0, 1.0).unwrap();
        convolver.end_block(false, &mut out).unwrap();

        // Drop the gain to zero: the crossfade ramps from the old tail down to silence.
        convolver.begin_block();
        convolver.filter(&second, 0, 0.0).unwrap();
        convolver.end_block(true, &mut out).unwrap();
        let faded = left(&out);
        assert_eq!(1000, faded[0]);
        assert!(faded[1] < 1000 && faded[1] > faded[2]);
        assert_eq!(0, faded[CROSSFADE - 1]);
        assert_eq!(vec![0; BLOCK - CROSSFADE], faded[CROSSFADE..].to_vec());
    }

    #[test]
    fn test_no_crossfade_is_a_hard_cut() {
        let mut convolver = convolver();
        let first = chunk(&[0; OVERLAP], &[1000; BLOCK]);
        let second = chunk(&first[BLOCK..], &[1000; BLOCK]);
        let mut out = vec![0i16; BLOCK * 2];

        convolver.begin_block();
        convolver.filter(&first, 0, 1.0).unwrap();
        convolver.end_block(false, &mut out).unwrap();
        convolver.begin_block();
        convolver.filter(&second, 0, 0.0).unwrap();
        convolver.end_block(false, &mut out).unwrap();
        assert_eq!(vec![0; BLOCK], left(&out));
    }

    #[test]
    fn test_clamps_to_i16() {
        let mut convolver = convolver();
        let input = chunk(&[0; OVERLAP], &[i16::MAX; BLOCK]);
        let mut out = vec![0i16; BLOCK * 2];
        convolver.begin_block();
        convolver.filter(&input, 0, 4.0).unwrap();
        convolver.filter(&input, 1, 4.0).unwrap();
        convolver.end_block(false, &mut out).unwrap();
        assert_eq!(i16::MAX, left(&out)[BLOCK - 1]);

        let input = chunk(&[0; OVERLAP], &[i16::MIN; BLOCK]);
        convolver.begin_block();
        convolver.filter(&input, 0, 4.0).unwrap();
        convolver.end_block(false, &mut out).unwrap();
        assert_eq!(i16::MIN, left(&out)[BLOCK - 1]);
    }

    #[test]
    fn test_errors() {
        let mut convolver = convolver();
        assert!(matches!(
            convolver.filter(&[0; INPUT], 360, 1.0),
            Err(FilterError::AngleOutOfRange(360))
        ));
        assert!(matches!(
            convolver.filter(&[0; INPUT - 1], 0, 1.0),
            Err(FilterError::InputLength {
                expected: INPUT,
                actual: 14
            })
        ));
        assert!(matches!(
            convolver.end_block(false, &mut [0; BLOCK]),
            Err(FilterError::OutputLength { .. })
        ));
        assert!(matches!(
            HrtfConvolver::new(&test_hrirs(), 8, CROSSFADE, 1),
            Err(FilterError::NoRoomForBlock { .. })
        ));
    }

    #[test]
    fn test_crossfade_tables() {
        let (fade_in, fade_out) = crossfade_tables(5);
        assert_eq!(1.0, fade_out[0]);
        assert!((fade_out[2] - 0.5).abs() < 1e-6);
        assert!(fade_out[4].abs() < 1e-6);
        for (i, o) in fade_in.iter().zip(fade_out.iter()) {
            assert!((i + o - 1.0).abs() < 1e-6);
        }
        let (fade_in, fade_out) = crossfade_tables(0);
        assert!(fade_in.is_empty() && fade_out.is_empty());
    }
}
