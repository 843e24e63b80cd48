//! Radix-2 FFT for the spectral convolution path.
//!
//! The 1D transform is the iterative Stockham formulation: `log2(n)`
//! butterfly stages ping-pong between the data buffer and a work buffer, so
//! no bit-reversal permutation is needed and the output is in natural order.
//! The 2D transform runs rows, then columns (via a transpose), for both
//! directions.

use std::f64::consts::PI;

use num_complex::Complex;
use rayon::prelude::*;

pub type Complex32 = Complex<f32>;

const ZERO: Complex32 = Complex::new(0.0, 0.0);

/// Transform direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FftDirection {
    Forward,
    /// Unnormalized inverse (conjugated twiddles).
    Inverse,
}

/// FFT planning errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FftError {
    #[error("transform size {0} is not a power of two")]
    NonPowerOfTwo(usize),
}

/// 1D radix-2 transform plan.
#[derive(Debug, Clone)]
pub struct Fft1d {
    size: usize,
    stages: u32,
    /// `exp(-2*pi*i*k/size)` for `k < size/2`.
    twiddles: Vec<Complex32>,
}

impl Fft1d {
    pub fn new(size: usize) -> Result<Self, FftError> {
        if !size.is_power_of_two() {
            return Err(FftError::NonPowerOfTwo(size));
        }

        // Twiddles are computed in f64 to keep large transforms accurate
        let twiddles = (0..size / 2)
            .map(|k| {
                let theta = -2.0 * PI * k as f64 / size as f64;
                Complex::new(theta.cos() as f32, theta.sin() as f32)
            })
            .collect();

        Ok(Self {
            size,
            stages: size.trailing_zeros(),
            twiddles,
        })
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of butterfly stages, `log2(size)`.
    #[inline]
    pub fn stages(&self) -> u32 {
        self.stages
    }

    #[inline]
    fn twiddle(&self, k: usize, direction: FftDirection) -> Complex32 {
        match direction {
            FftDirection::Forward => self.twiddles[k],
            FftDirection::Inverse => self.twiddles[k].conj(),
        }
    }

    /// Transform `data` in place, using `work` as the ping-pong buffer.
    pub fn process(&self, data: &mut [Complex32], work: &mut [Complex32], direction: FftDirection) {
        assert_eq!(data.len(), self.size);
        assert_eq!(work.len(), self.size);

        let mut src: &mut [Complex32] = data;
        let mut dst: &mut [Complex32] = work;
        let mut n = self.size;
        let mut stride = 1;

        while n > 1 {
            let half = n / 2;
            for p in 0..half {
                let w = self.twiddle(p * stride, direction);
                for q in 0..stride {
                    let a = src[q + stride * p];
                    let b = src[q + stride * (p + half)];
                    dst[q + stride * 2 * p] = a + b;
                    dst[q + stride * (2 * p + 1)] = (a - b) * w;
                }
            }
            std::mem::swap(&mut src, &mut dst);
            n = half;
            stride *= 2;
        }

        // After an odd number of stages the result sits in the work buffer
        if self.stages % 2 == 1 {
            dst.copy_from_slice(src);
        }
    }
}

/// Square 2D transform of side `size`, row-major.
pub struct Fft2d {
    plan: Fft1d,
    /// Transpose scratch for the column pass.
    transposed: Vec<Complex32>,
}

impl Fft2d {
    pub fn new(size: usize) -> Result<Self, FftError> {
        let plan = Fft1d::new(size)?;
        Ok(Self {
            plan,
            transposed: vec![ZERO; size * size],
        })
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.plan.size()
    }

    /// Scale that undoes an inverse transform, `1 / size^2`.
    #[inline]
    pub fn inverse_scale(&self) -> f32 {
        let n = self.size() as f32;
        1.0 / (n * n)
    }

    pub fn forward(&mut self, data: &mut [Complex32]) {
        self.transform(data, FftDirection::Forward);
    }

    /// Unnormalized inverse; multiply by [`Self::inverse_scale`] afterwards.
    pub fn inverse(&mut self, data: &mut [Complex32]) {
        self.transform(data, FftDirection::Inverse);
    }

    /// Forward transform of a real `size x size` grid.
    pub fn forward_real(&mut self, input: &[f32], output: &mut [Complex32]) {
        assert_eq!(input.len(), output.len());
        for (o, &x) in output.iter_mut().zip(input.iter()) {
            *o = Complex::new(x, 0.0);
        }
        self.forward(output);
    }

    /// Rows, then columns. Both directions share this exact ordering.
    fn transform(&mut self, data: &mut [Complex32], direction: FftDirection) {
        let size = self.size();
        assert_eq!(data.len(), size * size);

        let plan = &self.plan;
        transform_rows(plan, data, direction);

        transpose(data, &mut self.transposed, size);
        transform_rows(plan, &mut self.transposed, direction);
        transpose(&self.transposed, data, size);
    }
}

fn transform_rows(plan: &Fft1d, data: &mut [Complex32], direction: FftDirection) {
    let size = plan.size();
    data.par_chunks_mut(size).for_each_init(
        || vec![ZERO; size],
        |work, row| plan.process(row, work, direction),
    );
}

fn transpose(src: &[Complex32], dst: &mut [Complex32], size: usize) {
    dst.par_chunks_mut(size).enumerate().for_each(|(x, out_row)| {
        for (y, out) in out_row.iter_mut().enumerate() {
            *out = src[y * size + x];
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustfft::FftPlanner;

    fn test_signal(n: usize) -> Vec<Complex32> {
        (0..n)
            .map(|i| Complex::new(((i * 7) % 11) as f32 / 11.0, ((i * 3) % 5) as f32 / 5.0))
            .collect()
    }

    #[test]
    fn test_non_power_of_two_rejected() {
        assert_eq!(Fft1d::new(48).unwrap_err(), FftError::NonPowerOfTwo(48));
        assert_eq!(Fft1d::new(0).unwrap_err(), FftError::NonPowerOfTwo(0));
        assert!(Fft2d::new(100).is_err());
        assert!(Fft2d::new(64).is_ok());
    }

    #[test]
    fn test_matches_reference_1d() {
        let mut planner = FftPlanner::<f32>::new();

        for n in [1, 2, 4, 8, 32, 128] {
            let plan = Fft1d::new(n).unwrap();
            let mut ours = test_signal(n);
            let mut reference = ours.clone();
            let mut work = vec![ZERO; n];

            plan.process(&mut ours, &mut work, FftDirection::Forward);
            planner.plan_fft_forward(n).process(&mut reference);

            for (a, b) in ours.iter().zip(reference.iter()) {
                assert!((a - b).norm() < 1e-3, "n={}: {} vs {}", n, a, b);
            }
        }
    }

    #[test]
    fn test_inverse_matches_reference_1d() {
        let mut planner = FftPlanner::<f32>::new();
        let n = 64;
        let plan = Fft1d::new(n).unwrap();
        let mut ours = test_signal(n);
        let mut reference = ours.clone();
        let mut work = vec![ZERO; n];

        plan.process(&mut ours, &mut work, FftDirection::Inverse);
        planner.plan_fft_inverse(n).process(&mut reference);

        for (a, b) in ours.iter().zip(reference.iter()) {
            assert!((a - b).norm() < 1e-3);
        }
    }

    #[test]
    fn test_fft_identity() {
        // Forward then inverse should recover the input for every stage parity
        for size in [2, 4, 8, 16, 32, 64] {
            let mut fft = Fft2d::new(size).unwrap();
            let input: Vec<f32> = (0..size * size).map(|i| (i % 10) as f32).collect();

            let mut freq = vec![ZERO; size * size];
            fft.forward_real(&input, &mut freq);
            fft.inverse(&mut freq);
            let scale = fft.inverse_scale();

            for (orig, rec) in input.iter().zip(freq.iter()) {
                assert!(
                    (orig - rec.re * scale).abs() < 1e-3,
                    "FFT roundtrip failed for {}x{}: {} vs {}",
                    size,
                    size,
                    orig,
                    rec.re * scale
                );
                assert!((rec.im * scale).abs() < 1e-3);
            }
        }
    }

    #[test]
    fn test_matches_reference_2d() {
        let size = 16;
        let mut fft = Fft2d::new(size).unwrap();
        let input = test_signal(size * size);
        let mut ours = input.clone();
        fft.forward(&mut ours);

        // Reference: rows then columns with rustfft
        let mut planner = FftPlanner::<f32>::new();
        let plan = planner.plan_fft_forward(size);
        let mut reference = input;
        for row in reference.chunks_exact_mut(size) {
            plan.process(row);
        }
        let mut column = vec![ZERO; size];
        for x in 0..size {
            for y in 0..size {
                column[y] = reference[y * size + x];
            }
            plan.process(&mut column);
            for y in 0..size {
                reference[y * size + x] = column[y];
            }
        }

        for (a, b) in ours.iter().zip(reference.iter()) {
            assert!((a - b).norm() < 1e-2, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_delta_has_flat_spectrum() {
        let size = 8;
        let mut fft = Fft2d::new(size).unwrap();
        let mut input = vec![0.0f32; size * size];
        input[0] = 1.0;

        let mut freq = vec![ZERO; size * size];
        fft.forward_real(&input, &mut freq);

        for c in &freq {
            assert!((c.re - 1.0).abs() < 1e-6);
            assert!(c.im.abs() < 1e-6);
        }
    }
}
