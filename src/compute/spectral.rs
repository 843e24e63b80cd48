//! Frequency-domain convolution for large kernel radii.
//!
//! The field is transformed once per step; each kernel's spectrum is cached
//! by fingerprint and reused until the kernel changes.
//!
//! A periodic power-of-two square grid is transformed as is. Every other
//! grid is embedded in a larger power-of-two square with a margin of
//! `max_radius` cells filled according to the boundary policy, so the
//! circular wrap of the transform never reaches a cell that is read back.
//! Results match [`convolve_direct`](super::convolve_direct) for every
//! boundary mode up to floating-point error.

use num_complex::Complex;
use rayon::prelude::*;

use crate::schema::BoundaryMode;

use super::{Complex32, Fft2d, FftError, KernelEntry};

const ZERO: Complex32 = Complex::new(0.0, 0.0);

/// Kernel spectrum; an empty slot has no fingerprint.
#[derive(Debug, Clone, Default)]
struct CachedSpectrum {
    fingerprint: Option<u64>,
    spectrum: Vec<Complex32>,
}

/// FFT-based convolver with a per-kernel spectrum cache.
pub struct SpectralConvolver {
    width: usize,
    height: usize,
    boundary: BoundaryMode,
    /// Transform side length.
    size: usize,
    /// Boundary-filled border around the field inside the transform grid.
    margin: usize,
    fft: Fft2d,
    field_spectrum: Vec<Complex32>,
    product: Vec<Complex32>,
    cache: Vec<CachedSpectrum>,
}

impl SpectralConvolver {
    /// Transform side and embedding margin for a grid.
    pub fn plan_size(
        width: usize,
        height: usize,
        boundary: BoundaryMode,
        max_radius: usize,
    ) -> (usize, usize) {
        if boundary == BoundaryMode::Periodic && width == height && width.is_power_of_two() {
            return (width, 0);
        }
        let margin = max_radius;
        let size = (width.max(height) + 2 * margin).next_power_of_two();
        (size, margin)
    }

    pub fn new(
        width: usize,
        height: usize,
        boundary: BoundaryMode,
        max_radius: usize,
    ) -> Result<Self, FftError> {
        let (size, margin) = Self::plan_size(width, height, boundary, max_radius);
        let fft = Fft2d::new(size)?;

        log::debug!(
            "spectral plan: {}x{} grid, {:?} boundary, transform {}x{} (margin {})",
            width,
            height,
            boundary,
            size,
            size,
            margin
        );

        Ok(Self {
            width,
            height,
            boundary,
            size,
            margin,
            fft,
            field_spectrum: vec![ZERO; size * size],
            product: vec![ZERO; size * size],
            cache: Vec::new(),
        })
    }

    /// Whether this plan can serve the given grid and kernel radius.
    pub fn supports(
        &self,
        width: usize,
        height: usize,
        boundary: BoundaryMode,
        max_radius: usize,
    ) -> bool {
        if self.width != width || self.height != height || self.boundary != boundary {
            return false;
        }
        match Self::plan_size(width, height, boundary, max_radius) {
            (size, 0) => self.size == size && self.margin == 0,
            (_, margin) => self.margin >= margin,
        }
    }

    /// Embed and transform the field. Call once per step before
    /// [`Self::convolve_into`].
    pub fn load_field(&mut self, field: &[f32]) {
        assert_eq!(field.len(), self.width * self.height);

        let (w, h, s, m) = (self.width, self.height, self.size, self.margin);
        let boundary = self.boundary;
        let span_x = w + 2 * m;
        let span_y = h + 2 * m;

        self.field_spectrum
            .par_chunks_mut(s)
            .enumerate()
            .for_each(|(py, row)| {
                for (px, cell) in row.iter_mut().enumerate() {
                    let value = if px < span_x && py < span_y {
                        let x = px as i32 - m as i32;
                        let y = py as i32 - m as i32;
                        boundary.sample(field, x, y, w, h)
                    } else {
                        0.0
                    };
                    *cell = Complex::new(value, 0.0);
                }
            });

        self.fft.forward(&mut self.field_spectrum);
    }

    /// Convolve the loaded field with kernel `index`, writing `width * height`
    /// values into `output`.
    pub fn convolve_into(&mut self, index: usize, entry: &KernelEntry, output: &mut [f32]) {
        assert_eq!(output.len(), self.width * self.height);
        let kernel = cached_spectrum(&mut self.cache, &mut self.fft, self.size, index, entry);

        self.product
            .par_iter_mut()
            .zip(self.field_spectrum.par_iter())
            .zip(kernel.par_iter())
            .for_each(|((p, f), k)| *p = f * k);

        self.fft.inverse(&mut self.product);

        let (w, s, m) = (self.width, self.size, self.margin);
        let scale = self.fft.inverse_scale();
        let product = &self.product;

        output
            .par_chunks_mut(w)
            .enumerate()
            .for_each(|(y, row)| {
                let base = (y + m) * s + m;
                for (x, out) in row.iter_mut().enumerate() {
                    *out = product[base + x].re * scale;
                }
            });
    }

    /// Drop the cached spectrum for one kernel.
    pub fn invalidate(&mut self, index: usize) {
        if let Some(slot) = self.cache.get_mut(index) {
            *slot = CachedSpectrum::default();
        }
    }

    /// Drop every cached spectrum.
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    /// Number of kernels with a cached spectrum.
    pub fn cached_count(&self) -> usize {
        self.cache.iter().filter(|c| c.fingerprint.is_some()).count()
    }
}

/// Spectrum for kernel `index`, recomputed when the fingerprint changed.
fn cached_spectrum<'a>(
    cache: &'a mut Vec<CachedSpectrum>,
    fft: &mut Fft2d,
    size: usize,
    index: usize,
    entry: &KernelEntry,
) -> &'a [Complex32] {
    if index >= cache.len() {
        cache.resize_with(index + 1, CachedSpectrum::default);
    }

    let slot = &mut cache[index];
    if slot.fingerprint != Some(entry.fingerprint) {
        let padded = entry.data.pad_to_size(size);
        let mut spectrum = vec![ZERO; size * size];
        fft.forward_real(&padded, &mut spectrum);

        log::debug!(
            "cached spectrum for kernel {} (radius {}, fingerprint {:016x})",
            index,
            entry.data.radius,
            entry.fingerprint
        );
        *slot = CachedSpectrum {
            fingerprint: Some(entry.fingerprint),
            spectrum,
        };
    }
    &slot.spectrum
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::{KernelData, KernelTaps, convolve_direct, generate_normalized};
    use crate::schema::{KernelParams, KernelShape};

    fn entry(params: &KernelParams) -> KernelEntry {
        KernelEntry {
            fingerprint: params.fingerprint(),
            data: generate_normalized(params).unwrap(),
        }
    }

    fn pattern(width: usize, height: usize) -> Vec<f32> {
        (0..width * height)
            .map(|i| {
                let x = (i % width) as f32;
                let y = (i / width) as f32;
                ((x * 0.37).sin() * (y * 0.23).cos() * 0.5 + 0.5).clamp(0.0, 1.0)
            })
            .collect()
    }

    fn assert_matches_direct(entry: &KernelEntry, width: usize, height: usize, boundary: BoundaryMode) {
        let field = pattern(width, height);
        let expected = convolve_direct(
            &field,
            &KernelTaps::from_kernel(&entry.data),
            width,
            height,
            boundary,
        );

        let mut spectral = SpectralConvolver::new(width, height, boundary, entry.data.radius).unwrap();
        spectral.load_field(&field);
        let mut actual = vec![0.0f32; width * height];
        spectral.convolve_into(0, entry, &mut actual);

        for i in 0..width * height {
            assert!(
                (expected[i] - actual[i]).abs() < 1e-4,
                "{:?} {}x{} mismatch at ({}, {}): direct {} vs spectral {}",
                boundary,
                width,
                height,
                i % width,
                i / width,
                expected[i],
                actual[i]
            );
        }
    }

    #[test]
    fn test_plan_size() {
        assert_eq!(SpectralConvolver::plan_size(64, 64, BoundaryMode::Periodic, 20), (64, 0));
        assert_eq!(SpectralConvolver::plan_size(64, 64, BoundaryMode::Zero, 20), (128, 20));
        assert_eq!(SpectralConvolver::plan_size(100, 60, BoundaryMode::Periodic, 10), (128, 10));
        assert_eq!(SpectralConvolver::plan_size(40, 24, BoundaryMode::Clamped, 5), (64, 5));
    }

    #[test]
    fn test_matches_direct_all_boundaries() {
        let gaussian = entry(&KernelParams::new(KernelShape::Gaussian, 5));
        for boundary in [
            BoundaryMode::Periodic,
            BoundaryMode::Clamped,
            BoundaryMode::Reflected,
            BoundaryMode::Zero,
        ] {
            assert_matches_direct(&gaussian, 40, 24, boundary);
        }
    }

    #[test]
    fn test_asymmetric_kernel_orientation() {
        // Only the tap at (+1, 0) is set, so output(x, y) == input(x + 1, y)
        let mut weights = vec![0.0f32; 9];
        weights[5] = 1.0;
        let entry = KernelEntry {
            fingerprint: 7,
            data: KernelData {
                weights,
                size: 3,
                radius: 1,
                sum: 1.0,
            },
        };

        for boundary in [BoundaryMode::Periodic, BoundaryMode::Zero] {
            assert_matches_direct(&entry, 16, 16, boundary);
            assert_matches_direct(&entry, 20, 12, boundary);
        }
    }

    #[test]
    fn test_large_kernel_periodic() {
        let poly = entry(&KernelParams::new(KernelShape::Polynomial, 20).with_peaks(vec![0.5, 1.0]));
        assert_matches_direct(&poly, 64, 64, BoundaryMode::Periodic);
    }

    #[test]
    fn test_kernel_wider_than_periodic_grid() {
        // Radius 13 on a 16x16 torus: the footprint folds onto itself
        let ring = entry(&KernelParams::new(KernelShape::Ring, 13));
        assert_matches_direct(&ring, 16, 16, BoundaryMode::Periodic);
    }

    #[test]
    fn test_spectrum_cache() {
        let params = KernelParams::new(KernelShape::Gaussian, 6);
        let first = entry(&params);
        let mut spectral = SpectralConvolver::new(32, 32, BoundaryMode::Periodic, 6).unwrap();
        spectral.load_field(&pattern(32, 32));

        let mut out = vec![0.0f32; 32 * 32];
        spectral.convolve_into(0, &first, &mut out);
        spectral.convolve_into(1, &first, &mut out);
        assert_eq!(spectral.cached_count(), 2);

        // A new fingerprint replaces the cached spectrum in place
        let second = entry(&KernelParams::new(KernelShape::Gaussian, 4));
        spectral.convolve_into(0, &second, &mut out);
        assert_eq!(spectral.cached_count(), 2);

        spectral.invalidate(1);
        assert_eq!(spectral.cached_count(), 1);
        spectral.clear();
        assert_eq!(spectral.cached_count(), 0);
        spectral.convolve_into(0, &second, &mut out);
        assert_eq!(spectral.cached_count(), 1);
    }

    #[test]
    fn test_supports() {
        let spectral = SpectralConvolver::new(48, 32, BoundaryMode::Reflected, 8).unwrap();
        assert!(spectral.supports(48, 32, BoundaryMode::Reflected, 8));
        assert!(!spectral.supports(48, 32, BoundaryMode::Zero, 8));
        assert!(!spectral.supports(48, 32, BoundaryMode::Reflected, 20));
        // A smaller radius still fits inside the existing margin
        assert!(spectral.supports(48, 32, BoundaryMode::Reflected, 7));
        assert!(!spectral.supports(32, 32, BoundaryMode::Reflected, 8));
    }
}
