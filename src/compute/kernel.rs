//! Kernel generation for multi-kernel Lenia.
//!
//! Kernels are radial profiles sampled on a `(2R+1)^2` footprint with the
//! exact centre excluded, normalized so the weights sum to 1.

use crate::schema::{KernelParams, KernelShape};

/// Cells closer than this (in units of the radius) are forced to zero.
const CENTER_EXCLUSION: f32 = 0.01;
/// Half-width of each step-shaped shell.
const STEP_HALF_WIDTH: f32 = 0.25;

/// Kernel generation errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum KernelError {
    #[error("kernel radius must be positive")]
    ZeroRadius,
    #[error("custom kernel needs {expected} weights, got {actual}")]
    CustomWeightsMismatch { expected: usize, actual: usize },
}

/// Generated kernel footprint ready for convolution.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelData {
    /// Row-major weights, `size * size` entries.
    pub weights: Vec<f32>,
    /// Footprint side length, `2 * radius + 1`.
    pub size: usize,
    pub radius: usize,
    /// Sum of all weights.
    pub sum: f32,
}

impl KernelData {
    /// Get kernel value at (x, y) position.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.weights[y * self.size + x]
    }

    /// Centre weight.
    #[inline]
    pub fn center(&self) -> f32 {
        self.get(self.radius, self.radius)
    }

    /// Scale weights so they sum to 1.
    ///
    /// A kernel whose weights sum to zero (or to a non-finite value)
    /// normalizes to all zeros instead of producing NaN.
    pub fn normalized(&self) -> Self {
        let sum: f32 = self.weights.iter().sum();
        if sum == 0.0 || !sum.is_finite() {
            return Self {
                weights: vec![0.0; self.weights.len()],
                size: self.size,
                radius: self.radius,
                sum: 0.0,
            };
        }

        let inv_sum = 1.0 / sum;
        let weights: Vec<f32> = self.weights.iter().map(|w| w * inv_sum).collect();
        let sum = weights.iter().sum();
        Self {
            weights,
            size: self.size,
            radius: self.radius,
            sum,
        }
    }

    /// Zero-pad into an `size x size` grid with the kernel centre at (0, 0).
    ///
    /// The tap at offset (dx, dy) lands at ((-dx) mod size, (-dy) mod size),
    /// so a circular convolution with the padded kernel computes the same
    /// neighbour sum as the direct path. Footprints wider than `size` fold
    /// onto themselves, matching wrapped taps on a periodic grid.
    pub fn pad_to_size(&self, size: usize) -> Vec<f32> {
        let mut padded = vec![0.0f32; size * size];
        let r = self.radius as i32;

        for ky in 0..self.size {
            for kx in 0..self.size {
                let dx = kx as i32 - r;
                let dy = ky as i32 - r;
                let tx = super::wrap_coord(-dx, size);
                let ty = super::wrap_coord(-dy, size);
                padded[ty * size + tx] += self.weights[ky * self.size + kx];
            }
        }

        padded
    }
}

/// Generate an unnormalized kernel footprint.
pub fn generate_kernel(params: &KernelParams) -> Result<KernelData, KernelError> {
    if params.radius == 0 {
        return Err(KernelError::ZeroRadius);
    }

    let radius = params.radius;
    let size = radius * 2 + 1;
    let center = radius as f32;

    let mut weights = match params.shape {
        KernelShape::Custom => {
            let expected = size * size;
            match &params.custom_weights {
                Some(w) if w.len() == expected => w.clone(),
                other => {
                    return Err(KernelError::CustomWeightsMismatch {
                        expected,
                        actual: other.as_ref().map_or(0, Vec::len),
                    });
                }
            }
        }
        _ => vec![0.0f32; size * size],
    };

    for y in 0..size {
        for x in 0..size {
            let dx = x as f32 - center;
            let dy = y as f32 - center;
            // Normalized distance (0 at center, 1 at radius)
            let r = (dx * dx + dy * dy).sqrt() / radius as f32;
            let idx = y * size + x;

            if r < CENTER_EXCLUSION {
                weights[idx] = 0.0;
                continue;
            }
            if params.shape == KernelShape::Custom {
                continue;
            }
            if r > 1.0 {
                continue;
            }

            weights[idx] = shape_value(params, r);
        }
    }

    let sum = weights.iter().sum();
    Ok(KernelData {
        weights,
        size,
        radius,
        sum,
    })
}

/// Generate and normalize in one go.
pub fn generate_normalized(params: &KernelParams) -> Result<KernelData, KernelError> {
    generate_kernel(params).map(|k| k.normalized())
}

/// Radial profile at normalized distance `r` in (0, 1].
fn shape_value(params: &KernelParams, r: f32) -> f32 {
    match params.shape {
        KernelShape::Gaussian => {
            let z = (r - 0.5) / 0.15;
            (-0.5 * z * z).exp()
        }
        KernelShape::Ring => {
            let half_width = params.ring_width / 2.0;
            let mid = 1.0 - half_width;
            let d = (r - mid).abs() / half_width;
            if d < 1.0 {
                let t = 1.0 - d * d;
                t * t
            } else {
                0.0
            }
        }
        KernelShape::Polynomial => params
            .peaks
            .iter()
            .map(|&p| {
                let d = r - p;
                if d.abs() < 1.0 { (1.0 - d * d).powi(4) } else { 0.0 }
            })
            .sum(),
        KernelShape::Step => params
            .peaks
            .iter()
            .filter(|&&p| (r - p).abs() <= STEP_HALF_WIDTH)
            .count() as f32,
        KernelShape::Custom => 0.0,
    }
}

/// A generated kernel together with the fingerprint it was built from.
#[derive(Debug, Clone)]
pub struct KernelEntry {
    pub fingerprint: u64,
    pub data: KernelData,
}

/// Owned cache of normalized kernels, one per rule entry.
///
/// Entries are regenerated only when their fingerprint changes.
#[derive(Debug, Clone, Default)]
pub struct KernelBank {
    entries: Vec<KernelEntry>,
}

impl KernelBank {
    /// Create kernel bank from configuration.
    pub fn from_params(params: &[KernelParams]) -> Result<Self, KernelError> {
        let mut bank = Self::default();
        bank.sync(params)?;
        Ok(bank)
    }

    /// Bring the bank in line with `params`, returning the indices that were
    /// regenerated. On error the bank is left unchanged.
    pub fn sync(&mut self, params: &[KernelParams]) -> Result<Vec<usize>, KernelError> {
        let mut entries = Vec::with_capacity(params.len());
        let mut regenerated = Vec::new();

        for (i, p) in params.iter().enumerate() {
            let fingerprint = p.fingerprint();
            match self.entries.get(i) {
                Some(entry) if entry.fingerprint == fingerprint => entries.push(entry.clone()),
                _ => {
                    entries.push(KernelEntry {
                        fingerprint,
                        data: generate_normalized(p)?,
                    });
                    regenerated.push(i);
                }
            }
        }

        if !regenerated.is_empty() {
            log::debug!("regenerated kernels {:?}", regenerated);
        }
        self.entries = entries;
        Ok(regenerated)
    }

    pub fn entries(&self) -> &[KernelEntry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&KernelEntry> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn all_shapes(radius: usize) -> Vec<KernelParams> {
        vec![
            KernelParams::new(KernelShape::Gaussian, radius),
            KernelParams::new(KernelShape::Ring, radius).with_ring_width(0.3),
            KernelParams::new(KernelShape::Polynomial, radius).with_peaks(vec![0.25, 0.75]),
            KernelParams::new(KernelShape::Step, radius),
        ]
    }

    #[test]
    fn test_kernel_normalization() {
        for params in all_shapes(13) {
            let kernel = generate_normalized(&params).unwrap();
            let sum: f32 = kernel.weights.iter().sum();

            // Should sum to approximately 1
            assert!((sum - 1.0).abs() < 1e-5, "{:?} kernel sum: {}", params.shape, sum);
            assert_eq!(kernel.size, 27);
        }
    }

    #[test]
    fn test_center_zeroed() {
        for radius in [1, 3, 13, 40] {
            for params in all_shapes(radius) {
                let kernel = generate_normalized(&params).unwrap();
                assert_eq!(kernel.center(), 0.0, "{:?} r={}", params.shape, radius);
            }
        }

        // Custom weights get the centre excluded too
        let custom = KernelParams::custom(3, vec![1.0; 49]);
        let kernel = generate_normalized(&custom).unwrap();
        assert_eq!(kernel.center(), 0.0);
        assert!((kernel.sum - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_kernel_symmetry() {
        for params in all_shapes(10) {
            let kernel = generate_normalized(&params).unwrap();
            let size = kernel.size;
            for y in 0..size {
                for x in 0..size {
                    let v = kernel.get(x, y);
                    assert!((v - kernel.get(size - 1 - x, y)).abs() < 1e-10);
                    assert!((v - kernel.get(x, size - 1 - y)).abs() < 1e-10);
                }
            }
        }
    }

    #[test]
    fn test_zero_radius_rejected() {
        let params = KernelParams::new(KernelShape::Gaussian, 0);
        assert_eq!(generate_kernel(&params).unwrap_err(), KernelError::ZeroRadius);
    }

    #[test]
    fn test_custom_wrong_length_rejected() {
        let params = KernelParams::custom(3, vec![1.0; 10]);
        assert_eq!(
            generate_kernel(&params).unwrap_err(),
            KernelError::CustomWeightsMismatch {
                expected: 49,
                actual: 10
            }
        );
    }

    #[test]
    fn test_zero_sum_normalizes_to_zero() {
        // Step shell beyond the footprint leaves nothing
        let params = KernelParams::new(KernelShape::Step, 5).with_peaks(vec![]);
        let kernel = generate_normalized(&params).unwrap();
        assert!(kernel.weights.iter().all(|&w| w == 0.0));
        assert_eq!(kernel.sum, 0.0);

        let cancelling = KernelData {
            weights: vec![1.0, -1.0, 0.0, 0.0],
            size: 2,
            radius: 0,
            sum: 0.0,
        };
        let normalized = cancelling.normalized();
        assert!(normalized.weights.iter().all(|w| w.is_finite() && *w == 0.0));
    }

    #[test]
    fn test_ring_confined_to_outer_band() {
        let params = KernelParams::new(KernelShape::Ring, 20).with_ring_width(0.25);
        let kernel = generate_normalized(&params).unwrap();
        let c = kernel.radius;
        // Inside the band's inner edge (r = 0.5) there is nothing
        assert_eq!(kernel.get(c + 10, c), 0.0);
        // Middle of the band carries weight
        assert!(kernel.get(c + 17, c) > 0.0);
    }

    #[test]
    fn test_pad_to_size_places_center_at_origin() {
        let params = KernelParams::custom(1, vec![1.0, 2.0, 3.0, 4.0, 0.0, 6.0, 7.0, 8.0, 9.0]);
        let kernel = generate_kernel(&params).unwrap();
        let padded = kernel.pad_to_size(8);

        // Centre tap lands at (0, 0)
        assert_eq!(padded[0], 0.0);
        // Tap at offset (+1, 0) lands at (-1 mod 8, 0)
        assert_eq!(padded[7], 6.0);
        // Tap at offset (-1, -1) lands at (1, 1)
        assert_eq!(padded[8 + 1], 1.0);
        let total: f32 = padded.iter().sum();
        assert_eq!(total, 40.0);

        // Folding onto a 2x2 grid keeps the total
        let folded = kernel.pad_to_size(2);
        assert_eq!(folded.iter().sum::<f32>(), 40.0);
    }

    #[test]
    fn test_bank_regenerates_only_changed() {
        let mut params = all_shapes(8);
        let mut bank = KernelBank::from_params(&params).unwrap();
        assert_eq!(bank.len(), 4);

        // Weight-only change keeps every entry
        params[1].weight = 0.5;
        assert!(bank.sync(&params).unwrap().is_empty());

        params[2].radius = 9;
        assert_eq!(bank.sync(&params).unwrap(), vec![2]);
        assert_eq!(bank.get(2).unwrap().data.radius, 9);

        params.truncate(2);
        assert!(bank.sync(&params).unwrap().is_empty());
        assert_eq!(bank.len(), 2);
    }

    #[test]
    fn test_bank_sync_failure_keeps_state() {
        let params = all_shapes(8);
        let mut bank = KernelBank::from_params(&params).unwrap();

        let mut broken = params.clone();
        broken[3].radius = 0;
        assert!(bank.sync(&broken).is_err());
        assert_eq!(bank.get(3).unwrap().data.radius, 8);
    }

    proptest! {
        #[test]
        fn prop_normalize_idempotent(radius in 1usize..20, peak in 0.05f32..0.95, shape_idx in 0usize..4) {
            let shape = [
                KernelShape::Gaussian,
                KernelShape::Ring,
                KernelShape::Polynomial,
                KernelShape::Step,
            ][shape_idx];
            let params = KernelParams::new(shape, radius).with_peaks(vec![peak]);
            let once = generate_normalized(&params).unwrap();
            let twice = once.normalized();

            if once.sum != 0.0 {
                prop_assert!((twice.sum - 1.0).abs() < 1e-5);
            }
            for (a, b) in once.weights.iter().zip(twice.weights.iter()) {
                prop_assert!((a - b).abs() < 1e-6);
            }
        }
    }
}
