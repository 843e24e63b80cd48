//! Merging per-kernel growth fields into one.

use rayon::prelude::*;

use crate::schema::CombinationMode;

/// Merge growth fields `g_i` with kernel weights `h_i` into `output`.
///
/// `Sum` and `Weighted` both compute `sum(h_i * g_i)`; `Weighted` leaves the
/// weights as given even when they do not sum to 1. `Average` divides that
/// sum by the number of kernels.
pub fn combine_into(
    growth_fields: &[Vec<f32>],
    weights: &[f32],
    mode: CombinationMode,
    output: &mut [f32],
) {
    assert_eq!(growth_fields.len(), weights.len());
    assert!(growth_fields.iter().all(|g| g.len() == output.len()));

    let scale = match mode {
        CombinationMode::Sum | CombinationMode::Weighted => 1.0,
        CombinationMode::Average if growth_fields.is_empty() => 0.0,
        CombinationMode::Average => 1.0 / growth_fields.len() as f32,
    };

    output.par_iter_mut().enumerate().for_each(|(i, out)| {
        let total: f32 = growth_fields
            .iter()
            .zip(weights)
            .map(|(g, &h)| h * g[i])
            .sum();
        *out = total * scale;
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> Vec<Vec<f32>> {
        vec![vec![1.0, -1.0, 0.5], vec![0.5, 0.5, -1.0]]
    }

    #[test]
    fn test_sum() {
        let mut out = vec![0.0; 3];
        combine_into(&fields(), &[1.0, 2.0], CombinationMode::Sum, &mut out);
        assert_eq!(out, vec![2.0, 0.0, -1.5]);
    }

    #[test]
    fn test_average() {
        let mut out = vec![0.0; 3];
        combine_into(&fields(), &[1.0, 2.0], CombinationMode::Average, &mut out);
        assert_eq!(out, vec![1.0, 0.0, -0.75]);
    }

    #[test]
    fn test_weighted_not_renormalized() {
        // Weights summing to 3 are applied verbatim
        let mut weighted = vec![0.0; 3];
        let mut sum = vec![0.0; 3];
        combine_into(&fields(), &[1.0, 2.0], CombinationMode::Weighted, &mut weighted);
        combine_into(&fields(), &[1.0, 2.0], CombinationMode::Sum, &mut sum);
        assert_eq!(weighted, sum);
    }

    #[test]
    fn test_single_kernel_identity() {
        let g = vec![vec![0.25, -0.75]];
        for mode in [CombinationMode::Sum, CombinationMode::Average, CombinationMode::Weighted] {
            let mut out = vec![0.0; 2];
            combine_into(&g, &[1.0], mode, &mut out);
            assert_eq!(out, vec![0.25, -0.75]);
        }
    }
}
