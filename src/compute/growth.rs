//! Growth functions for multi-kernel Lenia.
//!
//! The growth function determines how the automaton reacts to local
//! neighborhood density. Every variant maps into `[-1, 1]`.

use rayon::prelude::*;

use crate::schema::{GrowthParams, GrowthType};

/// Gaussian bump: `2 * exp(-0.5 * ((u - mu) / sigma)^2) - 1`.
///
/// Returns 1.0 at `u == mu` and approaches -1.0 far from it.
#[inline]
pub fn growth_gaussian(u: f32, mu: f32, sigma: f32) -> f32 {
    let z = (u - mu) / sigma;
    2.0 * (-0.5 * z * z).exp() - 1.0
}

/// Compact polynomial bump: `2 * (1 - ((u - mu) / sigma)^2)^4 - 1` inside
/// `|u - mu| < sigma`, -1 outside.
#[inline]
pub fn growth_polynomial(u: f32, mu: f32, sigma: f32) -> f32 {
    let z = (u - mu) / sigma;
    if z.abs() >= 1.0 {
        return -1.0;
    }
    let base = 1.0 - z * z;
    let b2 = base * base;
    2.0 * b2 * b2 - 1.0
}

/// Hard step: +1 inside `|u - mu| < sigma`, -1 outside.
#[inline]
pub fn growth_step(u: f32, mu: f32, sigma: f32) -> f32 {
    if (u - mu).abs() < sigma { 1.0 } else { -1.0 }
}

/// Evaluate the growth response for one convolution value.
#[inline]
pub fn growth(u: f32, params: &GrowthParams) -> f32 {
    match params.growth_type {
        GrowthType::Gaussian => growth_gaussian(u, params.mu, params.sigma),
        GrowthType::Polynomial => growth_polynomial(u, params.mu, params.sigma),
        GrowthType::Step => growth_step(u, params.mu, params.sigma),
    }
}

/// Apply growth to an entire convolution field, writing into `output`.
pub fn growth_field_into(convolution: &[f32], params: &GrowthParams, output: &mut [f32]) {
    assert_eq!(convolution.len(), output.len());
    let params = *params;
    output
        .par_iter_mut()
        .zip(convolution.par_iter())
        .for_each(|(g, &u)| *g = growth(u, &params));
}

#[cfg(test)]
mod tests {
    use super::*;

    const MU: f32 = 0.15;
    const SIGMA: f32 = 0.015;

    fn params(growth_type: GrowthType) -> GrowthParams {
        GrowthParams::new(growth_type, MU, SIGMA)
    }

    #[test]
    fn test_growth_peak() {
        // At mu, every variant gives its maximum
        for t in [GrowthType::Gaussian, GrowthType::Polynomial, GrowthType::Step] {
            let g = growth(MU, &params(t));
            assert!((g - 1.0).abs() < 1e-6, "{:?} at mu gave {}", t, g);
        }
    }

    #[test]
    fn test_growth_far() {
        // Far from mu, growth should approach -1.0
        for t in [GrowthType::Gaussian, GrowthType::Polynomial, GrowthType::Step] {
            let g = growth(1.0, &params(t));
            assert!((g + 1.0).abs() < 1e-3, "{:?} far from mu gave {}", t, g);
        }
    }

    #[test]
    fn test_growth_symmetric() {
        for t in [GrowthType::Gaussian, GrowthType::Polynomial, GrowthType::Step] {
            let p = params(t);
            let g1 = growth(MU - 0.007, &p);
            let g2 = growth(MU + 0.007, &p);
            assert!((g1 - g2).abs() < 1e-5, "{:?} not symmetric", t);
        }
    }

    #[test]
    fn test_gaussian_at_one_sigma() {
        let g = growth_gaussian(MU + SIGMA, MU, SIGMA);
        let expected = 2.0 * (-0.5f32).exp() - 1.0;
        assert!((g - expected).abs() < 1e-5);
    }

    #[test]
    fn test_polynomial_edge() {
        // Continuous at the edge of its support
        assert!((growth_polynomial(MU + SIGMA * 0.999, MU, SIGMA) + 1.0).abs() < 1e-3);
        assert_eq!(growth_polynomial(MU + SIGMA, MU, SIGMA), -1.0);
        assert_eq!(growth_polynomial(MU - 2.0 * SIGMA, MU, SIGMA), -1.0);

        let half = growth_polynomial(MU + 0.5 * SIGMA, MU, SIGMA);
        let expected = 2.0 * 0.75f32.powi(4) - 1.0;
        assert!((half - expected).abs() < 1e-5);
    }

    #[test]
    fn test_step() {
        assert_eq!(growth_step(MU + 0.5 * SIGMA, MU, SIGMA), 1.0);
        assert_eq!(growth_step(MU + 1.5 * SIGMA, MU, SIGMA), -1.0);
        assert_eq!(growth_step(0.0, MU, SIGMA), -1.0);
    }

    #[test]
    fn test_growth_field_range() {
        let conv: Vec<f32> = (0..1000).map(|i| i as f32 / 999.0).collect();
        for t in [GrowthType::Gaussian, GrowthType::Polynomial, GrowthType::Step] {
            let mut out = vec![0.0f32; conv.len()];
            growth_field_into(&conv, &params(t), &mut out);
            assert!(out.iter().all(|g| (-1.0..=1.0).contains(g)));
            assert_eq!(out[0], growth(conv[0], &params(t)));
        }
    }
}
