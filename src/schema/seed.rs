//! Seed patterns for initializing a Lenia field.

use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};

/// Complete seed specification for simulation initialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Seed {
    /// Pattern to use for seeding.
    pub pattern: Pattern,
}

impl Default for Seed {
    fn default() -> Self {
        Self {
            pattern: Pattern::GaussianBlob {
                center: (0.5, 0.5),
                radius: 0.1,
                amplitude: 1.0,
            },
        }
    }
}

/// Predefined patterns for initialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Pattern {
    /// Single Gaussian blob.
    GaussianBlob {
        /// Center position as fraction of grid size (0.0-1.0).
        center: (f32, f32),
        /// Radius as fraction of grid size.
        radius: f32,
        /// Peak amplitude.
        amplitude: f32,
    },
    /// Multiple Gaussian blobs.
    MultiBlob { blobs: Vec<BlobSpec> },
    /// Uniform random noise inside a square region.
    Noise {
        /// Noise amplitude range [0, amplitude].
        amplitude: f32,
        /// Region center as fraction of grid size.
        center: (f32, f32),
        /// Region half-extent as fraction of grid size (0.5 covers the grid).
        extent: f32,
        /// Random seed.
        seed: u64,
    },
    /// Ring with soft edges.
    Ring {
        center: (f32, f32),
        /// Inner radius as fraction of grid size.
        inner_radius: f32,
        /// Outer radius as fraction of grid size.
        outer_radius: f32,
        amplitude: f32,
    },
    /// Sparse explicit values as (x, y, value).
    Custom { values: Vec<(usize, usize, f32)> },
}

/// Specification for a single blob in MultiBlob pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobSpec {
    pub center: (f32, f32),
    pub radius: f32,
    pub amplitude: f32,
}

impl Seed {
    /// Generate a row-major field, clamped to [0, 1].
    pub fn generate(&self, width: usize, height: usize) -> Vec<f32> {
        let mut field = vec![0.0f32; width * height];
        let min_dim = width.min(height) as f32;

        match &self.pattern {
            Pattern::GaussianBlob {
                center,
                radius,
                amplitude,
            } => {
                let cx = center.0 * width as f32;
                let cy = center.1 * height as f32;
                apply_gaussian(&mut field, width, cx, cy, radius * min_dim, *amplitude);
            }
            Pattern::MultiBlob { blobs } => {
                for blob in blobs {
                    let cx = blob.center.0 * width as f32;
                    let cy = blob.center.1 * height as f32;
                    apply_gaussian(
                        &mut field,
                        width,
                        cx,
                        cy,
                        blob.radius * min_dim,
                        blob.amplitude,
                    );
                }
            }
            Pattern::Noise {
                amplitude,
                center,
                extent,
                seed,
            } => {
                apply_noise(&mut field, width, height, *center, *extent, *amplitude, *seed);
            }
            Pattern::Ring {
                center,
                inner_radius,
                outer_radius,
                amplitude,
            } => {
                let cx = center.0 * width as f32;
                let cy = center.1 * height as f32;
                apply_ring(
                    &mut field,
                    width,
                    cx,
                    cy,
                    inner_radius * min_dim,
                    outer_radius * min_dim,
                    *amplitude,
                );
            }
            Pattern::Custom { values } => {
                for &(x, y, v) in values {
                    if y < height && x < width {
                        field[y * width + x] = v;
                    }
                }
            }
        }

        for v in &mut field {
            *v = v.clamp(0.0, 1.0);
        }
        field
    }
}

fn apply_gaussian(field: &mut [f32], width: usize, cx: f32, cy: f32, radius: f32, amplitude: f32) {
    if radius <= 0.0 {
        return;
    }
    let sigma_sq = (radius / 2.0).powi(2);

    for (y, row) in field.chunks_exact_mut(width).enumerate() {
        for (x, cell) in row.iter_mut().enumerate() {
            let dx = x as f32 - cx;
            let dy = y as f32 - cy;
            let dist_sq = dx * dx + dy * dy;
            *cell += amplitude * (-dist_sq / (2.0 * sigma_sq)).exp();
        }
    }
}

fn apply_noise(
    field: &mut [f32],
    width: usize,
    height: usize,
    center: (f32, f32),
    extent: f32,
    amplitude: f32,
    seed: u64,
) {
    let mut rng = StdRng::seed_from_u64(seed);

    let x_min = ((center.0 - extent) * width as f32).floor().max(0.0) as usize;
    let x_max = (((center.0 + extent) * width as f32).ceil() as usize).min(width);
    let y_min = ((center.1 - extent) * height as f32).floor().max(0.0) as usize;
    let y_max = (((center.1 + extent) * height as f32).ceil() as usize).min(height);

    for y in y_min..y_max {
        for x in x_min..x_max {
            field[y * width + x] += amplitude * rng.r#gen::<f32>();
        }
    }
}

fn apply_ring(
    field: &mut [f32],
    width: usize,
    cx: f32,
    cy: f32,
    inner_radius: f32,
    outer_radius: f32,
    amplitude: f32,
) {
    let edge_width = ((outer_radius - inner_radius) * 0.2).max(f32::EPSILON);

    for (y, row) in field.chunks_exact_mut(width).enumerate() {
        for (x, cell) in row.iter_mut().enumerate() {
            let dx = x as f32 - cx;
            let dy = y as f32 - cy;
            let dist = (dx * dx + dy * dy).sqrt();
            if dist >= inner_radius && dist <= outer_radius {
                // Soft falloff at both edges
                let inner_falloff = ((dist - inner_radius) / edge_width).min(1.0);
                let outer_falloff = ((outer_radius - dist) / edge_width).min(1.0);
                *cell += amplitude * inner_falloff.min(outer_falloff);
            }
        }
    }
}
