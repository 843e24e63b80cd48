//! Direct spatial convolution for small kernel radii.
//!
//! # Complexity
//!
//! Direct convolution is O(N * K^2) where N is grid size and K is kernel
//! diameter. For small radii this beats the spectral path's O(N log N)
//! with its transform overhead.
//!
//! Each kernel is compiled once into a list of non-zero taps. Cells whose
//! whole footprint lies inside the grid skip boundary resolution entirely;
//! only the edge band pays for it.

use rayon::prelude::*;

use crate::schema::BoundaryMode;

use super::KernelData;

/// Single non-zero kernel weight at an offset from the centre.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Tap {
    dx: i32,
    dy: i32,
    weight: f32,
}

/// Sparse form of a kernel for the direct path.
#[derive(Debug, Clone, Default)]
pub struct KernelTaps {
    taps: Vec<Tap>,
    radius: usize,
}

impl KernelTaps {
    pub fn from_kernel(kernel: &KernelData) -> Self {
        let r = kernel.radius as i32;
        let taps = kernel
            .weights
            .iter()
            .enumerate()
            .filter(|&(_, &w)| w != 0.0)
            .map(|(i, &weight)| Tap {
                dx: (i % kernel.size) as i32 - r,
                dy: (i / kernel.size) as i32 - r,
                weight,
            })
            .collect();

        Self {
            taps,
            radius: kernel.radius,
        }
    }
}

/// Perform direct 2D convolution under the given boundary policy.
pub fn convolve_direct(
    input: &[f32],
    kernel: &KernelTaps,
    width: usize,
    height: usize,
    boundary: BoundaryMode,
) -> Vec<f32> {
    let mut output = vec![0.0f32; width * height];
    convolve_direct_into(input, kernel, width, height, boundary, &mut output);
    output
}

/// Perform direct convolution into pre-allocated buffer.
pub fn convolve_direct_into(
    input: &[f32],
    kernel: &KernelTaps,
    width: usize,
    height: usize,
    boundary: BoundaryMode,
    output: &mut [f32],
) {
    assert_eq!(input.len(), width * height);
    assert_eq!(output.len(), width * height);

    let r = kernel.radius;
    let taps = &kernel.taps;

    output
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| {
            let row_interior = y >= r && y + r < height;

            for (x, out) in row.iter_mut().enumerate() {
                let mut sum = 0.0f32;

                if row_interior && x >= r && x + r < width {
                    for tap in taps {
                        let sx = (x as i32 + tap.dx) as usize;
                        let sy = (y as i32 + tap.dy) as usize;
                        sum += tap.weight * input[sy * width + sx];
                    }
                } else {
                    for tap in taps {
                        if let Some((sx, sy)) = boundary.resolve_2d(
                            x as i32 + tap.dx,
                            y as i32 + tap.dy,
                            width,
                            height,
                        ) {
                            sum += tap.weight * input[sy * width + sx];
                        }
                    }
                }

                *out = sum;
            }
        });
}
