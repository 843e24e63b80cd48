//! Boundary policies for out-of-range neighbour reads.

use crate::schema::BoundaryMode;

/// Wrap coordinate for periodic boundaries.
#[inline]
pub fn wrap_coord(coord: i32, size: usize) -> usize {
    let s = size as i32;
    ((coord % s) + s) as usize % size
}

impl BoundaryMode {
    /// Resolve a possibly out-of-range coordinate along an axis of `size` cells.
    ///
    /// Returns `None` only in `Zero` mode, where out-of-range reads are invalid.
    #[inline]
    pub fn resolve(self, coord: i32, size: usize) -> Option<usize> {
        let s = size as i32;
        if (0..s).contains(&coord) {
            return Some(coord as usize);
        }
        match self {
            BoundaryMode::Periodic => Some(wrap_coord(coord, size)),
            BoundaryMode::Clamped => Some(coord.clamp(0, s - 1) as usize),
            BoundaryMode::Reflected => {
                let mirrored = if coord < 0 { -coord - 1 } else { 2 * s - 1 - coord };
                Some(mirrored.clamp(0, s - 1) as usize)
            }
            BoundaryMode::Zero => None,
        }
    }

    /// Resolve a 2D coordinate; `None` if either axis is invalid.
    #[inline]
    pub fn resolve_2d(self, x: i32, y: i32, width: usize, height: usize) -> Option<(usize, usize)> {
        Some((self.resolve(x, width)?, self.resolve(y, height)?))
    }

    /// Read `field` at a possibly out-of-range position; invalid reads yield 0.
    #[inline]
    pub fn sample(self, field: &[f32], x: i32, y: i32, width: usize, height: usize) -> f32 {
        match self.resolve_2d(x, y, width, height) {
            Some((sx, sy)) => field[sy * width + sx],
            None => 0.0,
        }
    }
}
