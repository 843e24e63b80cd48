//! Euler integration over a ping-pong field buffer.

use rayon::prelude::*;

/// Two equally sized fields; one is current, the other receives the next
/// state. Only [`FieldBuffers::swap`] exchanges their roles.
#[derive(Debug, Clone)]
pub struct FieldBuffers {
    a: Vec<f32>,
    b: Vec<f32>,
    a_is_front: bool,
}

impl FieldBuffers {
    pub fn new(initial: Vec<f32>) -> Self {
        let len = initial.len();
        Self {
            a: initial,
            b: vec![0.0; len],
            a_is_front: true,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.a.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.a.is_empty()
    }

    /// Current field.
    #[inline]
    pub fn front(&self) -> &[f32] {
        if self.a_is_front { &self.a } else { &self.b }
    }

    /// Current field for read and the next-state buffer for write.
    #[inline]
    pub fn split(&mut self) -> (&[f32], &mut [f32]) {
        if self.a_is_front {
            (&self.a, &mut self.b)
        } else {
            (&self.b, &mut self.a)
        }
    }

    /// Promote the back buffer to current.
    #[inline]
    pub fn swap(&mut self) {
        self.a_is_front = !self.a_is_front;
    }

    /// Mutable access to the current field, used for normalization and
    /// external resets between steps.
    #[inline]
    pub(crate) fn front_mut(&mut self) -> &mut [f32] {
        if self.a_is_front { &mut self.a } else { &mut self.b }
    }
}

/// `next = clamp(current + dt * growth, 0, 1)`.
pub fn integrate_into(current: &[f32], growth: &[f32], dt: f32, next: &mut [f32]) {
    assert_eq!(current.len(), growth.len());
    assert_eq!(current.len(), next.len());

    next.par_iter_mut()
        .zip(current.par_iter().zip(growth.par_iter()))
        .for_each(|(n, (&c, &g))| *n = (c + dt * g).clamp(0.0, 1.0));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integrate_clamps() {
        let current = vec![0.0, 0.5, 1.0, 0.95];
        let growth = vec![-1.0, 1.0, 1.0, 1.0];
        let mut next = vec![0.0; 4];
        integrate_into(&current, &growth, 0.1, &mut next);

        assert_eq!(next[0], 0.0);
        assert!((next[1] - 0.6).abs() < 1e-6);
        assert_eq!(next[2], 1.0);
        assert_eq!(next[3], 1.0);
    }

    #[test]
    fn test_buffers_ping_pong() {
        let mut buffers = FieldBuffers::new(vec![0.25; 4]);
        {
            let (current, next) = buffers.split();
            integrate_into(current, &[1.0; 4], 0.5, next);
        }
        // Nothing is visible until the swap
        assert_eq!(buffers.front(), &[0.25; 4]);

        buffers.swap();
        assert_eq!(buffers.front(), &[0.75; 4]);

        {
            let (current, next) = buffers.split();
            integrate_into(current, &[-1.0; 4], 0.5, next);
        }
        buffers.swap();
        assert_eq!(buffers.front(), &[0.25; 4]);
        assert_eq!(buffers.len(), 4);
    }

    #[test]
    fn test_front_mut_edits_current() {
        let mut buffers = FieldBuffers::new(vec![0.0; 2]);
        buffers.swap();
        buffers.front_mut()[1] = 0.5;
        assert_eq!(buffers.front(), &[0.0, 0.5]);
    }
}
