//! Mass reduction, asynchronous readback and normalization.
//!
//! Mass is the sum of every cell. Reducers follow a request/poll/wait
//! protocol: [`MassReducer::request`] snapshots the field into one of two
//! scratch slots and starts a reduction in the background, and the returned
//! [`ReadbackToken`] is later redeemed with [`MassReducer::poll`] (never
//! blocks) or [`MassReducer::wait`]. The simulation keeps stepping while a
//! readback is in flight.

use std::sync::mpsc::{self, Receiver, TryRecvError};

use rayon::prelude::*;

/// Number of readbacks that may be in flight at once.
pub const READBACK_SLOTS: usize = 2;

/// Two-phase block reduction: each block of `block_size` cells is summed in
/// parallel into `partials`, then the partials are summed.
pub fn reduce_mass(field: &[f32], block_size: usize, partials: &mut Vec<f32>) -> f32 {
    let block_size = block_size.max(1);
    partials.clear();
    partials.par_extend(field.par_chunks(block_size).map(|block| block.iter().sum::<f32>()));
    partials.iter().sum()
}

/// Multiply every cell by `factor`.
pub fn scale_field(field: &mut [f32], factor: f32) {
    field.par_iter_mut().for_each(|v| *v *= factor);
}

/// Handle to an in-flight readback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReadbackToken {
    slot: usize,
    generation: u64,
}

impl ReadbackToken {
    pub(crate) fn new(slot: usize, generation: u64) -> Self {
        Self { slot, generation }
    }

    #[inline]
    pub fn slot(&self) -> usize {
        self.slot
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Mass readback errors.
#[derive(Debug, thiserror::Error)]
pub enum MassError {
    #[error("both readback slots are in flight")]
    ReadbackBusy,

    #[error("readback token does not refer to an in-flight request")]
    UnknownToken,

    #[error("readback worker disconnected before reporting a result")]
    Disconnected,

    #[error("target mass {0} must be finite and non-negative")]
    InvalidTarget(f32),

    #[cfg(feature = "gpu")]
    #[error("GPU readback failed: {0}")]
    Gpu(#[from] super::gpu::GpuError),
}

/// Backend that sums a field asynchronously.
pub trait MassReducer: Send {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Start reducing `field`. Fails with [`MassError::ReadbackBusy`] when
    /// every slot is in flight.
    fn request(&mut self, field: &[f32]) -> Result<ReadbackToken, MassError>;

    /// Return the mass if the readback has completed, without blocking.
    /// A completed token is consumed.
    fn poll(&mut self, token: ReadbackToken) -> Result<Option<f32>, MassError>;

    /// Block until the readback completes. Consumes the token.
    fn wait(&mut self, token: ReadbackToken) -> Result<f32, MassError>;
}

#[derive(Debug, Default)]
struct Scratch {
    field: Vec<f32>,
    partials: Vec<f32>,
}

enum Slot {
    Idle(Scratch),
    InFlight {
        generation: u64,
        rx: Receiver<(f32, Scratch)>,
    },
}

/// CPU reducer running each readback as a rayon task.
pub struct CpuMassReducer {
    block_size: usize,
    slots: [Slot; READBACK_SLOTS],
    next_generation: u64,
}

impl CpuMassReducer {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.max(1),
            slots: std::array::from_fn(|_| Slot::Idle(Scratch::default())),
            next_generation: 0,
        }
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of readbacks currently in flight.
    pub fn in_flight(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s, Slot::InFlight { .. }))
            .count()
    }

    fn finish(&mut self, token: ReadbackToken, blocking: bool) -> Result<Option<f32>, MassError> {
        let slot = self
            .slots
            .get_mut(token.slot)
            .ok_or(MassError::UnknownToken)?;
        let Slot::InFlight { generation, rx } = slot else {
            return Err(MassError::UnknownToken);
        };
        if *generation != token.generation {
            return Err(MassError::UnknownToken);
        }

        let received = if blocking {
            rx.recv().map_err(|_| MassError::Disconnected)
        } else {
            match rx.try_recv() {
                Ok(result) => Ok(result),
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Disconnected) => Err(MassError::Disconnected),
            }
        };

        match received {
            Ok((mass, scratch)) => {
                *slot = Slot::Idle(scratch);
                log::debug!(
                    "mass readback {}#{} complete: {}",
                    token.slot,
                    token.generation,
                    mass
                );
                Ok(Some(mass))
            }
            Err(e) => {
                *slot = Slot::Idle(Scratch::default());
                Err(e)
            }
        }
    }
}

impl Default for CpuMassReducer {
    fn default() -> Self {
        Self::new(crate::schema::DEFAULT_BLOCK_SIZE)
    }
}

impl MassReducer for CpuMassReducer {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn request(&mut self, field: &[f32]) -> Result<ReadbackToken, MassError> {
        let block_size = self.block_size;

        for (index, slot) in self.slots.iter_mut().enumerate() {
            let Slot::Idle(scratch) = slot else {
                continue;
            };

            let mut scratch = std::mem::take(scratch);
            scratch.field.clear();
            scratch.field.extend_from_slice(field);

            let (tx, rx) = mpsc::channel();
            rayon::spawn(move || {
                let mass = reduce_mass(&scratch.field, block_size, &mut scratch.partials);
                // Receiver may have been dropped along with the reducer
                let _ = tx.send((mass, scratch));
            });

            let generation = self.next_generation;
            self.next_generation += 1;
            *slot = Slot::InFlight { generation, rx };
            return Ok(ReadbackToken::new(index, generation));
        }

        Err(MassError::ReadbackBusy)
    }

    fn poll(&mut self, token: ReadbackToken) -> Result<Option<f32>, MassError> {
        self.finish(token, false)
    }

    fn wait(&mut self, token: ReadbackToken) -> Result<f32, MassError> {
        self.finish(token, true)?.ok_or(MassError::UnknownToken)
    }
}

/// Last-known and target mass, plus the background refresh request.
pub struct MassTracker {
    reducer: Box<dyn MassReducer>,
    conservation: bool,
    last_known: Option<f32>,
    target: Option<f32>,
    /// Target came from the caller rather than the first measurement.
    explicit_target: bool,
    pending: Option<ReadbackToken>,
}

impl MassTracker {
    pub fn new(reducer: Box<dyn MassReducer>, conservation: bool) -> Self {
        Self {
            reducer,
            conservation,
            last_known: None,
            target: None,
            explicit_target: false,
            pending: None,
        }
    }

    pub fn reducer_name(&self) -> &'static str {
        self.reducer.name()
    }

    /// Swap the backend. Any in-flight readback on the old backend is dropped.
    pub fn set_reducer(&mut self, reducer: Box<dyn MassReducer>) {
        log::debug!("mass reducer {} -> {}", self.reducer.name(), reducer.name());
        self.reducer = reducer;
        self.pending = None;
    }

    #[inline]
    pub fn conservation(&self) -> bool {
        self.conservation
    }

    pub fn set_conservation(&mut self, enabled: bool) {
        self.conservation = enabled;
    }

    /// Most recent measured mass; may be stale.
    #[inline]
    pub fn last_known(&self) -> Option<f32> {
        self.last_known
    }

    #[inline]
    pub fn target(&self) -> Option<f32> {
        self.target
    }

    /// Pin the target mass. Negative or non-finite targets are rejected and
    /// leave the current target in place.
    pub fn set_target(&mut self, target: f32) -> Result<(), MassError> {
        if !(target.is_finite() && target >= 0.0) {
            return Err(MassError::InvalidTarget(target));
        }
        self.target = Some(target);
        self.explicit_target = true;
        Ok(())
    }

    /// Forget measurements of a field that has been replaced. A captured
    /// target is dropped so the next measurement captures a new one; an
    /// explicit target is kept.
    pub fn reset(&mut self) -> Result<(), MassError> {
        if let Some(token) = self.pending.take() {
            self.reducer.wait(token)?;
        }
        self.last_known = None;
        if !self.explicit_target {
            self.target = None;
        }
        Ok(())
    }

    /// Relative drift `|current - target| / target`; `None` without a
    /// positive target.
    pub fn drift(&self, current: f32) -> Option<f32> {
        self.target
            .filter(|&t| t > 0.0 && t.is_finite())
            .map(|t| (current - t).abs() / t)
    }

    fn record(&mut self, mass: f32) {
        self.last_known = Some(mass);
        if self.target.is_none() {
            log::info!("captured target mass {:.4}", mass);
            self.target = Some(mass);
        }
    }

    pub fn request(&mut self, field: &[f32]) -> Result<ReadbackToken, MassError> {
        self.reducer.request(field)
    }

    pub fn poll(&mut self, token: ReadbackToken) -> Result<Option<f32>, MassError> {
        let mass = self.reducer.poll(token)?;
        if let Some(m) = mass {
            if self.pending == Some(token) {
                self.pending = None;
            }
            self.record(m);
        }
        Ok(mass)
    }

    pub fn wait(&mut self, token: ReadbackToken) -> Result<f32, MassError> {
        let mass = self.reducer.wait(token)?;
        if self.pending == Some(token) {
            self.pending = None;
        }
        self.record(mass);
        Ok(mass)
    }

    /// Blocking measurement of `field`.
    pub fn measure(&mut self, field: &[f32]) -> Result<f32, MassError> {
        if let Some(token) = self.pending {
            self.wait(token)?;
        }
        let token = self.reducer.request(field)?;
        self.wait(token)
    }

    /// Non-blocking refresh of the last-known mass: collect the pending
    /// readback if it finished, then issue a new one.
    pub fn refresh(&mut self, field: &[f32]) -> Result<(), MassError> {
        if let Some(token) = self.pending
            && self.poll(token)?.is_none()
        {
            return Ok(());
        }

        match self.reducer.request(field) {
            Ok(token) => {
                self.pending = Some(token);
                Ok(())
            }
            Err(MassError::ReadbackBusy) => {
                log::debug!("mass refresh skipped: readback slots busy");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Measure, and if conservation is enabled and drift exceeds `threshold`,
    /// rescale `field` by `target / current`. Returns whether the field was
    /// rescaled.
    pub fn compute_and_normalize(
        &mut self,
        field: &mut [f32],
        threshold: f32,
    ) -> Result<bool, MassError> {
        let current = self.measure(field)?;

        if !self.conservation {
            return Ok(false);
        }
        let (Some(target), Some(drift)) = (self.target, self.drift(current)) else {
            return Ok(false);
        };
        if drift <= threshold {
            return Ok(false);
        }
        if current <= 0.0 || !current.is_finite() {
            log::debug!("skipping normalization of non-positive mass {}", current);
            return Ok(false);
        }

        let factor = target / current;
        scale_field(field, factor);
        self.last_known = Some(current * factor);

        log::info!(
            "normalized mass {:.4} -> {:.4} (drift {:.2}%)",
            current,
            target,
            drift * 100.0
        );
        Ok(true)
    }
}

impl Default for MassTracker {
    fn default() -> Self {
        Self::new(Box::new(CpuMassReducer::default()), false)
    }
}
