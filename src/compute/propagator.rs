//! Propagator - main simulation driver for multi-kernel Lenia.
//!
//! Orchestrates all computation stages for each time step:
//! convolution (direct or spectral per kernel), growth, combination,
//! integration into the back buffer, then the periodic mass pass.

use serde::{Deserialize, Serialize};

use crate::schema::{
    BoundaryMode, ConvolutionStrategy, MultiKernelConfig, Seed, SimulationConfig, ValidationErrors,
};

use super::{
    CpuMassReducer, FftError, FieldBuffers, KernelBank, KernelError, KernelTaps, MassError,
    MassReducer, MassTracker, ReadbackToken, SpectralConvolver, combine_into,
    convolve_direct_into, growth_field_into, integrate_into,
};

/// Which convolver serves a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConvolutionPath {
    Direct,
    Spectral,
}

impl ConvolutionPath {
    /// Route a kernel of `radius` under `strategy`.
    pub fn select(strategy: ConvolutionStrategy, radius: usize, fft_threshold: usize) -> Self {
        match strategy {
            ConvolutionStrategy::Direct => ConvolutionPath::Direct,
            ConvolutionStrategy::Spectral => ConvolutionPath::Spectral,
            ConvolutionStrategy::Auto if radius >= fft_threshold => ConvolutionPath::Spectral,
            ConvolutionStrategy::Auto => ConvolutionPath::Direct,
        }
    }
}

/// Errors building a propagator or replacing its configuration or field.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error(transparent)]
    Invalid(#[from] ValidationErrors),

    #[error("field has {actual} cells, grid needs {expected}")]
    FieldSize { expected: usize, actual: usize },

    #[error("kernel generation failed: {0}")]
    Kernel(#[from] KernelError),

    #[error("spectral plan failed: {0}")]
    Spectral(#[from] FftError),

    #[error("could not drain mass readback: {0}")]
    Mass(#[from] MassError),
}

/// Errors from advancing the simulation.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("simulation halted after an earlier failure: {0}")]
    Halted(String),

    #[error("mass pass failed: {0}")]
    Mass(#[from] MassError),
}

/// Per-kernel routing derived from the configuration and kernel bank.
struct KernelPlan {
    paths: Vec<ConvolutionPath>,
    taps: Vec<KernelTaps>,
    weights: Vec<f32>,
    /// Largest radius routed to the spectral path.
    spectral_radius: Option<usize>,
}

impl KernelPlan {
    fn build(config: &SimulationConfig, bank: &KernelBank) -> Self {
        let paths: Vec<ConvolutionPath> = bank
            .entries()
            .iter()
            .map(|e| ConvolutionPath::select(config.strategy, e.data.radius, config.fft_threshold))
            .collect();

        let spectral_radius = bank
            .entries()
            .iter()
            .zip(&paths)
            .filter(|&(_, &p)| p == ConvolutionPath::Spectral)
            .map(|(e, _)| e.data.radius)
            .max();

        Self {
            taps: bank
                .entries()
                .iter()
                .map(|e| KernelTaps::from_kernel(&e.data))
                .collect(),
            weights: config.rule.kernels().iter().map(|k| k.weight).collect(),
            paths,
            spectral_radius,
        }
    }
}

/// Multi-kernel Lenia propagator.
pub struct Propagator {
    config: SimulationConfig,
    bank: KernelBank,
    paths: Vec<ConvolutionPath>,
    taps: Vec<KernelTaps>,
    weights: Vec<f32>,
    spectral: Option<SpectralConvolver>,
    /// Pre-allocated convolution output per kernel.
    conv_outputs: Vec<Vec<f32>>,
    /// Pre-allocated growth field per kernel.
    growth_fields: Vec<Vec<f32>>,
    combined: Vec<f32>,
    buffers: FieldBuffers,
    mass: MassTracker,
    step: u64,
    time: f32,
    /// Cause of the failure that stopped the simulation.
    halted: Option<String>,
}

impl Propagator {
    /// Create a propagator over an empty field.
    pub fn new(config: SimulationConfig) -> Result<Self, SetupError> {
        let field = vec![0.0f32; config.grid_size()];
        Self::with_field(config, field)
    }

    /// Create a propagator seeded from a pattern.
    pub fn from_seed(config: SimulationConfig, seed: &Seed) -> Result<Self, SetupError> {
        let field = seed.generate(config.width, config.height);
        Self::with_field(config, field)
    }

    /// Create a propagator over an explicit initial field.
    pub fn with_field(config: SimulationConfig, field: Vec<f32>) -> Result<Self, SetupError> {
        config.validate()?;
        let grid_size = config.grid_size();
        if field.len() != grid_size {
            return Err(SetupError::FieldSize {
                expected: grid_size,
                actual: field.len(),
            });
        }

        let bank = KernelBank::from_params(config.rule.kernels())?;
        let plan = KernelPlan::build(&config, &bank);
        let spectral = match plan.spectral_radius {
            Some(radius) => Some(SpectralConvolver::new(
                config.width,
                config.height,
                config.boundary,
                radius,
            )?),
            None => None,
        };

        let mut mass = MassTracker::new(
            Box::new(CpuMassReducer::new(config.mass.block_size)),
            config.mass.conservation,
        );
        if let Some(target) = config.mass.target {
            mass.set_target(target)?;
        }

        let kernel_count = bank.len();
        log::debug!(
            "propagator {}x{}: {} kernels, paths {:?}",
            config.width,
            config.height,
            kernel_count,
            plan.paths
        );

        Ok(Self {
            bank,
            paths: plan.paths,
            taps: plan.taps,
            weights: plan.weights,
            spectral,
            conv_outputs: vec![vec![0.0f32; grid_size]; kernel_count],
            growth_fields: vec![vec![0.0f32; grid_size]; kernel_count],
            combined: vec![0.0f32; grid_size],
            buffers: FieldBuffers::new(field),
            mass,
            step: 0,
            time: 0.0,
            halted: None,
            config,
        })
    }

    /// Perform one simulation step.
    ///
    /// After any failure the propagator halts, and every later call returns
    /// [`StepError::Halted`] carrying the original cause.
    pub fn step(&mut self) -> Result<(), StepError> {
        if let Some(cause) = &self.halted {
            return Err(StepError::Halted(cause.clone()));
        }
        self.advance().inspect_err(|e| {
            log::warn!("simulation halted at step {}: {}", self.step, e);
            self.halted = Some(e.to_string());
        })
    }

    fn advance(&mut self) -> Result<(), StepError> {
        let (width, height) = (self.config.width, self.config.height);
        let boundary = self.config.boundary;
        let rule = &self.config.rule;

        // 1. Convolution: every kernel reads the same current field
        let current = self.buffers.front();
        if let Some(spectral) = &mut self.spectral
            && self.paths.contains(&ConvolutionPath::Spectral)
        {
            spectral.load_field(current);
        }
        for (i, entry) in self.bank.entries().iter().enumerate() {
            let output = &mut self.conv_outputs[i];
            match (self.paths[i], self.spectral.as_mut()) {
                (ConvolutionPath::Spectral, Some(spectral)) => {
                    spectral.convolve_into(i, entry, output)
                }
                _ => convolve_direct_into(current, &self.taps[i], width, height, boundary, output),
            }
        }

        // 2. Growth per kernel
        for ((conv, growth), params) in self
            .conv_outputs
            .iter()
            .zip(self.growth_fields.iter_mut())
            .zip(rule.growth_params())
        {
            growth_field_into(conv, params, growth);
        }

        // 3. Combination
        combine_into(
            &self.growth_fields,
            &self.weights,
            rule.combination_mode(),
            &mut self.combined,
        );

        // 4. Integration into the back buffer, then promote it
        let dt = rule.dt();
        {
            let (current, next) = self.buffers.split();
            integrate_into(current, &self.combined, dt, next);
        }
        self.buffers.swap();
        self.step += 1;
        self.time += dt;

        // 5. Periodic mass pass
        let interval = self.config.mass.check_interval;
        if interval > 0 && self.step % interval == 0 {
            self.mass_pass()?;
        }

        Ok(())
    }

    /// Normalize or refresh the tracked mass. Caller-held readbacks that
    /// occupy every slot postpone the pass to the next interval.
    fn mass_pass(&mut self) -> Result<(), StepError> {
        let result = if self.mass.conservation() {
            let threshold = self.config.mass.drift_threshold;
            self.mass
                .compute_and_normalize(self.buffers.front_mut(), threshold)
                .map(|_| ())
        } else {
            self.mass.refresh(self.buffers.front())
        };

        match result {
            Err(MassError::ReadbackBusy) => {
                log::debug!("mass pass at step {} skipped: readback slots busy", self.step);
                Ok(())
            }
            other => Ok(other?),
        }
    }

    /// Run simulation for specified number of steps.
    pub fn run(&mut self, steps: u64) -> Result<(), StepError> {
        for _ in 0..steps {
            self.step()?;
        }
        Ok(())
    }

    /// Current field, row-major.
    #[inline]
    pub fn field(&self) -> &[f32] {
        self.buffers.front()
    }

    /// Owned copy of the current field with its position in time.
    pub fn snapshot(&self) -> FieldSnapshot {
        FieldSnapshot {
            width: self.config.width,
            height: self.config.height,
            step: self.step,
            time: self.time,
            data: self.buffers.front().to_vec(),
        }
    }

    /// Replace the current field. Step count and time are kept; a captured
    /// target mass is dropped.
    pub fn set_field(&mut self, field: Vec<f32>) -> Result<(), SetupError> {
        let expected = self.config.grid_size();
        if field.len() != expected {
            return Err(SetupError::FieldSize {
                expected,
                actual: field.len(),
            });
        }
        self.mass.reset()?;
        self.buffers = FieldBuffers::new(field);
        Ok(())
    }

    /// Replace the rule. Nothing changes unless the new rule validates and
    /// every kernel generates.
    pub fn set_config(&mut self, rule: MultiKernelConfig) -> Result<(), SetupError> {
        rule.validate()?;

        let mut bank = self.bank.clone();
        let regenerated = bank.sync(rule.kernels())?;

        let mut config = self.config.clone();
        config.rule = rule;
        self.apply(config, bank)?;

        if let Some(spectral) = &mut self.spectral {
            for &i in &regenerated {
                spectral.invalidate(i);
            }
        }
        Ok(())
    }

    /// Change the boundary policy; the spectral plan is rebuilt if needed.
    pub fn set_boundary(&mut self, boundary: BoundaryMode) -> Result<(), SetupError> {
        let mut config = self.config.clone();
        config.boundary = boundary;
        self.apply(config, self.bank.clone())
    }

    /// Change how kernels are routed between the convolvers.
    pub fn set_strategy(&mut self, strategy: ConvolutionStrategy) -> Result<(), SetupError> {
        let mut config = self.config.clone();
        config.strategy = strategy;
        self.apply(config, self.bank.clone())
    }

    /// Commit a new configuration and bank once every fallible part is built.
    fn apply(&mut self, config: SimulationConfig, bank: KernelBank) -> Result<(), SetupError> {
        let plan = KernelPlan::build(&config, &bank);
        let (width, height, boundary) = (config.width, config.height, config.boundary);

        let replacement = match plan.spectral_radius {
            Some(radius)
                if !self
                    .spectral
                    .as_ref()
                    .is_some_and(|s| s.supports(width, height, boundary, radius)) =>
            {
                Some(SpectralConvolver::new(width, height, boundary, radius)?)
            }
            _ => None,
        };

        let kernel_count = bank.len();
        let grid_size = config.grid_size();
        if plan.spectral_radius.is_none() {
            self.spectral = None;
        } else if let Some(spectral) = replacement {
            self.spectral = Some(spectral);
        } else if let Some(spectral) = &mut self.spectral
            && kernel_count != self.bank.len()
        {
            spectral.clear();
        }

        self.conv_outputs.resize_with(kernel_count, || vec![0.0f32; grid_size]);
        self.growth_fields.resize_with(kernel_count, || vec![0.0f32; grid_size]);

        log::debug!("reconfigured: {} kernels, paths {:?}", kernel_count, plan.paths);
        self.paths = plan.paths;
        self.taps = plan.taps;
        self.weights = plan.weights;
        self.bank = bank;
        self.config = config;
        Ok(())
    }

    /// Start an asynchronous mass readback of the current field.
    pub fn request_mass(&mut self) -> Result<ReadbackToken, MassError> {
        self.mass.request(self.buffers.front())
    }

    /// Collect a readback if it has finished.
    pub fn poll_mass(&mut self, token: ReadbackToken) -> Result<Option<f32>, MassError> {
        self.mass.poll(token)
    }

    /// Block until a readback finishes.
    pub fn wait_mass(&mut self, token: ReadbackToken) -> Result<f32, MassError> {
        self.mass.wait(token)
    }

    /// Measure the current field's mass, blocking.
    pub fn compute_mass(&mut self) -> Result<f32, MassError> {
        self.mass.measure(self.buffers.front())
    }

    /// Last measured mass; may lag the current field.
    #[inline]
    pub fn mass(&self) -> Option<f32> {
        self.mass.last_known()
    }

    /// Pin the target mass; fails on negative or non-finite values.
    pub fn set_target_mass(&mut self, target: f32) -> Result<(), MassError> {
        self.mass.set_target(target)
    }

    #[inline]
    pub fn target_mass(&self) -> Option<f32> {
        self.mass.target()
    }

    /// Relative drift of the last measured mass from the target.
    pub fn mass_drift(&self) -> Option<f32> {
        self.mass.last_known().and_then(|m| self.mass.drift(m))
    }

    /// Measure mass and rescale toward the target when drift exceeds
    /// `threshold` and conservation is enabled.
    pub fn compute_and_normalize(&mut self, threshold: f32) -> Result<bool, MassError> {
        self.mass
            .compute_and_normalize(self.buffers.front_mut(), threshold)
    }

    pub fn set_mass_conservation(&mut self, enabled: bool) {
        self.config.mass.conservation = enabled;
        self.mass.set_conservation(enabled);
    }

    /// Swap the mass backend, e.g. for a GPU reducer.
    pub fn set_mass_reducer(&mut self, reducer: Box<dyn MassReducer>) {
        self.mass.set_reducer(reducer);
    }

    pub fn mass_reducer_name(&self) -> &'static str {
        self.mass.reducer_name()
    }

    /// Convolver serving each kernel.
    pub fn paths(&self) -> &[ConvolutionPath] {
        &self.paths
    }

    /// Kernels with a cached spectrum.
    pub fn cached_spectra(&self) -> usize {
        self.spectral.as_ref().map_or(0, |s| s.cached_count())
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    pub fn halt_cause(&self) -> Option<&str> {
        self.halted.as_deref()
    }

    #[inline]
    pub fn step_count(&self) -> u64 {
        self.step
    }

    #[inline]
    pub fn time(&self) -> f32 {
        self.time
    }

    /// Get configuration reference.
    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }
}

/// Copy of the field at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSnapshot {
    pub width: usize,
    pub height: usize,
    pub step: u64,
    pub time: f32,
    pub data: Vec<f32>,
}

/// Simulation statistics for monitoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationStats {
    pub total_mass: f32,
    pub max_value: f32,
    pub min_value: f32,
    pub mean_value: f32,
    pub active_cells: usize,
}

impl SimulationStats {
    /// Compute statistics from a field.
    pub fn from_field(field: &[f32]) -> Self {
        let mut total_mass = 0.0f32;
        let mut max_value = f32::NEG_INFINITY;
        let mut min_value = f32::INFINITY;
        let mut active_cells = 0usize;

        for &v in field {
            total_mass += v;
            max_value = max_value.max(v);
            min_value = min_value.min(v);
            if v > 1e-6 {
                active_cells += 1;
            }
        }

        Self {
            total_mass,
            max_value,
            min_value,
            mean_value: if field.is_empty() {
                0.0
            } else {
                total_mass / field.len() as f32
            },
            active_cells,
        }
    }
}
