//! Configuration types for multi-kernel Lenia simulations.

use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Hard cap on kernels per rule unless overridden.
pub const DEFAULT_MAX_KERNELS: usize = 4;
/// Smallest accepted kernel radius in cells.
pub const MIN_KERNEL_RADIUS: usize = 3;
/// Largest accepted kernel radius in cells.
pub const MAX_KERNEL_RADIUS: usize = 50;
/// Largest accepted kernel weight.
pub const MAX_KERNEL_WEIGHT: f32 = 2.0;
/// Accepted growth sigma range.
pub const MIN_GROWTH_SIGMA: f32 = 0.001;
pub const MAX_GROWTH_SIGMA: f32 = 0.5;
/// Kernels with at least this radius are convolved in the frequency domain.
pub const DEFAULT_FFT_THRESHOLD: usize = 16;
/// Relative mass drift that triggers renormalization.
pub const DEFAULT_DRIFT_THRESHOLD: f32 = 0.01;
/// Cells per block in the first mass reduction phase.
pub const DEFAULT_BLOCK_SIZE: usize = 256;

fn default_peaks() -> Vec<f32> {
    vec![0.5]
}

fn default_ring_width() -> f32 {
    0.2
}

fn default_weight() -> f32 {
    1.0
}

fn default_max_kernels() -> usize {
    DEFAULT_MAX_KERNELS
}

fn default_fft_threshold() -> usize {
    DEFAULT_FFT_THRESHOLD
}

/// Radial profile used to build a kernel footprint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelShape {
    #[default]
    Gaussian,
    Ring,
    Polynomial,
    Step,
    /// Caller-supplied weights.
    Custom,
}

/// Configuration for a single kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KernelParams {
    pub shape: KernelShape,
    /// Footprint half-width in cells.
    pub radius: usize,
    /// Normalized peak positions (polynomial and step shapes).
    #[serde(default = "default_peaks")]
    pub peaks: Vec<f32>,
    /// Ring thickness as a fraction of the radius (ring shape).
    #[serde(default = "default_ring_width")]
    pub ring_width: f32,
    /// Weight applied to this kernel's growth output.
    #[serde(default = "default_weight")]
    pub weight: f32,
    /// Row-major `(2R+1)^2` weights (custom shape).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_weights: Option<Vec<f32>>,
}

impl KernelParams {
    pub fn new(shape: KernelShape, radius: usize) -> Self {
        Self {
            shape,
            radius,
            peaks: default_peaks(),
            ring_width: default_ring_width(),
            weight: default_weight(),
            custom_weights: None,
        }
    }

    /// Custom kernel from explicit row-major weights.
    pub fn custom(radius: usize, weights: Vec<f32>) -> Self {
        Self {
            custom_weights: Some(weights),
            ..Self::new(KernelShape::Custom, radius)
        }
    }

    pub fn with_peaks(mut self, peaks: Vec<f32>) -> Self {
        self.peaks = peaks;
        self
    }

    pub fn with_ring_width(mut self, ring_width: f32) -> Self {
        self.ring_width = ring_width;
        self
    }

    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight;
        self
    }

    /// Footprint side length.
    #[inline]
    pub fn size(&self) -> usize {
        2 * self.radius + 1
    }

    /// Identity token over everything that affects the generated weights.
    ///
    /// Parameters that the active shape ignores do not contribute, and
    /// neither does `weight`, so weight edits never invalidate caches.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.shape.hash(&mut hasher);
        self.radius.hash(&mut hasher);
        match self.shape {
            KernelShape::Gaussian => {}
            KernelShape::Ring => self.ring_width.to_bits().hash(&mut hasher),
            KernelShape::Polynomial | KernelShape::Step => {
                for p in &self.peaks {
                    p.to_bits().hash(&mut hasher);
                }
            }
            KernelShape::Custom => {
                if let Some(weights) = &self.custom_weights {
                    weights.len().hash(&mut hasher);
                    for w in weights {
                        w.to_bits().hash(&mut hasher);
                    }
                }
            }
        }
        hasher.finish()
    }

    fn violations(&self, index: usize, out: &mut Vec<ConfigViolation>) {
        if !(MIN_KERNEL_RADIUS..=MAX_KERNEL_RADIUS).contains(&self.radius) {
            out.push(ConfigViolation::RadiusOutOfRange {
                index,
                radius: self.radius,
            });
        }
        if !(self.weight.is_finite() && (0.0..=MAX_KERNEL_WEIGHT).contains(&self.weight)) {
            out.push(ConfigViolation::WeightOutOfRange {
                index,
                weight: self.weight,
            });
        }
        if self.shape == KernelShape::Ring
            && !(self.ring_width > 0.0 && self.ring_width <= 1.0)
        {
            out.push(ConfigViolation::RingWidthOutOfRange {
                index,
                ring_width: self.ring_width,
            });
        }
        if self.shape == KernelShape::Custom {
            let expected = self.size() * self.size();
            let actual = self.custom_weights.as_ref().map_or(0, Vec::len);
            if actual != expected {
                out.push(ConfigViolation::CustomWeightsMismatch {
                    index,
                    expected,
                    actual,
                });
            }
        }
    }
}

/// Partial update for a kernel. `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KernelPatch {
    pub shape: Option<KernelShape>,
    pub radius: Option<usize>,
    pub peaks: Option<Vec<f32>>,
    pub ring_width: Option<f32>,
    pub weight: Option<f32>,
    pub custom_weights: Option<Vec<f32>>,
}

impl KernelPatch {
    pub fn apply(&self, kernel: &KernelParams) -> KernelParams {
        KernelParams {
            shape: self.shape.unwrap_or(kernel.shape),
            radius: self.radius.unwrap_or(kernel.radius),
            peaks: self.peaks.clone().unwrap_or_else(|| kernel.peaks.clone()),
            ring_width: self.ring_width.unwrap_or(kernel.ring_width),
            weight: self.weight.unwrap_or(kernel.weight),
            custom_weights: self
                .custom_weights
                .clone()
                .or_else(|| kernel.custom_weights.clone()),
        }
    }
}

/// Growth response curve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrowthType {
    #[default]
    Gaussian,
    Polynomial,
    Step,
}

/// Growth function parameters, paired 1:1 with kernels by index.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GrowthParams {
    #[serde(rename = "type", default)]
    pub growth_type: GrowthType,
    /// Optimal activation centre.
    pub mu: f32,
    /// Activation width.
    pub sigma: f32,
}

impl GrowthParams {
    pub fn new(growth_type: GrowthType, mu: f32, sigma: f32) -> Self {
        Self {
            growth_type,
            mu,
            sigma,
        }
    }

    fn violations(&self, index: usize, out: &mut Vec<ConfigViolation>) {
        if !(self.sigma.is_finite() && (MIN_GROWTH_SIGMA..=MAX_GROWTH_SIGMA).contains(&self.sigma))
        {
            out.push(ConfigViolation::SigmaOutOfRange {
                index,
                sigma: self.sigma,
            });
        }
        if !(self.mu.is_finite() && (0.0..=1.0).contains(&self.mu)) {
            out.push(ConfigViolation::MuOutOfRange { index, mu: self.mu });
        }
    }
}

/// Partial update for growth parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GrowthPatch {
    pub growth_type: Option<GrowthType>,
    pub mu: Option<f32>,
    pub sigma: Option<f32>,
}

impl GrowthPatch {
    pub fn apply(&self, params: &GrowthParams) -> GrowthParams {
        GrowthParams {
            growth_type: self.growth_type.unwrap_or(params.growth_type),
            mu: self.mu.unwrap_or(params.mu),
            sigma: self.sigma.unwrap_or(params.sigma),
        }
    }
}

/// How per-kernel growth fields are merged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombinationMode {
    #[default]
    Sum,
    Average,
    /// Weights are expected, not required, to sum to 1.
    Weighted,
}

/// How out-of-range neighbour reads resolve during convolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryMode {
    /// Toroidal wrap.
    #[default]
    Periodic,
    /// Edge replication.
    Clamped,
    /// Mirror across the edge.
    Reflected,
    /// Out-of-range reads contribute nothing.
    Zero,
}

/// Convolution path selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConvolutionStrategy {
    /// Pick per kernel by radius against `fft_threshold`.
    #[default]
    Auto,
    Direct,
    Spectral,
}

/// Validated multi-kernel rule.
///
/// Kernels and growth parameters always have equal length and respect
/// `max_kernels`. Every mutation goes through a builder that returns a new
/// validated value; deserialization validates too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MultiKernelRepr", into = "MultiKernelRepr")]
pub struct MultiKernelConfig {
    kernels: Vec<KernelParams>,
    growth_params: Vec<GrowthParams>,
    combination_mode: CombinationMode,
    dt: f32,
    max_kernels: usize,
}

/// Wire form of [`MultiKernelConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MultiKernelRepr {
    kernels: Vec<KernelParams>,
    growth_params: Vec<GrowthParams>,
    #[serde(default)]
    combination_mode: CombinationMode,
    dt: f32,
    #[serde(default = "default_max_kernels")]
    max_kernels: usize,
}

impl TryFrom<MultiKernelRepr> for MultiKernelConfig {
    type Error = ValidationErrors;

    fn try_from(repr: MultiKernelRepr) -> Result<Self, Self::Error> {
        let config = Self {
            kernels: repr.kernels,
            growth_params: repr.growth_params,
            combination_mode: repr.combination_mode,
            dt: repr.dt,
            max_kernels: repr.max_kernels,
        };
        config.validate()?;
        Ok(config)
    }
}

impl From<MultiKernelConfig> for MultiKernelRepr {
    fn from(config: MultiKernelConfig) -> Self {
        Self {
            kernels: config.kernels,
            growth_params: config.growth_params,
            combination_mode: config.combination_mode,
            dt: config.dt,
            max_kernels: config.max_kernels,
        }
    }
}

impl Default for MultiKernelConfig {
    fn default() -> Self {
        Self {
            kernels: vec![KernelParams::new(KernelShape::Gaussian, 13)],
            growth_params: vec![GrowthParams::new(GrowthType::Gaussian, 0.15, 0.015)],
            combination_mode: CombinationMode::Sum,
            dt: 0.1,
            max_kernels: DEFAULT_MAX_KERNELS,
        }
    }
}

impl MultiKernelConfig {
    /// Build and validate a rule with the default kernel cap.
    pub fn new(
        kernels: Vec<KernelParams>,
        growth_params: Vec<GrowthParams>,
        combination_mode: CombinationMode,
        dt: f32,
    ) -> Result<Self, ValidationErrors> {
        MultiKernelRepr {
            kernels,
            growth_params,
            combination_mode,
            dt,
            max_kernels: DEFAULT_MAX_KERNELS,
        }
        .try_into()
    }

    /// Single-kernel rule.
    pub fn single(
        kernel: KernelParams,
        growth: GrowthParams,
        dt: f32,
    ) -> Result<Self, ValidationErrors> {
        Self::new(vec![kernel], vec![growth], CombinationMode::Sum, dt)
    }

    pub fn kernels(&self) -> &[KernelParams] {
        &self.kernels
    }

    pub fn growth_params(&self) -> &[GrowthParams] {
        &self.growth_params
    }

    pub fn combination_mode(&self) -> CombinationMode {
        self.combination_mode
    }

    pub fn dt(&self) -> f32 {
        self.dt
    }

    pub fn max_kernels(&self) -> usize {
        self.max_kernels
    }

    /// Number of kernels (always equal to the number of growth entries).
    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }

    /// Largest kernel radius in the rule.
    pub fn max_radius(&self) -> usize {
        self.kernels.iter().map(|k| k.radius).max().unwrap_or(0)
    }

    /// Kernel/growth pairs in order.
    pub fn pairs(&self) -> impl Iterator<Item = (&KernelParams, &GrowthParams)> {
        self.kernels.iter().zip(self.growth_params.iter())
    }

    /// Collect every violation instead of stopping at the first one.
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut violations = Vec::new();

        if self.kernels.is_empty() {
            violations.push(ConfigViolation::NoKernels);
        }
        if self.kernels.len() > self.max_kernels {
            violations.push(ConfigViolation::TooManyKernels {
                count: self.kernels.len(),
                max: self.max_kernels,
            });
        }
        if self.kernels.len() != self.growth_params.len() {
            violations.push(ConfigViolation::LengthMismatch {
                kernels: self.kernels.len(),
                growth_params: self.growth_params.len(),
            });
        }
        if !(self.dt.is_finite() && self.dt > 0.0 && self.dt <= 1.0) {
            violations.push(ConfigViolation::TimeStepOutOfRange { dt: self.dt });
        }
        for (i, kernel) in self.kernels.iter().enumerate() {
            kernel.violations(i, &mut violations);
        }
        for (i, growth) in self.growth_params.iter().enumerate() {
            growth.violations(i, &mut violations);
        }

        ValidationErrors::check(violations)
    }

    /// Append a kernel with its growth parameters.
    pub fn with_kernel(
        &self,
        kernel: KernelParams,
        growth: GrowthParams,
    ) -> Result<Self, ConfigError> {
        if self.kernels.len() >= self.max_kernels {
            return Err(ConfigError::KernelLimit {
                max: self.max_kernels,
            });
        }
        let mut next = self.clone();
        next.kernels.push(kernel);
        next.growth_params.push(growth);
        next.validate()?;
        Ok(next)
    }

    /// Remove the kernel (and its growth parameters) at `index`.
    pub fn without_kernel(&self, index: usize) -> Result<Self, ConfigError> {
        self.check_index(index)?;
        if self.kernels.len() == 1 {
            return Err(ConfigError::LastKernel);
        }
        let mut next = self.clone();
        next.kernels.remove(index);
        next.growth_params.remove(index);
        next.validate()?;
        Ok(next)
    }

    /// Apply a partial kernel update at `index`.
    pub fn with_kernel_patch(&self, index: usize, patch: &KernelPatch) -> Result<Self, ConfigError> {
        self.check_index(index)?;
        let mut next = self.clone();
        next.kernels[index] = patch.apply(&self.kernels[index]);
        next.validate()?;
        Ok(next)
    }

    /// Apply a partial growth update at `index`.
    pub fn with_growth_patch(&self, index: usize, patch: &GrowthPatch) -> Result<Self, ConfigError> {
        self.check_index(index)?;
        let mut next = self.clone();
        next.growth_params[index] = patch.apply(&self.growth_params[index]);
        next.validate()?;
        Ok(next)
    }

    pub fn with_dt(&self, dt: f32) -> Result<Self, ValidationErrors> {
        let next = Self {
            dt,
            ..self.clone()
        };
        next.validate()?;
        Ok(next)
    }

    pub fn with_combination_mode(&self, combination_mode: CombinationMode) -> Self {
        Self {
            combination_mode,
            ..self.clone()
        }
    }

    /// Change the kernel cap; fails if the current kernels no longer fit.
    pub fn with_max_kernels(&self, max_kernels: usize) -> Result<Self, ValidationErrors> {
        let next = Self {
            max_kernels,
            ..self.clone()
        };
        next.validate()?;
        Ok(next)
    }

    fn check_index(&self, index: usize) -> Result<(), ConfigError> {
        if index >= self.kernels.len() {
            return Err(ConfigError::IndexOutOfBounds {
                index,
                len: self.kernels.len(),
            });
        }
        Ok(())
    }
}

/// Mass tracking and conservation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MassConfig {
    /// Rescale the field toward the target mass when drift exceeds the threshold.
    pub conservation: bool,
    /// Relative drift that triggers renormalization.
    pub drift_threshold: f32,
    /// Steps between periodic mass passes; 0 disables them.
    pub check_interval: u64,
    /// Explicit target mass; captured from the first measurement when unset.
    pub target: Option<f32>,
    /// Cells per block in the first reduction phase.
    pub block_size: usize,
}

impl Default for MassConfig {
    fn default() -> Self {
        Self {
            conservation: false,
            drift_threshold: DEFAULT_DRIFT_THRESHOLD,
            check_interval: 10,
            target: None,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

/// Top-level simulation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Grid width in cells.
    pub width: usize,
    /// Grid height in cells.
    pub height: usize,
    /// Neighbour read policy at the grid edges.
    #[serde(default)]
    pub boundary: BoundaryMode,
    /// Convolution path selection.
    #[serde(default)]
    pub strategy: ConvolutionStrategy,
    /// Radius at which `Auto` switches a kernel to the spectral path.
    #[serde(default = "default_fft_threshold")]
    pub fft_threshold: usize,
    /// Kernels, growth functions and combination.
    pub rule: MultiKernelConfig,
    /// Mass tracking parameters.
    #[serde(default)]
    pub mass: MassConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            width: 256,
            height: 256,
            boundary: BoundaryMode::Periodic,
            strategy: ConvolutionStrategy::Auto,
            fft_threshold: DEFAULT_FFT_THRESHOLD,
            rule: MultiKernelConfig::default(),
            mass: MassConfig::default(),
        }
    }
}

impl SimulationConfig {
    /// Total number of cells.
    #[inline]
    pub fn grid_size(&self) -> usize {
        self.width * self.height
    }

    /// Validate grid, engine and mass parameters together with the rule.
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut violations = match self.rule.validate() {
            Ok(()) => Vec::new(),
            Err(errors) => errors.0,
        };

        if self.width == 0 || self.height == 0 {
            violations.push(ConfigViolation::InvalidDimensions {
                width: self.width,
                height: self.height,
            });
        }
        if self.fft_threshold == 0 {
            violations.push(ConfigViolation::InvalidFftThreshold);
        }
        if self.mass.block_size == 0 {
            violations.push(ConfigViolation::InvalidBlockSize);
        }
        if !(self.mass.drift_threshold.is_finite() && self.mass.drift_threshold >= 0.0) {
            violations.push(ConfigViolation::InvalidDriftThreshold {
                threshold: self.mass.drift_threshold,
            });
        }
        if let Some(target) = self.mass.target
            && !(target.is_finite() && target >= 0.0)
        {
            violations.push(ConfigViolation::InvalidTargetMass { target });
        }

        ValidationErrors::check(violations)
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self, LoadError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// A single configuration problem.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigViolation {
    #[error("at least one kernel is required")]
    NoKernels,
    #[error("{count} kernels exceeds the maximum of {max}")]
    TooManyKernels { count: usize, max: usize },
    #[error("{kernels} kernels but {growth_params} growth parameter sets")]
    LengthMismatch { kernels: usize, growth_params: usize },
    #[error("kernel {index}: radius {radius} is outside [3, 50]")]
    RadiusOutOfRange { index: usize, radius: usize },
    #[error("kernel {index}: weight {weight} is outside [0, 2]")]
    WeightOutOfRange { index: usize, weight: f32 },
    #[error("kernel {index}: ring width {ring_width} is outside (0, 1]")]
    RingWidthOutOfRange { index: usize, ring_width: f32 },
    #[error("kernel {index}: custom shape needs {expected} weights, got {actual}")]
    CustomWeightsMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },
    #[error("dt {dt} is outside (0, 1]")]
    TimeStepOutOfRange { dt: f32 },
    #[error("growth {index}: sigma {sigma} is outside [0.001, 0.5]")]
    SigmaOutOfRange { index: usize, sigma: f32 },
    #[error("growth {index}: mu {mu} is outside [0, 1]")]
    MuOutOfRange { index: usize, mu: f32 },
    #[error("grid dimensions {width}x{height} must be non-zero")]
    InvalidDimensions { width: usize, height: usize },
    #[error("fft threshold must be non-zero")]
    InvalidFftThreshold,
    #[error("mass reduction block size must be non-zero")]
    InvalidBlockSize,
    #[error("drift threshold {threshold} must be finite and non-negative")]
    InvalidDriftThreshold { threshold: f32 },
    #[error("target mass {target} must be finite and non-negative")]
    InvalidTargetMass { target: f32 },
}

/// Every violation found in one validation pass.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid configuration: {}", join_violations(.0))]
pub struct ValidationErrors(pub Vec<ConfigViolation>);

impl ValidationErrors {
    fn check(violations: Vec<ConfigViolation>) -> Result<(), Self> {
        if violations.is_empty() {
            Ok(())
        } else {
            Err(Self(violations))
        }
    }

    pub fn violations(&self) -> &[ConfigViolation] {
        &self.0
    }

    /// Human-readable messages, one per violation.
    pub fn messages(&self) -> Vec<String> {
        self.0.iter().map(ToString::to_string).collect()
    }
}

fn join_violations(violations: &[ConfigViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors from rule mutation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Invalid(#[from] ValidationErrors),
    #[error("cannot add kernel: the rule already holds the maximum of {max} kernels")]
    KernelLimit { max: usize },
    #[error("kernel index {index} is out of bounds for {len} kernels")]
    IndexOutOfBounds { index: usize, len: usize },
    #[error("cannot remove the last remaining kernel")]
    LastKernel,
}

/// Errors from loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Invalid(#[from] ValidationErrors),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn growth() -> GrowthParams {
        GrowthParams::new(GrowthType::Gaussian, 0.15, 0.015)
    }

    fn four_kernel_config() -> MultiKernelConfig {
        let mut config = MultiKernelConfig::default();
        for radius in [5, 8, 20] {
            config = config
                .with_kernel(KernelParams::new(KernelShape::Ring, radius), growth())
                .unwrap();
        }
        config
    }

    #[test]
    fn test_default_config_valid() {
        assert!(MultiKernelConfig::default().validate().is_ok());
        assert!(SimulationConfig::default().validate().is_ok());
    }

    #[test]
    fn test_fifth_kernel_rejected() {
        let config = four_kernel_config();
        assert_eq!(config.len(), 4);

        let err = config
            .with_kernel(KernelParams::new(KernelShape::Gaussian, 10), growth())
            .unwrap_err();
        assert_eq!(err, ConfigError::KernelLimit { max: 4 });
        assert!(err.to_string().contains("maximum of 4"));
    }

    #[test]
    fn test_remove_last_kernel_rejected() {
        let config = MultiKernelConfig::default();
        assert_eq!(config.without_kernel(0).unwrap_err(), ConfigError::LastKernel);
    }

    #[test]
    fn test_remove_out_of_bounds() {
        let config = four_kernel_config();
        assert_eq!(
            config.without_kernel(7).unwrap_err(),
            ConfigError::IndexOutOfBounds { index: 7, len: 4 }
        );
        assert!(matches!(
            config.with_kernel_patch(4, &KernelPatch::default()),
            Err(ConfigError::IndexOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_lengths_stay_paired() {
        let config = four_kernel_config();
        assert_eq!(config.kernels().len(), config.growth_params().len());

        let removed = config.without_kernel(1).unwrap();
        assert_eq!(removed.kernels().len(), 3);
        assert_eq!(removed.growth_params().len(), 3);
        assert_eq!(removed.kernels()[1].radius, 8);

        // Original value is untouched
        assert_eq!(config.len(), 4);
    }

    #[test]
    fn test_violations_reported_together() {
        let result = MultiKernelConfig::new(
            vec![KernelParams::new(KernelShape::Gaussian, 60).with_weight(3.0)],
            vec![
                GrowthParams::new(GrowthType::Gaussian, 0.15, 0.9),
                growth(),
            ],
            CombinationMode::Sum,
            0.0,
        );

        let errors = result.unwrap_err();
        let violations = errors.violations();
        assert!(violations.contains(&ConfigViolation::LengthMismatch {
            kernels: 1,
            growth_params: 2
        }));
        assert!(violations.contains(&ConfigViolation::RadiusOutOfRange { index: 0, radius: 60 }));
        assert!(violations.contains(&ConfigViolation::WeightOutOfRange { index: 0, weight: 3.0 }));
        assert!(violations.contains(&ConfigViolation::TimeStepOutOfRange { dt: 0.0 }));
        assert!(violations.contains(&ConfigViolation::SigmaOutOfRange { index: 0, sigma: 0.9 }));
        assert_eq!(errors.messages().len(), violations.len());
    }

    #[test]
    fn test_invalid_patch_leaves_config() {
        let config = MultiKernelConfig::default();
        let patch = KernelPatch {
            radius: Some(2),
            ..Default::default()
        };
        let err = config.with_kernel_patch(0, &patch).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert_eq!(config.kernels()[0].radius, 13);
    }

    #[test]
    fn test_fingerprint_ignores_weight() {
        let a = KernelParams::new(KernelShape::Polynomial, 13);
        let b = a.clone().with_weight(0.5);
        let c = a.clone().with_peaks(vec![0.3, 0.7]);
        let d = KernelParams::new(KernelShape::Polynomial, 14);

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_ne!(a.fingerprint(), d.fingerprint());

        // Peaks do not shape a gaussian kernel
        let g = KernelParams::new(KernelShape::Gaussian, 13);
        assert_eq!(g.fingerprint(), g.clone().with_peaks(vec![0.1]).fingerprint());
    }

    #[test]
    fn test_serialization() {
        let config = four_kernel_config().with_combination_mode(CombinationMode::Average);
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("growthParams"));
        assert!(json.contains("combinationMode"));
        assert!(json.contains("\"type\":\"gaussian\""));

        let parsed: MultiKernelConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_deserialize_rejects_mismatch() {
        let json = r#"{
            "kernels": [{"shape": "polynomial", "radius": 13, "peaks": [0.5], "weight": 1.0}],
            "growthParams": [],
            "combinationMode": "sum",
            "dt": 0.1
        }"#;
        let err = serde_json::from_str::<MultiKernelConfig>(json).unwrap_err();
        assert!(err.to_string().contains("growth parameter sets"));
    }

    #[test]
    fn test_load_from_file() {
        let config = SimulationConfig {
            width: 64,
            height: 64,
            boundary: BoundaryMode::Reflected,
            ..Default::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sim.json");
        fs::write(&path, config.to_json_pretty().unwrap()).unwrap();

        let loaded = SimulationConfig::load(&path).unwrap();
        assert_eq!(loaded.width, 64);
        assert_eq!(loaded.boundary, BoundaryMode::Reflected);
        assert_eq!(loaded.rule, config.rule);
        assert_eq!(loaded.fft_threshold, DEFAULT_FFT_THRESHOLD);
    }

    #[test]
    fn test_load_rejects_bad_grid() {
        let mut config = SimulationConfig::default();
        config.width = 0;
        config.mass.block_size = 0;
        let json = config.to_json_pretty().unwrap();

        match SimulationConfig::from_json_str(&json) {
            Err(LoadError::Invalid(errors)) => assert_eq!(errors.violations().len(), 2),
            other => panic!("expected validation failure, got {:?}", other),
        }
    }
}
