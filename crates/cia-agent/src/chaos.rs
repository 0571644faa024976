//! Chaos controller
//!
//! Autonomous, randomized fault injection. Consulted only for requests no
//! explicit rule matched. Each sampled request is intervened on with
//! probability `intensity`; the injected fault is an elevated status or a
//! network error, drawn uniformly.

use crate::error::ChaosError;
use crate::types::RequestClass;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Status codes chaos may inject
pub const CHAOS_STATUSES: [u16; 4] = [500, 502, 503, 504];

/// Traffic class chaos is scoped to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChaosTarget {
    /// API calls
    #[default]
    Api,
    /// Static assets
    Assets,
}

impl ChaosTarget {
    /// Whether a request class falls inside this target
    #[inline]
    #[must_use]
    pub fn covers(self, class: RequestClass) -> bool {
        matches!(
            (self, class),
            (Self::Api, RequestClass::Api) | (Self::Assets, RequestClass::Assets)
        )
    }
}

impl Display for ChaosTarget {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Api => "api",
            Self::Assets => "assets",
        })
    }
}

/// Chaos-mode configuration, toggled as a whole
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChaosConfig {
    /// Chaos mode on
    pub enabled: bool,
    /// Per-request intervention probability in [0, 1]
    pub intensity: f64,
    /// Traffic class to sample
    pub target: ChaosTarget,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            intensity: 0.0,
            target: ChaosTarget::Api,
        }
    }
}

/// Optional knobs carried by a chaos toggle
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChaosOptions {
    /// Intervention probability; the agent default applies when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intensity: Option<f64>,
    /// Target class; `api` when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<ChaosTarget>,
}

impl ChaosOptions {
    /// Create empty options
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With intensity
    #[inline]
    #[must_use]
    pub fn with_intensity(mut self, intensity: f64) -> Self {
        self.intensity = Some(intensity);
        self
    }

    /// With target
    #[inline]
    #[must_use]
    pub fn with_target(mut self, target: ChaosTarget) -> Self {
        self.target = Some(target);
        self
    }
}

/// A synthesized failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "status")]
pub enum ChaosFault {
    /// Elevated status response
    Status(u16),
    /// Connection-level failure
    NetworkError,
}

impl Display for ChaosFault {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status(code) => write!(f, "status {code}"),
            Self::NetworkError => f.write_str("network error"),
        }
    }
}

/// Chaos state owned by the worker
#[derive(Debug)]
pub struct ChaosController {
    config: ChaosConfig,
    default_intensity: f64,
    rng: StdRng,
}

impl ChaosController {
    /// Create disabled controller
    ///
    /// A seed makes the fault sequence reproducible.
    #[must_use]
    pub fn new(default_intensity: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            config: ChaosConfig::default(),
            default_intensity,
            rng,
        }
    }

    /// Replace the chaos configuration
    ///
    /// # Errors
    /// `ChaosError::InvalidIntensity` when the intensity is outside [0, 1];
    /// the previous configuration is kept.
    pub fn configure(
        &mut self,
        enabled: bool,
        options: ChaosOptions,
    ) -> Result<ChaosConfig, ChaosError> {
        let intensity = options.intensity.unwrap_or(self.default_intensity);
        if !(0.0..=1.0).contains(&intensity) {
            return Err(ChaosError::InvalidIntensity(intensity));
        }
        self.config = ChaosConfig {
            enabled,
            intensity,
            target: options.target.unwrap_or_default(),
        };
        Ok(self.config)
    }

    /// Disable and forget configuration
    #[inline]
    pub fn reset(&mut self) {
        self.config = ChaosConfig::default();
    }

    /// Draw a fault for a request of `class`, if chaos selects it
    pub fn sample(&mut self, class: RequestClass) -> Option<ChaosFault> {
        if !self.config.enabled || !self.config.target.covers(class) {
            return None;
        }
        let roll: f64 = self.rng.random();
        if roll >= self.config.intensity {
            return None;
        }
        let pick = self.rng.random_range(0..=CHAOS_STATUSES.len());
        Some(
            CHAOS_STATUSES
                .get(pick)
                .map_or(ChaosFault::NetworkError, |&code| ChaosFault::Status(code)),
        )
    }

    /// Chaos mode on
    #[inline]
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Current configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> ChaosConfig {
        self.config
    }
}
