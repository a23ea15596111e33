//! Streaming configuration and its validation.
//!
//! `StreamingConfig` is the full tuning surface of the scheduler. It is
//! deserialized from the `streaming` section of the settings RON file, so
//! every field carries a serde default.

use super::lod::{validate_bands, ResolutionBand, DEFAULT_BANDS};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejected configuration values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("load radius must not be negative (got {0})")]
    NegativeLoadRadius(i32),
    #[error("unload radius {unload} must exceed load radius {load}")]
    NoHysteresis { load: i32, unload: i32 },
    #[error("radius {radius} exceeds the {max}-chunk limit")]
    RadiusTooLarge { radius: i32, max: i32 },
    #[error("max concurrent fetches must be at least 1")]
    ZeroBudget,
    #[error("{name} must be a finite number of seconds within range (got {value})")]
    BadDelay { name: &'static str, value: f64 },
    #[error("chunk size must be a positive number of meters (got {0})")]
    BadChunkSize(f32),
    #[error("resolution band table is empty")]
    NoBands,
    #[error("resolution band {index}: distances must strictly ascend")]
    BandDistanceOrder { index: usize },
    #[error("resolution band {index}: resolutions must strictly descend")]
    BandResolutionOrder { index: usize },
    #[error("resolution band {index}: resolution {resolution} is below the 2-sample minimum")]
    BandResolutionTooLow { index: usize, resolution: u32 },
}

/// Largest load or unload radius, in chunks.
pub const MAX_RADIUS: i32 = 256;

/// Tuning parameters for [`super::ChunkStreamer`].
///
/// # Fields
/// * `load_radius` - Chebyshev radius (in chunks) within which chunks are requested
/// * `unload_radius` - Chebyshev radius beyond which chunks are evicted; must exceed `load_radius`
/// * `max_concurrent_fetches` - hard ceiling on in-flight fetches
/// * `cooldown_delay` - seconds to wait after a transient fetch failure
/// * `retry_delay` - seconds to wait after a "not ready yet" reply
/// * `resolution_bands` - distance to resolution table, see [`super::lod`]
/// * `chunk_size_meters` - edge length of one chunk in world units
/// * `tick_interval_seconds` - how often the host should call `tick`
/// * `debug` - log every admission and state transition at info level
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingConfig {
    #[serde(default = "StreamingConfig::default_load_radius")]
    pub load_radius: i32,
    #[serde(default = "StreamingConfig::default_unload_radius")]
    pub unload_radius: i32,
    #[serde(default = "StreamingConfig::default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
    #[serde(default = "StreamingConfig::default_cooldown_delay")]
    pub cooldown_delay: f64,
    #[serde(default = "StreamingConfig::default_retry_delay")]
    pub retry_delay: f64,
    #[serde(default = "StreamingConfig::default_resolution_bands")]
    pub resolution_bands: Vec<ResolutionBand>,
    #[serde(default = "StreamingConfig::default_chunk_size_meters")]
    pub chunk_size_meters: f32,
    #[serde(default = "StreamingConfig::default_tick_interval_seconds")]
    pub tick_interval_seconds: f64,
    #[serde(default)]
    pub debug: bool,
}

impl StreamingConfig {
    fn default_load_radius() -> i32 { 6 }
    fn default_unload_radius() -> i32 { 8 }
    fn default_max_concurrent_fetches() -> usize { 20 }
    fn default_cooldown_delay() -> f64 { 5.0 }
    fn default_retry_delay() -> f64 { 1.0 }
    fn default_resolution_bands() -> Vec<ResolutionBand> { DEFAULT_BANDS.to_vec() }
    fn default_chunk_size_meters() -> f32 { 256.0 }
    fn default_tick_interval_seconds() -> f64 { 0.25 }

    /// Check every invariant the scheduler relies on.
    ///
    /// # Errors
    /// Returns the first violated constraint as a [`ConfigError`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.load_radius < 0 {
            return Err(ConfigError::NegativeLoadRadius(self.load_radius));
        }
        if self.unload_radius <= self.load_radius {
            return Err(ConfigError::NoHysteresis { load: self.load_radius, unload: self.unload_radius });
        }
        if self.unload_radius > MAX_RADIUS {
            return Err(ConfigError::RadiusTooLarge { radius: self.unload_radius, max: MAX_RADIUS });
        }
        if self.max_concurrent_fetches == 0 {
            return Err(ConfigError::ZeroBudget);
        }
        for (name, value) in [("cooldown_delay", self.cooldown_delay), ("retry_delay", self.retry_delay)] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::BadDelay { name, value });
            }
        }
        if !(self.tick_interval_seconds.is_finite() && self.tick_interval_seconds > 0.0) {
            return Err(ConfigError::BadDelay { name: "tick_interval_seconds", value: self.tick_interval_seconds });
        }
        if !(self.chunk_size_meters.is_finite() && self.chunk_size_meters > 0.0) {
            return Err(ConfigError::BadChunkSize(self.chunk_size_meters));
        }
        validate_bands(&self.resolution_bands)
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            load_radius: Self::default_load_radius(),
            unload_radius: Self::default_unload_radius(),
            max_concurrent_fetches: Self::default_max_concurrent_fetches(),
            cooldown_delay: Self::default_cooldown_delay(),
            retry_delay: Self::default_retry_delay(),
            resolution_bands: Self::default_resolution_bands(),
            chunk_size_meters: Self::default_chunk_size_meters(),
            tick_interval_seconds: Self::default_tick_interval_seconds(),
            debug: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(StreamingConfig::default().validate(), Ok(()));
    }

    #[test]
    fn unload_radius_must_exceed_load_radius() {
        let cfg = StreamingConfig { load_radius: 4, unload_radius: 4, ..Default::default() };
        assert_eq!(cfg.validate(), Err(ConfigError::NoHysteresis { load: 4, unload: 4 }));
    }

    #[test]
    fn oversized_radius_is_rejected() {
        let cfg = StreamingConfig { load_radius: 1 << 30, unload_radius: (1 << 30) + 1, ..Default::default() };
        assert_eq!(cfg.validate(), Err(ConfigError::RadiusTooLarge { radius: (1 << 30) + 1, max: MAX_RADIUS }));

        let cfg = StreamingConfig { load_radius: MAX_RADIUS - 1, unload_radius: MAX_RADIUS, ..Default::default() };
        assert_eq!(cfg.validate(), Ok(()));
    }

    #[test]
    fn zero_budget_and_bad_delays_are_rejected() {
        let cfg = StreamingConfig { max_concurrent_fetches: 0, ..Default::default() };
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroBudget));

        let cfg = StreamingConfig { retry_delay: f64::NAN, ..Default::default() };
        assert!(matches!(cfg.validate(), Err(ConfigError::BadDelay { name: "retry_delay", .. })));
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let cfg: StreamingConfig = ron::from_str("(load_radius: 3, unload_radius: 5)").expect("parse");
        assert_eq!(cfg.load_radius, 3);
        assert_eq!(cfg.max_concurrent_fetches, 20);
        assert_eq!(cfg.resolution_bands, DEFAULT_BANDS.to_vec());
    }
}
