//! Chunk level-of-detail selection.
//!
//! A chunk's resolution (samples per edge) is picked from an ordered table of
//! distance bands. Distances are true Euclidean XZ distances from the observer
//! to the chunk center in meters, so LOD rings are circles even though the
//! load/unload radii are per-axis squares.
use super::config::ConfigError;
use serde::{Deserialize, Serialize};

/// One row of the resolution table: chunks whose center lies within
/// `max_distance` meters use `resolution` samples per edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResolutionBand {
    pub max_distance: f32,
    pub resolution: u32,
}

impl ResolutionBand {
    #[must_use]
    pub const fn new(max_distance: f32, resolution: u32) -> Self {
        Self { max_distance, resolution }
    }
}

/// Default table for 256 m chunks. The last band also covers everything
/// beyond its own `max_distance`.
pub const DEFAULT_BANDS: [ResolutionBand; 4] = [
    ResolutionBand::new(512.0, 65),
    ResolutionBand::new(1024.0, 33),
    ResolutionBand::new(2048.0, 17),
    ResolutionBand::new(4096.0, 9),
];

/// Pick the resolution for a chunk `distance` meters away.
///
/// Bands are scanned in order and the first one with
/// `max_distance >= distance` wins; past the table the last band's
/// resolution is returned. An empty table yields `0`, which validated
/// configurations never produce.
///
/// # Examples
/// ```
/// use terrastream::chunk::lod::{select_resolution, DEFAULT_BANDS};
/// assert_eq!(select_resolution(&DEFAULT_BANDS, 0.0), 65);
/// assert_eq!(select_resolution(&DEFAULT_BANDS, 512.0), 65);
/// assert_eq!(select_resolution(&DEFAULT_BANDS, 600.0), 33);
/// assert_eq!(select_resolution(&DEFAULT_BANDS, 1.0e9), 9);
/// ```
#[must_use]
pub fn select_resolution(bands: &[ResolutionBand], distance: f32) -> u32 {
    bands
        .iter()
        .find(|band| band.max_distance >= distance)
        .or_else(|| bands.last())
        .map_or(0, |band| band.resolution)
}

/// Check that `bands` is non-empty, distance-ascending and
/// resolution-descending, and that every resolution can form a mesh.
///
/// # Errors
/// Returns the first offending band as a [`ConfigError`].
pub fn validate_bands(bands: &[ResolutionBand]) -> Result<(), ConfigError> {
    if bands.is_empty() {
        return Err(ConfigError::NoBands);
    }
    for (index, band) in bands.iter().enumerate() {
        if band.resolution < 2 {
            return Err(ConfigError::BandResolutionTooLow { index, resolution: band.resolution });
        }
        if index == 0 {
            continue;
        }
        let prev = bands[index - 1];
        if band.max_distance.partial_cmp(&prev.max_distance) != Some(std::cmp::Ordering::Greater) {
            return Err(ConfigError::BandDistanceOrder { index });
        }
        if band.resolution >= prev.resolution {
            return Err(ConfigError::BandResolutionOrder { index });
        }
    }
    Ok(())
}
