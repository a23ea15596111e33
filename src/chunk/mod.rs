//! Chunk keys, height grids, and the streaming pipeline built around them.
//!
//! The terrain is an infinite grid of square chunks addressed by a
//! [`ChunkKey`]. Each chunk's heights arrive from a remote source as a
//! wire payload, are decoded into a [`HeightGrid`] and turned into a
//! renderable by a [`mesh::ChunkMeshBuilder`]. Which chunks are requested,
//! at which resolution and in which order is decided by
//! [`streaming::ChunkStreamer`].
//!
//! # Example
//! ```
//! use terrastream::chunk::ChunkKey;
//! use bevy::math::Vec3;
//!
//! let key = ChunkKey::from_world(Vec3::new(-10.0, 0.0, 700.0), 256.0);
//! assert_eq!(key, ChunkKey::new(-1, 2));
//! assert_eq!(key.chebyshev_distance(ChunkKey::new(2, 0)), 3);
//! ```

use bevy::math::{Vec2, Vec3};
use std::fmt;

pub mod config;
pub mod decode;
pub mod gate;
pub mod lod;
pub mod mesh;
pub mod plugin;
pub mod queue;
pub mod stats;
pub mod streaming;
pub mod tracker;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{ConfigError, StreamingConfig};
pub use lod::{select_resolution, ResolutionBand};
pub use stats::StreamingStats;
pub use streaming::ChunkStreamer;

/// Grid coordinate of a chunk on the infinite XZ plane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkKey {
    pub x: i32,
    pub z: i32,
}

impl ChunkKey {
    #[must_use]
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Chunk containing the world-space position `pos` (Y is ignored).
    ///
    /// # Arguments
    /// * `pos` - world position in meters
    /// * `chunk_size` - edge length of a chunk in meters
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_world(pos: Vec3, chunk_size: f32) -> Self {
        Self {
            x: (pos.x / chunk_size).floor() as i32,
            z: (pos.z / chunk_size).floor() as i32,
        }
    }

    /// World-space XZ position of the chunk's south-west corner.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn origin(self, chunk_size: f32) -> Vec2 {
        Vec2::new(self.x as f32 * chunk_size, self.z as f32 * chunk_size)
    }

    /// World-space XZ position of the chunk's center.
    #[must_use]
    pub fn center(self, chunk_size: f32) -> Vec2 {
        self.origin(chunk_size) + Vec2::splat(chunk_size * 0.5)
    }

    /// Per-axis grid distance, used for the load/unload radius tests.
    #[must_use]
    pub fn chebyshev_distance(self, other: ChunkKey) -> u64 {
        let dx = i64::from(self.x) - i64::from(other.x);
        let dz = i64::from(self.z) - i64::from(other.z);
        dx.unsigned_abs().max(dz.unsigned_abs())
    }

    /// Key offset by `(dx, dz)` chunks, or `None` past the edge of the grid.
    #[must_use]
    pub fn offset(self, dx: i32, dz: i32) -> Option<ChunkKey> {
        Some(Self { x: self.x.checked_add(dx)?, z: self.z.checked_add(dz)? })
    }

    /// Squared Euclidean grid distance, used as the request priority.
    #[must_use]
    pub fn squared_distance(self, other: ChunkKey) -> u64 {
        let dx = i64::from(self.x) - i64::from(other.x);
        let dz = i64::from(self.z) - i64::from(other.z);
        (dx * dx + dz * dz).unsigned_abs()
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.z)
    }
}

/// Square grid of terrain heights in meters, row-major along Z.
///
/// `resolution` is the number of samples per edge; the samples span the
/// whole chunk including both edges so neighbouring chunks share a seam.
#[derive(Debug, Clone, PartialEq)]
pub struct HeightGrid {
    pub resolution: u32,
    pub heights: Vec<f32>,
}

impl HeightGrid {
    #[must_use]
    pub fn new(resolution: u32, heights: Vec<f32>) -> Self {
        Self { resolution, heights }
    }

    /// Height at sample `(x, z)`, or `None` outside the grid.
    #[must_use]
    pub fn get(&self, x: u32, z: u32) -> Option<f32> {
        if x >= self.resolution || z >= self.resolution {
            return None;
        }
        let idx = z as usize * self.resolution as usize + x as usize;
        self.heights.get(idx).copied()
    }

    /// Lowest and highest sample, or `None` for an empty grid.
    #[must_use]
    pub fn min_max(&self) -> Option<(f32, f32)> {
        self.heights.iter().fold(None, |acc, &h| match acc {
            None => Some((h, h)),
            Some((lo, hi)) => Some((lo.min(h), hi.max(h))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn world_positions_map_to_floored_chunks() {
        assert_eq!(ChunkKey::from_world(Vec3::new(0.0, 50.0, 0.0), 256.0), ChunkKey::new(0, 0));
        assert_eq!(ChunkKey::from_world(Vec3::new(255.9, 0.0, 256.0), 256.0), ChunkKey::new(0, 1));
        assert_eq!(ChunkKey::from_world(Vec3::new(-0.1, 0.0, -256.1), 256.0), ChunkKey::new(-1, -2));
    }

    #[test]
    fn distances_between_keys() {
        let a = ChunkKey::new(0, 0);
        let b = ChunkKey::new(-3, 2);
        assert_eq!(a.chebyshev_distance(b), 3);
        assert_eq!(a.squared_distance(b), 13);
        assert_eq!(b.center(10.0), Vec2::new(-25.0, 25.0));
    }

    #[test]
    fn distances_do_not_overflow_at_the_grid_edge() {
        let lo = ChunkKey::new(i32::MIN, 0);
        let hi = ChunkKey::new(i32::MAX, 0);
        assert_eq!(lo.chebyshev_distance(hi), u64::from(u32::MAX));
        assert_eq!(hi.offset(1, 0), None);
        assert_eq!(hi.offset(-1, 0), Some(ChunkKey::new(i32::MAX - 1, 0)));
    }

    #[test]
    fn height_grid_lookup_is_row_major() {
        let grid = HeightGrid::new(2, vec![1.0, 2.0, 3.0, -4.0]);
        assert_eq!(grid.get(1, 0), Some(2.0));
        assert_eq!(grid.get(0, 1), Some(3.0));
        assert_eq!(grid.get(2, 0), None);
        assert_eq!(grid.min_max(), Some((-4.0, 3.0)));
    }
}
