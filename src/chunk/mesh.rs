//! Height grid to renderable terrain mesh.
//!
//! A grid of `resolution` samples per edge becomes a regular triangle mesh
//! of `(resolution - 1)^2` quads, two triangles each, spanning the whole
//! chunk. Vertices are local to the chunk origin; the spawned entity's
//! transform places the chunk in the world.
//!
//! # Example
//! ```
//! use terrastream::chunk::{ChunkKey, HeightGrid};
//! use terrastream::chunk::mesh::build_terrain_mesh_data;
//! let grid = HeightGrid::new(3, vec![0.0; 9]);
//! let data = build_terrain_mesh_data(ChunkKey::new(0, 0), &grid, 256.0).unwrap();
//! assert_eq!(data.triangle_count(), 8);
//! ```

use super::{ChunkKey, HeightGrid};
use bevy::prelude::*;
use bevy::render::mesh::{Indices, PrimitiveTopology};
use bevy::render::render_asset::RenderAssetUsages;
use thiserror::Error;

/// Permanent mesh build failure. The scheduler blacklists the chunk.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BuildError {
    #[error("chunk {key}: resolution {resolution} is too coarse to mesh")]
    TooCoarse { key: ChunkKey, resolution: u32 },
    #[error("chunk {key}: expected {expected} height samples, got {actual}")]
    SampleCount { key: ChunkKey, expected: usize, actual: usize },
    #[error("chunk {key}: height grid contains non-finite samples")]
    NonFinite { key: ChunkKey },
}

/// Turns decoded heights into something drawable and tears it down again.
pub trait ChunkMeshBuilder {
    type Renderable;

    /// # Errors
    /// Any [`BuildError`] is treated as permanent for `key`.
    fn build(&mut self, key: ChunkKey, grid: &HeightGrid) -> Result<Self::Renderable, BuildError>;

    /// Free everything `renderable` holds. Called exactly once per built value.
    fn release(&mut self, renderable: Self::Renderable);
}

/// Vertex and index buffers for one chunk, before they become a Bevy asset.
#[derive(Debug, Clone, Default)]
pub struct TerrainMeshData {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub uvs: Vec<[f32; 2]>,
    pub indices: Vec<u32>,
}

impl TerrainMeshData {
    #[must_use]
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    #[must_use]
    pub fn into_mesh(self) -> Mesh {
        let mut mesh = Mesh::new(PrimitiveTopology::TriangleList, RenderAssetUsages::default());
        mesh.insert_attribute(Mesh::ATTRIBUTE_POSITION, self.positions);
        mesh.insert_attribute(Mesh::ATTRIBUTE_NORMAL, self.normals);
        mesh.insert_attribute(Mesh::ATTRIBUTE_UV_0, self.uvs);
        mesh.insert_indices(Indices::U32(self.indices));
        mesh
    }
}

/// Build the vertex buffers for `grid` over a chunk `chunk_size` meters wide.
///
/// Normals come from central differences, falling back to one-sided
/// differences on the chunk border.
///
/// # Errors
/// Returns a [`BuildError`] for grids below two samples per edge, with the
/// wrong number of samples, or containing NaN or infinite heights.
#[allow(clippy::cast_precision_loss)]
pub fn build_terrain_mesh_data(key: ChunkKey, grid: &HeightGrid, chunk_size: f32) -> Result<TerrainMeshData, BuildError> {
    let res = grid.resolution;
    if res < 2 {
        return Err(BuildError::TooCoarse { key, resolution: res });
    }
    let n = res as usize;
    if grid.heights.len() != n * n {
        return Err(BuildError::SampleCount { key, expected: n * n, actual: grid.heights.len() });
    }
    if grid.heights.iter().any(|h| !h.is_finite()) {
        return Err(BuildError::NonFinite { key });
    }

    let step = chunk_size / (res - 1) as f32;
    let height = |x: usize, z: usize| grid.heights[z * n + x];

    let mut data = TerrainMeshData {
        positions: Vec::with_capacity(n * n),
        normals: Vec::with_capacity(n * n),
        uvs: Vec::with_capacity(n * n),
        indices: Vec::with_capacity((n - 1) * (n - 1) * 6),
    };

    for z in 0..n {
        for x in 0..n {
            data.positions.push([x as f32 * step, height(x, z), z as f32 * step]);
            data.uvs.push([x as f32 / (n - 1) as f32, z as f32 / (n - 1) as f32]);

            let (x0, x1) = (x.saturating_sub(1), (x + 1).min(n - 1));
            let (z0, z1) = (z.saturating_sub(1), (z + 1).min(n - 1));
            let dx = (height(x1, z) - height(x0, z)) / ((x1 - x0) as f32 * step);
            let dz = (height(x, z1) - height(x, z0)) / ((z1 - z0) as f32 * step);
            data.normals.push(Vec3::new(-dx, 1.0, -dz).normalize().to_array());
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    let idx = |x: usize, z: usize| (z * n + x) as u32;
    for z in 0..n - 1 {
        for x in 0..n - 1 {
            let (a, b, c, d) = (idx(x, z), idx(x + 1, z), idx(x, z + 1), idx(x + 1, z + 1));
            // Counter-clockwise seen from above.
            data.indices.extend_from_slice(&[a, c, b, b, c, d]);
        }
    }
    Ok(data)
}

/// Marker on every spawned terrain chunk entity.
#[derive(Component, Debug, Clone, Copy)]
pub struct TerrainChunk {
    pub key: ChunkKey,
    pub resolution: u32,
}

/// What a built chunk holds in the Bevy world.
#[derive(Debug, Clone)]
pub struct ChunkRenderable {
    pub entity: Entity,
    pub mesh: Handle<Mesh>,
}

/// Mesh builder that spawns one entity per chunk with a shared material.
pub struct BevyChunkBuilder<'a, 'w, 's> {
    pub commands: &'a mut Commands<'w, 's>,
    pub meshes: &'a mut Assets<Mesh>,
    pub material: Handle<StandardMaterial>,
    pub chunk_size: f32,
}

impl ChunkMeshBuilder for BevyChunkBuilder<'_, '_, '_> {
    type Renderable = ChunkRenderable;

    fn build(&mut self, key: ChunkKey, grid: &HeightGrid) -> Result<ChunkRenderable, BuildError> {
        let data = build_terrain_mesh_data(key, grid, self.chunk_size)?;
        let mesh = self.meshes.add(data.into_mesh());
        let origin = key.origin(self.chunk_size);
        let entity = self
            .commands
            .spawn((
                PbrBundle {
                    mesh: mesh.clone(),
                    material: self.material.clone(),
                    transform: Transform::from_xyz(origin.x, 0.0, origin.y),
                    ..default()
                },
                TerrainChunk { key, resolution: grid.resolution },
                Name::new(format!("terrain chunk {key} @{}", grid.resolution)),
            ))
            .id();
        Ok(ChunkRenderable { entity, mesh })
    }

    fn release(&mut self, renderable: ChunkRenderable) {
        if let Some(entity) = self.commands.get_entity(renderable.entity) {
            entity.despawn_recursive();
        }
        self.meshes.remove(&renderable.mesh);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: ChunkKey = ChunkKey::new(1, 1);

    #[test]
    fn flat_grid_has_upward_normals_and_full_extent() {
        let grid = HeightGrid::new(5, vec![10.0; 25]);
        let data = build_terrain_mesh_data(KEY, &grid, 100.0).expect("mesh");
        assert_eq!(data.positions.len(), 25);
        assert_eq!(data.triangle_count(), 32);
        assert_eq!(data.positions[24], [100.0, 10.0, 100.0]);
        assert!(data.normals.iter().all(|n| (n[1] - 1.0).abs() < 1e-6));
    }

    #[test]
    fn slope_tilts_normals_away_from_the_rise() {
        // Heights grow along +X.
        let heights = (0..9).map(|i| (i % 3) as f32 * 10.0).collect();
        let data = build_terrain_mesh_data(KEY, &HeightGrid::new(3, heights), 20.0).expect("mesh");
        assert!(data.normals.iter().all(|n| n[0] < 0.0 && n[1] > 0.0));
    }

    #[test]
    fn triangles_face_up() {
        let grid = HeightGrid::new(2, vec![0.0; 4]);
        let data = build_terrain_mesh_data(KEY, &grid, 1.0).expect("mesh");
        for tri in data.indices.chunks(3) {
            let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| Vec3::from(data.positions[i as usize]));
            assert!((b - a).cross(c - a).y > 0.0);
        }
    }

    #[test]
    fn degenerate_grids_are_rejected() {
        assert_eq!(
            build_terrain_mesh_data(KEY, &HeightGrid::new(1, vec![0.0]), 1.0).unwrap_err(),
            BuildError::TooCoarse { key: KEY, resolution: 1 }
        );
        assert!(matches!(
            build_terrain_mesh_data(KEY, &HeightGrid::new(3, vec![0.0; 8]), 1.0),
            Err(BuildError::SampleCount { expected: 9, actual: 8, .. })
        ));
        let mut heights = vec![0.0; 4];
        heights[2] = f32::NAN;
        assert!(matches!(
            build_terrain_mesh_data(KEY, &HeightGrid::new(2, heights), 1.0),
            Err(BuildError::NonFinite { .. })
        ));
    }
}
