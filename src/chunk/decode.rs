//! Wire payload to height grid.
//!
//! Chunk payloads are square PNG tiles in the "terrain-RGB" layout: each
//! pixel packs a height as `-10000 + (R * 65536 + G * 256 + B) * 0.1`
//! meters, giving 0.1 m steps over roughly -10 km to +1667 km. The pixel
//! edge length is the chunk resolution.

use super::{ChunkKey, HeightGrid};
use image::{ImageFormat, RgbImage};
use std::io::Cursor;
use thiserror::Error;

const HEIGHT_OFFSET: f64 = -10_000.0;
const HEIGHT_STEP: f64 = 0.1;
const MAX_CODE: f64 = 16_777_215.0;

/// Permanent decode failure. The scheduler blacklists the chunk.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("chunk {key}: payload is not a readable image: {source}")]
    Image {
        key: ChunkKey,
        #[source]
        source: image::ImageError,
    },
    #[error("chunk {key}: tile is {width}x{height}, expected a square")]
    NotSquare { key: ChunkKey, width: u32, height: u32 },
    #[error("chunk {key}: payload is empty")]
    Empty { key: ChunkKey },
    #[error("chunk {key}: resolution {resolution} is not accepted")]
    UnexpectedResolution { key: ChunkKey, resolution: u32 },
}

/// Turns a fetched payload into heights. Must be pure: the same bytes always
/// give the same grid or the same error.
pub trait ChunkDecoder {
    /// # Errors
    /// Any [`DecodeError`] is treated as permanent for `key`.
    fn decode(&self, bytes: &[u8], key: ChunkKey) -> Result<HeightGrid, DecodeError>;
}

/// Decoder for terrain-RGB PNG tiles.
#[derive(Debug, Clone, Default)]
pub struct TerrainRgbDecoder {
    accepted: Option<Vec<u32>>,
}

impl TerrainRgbDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Only accept tiles whose edge length is one of `resolutions`.
    #[must_use]
    pub fn accepting(resolutions: impl IntoIterator<Item = u32>) -> Self {
        Self { accepted: Some(resolutions.into_iter().collect()) }
    }
}

impl ChunkDecoder for TerrainRgbDecoder {
    fn decode(&self, bytes: &[u8], key: ChunkKey) -> Result<HeightGrid, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty { key });
        }
        let image = image::load_from_memory_with_format(bytes, ImageFormat::Png)
            .map_err(|source| DecodeError::Image { key, source })?
            .to_rgb8();
        let (width, height) = image.dimensions();
        if width != height {
            return Err(DecodeError::NotSquare { key, width, height });
        }
        if width == 0 {
            return Err(DecodeError::Empty { key });
        }
        if let Some(accepted) = &self.accepted
            && !accepted.contains(&width)
        {
            return Err(DecodeError::UnexpectedResolution { key, resolution: width });
        }

        let heights = image.pixels().map(|p| unpack_height(p.0)).collect();
        Ok(HeightGrid::new(width, heights))
    }
}

#[allow(clippy::cast_possible_truncation)]
fn unpack_height([r, g, b]: [u8; 3]) -> f32 {
    let code = u32::from(r) << 16 | u32::from(g) << 8 | u32::from(b);
    (HEIGHT_OFFSET + f64::from(code) * HEIGHT_STEP) as f32
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn pack_height(height: f32) -> [u8; 3] {
    let code = ((f64::from(height) - HEIGHT_OFFSET) / HEIGHT_STEP).round().clamp(0.0, MAX_CODE) as u32;
    [(code >> 16) as u8, (code >> 8) as u8, code as u8]
}

/// Encode `heights` (row-major along Z, `resolution` per edge) as a
/// terrain-RGB PNG. Heights are clamped to the representable range.
///
/// # Errors
/// Fails if `heights` does not hold `resolution * resolution` samples or the
/// PNG encoder rejects the image.
pub fn encode_terrain_rgb(resolution: u32, heights: &[f32]) -> Result<Vec<u8>, image::ImageError> {
    let raw: Vec<u8> = heights.iter().flat_map(|&h| pack_height(h)).collect();
    let image = RgbImage::from_raw(resolution, resolution, raw).ok_or_else(|| {
        image::ImageError::Parameter(image::error::ParameterError::from_kind(
            image::error::ParameterErrorKind::DimensionMismatch,
        ))
    })?;
    let mut out = Vec::new();
    image.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)?;
    Ok(out)
}
