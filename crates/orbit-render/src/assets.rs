// SPDX-License-Identifier: CEPL-1.0
//! CPU-side scene data handed to a backend for upload.
use bytemuck::{Pod, Zeroable};

use crate::error::{RenderError, RenderResult};

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 3],
    pub color: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    pub const fn new(pos: [f32; 3], color: [f32; 3], uv: [f32; 2]) -> Self {
        Self { pos, color, uv }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl Mesh {
    /// Two textured quads, one half a unit below the other, so depth testing
    /// is visible from the orbiting camera.
    pub fn stacked_quads() -> Self {
        const CORNERS: [([f32; 2], [f32; 3], [f32; 2]); 4] = [
            ([-0.5, -0.5], [1.0, 0.0, 0.0], [1.0, 0.0]),
            ([0.5, -0.5], [0.0, 1.0, 0.0], [0.0, 0.0]),
            ([0.5, 0.5], [0.0, 0.0, 1.0], [0.0, 1.0]),
            ([-0.5, 0.5], [1.0, 1.0, 1.0], [1.0, 1.0]),
        ];

        let mut vertices = Vec::with_capacity(8);
        let mut indices = Vec::with_capacity(12);
        for z in [0.0, -0.5] {
            let base = vertices.len() as u32;
            vertices.extend(
                CORNERS
                    .iter()
                    .map(|(xy, color, uv)| Vertex::new([xy[0], xy[1], z], *color, *uv)),
            );
            indices.extend([0, 1, 2, 2, 3, 0].map(|i| base + i));
        }
        Self { vertices, indices }
    }

    /// Every index must name an existing vertex.
    pub fn validate(&self) -> RenderResult<()> {
        if self.vertices.is_empty() || self.indices.is_empty() {
            return Err(RenderError::InvalidUsage("mesh has no geometry".into()));
        }
        match self
            .indices
            .iter()
            .find(|&&i| i as usize >= self.vertices.len())
        {
            Some(i) => Err(RenderError::InvalidUsage(format!(
                "index {i} out of range for {} vertices",
                self.vertices.len()
            ))),
            None => Ok(()),
        }
    }
}

/// Decoded RGBA8 pixels, row-major, no padding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32, rgba: Vec<u8>) -> RenderResult<Self> {
        let expected = width as usize * height as usize * 4;
        if width == 0 || height == 0 || rgba.len() != expected {
            return Err(RenderError::InvalidUsage(format!(
                "{}x{} image needs {expected} bytes, got {}",
                width,
                height,
                rgba.len()
            )));
        }
        Ok(Self {
            width,
            height,
            rgba,
        })
    }

    /// Two-colour checkerboard with `cell`-pixel squares.
    pub fn checkerboard(width: u32, height: u32, cell: u32, a: [u8; 4], b: [u8; 4]) -> Self {
        let cell = cell.max(1);
        let mut rgba = Vec::with_capacity(width as usize * height as usize * 4);
        for y in 0..height {
            for x in 0..width {
                let odd = ((x / cell) + (y / cell)) % 2 == 1;
                rgba.extend_from_slice(if odd { &b } else { &a });
            }
        }
        Self {
            width,
            height,
            rgba,
        }
    }

    pub fn byte_len(&self) -> u64 {
        self.rgba.len() as u64
    }

    pub fn mip_levels(&self) -> u32 {
        mip_levels(self.width, self.height)
    }
}

/// Levels in a full chain down to 1x1: `floor(log2(max(w, h))) + 1`.
pub fn mip_levels(width: u32, height: u32) -> u32 {
    let largest = width.max(height).max(1);
    u32::BITS - largest.leading_zeros()
}
