//! Static cube geometry.
//!
//! The cube is described by three parallel arrays that are uploaded once into
//! separate GPU buffers:
//!
//! | Array       | Element       | Count | Buffer target  |
//! |-------------|---------------|-------|----------------|
//! | `positions` | `[f32; 3]`    | 24    | array          |
//! | `colors`    | `[f32; 4]`    | 24    | array          |
//! | `indices`   | `u16`         | 36    | element array  |
//!
//! Each face owns its four corners so every face can carry its own flat color.
//! The cube spans −1..1 on every axis; the vertex shader halves it.

use thiserror::Error;

/// Errors produced when narrowing index data to 16 bits.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GeometryError {
    #[error("index {value} at position {index} does not fit in an unsigned 16-bit index")]
    IndexOutOfRange { index: usize, value: u32 },
}

/// Per-face vertex positions, 4 corners × 6 faces.
#[rustfmt::skip]
const POSITIONS: [[f32; 3]; 24] = [
    // Back (Z-)
    [-1.0, -1.0, -1.0], [ 1.0, -1.0, -1.0], [ 1.0,  1.0, -1.0], [-1.0,  1.0, -1.0],
    // Front (Z+)
    [-1.0, -1.0,  1.0], [ 1.0, -1.0,  1.0], [ 1.0,  1.0,  1.0], [-1.0,  1.0,  1.0],
    // Bottom (Y-)
    [-1.0, -1.0, -1.0], [ 1.0, -1.0, -1.0], [ 1.0, -1.0,  1.0], [-1.0, -1.0,  1.0],
    // Top (Y+)
    [-1.0,  1.0, -1.0], [ 1.0,  1.0, -1.0], [ 1.0,  1.0,  1.0], [-1.0,  1.0,  1.0],
    // Left (X-)
    [-1.0, -1.0, -1.0], [-1.0,  1.0, -1.0], [-1.0,  1.0,  1.0], [-1.0, -1.0,  1.0],
    // Right (X+)
    [ 1.0, -1.0, -1.0], [ 1.0,  1.0, -1.0], [ 1.0,  1.0,  1.0], [ 1.0, -1.0,  1.0],
];

const FACE_COLORS: [[f32; 4]; 6] = [
    [1.0, 0.0, 0.0, 1.0], // red
    [0.0, 1.0, 0.0, 1.0], // green
    [0.0, 0.0, 1.0, 1.0], // blue
    [1.0, 1.0, 0.0, 1.0], // yellow
    [1.0, 0.0, 1.0, 1.0], // magenta
    [1.0, 1.0, 1.0, 1.0], // white
];

const COLORS: [[f32; 4]; 24] = expand_face_colors(FACE_COLORS);

#[rustfmt::skip]
const WIDE_INDICES: [u32; 36] = [
    0,  1,  2,   0,  2,  3,
    4,  5,  6,   4,  6,  7,
    8,  9,  10,  8,  10, 11,
    12, 13, 14,  12, 14, 15,
    16, 17, 18,  16, 18, 19,
    20, 21, 22,  20, 22, 23,
];

// Evaluated at compile time: an index above u16::MAX stops the build.
const INDICES: [u16; 36] = narrow_const(WIDE_INDICES);

const fn expand_face_colors(faces: [[f32; 4]; 6]) -> [[f32; 4]; 24] {
    let mut out = [[0.0; 4]; 24];
    let mut i = 0;
    while i < 24 {
        out[i] = faces[i / 4];
        i += 1;
    }
    out
}

const fn narrow_const<const N: usize>(wide: [u32; N]) -> [u16; N] {
    let mut out = [0u16; N];
    let mut i = 0;
    while i < N {
        assert!(wide[i] <= u16::MAX as u32, "cube index does not fit in u16");
        out[i] = wide[i] as u16;
        i += 1;
    }
    out
}

/// Narrows 32-bit indices to 16 bits, failing on the first value that would wrap.
pub fn narrow_indices(wide: &[u32]) -> Result<Vec<u16>, GeometryError> {
    wide.iter()
        .enumerate()
        .map(|(index, &value)| {
            u16::try_from(value).map_err(|_| GeometryError::IndexOutOfRange { index, value })
        })
        .collect()
}

/// The immutable cube description shared by every pipeline.
#[derive(Clone, Copy, Debug)]
pub struct CubeGeometry {
    pub positions: &'static [[f32; 3]],
    pub colors: &'static [[f32; 4]],
    pub indices: &'static [u16],
}

impl CubeGeometry {
    pub const VERTEX_COUNT: usize = 24;
    pub const INDEX_COUNT: usize = 36;

    /// The process-lifetime cube.
    pub fn cube() -> Self {
        Self {
            positions: &POSITIONS,
            colors: &COLORS,
            indices: &INDICES,
        }
    }

    pub fn position_bytes(&self) -> &'static [u8] {
        bytemuck::cast_slice(self.positions)
    }

    pub fn color_bytes(&self) -> &'static [u8] {
        bytemuck::cast_slice(self.colors)
    }

    pub fn index_bytes(&self) -> &'static [u8] {
        bytemuck::cast_slice(self.indices)
    }
}

impl Default for CubeGeometry {
    fn default() -> Self {
        Self::cube()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_has_expected_counts() {
        let cube = CubeGeometry::cube();
        assert_eq!(cube.positions.len(), CubeGeometry::VERTEX_COUNT);
        assert_eq!(cube.colors.len(), CubeGeometry::VERTEX_COUNT);
        assert_eq!(cube.indices.len(), CubeGeometry::INDEX_COUNT);
        assert_eq!(cube.position_bytes().len(), 24 * 3 * 4);
        assert_eq!(cube.color_bytes().len(), 24 * 4 * 4);
        assert_eq!(cube.index_bytes().len(), 36 * 2);
    }

    #[test]
    fn indices_stay_inside_vertex_range() {
        let cube = CubeGeometry::cube();
        assert!(cube.indices.iter().all(|&i| (i as usize) < CubeGeometry::VERTEX_COUNT));
        assert_eq!(narrow_indices(&WIDE_INDICES).unwrap(), cube.indices);
    }

    #[test]
    fn narrowing_rejects_values_above_u16() {
        let err = narrow_indices(&[0, 1, 65_535, 65_536, 2]).unwrap_err();
        assert_eq!(
            err,
            GeometryError::IndexOutOfRange {
                index: 3,
                value: 65_536
            }
        );
    }

    #[test]
    fn each_face_is_one_color_and_one_plane() {
        let cube = CubeGeometry::cube();
        for face in 0..6 {
            let corners = &cube.positions[face * 4..face * 4 + 4];
            let colors = &cube.colors[face * 4..face * 4 + 4];
            assert!(colors.iter().all(|c| *c == colors[0]));

            // All four corners share exactly one constant coordinate
            let shared = (0..3)
                .filter(|&axis| corners.iter().all(|p| p[axis] == corners[0][axis]))
                .count();
            assert_eq!(shared, 1, "face {face}");
        }
    }

    #[test]
    fn every_triangle_stays_on_one_face() {
        let cube = CubeGeometry::cube();
        for tri in cube.indices.chunks(3) {
            let face = tri[0] / 4;
            assert!(tri.iter().all(|&i| i / 4 == face));
        }
    }
}
