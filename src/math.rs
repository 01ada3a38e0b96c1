//! Affine and projective matrix math for the cube transform.
//!
//! This module provides the two value types the frame loop needs:
//!
//! - [`Vector3`]: a plain three-component vector used for translations and rotation axes
//! - [`AffineMat4`]: a 4×4 homogeneous matrix built from translation, axis-angle rotation
//!   and perspective projection
//!
//! Everything here is a pure calculation on top of [`glam`]; nothing talks to the GPU and
//! nothing can fail. Inputs that make no geometric sense (a zero-length axis, `near >= far`)
//! are the caller's responsibility and are not validated.
//!
//! # Matrix Layout
//!
//! Matrices are stored column-major, the layout WGSL `mat4x4<f32>` uniforms expect.
//! [`AffineMat4::to_array`] exports element `[c * 4 + r]` as row `r`, column `c`:
//!
//! | Index  | Contents                      |
//! |--------|-------------------------------|
//! | 0..4   | column 0 (x axis)             |
//! | 4..8   | column 1 (y axis)             |
//! | 8..12  | column 2 (z axis)             |
//! | 12..16 | column 3 (translation / w)    |
//!
//! # Example
//!
//! ```
//! use spincube::{AffineMat4, Vector3};
//!
//! let mut model_view = AffineMat4::new();
//! model_view.translate(Vector3::new(0.0, 0.0, -3.0));
//! model_view.rotation(0.5, Vector3::new(0.0, 1.0, 1.0).normalize());
//!
//! let mut projection = AffineMat4::new();
//! projection.perspective(45f32.to_radians(), 16.0 / 9.0, 0.1, 100.0);
//!
//! assert_eq!(model_view.to_array().len(), 16);
//! ```

use glam::{Mat3, Mat4, Vec3, Vec4};

/// A three-component vector with value semantics.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Euclidean norm.
    pub fn length(self) -> f32 {
        Vec3::from(self).length()
    }

    /// Returns this vector divided by its length.
    ///
    /// A zero vector has no direction; normalizing one yields NaN components.
    pub fn normalize(self) -> Self {
        let len = self.length();
        Self::new(self.x / len, self.y / len, self.z / len)
    }
}

impl From<Vector3> for Vec3 {
    fn from(v: Vector3) -> Self {
        Vec3::new(v.x, v.y, v.z)
    }
}

/// A 4×4 homogeneous transformation matrix.
///
/// The matrix starts out as the identity and is only ever changed through
/// [`translate`](Self::translate), [`rotation`](Self::rotation) and
/// [`perspective`](Self::perspective), so it always holds a complete transform.
///
/// # Composition Rules
///
/// - `translate` left-multiplies a translation, so it accumulates.
/// - `rotation` rebuilds the 3×3 linear block from scratch and leaves the
///   translation column alone. Calling it every frame with an absolute angle
///   gives the absolute orientation, never an accumulated one.
/// - `perspective` overwrites everything.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AffineMat4 {
    matrix: Mat4,
}

impl Default for AffineMat4 {
    fn default() -> Self {
        Self {
            matrix: Mat4::IDENTITY,
        }
    }
}

impl AffineMat4 {
    /// Creates an identity matrix.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a matrix from 16 column-major values, the inverse of [`to_array`](Self::to_array).
    pub fn from_array(values: [f32; 16]) -> Self {
        Self {
            matrix: Mat4::from_cols_array(&values),
        }
    }

    /// Left-multiplies a pure translation by `offset`.
    pub fn translate(&mut self, offset: Vector3) {
        self.matrix = Mat4::from_translation(offset.into()) * self.matrix;
    }

    /// Sets the rotation block to a counter-clockwise rotation of `angle` radians
    /// about `axis`, keeping the current translation.
    ///
    /// `axis` must already be unit length.
    pub fn rotation(&mut self, angle: f32, axis: Vector3) {
        let rot = rodrigues(angle, axis.into());
        self.matrix = Mat4::from_cols(
            rot.x_axis.extend(0.0),
            rot.y_axis.extend(0.0),
            rot.z_axis.extend(0.0),
            self.matrix.w_axis,
        );
    }

    /// Overwrites this matrix with a right-handed perspective projection.
    ///
    /// View-space `z = -near` lands on NDC depth −1 and `z = -far` on +1.
    /// Requires `0 < near < far` and `aspect > 0`; nothing is checked.
    pub fn perspective(&mut self, fov_y: f32, aspect: f32, near: f32, far: f32) {
        let f = 1.0 / (fov_y * 0.5).tan();
        let range_inv = 1.0 / (near - far);

        self.matrix = Mat4::from_cols(
            Vec4::new(f / aspect, 0.0, 0.0, 0.0),
            Vec4::new(0.0, f, 0.0, 0.0),
            Vec4::new(0.0, 0.0, (near + far) * range_inv, -1.0),
            Vec4::new(0.0, 0.0, 2.0 * near * far * range_inv, 0.0),
        );
    }

    /// Exports the 16 components in column-major order for uniform upload.
    pub fn to_array(&self) -> [f32; 16] {
        self.matrix.to_cols_array()
    }

    /// Multiplies a homogeneous point by this matrix.
    pub fn transform_point(&self, point: Vec4) -> Vec4 {
        self.matrix * point
    }

    /// The underlying glam matrix.
    pub fn matrix(&self) -> Mat4 {
        self.matrix
    }
}

/// Rodrigues' rotation formula: `R = cos θ·I + sin θ·[k]ₓ + (1 − cos θ)·k kᵀ`.
fn rodrigues(angle: f32, k: Vec3) -> Mat3 {
    let (s, c) = angle.sin_cos();
    let t = 1.0 - c;

    Mat3::from_cols(
        Vec3::new(t * k.x * k.x + c, t * k.x * k.y + s * k.z, t * k.x * k.z - s * k.y),
        Vec3::new(t * k.x * k.y - s * k.z, t * k.y * k.y + c, t * k.y * k.z + s * k.x),
        Vec3::new(t * k.x * k.z + s * k.y, t * k.y * k.z - s * k.x, t * k.z * k.z + c),
    )
}
