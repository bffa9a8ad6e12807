//! Math utilities and types
//!
//! Provides fundamental math types for 3D graphics.

pub use nalgebra::{Matrix3, Matrix4, Vector2, Vector3, Vector4};

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 3x3 matrix type
pub type Mat3 = Matrix3<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// Convert a 4x4 column-major matrix into the 3x4 row-major form used by
/// acceleration structure instance records.
///
/// Vulkan's `VkTransformMatrixKHR` stores three rows of four columns; the
/// bottom (0, 0, 0, 1) row is implicit.
pub fn to_transform_rows(m: &Mat4) -> [f32; 12] {
    [
        m[(0, 0)], m[(0, 1)], m[(0, 2)], m[(0, 3)],
        m[(1, 0)], m[(1, 1)], m[(1, 2)], m[(1, 3)],
        m[(2, 0)], m[(2, 1)], m[(2, 2)], m[(2, 3)],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_rotation_rows_preserve_values() {
        let m = nalgebra::Rotation3::from_euler_angles(0.1, 0.2, 0.3).to_homogeneous();
        let rows = to_transform_rows(&m);
        assert_relative_eq!(rows[0], m[(0, 0)]);
        assert_relative_eq!(rows[4], m[(1, 0)]);
        assert_relative_eq!(rows[9], m[(2, 1)]);
    }

    #[test]
    fn test_identity_transform_rows() {
        let rows = to_transform_rows(&Mat4::identity());
        assert_eq!(rows[0], 1.0);
        assert_eq!(rows[5], 1.0);
        assert_eq!(rows[10], 1.0);
        assert_eq!(rows[3], 0.0);
        assert_eq!(rows[7], 0.0);
        assert_eq!(rows[11], 0.0);
    }

    #[test]
    fn test_translation_lands_in_fourth_column() {
        let m = Mat4::new_translation(&Vec3::new(1.0, 2.0, 3.0));
        let rows = to_transform_rows(&m);
        assert_eq!(rows[3], 1.0);
        assert_eq!(rows[7], 2.0);
        assert_eq!(rows[11], 3.0);
    }
}
