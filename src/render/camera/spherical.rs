//! Equirectangular camera.

pub use super::*;

use std::f32::consts::{PI, TAU};

/// The minimum ratio of the horizontal distance to the distance.
///
/// The points closer to the poles are culled.
pub const POLE_RATIO_MIN: f32 = 1e-3;

/// A full spherical camera with equirectangular projection.
///
/// `θ = atan2(x, z)` spans the image width and `φ = atan2(y, ρ)` spans the height,
/// where `ρ = sqrt(x² + z²)`.
/// The view's field of view is ignored.
#[derive(Clone, Debug, PartialEq)]
pub struct SphericalCamera {
    /// `I_x`
    pub image_size_x: f32,
    /// `I_y`
    pub image_size_y: f32,
    pub view_position: Vector3<f32>,
    pub view_rotation: Matrix3<f32>,
    pub view_translation: Vector3<f32>,
}

impl SphericalCamera {
    /// `[I_x / 2π, I_y / π]`
    #[inline]
    fn scale(&self) -> (f32, f32) {
        (self.image_size_x / TAU, self.image_size_y / PI)
    }

    /// `[∂θ/∂P_v, ∂φ/∂P_v]`
    fn angles_grad(position_view: &Vector3<f32>) -> Matrix2x3<f32> {
        let (x, y, z) = (position_view.x, position_view.y, position_view.z);
        let q = x * x + z * z;
        let rho = q.sqrt();
        let s = q + y * y;
        let g = 1.0 / (rho * s);

        Matrix2x3::new(z / q, 0.0, -x / q, -x * y * g, rho / s, -y * z * g)
    }
}

impl Camera for SphericalCamera {
    fn from_view(view: &View) -> Self {
        let (view_rotation, view_translation) =
            view_rotation_translation(&view.view_transform);

        Self {
            image_size_x: view.image_width as f32,
            image_size_y: view.image_height as f32,
            view_position: Vector3::from_fn(|row, _| view.view_position[row] as f32),
            view_rotation,
            view_translation,
        }
    }

    #[inline]
    fn view_rotation(&self) -> &Matrix3<f32> {
        &self.view_rotation
    }

    #[inline]
    fn view_translation(&self) -> &Vector3<f32> {
        &self.view_translation
    }

    #[inline]
    fn view_position(&self) -> &Vector3<f32> {
        &self.view_position
    }

    #[inline]
    fn is_in_frustum(
        &self,
        position_view: &Vector3<f32>,
    ) -> bool {
        let distance = position_view.norm();
        let rho = position_view.x.hypot(position_view.z);
        distance > DEPTH_MIN && rho > POLE_RATIO_MIN * distance
    }

    #[inline]
    fn depth(
        &self,
        position_view: &Vector3<f32>,
    ) -> f32 {
        position_view.norm()
    }

    fn project(
        &self,
        _position: &Vector3<f32>,
        position_view: &Vector3<f32>,
    ) -> Vector2<f32> {
        let (x, y, z) = (position_view.x, position_view.y, position_view.z);
        let theta = x.atan2(z);
        let phi = y.atan2(x.hypot(z));
        Vector2::new(
            (theta / TAU + 0.5) * self.image_size_x - 0.5,
            (phi / PI + 0.5) * self.image_size_y - 0.5,
        )
    }

    fn project_backward(
        &self,
        _position: &Vector3<f32>,
        position_view: &Vector3<f32>,
        position_2d_grad: &Vector2<f32>,
    ) -> Vector3<f32> {
        let position_view_grad =
            Self::angles_grad(position_view).transpose() * position_2d_grad;
        self.view_rotation.transpose() * position_view_grad
    }

    #[inline]
    fn pixel_per_normalized(&self) -> Vector2<f32> {
        let (a, b) = self.scale();
        Vector2::new(a, b)
    }

    fn covariance_jacobian(
        &self,
        position_view: &Vector3<f32>,
    ) -> Matrix2x3<f32> {
        let (a, b) = self.scale();
        let mut jacobian = Self::angles_grad(position_view);
        jacobian.row_mut(0).scale_mut(a);
        jacobian.row_mut(1).scale_mut(b);
        jacobian
    }

    fn covariance_jacobian_backward(
        &self,
        position_view: &Vector3<f32>,
        jacobian_grad: &Matrix2x3<f32>,
    ) -> Vector3<f32> {
        let (a, b) = self.scale();
        let (x, y, z) = (position_view.x, position_view.y, position_view.z);
        let q = x * x + z * z;
        let q_2 = q * q;
        let rho = q.sqrt();
        let s = q + y * y;
        let s_2 = s * s;
        let g = 1.0 / (rho * s);
        // ∂g/∂P_v
        let g_x = -x / (rho * q * s) - 2.0 * x / (rho * s_2);
        let g_y = -2.0 * y / (rho * s_2);
        let g_z = -z / (rho * q * s) - 2.0 * z / (rho * s_2);
        // ∂(ρ/s)/∂x = x h
        let h = 1.0 / (rho * s) - 2.0 * rho / s_2;

        let j_00 = Vector3::new(-2.0 * x * z / q_2, 0.0, (x * x - z * z) / q_2) * a;
        let j_02 = Vector3::new((x * x - z * z) / q_2, 0.0, 2.0 * x * z / q_2) * a;
        let j_10 = -Vector3::new(y * g + x * y * g_x, x * g + x * y * g_y, x * y * g_z) * b;
        let j_11 = Vector3::new(x * h, -2.0 * rho * y / s_2, z * h) * b;
        let j_12 = -Vector3::new(y * z * g_x, z * g + y * z * g_y, y * g + y * z * g_z) * b;

        let gr = jacobian_grad;
        j_00 * gr[(0, 0)] + j_02 * gr[(0, 2)] + j_10 * gr[(1, 0)]
            + j_11 * gr[(1, 1)]
            + j_12 * gr[(1, 2)]
    }

    fn pixel_to_ray(
        &self,
        pixel: &Vector2<f32>,
    ) -> Vector3<f32> {
        let theta = ((pixel.x + 0.5) / self.image_size_x - 0.5) * TAU;
        let phi = ((pixel.y + 0.5) / self.image_size_y - 0.5) * PI;
        let (sin_theta, cos_theta) = theta.sin_cos();
        let (sin_phi, cos_phi) = phi.sin_cos();
        Vector3::new(cos_phi * sin_theta, sin_phi, cos_phi * cos_theta)
    }

    /// The rendered depth is the distance.
    #[inline]
    fn depth_per_distance(
        &self,
        _pixel: &Vector2<f32>,
    ) -> f32 {
        1.0
    }
}
