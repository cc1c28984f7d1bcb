//! Camera models.
//!
//! A camera model maps points in view space onto the image plane,
//! provides the local affine approximation used to splat the covariances,
//! and differentiates both.
//! The rendering kernels are generic over [`Camera`],
//! so each model is monomorphized into its own pipeline.

pub mod perspective;
pub mod spherical;

pub use super::view::View;
pub use nalgebra::{Matrix2x3, Matrix3, Matrix4, Vector2, Vector3};
pub use perspective::PerspectiveCamera;
pub use spherical::SphericalCamera;

use std::fmt;

/// The minimum distance from the camera of a visible point.
pub const DEPTH_MIN: f32 = 0.2;

/// A camera model.
///
/// ## Units
///
/// - `position_2d` is in pixels.
/// - The gradients of `position_2d` are in normalized units,
///   i.e., pixels divided by [`Camera::pixel_per_normalized`].
pub trait Camera: 'static + Send + Sync + Sized + fmt::Debug {
    /// Creating the camera from the view.
    fn from_view(view: &View) -> Self;

    /// The world-to-view rotation `R_v`.
    fn view_rotation(&self) -> &Matrix3<f32>;

    /// The world-to-view translation `T_v`.
    fn view_translation(&self) -> &Vector3<f32>;

    /// The camera position in world space.
    fn view_position(&self) -> &Vector3<f32>;

    /// `P_v <- R_v * P + T_v`
    #[inline]
    fn to_view(
        &self,
        position: &Vector3<f32>,
    ) -> Vector3<f32> {
        self.view_rotation() * position + self.view_translation()
    }

    /// Returning `true` if the point may be visible.
    fn is_in_frustum(
        &self,
        position_view: &Vector3<f32>,
    ) -> bool;

    /// The depth used to order the points.
    ///
    /// It is non-negative for the points in frustum.
    fn depth(
        &self,
        position_view: &Vector3<f32>,
    ) -> f32;

    /// Projecting the point onto the image plane in pixels.
    fn project(
        &self,
        position: &Vector3<f32>,
        position_view: &Vector3<f32>,
    ) -> Vector2<f32>;

    /// The gradient of [`Camera::project`] in world space.
    fn project_backward(
        &self,
        position: &Vector3<f32>,
        position_view: &Vector3<f32>,
        position_2d_grad: &Vector2<f32>,
    ) -> Vector3<f32>;

    /// The pixels per normalized unit along each axis.
    fn pixel_per_normalized(&self) -> Vector2<f32>;

    /// The Jacobian of the projection at the point in view space.
    fn covariance_jacobian(
        &self,
        position_view: &Vector3<f32>,
    ) -> Matrix2x3<f32>;

    /// The gradient of [`Camera::covariance_jacobian`] in view space.
    fn covariance_jacobian_backward(
        &self,
        position_view: &Vector3<f32>,
        jacobian_grad: &Matrix2x3<f32>,
    ) -> Vector3<f32>;

    /// The unit direction in view space through the pixel center.
    fn pixel_to_ray(
        &self,
        pixel: &Vector2<f32>,
    ) -> Vector3<f32>;

    /// The ratio of the rendered depth to the distance along the pixel ray.
    #[inline]
    fn depth_per_distance(
        &self,
        pixel: &Vector2<f32>,
    ) -> f32 {
        self.pixel_to_ray(pixel).z
    }
}

/// Converting a column-major matrix into a rotation and a translation.
pub(crate) fn view_rotation_translation(
    transform: &[[f64; 4]; 4]
) -> (Matrix3<f32>, Vector3<f32>) {
    let rotation = Matrix3::from_fn(|row, col| transform[col][row] as f32);
    let translation = Vector3::from_fn(|row, _| transform[3][row] as f32);
    (rotation, translation)
}

/// Converting a column-major matrix.
pub(crate) fn matrix_4(transform: &[[f64; 4]; 4]) -> Matrix4<f32> {
    Matrix4::from_fn(|row, col| transform[col][row] as f32)
}
