//! Pinhole camera.

pub use super::*;

/// The bound factor of the normalized coordinates used by the Jacobian.
pub const VIEW_BOUND_FACTOR: f32 = 1.3;

/// A pinhole camera with perspective projection.
#[derive(Clone, Debug, PartialEq)]
pub struct PerspectiveCamera {
    /// `F_x`
    pub focal_length_x: f32,
    /// `F_y`
    pub focal_length_y: f32,
    /// `I_x`
    pub image_size_x: f32,
    /// `I_y`
    pub image_size_y: f32,
    /// World space to clip space.
    pub projection_transform: Matrix4<f32>,
    /// `tan(Fov_x / 2) * 1.3`
    pub view_bound_x: f32,
    /// `tan(Fov_y / 2) * 1.3`
    pub view_bound_y: f32,
    /// `tan(Fov_x / 2)`
    pub view_half_tan_x: f32,
    /// `tan(Fov_y / 2)`
    pub view_half_tan_y: f32,
    pub view_position: Vector3<f32>,
    pub view_rotation: Matrix3<f32>,
    pub view_translation: Vector3<f32>,
}

impl PerspectiveCamera {
    /// Returning the homogeneous coordinates in clip space.
    #[inline]
    fn to_clip(
        &self,
        position: &Vector3<f32>,
    ) -> nalgebra::Vector4<f32> {
        self.projection_transform * position.push(1.0)
    }
}

impl Camera for PerspectiveCamera {
    fn from_view(view: &View) -> Self {
        let (view_rotation, view_translation) =
            view_rotation_translation(&view.view_transform);
        let view_half_tan_x = view.field_of_view_x_half_tan() as f32;
        let view_half_tan_y = view.field_of_view_y_half_tan() as f32;

        Self {
            focal_length_x: view.focal_length_x() as f32,
            focal_length_y: view.focal_length_y() as f32,
            image_size_x: view.image_width as f32,
            image_size_y: view.image_height as f32,
            projection_transform: matrix_4(&view.projection_transform()),
            view_bound_x: view_half_tan_x * VIEW_BOUND_FACTOR,
            view_bound_y: view_half_tan_y * VIEW_BOUND_FACTOR,
            view_half_tan_x,
            view_half_tan_y,
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
        position_view.z > DEPTH_MIN
    }

    #[inline]
    fn depth(
        &self,
        position_view: &Vector3<f32>,
    ) -> f32 {
        position_view.z
    }

    fn project(
        &self,
        position: &Vector3<f32>,
        _position_view: &Vector3<f32>,
    ) -> Vector2<f32> {
        let position_clip = self.to_clip(position);
        let w_inv = 1.0 / (position_clip.w + 1e-7);
        // NDC to pixel
        Vector2::new(
            ((position_clip.x * w_inv + 1.0) * self.image_size_x - 1.0) * 0.5,
            ((position_clip.y * w_inv + 1.0) * self.image_size_y - 1.0) * 0.5,
        )
    }

    fn project_backward(
        &self,
        position: &Vector3<f32>,
        _position_view: &Vector3<f32>,
        position_2d_grad: &Vector2<f32>,
    ) -> Vector3<f32> {
        let m = &self.projection_transform;
        let position_clip = self.to_clip(position);
        let w_inv = 1.0 / (position_clip.w + 1e-7);
        let w_inv_2 = w_inv * w_inv;

        Vector3::from_fn(|col, _| {
            (0..2)
                .map(|row| {
                    (m[(row, col)] * w_inv - m[(3, col)] * position_clip[row] * w_inv_2)
                        * position_2d_grad[row]
                })
                .sum()
        })
    }

    #[inline]
    fn pixel_per_normalized(&self) -> Vector2<f32> {
        Vector2::new(self.image_size_x * 0.5, self.image_size_y * 0.5)
    }

    fn covariance_jacobian(
        &self,
        position_view: &Vector3<f32>,
    ) -> Matrix2x3<f32> {
        let z = position_view.z;
        let x = (position_view.x / z).clamp(-self.view_bound_x, self.view_bound_x) * z;
        let y = (position_view.y / z).clamp(-self.view_bound_y, self.view_bound_y) * z;
        let (f_x, f_y) = (self.focal_length_x, self.focal_length_y);

        Matrix2x3::new(
            f_x / z,
            0.0,
            -f_x * x / (z * z),
            0.0,
            f_y / z,
            -f_y * y / (z * z),
        )
    }

    fn covariance_jacobian_backward(
        &self,
        position_view: &Vector3<f32>,
        jacobian_grad: &Matrix2x3<f32>,
    ) -> Vector3<f32> {
        let z = position_view.z;
        let x_z = position_view.x / z;
        let y_z = position_view.y / z;
        let x = x_z.clamp(-self.view_bound_x, self.view_bound_x) * z;
        let y = y_z.clamp(-self.view_bound_y, self.view_bound_y) * z;
        let (f_x, f_y) = (self.focal_length_x, self.focal_length_y);
        let z_inv = 1.0 / z;
        let z_inv_2 = z_inv * z_inv;
        let z_inv_3 = z_inv_2 * z_inv;

        // The clamped axis has no gradient.
        let x_grad_factor = (x_z.abs() <= self.view_bound_x) as u32 as f32;
        let y_grad_factor = (y_z.abs() <= self.view_bound_y) as u32 as f32;

        let g = jacobian_grad;
        Vector3::new(
            x_grad_factor * -f_x * z_inv_2 * g[(0, 2)],
            y_grad_factor * -f_y * z_inv_2 * g[(1, 2)],
            -f_x * z_inv_2 * g[(0, 0)] - f_y * z_inv_2 * g[(1, 1)]
                + 2.0 * f_x * x * z_inv_3 * g[(0, 2)]
                + 2.0 * f_y * y * z_inv_3 * g[(1, 2)],
        )
    }

    fn pixel_to_ray(
        &self,
        pixel: &Vector2<f32>,
    ) -> Vector3<f32> {
        let ndc_x = (2.0 * pixel.x + 1.0) / self.image_size_x - 1.0;
        let ndc_y = (2.0 * pixel.y + 1.0) / self.image_size_y - 1.0;
        Vector3::new(ndc_x * self.view_half_tan_x, ndc_y * self.view_half_tan_y, 1.0)
            .normalize()
    }
}
