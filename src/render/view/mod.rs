/// The distance to the near clipping plane.
pub const Z_NEAR: f64 = 0.01;
/// The distance to the far clipping plane.
pub const Z_FAR: f64 = 100.0;

/// A view in 3D space.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct View {
    /// The horizontal field of view in radians.
    ///
    /// It is ignored by the spherical camera, which always covers `2π`.
    pub field_of_view_x: f64,
    /// The vertical field of view in radians.
    ///
    /// It is ignored by the spherical camera, which always covers `π`.
    pub field_of_view_y: f64,
    /// Image height.
    pub image_height: u32,
    /// Image width.
    pub image_width: u32,
    /// Position in world space.
    pub view_position: [f64; 3],
    /// Affine transformation from world space to view space.
    ///
    /// It is in **column-major order**, i.e., `M[col][row]`.
    ///
    /// # Format
    ///
    /// ```plaintext
    /// [R_v   | T_v]
    /// [...   | ...]
    /// [0 0 0 | 1  ]
    /// ```
    pub view_transform: [[f64; 4]; 4],
}

/// Linear transformations.
impl View {
    /// Returns the affine transformation matrix.
    ///
    /// It is in **column-major order**, i.e., `M[col][row]`.
    #[inline]
    pub const fn transform(
        rotation: &[[f64; 3]; 3],
        translation: &[f64; 3],
    ) -> [[f64; 4]; 4] {
        let r = rotation;
        let t = [translation];
        [
            [r[0][0], r[0][1], r[0][2], 0.0],
            [r[1][0], r[1][1], r[1][2], 0.0],
            [r[2][0], r[2][1], r[2][2], 0.0],
            [t[0][0], t[0][1], t[0][2], 1.0],
        ]
    }

    /// Returns the perspective projection from world space to clip space.
    ///
    /// It is in **column-major order**, i.e., `M[col][row]`,
    /// and is the product of the frustum matrix and [`View::view_transform`].
    ///
    /// The clip-space `w` equals the depth in view space.
    pub fn projection_transform(&self) -> [[f64; 4]; 4] {
        let tan_x = self.field_of_view_x_half_tan();
        let tan_y = self.field_of_view_y_half_tan();

        // Row-major frustum matrix
        let mut frustum = [[0.0; 4]; 4];
        frustum[0][0] = 1.0 / tan_x;
        frustum[1][1] = 1.0 / tan_y;
        frustum[2][2] = Z_FAR / (Z_FAR - Z_NEAR);
        frustum[2][3] = -(Z_FAR * Z_NEAR) / (Z_FAR - Z_NEAR);
        frustum[3][2] = 1.0;

        let view = &self.view_transform;
        let mut output = [[0.0; 4]; 4];
        for (col, output) in output.iter_mut().enumerate() {
            for (row, output) in output.iter_mut().enumerate() {
                *output = (0..4).map(|k| frustum[row][k] * view[col][k]).sum();
            }
        }
        output
    }
}

/// Dimension operations
impl View {
    /// `tan(Fov_x / 2)`
    #[inline]
    pub fn field_of_view_x_half_tan(&self) -> f64 {
        (self.field_of_view_x / 2.0).tan()
    }

    /// `tan(Fov_y / 2)`
    #[inline]
    pub fn field_of_view_y_half_tan(&self) -> f64 {
        (self.field_of_view_y / 2.0).tan()
    }

    /// `F_x <- I_x / tan(Fov_x / 2) / 2`
    #[inline]
    pub fn focal_length_x(&self) -> f64 {
        self.image_width as f64 / self.field_of_view_x_half_tan() / 2.0
    }

    /// `F_y <- I_y / tan(Fov_y / 2) / 2`
    #[inline]
    pub fn focal_length_y(&self) -> f64 {
        self.image_height as f64 / self.field_of_view_y_half_tan() / 2.0
    }

    /// `I_y * I_x`
    #[inline]
    pub const fn pixel_count(&self) -> usize {
        self.image_width as usize * self.image_height as usize
    }
}
