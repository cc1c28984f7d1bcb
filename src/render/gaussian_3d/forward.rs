pub use super::*;

/// The splats to render.
///
/// All the buffers are row-major and borrowed for the call.
#[derive(Clone, Copy, Debug, Default)]
pub struct RenderInput<'a> {
    /// `[C]`
    pub background: &'a [f32],
    /// `[P, C]`
    ///
    /// They take precedence over [`RenderInput::colors_sh`].
    pub colors_rgb_precomputed: Option<&'a [f32]>,
    /// `[P, M, 3]`
    pub colors_sh: Option<&'a [f32]>,
    /// `M`, `(1 ~ 16)`
    pub colors_sh_count: usize,
    /// `[P, 6] <- [P, xx xy xz yy yz zz]`
    ///
    /// They take precedence over [`RenderInput::rotations`]
    /// and [`RenderInput::scalings`].
    pub covariances_3d_precomputed: Option<&'a [f32]>,
    /// `[P]`
    pub opacities: &'a [f32],
    /// `P`
    pub point_count: usize,
    /// `[P, 3]`
    pub positions: &'a [f32],
    /// `[P, 4] <- [P, x y z w]`
    ///
    /// They are normalized before use.
    pub rotations: &'a [f32],
    /// `S_m`
    pub scaling_modifier: f32,
    /// `[P, 3]`
    pub scalings: &'a [f32],
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RenderOutput {
    /// `[I_y, I_x, C]`
    pub colors_rgb_2d: Vec<f32>,
    /// `[I_y, I_x]`
    ///
    /// It is rendered if [`Gaussian3dRenderOptions::is_depth_rendered`] is set.
    pub depths_2d: Option<Vec<f32>>,
    /// `[P]`
    ///
    /// The invisible points have zero radius.
    pub radii: Vec<u32>,
    /// `T`
    pub tile_point_count: usize,
}
