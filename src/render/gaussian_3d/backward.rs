pub use super::*;

/// The gradients of the loss with respect to the splats.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RenderOutput {
    /// `[P, C]`
    pub colors_rgb_3d_grad: Vec<f32>,
    /// `[P, M, 3]`
    ///
    /// It is empty if the colors are precomputed.
    pub colors_sh_grad: Vec<f32>,
    /// `[P, 3]`
    pub conics_grad: Vec<f32>,
    /// `[P, 6]`
    ///
    /// The off-diagonal entries are summed over both halves.
    pub covariances_3d_grad: Vec<f32>,
    /// `[P]`
    pub opacities_grad: Vec<f32>,
    /// `[P, 2]` in normalized units
    pub positions_2d_grad: Vec<f32>,
    /// `[P]`
    pub positions_2d_grad_norm: Vec<f32>,
    /// `[P, 3]`
    pub positions_3d_grad: Vec<f32>,
    /// `[P, 4]`
    pub rotations_grad: Vec<f32>,
    /// `[P, 3]`
    pub scalings_grad: Vec<f32>,
}
