//! Transforming the gradients back to the points.

pub use super::*;

use super::transform::{colors_sh_degree, rotation_matrix, unpack_symmetric, FILTER_LOW_PASS};
use nalgebra::{Matrix2, Vector4};

/// Arguments.
#[derive(Clone, Copy, Debug)]
pub struct Arguments {
    /// `C`
    pub channel_count: usize,
    /// `M`
    pub colors_sh_count: usize,
    /// `(0 ~ 3)`
    pub colors_sh_degree_max: u32,
    /// `F`
    pub feature_count: usize,
    pub is_depth_rendered: bool,
    /// `S_m`
    pub scaling_modifier: f32,
}

/// Inputs.
#[derive(Clone, Debug)]
pub struct Inputs<'a, C: Camera> {
    pub camera: &'a C,
    /// `[P, M, 3]`, used only if the colors are not precomputed.
    pub colors_sh: Option<&'a [f32]>,
    /// `[P, 3]`
    pub conics_grad: &'a [f32],
    /// `[P, 6]`
    pub covariances_3d_precomputed: Option<&'a [f32]>,
    /// `[P, F]`
    pub features_grad: &'a [f32],
    /// `[P]`
    pub points: &'a [PointState],
    /// `[P, 2]`
    pub positions_2d_grad: &'a [f32],
    /// `[P, 3]`
    pub positions: &'a [f32],
    /// `[P, 4]`
    pub rotations: &'a [f32],
    /// `[P, 3]`
    pub scalings: &'a [f32],
}

/// Outputs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Outputs {
    /// `[P, M, 3]`, or empty if the colors are precomputed.
    pub colors_sh_grad: Vec<f32>,
    /// `[P, 6]`
    pub covariances_3d_grad: Vec<f32>,
    /// `[P]`
    pub positions_2d_grad_norm: Vec<f32>,
    /// `[P, 3]`
    pub positions_3d_grad: Vec<f32>,
    /// `[P, 4]`
    pub rotations_grad: Vec<f32>,
    /// `[P, 3]`
    pub scalings_grad: Vec<f32>,
}

/// The gradients of a point.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct PointGradient {
    colors_sh: [[f32; 3]; SH_COUNT_MAX],
    covariance_3d: [f32; 6],
    position_2d_norm: f32,
    position_3d: Vector3<f32>,
    rotation: [f32; 4],
    scaling: [f32; 3],
}

/// Transforming the gradients back to the points.
///
/// The gradient of `P` sums four paths:
/// `P'` through the projection, `Σ'` through the camera Jacobian,
/// the view direction of SH colors, and the distance if the depth is rendered.
///
/// The gradient of `Σ` flows to `S` and the unnormalized quaternion of `R`.
pub fn main<C: Camera>(
    arguments: Arguments,
    inputs: Inputs<C>,
) -> Outputs {
    // P
    let point_count = inputs.points.len();
    // M
    let colors_sh_count = arguments.colors_sh_count;
    let is_colors_sh = inputs.colors_sh.is_some();

    let gradients = (0..point_count)
        .into_par_iter()
        .map(|index| transform_point_backward(&arguments, &inputs, index))
        .collect::<Vec<_>>();

    let mut outputs = Outputs {
        colors_sh_grad: Vec::with_capacity(if is_colors_sh {
            point_count * colors_sh_count * 3
        } else {
            0
        }),
        covariances_3d_grad: Vec::with_capacity(point_count * 6),
        positions_2d_grad_norm: Vec::with_capacity(point_count),
        positions_3d_grad: Vec::with_capacity(point_count * 3),
        rotations_grad: Vec::with_capacity(point_count * 4),
        scalings_grad: Vec::with_capacity(point_count * 3),
    };
    for gradient in &gradients {
        if is_colors_sh {
            outputs
                .colors_sh_grad
                .extend(gradient.colors_sh[..colors_sh_count].iter().flatten());
        }
        outputs.covariances_3d_grad.extend(gradient.covariance_3d);
        outputs.positions_2d_grad_norm.push(gradient.position_2d_norm);
        outputs.positions_3d_grad.extend(gradient.position_3d.iter());
        outputs.rotations_grad.extend(gradient.rotation);
        outputs.scalings_grad.extend(gradient.scaling);
    }

    outputs
}

fn transform_point_backward<C: Camera>(
    arguments: &Arguments,
    inputs: &Inputs<C>,
    index: usize,
) -> PointGradient {
    let mut gradient = PointGradient::default();
    let point = &inputs.points[index];
    if !point.is_visible() {
        return gradient;
    }

    let camera = inputs.camera;
    // F
    let feature_count = arguments.feature_count;
    // R_v
    let view_rotation = camera.view_rotation();
    // P
    let position = Vector3::from_column_slice(&inputs.positions[index * 3..][..3]);
    // P_v
    let position_view = camera.to_view(&position);
    // ∂L/∂P'
    let position_2d_grad =
        Vector2::from_column_slice(&inputs.positions_2d_grad[index * 2..][..2]);
    gradient.position_2d_norm = position_2d_grad.norm();

    // Σ
    let covariance_3d = unpack_symmetric(&point.covariance_3d);
    // J
    let jacobian = camera.covariance_jacobian(&position_view);
    // T <- J R_v
    let transform_2d = jacobian * view_rotation;
    // Σ'
    let covariance_2d = transform_2d * covariance_3d * transform_2d.transpose();
    let a = covariance_2d[(0, 0)] + FILTER_LOW_PASS;
    let b = covariance_2d[(0, 1)];
    let c = covariance_2d[(1, 1)] + FILTER_LOW_PASS;
    let determinant = a * c - b * b;
    let determinant_2_inv = 1.0 / (determinant * determinant);

    // ∂L/∂Σ'^-1
    let [conic_a_grad, conic_b_grad, conic_c_grad] = [
        inputs.conics_grad[index * 3],
        inputs.conics_grad[index * 3 + 1],
        inputs.conics_grad[index * 3 + 2],
    ];

    // ∂L/∂Σ'
    let a_grad = determinant_2_inv
        * (-c * c * conic_a_grad + b * c * conic_b_grad - b * b * conic_c_grad);
    let b_grad = determinant_2_inv
        * (2.0 * b * c * conic_a_grad - (determinant + 2.0 * b * b) * conic_b_grad
            + 2.0 * a * b * conic_c_grad);
    let c_grad = determinant_2_inv
        * (-b * b * conic_a_grad + a * b * conic_b_grad - a * a * conic_c_grad);
    let covariance_2d_grad = Matrix2::new(a_grad, 0.5 * b_grad, 0.5 * b_grad, c_grad);

    // ∂L/∂Σ
    let covariance_3d_grad =
        transform_2d.transpose() * covariance_2d_grad * transform_2d;
    gradient.covariance_3d = [
        covariance_3d_grad[(0, 0)],
        covariance_3d_grad[(0, 1)] + covariance_3d_grad[(1, 0)],
        covariance_3d_grad[(0, 2)] + covariance_3d_grad[(2, 0)],
        covariance_3d_grad[(1, 1)],
        covariance_3d_grad[(1, 2)] + covariance_3d_grad[(2, 1)],
        covariance_3d_grad[(2, 2)],
    ];

    // ∂L/∂T
    let transform_2d_grad = 2.0 * covariance_2d_grad * transform_2d * covariance_3d;
    // ∂L/∂J
    let jacobian_grad = transform_2d_grad * view_rotation.transpose();
    // ∂L/∂P_v
    let mut position_view_grad =
        camera.covariance_jacobian_backward(&position_view, &jacobian_grad);

    // ∂L/∂|P_v|
    if arguments.is_depth_rendered {
        let distance_grad = inputs.features_grad[index * feature_count + arguments.channel_count];
        position_view_grad += position_view / point.distance * distance_grad;
    }

    // ∂L/∂P
    let mut position_3d_grad = view_rotation.transpose() * position_view_grad
        + camera.project_backward(&position, &position_view, &position_2d_grad);

    // SH colors
    if let Some(colors_sh) = inputs.colors_sh {
        let colors_sh_count = arguments.colors_sh_count;
        let degree = colors_sh_degree(colors_sh_count, arguments.colors_sh_degree_max);
        let colors_sh = &colors_sh[index * colors_sh_count * 3..][..colors_sh_count * 3];

        // ∂L/∂C_rgb without the clamped channels
        let colors_grad = [0, 1, 2].map(|channel| {
            let grad = inputs.features_grad[index * feature_count + channel];
            if point.is_colors_not_clamped[channel] {
                grad
            } else {
                0.0
            }
        });

        // D
        let direction = position - camera.view_position();
        let direction_norm = direction.norm();
        // D / |D|
        let direction_normalized = direction / direction_norm;
        let basis = sh_basis(&direction_normalized, degree);
        let basis_grad = sh_basis_grad(&direction_normalized, degree);

        let mut direction_normalized_grad = Vector3::zeros();
        for k in 0..sh_count(degree) {
            let mut color_dot_grad = 0.0;
            for channel in 0..3 {
                gradient.colors_sh[k][channel] = basis[k] * colors_grad[channel];
                color_dot_grad += colors_sh[k * 3 + channel] * colors_grad[channel];
            }
            direction_normalized_grad += basis_grad[k] * color_dot_grad;
        }

        // ∂L/∂D
        let direction_grad = (direction_normalized_grad * direction_norm.powi(2)
            - direction * direction.dot(&direction_normalized_grad))
            / direction_norm.powi(3);
        position_3d_grad += direction_grad;
    }
    gradient.position_3d = position_3d_grad;

    // Σ <- M M^T, M <- R S
    if inputs.covariances_3d_precomputed.is_none() {
        let scaling_modifier = arguments.scaling_modifier;
        let quaternion = &inputs.rotations[index * 4..][..4];
        let (rotation, norm) = rotation_matrix(quaternion);
        let scaling =
            Vector3::from_column_slice(&inputs.scalings[index * 3..][..3]) * scaling_modifier;
        let m = rotation * Matrix3::from_diagonal(&scaling);

        // ∂L/∂M
        let m_grad = 2.0 * covariance_3d_grad * m;

        // ∂L/∂S
        gradient.scaling = [0, 1, 2].map(|j| {
            (0..3).map(|i| m_grad[(i, j)] * rotation[(i, j)]).sum::<f32>() * scaling_modifier
        });

        // ∂L/∂R
        let r = Matrix3::from_fn(|i, j| m_grad[(i, j)] * scaling[j]);

        // ∂L/∂q̂
        let norm_inv = if norm > 0.0 { 1.0 / norm } else { 1.0 };
        let q = Vector4::from_column_slice(quaternion) * norm_inv;
        let (x, y, z, w) = (q.x, q.y, q.z, q.w);
        let q_grad = Vector4::new(
            2.0 * y * (r[(0, 1)] + r[(1, 0)]) + 2.0 * z * (r[(0, 2)] + r[(2, 0)])
                - 2.0 * w * (r[(1, 2)] - r[(2, 1)])
                - 4.0 * x * (r[(1, 1)] + r[(2, 2)]),
            2.0 * x * (r[(0, 1)] + r[(1, 0)]) + 2.0 * w * (r[(0, 2)] - r[(2, 0)])
                + 2.0 * z * (r[(1, 2)] + r[(2, 1)])
                - 4.0 * y * (r[(0, 0)] + r[(2, 2)]),
            -2.0 * w * (r[(0, 1)] - r[(1, 0)])
                + 2.0 * x * (r[(0, 2)] + r[(2, 0)])
                + 2.0 * y * (r[(1, 2)] + r[(2, 1)])
                - 4.0 * z * (r[(0, 0)] + r[(1, 1)]),
            -2.0 * z * (r[(0, 1)] - r[(1, 0)]) + 2.0 * y * (r[(0, 2)] - r[(2, 0)])
                - 2.0 * x * (r[(1, 2)] - r[(2, 1)]),
        );

        // ∂L/∂q
        let q_grad = if norm > 0.0 {
            (q_grad - q * q.dot(&q_grad)) * norm_inv
        } else {
            q_grad
        };
        gradient.rotation = [q_grad.x, q_grad.y, q_grad.z, q_grad.w];
    }

    gradient
}
