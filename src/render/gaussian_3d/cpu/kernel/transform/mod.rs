//! Transforming the points.

pub use super::*;

use super::rasterize::{TILE_SIZE_X, TILE_SIZE_Y};

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
    /// Fails on any point out of frustum if enabled.
    pub is_prefiltered: bool,
    /// `S_m`
    pub scaling_modifier: f32,
    /// `I_x / T_x`
    pub tile_count_x: u32,
    /// `I_y / T_y`
    pub tile_count_y: u32,
}

/// Inputs.
#[derive(Clone, Debug)]
pub struct Inputs<'a, C: Camera> {
    pub camera: &'a C,
    /// `[P, C]`
    pub colors_rgb_precomputed: Option<&'a [f32]>,
    /// `[P, M, 3]`
    pub colors_sh: Option<&'a [f32]>,
    /// `[P, 6]`
    pub covariances_3d_precomputed: Option<&'a [f32]>,
    /// `[P]`
    pub opacities: &'a [f32],
    /// `[P, 3]`
    pub positions: &'a [f32],
    /// `[P, 4]`
    pub rotations: &'a [f32],
    /// `[P, 3]`
    pub scalings: &'a [f32],
}

/// Outputs.
#[derive(Debug)]
pub struct Outputs<'a> {
    /// `[P, F]`
    pub features: &'a mut [f32],
    /// `[P]`
    pub points: &'a mut [PointState],
}

/// `C_f`
pub const FILTER_LOW_PASS: f32 = 0.3;

/// Transforming the points.
///
/// For each point:
///
/// 1. Cull it if it is out of frustum.
/// 2. `Σ <- R S S^T R^T` with the normalized quaternion `R` and `S <- diag(S_s * S_m)`,
///    unless it is precomputed.
/// 3. `P'` is projected by the camera.
/// 4. `Σ' <- J R_v Σ (J R_v)^T + C_f I` with the camera Jacobian `J`.
/// 5. Cull it if `|Σ'| = 0`, otherwise `Σ'^-1` is the conic.
/// 6. `r <- ceil(3 sqrt(λ_max))` where `λ` are the eigenvalues of `Σ'`.
/// 7. Cull it if the tile rectangle covering `P' ± r` is empty.
/// 8. The colors are evaluated from SH along `(P - V_p) / |P - V_p|`,
///    then offset by `0.5` and clamped at zero, unless they are precomputed.
pub fn main<C: Camera>(
    arguments: Arguments,
    inputs: Inputs<C>,
    outputs: Outputs,
) -> Result<(), Error> {
    outputs
        .points
        .par_iter_mut()
        .zip(outputs.features.par_chunks_mut(arguments.feature_count))
        .enumerate()
        .try_for_each(|(index, (point, features))| {
            *point = PointState::default();
            features.fill(0.0);

            transform_point(&arguments, &inputs, index, point, features)
        })
}

fn transform_point<C: Camera>(
    arguments: &Arguments,
    inputs: &Inputs<C>,
    index: usize,
    point: &mut PointState,
    features: &mut [f32],
) -> Result<(), Error> {
    let camera = inputs.camera;

    // P
    let position = Vector3::from_column_slice(&inputs.positions[index * 3..][..3]);
    // P_v
    let position_view = camera.to_view(&position);

    if !camera.is_in_frustum(&position_view) {
        if arguments.is_prefiltered {
            return Err(Error::Validation(
                format!("The prefiltered point {index} at {position:?}"),
                "in frustum".into(),
            ));
        }
        return Ok(());
    }

    // Σ
    let covariance_3d = match inputs.covariances_3d_precomputed {
        Some(covariances) => unpack_symmetric(&covariances[index * 6..][..6]),
        None => {
            let (rotation, _) =
                rotation_matrix(&inputs.rotations[index * 4..][..4]);
            let scaling = Vector3::from_column_slice(&inputs.scalings[index * 3..][..3])
                * arguments.scaling_modifier;
            // M <- R S
            let m = rotation * Matrix3::from_diagonal(&scaling);
            m * m.transpose()
        }
    };

    // P'
    let position_2d = camera.project(&position, &position_view);

    // Σ'
    let jacobian = camera.covariance_jacobian(&position_view);
    let transform_2d = jacobian * camera.view_rotation();
    let covariance_2d = transform_2d * covariance_3d * transform_2d.transpose();
    let a = covariance_2d[(0, 0)] + FILTER_LOW_PASS;
    let b = covariance_2d[(0, 1)];
    let c = covariance_2d[(1, 1)] + FILTER_LOW_PASS;

    // |Σ'|
    let determinant = a * c - b * b;
    if determinant == 0.0 {
        return Ok(());
    }
    let determinant_inv = 1.0 / determinant;

    // λ
    let middle = 0.5 * (a + c);
    let extent = (middle * middle - determinant).max(0.1).sqrt();
    let eigenvalue_max = (middle + extent).max(middle - extent);
    // r
    let radius = (3.0 * eigenvalue_max.sqrt()).ceil();

    // [x_min, y_min, x_max, y_max)
    let tile_bounds = [
        tile_bound(position_2d.x - radius, TILE_SIZE_X, arguments.tile_count_x),
        tile_bound(position_2d.y - radius, TILE_SIZE_Y, arguments.tile_count_y),
        tile_bound(
            position_2d.x + radius + (TILE_SIZE_X - 1) as f32,
            TILE_SIZE_X,
            arguments.tile_count_x,
        ),
        tile_bound(
            position_2d.y + radius + (TILE_SIZE_Y - 1) as f32,
            TILE_SIZE_Y,
            arguments.tile_count_y,
        ),
    ];
    let tile_touched_count =
        (tile_bounds[2] - tile_bounds[0]) * (tile_bounds[3] - tile_bounds[1]);
    if tile_touched_count == 0 {
        return Ok(());
    }

    // C_rgb
    let mut is_colors_not_clamped = [true; 3];
    match (inputs.colors_rgb_precomputed, inputs.colors_sh) {
        (Some(colors), _) => {
            let channel_count = arguments.channel_count;
            features[..channel_count]
                .copy_from_slice(&colors[index * channel_count..][..channel_count]);
        }
        (None, Some(colors_sh)) => {
            let colors_sh_count = arguments.colors_sh_count;
            let degree = colors_sh_degree(colors_sh_count, arguments.colors_sh_degree_max);
            let direction = (position - camera.view_position()).normalize();
            let basis = sh_basis(&direction, degree);
            let colors_sh = &colors_sh[index * colors_sh_count * 3..][..colors_sh_count * 3];

            for (channel, feature) in features[..3].iter_mut().enumerate() {
                let color = (0..sh_count(degree))
                    .map(|k| basis[k] * colors_sh[k * 3 + channel])
                    .sum::<f32>()
                    + 0.5;
                is_colors_not_clamped[channel] = color >= 0.0;
                *feature = color.max(0.0);
            }
        }
        (None, None) => {}
    }

    // |P_v|
    let distance = position_view.norm();
    if arguments.is_depth_rendered {
        features[arguments.channel_count] = distance;
    }

    *point = PointState {
        conic: [
            c * determinant_inv,
            -b * determinant_inv,
            a * determinant_inv,
        ],
        covariance_3d: pack_symmetric(&covariance_3d),
        depth: camera.depth(&position_view),
        distance,
        is_colors_not_clamped,
        position_2d: [position_2d.x, position_2d.y],
        radius: radius as u32,
        tile_bounds,
        tile_touched_count,
    };

    Ok(())
}

/// The SH degree used for `colors_sh_count` coefficients.
#[inline]
pub fn colors_sh_degree(
    colors_sh_count: usize,
    colors_sh_degree_max: u32,
) -> u32 {
    let mut degree = 0;
    while degree < colors_sh_degree_max && sh_count(degree + 1) <= colors_sh_count {
        degree += 1;
    }
    degree
}

/// The rotation matrix of the quaternion `[x, y, z, w]` after normalization.
///
/// It also returns the norm of the quaternion.
/// A zero quaternion is left unnormalized.
pub fn rotation_matrix(quaternion: &[f32]) -> (Matrix3<f32>, f32) {
    let norm = quaternion.iter().map(|q| q * q).sum::<f32>().sqrt();
    let norm_inv = if norm > 0.0 { 1.0 / norm } else { 1.0 };
    let x = quaternion[0] * norm_inv;
    let y = quaternion[1] * norm_inv;
    let z = quaternion[2] * norm_inv;
    let w = quaternion[3] * norm_inv;

    let rotation = Matrix3::new(
        1.0 - 2.0 * (y * y + z * z),
        2.0 * (x * y - w * z),
        2.0 * (x * z + w * y),
        2.0 * (x * y + w * z),
        1.0 - 2.0 * (x * x + z * z),
        2.0 * (y * z - w * x),
        2.0 * (x * z - w * y),
        2.0 * (y * z + w * x),
        1.0 - 2.0 * (x * x + y * y),
    );
    (rotation, norm)
}

/// `[xx, xy, xz, yy, yz, zz] -> M`
#[inline]
pub fn unpack_symmetric(packed: &[f32]) -> Matrix3<f32> {
    Matrix3::new(
        packed[0], packed[1], packed[2], packed[1], packed[3], packed[4], packed[2],
        packed[4], packed[5],
    )
}

/// `M -> [xx, xy, xz, yy, yz, zz]`
#[inline]
pub fn pack_symmetric(matrix: &Matrix3<f32>) -> [f32; 6] {
    [
        matrix[(0, 0)],
        matrix[(0, 1)],
        matrix[(0, 2)],
        matrix[(1, 1)],
        matrix[(1, 2)],
        matrix[(2, 2)],
    ]
}

/// Clamping `value / tile_size` into `[0, tile_count]`.
#[inline]
fn tile_bound(
    value: f32,
    tile_size: u32,
    tile_count: u32,
) -> u32 {
    // Truncating toward zero
    ((value / tile_size as f32) as i32).clamp(0, tile_count as i32) as u32
}
