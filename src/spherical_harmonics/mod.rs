use nalgebra::Vector3;
use std::{f64::consts::PI, sync::LazyLock};

/// The count of spherical harmonics coefficients
pub const SH_COUNT_MAX: usize = (SH_DEGREE_MAX as usize + 1).pow(2);

/// The maximum degree of spherical harmonics
pub const SH_DEGREE_MAX: u32 = 3;

/// The real coefficients of orthonormalized spherical harmonics from degree 0 to 3
///
/// ## Examples
///
/// ```rust
/// use gausplat_rasterizer::spherical_harmonics::SH_COEF;
///
/// assert_eq!(SH_COEF.0[0], 0.28209479177387814);
/// assert_eq!(SH_COEF.3[3 + 2], 1.445305721320277);
///
/// assert_eq!(
///     *SH_COEF,
///     (
///         [0.28209479177387814],
///         [
///             -0.4886025119029199,
///             0.4886025119029199,
///             -0.4886025119029199,
///         ],
///         [
///             1.0925484305920792,
///             -1.0925484305920792,
///             0.31539156525252005,
///             -1.0925484305920792,
///             0.5462742152960396,
///         ],
///         [
///             -0.5900435899266435,
///             2.890611442640554,
///             -0.4570457994644658,
///             0.3731763325901154,
///             -0.4570457994644658,
///             1.445305721320277,
///             -0.5900435899266435,
///         ],
///     )
/// );
///
/// ```
#[allow(clippy::type_complexity)]
pub static SH_COEF: LazyLock<([f64; 1], [f64; 3], [f64; 5], [f64; 7])> =
    LazyLock::new(|| {
        (
            [(1.0 / 4.0 / PI).sqrt()],
            [
                -(3.0 / 4.0 / PI).sqrt(),
                (3.0 / 4.0 / PI).sqrt(),
                -(3.0 / 4.0 / PI).sqrt(),
            ],
            [
                (15.0 / 4.0 / PI).sqrt(),
                -(15.0 / 4.0 / PI).sqrt(),
                (5.0 / 16.0 / PI).sqrt(),
                -(15.0 / 4.0 / PI).sqrt(),
                (15.0 / 16.0 / PI).sqrt(),
            ],
            [
                -(35.0 / 32.0 / PI).sqrt(),
                (105.0 / 4.0 / PI).sqrt(),
                -(21.0 / 32.0 / PI).sqrt(),
                (7.0 / 16.0 / PI).sqrt(),
                -(21.0 / 32.0 / PI).sqrt(),
                (105.0 / 16.0 / PI).sqrt(),
                -(35.0 / 32.0 / PI).sqrt(),
            ],
        )
    });

/// The single-precision copy of [`SH_COEF`] flattened by basis index.
static SH_COEF_F32: LazyLock<[f32; SH_COUNT_MAX]> = LazyLock::new(|| {
    let (c0, c1, c2, c3) = *SH_COEF;
    let mut coef = [0.0; SH_COUNT_MAX];
    c0.iter()
        .chain(&c1)
        .chain(&c2)
        .chain(&c3)
        .zip(coef.iter_mut())
        .for_each(|(source, target)| *target = *source as f32);
    coef
});

/// The count of basis functions up to `degree`.
#[inline]
pub const fn sh_count(degree: u32) -> usize {
    (degree as usize + 1).pow(2)
}

/// Evaluating the basis functions at the unit direction `d`.
///
/// Only the first [`sh_count(degree)`](sh_count) entries are written,
/// the others stay zero.
///
/// $$ Y(d) = [\ c_{00}\ \ \ c_{1,-1} y\ \ \ c_{10} z\ \ \ c_{11} x\ \ \ c_{2,-2} x y\ \ \cdots\ ] $$
pub fn sh_basis(
    d: &Vector3<f32>,
    degree: u32,
) -> [f32; SH_COUNT_MAX] {
    let c = &*SH_COEF_F32;
    let (x, y, z) = (d.x, d.y, d.z);
    let mut basis = [0.0; SH_COUNT_MAX];

    basis[0] = c[0];
    if degree < 1 {
        return basis;
    }
    basis[1] = c[1] * y;
    basis[2] = c[2] * z;
    basis[3] = c[3] * x;
    if degree < 2 {
        return basis;
    }

    let (xx, yy, zz) = (x * x, y * y, z * z);
    let (xy, yz, xz) = (x * y, y * z, x * z);
    basis[4] = c[4] * xy;
    basis[5] = c[5] * yz;
    basis[6] = c[6] * (2.0 * zz - xx - yy);
    basis[7] = c[7] * xz;
    basis[8] = c[8] * (xx - yy);
    if degree < 3 {
        return basis;
    }

    basis[9] = c[9] * y * (3.0 * xx - yy);
    basis[10] = c[10] * xy * z;
    basis[11] = c[11] * y * (4.0 * zz - xx - yy);
    basis[12] = c[12] * z * (2.0 * zz - 3.0 * xx - 3.0 * yy);
    basis[13] = c[13] * x * (4.0 * zz - xx - yy);
    basis[14] = c[14] * z * (xx - yy);
    basis[15] = c[15] * x * (xx - 3.0 * yy);
    basis
}

/// The partial derivatives of [`sh_basis`] with respect to `d`.
///
/// `d` is treated as unconstrained here,
/// the normalization is differentiated by the caller.
pub fn sh_basis_grad(
    d: &Vector3<f32>,
    degree: u32,
) -> [Vector3<f32>; SH_COUNT_MAX] {
    let c = &*SH_COEF_F32;
    let (x, y, z) = (d.x, d.y, d.z);
    let mut grad = [Vector3::zeros(); SH_COUNT_MAX];

    if degree < 1 {
        return grad;
    }
    grad[1] = Vector3::new(0.0, c[1], 0.0);
    grad[2] = Vector3::new(0.0, 0.0, c[2]);
    grad[3] = Vector3::new(c[3], 0.0, 0.0);
    if degree < 2 {
        return grad;
    }

    let (xx, yy, zz) = (x * x, y * y, z * z);
    let (xy, yz, xz) = (x * y, y * z, x * z);
    grad[4] = Vector3::new(y, x, 0.0) * c[4];
    grad[5] = Vector3::new(0.0, z, y) * c[5];
    grad[6] = Vector3::new(-2.0 * x, -2.0 * y, 4.0 * z) * c[6];
    grad[7] = Vector3::new(z, 0.0, x) * c[7];
    grad[8] = Vector3::new(2.0 * x, -2.0 * y, 0.0) * c[8];
    if degree < 3 {
        return grad;
    }

    grad[9] = Vector3::new(6.0 * xy, 3.0 * xx - 3.0 * yy, 0.0) * c[9];
    grad[10] = Vector3::new(yz, xz, xy) * c[10];
    grad[11] = Vector3::new(-2.0 * xy, 4.0 * zz - xx - 3.0 * yy, 8.0 * yz) * c[11];
    grad[12] =
        Vector3::new(-6.0 * xz, -6.0 * yz, 6.0 * zz - 3.0 * xx - 3.0 * yy) * c[12];
    grad[13] = Vector3::new(4.0 * zz - 3.0 * xx - yy, -2.0 * xy, 8.0 * xz) * c[13];
    grad[14] = Vector3::new(2.0 * xz, -2.0 * yz, xx - yy) * c[14];
    grad[15] = Vector3::new(3.0 * xx - 3.0 * yy, -6.0 * xy, 0.0) * c[15];
    grad
}
