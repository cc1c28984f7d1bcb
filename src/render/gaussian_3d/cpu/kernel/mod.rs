//! CPU kernels.
//!
//! Each kernel takes its `Arguments` and `Inputs`,
//! and writes into the buffers of its `Outputs`.

pub mod rank;
pub mod rasterize;
pub mod rasterize_backward;
pub mod scan;
pub mod segment;
pub mod sort;
pub mod transform;
pub mod transform_backward;

pub use crate::{
    error::Error,
    function::AtomicF32Buffer,
    render::{
        camera::{Camera, Matrix2x3, Matrix3, Vector2, Vector3},
        gaussian_3d::state::PointState,
    },
    spherical_harmonics::{sh_basis, sh_basis_grad, sh_count, SH_COUNT_MAX},
};
pub use rayon::prelude::*;
