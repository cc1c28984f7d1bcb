pub mod kernel;

pub use super::{
    backward, forward, state::PipelineState, Gaussian3dRenderOptions, View,
};
pub use crate::{
    error::Error,
    function::AtomicF32Buffer,
    render::camera::{Camera, Vector2},
    spherical_harmonics::{SH_COUNT_MAX, SH_DEGREE_MAX},
};
pub use kernel::{
    rank::TILE_COUNT_MAX,
    rasterize::{TILE_SIZE_X, TILE_SIZE_Y},
    transform::FILTER_LOW_PASS,
};

use kernel::*;

/// Maximum of `I_y * I_x`
pub const PIXEL_COUNT_MAX: u32 = TILE_SIZE_X * TILE_SIZE_Y * TILE_COUNT_MAX;

/// Rendering the points into the image and caching the state.
pub fn forward<C: Camera>(
    state: &mut PipelineState,
    input: &forward::RenderInput,
    view: &View,
    options: &Gaussian3dRenderOptions,
    channel_count: usize,
) -> Result<forward::RenderOutput, Error> {
    #[cfg(debug_assertions)]
    log::debug!(target: "gausplat::rasterizer::gaussian_3d::forward", "start");

    validate_input(input, view, options, channel_count)?;

    // Specifying the arguments

    let camera = C::from_view(view);
    let is_depth_rendered = options.is_depth_rendered;
    // P
    let point_count = input.point_count;
    state.ensure_frame(point_count, view, channel_count, is_depth_rendered)?;
    // F
    let feature_count = state.feature_count;
    // I_x
    let image_size_x = state.image_size_x;
    // I_y
    let image_size_y = state.image_size_y;
    // I_x / T_x
    let tile_count_x = state.tile_count_x;
    // I_y / T_y
    let tile_count_y = state.tile_count_y;

    // Launching the kernels

    transform::main(
        transform::Arguments {
            channel_count,
            colors_sh_count: input.colors_sh_count,
            colors_sh_degree_max: options.colors_sh_degree_max,
            feature_count,
            is_depth_rendered,
            is_prefiltered: options.is_prefiltered,
            scaling_modifier: input.scaling_modifier,
            tile_count_x,
            tile_count_y,
        },
        transform::Inputs {
            camera: &camera,
            colors_rgb_precomputed: input.colors_rgb_precomputed,
            colors_sh: input.colors_sh,
            covariances_3d_precomputed: input.covariances_3d_precomputed,
            opacities: input.opacities,
            positions: input.positions,
            rotations: input.rotations,
            scalings: input.scalings,
        },
        transform::Outputs {
            features: &mut state.features,
            points: &mut state.points,
        },
    )?;
    #[cfg(debug_assertions)]
    log::debug!(target: "gausplat::rasterizer::gaussian_3d::forward", "transform");

    // Scanning the counts of the touched tiles into offsets

    let total = state
        .points
        .par_iter()
        .map(|point| point.tile_touched_count as u64)
        .sum::<u64>();
    if total > u32::MAX as u64 {
        return Err(Error::Validation(
            format!("The count of tile points ({total})"),
            format!("no more than {}", u32::MAX),
        ));
    }
    state
        .tile_touched_offsets
        .par_iter_mut()
        .zip(state.points.par_iter())
        .for_each(|(offset, point)| *offset = point.tile_touched_count);
    let scan::add::Outputs { total } = scan::add::main(scan::add::Inputs {
        values: &mut state.tile_touched_offsets,
    });
    // T
    let tile_point_count = total as usize;
    #[cfg(debug_assertions)]
    log::debug!(
        target: "gausplat::rasterizer::gaussian_3d::forward",
        "scan > tile_point_count ({tile_point_count})",
    );

    state.ensure_tile_points(tile_point_count)?;

    rank::main(
        rank::Arguments { tile_count_x },
        rank::Inputs {
            points: &state.points,
            tile_touched_offsets: &state.tile_touched_offsets,
        },
        rank::Outputs {
            point_indices: &mut state.point_indices,
            point_orders: &mut state.point_orders,
        },
    );
    #[cfg(debug_assertions)]
    log::debug!(target: "gausplat::rasterizer::gaussian_3d::forward", "rank");

    // Sorting the points by its tile index and depth

    sort::radix::main(
        sort::radix::Arguments {
            key_bit_count: sort::radix::key_bit_count(tile_count_x * tile_count_y),
        },
        sort::radix::Inputs {
            keys: &mut state.point_orders,
            keys_swap: &mut state.point_orders_swap,
            values: &mut state.point_indices,
            values_swap: &mut state.point_indices_swap,
        },
    );
    #[cfg(debug_assertions)]
    log::debug!(target: "gausplat::rasterizer::gaussian_3d::forward", "sort");

    segment::main(
        segment::Inputs {
            point_orders: &state.point_orders,
        },
        segment::Outputs {
            tile_point_ranges: &mut state.tile_point_ranges,
        },
    );
    #[cfg(debug_assertions)]
    log::debug!(target: "gausplat::rasterizer::gaussian_3d::forward", "segment");

    // [I_y, I_x, F]
    let mut features_2d = vec![0.0; view.pixel_count() * feature_count];
    // [F]
    let background = input
        .background
        .iter()
        .copied()
        .chain(is_depth_rendered.then_some(0.0))
        .collect::<Vec<_>>();

    rasterize::main(
        rasterize::Arguments {
            feature_count,
            image_size_x,
            image_size_y,
            tile_count_x,
            tile_count_y,
        },
        rasterize::Inputs {
            background: &background,
            features: &state.features,
            opacities: input.opacities,
            point_indices: &state.point_indices,
            points: &state.points,
            tile_point_ranges: &state.tile_point_ranges,
        },
        rasterize::Outputs {
            features_2d: &mut features_2d,
            point_rendered_counts: &mut state.point_rendered_counts,
            transmittances: &mut state.transmittances,
        },
    );
    #[cfg(debug_assertions)]
    log::debug!(target: "gausplat::rasterizer::gaussian_3d::forward", "rasterize");

    // Splitting the features into colors and depths

    let (colors_rgb_2d, depths_2d) = if is_depth_rendered {
        let mut colors_rgb_2d = Vec::with_capacity(view.pixel_count() * channel_count);
        let mut depths_2d = Vec::with_capacity(view.pixel_count());
        for (pixel_image, features) in features_2d.chunks_exact(feature_count).enumerate() {
            let pixel = pixel_position(pixel_image, image_size_x);
            colors_rgb_2d.extend_from_slice(&features[..channel_count]);
            depths_2d.push(features[channel_count] * camera.depth_per_distance(&pixel));
        }
        (colors_rgb_2d, Some(depths_2d))
    } else {
        (features_2d, None)
    };

    Ok(forward::RenderOutput {
        colors_rgb_2d,
        depths_2d,
        radii: state.radii(),
        tile_point_count,
    })
}

/// Computing the gradients of the points from the gradients of the image.
///
/// The state should be cached by the forward pass with the same input and view.
pub fn backward<C: Camera>(
    state: &PipelineState,
    input: &forward::RenderInput,
    view: &View,
    options: &Gaussian3dRenderOptions,
    colors_rgb_2d_grad: &[f32],
    depths_2d_grad: Option<&[f32]>,
) -> Result<backward::RenderOutput, Error> {
    #[cfg(debug_assertions)]
    log::debug!(target: "gausplat::rasterizer::gaussian_3d::backward", "start");

    debug_assert_eq!(state.point_count, input.point_count);
    debug_assert_eq!(&state.view, view);
    debug_assert_eq!(state.is_depth_rendered, options.is_depth_rendered);

    // Specifying the arguments

    let camera = C::from_view(view);
    // P
    let point_count = state.point_count;
    // C
    let channel_count = state.channel_count;
    // F
    let feature_count = state.feature_count;
    // I_y * I_x
    let pixel_count = view.pixel_count();
    // I_x
    let image_size_x = state.image_size_x;

    if colors_rgb_2d_grad.len() != pixel_count * channel_count {
        return Err(Error::Validation(
            format!("The length of colors_rgb_2d_grad {}", colors_rgb_2d_grad.len()),
            format!("{}", pixel_count * channel_count),
        ));
    }
    if let Some(depths_2d_grad) = depths_2d_grad {
        if depths_2d_grad.len() != pixel_count {
            return Err(Error::Validation(
                format!("The length of depths_2d_grad {}", depths_2d_grad.len()),
                format!("{pixel_count}"),
            ));
        }
    }

    // [I_y, I_x, F]
    let features_2d_grad = if state.is_depth_rendered {
        let mut features_2d_grad = Vec::with_capacity(pixel_count * feature_count);
        for (pixel_image, colors_grad) in
            colors_rgb_2d_grad.chunks_exact(channel_count).enumerate()
        {
            let pixel = pixel_position(pixel_image, image_size_x);
            let depth_grad = depths_2d_grad.map_or(0.0, |grads| grads[pixel_image]);
            features_2d_grad.extend_from_slice(colors_grad);
            features_2d_grad.push(depth_grad * camera.depth_per_distance(&pixel));
        }
        features_2d_grad
    } else {
        colors_rgb_2d_grad.to_vec()
    };
    // [F]
    let background = input
        .background
        .iter()
        .copied()
        .chain(state.is_depth_rendered.then_some(0.0))
        .collect::<Vec<_>>();

    // Launching the kernels

    let conics_grad = AtomicF32Buffer::zeros(point_count * 3);
    let features_grad = AtomicF32Buffer::zeros(point_count * feature_count);
    let opacities_grad = AtomicF32Buffer::zeros(point_count);
    let positions_2d_grad = AtomicF32Buffer::zeros(point_count * 2);
    let pixel_per_normalized = camera.pixel_per_normalized();

    rasterize_backward::main(
        rasterize_backward::Arguments {
            feature_count,
            image_size_x,
            image_size_y: state.image_size_y,
            pixel_per_normalized: [pixel_per_normalized.x, pixel_per_normalized.y],
            tile_count_x: state.tile_count_x,
            tile_count_y: state.tile_count_y,
        },
        rasterize_backward::Inputs {
            background: &background,
            features: &state.features,
            features_2d_grad: &features_2d_grad,
            opacities: input.opacities,
            point_indices: &state.point_indices,
            point_rendered_counts: &state.point_rendered_counts,
            points: &state.points,
            tile_point_ranges: &state.tile_point_ranges,
            transmittances: &state.transmittances,
        },
        rasterize_backward::Outputs {
            conics_grad: &conics_grad,
            features_grad: &features_grad,
            opacities_grad: &opacities_grad,
            positions_2d_grad: &positions_2d_grad,
        },
    );
    #[cfg(debug_assertions)]
    log::debug!(
        target: "gausplat::rasterizer::gaussian_3d::backward",
        "rasterize_backward",
    );

    let conics_grad = conics_grad.into_vec();
    let features_grad = features_grad.into_vec();
    let positions_2d_grad = positions_2d_grad.into_vec();

    let outputs_transform_backward = transform_backward::main(
        transform_backward::Arguments {
            channel_count,
            colors_sh_count: input.colors_sh_count,
            colors_sh_degree_max: options.colors_sh_degree_max,
            feature_count,
            is_depth_rendered: state.is_depth_rendered,
            scaling_modifier: input.scaling_modifier,
        },
        transform_backward::Inputs {
            camera: &camera,
            colors_sh: input
                .colors_sh
                .filter(|_| input.colors_rgb_precomputed.is_none()),
            conics_grad: &conics_grad,
            covariances_3d_precomputed: input.covariances_3d_precomputed,
            features_grad: &features_grad,
            points: &state.points,
            positions_2d_grad: &positions_2d_grad,
            positions: input.positions,
            rotations: input.rotations,
            scalings: input.scalings,
        },
    );
    #[cfg(debug_assertions)]
    log::debug!(
        target: "gausplat::rasterizer::gaussian_3d::backward",
        "transform_backward",
    );

    // [P, C]
    let colors_rgb_3d_grad = if feature_count == channel_count {
        features_grad
    } else {
        features_grad
            .chunks_exact(feature_count)
            .flat_map(|features| &features[..channel_count])
            .copied()
            .collect()
    };

    Ok(backward::RenderOutput {
        colors_rgb_3d_grad,
        colors_sh_grad: outputs_transform_backward.colors_sh_grad,
        conics_grad,
        covariances_3d_grad: outputs_transform_backward.covariances_3d_grad,
        opacities_grad: opacities_grad.into_vec(),
        positions_2d_grad,
        positions_2d_grad_norm: outputs_transform_backward.positions_2d_grad_norm,
        positions_3d_grad: outputs_transform_backward.positions_3d_grad,
        rotations_grad: outputs_transform_backward.rotations_grad,
        scalings_grad: outputs_transform_backward.scalings_grad,
    })
}

/// Marking the points in frustum.
pub fn mark_visible<C: Camera>(
    positions: &[f32],
    view: &View,
) -> Vec<bool> {
    let camera = C::from_view(view);
    positions
        .par_chunks_exact(3)
        .map(|position| {
            camera.is_in_frustum(&camera.to_view(&Vector3::from_column_slice(position)))
        })
        .collect()
}

#[inline]
fn pixel_position(
    pixel_image: usize,
    image_size_x: u32,
) -> Vector2<f32> {
    let image_size_x = image_size_x as usize;
    Vector2::new(
        (pixel_image % image_size_x) as f32,
        (pixel_image / image_size_x) as f32,
    )
}

/// Checking the input before any work.
fn validate_input(
    input: &forward::RenderInput,
    view: &View,
    options: &Gaussian3dRenderOptions,
    channel_count: usize,
) -> Result<(), Error> {
    // P
    let point_count = input.point_count;

    let check_len = |name: &str, len: usize, target: usize| {
        if len == target {
            Ok(())
        } else {
            Err(Error::Validation(
                format!("The length of {name} ({len})"),
                format!("{target}"),
            ))
        }
    };

    if channel_count == 0 {
        return Err(Error::Validation(
            "The channel count".into(),
            "positive".into(),
        ));
    }
    if input.colors_rgb_precomputed.is_none() {
        if channel_count != 3 {
            return Err(Error::Validation(
                format!("The channel count ({channel_count}) without precomputed colors"),
                "3".into(),
            ));
        }
        let Some(colors_sh) = input.colors_sh else {
            return Err(Error::Validation(
                "The colors".into(),
                "either precomputed or in SH".into(),
            ));
        };
        if !(1..=SH_COUNT_MAX).contains(&input.colors_sh_count) {
            return Err(Error::Validation(
                format!("The SH coefficient count ({})", input.colors_sh_count),
                format!("in 1 ~ {SH_COUNT_MAX}"),
            ));
        }
        check_len("colors_sh", colors_sh.len(), point_count * input.colors_sh_count * 3)?;
    }
    if let Some(colors) = input.colors_rgb_precomputed {
        check_len("colors_rgb_precomputed", colors.len(), point_count * channel_count)?;
    }
    match input.covariances_3d_precomputed {
        Some(covariances) => {
            check_len("covariances_3d_precomputed", covariances.len(), point_count * 6)?
        }
        None => {
            check_len("rotations", input.rotations.len(), point_count * 4)?;
            check_len("scalings", input.scalings.len(), point_count * 3)?;
        }
    }
    check_len("background", input.background.len(), channel_count)?;
    check_len("opacities", input.opacities.len(), point_count)?;
    check_len("positions", input.positions.len(), point_count * 3)?;

    if options.colors_sh_degree_max > SH_DEGREE_MAX {
        return Err(Error::Validation(
            format!("The maximum SH degree ({})", options.colors_sh_degree_max),
            format!("no more than {SH_DEGREE_MAX}"),
        ));
    }
    if view.image_width == 0 || view.image_height == 0 {
        return Err(Error::Validation(
            format!("The image size ({} x {})", view.image_width, view.image_height),
            "positive".into(),
        ));
    }
    if view.pixel_count() > PIXEL_COUNT_MAX as usize {
        return Err(Error::Validation(
            format!("The pixel count ({})", view.pixel_count()),
            format!("no more than {PIXEL_COUNT_MAX}"),
        ));
    }
    let tile_count = view.image_width.div_ceil(TILE_SIZE_X) as usize
        * view.image_height.div_ceil(TILE_SIZE_Y) as usize;
    if tile_count > TILE_COUNT_MAX as usize {
        return Err(Error::Validation(
            format!("The tile count ({tile_count})"),
            format!("no more than {TILE_COUNT_MAX}"),
        ));
    }

    Ok(())
}
