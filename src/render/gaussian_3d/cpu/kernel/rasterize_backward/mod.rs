pub use super::*;

use super::rasterize::{BatchPoint, TilePixels, BATCH_SIZE, TILE_SIZE};

/// Arguments.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Arguments {
    /// `F`
    pub feature_count: usize,
    /// `I_x`
    pub image_size_x: u32,
    /// `I_y`
    pub image_size_y: u32,
    /// The pixels per normalized unit of the camera.
    pub pixel_per_normalized: [f32; 2],
    /// `I_x / T_x`
    pub tile_count_x: u32,
    /// `I_y / T_y`
    pub tile_count_y: u32,
}

/// Inputs.
#[derive(Clone, Copy, Debug)]
pub struct Inputs<'a> {
    /// `[F]`
    pub background: &'a [f32],
    /// `[P, F]`
    pub features: &'a [f32],
    /// `[I_y, I_x, F]`
    pub features_2d_grad: &'a [f32],
    /// `[P]`
    pub opacities: &'a [f32],
    /// `[T]`
    pub point_indices: &'a [u32],
    /// `[I_y, I_x]`
    pub point_rendered_counts: &'a [u32],
    /// `[P]`
    pub points: &'a [PointState],
    /// `[I_y / T_y * I_x / T_x, 2]`
    pub tile_point_ranges: &'a [[u32; 2]],
    /// `[I_y, I_x]`
    pub transmittances: &'a [f32],
}

/// Outputs.
///
/// All of them are accumulated.
#[derive(Clone, Copy, Debug)]
pub struct Outputs<'a> {
    /// `[P, 3]`
    pub conics_grad: &'a AtomicF32Buffer,
    /// `[P, F]`
    pub features_grad: &'a AtomicF32Buffer,
    /// `[P]`
    pub opacities_grad: &'a AtomicF32Buffer,
    /// `[P, 2]` in normalized units
    pub positions_2d_grad: &'a AtomicF32Buffer,
}

/// Rasterizing the gradients back to the points.
///
/// Every pixel replays its composited points from back to front,
/// starting from the final transmittance.
/// The points after its last contributor are skipped.
///
/// For each point, with the suffix `A` of the features behind it:
///
/// - `∂L/∂f += α T ∂L/∂C`
/// - `∂L/∂α = T (f - A) · ∂L/∂C - T_final / (1 - α) background · ∂L/∂C`
/// - `∂L/∂o += G ∂L/∂α`
/// - `∂L/∂G = o ∂L/∂α`, which flows to the conic and `P'`.
pub fn main(
    arguments: Arguments,
    inputs: Inputs,
    outputs: Outputs,
) {
    // F
    let feature_count = arguments.feature_count;
    // I_x
    let image_size_x = arguments.image_size_x;
    // (I_y / T_y) * (I_x / T_x)
    let tile_count = (arguments.tile_count_x * arguments.tile_count_y) as usize;
    let [pixel_per_normalized_x, pixel_per_normalized_y] =
        arguments.pixel_per_normalized;

    (0..tile_count).into_par_iter().for_each(|tile_index| {
        let pixels = TilePixels::new(
            tile_index,
            &rasterize::Arguments {
                feature_count,
                image_size_x,
                image_size_y: arguments.image_size_y,
                tile_count_x: arguments.tile_count_x,
                tile_count_y: arguments.tile_count_y,
            },
        );
        let [start, end] = inputs.tile_point_ranges[tile_index];
        let [start, end] = [start as usize, end as usize];

        // The states of the pixels

        let mut transmittances = [0.0; TILE_SIZE];
        let mut transmittances_final = [0.0; TILE_SIZE];
        let mut point_rendered_counts = [0; TILE_SIZE];
        let mut alphas_last = [0.0; TILE_SIZE];
        let mut features_last = vec![0.0; TILE_SIZE * feature_count];
        let mut features_accumulated = vec![0.0; TILE_SIZE * feature_count];
        let mut features_2d_grad = vec![0.0; TILE_SIZE * feature_count];
        let mut background_dot_grad = [0.0; TILE_SIZE];
        let mut point_rendered_count_max = 0;
        for (pixel, pixel_image, _) in pixels.iter(image_size_x) {
            let transmittance = inputs.transmittances[pixel_image];
            let grad = &inputs.features_2d_grad[pixel_image * feature_count..]
                [..feature_count];
            transmittances[pixel] = transmittance;
            transmittances_final[pixel] = transmittance;
            point_rendered_counts[pixel] = inputs.point_rendered_counts[pixel_image];
            point_rendered_count_max =
                point_rendered_count_max.max(point_rendered_counts[pixel] as usize);
            features_2d_grad[pixel * feature_count..][..feature_count]
                .copy_from_slice(grad);
            background_dot_grad[pixel] = inputs
                .background
                .iter()
                .zip(grad)
                .map(|(background, grad)| background * grad)
                .sum();
        }

        // Only the points before the last contributor are replayed.
        let end = end.min(start + point_rendered_count_max);
        let mut batch = Vec::with_capacity(BATCH_SIZE);

        // Batches from back to front
        let mut batch_end = end;
        while batch_end > start {
            let batch_start = batch_end.saturating_sub(BATCH_SIZE).max(start);

            // Loading the batch
            batch.clear();
            batch.extend(inputs.point_indices[batch_start..batch_end].iter().map(
                |&index| BatchPoint::load(index, inputs.points, inputs.opacities),
            ));

            for (pixel, _, position) in pixels.iter(image_size_x) {
                let point_rendered_count = point_rendered_counts[pixel] as usize;
                let grad = &features_2d_grad[pixel * feature_count..][..feature_count];

                for (offset, point) in (batch_start..batch_end).zip(&batch).rev() {
                    if offset - start >= point_rendered_count {
                        continue;
                    }
                    let Some((gaussian, alpha, d)) = point.alpha(&position) else {
                        continue;
                    };

                    // T before the point
                    let transmittance = transmittances[pixel] / (1.0 - alpha);
                    transmittances[pixel] = transmittance;

                    let index = point.index as usize;
                    let weight = alpha * transmittance;
                    let features_point =
                        &inputs.features[index * feature_count..][..feature_count];
                    let features_last =
                        &mut features_last[pixel * feature_count..][..feature_count];
                    let features_accumulated =
                        &mut features_accumulated[pixel * feature_count..][..feature_count];
                    let alpha_last = alphas_last[pixel];

                    let mut alpha_grad = 0.0;
                    for channel in 0..feature_count {
                        let feature = features_point[channel];
                        features_accumulated[channel] = alpha_last * features_last[channel]
                            + (1.0 - alpha_last) * features_accumulated[channel];
                        features_last[channel] = feature;

                        alpha_grad += (feature - features_accumulated[channel]) * grad[channel];
                        outputs
                            .features_grad
                            .add(index * feature_count + channel, weight * grad[channel]);
                    }
                    alpha_grad *= transmittance;
                    alphas_last[pixel] = alpha;

                    alpha_grad -=
                        transmittances_final[pixel] / (1.0 - alpha) * background_dot_grad[pixel];

                    // ∂L/∂G
                    let gaussian_grad = point.opacity * alpha_grad;
                    let [a, b, c] = point.conic;
                    let gaussian_dx = gaussian * d[0];
                    let gaussian_dy = gaussian * d[1];
                    // ∂G/∂d
                    let d_grad_x = -gaussian_dx * a - gaussian_dy * b;
                    let d_grad_y = -gaussian_dy * c - gaussian_dx * b;

                    outputs.positions_2d_grad.add(
                        index * 2,
                        gaussian_grad * d_grad_x * pixel_per_normalized_x,
                    );
                    outputs.positions_2d_grad.add(
                        index * 2 + 1,
                        gaussian_grad * d_grad_y * pixel_per_normalized_y,
                    );
                    outputs
                        .conics_grad
                        .add(index * 3, -0.5 * gaussian_dx * d[0] * gaussian_grad);
                    outputs
                        .conics_grad
                        .add(index * 3 + 1, -gaussian_dx * d[1] * gaussian_grad);
                    outputs
                        .conics_grad
                        .add(index * 3 + 2, -0.5 * gaussian_dy * d[1] * gaussian_grad);
                    outputs.opacities_grad.add(index, gaussian * alpha_grad);
                }
            }

            batch_end = batch_start;
        }
    });
}
