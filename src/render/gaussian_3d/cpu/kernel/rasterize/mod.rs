pub use super::*;

/// Arguments.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Arguments {
    /// `F`
    pub feature_count: usize,
    /// `I_x`
    pub image_size_x: u32,
    /// `I_y`
    pub image_size_y: u32,
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
    /// `[P]`
    pub opacities: &'a [f32],
    /// `[T]`
    pub point_indices: &'a [u32],
    /// `[P]`
    pub points: &'a [PointState],
    /// `[I_y / T_y * I_x / T_x, 2]`
    pub tile_point_ranges: &'a [[u32; 2]],
}

/// Outputs.
#[derive(Debug)]
pub struct Outputs<'a> {
    /// `[I_y, I_x, F]`
    pub features_2d: &'a mut [f32],
    /// `[I_y, I_x]`
    pub point_rendered_counts: &'a mut [u32],
    /// `[I_y, I_x]`
    pub transmittances: &'a mut [f32],
}

/// `T_x`
pub const TILE_SIZE_X: u32 = 16;
/// `T_y`
pub const TILE_SIZE_Y: u32 = 16;
/// `T_x * T_y`
pub const TILE_SIZE: usize = (TILE_SIZE_X * TILE_SIZE_Y) as usize;
/// The count of points loaded together.
pub const BATCH_SIZE: usize = TILE_SIZE;
/// The minimum of visible opacity.
pub const OPACITY_MIN: f32 = 1.0 / 255.0;
/// The maximum of opacity.
pub const OPACITY_MAX: f32 = 0.99;
/// The minimum of transmittance before a pixel is done.
pub const TRANSMITTANCE_MIN: f32 = 1e-4;

/// A point loaded in the shared batch of a tile.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BatchPoint {
    pub conic: [f32; 3],
    pub index: u32,
    pub opacity: f32,
    pub position_2d: [f32; 2],
}

impl BatchPoint {
    #[inline]
    pub fn load(
        index: u32,
        points: &[PointState],
        opacities: &[f32],
    ) -> Self {
        let point = &points[index as usize];
        Self {
            conic: point.conic,
            index,
            opacity: opacities[index as usize],
            position_2d: point.position_2d,
        }
    }

    /// Returning `(G, α, d)` if the point covers the pixel visibly.
    ///
    /// `G <- exp(-0.5 (a dx² + c dy²) - b dx dy)` where `d <- P' - pixel`
    #[inline]
    pub fn alpha(
        &self,
        pixel: &[f32; 2],
    ) -> Option<(f32, f32, [f32; 2])> {
        let [a, b, c] = self.conic;
        let d = [
            self.position_2d[0] - pixel[0],
            self.position_2d[1] - pixel[1],
        ];
        let power = -0.5 * (a * d[0] * d[0] + c * d[1] * d[1]) - b * d[0] * d[1];
        if power > 0.0 {
            return None;
        }
        let gaussian = power.exp();
        let alpha = (self.opacity * gaussian).min(OPACITY_MAX);
        if alpha < OPACITY_MIN {
            return None;
        }
        Some((gaussian, alpha, d))
    }
}

/// The pixels of a tile.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TilePixels {
    /// The pixel position of the first pixel.
    pub origin: [u32; 2],
    /// `[T_x, T_y]` clipped by the image.
    pub size: [u32; 2],
}

impl TilePixels {
    pub fn new(
        tile_index: usize,
        arguments: &Arguments,
    ) -> Self {
        let tile_x = tile_index as u32 % arguments.tile_count_x;
        let tile_y = tile_index as u32 / arguments.tile_count_x;
        let origin = [tile_x * TILE_SIZE_X, tile_y * TILE_SIZE_Y];
        let size = [
            TILE_SIZE_X.min(arguments.image_size_x - origin[0]),
            TILE_SIZE_Y.min(arguments.image_size_y - origin[1]),
        ];
        Self { origin, size }
    }

    /// Returning `(pixel index in tile, pixel index in image, pixel position)`.
    pub fn iter(
        &self,
        image_size_x: u32,
    ) -> impl Iterator<Item = (usize, usize, [f32; 2])> + '_ {
        (0..self.size[1]).flat_map(move |y| {
            (0..self.size[0]).map(move |x| {
                let pixel_x = self.origin[0] + x;
                let pixel_y = self.origin[1] + y;
                (
                    (y * TILE_SIZE_X + x) as usize,
                    pixel_y as usize * image_size_x as usize + pixel_x as usize,
                    [pixel_x as f32, pixel_y as f32],
                )
            })
        })
    }
}

/// The outputs of a tile.
#[derive(Debug)]
struct TileOutputs {
    /// `[T_y * T_x, F]`
    features: Vec<f32>,
    pixels: TilePixels,
    /// `[T_y * T_x]`
    point_rendered_counts: [u32; TILE_SIZE],
    /// `[T_y * T_x]`
    transmittances: [f32; TILE_SIZE],
}

/// Rasterizing the points to the image.
///
/// The tiles are rendered in parallel.
/// In each tile, the sorted points are loaded in batches,
/// then every pixel composites them front to back:
///
/// `C <- Σ f α T` and `T <- T (1 - α)`
///
/// A pixel stops before its transmittance falls below [`TRANSMITTANCE_MIN`].
/// The output is `C + T * background`.
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

    let tiles = (0..tile_count)
        .into_par_iter()
        .map(|tile_index| {
            let pixels = TilePixels::new(tile_index, &arguments);
            let [start, end] = inputs.tile_point_ranges[tile_index];
            let [start, end] = [start as usize, end as usize];

            let mut features = vec![0.0; TILE_SIZE * feature_count];
            let mut point_rendered_counts = [0; TILE_SIZE];
            let mut transmittances = [1.0; TILE_SIZE];
            // The pixels out of the image are done.
            let mut is_done = [true; TILE_SIZE];
            let mut contributed_counts = [0; TILE_SIZE];
            pixels
                .iter(image_size_x)
                .for_each(|(pixel, _, _)| is_done[pixel] = false);
            let mut batch = Vec::with_capacity(BATCH_SIZE);

            for batch_start in (start..end).step_by(BATCH_SIZE) {
                if is_done.iter().all(|&done| done) {
                    break;
                }

                // Loading the batch
                batch.clear();
                batch.extend(
                    inputs.point_indices[batch_start..end.min(batch_start + BATCH_SIZE)]
                        .iter()
                        .map(|&index| BatchPoint::load(index, inputs.points, inputs.opacities)),
                );

                // Compositing the batch
                for (pixel, _, position) in pixels.iter(image_size_x) {
                    for point in &batch {
                        if is_done[pixel] {
                            break;
                        }
                        contributed_counts[pixel] += 1;

                        let Some((_, alpha, _)) = point.alpha(&position) else {
                            continue;
                        };
                        let transmittance = transmittances[pixel];
                        let transmittance_next = transmittance * (1.0 - alpha);
                        if transmittance_next < TRANSMITTANCE_MIN {
                            is_done[pixel] = true;
                            break;
                        }

                        let weight = alpha * transmittance;
                        let features_point = &inputs.features
                            [point.index as usize * feature_count..][..feature_count];
                        features[pixel * feature_count..][..feature_count]
                            .iter_mut()
                            .zip(features_point)
                            .for_each(|(output, &feature)| *output += feature * weight);
                        transmittances[pixel] = transmittance_next;
                        point_rendered_counts[pixel] = contributed_counts[pixel];
                    }
                }
            }

            TileOutputs {
                features,
                pixels,
                point_rendered_counts,
                transmittances,
            }
        })
        .collect::<Vec<_>>();

    // Writing the tiles to the image

    for tile in tiles {
        for (pixel, pixel_image, _) in tile.pixels.iter(image_size_x) {
            let transmittance = tile.transmittances[pixel];
            outputs.features_2d[pixel_image * feature_count..][..feature_count]
                .iter_mut()
                .zip(&tile.features[pixel * feature_count..][..feature_count])
                .zip(inputs.background)
                .for_each(|((output, &feature), &background)| {
                    *output = feature + transmittance * background;
                });
            outputs.point_rendered_counts[pixel_image] =
                tile.point_rendered_counts[pixel];
            outputs.transmittances[pixel_image] = transmittance;
        }
    }
}
