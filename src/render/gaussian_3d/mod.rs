//! Tile-based rasterization of 3D Gaussians.
//!
//! A forward pass renders the splats and caches a [`PipelineState`],
//! which the following backward pass reads to propagate the gradients
//! from the image to the splats.

pub mod backward;
pub mod cpu;
pub mod forward;
pub mod state;
pub mod tensor;

pub use crate::{
    error::Error,
    render::{
        camera::{Camera, PerspectiveCamera, SphericalCamera},
        view::View,
    },
    spherical_harmonics::SH_DEGREE_MAX,
};
pub use burn::{config::Config, record::Record};
pub use cpu::{
    FILTER_LOW_PASS, PIXEL_COUNT_MAX, TILE_COUNT_MAX, TILE_SIZE_X, TILE_SIZE_Y,
};
pub use state::{PipelineState, PointState, ScratchBuffer};

/// The camera model of a renderer.
#[derive(Config, Copy, Debug, PartialEq, Eq)]
pub enum CameraModel {
    /// [`PerspectiveCamera`]
    Perspective,
    /// [`SphericalCamera`]
    Spherical,
}

#[derive(Config, Debug)]
pub struct Gaussian3dRendererConfig {
    #[config(default = "CameraModel::Perspective")]
    pub camera_model: CameraModel,

    /// `C`
    ///
    /// It should be `3` unless the colors are precomputed.
    #[config(default = 3)]
    pub channel_count: usize,

    /// The growth factor of the scratch buffers.
    #[config(default = 2.0)]
    pub resize_multiplier: f64,
}

#[derive(Config, Debug, Record)]
pub struct Gaussian3dRenderOptions {
    #[config(default = "SH_DEGREE_MAX")]
    /// It should be no more than [`SH_DEGREE_MAX`].
    pub colors_sh_degree_max: u32,

    /// Rendering the depths in addition to the colors.
    #[config(default = false)]
    pub is_depth_rendered: bool,

    /// All the points are expected to be in frustum.
    ///
    /// The forward pass fails if any of them is not.
    #[config(default = false)]
    pub is_prefiltered: bool,
}

/// A renderer of 3D Gaussians owning its scratch state.
#[derive(Clone, Debug)]
pub struct Gaussian3dRenderer {
    config: Gaussian3dRendererConfig,
    state: PipelineState,
}

impl Gaussian3dRenderer {
    pub fn new(config: Gaussian3dRendererConfig) -> Self {
        let state = PipelineState::new(config.resize_multiplier.max(1.0));
        Self { config, state }
    }

    #[inline]
    pub fn config(&self) -> &Gaussian3dRendererConfig {
        &self.config
    }

    /// The state cached by the last forward pass.
    #[inline]
    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    /// Rendering the splats.
    ///
    /// ## Errors
    ///
    /// It fails before any work if the input does not match the point count,
    /// or if the channel count is not `3` without precomputed colors.
    pub fn forward(
        &mut self,
        input: &forward::RenderInput,
        view: &View,
        options: &Gaussian3dRenderOptions,
    ) -> Result<forward::RenderOutput, Error> {
        let channel_count = self.config.channel_count;
        match self.config.camera_model {
            CameraModel::Perspective => cpu::forward::<PerspectiveCamera>(
                &mut self.state,
                input,
                view,
                options,
                channel_count,
            ),
            CameraModel::Spherical => cpu::forward::<SphericalCamera>(
                &mut self.state,
                input,
                view,
                options,
                channel_count,
            ),
        }
    }

    /// Computing the gradients of the splats.
    ///
    /// The arguments should be the same as the ones of the last forward pass,
    /// and `radii` should be its output.
    ///
    /// ## Arguments
    ///
    /// * `colors_rgb_2d_grad` - `[I_y, I_x, C]`
    /// * `depths_2d_grad` - `[I_y, I_x]`, only used if the depths are rendered.
    pub fn backward(
        &self,
        input: &forward::RenderInput,
        view: &View,
        options: &Gaussian3dRenderOptions,
        radii: &[u32],
        colors_rgb_2d_grad: &[f32],
        depths_2d_grad: Option<&[f32]>,
    ) -> Result<backward::RenderOutput, Error> {
        debug_assert_eq!(radii.len(), self.state.point_count);
        debug_assert!(self
            .state
            .points
            .iter()
            .zip(radii)
            .all(|(point, &radius)| point.radius == radius));

        match self.config.camera_model {
            CameraModel::Perspective => cpu::backward::<PerspectiveCamera>(
                &self.state,
                input,
                view,
                options,
                colors_rgb_2d_grad,
                depths_2d_grad,
            ),
            CameraModel::Spherical => cpu::backward::<SphericalCamera>(
                &self.state,
                input,
                view,
                options,
                colors_rgb_2d_grad,
                depths_2d_grad,
            ),
        }
    }

    /// Marking the points in the frustum of the camera model.
    ///
    /// ## Arguments
    ///
    /// * `positions` - `[P, 3]`
    pub fn mark_visible(
        positions: &[f32],
        view: &View,
        camera_model: CameraModel,
    ) -> Vec<bool> {
        match camera_model {
            CameraModel::Perspective => {
                cpu::mark_visible::<PerspectiveCamera>(positions, view)
            }
            CameraModel::Spherical => {
                cpu::mark_visible::<SphericalCamera>(positions, view)
            }
        }
    }
}

impl Default for Gaussian3dRenderer {
    #[inline]
    fn default() -> Self {
        Self::new(Gaussian3dRendererConfig::new())
    }
}

impl Default for Gaussian3dRendererConfig {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Default for Gaussian3dRenderOptions {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use rand_distr::{Distribution, Normal};

    /// A view at the origin looking along `+z` with a `60°` field of view.
    pub fn view_front(
        image_width: u32,
        image_height: u32,
    ) -> View {
        let rotation = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        View {
            field_of_view_x: std::f64::consts::FRAC_PI_3,
            field_of_view_y: std::f64::consts::FRAC_PI_3,
            image_height,
            image_width,
            view_position: [0.0; 3],
            view_transform: View::transform(&rotation, &[0.0; 3]),
        }
    }

    /// Splats owning their buffers.
    #[derive(Clone, Debug, Default)]
    pub struct Splats {
        pub background: Vec<f32>,
        pub colors_rgb_precomputed: Option<Vec<f32>>,
        pub colors_sh: Vec<f32>,
        pub colors_sh_count: usize,
        pub covariances_3d_precomputed: Option<Vec<f32>>,
        pub opacities: Vec<f32>,
        pub positions: Vec<f32>,
        pub rotations: Vec<f32>,
        pub scalings: Vec<f32>,
    }

    #[derive(Clone, Copy, Debug)]
    enum Parameter {
        ColorsRgb,
        ColorsSh,
        Covariances3d,
        Opacities,
        Positions,
        Rotations,
        Scalings,
    }

    impl Splats {
        pub fn new(
            background: &[f32],
            colors_sh_count: usize,
        ) -> Self {
            Self {
                background: background.to_vec(),
                colors_sh_count,
                ..Default::default()
            }
        }

        pub fn push(
            &mut self,
            position: [f32; 3],
            scaling: [f32; 3],
            rotation: [f32; 4],
            opacity: f32,
            colors_sh: &[f32],
        ) -> &mut Self {
            assert_eq!(colors_sh.len(), self.colors_sh_count * 3);
            self.colors_sh.extend_from_slice(colors_sh);
            self.opacities.push(opacity);
            self.positions.extend(position);
            self.rotations.extend(rotation);
            self.scalings.extend(scaling);
            self
        }

        pub fn input(&self) -> forward::RenderInput<'_> {
            forward::RenderInput {
                background: &self.background,
                colors_rgb_precomputed: self.colors_rgb_precomputed.as_deref(),
                colors_sh: Some(&self.colors_sh),
                colors_sh_count: self.colors_sh_count,
                covariances_3d_precomputed: self.covariances_3d_precomputed.as_deref(),
                opacities: &self.opacities,
                point_count: self.opacities.len(),
                positions: &self.positions,
                rotations: &self.rotations,
                scaling_modifier: 1.0,
                scalings: &self.scalings,
            }
        }

        fn parameter_mut(
            &mut self,
            parameter: Parameter,
        ) -> &mut Vec<f32> {
            match parameter {
                Parameter::ColorsRgb => self.colors_rgb_precomputed.as_mut().unwrap(),
                Parameter::ColorsSh => &mut self.colors_sh,
                Parameter::Covariances3d => {
                    self.covariances_3d_precomputed.as_mut().unwrap()
                }
                Parameter::Opacities => &mut self.opacities,
                Parameter::Positions => &mut self.positions,
                Parameter::Rotations => &mut self.rotations,
                Parameter::Scalings => &mut self.scalings,
            }
        }
    }

    fn gradient_of(
        output: &backward::RenderOutput,
        parameter: Parameter,
    ) -> &[f32] {
        match parameter {
            Parameter::ColorsRgb => &output.colors_rgb_3d_grad,
            Parameter::ColorsSh => &output.colors_sh_grad,
            Parameter::Covariances3d => &output.covariances_3d_grad,
            Parameter::Opacities => &output.opacities_grad,
            Parameter::Positions => &output.positions_3d_grad,
            Parameter::Rotations => &output.rotations_grad,
            Parameter::Scalings => &output.scalings_grad,
        }
    }

    /// The SH coefficients of degree 0 evaluating to `colors`.
    pub fn colors_sh_of(colors: [f32; 3]) -> [f32; 3] {
        let basis = crate::spherical_harmonics::SH_COEF.0[0] as f32;
        colors.map(|color| (color - 0.5) / basis)
    }

    /// Smooth weights of a linear loss over the pixels in `mask`.
    fn loss_weights(
        view: &View,
        channel_count: usize,
        phase: f32,
        mask: &[bool],
    ) -> Vec<f32> {
        (0..view.image_height)
            .flat_map(|y| {
                (0..view.image_width).flat_map(move |x| {
                    (0..channel_count).map(move |channel| {
                        let pixel = (y * view.image_width + x) as usize;
                        if !mask[pixel] {
                            return 0.0;
                        }
                        (1.0 + (0.3 * x as f32 + channel as f32 + phase).sin())
                            * (1.0 + 0.5 * (0.2 * y as f32).cos())
                    })
                })
            })
            .collect()
    }

    /// Whether every visible point is clearly above or below
    /// [`OPACITY_MIN`](cpu::kernel::rasterize::OPACITY_MIN) at the pixel.
    ///
    /// A point outside its tile footprint is far below it.
    fn pixels_off_opacity_cutoff(
        view: &View,
        state: &PipelineState,
        opacities: &[f32],
    ) -> Vec<bool> {
        use cpu::kernel::rasterize::OPACITY_MIN;

        let band = 0.25 * OPACITY_MIN..4.0 * OPACITY_MIN;
        (0..view.image_height)
            .flat_map(|y| (0..view.image_width).map(move |x| [x as f32, y as f32]))
            .map(|pixel| {
                state.points.iter().zip(opacities).all(|(point, &opacity)| {
                    let [a, b, c] = point.conic;
                    let d = [
                        point.position_2d[0] - pixel[0],
                        point.position_2d[1] - pixel[1],
                    ];
                    let power =
                        -0.5 * (a * d[0] * d[0] + c * d[1] * d[1]) - b * d[0] * d[1];
                    let alpha = opacity * power.min(0.0).exp();
                    !point.is_visible() || !band.contains(&alpha)
                })
            })
            .collect()
    }

    fn dot(
        weights: &[f32],
        values: &[f32],
    ) -> f64 {
        assert_eq!(weights.len(), values.len());
        weights
            .iter()
            .zip(values)
            .map(|(&weight, &value)| weight as f64 * value as f64)
            .sum()
    }

    /// Comparing the gradients of a linear loss with central differences.
    fn check_pipeline_gradients(
        camera_model: CameraModel,
        view: &View,
        splats: &Splats,
        is_depth_rendered: bool,
        parameters: &[(Parameter, f32)],
    ) {
        let channel_count = splats.background.len();
        let config = Gaussian3dRendererConfig::new()
            .with_camera_model(camera_model)
            .with_channel_count(channel_count);
        let options =
            Gaussian3dRenderOptions::new().with_is_depth_rendered(is_depth_rendered);
        let mut renderer = Gaussian3dRenderer::new(config);

        renderer.forward(&splats.input(), view, &options).unwrap();

        // The steps stay away from the discontinuity at the opacity cutoff.
        let mask = pixels_off_opacity_cutoff(view, renderer.state(), &splats.opacities);
        let colors_weights = loss_weights(view, channel_count, 0.0, &mask);
        let depths_weights = loss_weights(view, 1, 1.3, &mask);
        let loss = |renderer: &mut Gaussian3dRenderer, splats: &Splats| {
            let output = renderer.forward(&splats.input(), view, &options).unwrap();
            let depth_loss = output
                .depths_2d
                .map_or(0.0, |depths| dot(&depths_weights, &depths));
            dot(&colors_weights, &output.colors_rgb_2d) + depth_loss
        };

        let radii = renderer.state().radii();
        assert!(radii.iter().all(|&radius| radius > 0), "{radii:?}");
        let output = renderer
            .backward(
                &splats.input(),
                view,
                &options,
                &radii,
                &colors_weights,
                is_depth_rendered.then_some(&depths_weights[..]),
            )
            .unwrap();

        for &(parameter, epsilon) in parameters {
            let analytic = gradient_of(&output, parameter).to_vec();
            let group_max = analytic.iter().fold(0.0_f32, |max, g| max.max(g.abs()));
            assert!(group_max > 0.0, "{parameter:?}: {analytic:?}");

            for (index, &analytic) in analytic.iter().enumerate() {
                let mut splats_p = splats.clone();
                let mut splats_n = splats.clone();
                splats_p.parameter_mut(parameter)[index] += epsilon;
                splats_n.parameter_mut(parameter)[index] -= epsilon;
                let delta = splats_p.parameter_mut(parameter)[index] as f64
                    - splats_n.parameter_mut(parameter)[index] as f64;
                let loss_p = loss(&mut renderer, &splats_p);
                let loss_n = loss(&mut renderer, &splats_n);
                let numeric = ((loss_p - loss_n) / delta) as f32;

                let tolerance =
                    0.1 * analytic.abs().max(numeric.abs()) + 0.03 * group_max + 1e-3;
                assert!(
                    (analytic - numeric).abs() <= tolerance,
                    "{parameter:?}[{index}]: analytic: {analytic}, numeric: {numeric}"
                );
            }
        }
    }

    /// Three overlapping anisotropic splats in front of the camera.
    fn splats_front(
        background: &[f32],
        colors_sh_count: usize,
    ) -> Splats {
        let mut rng = StdRng::seed_from_u64(0x3d);
        let mut colors_sh = || {
            (0..colors_sh_count * 3)
                .map(|k| {
                    if k < 3 {
                        rng.gen_range(0.3..0.6)
                    } else {
                        rng.gen_range(-0.1..0.1)
                    }
                })
                .collect::<Vec<f32>>()
        };
        let mut splats = Splats::new(background, colors_sh_count);
        splats
            .push(
                [0.2, -0.1, 5.0],
                [0.35, 0.2, 0.25],
                [0.1, 0.3, -0.2, 0.9],
                0.3,
                &colors_sh(),
            )
            .push(
                [-0.5, 0.3, 5.5],
                [0.25, 0.4, 0.3],
                [-0.3, 0.1, 0.2, 0.8],
                0.25,
                &colors_sh(),
            )
            .push(
                [0.6, 0.5, 4.5],
                [0.3, 0.3, 0.15],
                [0.2, -0.1, 0.4, 0.85],
                0.2,
                &colors_sh(),
            );
        splats
    }

    /// Random splats in front of the camera.
    fn splats_random(
        point_count: usize,
        seed: u64,
    ) -> Splats {
        let mut rng = StdRng::seed_from_u64(seed);
        let colors_sh_distribution = Normal::new(0.0, 0.3).unwrap();
        let mut splats = Splats::new(&[0.1, 0.2, 0.3], 4);
        for _ in 0..point_count {
            let position = [
                rng.gen_range(-2.0..2.0),
                rng.gen_range(-1.5..1.5),
                rng.gen_range(3.0..8.0),
            ];
            let scaling = [(); 3].map(|_| rng.gen_range(0.02..0.4));
            let rotation = [(); 4].map(|_| rng.gen_range(-1.0..1.0));
            let colors_sh = colors_sh_distribution
                .sample_iter(&mut rng)
                .take(12)
                .collect::<Vec<f32>>();
            splats.push(
                position,
                scaling,
                rotation,
                rng.gen_range(0.05..1.0),
                &colors_sh,
            );
        }
        splats
    }

    #[test]
    fn single_splat_at_center() {
        use super::*;
        use cpu::kernel::rasterize::OPACITY_MAX;

        let view = view_front(63, 63);
        let background = [0.1, 0.2, 0.3];
        let colors = [0.9, 0.5, 0.1];
        let mut splats = Splats::new(&background, 1);
        splats.push(
            [0.0, 0.0, 5.0],
            [0.05; 3],
            [0.0, 0.0, 0.0, 1.0],
            1.0,
            &colors_sh_of(colors),
        );

        let mut renderer = Gaussian3dRenderer::default();
        let output = renderer
            .forward(&splats.input(), &view, &Default::default())
            .unwrap();

        assert_eq!(output.radii, [3]);
        assert_eq!(output.tile_point_count, 4);
        assert_eq!(output.depths_2d, None);
        assert_eq!(output.colors_rgb_2d.len(), 63 * 63 * 3);

        let pixel = 31 * 63 + 31;
        for channel in 0..3 {
            let output = output.colors_rgb_2d[pixel * 3 + channel];
            let target =
                OPACITY_MAX * colors[channel] + (1.0 - OPACITY_MAX) * background[channel];
            assert_abs_diff_eq!(output, target, epsilon = 1e-5);
        }
        assert_eq!(output.colors_rgb_2d[..3], background);
        assert_eq!(output.colors_rgb_2d[(63 * 63 - 1) * 3..], background);
    }

    #[test]
    fn splats_composited_by_depth() {
        use super::*;

        let view = view_front(63, 63);
        let background = [0.0, 0.0, 1.0];
        let color_near = [1.0, 0.0, 0.0];
        let color_far = [0.0, 1.0, 0.0];
        let mut splats = Splats::new(&background, 1);
        splats
            .push(
                [0.0, 0.0, 4.0],
                [0.1; 3],
                [0.0, 0.0, 0.0, 1.0],
                0.5,
                &colors_sh_of(color_near),
            )
            .push(
                [0.0, 0.0, 6.0],
                [0.1; 3],
                [0.0, 0.0, 0.0, 1.0],
                0.5,
                &colors_sh_of(color_far),
            );
        let mut splats_swapped = Splats::new(&background, 1);
        splats_swapped
            .push(
                [0.0, 0.0, 6.0],
                [0.1; 3],
                [0.0, 0.0, 0.0, 1.0],
                0.5,
                &colors_sh_of(color_far),
            )
            .push(
                [0.0, 0.0, 4.0],
                [0.1; 3],
                [0.0, 0.0, 0.0, 1.0],
                0.5,
                &colors_sh_of(color_near),
            );

        let mut renderer = Gaussian3dRenderer::default();
        let options = Gaussian3dRenderOptions::default();
        let output = renderer.forward(&splats.input(), &view, &options).unwrap();
        let output_swapped = renderer
            .forward(&splats_swapped.input(), &view, &options)
            .unwrap();

        let pixel = 31 * 63 + 31;
        let target = [0.5, 0.25, 0.25];
        for (output, target) in output.colors_rgb_2d[pixel * 3..][..3].iter().zip(target) {
            assert_abs_diff_eq!(*output, target, epsilon = 1e-5);
        }
        assert_eq!(output.colors_rgb_2d, output_swapped.colors_rgb_2d);
        assert_eq!(
            output.radii,
            output_swapped.radii.iter().rev().copied().collect::<Vec<_>>()
        );

        // The far green splat comes to the front.
        let mut splats_depth_swapped = splats.clone();
        splats_depth_swapped.positions.swap(2, 5);
        let output = renderer
            .forward(&splats_depth_swapped.input(), &view, &options)
            .unwrap();
        let target = [0.25, 0.5, 0.25];
        for (output, target) in output.colors_rgb_2d[pixel * 3..][..3].iter().zip(target) {
            assert_abs_diff_eq!(*output, target, epsilon = 1e-5);
        }
    }

    #[test]
    fn forward_is_deterministic() {
        use super::*;

        let view = view_front(64, 48);
        let splats = splats_random(200, 1);
        let options = Gaussian3dRenderOptions::new().with_is_depth_rendered(true);

        let mut renderer = Gaussian3dRenderer::default();
        let output_1 = renderer.forward(&splats.input(), &view, &options).unwrap();
        let output_2 = renderer.forward(&splats.input(), &view, &options).unwrap();
        let output_3 = Gaussian3dRenderer::new(
            Gaussian3dRendererConfig::new().with_resize_multiplier(1.0),
        )
        .forward(&splats.input(), &view, &options)
        .unwrap();

        assert_eq!(output_1, output_2);
        assert_eq!(output_1, output_3);
    }

    #[test]
    fn tile_points_are_partitioned() {
        use super::*;

        let view = view_front(64, 48);
        let splats = splats_random(300, 2);
        let mut renderer = Gaussian3dRenderer::default();
        let output = renderer
            .forward(&splats.input(), &view, &Default::default())
            .unwrap();
        let state = renderer.state();

        let tile_point_count = output.tile_point_count;
        assert!(tile_point_count > 0);
        assert_eq!(state.tile_point_count, tile_point_count);
        assert_eq!(
            state
                .points
                .iter()
                .map(|point| point.tile_touched_count as usize)
                .sum::<usize>(),
            tile_point_count
        );

        // The keys are sorted and each tile owns its range.
        assert!(state.point_orders.windows(2).all(|keys| keys[0] <= keys[1]));
        let mut range_end = 0;
        for (tile_index, &[start, end]) in state.tile_point_ranges.iter().enumerate() {
            assert!(start <= end);
            if start == end {
                continue;
            }
            assert_eq!(start, range_end, "tile {tile_index}");
            range_end = end;
            for &key in &state.point_orders[start as usize..end as usize] {
                assert_eq!((key >> 32) as usize, tile_index);
            }
        }
        assert_eq!(range_end as usize, tile_point_count);

        // Each point appears once per touched tile.
        let mut counts = vec![0; state.point_count];
        state
            .point_indices
            .iter()
            .for_each(|&index| counts[index as usize] += 1);
        for (point, count) in state.points.iter().zip(counts) {
            assert_eq!(point.tile_touched_count, count);
        }
    }

    #[test]
    fn invisible_splats_are_skipped() {
        use super::*;

        let view = view_front(40, 30);
        let background = [0.25, 0.5, 0.75];
        let mut splats = Splats::new(&background, 1);
        splats
            .push(
                [0.0, 0.0, -5.0],
                [0.3; 3],
                [0.0, 0.0, 0.0, 1.0],
                0.9,
                &colors_sh_of([1.0; 3]),
            )
            .push(
                [0.0, 0.0, 0.1],
                [0.3; 3],
                [0.0, 0.0, 0.0, 1.0],
                0.9,
                &colors_sh_of([1.0; 3]),
            );

        let mut renderer = Gaussian3dRenderer::default();
        let options = Gaussian3dRenderOptions::default();
        let output = renderer.forward(&splats.input(), &view, &options).unwrap();
        assert_eq!(output.radii, [0, 0]);
        assert_eq!(output.tile_point_count, 0);
        assert!(output
            .colors_rgb_2d
            .chunks_exact(3)
            .all(|colors| colors == background));

        let colors_rgb_2d_grad = vec![1.0; output.colors_rgb_2d.len()];
        let grads = renderer
            .backward(
                &splats.input(),
                &view,
                &options,
                &output.radii,
                &colors_rgb_2d_grad,
                None,
            )
            .unwrap();
        assert!(grads.positions_3d_grad.iter().all(|&g| g == 0.0));
        assert!(grads.opacities_grad.iter().all(|&g| g == 0.0));
        assert!(grads.colors_sh_grad.iter().all(|&g| g == 0.0));
    }

    #[test]
    fn zero_image_gradient_gives_zero_gradients() {
        use super::*;

        let view = view_front(64, 48);
        let splats = splats_random(50, 3);
        let mut renderer = Gaussian3dRenderer::default();
        let options = Gaussian3dRenderOptions::new().with_is_depth_rendered(true);
        let output = renderer.forward(&splats.input(), &view, &options).unwrap();

        let colors_rgb_2d_grad = vec![0.0; output.colors_rgb_2d.len()];
        let depths_2d_grad = vec![0.0; view.pixel_count()];
        let grads = renderer
            .backward(
                &splats.input(),
                &view,
                &options,
                &output.radii,
                &colors_rgb_2d_grad,
                Some(&depths_2d_grad),
            )
            .unwrap();

        for grad in [
            &grads.colors_rgb_3d_grad,
            &grads.colors_sh_grad,
            &grads.conics_grad,
            &grads.covariances_3d_grad,
            &grads.opacities_grad,
            &grads.positions_2d_grad,
            &grads.positions_2d_grad_norm,
            &grads.positions_3d_grad,
            &grads.rotations_grad,
            &grads.scalings_grad,
        ] {
            assert!(grad.iter().all(|&g| g == 0.0), "{grad:?}");
        }
        assert_eq!(grads.colors_sh_grad.len(), 50 * 4 * 3);
        assert_eq!(grads.rotations_grad.len(), 50 * 4);
    }

    #[test]
    fn gradients_perspective() {
        use super::*;

        let view = view_front(48, 48);
        let splats = splats_front(&[0.2, 0.1, 0.3], 16);
        check_pipeline_gradients(
            CameraModel::Perspective,
            &view,
            &splats,
            false,
            &[
                (Parameter::Positions, 1e-2),
                (Parameter::Scalings, 2e-3),
                (Parameter::Rotations, 1e-2),
                (Parameter::Opacities, 1e-2),
                (Parameter::ColorsSh, 1e-2),
            ],
        );
    }

    #[test]
    fn gradients_spherical() {
        use super::*;

        let view = view_front(96, 48);
        let mut splats = Splats::new(&[0.3, 0.2, 0.1], 4);
        let colors_sh = [
            0.4, 0.3, 0.5, 0.05, -0.05, 0.02, 0.03, 0.04, -0.02, -0.03, 0.01, 0.05,
        ];
        splats
            .push(
                [0.5, 0.2, 4.0],
                [0.5, 0.3, 0.4],
                [0.1, 0.3, -0.2, 0.9],
                0.3,
                &colors_sh,
            )
            .push(
                [-0.8, -0.4, 3.5],
                [0.3, 0.6, 0.4],
                [-0.3, 0.1, 0.2, 0.8],
                0.25,
                &colors_sh,
            )
            .push(
                [0.3, -0.6, 4.2],
                [0.4, 0.4, 0.2],
                [0.2, -0.1, 0.4, 0.85],
                0.2,
                &colors_sh,
            );
        check_pipeline_gradients(
            CameraModel::Spherical,
            &view,
            &splats,
            true,
            &[
                (Parameter::Positions, 1e-2),
                (Parameter::Scalings, 2e-3),
                (Parameter::Rotations, 1e-2),
                (Parameter::Opacities, 1e-2),
                (Parameter::ColorsSh, 1e-2),
            ],
        );
    }

    #[test]
    fn gradients_precomputed() {
        use super::*;

        let view = view_front(48, 48);
        let mut splats = splats_front(&[0.2, 0.1, 0.3, 0.4], 1);
        splats.colors_rgb_precomputed = Some(vec![
            0.9, 0.2, 0.4, 0.6, 0.1, 0.8, 0.3, 0.5, 0.7, 0.6, 0.2, 0.9,
        ]);
        splats.covariances_3d_precomputed = Some(vec![
            0.09, 0.01, 0.0, 0.06, 0.005, 0.05, 0.05, -0.02, 0.01, 0.1, 0.0, 0.07, 0.08,
            0.0, -0.01, 0.04, 0.01, 0.03,
        ]);
        check_pipeline_gradients(
            CameraModel::Perspective,
            &view,
            &splats,
            false,
            &[
                (Parameter::Positions, 1e-2),
                (Parameter::Covariances3d, 2e-3),
                (Parameter::Opacities, 1e-2),
                (Parameter::ColorsRgb, 1e-2),
            ],
        );
    }

    #[test]
    fn gradients_depth() {
        use super::*;

        let view = view_front(48, 48);
        let splats = splats_front(&[0.2, 0.1, 0.3], 4);
        check_pipeline_gradients(
            CameraModel::Perspective,
            &view,
            &splats,
            true,
            &[
                (Parameter::Positions, 1e-2),
                (Parameter::Scalings, 2e-3),
                (Parameter::Opacities, 1e-2),
            ],
        );
    }

    #[test]
    fn depths_rendered() {
        use super::*;

        let view = view_front(63, 63);
        let mut splats = Splats::new(&[0.0; 3], 1);
        splats.push(
            [0.0, 0.0, 5.0],
            [0.05; 3],
            [0.0, 0.0, 0.0, 1.0],
            1.0,
            &colors_sh_of([0.5; 3]),
        );
        let options = Gaussian3dRenderOptions::new().with_is_depth_rendered(true);

        let mut renderer = Gaussian3dRenderer::default();
        let output = renderer.forward(&splats.input(), &view, &options).unwrap();
        let depths_2d = output.depths_2d.unwrap();
        assert_eq!(output.colors_rgb_2d.len(), 63 * 63 * 3);
        assert_eq!(depths_2d.len(), 63 * 63);
        assert_abs_diff_eq!(depths_2d[31 * 63 + 31], 4.95, epsilon = 1e-4);
        assert_eq!(depths_2d[0], 0.0);

        let mut renderer = Gaussian3dRenderer::new(
            Gaussian3dRendererConfig::new().with_camera_model(CameraModel::Spherical),
        );
        // The splat is ahead at the center pixel.
        let view = view_front(65, 33);
        let output = renderer.forward(&splats.input(), &view, &options).unwrap();
        let depths_2d = output.depths_2d.unwrap();
        assert_abs_diff_eq!(depths_2d[16 * 65 + 32], 4.95, epsilon = 1e-4);
    }

    #[test]
    fn invalid_input_fails() {
        use super::*;

        let view = view_front(32, 32);
        let mut splats = Splats::new(&[0.0; 3], 1);
        splats.push(
            [0.0, 0.0, -5.0],
            [0.1; 3],
            [0.0, 0.0, 0.0, 1.0],
            0.5,
            &[0.0; 3],
        );

        // Prefiltered points should be in frustum.
        let options = Gaussian3dRenderOptions::new().with_is_prefiltered(true);
        let result = Gaussian3dRenderer::default().forward(&splats.input(), &view, &options);
        assert!(matches!(result, Err(Error::Validation(..))), "{result:?}");

        // SH colors have three channels.
        let mut renderer =
            Gaussian3dRenderer::new(Gaussian3dRendererConfig::new().with_channel_count(4));
        let result = renderer.forward(&splats.input(), &view, &Default::default());
        assert!(matches!(result, Err(Error::Validation(..))), "{result:?}");

        // Mismatched lengths
        let mut splats_short = splats.clone();
        splats_short.opacities.clear();
        let result = Gaussian3dRenderer::default().forward(
            &splats_short.input(),
            &view,
            &Default::default(),
        );
        assert!(matches!(result, Err(Error::Validation(..))), "{result:?}");

        // Empty image
        let result = Gaussian3dRenderer::default().forward(
            &splats.input(),
            &view_front(0, 32),
            &Default::default(),
        );
        assert!(matches!(result, Err(Error::Validation(..))), "{result:?}");
    }

    #[test]
    fn zero_scaling_keeps_filter_footprint() {
        use super::*;

        let view = view_front(63, 63);
        let background = [0.0, 0.5, 1.0];
        let colors = [1.0, 0.5, 0.0];
        let mut splats = Splats::new(&background, 1);
        splats.push(
            [0.0, 0.0, 5.0],
            [0.0; 3],
            [0.3, 0.0, 0.1, 0.9],
            0.5,
            &colors_sh_of(colors),
        );
        let mut renderer = Gaussian3dRenderer::default();
        let options = Gaussian3dRenderOptions::default();
        let output = renderer.forward(&splats.input(), &view, &options).unwrap();
        assert_eq!(output.radii, [3]);

        let pixel = 31 * 63 + 31;
        for channel in 0..3 {
            let output = output.colors_rgb_2d[pixel * 3 + channel];
            let target = 0.5 * colors[channel] + 0.5 * background[channel];
            assert_abs_diff_eq!(output, target, epsilon = 1e-5);
        }

        let colors_rgb_2d_grad = loss_weights(&view, 3, 0.0, &[true; 63 * 63]);
        let grads = renderer
            .backward(
                &splats.input(),
                &view,
                &options,
                &output.radii,
                &colors_rgb_2d_grad,
                None,
            )
            .unwrap();
        assert!(grads.positions_3d_grad.iter().all(|g| g.is_finite()));
        assert!(grads.opacities_grad[0] != 0.0);
        assert_eq!(grads.scalings_grad, [0.0; 3]);
        assert_eq!(grads.rotations_grad, [0.0; 4]);
    }

    #[test]
    fn empty_splats() {
        use super::*;

        let view = view_front(20, 10);
        let background = [0.25, 0.5, 0.75];
        let splats = Splats::new(&background, 1);
        let mut renderer = Gaussian3dRenderer::default();
        let options = Gaussian3dRenderOptions::default();
        let output = renderer.forward(&splats.input(), &view, &options).unwrap();

        assert_eq!(output.colors_rgb_2d, background.repeat(200));
        assert!(output.radii.is_empty());
        assert_eq!(output.tile_point_count, 0);

        let grads = renderer
            .backward(
                &splats.input(),
                &view,
                &options,
                &output.radii,
                &vec![1.0; 600],
                None,
            )
            .unwrap();
        assert_eq!(grads, backward::RenderOutput::default());
    }

    #[test]
    fn mark_visible() {
        use super::*;

        let view = view_front(32, 32);
        let positions = [0.0, 0.0, 5.0, 0.0, 0.0, -5.0, 0.0, 5.0, 0.0, 0.0, 0.0, 0.1];

        let output =
            Gaussian3dRenderer::mark_visible(&positions, &view, CameraModel::Perspective);
        assert_eq!(output, [true, false, false, false]);

        let output =
            Gaussian3dRenderer::mark_visible(&positions, &view, CameraModel::Spherical);
        assert_eq!(output, [true, true, false, false]);
    }

    #[test]
    fn state_grows_with_points() {
        use super::*;

        let view = view_front(64, 48);
        let mut renderer = Gaussian3dRenderer::default();
        renderer
            .forward(&splats_random(10, 4).input(), &view, &Default::default())
            .unwrap();
        let size_small = renderer.state().size();
        renderer
            .forward(&splats_random(500, 5).input(), &view, &Default::default())
            .unwrap();
        let size_large = renderer.state().size();
        renderer
            .forward(&splats_random(10, 4).input(), &view, &Default::default())
            .unwrap();

        assert!(size_small < size_large);
        assert_eq!(renderer.state().size(), size_large);
        assert!(!renderer.state().size_readable().is_empty());
    }
}
