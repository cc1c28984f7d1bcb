//! Rendering the splats stored in burn tensors.
//!
//! The tensors are read into host buffers for the CPU pipeline,
//! and the outputs are written back to the device of the splats.

pub use super::*;
pub use burn::tensor::{backend::Backend, Int, Tensor, TensorData};

use std::fmt;

/// The splats on a burn device.
#[derive(Clone)]
pub struct Gaussian3dTensors<B: Backend> {
    /// `[P, M, 3]`
    pub colors_sh: Tensor<B, 3>,
    /// `[P, 1]`
    pub opacities: Tensor<B, 2>,
    /// `[P, 3]`
    pub positions: Tensor<B, 2>,
    /// `[P, 4]`
    pub rotations: Tensor<B, 2>,
    /// `[P, 3]`
    pub scalings: Tensor<B, 2>,
}

#[derive(Clone, Debug)]
pub struct Gaussian3dTensorsOutput<B: Backend> {
    /// `[I_y, I_x, C]`
    pub colors_rgb_2d: Tensor<B, 3>,
    /// `[I_y, I_x]`
    pub depths_2d: Option<Tensor<B, 2>>,
    /// `[P]`
    pub radii: Tensor<B, 1, Int>,
    /// `T`
    pub tile_point_count: usize,
}

/// The gradients of the splats, shaped as [`Gaussian3dTensors`].
#[derive(Clone, Debug)]
pub struct Gaussian3dTensorsGradients<B: Backend> {
    /// `[P, M, 3]`
    pub colors_sh: Tensor<B, 3>,
    /// `[P, 1]`
    pub opacities: Tensor<B, 2>,
    /// `[P, 3]`
    pub positions: Tensor<B, 2>,
    /// `[P]`
    pub positions_2d_grad_norm: Tensor<B, 1>,
    /// `[P, 4]`
    pub rotations: Tensor<B, 2>,
    /// `[P, 3]`
    pub scalings: Tensor<B, 2>,
}

/// The splats read back to the host.
#[derive(Clone, Debug, Default)]
struct HostSplats {
    colors_sh: Vec<f32>,
    colors_sh_count: usize,
    opacities: Vec<f32>,
    point_count: usize,
    positions: Vec<f32>,
    rotations: Vec<f32>,
    scalings: Vec<f32>,
}

impl<B: Backend> Gaussian3dTensors<B> {
    /// `P`
    #[inline]
    pub fn point_count(&self) -> usize {
        self.positions.dims()[0]
    }

    #[inline]
    pub fn device(&self) -> B::Device {
        self.positions.device()
    }

    /// Rendering the splats with the scaling modifier of `1`.
    ///
    /// ## Arguments
    ///
    /// * `background` - `[C]`
    pub fn render(
        &self,
        renderer: &mut Gaussian3dRenderer,
        view: &View,
        options: &Gaussian3dRenderOptions,
        background: &[f32],
    ) -> Result<Gaussian3dTensorsOutput<B>, Error> {
        let splats = self.to_host()?;
        let output = renderer.forward(&splats.input(background), view, options)?;

        let device = self.device();
        let image_size_x = view.image_width as usize;
        let image_size_y = view.image_height as usize;
        let channel_count = renderer.config().channel_count;

        Ok(Gaussian3dTensorsOutput {
            colors_rgb_2d: tensor_from_vec(
                output.colors_rgb_2d,
                [image_size_y, image_size_x, channel_count],
                &device,
            ),
            depths_2d: output.depths_2d.map(|depths| {
                tensor_from_vec(depths, [image_size_y, image_size_x], &device)
            }),
            radii: Tensor::from_data(
                TensorData::new(output.radii, [splats.point_count])
                    .convert::<B::IntElem>(),
                &device,
            ),
            tile_point_count: output.tile_point_count,
        })
    }

    /// Computing the gradients of the splats after [`Self::render`].
    ///
    /// ## Arguments
    ///
    /// * `colors_rgb_2d_grad` - `[I_y, I_x, C]`
    /// * `depths_2d_grad` - `[I_y, I_x]`
    pub fn render_backward(
        &self,
        renderer: &Gaussian3dRenderer,
        view: &View,
        options: &Gaussian3dRenderOptions,
        background: &[f32],
        colors_rgb_2d_grad: Tensor<B, 3>,
        depths_2d_grad: Option<Tensor<B, 2>>,
    ) -> Result<Gaussian3dTensorsGradients<B>, Error> {
        let splats = self.to_host()?;
        let radii = renderer.state().radii();
        let colors_rgb_2d_grad = vec_from_tensor(colors_rgb_2d_grad)?;
        let depths_2d_grad = depths_2d_grad.map(vec_from_tensor).transpose()?;

        let grads = renderer.backward(
            &splats.input(background),
            view,
            options,
            &radii,
            &colors_rgb_2d_grad,
            depths_2d_grad.as_deref(),
        )?;

        let device = self.device();
        // P
        let point_count = splats.point_count;

        Ok(Gaussian3dTensorsGradients {
            colors_sh: tensor_from_vec(
                grads.colors_sh_grad,
                [point_count, splats.colors_sh_count, 3],
                &device,
            ),
            opacities: tensor_from_vec(grads.opacities_grad, [point_count, 1], &device),
            positions: tensor_from_vec(
                grads.positions_3d_grad,
                [point_count, 3],
                &device,
            ),
            positions_2d_grad_norm: tensor_from_vec(
                grads.positions_2d_grad_norm,
                [point_count],
                &device,
            ),
            rotations: tensor_from_vec(grads.rotations_grad, [point_count, 4], &device),
            scalings: tensor_from_vec(grads.scalings_grad, [point_count, 3], &device),
        })
    }

    fn to_host(&self) -> Result<HostSplats, Error> {
        let [point_count, colors_sh_count, _] = self.colors_sh.dims();

        Ok(HostSplats {
            colors_sh: vec_from_tensor(self.colors_sh.clone())?,
            colors_sh_count,
            opacities: vec_from_tensor(self.opacities.clone())?,
            point_count,
            positions: vec_from_tensor(self.positions.clone())?,
            rotations: vec_from_tensor(self.rotations.clone())?,
            scalings: vec_from_tensor(self.scalings.clone())?,
        })
    }
}

impl HostSplats {
    fn input<'a>(
        &'a self,
        background: &'a [f32],
    ) -> forward::RenderInput<'a> {
        forward::RenderInput {
            background,
            colors_sh: Some(&self.colors_sh),
            colors_sh_count: self.colors_sh_count,
            opacities: &self.opacities,
            point_count: self.point_count,
            positions: &self.positions,
            rotations: &self.rotations,
            scaling_modifier: 1.0,
            scalings: &self.scalings,
            ..Default::default()
        }
    }
}

impl<B: Backend> fmt::Debug for Gaussian3dTensors<B> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter,
    ) -> fmt::Result {
        f.debug_struct("Gaussian3dTensors")
            .field("device", &self.device())
            .field("colors_sh.dims()", &self.colors_sh.dims())
            .field("opacities.dims()", &self.opacities.dims())
            .field("positions.dims()", &self.positions.dims())
            .field("rotations.dims()", &self.rotations.dims())
            .field("scalings.dims()", &self.scalings.dims())
            .finish()
    }
}

fn vec_from_tensor<B: Backend, const D: usize>(
    tensor: Tensor<B, D>,
) -> Result<Vec<f32>, Error> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| Error::Tensor(format!("{e:?}")))
}

fn tensor_from_vec<B: Backend, const D: usize>(
    values: Vec<f32>,
    shape: [usize; D],
    device: &B::Device,
) -> Tensor<B, D> {
    Tensor::from_data(TensorData::new(values, shape).convert::<B::FloatElem>(), device)
}
