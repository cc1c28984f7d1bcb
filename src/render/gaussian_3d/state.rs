//! Scratch state of the pipeline.

pub use super::*;

use humansize::{format_size, BINARY};
use std::{
    mem::size_of,
    ops::{Deref, DerefMut},
};

/// A growable buffer reused across calls.
///
/// The capacity grows by a multiplier and never shrinks,
/// while the length always equals the last requested one.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScratchBuffer<T> {
    inner: Vec<T>,
}

impl<T: Clone + Default> ScratchBuffer<T> {
    /// Resetting the buffer to `len` default values.
    ///
    /// If the capacity is insufficient,
    /// it is grown to `ceil(len * multiplier)`.
    pub fn ensure_capacity(
        &mut self,
        len: usize,
        multiplier: f64,
        name: &str,
    ) -> Result<(), Error> {
        self.inner.clear();

        let capacity_old = self.inner.capacity();
        if capacity_old < len {
            let capacity = ((len as f64 * multiplier).ceil() as usize).max(len);
            self.inner.try_reserve_exact(capacity)?;

            log::info!(
                target: "gausplat::rasterizer::gaussian_3d::state",
                "{name} grows from {} to {}",
                format_size(capacity_old * size_of::<T>(), BINARY.decimal_places(1)),
                format_size(
                    self.inner.capacity() * size_of::<T>(),
                    BINARY.decimal_places(1)
                ),
            );
        }

        self.inner.resize(len, T::default());
        Ok(())
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    /// Size of the allocation in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.capacity() * size_of::<T>()
    }
}

impl<T> Deref for ScratchBuffer<T> {
    type Target = [T];

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<T> DerefMut for ScratchBuffer<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

/// The derived state of a point.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PointState {
    /// `Σ'^-1 <- [a, b, c]`
    pub conic: [f32; 3],
    /// `Σ <- [xx, xy, xz, yy, yz, zz]`
    pub covariance_3d: [f32; 6],
    /// The sorting depth.
    pub depth: f32,
    /// `|P_v|`
    pub distance: f32,
    pub is_colors_not_clamped: [bool; 3],
    /// `P'` in pixels
    pub position_2d: [f32; 2],
    /// `0` if invisible.
    pub radius: u32,
    /// `[x_min, y_min, x_max, y_max)`
    pub tile_bounds: [u32; 4],
    pub tile_touched_count: u32,
}

impl PointState {
    #[inline]
    pub const fn is_visible(&self) -> bool {
        self.radius != 0
    }
}

/// The state written by the forward pass and read by the backward pass.
#[derive(Clone, Debug, Default)]
pub struct PipelineState {
    /// `C`
    pub channel_count: usize,
    /// `F <- C (+ 1)`
    ///
    /// The extra feature is the distance if the depth is rendered.
    pub feature_count: usize,
    /// `[P, F]`
    pub features: ScratchBuffer<f32>,
    /// `I_x`
    pub image_size_x: u32,
    /// `I_y`
    pub image_size_y: u32,
    pub is_depth_rendered: bool,
    /// `P`
    pub point_count: usize,
    /// `[T]`
    pub point_indices: ScratchBuffer<u32>,
    /// `[T]`
    pub point_indices_swap: ScratchBuffer<u32>,
    /// `[T]`
    pub point_orders: ScratchBuffer<u64>,
    /// `[T]`
    pub point_orders_swap: ScratchBuffer<u64>,
    /// `[I_y, I_x]`
    pub point_rendered_counts: ScratchBuffer<u32>,
    /// `[P]`
    pub points: ScratchBuffer<PointState>,
    /// The growth factor of the buffers.
    pub resize_multiplier: f64,
    /// `I_x / T_x`
    pub tile_count_x: u32,
    /// `I_y / T_y`
    pub tile_count_y: u32,
    /// `T`
    pub tile_point_count: usize,
    /// `[I_y / T_y * I_x / T_x, 2]`
    pub tile_point_ranges: ScratchBuffer<[u32; 2]>,
    /// `[P]`
    pub tile_touched_offsets: ScratchBuffer<u32>,
    /// `[I_y, I_x]`
    pub transmittances: ScratchBuffer<f32>,
    /// The view of the last forward pass.
    pub view: View,
}

impl PipelineState {
    pub fn new(resize_multiplier: f64) -> Self {
        Self {
            resize_multiplier,
            ..Default::default()
        }
    }

    /// Preparing the buffers of points, tiles and pixels for a forward pass.
    pub fn ensure_frame(
        &mut self,
        point_count: usize,
        view: &View,
        channel_count: usize,
        is_depth_rendered: bool,
    ) -> Result<(), Error> {
        let multiplier = self.resize_multiplier;
        let image_size_x = view.image_width;
        let image_size_y = view.image_height;
        let tile_count_x = image_size_x.div_ceil(TILE_SIZE_X);
        let tile_count_y = image_size_y.div_ceil(TILE_SIZE_Y);
        let tile_count = tile_count_x as usize * tile_count_y as usize;
        let pixel_count = view.pixel_count();
        let feature_count = channel_count + is_depth_rendered as usize;

        self.channel_count = channel_count;
        self.feature_count = feature_count;
        self.image_size_x = image_size_x;
        self.image_size_y = image_size_y;
        self.is_depth_rendered = is_depth_rendered;
        self.point_count = point_count;
        self.tile_count_x = tile_count_x;
        self.tile_count_y = tile_count_y;
        self.tile_point_count = 0;
        self.view = *view;

        self.points.ensure_capacity(point_count, multiplier, "points")?;
        self.features
            .ensure_capacity(point_count * feature_count, multiplier, "features")?;
        self.tile_touched_offsets.ensure_capacity(
            point_count,
            multiplier,
            "tile_touched_offsets",
        )?;
        self.tile_point_ranges.ensure_capacity(
            tile_count,
            multiplier,
            "tile_point_ranges",
        )?;
        self.transmittances
            .ensure_capacity(pixel_count, multiplier, "transmittances")?;
        self.point_rendered_counts.ensure_capacity(
            pixel_count,
            multiplier,
            "point_rendered_counts",
        )?;

        Ok(())
    }

    /// Preparing the binning buffers for `T` instances.
    pub fn ensure_tile_points(
        &mut self,
        tile_point_count: usize,
    ) -> Result<(), Error> {
        let multiplier = self.resize_multiplier;
        self.tile_point_count = tile_point_count;

        self.point_orders
            .ensure_capacity(tile_point_count, multiplier, "point_orders")?;
        self.point_indices
            .ensure_capacity(tile_point_count, multiplier, "point_indices")?;
        self.point_orders_swap.ensure_capacity(
            tile_point_count,
            multiplier,
            "point_orders_swap",
        )?;
        self.point_indices_swap.ensure_capacity(
            tile_point_count,
            multiplier,
            "point_indices_swap",
        )?;

        Ok(())
    }

    /// Size of all the buffers in bytes.
    pub fn size(&self) -> usize {
        self.features.size()
            + self.point_indices.size()
            + self.point_indices_swap.size()
            + self.point_orders.size()
            + self.point_orders_swap.size()
            + self.point_rendered_counts.size()
            + self.points.size()
            + self.tile_point_ranges.size()
            + self.tile_touched_offsets.size()
            + self.transmittances.size()
    }

    /// Readable size of all the buffers.
    #[inline]
    pub fn size_readable(&self) -> String {
        format_size(self.size(), BINARY.decimal_places(1))
    }

    /// `[P]`
    pub fn radii(&self) -> Vec<u32> {
        self.points.iter().map(|point| point.radius).collect()
    }
}
