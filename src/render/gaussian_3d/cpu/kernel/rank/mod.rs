//! Ranking the points.

pub use super::*;

use std::mem;

/// Arguments.
#[derive(Clone, Copy, Debug)]
pub struct Arguments {
    /// `I_x / T_x`
    pub tile_count_x: u32,
}

/// Inputs.
#[derive(Clone, Copy, Debug)]
pub struct Inputs<'a> {
    /// `[P]`
    pub points: &'a [PointState],
    /// `[P]`
    pub tile_touched_offsets: &'a [u32],
}

/// Outputs.
#[derive(Debug)]
pub struct Outputs<'a> {
    /// `[T]`
    pub point_indices: &'a mut [u32],
    /// `[T]`
    pub point_orders: &'a mut [u64],
}

/// Maximum of `(I_y / T_y) * (I_x / T_x)`
pub const TILE_COUNT_MAX: u32 = 1 << 16;

/// Ranking the points.
///
/// Each visible point writes one instance per touched tile
/// at its offset in row-major tile order.
/// The order of an instance is `tile_index << 32 | depth_bits`.
pub fn main(
    arguments: Arguments,
    inputs: Inputs,
    outputs: Outputs,
) {
    // Splitting the outputs into the slices of points

    let mut slices = Vec::with_capacity(inputs.points.len());
    let mut point_indices = outputs.point_indices;
    let mut point_orders = outputs.point_orders;
    let mut offset_next = 0;
    for (point, &offset) in inputs.points.iter().zip(inputs.tile_touched_offsets) {
        let count = point.tile_touched_count as usize;
        debug_assert_eq!(offset as usize, offset_next);
        offset_next += count;

        let (indices_head, indices_tail) = mem::take(&mut point_indices).split_at_mut(count);
        let (orders_head, orders_tail) = mem::take(&mut point_orders).split_at_mut(count);
        slices.push((point, indices_head, orders_head));
        point_indices = indices_tail;
        point_orders = orders_tail;
    }
    debug_assert!(point_indices.is_empty());
    debug_assert!(point_orders.is_empty());

    slices
        .into_par_iter()
        .enumerate()
        .for_each(|(index, (point, indices, orders))| {
            if !point.is_visible() {
                return;
            }

            let depth_bits = depth_to_key_bits(point.depth) as u64;
            let [x_min, y_min, x_max, y_max] = point.tile_bounds;
            let tiles = (y_min..y_max).flat_map(|y| {
                (x_min..x_max).map(move |x| y * arguments.tile_count_x + x)
            });

            indices
                .iter_mut()
                .zip(orders.iter_mut())
                .zip(tiles)
                .for_each(|((point_index, point_order), tile_index)| {
                    *point_index = index as u32;
                    *point_order = (tile_index as u64) << 32 | depth_bits;
                });
        });
}

/// Reinterpreting the non-negative depth as order-preserving bits.
#[inline]
pub fn depth_to_key_bits(depth: f32) -> u32 {
    debug_assert!(depth >= 0.0, "The depth should be non-negative: {depth}");
    bytemuck::cast(depth)
}
