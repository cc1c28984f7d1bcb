pub use super::*;

/// Inputs.
#[derive(Clone, Copy, Debug)]
pub struct Inputs<'a> {
    /// `[T]`, sorted.
    pub point_orders: &'a [u64],
}

/// Outputs.
#[derive(Debug)]
pub struct Outputs<'a> {
    /// `[I_y / T_y * I_x / T_x, 2]`
    pub tile_point_ranges: &'a mut [[u32; 2]],
}

/// Segmenting the points into tiles.
///
/// The range of each tile is `[start, end)` into the sorted instances.
/// The untouched tiles have the empty range `[0, 0)`.
pub fn main(
    inputs: Inputs,
    outputs: Outputs,
) {
    let point_orders = inputs.point_orders;
    let tile_point_ranges = outputs.tile_point_ranges;
    let tile_index_of = |index: usize| (point_orders[index] >> 32) as usize;

    tile_point_ranges.fill([0, 0]);

    // T
    let count = point_orders.len();
    if count == 0 {
        return;
    }

    // The indices where the tile changes
    let boundaries = (1..count)
        .into_par_iter()
        .filter(|&index| tile_index_of(index) != tile_index_of(index - 1))
        .collect::<Vec<_>>();

    tile_point_ranges[tile_index_of(0)][0] = 0;
    for &index in &boundaries {
        tile_point_ranges[tile_index_of(index - 1)][1] = index as u32;
        tile_point_ranges[tile_index_of(index)][0] = index as u32;
    }
    tile_point_ranges[tile_index_of(count - 1)][1] = count as u32;
}
