pub use super::*;

/// Inputs.
#[derive(Debug)]
pub struct Inputs<'a> {
    /// The values to scan in place.
    pub values: &'a mut [u32],
}

/// Outputs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Outputs {
    /// The total of scanned values.
    pub total: u64,
}

/// `N / N'`
pub const GROUP_SIZE: usize = 256;

/// Scanning the values exclusively.
///
/// Each group is scanned locally, then the group totals are scanned recursively
/// and added back to the groups.
///
/// ## Panics
///
/// In debug builds, if any partial sum overflows `u32`.
pub fn main(inputs: Inputs) -> Outputs {
    // [N]
    let values = inputs.values;
    // N
    let count = values.len();

    if count <= GROUP_SIZE {
        let total = scan_group(values);
        return Outputs { total };
    }

    // [N']
    let mut values_next = values
        .par_chunks_mut(GROUP_SIZE)
        .map(|group| scan_group(group) as u32)
        .collect::<Vec<_>>();

    // Recursing if there is more than one remaining group
    let Outputs { total } = main(Inputs {
        values: &mut values_next,
    });

    values
        .par_chunks_mut(GROUP_SIZE)
        .zip(values_next.par_iter())
        .for_each(|(group, &offset)| {
            group.iter_mut().for_each(|value| *value += offset);
        });

    Outputs { total }
}

/// Returning the total of the group.
#[inline]
fn scan_group(group: &mut [u32]) -> u64 {
    let mut total = 0_u64;
    for value in group.iter_mut() {
        let current = *value as u64;
        *value = total as u32;
        total += current;
    }
    debug_assert!(total <= u32::MAX as u64, "The total should fit in u32");
    total
}
