pub use super::*;

/// Arguments.
#[derive(Clone, Copy, Debug)]
pub struct Arguments {
    /// The count of significant bits in the keys.
    pub key_bit_count: u32,
}

/// Inputs.
#[derive(Debug)]
pub struct Inputs<'a> {
    /// The keys of items to sort in place.
    pub keys: &'a mut [u64],
    /// The scratch keys, no shorter than `keys`.
    pub keys_swap: &'a mut [u64],
    /// The values of items to sort in place.
    pub values: &'a mut [u32],
    /// The scratch values, no shorter than `values`.
    pub values_swap: &'a mut [u32],
}

/// `N'`
pub const BLOCK_SIZE: usize = 1 << 14;
/// `R`
pub const RADIX_COUNT: usize = 1 << RADIX_COUNT_SHIFT;
/// `log2(R)`
pub const RADIX_COUNT_SHIFT: u32 = 8;

/// `|Key| <- 32 + |T - 1|`
#[inline]
pub const fn key_bit_count(tile_count: u32) -> u32 {
    u32::BITS + (u32::BITS - tile_count.saturating_sub(1).leading_zeros())
}

/// Sorting the keys and values stably.
///
/// It is a least-significant-digit radix sort.
/// In each pass, every block is sorted locally in parallel,
/// then the runs of each radix are gathered block by block.
/// A pass is skipped if all the keys share the same radix.
pub fn main(
    arguments: Arguments,
    inputs: Inputs,
) {
    let Inputs {
        keys,
        keys_swap,
        values,
        values_swap,
    } = inputs;
    // N
    let count = keys.len();
    debug_assert_eq!(values.len(), count);
    let keys_swap = &mut keys_swap[..count];
    let values_swap = &mut values_swap[..count];

    let mut radix_shift = 0;
    while radix_shift < arguments.key_bit_count {
        let shift = radix_shift;
        let radix_of = move |key: u64| (key >> shift) as usize & (RADIX_COUNT - 1);
        radix_shift += RADIX_COUNT_SHIFT;

        // [N / N', R]
        let counts_radix_block = keys
            .par_chunks(BLOCK_SIZE)
            .map(|block| {
                let mut counts = [0; RADIX_COUNT];
                block.iter().for_each(|&key| counts[radix_of(key)] += 1);
                counts
            })
            .collect::<Vec<[usize; RADIX_COUNT]>>();

        let is_single_radix = (0..RADIX_COUNT).any(|radix| {
            counts_radix_block.iter().map(|counts| counts[radix]).sum::<usize>()
                == count
        });
        if is_single_radix {
            continue;
        }

        // [N / N', R]
        let offsets_radix_block = counts_radix_block
            .iter()
            .map(|counts| {
                let mut offsets = [0; RADIX_COUNT];
                let mut offset = 0;
                for (offset_output, &count) in offsets.iter_mut().zip(counts) {
                    *offset_output = offset;
                    offset += count;
                }
                offsets
            })
            .collect::<Vec<[usize; RADIX_COUNT]>>();

        // Sorting each block locally

        keys.par_chunks(BLOCK_SIZE)
            .zip(values.par_chunks(BLOCK_SIZE))
            .zip(keys_swap.par_chunks_mut(BLOCK_SIZE))
            .zip(values_swap.par_chunks_mut(BLOCK_SIZE))
            .zip(offsets_radix_block.par_iter())
            .for_each(|((((keys, values), keys_swap), values_swap), offsets)| {
                let mut offsets = *offsets;
                keys.iter().zip(values).for_each(|(&key, &value)| {
                    let offset = &mut offsets[radix_of(key)];
                    keys_swap[*offset] = key;
                    values_swap[*offset] = value;
                    *offset += 1;
                });
            });

        // Gathering the runs of each radix in block order

        let mut offset_output = 0;
        for radix in 0..RADIX_COUNT {
            counts_radix_block
                .iter()
                .zip(&offsets_radix_block)
                .enumerate()
                .for_each(|(block_index, (counts, offsets))| {
                    let count = counts[radix];
                    let offset_input = block_index * BLOCK_SIZE + offsets[radix];
                    keys[offset_output..][..count]
                        .copy_from_slice(&keys_swap[offset_input..][..count]);
                    values[offset_output..][..count]
                        .copy_from_slice(&values_swap[offset_input..][..count]);
                    offset_output += count;
                });
        }
        debug_assert_eq!(offset_output, count);
    }
}
