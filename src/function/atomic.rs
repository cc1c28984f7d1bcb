//! Order-independent accumulation into shared float buffers.

use std::sync::atomic::{AtomicU32, Ordering};

/// A buffer of `f32` that many threads can add into concurrently.
///
/// Each element is stored as its IEEE-754 bits in an [`AtomicU32`],
/// and [`AtomicF32Buffer::add`] retries a compare-exchange until it wins.
/// The summation order is decided by the scheduler,
/// so the results are only equal within floating-point tolerance across runs.
#[derive(Debug, Default)]
pub struct AtomicF32Buffer {
    values: Vec<AtomicU32>,
}

impl AtomicF32Buffer {
    /// Creating a buffer of `len` zeros.
    pub fn zeros(len: usize) -> Self {
        let values = (0..len).map(|_| AtomicU32::new(0.0_f32.to_bits())).collect();
        Self { values }
    }

    /// Adding `value` to the element at `index`.
    #[inline]
    pub fn add(
        &self,
        index: usize,
        value: f32,
    ) {
        if value == 0.0 {
            return;
        }
        // The closure always returns `Some`, so the update never fails.
        let _ = self.values[index].fetch_update(
            Ordering::Relaxed,
            Ordering::Relaxed,
            |bits| Some((f32::from_bits(bits) + value).to_bits()),
        );
    }

    /// Reading the element at `index`.
    #[inline]
    pub fn get(
        &self,
        index: usize,
    ) -> f32 {
        f32::from_bits(self.values[index].load(Ordering::Relaxed))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Consuming the buffer into plain floats.
    pub fn into_vec(self) -> Vec<f32> {
        self.values
            .into_iter()
            .map(|value| f32::from_bits(value.into_inner()))
            .collect()
    }
}
