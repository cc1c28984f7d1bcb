pub mod radix;

pub use super::*;
