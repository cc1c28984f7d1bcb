pub mod atomic;

pub use atomic::*;
