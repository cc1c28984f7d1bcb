#![allow(clippy::excessive_precision)]
#![allow(clippy::too_many_arguments)]

pub mod error;
pub mod function;
pub mod render;
pub mod spherical_harmonics;

pub use error::Error;
