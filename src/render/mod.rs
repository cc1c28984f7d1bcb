pub mod camera;
pub mod gaussian_3d;
pub mod view;

pub use view::View;
