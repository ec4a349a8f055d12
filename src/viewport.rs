pub mod axis;
pub mod grid;
pub mod stepper;

pub use axis::Viewport;
