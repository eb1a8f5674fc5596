pub mod frame;
pub mod orientation;

pub use frame::{PixelFormat, Plane, RawFrame};
pub use orientation::{camera_rotation, normalize_orientation, LensFacing, Rotation};
