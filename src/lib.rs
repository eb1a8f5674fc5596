pub mod camera;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod pose;
pub mod tracker;

pub use error::{TrackerError, TrackerResult};
