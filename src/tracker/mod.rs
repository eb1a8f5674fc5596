pub mod crop_region;

pub use crop_region::CropRegionTracker;
