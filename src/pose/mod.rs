pub mod crop;
pub mod detector;
pub mod keypoint;
pub mod preprocess;
pub mod yuv;

pub use crop::{pad_crop_resize, remap_pose, CropRegion};
#[cfg(feature = "onnx")]
pub use detector::PoseDetector;
pub use detector::{ModelOutput, PoseEngine};
pub use keypoint::{Keypoint, KeypointIndex, Pose, KEYPOINT_NAMES};
pub use preprocess::{preprocess_for_movenet, ModelInput, MOVENET_INPUT_SIZE};
pub use yuv::yuv420_to_rgb;
