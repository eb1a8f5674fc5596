//! フレームのスケジューリングと姿勢の出力
//!
//! キャプチャ側 -> `FrameProducer` -> (最新のみ) -> `FrameScheduler` のワーカー -> `PoseSink`

pub mod channel;
pub mod scheduler;
pub mod sink;

pub use channel::{frame_channel, CapturedFrame, FrameConsumer, FrameProducer, PipelineStats, Recv, StatsSnapshot};
pub use scheduler::{FrameScheduler, SourceInfo, StageState};
pub use sink::{PoseSink, TrackedPose};
