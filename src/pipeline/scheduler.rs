use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, info, warn};

use super::channel::{CapturedFrame, FrameConsumer, PipelineStats, Recv, StatsSnapshot};
use super::sink::{PoseSink, TrackedPose};
use crate::camera::{normalize_orientation, Rotation};
use crate::config::{Config, StopPolicy};
use crate::error::{TrackerError, TrackerResult};
use crate::pose::{preprocess_for_movenet, remap_pose, yuv420_to_rgb, PoseEngine};
use crate::tracker::CropRegionTracker;

/// ワーカーが今どの段階にいるか
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StageState {
    /// フレーム待ち
    Idle = 0,
    /// フレームを受け取った
    Capturing = 1,
    /// YUV -> RGB 変換と向きの補正
    Converting = 2,
    /// クロップ・リサイズ
    Transforming = 3,
    Inferring = 4,
    /// 座標の逆変換とクロップ領域の更新
    Mapping = 5,
}

impl StageState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Capturing,
            2 => Self::Converting,
            3 => Self::Transforming,
            4 => Self::Inferring,
            5 => Self::Mapping,
            _ => Self::Idle,
        }
    }
}

/// キャプチャソースが準備完了時に一度だけ送る情報
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceInfo {
    pub width: u32,
    pub height: u32,
    pub rotation_degrees: u32,
}

impl SourceInfo {
    /// 向き補正後の (幅, 高さ)
    pub fn oriented_size(&self) -> (u32, u32) {
        if self.rotation_degrees % 180 == 90 {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        }
    }
}

struct Shared {
    stop: AtomicBool,
    state: AtomicU8,
}

impl Shared {
    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn set_state(&self, state: StageState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// フレームを 1 枚ずつ姿勢推定に流すスケジューラ
///
/// ワーカースレッドは常に最新のフレームだけを処理し、推論中に届いた古いフレームは捨てる。
/// 推論は同時に 1 つまで。
pub struct FrameScheduler {
    shared: Arc<Shared>,
    stats: Arc<PipelineStats>,
    sink: PoseSink,
    stop_policy: StopPolicy,
    handle: Option<thread::JoinHandle<CropRegionTracker>>,
}

impl FrameScheduler {
    /// キャプチャソースの準備完了を待ってから開始する
    ///
    /// `ready` に `SourceInfo` が届かないまま `ready_timeout` を過ぎると `SourceNotReady`。
    pub fn start<E>(
        config: &Config,
        engine: E,
        frames: FrameConsumer,
        ready: Receiver<SourceInfo>,
    ) -> TrackerResult<Self>
    where
        E: PoseEngine + 'static,
    {
        let info = wait_ready(&ready, config.scheduler.ready_timeout())?;
        let (width, height) = info.oriented_size();
        info!(width, height, rotation = info.rotation_degrees, "capture source ready");

        let tracker = CropRegionTracker::from_config(&config.tracker, height, width);
        Self::start_with_tracker(config, engine, frames, tracker)
    }

    /// 既存のトラッカー状態から開始する（停止後の再開用）
    pub fn start_with_tracker<E>(
        config: &Config,
        engine: E,
        frames: FrameConsumer,
        tracker: CropRegionTracker,
    ) -> TrackerResult<Self>
    where
        E: PoseEngine + 'static,
    {
        let shared = Arc::new(Shared {
            stop: AtomicBool::new(false),
            state: AtomicU8::new(StageState::Idle as u8),
        });
        let stats = frames.shared_stats();
        let sink = PoseSink::new();

        let worker = Worker {
            engine,
            tracker,
            frames,
            shared: Arc::clone(&shared),
            stats: Arc::clone(&stats),
            sink: sink.clone(),
            input_size: config.model.input_size,
            poll_interval: config.scheduler.poll_interval(),
        };

        let handle = thread::Builder::new()
            .name("pose-pipeline".to_string())
            .spawn(move || worker.run())
            .map_err(TrackerError::WorkerSpawn)?;

        Ok(Self {
            shared,
            stats,
            sink,
            stop_policy: config.scheduler.stop_policy,
            handle: Some(handle),
        })
    }

    pub fn state(&self) -> StageState {
        StageState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn sink(&self) -> &PoseSink {
        &self.sink
    }

    /// ワーカーが終了したか（キャプチャソースが閉じた場合など）
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// 停止してトラッカーを返す
    ///
    /// 実行中の推論は完了を待つ。未処理のフレームは解放する。
    pub fn stop(mut self) -> TrackerResult<CropRegionTracker> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> TrackerResult<CropRegionTracker> {
        self.shared.stop.store(true, Ordering::Release);
        let handle = self.handle.take().ok_or(TrackerError::WorkerPanicked)?;
        let mut tracker = handle.join().map_err(|_| TrackerError::WorkerPanicked)?;
        self.sink.close();

        if self.stop_policy == StopPolicy::Reset {
            tracker.reset();
        }
        let stats = self.stats.snapshot();
        info!(
            captured = stats.captured,
            processed = stats.processed,
            dropped = stats.dropped,
            errors = stats.errors,
            "pipeline stopped"
        );
        Ok(tracker)
    }
}

impl Drop for FrameScheduler {
    fn drop(&mut self) {
        if self.handle.is_some() {
            if let Err(e) = self.shutdown() {
                warn!("pipeline shutdown failed: {}", e);
            }
        }
    }
}

fn wait_ready(ready: &Receiver<SourceInfo>, timeout: Duration) -> TrackerResult<SourceInfo> {
    match ready.recv_timeout(timeout) {
        Ok(info) => Ok(info),
        Err(RecvTimeoutError::Timeout) => Err(TrackerError::SourceNotReady(timeout)),
        Err(RecvTimeoutError::Disconnected) => Err(TrackerError::SourceClosed),
    }
}

fn elapsed_ms(from: Instant, to: Instant) -> f32 {
    to.duration_since(from).as_secs_f32() * 1000.0
}

/// 1 秒ごとのスループットログ
struct ThroughputReport {
    timer: Instant,
    last: StatsSnapshot,
}

impl ThroughputReport {
    fn new() -> Self {
        Self {
            timer: Instant::now(),
            last: StatsSnapshot::default(),
        }
    }

    fn tick(&mut self, stats: &PipelineStats) {
        let elapsed = self.timer.elapsed();
        if elapsed < Duration::from_secs(1) {
            return;
        }
        let now = stats.snapshot();
        let fps = (now.processed - self.last.processed) as f32 / elapsed.as_secs_f32();
        info!(
            "FPS: {:.1} | dropped: {} | errors: {}",
            fps,
            now.dropped - self.last.dropped,
            now.errors - self.last.errors
        );
        self.last = now;
        self.timer = Instant::now();
    }
}

struct Worker<E> {
    engine: E,
    tracker: CropRegionTracker,
    frames: FrameConsumer,
    shared: Arc<Shared>,
    stats: Arc<PipelineStats>,
    sink: PoseSink,
    input_size: u32,
    poll_interval: Duration,
}

impl<E: PoseEngine> Worker<E> {
    fn run(mut self) -> CropRegionTracker {
        debug!("pipeline worker started");
        let mut report = ThroughputReport::new();

        while !self.shared.stop_requested() {
            self.shared.set_state(StageState::Idle);
            let captured = match self.frames.recv_latest(self.poll_interval) {
                Recv::Frame(captured) => captured,
                Recv::Timeout => continue,
                Recv::Closed => {
                    info!("capture source closed");
                    break;
                }
            };
            if self.shared.stop_requested() {
                self.stats.record_dropped(1);
                break;
            }

            let frame_id = captured.id;
            match self.process(captured) {
                Ok(tracked) => {
                    self.stats.record_processed();
                    self.sink.publish(tracked);
                }
                Err(e) => {
                    self.stats.record_error();
                    warn!(frame_id, "frame dropped: {}", e);
                }
            }
            report.tick(&self.stats);
        }

        self.frames.close();
        self.shared.set_state(StageState::Idle);
        debug!("pipeline worker exited");
        self.tracker
    }

    fn process(&mut self, captured: CapturedFrame) -> TrackerResult<TrackedPose> {
        let CapturedFrame { id, frame } = captured;
        let started = Instant::now();

        self.shared.set_state(StageState::Capturing);
        let rotation = Rotation::from_degrees(frame.rotation_degrees as i32)?;

        self.shared.set_state(StageState::Converting);
        let rgb = yuv420_to_rgb(&frame)?;
        drop(frame);
        let image = normalize_orientation(rgb, rotation);
        let (width, height) = image.dimensions();
        if self.tracker.resize(height, width) {
            info!(width, height, "frame size changed, crop region reset");
        }
        let region = self.tracker.region();
        let converted = Instant::now();

        self.shared.set_state(StageState::Transforming);
        let input = match preprocess_for_movenet(&image, &region, self.input_size) {
            Ok(input) => input,
            Err(e) => {
                if let TrackerError::Geometry(_) = e {
                    self.tracker.reset();
                }
                return Err(e);
            }
        };
        drop(image);
        let transformed = Instant::now();

        // 推論に失敗した場合はクロップ領域を更新しない
        self.shared.set_state(StageState::Inferring);
        let output = self.engine.infer(&input)?;
        let inferred = Instant::now();

        self.shared.set_state(StageState::Mapping);
        let pose = remap_pose(&output, &region, height, width);
        let next = self.tracker.update(&pose, height, width);
        let mapped = Instant::now();

        debug!(
            frame_id = id,
            convert_ms = elapsed_ms(started, converted),
            transform_ms = elapsed_ms(converted, transformed),
            infer_ms = elapsed_ms(transformed, inferred),
            map_ms = elapsed_ms(inferred, mapped),
            next_y_min = next.y_min(),
            next_x_min = next.x_min(),
            next_size = next.height(),
            "frame processed"
        );

        Ok(TrackedPose {
            frame_id: id,
            pose,
            region,
            image_height: height,
            image_width: width,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::RawFrame;
    use crate::pipeline::frame_channel;
    use crate::pose::{KeypointIndex, ModelInput, ModelOutput};
    use crossbeam_channel::{bounded, unbounded, Sender};

    const WAIT: Duration = Duration::from_secs(5);

    fn test_config() -> Config {
        let mut config = Config::default();
        config.model.input_size = 16;
        config.scheduler.poll_interval_ms = 5;
        config.scheduler.ready_timeout_ms = 1000;
        config
    }

    fn gray_frame(width: u32, height: u32, rotation: u32) -> RawFrame {
        let len = (width * height + 2 * (width / 2) * (height / 2)) as usize;
        RawFrame::from_i420(width, height, rotation, &vec![128u8; len]).unwrap()
    }

    fn ready(info: SourceInfo) -> Receiver<SourceInfo> {
        let (tx, rx) = bounded(1);
        tx.send(info).unwrap();
        rx
    }

    /// 肩と腰が見えている出力（モデル座標）
    fn torso_output() -> ModelOutput {
        let mut output = ModelOutput::default();
        output.keypoints[KeypointIndex::LeftShoulder as usize] = [0.3, 0.4, 0.9];
        output.keypoints[KeypointIndex::RightShoulder as usize] = [0.3, 0.6, 0.9];
        output.keypoints[KeypointIndex::LeftHip as usize] = [0.6, 0.45, 0.9];
        output.keypoints[KeypointIndex::RightHip as usize] = [0.6, 0.55, 0.9];
        output
    }

    fn fixed_engine(output: ModelOutput) -> impl FnMut(&ModelInput) -> TrackerResult<ModelOutput> + Send {
        move |_: &ModelInput| Ok(output)
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + WAIT;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn test_source_info_oriented_size() {
        let info = SourceInfo { width: 640, height: 480, rotation_degrees: 90 };
        assert_eq!(info.oriented_size(), (480, 640));
        let info = SourceInfo { width: 640, height: 480, rotation_degrees: 180 };
        assert_eq!(info.oriented_size(), (640, 480));
    }

    #[test]
    fn test_processes_frame_and_keeps_region_on_stop() {
        let config = test_config();
        let (producer, consumer) = frame_channel(config.scheduler.source_depth);
        let info = SourceInfo { width: 64, height: 48, rotation_degrees: 180 };
        let scheduler =
            FrameScheduler::start(&config, fixed_engine(torso_output()), consumer, ready(info)).unwrap();
        let poses = scheduler.sink().subscribe(4);

        producer.push(gray_frame(64, 48, 180)).unwrap();
        let tracked = poses.recv_timeout(WAIT).unwrap();

        assert_eq!(tracked.frame_id, 1);
        assert_eq!((tracked.image_height, tracked.image_width), (48, 64));
        assert_eq!(tracked.region, CropRegionTracker::init_region(48, 64));

        // 初期領域 x: 0.125..0.875 に写した腰の座標
        let hip = tracked.pose.get(KeypointIndex::LeftHip);
        assert!((hip.y - 28.8).abs() < 1e-3);
        assert!((hip.x - 29.6).abs() < 1e-3);
        assert_eq!(scheduler.sink().latest(), Some(tracked));

        let tracker = scheduler.stop().unwrap();
        assert_ne!(tracker.region(), CropRegionTracker::init_region(48, 64));
    }

    #[test]
    fn test_stop_policy_reset() {
        let mut config = test_config();
        config.scheduler.stop_policy = StopPolicy::Reset;
        let (producer, consumer) = frame_channel(5);
        let info = SourceInfo { width: 64, height: 48, rotation_degrees: 180 };
        let scheduler =
            FrameScheduler::start(&config, fixed_engine(torso_output()), consumer, ready(info)).unwrap();
        let poses = scheduler.sink().subscribe(4);

        producer.push(gray_frame(64, 48, 180)).unwrap();
        poses.recv_timeout(WAIT).unwrap();

        let tracker = scheduler.stop().unwrap();
        assert_eq!(tracker.region(), CropRegionTracker::init_region(48, 64));
    }

    #[test]
    fn test_latest_frame_wins_while_inferring() {
        let config = test_config();
        let (producer, consumer) = frame_channel(5);
        let (entered_tx, entered_rx) = unbounded::<()>();
        let (release_tx, release_rx): (Sender<()>, _) = unbounded();
        let output = torso_output();
        let engine = move |_: &ModelInput| {
            entered_tx.send(()).ok();
            release_rx.recv().ok();
            Ok::<_, TrackerError>(output)
        };

        let info = SourceInfo { width: 64, height: 48, rotation_degrees: 180 };
        let scheduler = FrameScheduler::start(&config, engine, consumer, ready(info)).unwrap();
        let poses = scheduler.sink().subscribe(8);

        producer.push(gray_frame(64, 48, 180)).unwrap();
        entered_rx.recv_timeout(WAIT).unwrap();
        assert_eq!(scheduler.state(), StageState::Inferring);

        // フレーム 1 の推論中に 3 枚届く
        for _ in 0..3 {
            producer.push(gray_frame(64, 48, 180)).unwrap();
        }
        release_tx.send(()).unwrap();
        release_tx.send(()).unwrap();

        let first = poses.recv_timeout(WAIT).unwrap();
        let second = poses.recv_timeout(WAIT).unwrap();
        assert_eq!((first.frame_id, second.frame_id), (1, 4));

        let stats = scheduler.stats();
        assert_eq!(stats.captured, 4);
        assert_eq!(stats.dropped, 2);
        assert_eq!(stats.processed, 2);

        scheduler.stop().unwrap();
        assert_eq!(poses.try_iter().count(), 0);
    }

    #[test]
    fn test_inference_error_keeps_region() {
        let config = test_config();
        let mut tracker = CropRegionTracker::from_config(&config.tracker, 48, 64);
        let pose = remap_pose(&torso_output(), &tracker.region(), 48, 64);
        let before = tracker.update(&pose, 48, 64);

        let (producer, consumer) = frame_channel(5);
        let engine = |_: &ModelInput| Err::<ModelOutput, _>(TrackerError::inference("session failed"));
        let scheduler = FrameScheduler::start_with_tracker(&config, engine, consumer, tracker).unwrap();

        producer.push(gray_frame(64, 48, 180)).unwrap();
        assert!(wait_until(|| scheduler.stats().errors == 1));
        assert!(scheduler.sink().latest().is_none());

        let tracker = scheduler.stop().unwrap();
        assert_eq!(tracker.region(), before);
    }

    #[test]
    fn test_format_error_does_not_stop_pipeline() {
        let config = test_config();
        let (producer, consumer) = frame_channel(5);
        let info = SourceInfo { width: 64, height: 48, rotation_degrees: 180 };
        let scheduler =
            FrameScheduler::start(&config, fixed_engine(torso_output()), consumer, ready(info)).unwrap();
        let poses = scheduler.sink().subscribe(4);

        let mut bad = gray_frame(64, 48, 180);
        bad.planes.truncate(1);
        producer.push(bad).unwrap();
        assert!(wait_until(|| scheduler.stats().errors == 1));

        producer.push(gray_frame(64, 48, 180)).unwrap();
        let tracked = poses.recv_timeout(WAIT).unwrap();
        assert_eq!(tracked.frame_id, 2);
        scheduler.stop().unwrap();
    }

    #[test]
    fn test_rotated_frame_dimensions() {
        let config = test_config();
        let (producer, consumer) = frame_channel(5);
        let info = SourceInfo { width: 64, height: 48, rotation_degrees: 90 };
        let scheduler =
            FrameScheduler::start(&config, fixed_engine(ModelOutput::default()), consumer, ready(info))
                .unwrap();
        let poses = scheduler.sink().subscribe(4);

        producer.push(gray_frame(64, 48, 90)).unwrap();
        let tracked = poses.recv_timeout(WAIT).unwrap();
        assert_eq!((tracked.image_height, tracked.image_width), (64, 48));
        assert_eq!(tracked.region, CropRegionTracker::init_region(64, 48));
        scheduler.stop().unwrap();
    }

    #[test]
    fn test_ready_timeout() {
        let mut config = test_config();
        config.scheduler.ready_timeout_ms = 20;
        let (_producer, consumer) = frame_channel(5);
        let (_ready_tx, ready_rx) = bounded::<SourceInfo>(1);

        let result = FrameScheduler::start(&config, fixed_engine(ModelOutput::default()), consumer, ready_rx);
        assert!(matches!(result, Err(TrackerError::SourceNotReady(_))));
    }

    #[test]
    fn test_ready_sender_dropped() {
        let config = test_config();
        let (_producer, consumer) = frame_channel(5);
        let (ready_tx, ready_rx) = bounded::<SourceInfo>(1);
        drop(ready_tx);

        let result = FrameScheduler::start(&config, fixed_engine(ModelOutput::default()), consumer, ready_rx);
        assert!(matches!(result, Err(TrackerError::SourceClosed)));
    }

    #[test]
    fn test_worker_exits_when_source_closed() {
        let config = test_config();
        let (producer, consumer) = frame_channel(5);
        let info = SourceInfo { width: 64, height: 48, rotation_degrees: 180 };
        let scheduler =
            FrameScheduler::start(&config, fixed_engine(ModelOutput::default()), consumer, ready(info)).unwrap();

        drop(producer);
        assert!(wait_until(|| scheduler.is_finished()));
        assert!(scheduler.stop().is_ok());
    }

    #[test]
    fn test_push_after_stop_is_rejected() {
        let config = test_config();
        let (producer, consumer) = frame_channel(5);
        let info = SourceInfo { width: 64, height: 48, rotation_degrees: 180 };
        let scheduler =
            FrameScheduler::start(&config, fixed_engine(ModelOutput::default()), consumer, ready(info)).unwrap();

        scheduler.stop().unwrap();
        assert!(matches!(producer.push(gray_frame(64, 48, 180)), Err(TrackerError::SourceClosed)));
    }
}
