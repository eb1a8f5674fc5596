use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use serde::Serialize;

use crate::pose::{CropRegion, Pose};

/// 1 フレーム分の出力
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedPose {
    pub frame_id: u64,
    /// 画像ピクセル座標の姿勢
    pub pose: Pose,
    /// この姿勢の推論に使ったクロップ領域
    pub region: CropRegion,
    pub image_height: u32,
    pub image_width: u32,
}

#[derive(Default)]
struct SinkInner {
    latest: Option<TrackedPose>,
    subscribers: Vec<Sender<TrackedPose>>,
}

/// 描画側へ姿勢を渡す出口
///
/// 最新の姿勢はいつでも `latest` で取れる。順に受け取りたい場合は `subscribe` する。
/// 購読側のキューが満杯ならそのフレームは飛ばす（パイプラインは待たない）。
#[derive(Clone, Default)]
pub struct PoseSink {
    inner: Arc<Mutex<SinkInner>>,
}

impl PoseSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<TrackedPose> {
        self.inner.lock().latest.clone()
    }

    pub fn subscribe(&self, capacity: usize) -> Receiver<TrackedPose> {
        let (tx, rx) = bounded(capacity.max(1));
        self.inner.lock().subscribers.push(tx);
        rx
    }

    pub(crate) fn publish(&self, tracked: TrackedPose) {
        let mut inner = self.inner.lock();
        inner.subscribers.retain(|tx| match tx.try_send(tracked.clone()) {
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        });
        inner.latest = Some(tracked);
    }

    /// 購読者を切断する（受信側は残りを読み切ると終了を検知できる）
    pub(crate) fn close(&self) {
        self.inner.lock().subscribers.clear();
    }
}
