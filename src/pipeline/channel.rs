use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::Serialize;
use tracing::debug;

use crate::camera::RawFrame;
use crate::error::{TrackerError, TrackerResult};

/// パイプライン全体のフレーム数カウンタ
#[derive(Debug, Default)]
pub struct PipelineStats {
    captured: AtomicU64,
    dropped: AtomicU64,
    processed: AtomicU64,
    errors: AtomicU64,
}

/// カウンタのスナップショット
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    /// キャプチャ側から届いたフレーム数
    pub captured: u64,
    /// 新しいフレームに置き換えられて捨てたフレーム数
    pub dropped: u64,
    /// 姿勢を出力したフレーム数
    pub processed: u64,
    /// エラーで捨てたフレーム数
    pub errors: u64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            captured: self.captured.load(Ordering::Acquire),
            dropped: self.dropped.load(Ordering::Acquire),
            processed: self.processed.load(Ordering::Acquire),
            errors: self.errors.load(Ordering::Acquire),
        }
    }

    pub(crate) fn record_dropped(&self, count: u64) {
        self.dropped.fetch_add(count, Ordering::AcqRel);
    }

    pub(crate) fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::AcqRel);
    }
}

/// 番号付きのフレーム
#[derive(Debug)]
pub struct CapturedFrame {
    pub id: u64,
    pub frame: RawFrame,
}

struct ChannelShared {
    closed: AtomicBool,
    next_id: AtomicU64,
    stats: Arc<PipelineStats>,
}

/// 深さ `depth` のフレームバッファを作る
///
/// 満杯のときは最も古いフレームを捨てて新しいフレームを入れる。
/// 受信側は溜まっているうち最新の 1 枚だけを取り出し、残りは捨てる。
pub fn frame_channel(depth: usize) -> (FrameProducer, FrameConsumer) {
    let (tx, rx) = bounded(depth.max(1));
    let shared = Arc::new(ChannelShared {
        closed: AtomicBool::new(false),
        next_id: AtomicU64::new(0),
        stats: Arc::new(PipelineStats::default()),
    });
    let producer = FrameProducer {
        tx,
        backlog: rx.clone(),
        shared: Arc::clone(&shared),
    };
    let consumer = FrameConsumer { rx, shared };
    (producer, consumer)
}

/// キャプチャ側のハンドル
#[derive(Clone)]
pub struct FrameProducer {
    tx: Sender<CapturedFrame>,
    /// 満杯時に古いフレームを捨てるための受信側
    backlog: Receiver<CapturedFrame>,
    shared: Arc<ChannelShared>,
}

impl FrameProducer {
    /// フレームを渡す。ブロックしない。
    ///
    /// 返り値はフレーム番号。受信側が閉じていれば `SourceClosed`。
    pub fn push(&self, frame: RawFrame) -> TrackerResult<u64> {
        if self.is_closed() {
            return Err(TrackerError::SourceClosed);
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::AcqRel) + 1;
        self.shared.stats.captured.fetch_add(1, Ordering::AcqRel);

        let mut captured = CapturedFrame { id, frame };
        loop {
            match self.tx.try_send(captured) {
                Ok(()) => break,
                Err(TrySendError::Full(back)) => {
                    if let Ok(oldest) = self.backlog.try_recv() {
                        self.shared.stats.record_dropped(1);
                        debug!(frame_id = oldest.id, "source buffer full, dropping oldest frame");
                    }
                    captured = back;
                }
                Err(TrySendError::Disconnected(_)) => return Err(TrackerError::SourceClosed),
            }
        }

        // 送信中に受信側が閉じた場合はここで解放する
        if self.is_closed() {
            let stale = self.backlog.try_iter().count() as u64;
            self.shared.stats.record_dropped(stale);
        }
        Ok(id)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }
}

/// `FrameConsumer::recv_latest` の結果
#[derive(Debug)]
pub enum Recv {
    Frame(CapturedFrame),
    /// タイムアウト（フレームなし）
    Timeout,
    /// キャプチャ側がすべて切断された
    Closed,
}

/// パイプライン側のハンドル
pub struct FrameConsumer {
    rx: Receiver<CapturedFrame>,
    shared: Arc<ChannelShared>,
}

impl FrameConsumer {
    /// フレームが届くまで最大 `timeout` 待ち、溜まっている中で最新の 1 枚を返す
    pub fn recv_latest(&self, timeout: Duration) -> Recv {
        match self.rx.recv_timeout(timeout) {
            Ok(first) => {
                let mut latest = first;
                for newer in self.rx.try_iter() {
                    self.shared.stats.record_dropped(1);
                    debug!(frame_id = latest.id, newer_id = newer.id, "stale frame discarded");
                    latest = newer;
                }
                Recv::Frame(latest)
            }
            Err(RecvTimeoutError::Timeout) => Recv::Timeout,
            Err(RecvTimeoutError::Disconnected) => Recv::Closed,
        }
    }

    /// 受信を止め、溜まっているフレームを解放する
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        let stale = self.rx.try_iter().count() as u64;
        self.shared.stats.record_dropped(stale);
    }

    pub(crate) fn shared_stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.shared.stats)
    }
}

impl Drop for FrameConsumer {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> RawFrame {
        RawFrame::from_i420(2, 2, 0, &[16; 6]).unwrap()
    }

    fn recv_id(consumer: &FrameConsumer) -> Option<u64> {
        match consumer.recv_latest(Duration::from_millis(10)) {
            Recv::Frame(f) => Some(f.id),
            _ => None,
        }
    }

    #[test]
    fn test_recv_takes_newest_and_discards_backlog() {
        let (producer, consumer) = frame_channel(5);
        for _ in 0..3 {
            producer.push(frame()).unwrap();
        }
        assert_eq!(recv_id(&consumer), Some(3));
        assert_eq!(recv_id(&consumer), None);

        let stats = producer.stats();
        assert_eq!(stats.captured, 3);
        assert_eq!(stats.dropped, 2);
    }

    #[test]
    fn test_full_buffer_overwrites_oldest() {
        let (producer, consumer) = frame_channel(2);
        for _ in 0..5 {
            producer.push(frame()).unwrap();
        }
        // 5 枚中 3 枚は満杯で捨てられ、残り 2 枚のうち新しい方を受け取る
        assert_eq!(producer.stats().dropped, 3);
        assert_eq!(recv_id(&consumer), Some(5));
        assert_eq!(producer.stats().dropped, 4);
    }

    #[test]
    fn test_zero_depth_still_buffers_one() {
        let (producer, consumer) = frame_channel(0);
        producer.push(frame()).unwrap();
        producer.push(frame()).unwrap();
        assert_eq!(recv_id(&consumer), Some(2));
    }

    #[test]
    fn test_timeout_when_empty() {
        let (_producer, consumer) = frame_channel(5);
        assert!(matches!(consumer.recv_latest(Duration::from_millis(5)), Recv::Timeout));
    }

    #[test]
    fn test_closed_when_producer_dropped() {
        let (producer, consumer) = frame_channel(5);
        producer.push(frame()).unwrap();
        drop(producer);
        // 残っているフレームは受け取れる
        assert_eq!(recv_id(&consumer), Some(1));
        assert!(matches!(consumer.recv_latest(Duration::from_millis(5)), Recv::Closed));
    }

    #[test]
    fn test_push_after_consumer_dropped() {
        let (producer, consumer) = frame_channel(5);
        producer.push(frame()).unwrap();
        drop(consumer);
        assert!(producer.is_closed());
        assert!(matches!(producer.push(frame()), Err(TrackerError::SourceClosed)));
        assert_eq!(producer.stats().dropped, 1);
    }
}
