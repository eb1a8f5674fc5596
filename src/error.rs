use std::time::Duration;

use thiserror::Error;

/// パイプラインのエラー
///
/// `Format` / `Inference` / `Geometry` はフレーム単位のエラーで、該当フレームを捨てるだけで
/// パイプラインは継続する。ワーカースレッドの生成失敗のみパイプライン全体に致命的。
#[derive(Debug, Error)]
pub enum TrackerError {
    /// キャプチャ側から想定外のピクセルフォーマット・バッファが届いた
    #[error("format error: {0}")]
    Format(String),

    /// 推論呼び出しの失敗
    #[error("inference error: {0}")]
    Inference(String),

    /// 幅・高さが正でない領域など
    #[error("geometry error: {0}")]
    Geometry(String),

    /// キャプチャソースが待機時間内に準備完了しなかった
    #[error("capture source not ready after {0:?}")]
    SourceNotReady(Duration),

    /// キャプチャソースが切断された
    #[error("capture source closed")]
    SourceClosed,

    #[error("failed to spawn pipeline worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),

    #[error("pipeline worker panicked")]
    WorkerPanicked,
}

impl TrackerError {
    pub fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }

    pub fn inference(msg: impl Into<String>) -> Self {
        Self::Inference(msg.into())
    }

    pub fn geometry(msg: impl Into<String>) -> Self {
        Self::Geometry(msg.into())
    }
}

pub type TrackerResult<T> = Result<T, TrackerError>;
