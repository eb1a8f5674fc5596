use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::camera::LensFacing;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    /// モデル入力の一辺（ピクセル）
    #[serde(default = "default_input_size")]
    pub input_size: u32,
    #[serde(default = "default_model_path")]
    pub model_path: String,
}

fn default_input_size() -> u32 { 192 }
fn default_model_path() -> String { "models/movenet_lightning.onnx".to_string() }

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            input_size: default_input_size(),
            model_path: default_model_path(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TrackerConfig {
    /// クロップ計算に使うキーポイントの信頼度閾値（これより大きいもののみ）
    #[serde(default = "default_min_keypoint_score")]
    pub min_keypoint_score: f32,
    /// 体の広がりに掛けるマージン倍率
    #[serde(default = "default_body_margin")]
    pub body_margin: f32,
}

fn default_min_keypoint_score() -> f32 { 0.5 }
fn default_body_margin() -> f32 { 1.2 }

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            min_keypoint_score: default_min_keypoint_score(),
            body_margin: default_body_margin(),
        }
    }
}

/// 停止時のトラッカー状態の扱い
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StopPolicy {
    /// 現在のクロップ領域を保持（再開時に追跡を継続できる）
    #[default]
    Keep,
    /// 初期領域に戻す
    Reset,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    /// キャプチャ側バッファの深さ
    #[serde(default = "default_source_depth")]
    pub source_depth: usize,
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
    /// ワーカーが停止フラグを確認する間隔
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub stop_policy: StopPolicy,
}

fn default_source_depth() -> usize { 5 }
fn default_ready_timeout_ms() -> u64 { 5000 }
fn default_poll_interval_ms() -> u64 { 100 }

impl SchedulerConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            source_depth: default_source_depth(),
            ready_timeout_ms: default_ready_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            stop_policy: StopPolicy::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CameraConfig {
    #[serde(default = "default_lens_facing")]
    pub lens_facing: LensFacing,
    /// センサーの取り付け角（度）
    #[serde(default = "default_sensor_orientation")]
    pub sensor_orientation: i32,
    /// 端末の回転（度）
    #[serde(default)]
    pub device_orientation: i32,
}

fn default_lens_facing() -> LensFacing { LensFacing::Front }
fn default_sensor_orientation() -> i32 { 270 }

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            lens_facing: default_lens_facing(),
            sensor_orientation: default_sensor_orientation(),
            device_orientation: 0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReplayConfig {
    #[serde(default = "default_replay_width")]
    pub width: u32,
    #[serde(default = "default_replay_height")]
    pub height: u32,
    #[serde(default = "default_replay_fps")]
    pub fps: u32,
}

fn default_replay_width() -> u32 { 640 }
fn default_replay_height() -> u32 { 480 }
fn default_replay_fps() -> u32 { 30 }

impl ReplayConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.max(1) as f64)
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            width: default_replay_width(),
            height: default_replay_height(),
            fps: default_replay_fps(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// 読み込みに失敗したらデフォルト設定を使う
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            info!("{} not found, using defaults", path.display());
            return Self::default();
        }
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!("{:#}; using defaults", e);
                Self::default()
            }
        }
    }
}
