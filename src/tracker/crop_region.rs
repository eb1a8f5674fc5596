use tracing::debug;

use crate::config::TrackerConfig;
use crate::pose::{CropRegion, KeypointIndex, Pose};

/// 前フレームの姿勢から次フレームのクロップ領域を決めるトラッカー
///
/// 胴体（肩・腰）が見えていれば腰の中点を中心とした正方形に絞り込み、
/// 見えなければ画像全体を覆う初期領域に戻す。
#[derive(Debug, Clone)]
pub struct CropRegionTracker {
    region: CropRegion,
    image_height: u32,
    image_width: u32,
    /// これより大きい信頼度のキーポイントだけを使う
    min_keypoint_score: f32,
    /// 体の広がりに掛けるマージン倍率
    body_margin: f32,
}

impl CropRegionTracker {
    pub fn new(image_height: u32, image_width: u32) -> Self {
        Self::from_config(&TrackerConfig::default(), image_height, image_width)
    }

    /// 設定から作成
    pub fn from_config(config: &TrackerConfig, image_height: u32, image_width: u32) -> Self {
        Self {
            region: Self::init_region(image_height, image_width),
            image_height,
            image_width,
            min_keypoint_score: config.min_keypoint_score,
            body_margin: config.body_margin,
        }
    }

    /// 画像に収まる最大の中央正方形
    ///
    /// 長辺側は中央寄せ、短辺側は全体（1.0）を覆う。
    pub fn init_region(image_height: u32, image_width: u32) -> CropRegion {
        let (hf, wf) = (image_height.max(1) as f32, image_width.max(1) as f32);
        let (y_min, x_min, height, width) = if wf > hf {
            let width = hf / wf;
            (0.0, (1.0 - width) / 2.0, 1.0, width)
        } else {
            let height = wf / hf;
            ((1.0 - height) / 2.0, 0.0, height, 1.0)
        };
        CropRegion::from_origin(y_min, x_min, height, width).unwrap_or(CropRegion::FULL)
    }

    /// 現在のクロップ領域
    pub fn region(&self) -> CropRegion {
        self.region
    }

    /// 追跡中の画像サイズ (高さ, 幅)
    pub fn dimensions(&self) -> (u32, u32) {
        (self.image_height, self.image_width)
    }

    /// 初期領域に戻す
    pub fn reset(&mut self) {
        self.region = Self::init_region(self.image_height, self.image_width);
    }

    /// 画像サイズが変わったら初期化し直す
    pub fn resize(&mut self, image_height: u32, image_width: u32) -> bool {
        if (image_height, image_width) == self.dimensions() {
            return false;
        }
        self.image_height = image_height;
        self.image_width = image_width;
        self.reset();
        true
    }

    /// 姿勢から次のクロップ領域を計算して保持する
    pub fn update(&mut self, pose: &Pose, image_height: u32, image_width: u32) -> CropRegion {
        self.image_height = image_height;
        self.image_width = image_width;
        self.region = self.determine_region(pose, image_height, image_width);
        self.region
    }

    /// 肩・腰の左右どちらかずつが見えているか
    pub fn torso_visible(&self, pose: &Pose) -> bool {
        let visible = |index| pose.get(index).is_confident(self.min_keypoint_score);
        (visible(KeypointIndex::LeftHip) || visible(KeypointIndex::RightHip))
            && (visible(KeypointIndex::LeftShoulder) || visible(KeypointIndex::RightShoulder))
    }

    /// 中心から信頼できるキーポイントまでの最大距離 (Y, X)
    fn body_range(&self, pose: &Pose, center_y: f32, center_x: f32) -> (f32, f32) {
        pose.keypoints
            .iter()
            .filter(|kp| kp.is_confident(self.min_keypoint_score))
            .fold((0.0f32, 0.0f32), |(max_y, max_x), kp| {
                (
                    max_y.max((center_y - kp.y).abs()),
                    max_x.max((center_x - kp.x).abs()),
                )
            })
    }

    /// 状態を変えずに次のクロップ領域を計算
    pub fn determine_region(&self, pose: &Pose, image_height: u32, image_width: u32) -> CropRegion {
        let init = || Self::init_region(image_height, image_width);

        if !self.torso_visible(pose) {
            return init();
        }

        let left_hip = pose.get(KeypointIndex::LeftHip);
        let right_hip = pose.get(KeypointIndex::RightHip);
        let center_y = (left_hip.y + right_hip.y) / 2.0;
        let center_x = (left_hip.x + right_hip.x) / 2.0;
        if center_y < 0.0 || center_x < 0.0 {
            debug!("negative hip center ({}, {}), resetting", center_y, center_x);
            return init();
        }

        let (hf, wf) = (image_height as f32, image_width as f32);
        let (range_y, range_x) = self.body_range(pose, center_y, center_x);
        let half_by_keypoints = (range_y * self.body_margin).max(range_x * self.body_margin);
        let half_by_center = center_x.min(wf - center_x).min(center_y).min(hf - center_y);
        let half = half_by_keypoints.min(half_by_center);

        if half > hf.max(wf) / 2.0 {
            return init();
        }

        match CropRegion::from_bounds(
            (center_y - half) / hf,
            (center_x - half) / wf,
            (center_y + half) / hf,
            (center_x + half) / wf,
        ) {
            Ok(region) => region,
            Err(e) => {
                debug!("{}, resetting", e);
                init()
            }
        }
    }
}
