use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::Serialize;

use super::detector::ModelOutput;
use super::keypoint::{Keypoint, KeypointIndex, Pose};
use crate::error::{TrackerError, TrackerResult};

/// クロップ領域（画像サイズに対する正規化座標）
///
/// 値は [0, 1] の外に出てもよい（その辺はパディングが必要という意味）。
/// `height == y_max - y_min`、`width == x_max - x_min` は構築時に保証し、個別には変更しない。
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CropRegion {
    y_min: f32,
    x_min: f32,
    y_max: f32,
    x_max: f32,
    height: f32,
    width: f32,
}

impl CropRegion {
    /// 画像全体
    pub const FULL: CropRegion = CropRegion {
        y_min: 0.0,
        x_min: 0.0,
        y_max: 1.0,
        x_max: 1.0,
        height: 1.0,
        width: 1.0,
    };

    /// 四辺から作成。高さ・幅が正でなければ `Geometry` エラー
    pub fn from_bounds(y_min: f32, x_min: f32, y_max: f32, x_max: f32) -> TrackerResult<Self> {
        let height = y_max - y_min;
        let width = x_max - x_min;
        if !(height > 0.0 && width > 0.0 && height.is_finite() && width.is_finite()) {
            return Err(TrackerError::geometry(format!(
                "region must have positive size, got {}x{}",
                width, height
            )));
        }
        Ok(Self {
            y_min,
            x_min,
            y_max,
            x_max,
            height,
            width,
        })
    }

    /// 左上と大きさから作成
    pub fn from_origin(y_min: f32, x_min: f32, height: f32, width: f32) -> TrackerResult<Self> {
        Self::from_bounds(y_min, x_min, y_min + height, x_min + width)
    }

    pub fn y_min(&self) -> f32 { self.y_min }
    pub fn x_min(&self) -> f32 { self.x_min }
    pub fn y_max(&self) -> f32 { self.y_max }
    pub fn x_max(&self) -> f32 { self.x_max }
    pub fn height(&self) -> f32 { self.height }
    pub fn width(&self) -> f32 { self.width }

    /// 画像の内側に完全に収まっているか
    pub fn is_inside(&self) -> bool {
        self.y_min >= 0.0 && self.x_min >= 0.0 && self.y_max <= 1.0 && self.x_max <= 1.0
    }
}

/// 各辺のパディング量（ピクセル）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Padding {
    top: i64,
    bottom: i64,
    left: i64,
    right: i64,
}

/// 正規化座標をピクセルに換算（範囲外の巨大な値は i64 で飽和）
fn to_pixels(value: f32, dimension: u32) -> i64 {
    (f64::from(value) * f64::from(dimension)).round() as i64
}

impl Padding {
    fn for_region(region: &CropRegion, height: u32, width: u32) -> Self {
        let excess = |value: f32, dimension: u32| to_pixels(value.abs(), dimension);
        Self {
            top: if region.y_min < 0.0 { excess(region.y_min, height) } else { 0 },
            bottom: if region.y_max > 1.0 { excess(region.y_max - 1.0, height) } else { 0 },
            left: if region.x_min < 0.0 { excess(region.x_min, width) } else { 0 },
            right: if region.x_max > 1.0 { excess(region.x_max - 1.0, width) } else { 0 },
        }
    }
}

/// 元画像の座標でのクロップ矩形 [top, bottom) x [left, right)
///
/// パディングする辺は画像の外（負、または画像サイズより先）に出る。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CropRect {
    top: i64,
    bottom: i64,
    left: i64,
    right: i64,
}

impl CropRect {
    /// はみ出した辺はパディング分だけ外側、内側の辺は正規化座標をそのままピクセルに換算する。
    fn for_region(region: &CropRegion, pad: &Padding, height: u32, width: u32) -> Self {
        let top = if pad.top > 0 { -pad.top } else { to_pixels(region.y_min, height) };
        let bottom = if pad.bottom > 0 {
            i64::from(height).saturating_add(pad.bottom)
        } else {
            to_pixels(region.y_max, height)
        };
        let left = if pad.left > 0 { -pad.left } else { to_pixels(region.x_min, width) };
        let right = if pad.right > 0 {
            i64::from(width).saturating_add(pad.right)
        } else {
            to_pixels(region.x_max, width)
        };

        // 丸めで空になっても最低 1 ピクセルは残す
        Self {
            top,
            bottom: bottom.max(top.saturating_add(1)),
            left,
            right: right.max(left.saturating_add(1)),
        }
    }
}

/// 1 軸分の、画像内に見えている範囲と出力上の位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct VisibleSpan {
    source_start: u32,
    source_len: u32,
    output_start: u32,
    output_len: u32,
}

impl VisibleSpan {
    /// クロップ区間 [start, end) を画像 [0, size) と交差させ、`output_size` に縮尺した位置を求める。
    /// 交差しなければ `None`（出力はすべてパディング）。
    fn project(start: i64, end: i64, size: u32, output_size: u32) -> Option<Self> {
        let visible_start = start.max(0);
        let visible_end = end.min(i64::from(size));
        if visible_start >= visible_end {
            return None;
        }

        let scale = f64::from(output_size) / end.saturating_sub(start) as f64;
        let to_output = |pos: i64| {
            (pos.saturating_sub(start) as f64 * scale)
                .round()
                .clamp(0.0, f64::from(output_size)) as u32
        };
        let output_start = to_output(visible_start).min(output_size - 1);
        let output_end = to_output(visible_end).clamp(output_start + 1, output_size);

        Some(Self {
            source_start: visible_start as u32,
            source_len: (visible_end - visible_start) as u32,
            output_start,
            output_len: output_end - output_start,
        })
    }
}

/// パディング → クロップ → リサイズ
///
/// 領域が画像外にはみ出す辺は黒でパディングしてからクロップし、
/// `output_size` x `output_size` にバイリニア補間でリサイズする。
/// パディングとクロップは同じ辺に同時には適用されない。
///
/// パディング込みの画像は作らず、画像内に見えている部分だけをリサイズして
/// 黒い出力画像の対応する位置に貼る。
pub fn pad_crop_resize(
    image: &RgbImage,
    region: &CropRegion,
    output_size: u32,
) -> TrackerResult<RgbImage> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(TrackerError::geometry("cannot crop an empty image"));
    }
    if output_size == 0 {
        return Err(TrackerError::geometry("output size must be positive"));
    }

    let pad = Padding::for_region(region, height, width);
    let rect = CropRect::for_region(region, &pad, height, width);
    let rows = VisibleSpan::project(rect.top, rect.bottom, height, output_size);
    let cols = VisibleSpan::project(rect.left, rect.right, width, output_size);
    let (Some(rows), Some(cols)) = (rows, cols) else {
        return Ok(RgbImage::new(output_size, output_size));
    };

    let visible = imageops::crop_imm(
        image,
        cols.source_start,
        rows.source_start,
        cols.source_len,
        rows.source_len,
    )
    .to_image();
    let resized = imageops::resize(&visible, cols.output_len, rows.output_len, FilterType::Triangle);
    if resized.dimensions() == (output_size, output_size) {
        return Ok(resized);
    }

    let mut canvas = RgbImage::new(output_size, output_size);
    imageops::replace(&mut canvas, &resized, i64::from(cols.output_start), i64::from(rows.output_start));
    Ok(canvas)
}

/// モデル出力（クロップ内の正規化座標）をソース画像のピクセル座標に変換
///
/// `crop` は推論に使った領域を渡すこと。推論後に更新された領域を使ってはいけない。
pub fn remap_pose(output: &ModelOutput, crop: &CropRegion, image_height: u32, image_width: u32) -> Pose {
    let (hf, wf) = (image_height as f32, image_width as f32);
    let mut keypoints = [Keypoint::default(); KeypointIndex::COUNT];
    for (kp, [y, x, confidence]) in keypoints.iter_mut().zip(output.keypoints.iter()) {
        *kp = Keypoint {
            y: (crop.y_min + y * crop.height) * hf,
            x: (crop.x_min + x * crop.width) * wf,
            confidence: *confidence,
        };
    }
    Pose::new(keypoints)
}
