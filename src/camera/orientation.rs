use image::{imageops, RgbImage};
use serde::Deserialize;

use crate::error::{TrackerError, TrackerResult};

/// レンズの向き
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LensFacing {
    Front,
    Back,
    External,
}

/// レンズ向きと名前の対応表
const LENS_FACING_NAMES: [(LensFacing, &str); 3] = [
    (LensFacing::Front, "LENS_FACING_FRONT"),
    (LensFacing::Back, "LENS_FACING_BACK"),
    (LensFacing::External, "LENS_FACING_EXTERNAL"),
];

impl LensFacing {
    pub fn name(self) -> &'static str {
        LENS_FACING_NAMES
            .iter()
            .find(|(facing, _)| *facing == self)
            .map(|(_, name)| *name)
            .unwrap_or("LENS_FACING_UNKNOWN")
    }

    pub fn from_name(name: &str) -> Option<Self> {
        LENS_FACING_NAMES
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(facing, _)| *facing)
    }
}

/// フレームの回転角
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn from_degrees(degrees: i32) -> TrackerResult<Self> {
        match degrees.rem_euclid(360) {
            0 => Ok(Self::Deg0),
            90 => Ok(Self::Deg90),
            180 => Ok(Self::Deg180),
            270 => Ok(Self::Deg270),
            _ => Err(TrackerError::format(format!(
                "rotation must be a multiple of 90 degrees, got {}",
                degrees
            ))),
        }
    }

    pub fn degrees(self) -> u32 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }
}

/// センサー取り付け角と端末の回転からフレームの回転角を求める
///
/// - フロントカメラ: (sensor - device + 360) % 360
/// - それ以外: (sensor + device + 360) % 360
pub fn camera_rotation(
    sensor_orientation: i32,
    device_orientation: i32,
    lens_facing: LensFacing,
) -> TrackerResult<Rotation> {
    let sensor = Rotation::from_degrees(sensor_orientation)?.degrees() as i32;
    let device = Rotation::from_degrees(device_orientation)?.degrees() as i32;
    let degrees = match lens_facing {
        LensFacing::Front => (sensor - device + 360) % 360,
        LensFacing::Back | LensFacing::External => (sensor + device + 360) % 360,
    };
    Rotation::from_degrees(degrees)
}

/// 向きを正規化（回転 + 左右反転）
///
/// - 270: 反時計回りに 90 度
/// - 90: 時計回りに 90 度
/// - 0: 180 度
/// - 180: 回転なし
///
/// その後、常に左右反転する（フロントカメラの鏡像に合わせる）。
pub fn normalize_orientation(image: RgbImage, rotation: Rotation) -> RgbImage {
    let rotated = match rotation {
        Rotation::Deg270 => imageops::rotate270(&image),
        Rotation::Deg90 => imageops::rotate90(&image),
        Rotation::Deg0 => imageops::rotate180(&image),
        Rotation::Deg180 => image,
    };
    imageops::flip_horizontal(&rotated)
}
