use image::RgbImage;
use ndarray::Array4;

use super::crop::{pad_crop_resize, CropRegion};
use crate::error::TrackerResult;

/// MoveNet用の入力サイズ
pub const MOVENET_INPUT_SIZE: u32 = 192;

/// モデルへの入力（正方形の RGB 画像）
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInput {
    image: RgbImage,
}

impl ModelInput {
    pub fn new(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn size(&self) -> u32 {
        self.image.width()
    }

    /// RGB インターリーブのバイト列（int8 モデル用）
    pub fn as_bytes(&self) -> &[u8] {
        self.image.as_raw()
    }

    /// [1, size, size, 3] の f32 テンソル (0.0-255.0)
    pub fn to_tensor(&self) -> Array4<f32> {
        let (w, h) = self.image.dimensions();
        Array4::from_shape_fn((1, h as usize, w as usize, 3), |(_, y, x, c)| {
            self.image.get_pixel(x as u32, y as u32)[c] as f32
        })
    }
}

/// クロップ領域を切り出して MoveNet の入力にする
///
/// - 領域外はパディング
/// - `input_size` x `input_size` にリサイズ
pub fn preprocess_for_movenet(
    frame: &RgbImage,
    region: &CropRegion,
    input_size: u32,
) -> TrackerResult<ModelInput> {
    let resized = pad_crop_resize(frame, region, input_size)?;
    Ok(ModelInput::new(resized))
}
