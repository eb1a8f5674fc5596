use crate::error::{TrackerError, TrackerResult};

/// キャプチャ側から届くピクセルフォーマット
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Y + U + V の 3 プレーン、色差は縦横 1/2（YUV_420_888 相当）
    Yuv420,
    Rgb,
    Bgr,
    Argb,
}

/// 1 プレーン分のバイト列とストライド
#[derive(Debug, Clone)]
pub struct Plane {
    pub data: Vec<u8>,
    /// 隣接画素間のバイト数
    pub pixel_stride: usize,
    /// 行頭から次の行頭までのバイト数
    pub row_stride: usize,
}

impl Plane {
    pub fn new(data: Vec<u8>, pixel_stride: usize, row_stride: usize) -> Self {
        Self {
            data,
            pixel_stride,
            row_stride,
        }
    }

    /// `rows` x `cols` サンプルを読むのに必要な最小バイト数
    pub fn required_len(&self, rows: usize, cols: usize) -> usize {
        if rows == 0 || cols == 0 {
            return 0;
        }
        (rows - 1) * self.row_stride + (cols - 1) * self.pixel_stride + 1
    }

    #[inline]
    pub fn sample(&self, row: usize, col: usize) -> u8 {
        self.data[row * self.row_stride + col * self.pixel_stride]
    }
}

/// カメラから届く 1 フレーム
///
/// フレーム単位で所有され、ステージ間ではムーブで受け渡す。
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    /// 表示向きに合わせるための回転角（0/90/180/270）
    pub rotation_degrees: u32,
    pub format: PixelFormat,
    pub planes: Vec<Plane>,
}

impl RawFrame {
    pub fn yuv420(width: u32, height: u32, rotation_degrees: u32, planes: [Plane; 3]) -> Self {
        Self {
            width,
            height,
            rotation_degrees,
            format: PixelFormat::Yuv420,
            planes: planes.into(),
        }
    }

    /// 詰め込み済み I420 (Y, U, V の順に連続) から作る
    pub fn from_i420(width: u32, height: u32, rotation_degrees: u32, bytes: &[u8]) -> TrackerResult<Self> {
        let (w, h) = (width as usize, height as usize);
        let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
        let expected = w * h + 2 * cw * ch;
        if bytes.len() < expected {
            return Err(TrackerError::format(format!(
                "I420 buffer too short: expected {} bytes, got {}",
                expected,
                bytes.len()
            )));
        }

        let (y, rest) = bytes.split_at(w * h);
        let (u, rest) = rest.split_at(cw * ch);
        let v = &rest[..cw * ch];

        Ok(Self::yuv420(
            width,
            height,
            rotation_degrees,
            [
                Plane::new(y.to_vec(), 1, w),
                Plane::new(u.to_vec(), 1, cw),
                Plane::new(v.to_vec(), 1, cw),
            ],
        ))
    }

    /// NV21 (Y の後に VU インターリーブ) から作る
    ///
    /// U/V プレーンはピクセルストライド 2 のセミプラナー配置になる。
    pub fn from_nv21(width: u32, height: u32, rotation_degrees: u32, bytes: &[u8]) -> TrackerResult<Self> {
        let (w, h) = (width as usize, height as usize);
        let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
        let expected = w * h + 2 * cw * ch;
        if bytes.len() < expected {
            return Err(TrackerError::format(format!(
                "NV21 buffer too short: expected {} bytes, got {}",
                expected,
                bytes.len()
            )));
        }

        let (y, vu) = bytes.split_at(w * h);
        let vu = &vu[..2 * cw * ch];

        Ok(Self::yuv420(
            width,
            height,
            rotation_degrees,
            [
                Plane::new(y.to_vec(), 1, w),
                Plane::new(vu[1..].to_vec(), 2, 2 * cw),
                Plane::new(vu.to_vec(), 2, 2 * cw),
            ],
        ))
    }
}
