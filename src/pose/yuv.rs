use image::{Rgb, RgbImage};

use crate::camera::{PixelFormat, RawFrame};
use crate::error::{TrackerError, TrackerResult};

/// 18bit 固定小数点での各チャンネル上限
const MAX_CHANNEL_VALUE: i32 = 262143;

/// YUV420 (3 プレーン、任意ストライド) を RGB インターリーブ画像に変換
///
/// 各プレーンのピクセルストライド・行ストライドを尊重するので、
/// プラナー (I420) とセミプラナー (NV12/NV21) のどちらも扱える。
/// 入力バッファは変更しない。
pub fn yuv420_to_rgb(frame: &RawFrame) -> TrackerResult<RgbImage> {
    if frame.format != PixelFormat::Yuv420 {
        return Err(TrackerError::format(format!(
            "expected planar YUV420, got {:?}",
            frame.format
        )));
    }
    let [y_plane, u_plane, v_plane] = frame.planes.as_slice() else {
        return Err(TrackerError::format(format!(
            "expected 3 planes, got {}",
            frame.planes.len()
        )));
    };
    if frame.width == 0 || frame.height == 0 {
        return Err(TrackerError::format("empty frame"));
    }

    let (w, h) = (frame.width as usize, frame.height as usize);
    let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));

    if y_plane.pixel_stride == 0 || u_plane.pixel_stride == 0 || v_plane.pixel_stride == 0 {
        return Err(TrackerError::format("pixel stride must be positive"));
    }
    for (name, plane, rows, cols) in [
        ("Y", y_plane, h, w),
        ("U", u_plane, ch, cw),
        ("V", v_plane, ch, cw),
    ] {
        let required = plane.required_len(rows, cols);
        if plane.data.len() < required {
            return Err(TrackerError::format(format!(
                "{} plane too short for strides: need {} bytes, got {}",
                name,
                required,
                plane.data.len()
            )));
        }
    }

    Ok(RgbImage::from_fn(frame.width, frame.height, |x, y| {
        let (x, y) = (x as usize, y as usize);
        let luma = y_plane.sample(y, x);
        let u = u_plane.sample(y >> 1, x >> 1);
        let v = v_plane.sample(y >> 1, x >> 1);
        Rgb(yuv_to_rgb(luma, u, v))
    }))
}

/// BT.601 の固定小数点変換
#[inline]
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = (y as i32 - 16).max(0);
    let u = u as i32 - 128;
    let v = v as i32 - 128;

    let r = (1192 * y + 1634 * v).clamp(0, MAX_CHANNEL_VALUE);
    let g = (1192 * y - 833 * v - 400 * u).clamp(0, MAX_CHANNEL_VALUE);
    let b = (1192 * y + 2066 * u).clamp(0, MAX_CHANNEL_VALUE);

    [(r >> 10) as u8, (g >> 10) as u8, (b >> 10) as u8]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Plane;

    #[test]
    fn test_yuv_to_rgb_black_and_white() {
        assert_eq!(yuv_to_rgb(16, 128, 128), [0, 0, 0]);
        assert_eq!(yuv_to_rgb(0, 128, 128), [0, 0, 0]);
        assert_eq!(yuv_to_rgb(255, 128, 128), [255, 255, 255]);
    }

    #[test]
    fn test_yuv_to_rgb_red_dominant() {
        let [r, g, b] = yuv_to_rgb(81, 90, 240);
        assert!(r > 200);
        assert!(g < 50);
        assert!(b < 50);
    }

    #[test]
    fn test_convert_i420_gray() {
        let bytes = [vec![235u8; 4 * 4], vec![128u8; 8]].concat();
        let frame = RawFrame::from_i420(4, 4, 0, &bytes).unwrap();
        let rgb = yuv420_to_rgb(&frame).unwrap();
        assert_eq!(rgb.dimensions(), (4, 4));
        for pixel in rgb.pixels() {
            assert_eq!(pixel, &Rgb([254, 254, 254]));
        }
    }

    #[test]
    fn test_convert_honors_row_stride_padding() {
        // 2x2、行ストライド 4（行末に 2 バイトのゴミ）
        let y = Plane::new(vec![16, 235, 99, 99, 235, 16, 99, 99], 1, 4);
        let u = Plane::new(vec![128, 77, 77, 77], 1, 4);
        let v = Plane::new(vec![128, 77, 77, 77], 1, 4);
        let frame = RawFrame::yuv420(2, 2, 0, [y, u, v]);

        let rgb = yuv420_to_rgb(&frame).unwrap();
        assert_eq!(rgb.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(rgb.get_pixel(1, 0), &Rgb([254, 254, 254]));
        assert_eq!(rgb.get_pixel(0, 1), &Rgb([254, 254, 254]));
        assert_eq!(rgb.get_pixel(1, 1), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_convert_semi_planar_matches_planar() {
        let y: Vec<u8> = (0..16).map(|i| 40 + i * 10).collect();
        let u = [100u8, 140, 90, 160];
        let v = [150u8, 110, 200, 60];

        let i420 = [y.clone(), u.to_vec(), v.to_vec()].concat();
        let mut vu = Vec::new();
        for i in 0..4 {
            vu.push(v[i]);
            vu.push(u[i]);
        }
        let nv21 = [y, vu].concat();

        let planar = yuv420_to_rgb(&RawFrame::from_i420(4, 4, 0, &i420).unwrap()).unwrap();
        let semi = yuv420_to_rgb(&RawFrame::from_nv21(4, 4, 0, &nv21).unwrap()).unwrap();
        assert_eq!(planar, semi);
    }

    #[test]
    fn test_convert_rejects_wrong_format() {
        let mut frame = RawFrame::from_i420(2, 2, 0, &[0; 6]).unwrap();
        frame.format = PixelFormat::Bgr;
        assert!(matches!(yuv420_to_rgb(&frame), Err(TrackerError::Format(_))));
    }

    #[test]
    fn test_convert_rejects_short_plane() {
        let y = Plane::new(vec![0; 3], 1, 2);
        let u = Plane::new(vec![128], 1, 1);
        let v = Plane::new(vec![128], 1, 1);
        let frame = RawFrame::yuv420(2, 2, 0, [y, u, v]);
        assert!(matches!(yuv420_to_rgb(&frame), Err(TrackerError::Format(_))));
    }

    #[test]
    fn test_convert_does_not_mutate_input() {
        let bytes: Vec<u8> = (0..24).map(|i| (i * 7) as u8).collect();
        let frame = RawFrame::from_i420(4, 4, 0, &bytes).unwrap();
        let before = frame.planes[0].data.clone();
        yuv420_to_rgb(&frame).unwrap();
        assert_eq!(frame.planes[0].data, before);
    }
}
