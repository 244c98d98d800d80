//! 物体検出の結果を処理するモジュール

use std::borrow::Cow;

use crate::coco;

/// 1フレーム分の検出結果を保持するための構造体
///
/// 座標はピクセル単位の左上・右下の2点で保持します。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionData {
    /// クラス
    pub class: u8,
    /// バウンディングボックス左上のx
    pub x1: f32,
    /// バウンディングボックス左上のy
    pub y1: f32,
    /// バウンディングボックス右下のx
    pub x2: f32,
    /// バウンディングボックス右下のy
    pub y2: f32,
    /// コンフィデンス
    pub confidence: f32,
}

impl DetectionData {
    /// 中心座標と大きさから新しいDetectionDataを作成します。
    ///
    /// # Args
    ///
    /// * `cx`, `cy` - 中心座標
    /// * `w`, `h` - BBoxのサイズ
    /// * `class` - クラスID
    /// * `confidence` - コンフィデンス
    ///
    /// # Return
    /// * 新たなDetectionDataインスタンス
    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32, class: u8, confidence: f32) -> Self {
        Self {
            class,
            x1: cx - w / 2.,
            y1: cy - h / 2.,
            x2: cx + w / 2.,
            y2: cy + h / 2.,
            confidence,
        }
    }

    /// 座標をx方向に`sx`倍、y方向に`sy`倍します。
    pub fn scale(&self, sx: f32, sy: f32) -> Self {
        Self {
            x1: self.x1 * sx,
            y1: self.y1 * sy,
            x2: self.x2 * sx,
            y2: self.y2 * sy,
            ..*self
        }
    }

    /// レターボックス化した入力の座標を元の画像の座標系に戻します。
    ///
    /// # Args
    ///
    /// * `width` - 元画像の幅
    /// * `height` - 元画像の高さ
    /// * `input_size` - モデル入力 (正方形) の一辺
    ///
    /// # Return
    /// * 新たなDetectionDataインスタンス
    pub fn reverse_transform(&self, width: u32, height: u32, input_size: u32) -> Self {
        let mut new_d = *self;
        (new_d.x1, new_d.y1) = point_reverse_transform(width, height, input_size, self.x1, self.y1);
        (new_d.x2, new_d.y2) = point_reverse_transform(width, height, input_size, self.x2, self.y2);
        new_d
    }

    /// 座標を画像の範囲内に収めます。
    pub fn clamp(&self, width: u32, height: u32) -> Self {
        let w = width as f32;
        let h = height as f32;
        Self {
            x1: self.x1.clamp(0., w),
            y1: self.y1.clamp(0., h),
            x2: self.x2.clamp(0., w),
            y2: self.y2.clamp(0., h),
            ..*self
        }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// COCOのクラス名
    pub fn class_name(&self) -> Cow<'static, str> {
        coco::class_name(self.class as usize)
    }

    /// 描画用のラベル文字列 (`person: 0.87` の形式)
    pub fn label(&self) -> String {
        format!("{}: {:.2}", self.class_name(), self.confidence)
    }
}

/// レターボックス化した入力の座標を元の画像の座標系に戻します。
///
/// # Args
///
/// * `width` - 画像の幅
/// * `height` - 画像の高さ
/// * `input_size` - モデル入力の一辺
/// * `x` - x座標
/// * `y` - y座標
///
/// # Return
/// * 新たな座標 (x, y)
fn point_reverse_transform(width: u32, height: u32, input_size: u32, x: f32, y: f32) -> (f32, f32) {
    let input_size = input_size as f32;

    let wratio = input_size / width.max(1) as f32;
    let hratio = input_size / height.max(1) as f32;
    let ratio = f32::min(wratio, hratio);
    let nw = width as f32 * ratio;
    let nh = height as f32 * ratio;

    let pad_w = (input_size - nw) / 2.;
    let pad_h = (input_size - nh) / 2.;

    ((x - pad_w) / ratio, (y - pad_h) / ratio)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn center_form_converts_to_corners() {
        let d = DetectionData::from_center(100., 50., 40., 20., 3, 0.9);
        assert_eq!((d.x1, d.y1, d.x2, d.y2), (80., 40., 120., 60.));
        assert_eq!(d.width(), 40.);
        assert_eq!(d.height(), 20.);
        assert_eq!(d.area(), 800.);
    }

    #[test]
    fn stretch_scale_maps_model_input_to_frame() {
        // 640x640 のモデル入力を 1280x720 のフレームに戻す
        let d = DetectionData::from_center(320., 320., 64., 64., 0, 0.8);
        let s = d.scale(1280. / 640., 720. / 640.);
        assert!(approx(s.x1, 576.));
        assert!(approx(s.x2, 704.));
        assert!(approx(s.y1, 324.));
        assert!(approx(s.y2, 396.));
        assert_eq!(s.confidence, 0.8);
    }

    #[test]
    fn letterbox_reverse_transform_removes_padding() {
        // 1280x720 -> 640x360 にリサイズされ，上下に140pxずつパディングされる
        let d = DetectionData {
            class: 0,
            x1: 0.,
            y1: 140.,
            x2: 640.,
            y2: 500.,
            confidence: 0.5,
        };
        let r = d.reverse_transform(1280, 720, 640);
        assert!(approx(r.x1, 0.));
        assert!(approx(r.y1, 0.));
        assert!(approx(r.x2, 1280.));
        assert!(approx(r.y2, 720.));
    }

    #[test]
    fn clamp_keeps_box_inside_frame() {
        let d = DetectionData::from_center(5., 5., 20., 20., 1, 0.7).clamp(100, 100);
        assert_eq!((d.x1, d.y1, d.x2, d.y2), (0., 0., 15., 15.));
    }

    #[test]
    fn inverted_box_has_zero_area() {
        let d = DetectionData {
            class: 0,
            x1: 10.,
            y1: 10.,
            x2: 5.,
            y2: 20.,
            confidence: 0.5,
        };
        assert_eq!(d.area(), 0.);
    }

    #[test]
    fn label_uses_class_name_and_two_decimals() {
        let d = DetectionData::from_center(0., 0., 1., 1., 0, 0.876);
        assert_eq!(d.label(), "person: 0.88");
        let unknown = DetectionData { class: 90, ..d };
        assert_eq!(unknown.label(), "class_90: 0.88");
    }
}
