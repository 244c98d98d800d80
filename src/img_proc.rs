//! YOLOに関する画像処理モジュール

use std::num::NonZeroU32;
use std::path::Path;

use anyhow::{anyhow, ensure, Context, Result};
use fast_image_resize as fr;
use image::{imageops, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use log::{debug, warn};
use rusttype::{Font, Scale};
use serde::Deserialize;

use crate::detection_result::DetectionData;
use crate::engine::{InputShape, TensorLayout};

/// モデル入力へのリサイズ方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ResizeMode {
    /// アスペクト比を無視して引き伸ばす
    #[default]
    Stretch,
    /// アスペクト比を保ち，余白を黒で埋める
    Letterbox,
}

/// 画像を指定した角度で回転させます。
///
/// # Args
///
/// * `img` - 回転させる画像
/// * `angle` - 回転させる角度（90, 180, 270のみ対応）
///
/// # Return
///
/// * 回転させた画像
pub fn rotate_img(img: RgbImage, angle: u32) -> RgbImage {
    match angle {
        90 => imageops::rotate90(&img),
        180 => imageops::rotate180(&img),
        270 => imageops::rotate270(&img),
        _ => img,
    }
}

/// RGB画像をリサイズします (バイリニア)。
///
/// # Args
///
/// * `img` - リサイズする画像
/// * `width`, `height` - リサイズ後のサイズ
pub fn resize_rgb(img: &RgbImage, width: u32, height: u32) -> Result<RgbImage> {
    if img.dimensions() == (width, height) {
        return Ok(img.clone());
    }
    let src_w = NonZeroU32::new(img.width()).context("source image has zero width")?;
    let src_h = NonZeroU32::new(img.height()).context("source image has zero height")?;
    let dst_w = NonZeroU32::new(width).context("target width is zero")?;
    let dst_h = NonZeroU32::new(height).context("target height is zero")?;

    let src = fr::Image::from_vec_u8(src_w, src_h, img.as_raw().clone(), fr::PixelType::U8x3)
        .map_err(|e| anyhow!("invalid source buffer: {:?}", e))?;
    let mut dst = fr::Image::new(dst_w, dst_h, fr::PixelType::U8x3);

    let mut resizer = fr::Resizer::new(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear));
    resizer
        .resize(&src.view(), &mut dst.view_mut())
        .map_err(|e| anyhow!("resize failed: {:?}", e))?;

    RgbImage::from_raw(width, height, dst.buffer().to_vec()).context("resized buffer size mismatch")
}

/// 画像をリサイズし、正方形に整形します。
///
/// # Args
///
/// * `img` - リサイズする画像
/// * `size` - リサイズ後の画像のサイズ
///
/// # Return
///
/// * リサイズ、パディングを行ったRGB画像
pub fn letterbox_img(img: &RgbImage, size: u32) -> Result<RgbImage> {
    ensure!(img.width() > 0 && img.height() > 0, "empty image");
    let ratio = f32::min(size as f32 / img.width() as f32, size as f32 / img.height() as f32);
    let nw = ((img.width() as f32 * ratio).round() as u32).clamp(1, size);
    let nh = ((img.height() as f32 * ratio).round() as u32).clamp(1, size);
    let resized = resize_rgb(img, nw, nh)?;

    let pad_w = (size - nw) / 2;
    let pad_h = (size - nh) / 2;

    let mut new_img = RgbImage::new(size, size);
    for (x, y, &pixel) in resized.enumerate_pixels() {
        new_img.put_pixel(x + pad_w, y + pad_h, pixel);
    }
    Ok(new_img)
}

/// RGB画像を0〜1に正規化したf32のテンソルに変換します。
///
/// # Args
///
/// * `img` - 変換する画像
/// * `layout` - テンソルの並び (NCHW / NHWC)
pub fn to_input_tensor(img: &RgbImage, layout: TensorLayout) -> Vec<f32> {
    let (w, h) = (img.width() as usize, img.height() as usize);
    match layout {
        TensorLayout::Nhwc => img.as_raw().iter().map(|&v| v as f32 / 255.0).collect(),
        TensorLayout::Nchw => {
            let plane = w * h;
            let mut data = vec![0f32; plane * 3];
            for (x, y, pixel) in img.enumerate_pixels() {
                let idx = y as usize * w + x as usize;
                data[idx] = pixel[0] as f32 / 255.0;
                data[plane + idx] = pixel[1] as f32 / 255.0;
                data[2 * plane + idx] = pixel[2] as f32 / 255.0;
            }
            data
        }
    }
}

/// フレームをモデル入力のテンソルに変換します。
///
/// # Args
///
/// * `img` - カメラのフレーム
/// * `shape` - モデルの入力形状
/// * `mode` - リサイズ方法
pub fn preprocess(img: &RgbImage, shape: InputShape, mode: ResizeMode) -> Result<Vec<f32>> {
    let resized = match mode {
        ResizeMode::Stretch => resize_rgb(img, shape.width, shape.height)?,
        ResizeMode::Letterbox => {
            ensure!(
                shape.width == shape.height,
                "letterbox needs a square input, got {}x{}",
                shape.width,
                shape.height
            );
            letterbox_img(img, shape.width)?
        }
    };
    Ok(to_input_tensor(&resized, shape.layout))
}

/// 画像全体の明るさ (HSVのV) の平均を計算します。
pub fn mean_brightness(img: &RgbImage) -> f64 {
    let count = img.width() as u64 * img.height() as u64;
    if count == 0 {
        return 0.0;
    }
    let total: f64 = img
        .pixels()
        .map(|p| {
            let rgb = color_space::Rgb::new(p[0] as f64, p[1] as f64, p[2] as f64);
            color_space::Hsv::from(rgb).v
        })
        .sum();
    total / count as f64
}

fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// YUYV (YUV 4:2:2) のバッファをRGB画像に変換します。
///
/// # Args
///
/// * `buf` - V4L2から受け取ったバッファ
/// * `width`, `height` - フレームサイズ
pub fn yuyv_to_rgb(buf: &[u8], width: u32, height: u32) -> Result<RgbImage> {
    let expected = width as usize * height as usize * 2;
    ensure!(
        buf.len() >= expected,
        "YUYV buffer too small: {} bytes for {}x{}",
        buf.len(),
        width,
        height
    );

    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    for chunk in buf[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0] as i32, chunk[1] as i32 - 128, chunk[2] as i32, chunk[3] as i32 - 128);
        for y in [y0, y1] {
            // BT.601
            let c = y - 16;
            rgb.push(clamp_u8((298 * c + 409 * v + 128) >> 8));
            rgb.push(clamp_u8((298 * c - 100 * u - 208 * v + 128) >> 8));
            rgb.push(clamp_u8((298 * c + 516 * u + 128) >> 8));
        }
    }
    RgbImage::from_raw(width, height, rgb).context("YUYV conversion size mismatch")
}

const COLORS: [[u8; 3]; 10] = [
    [255, 0, 0],
    [0, 255, 0],
    [0, 0, 255],
    [255, 255, 0],
    [255, 0, 255],
    [0, 255, 255],
    [128, 0, 255],
    [255, 128, 0],
    [128, 255, 0],
    [0, 128, 255],
];

/// クラスIDに対応する描画色
pub fn class_color(class: u8) -> Rgb<u8> {
    Rgb(COLORS[class as usize % COLORS.len()])
}

/// 探索するシステムフォント
pub const FONT_CANDIDATES: [&str; 2] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
];

fn read_font(path: &Path) -> Option<Font<'static>> {
    let bytes = std::fs::read(path).ok()?;
    let font = Font::try_from_vec(bytes);
    if font.is_none() {
        warn!("not a usable TrueType font: {}", path.display());
    }
    font
}

/// 画像上に線を描画します。
///
/// # Args
///
/// * `img` - 線を描画する画像 (in-place)
/// * `x1`, `y1`, `x2`, `y2` - 線の始点と終点の座標 (水平か垂直のみ)
/// * `thickness` - 線の太さ
/// * `color` - 線の色
fn draw_line(img: &mut RgbImage, x1: f32, y1: f32, x2: f32, y2: f32, thickness: f32, color: Rgb<u8>) {
    let (bx, by) = (
        x1.min(x2) - (thickness / 2.).floor(),
        y1.min(y2) - (thickness / 2.).floor(),
    );

    let (w, h) = if x1 == x2 {
        (thickness, (y2 - y1).abs() + thickness)
    } else {
        ((x2 - x1).abs() + thickness, thickness)
    };

    let rect = Rect::at(bx as i32, by as i32).of_size(w.max(1.) as u32, h.max(1.) as u32);
    draw_filled_rect_mut(img, rect, color);
}

/// 画像上に矩形を描画します。
fn draw_rect(img: &mut RgbImage, x1: f32, y1: f32, x2: f32, y2: f32, thickness: f32, color: Rgb<u8>) {
    draw_line(img, x1, y1, x1, y2, thickness, color);
    draw_line(img, x1, y2, x2, y2, thickness, color);
    draw_line(img, x1, y1, x2, y1, thickness, color);
    draw_line(img, x2, y1, x2, y2, thickness, color);
}

/// 検出結果やステータスを描画するための構造体
pub struct Overlay {
    font: Option<Font<'static>>,
    font_size: f32,
    line_thickness: f32,
}

impl Overlay {
    /// フォントを読み込んで新しい `Overlay` を作成します。
    ///
    /// `font_path` が読めない場合は [`FONT_CANDIDATES`] を順に試し，
    /// どれも使えなければ文字の描画を省略します。
    ///
    /// # Args
    /// * `font_path` - TrueTypeフォントのパス
    /// * `font_size` - 文字の大きさ (px)
    /// * `line_thickness` - BBoxの線の太さ
    pub fn load(font_path: Option<&Path>, font_size: f32, line_thickness: f32) -> Self {
        let font = font_path
            .and_then(read_font)
            .or_else(|| FONT_CANDIDATES.iter().find_map(|p| read_font(Path::new(p))));
        match &font {
            Some(_) => debug!("overlay font loaded"),
            None => warn!("no TrueType font found, labels and status text will not be drawn"),
        }
        Self {
            font,
            font_size,
            line_thickness: line_thickness.max(1.),
        }
    }

    /// 文字を描画しない `Overlay` を作成します。
    pub fn without_font(line_thickness: f32) -> Self {
        Self {
            font: None,
            font_size: 16.,
            line_thickness: line_thickness.max(1.),
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// 画像上に文字を描画します。フォントがない場合は何もしません。
    pub fn draw_text(&self, img: &mut RgbImage, text: &str, x: i32, y: i32, color: Rgb<u8>) {
        if let Some(font) = &self.font {
            draw_text_mut(img, color, x, y, Scale::uniform(self.font_size), font, text);
        }
    }

    /// 画像の左上にステータス行を上から順に描画します。
    pub fn draw_status(&self, img: &mut RgbImage, lines: &[(String, Rgb<u8>)]) {
        let step = (self.font_size * 1.5).round() as i32;
        for (i, (text, color)) in lines.iter().enumerate() {
            self.draw_text(img, text, 10, 10 + step * i as i32, *color);
        }
    }

    /// 画像上にラベルを描画します。
    ///
    /// # Args
    ///
    /// * `img` - ラベルを描画する画像 (in-place)
    /// * `x1`, `y1` - BBoxの左上の座標
    /// * `bg_color` - ラベルの背景色
    /// * `text` - ラベルに表示するテキスト
    fn draw_label(&self, img: &mut RgbImage, x1: f32, y1: f32, bg_color: Rgb<u8>, text: &str) {
        let Some(font) = &self.font else {
            return;
        };
        let label_h = self.font_size;
        let dx1 = x1 - (self.line_thickness / 2.).floor();
        // 上に余白がない場合はBBoxの内側に置く
        let label_y = if y1 - label_h >= 0. { y1 - label_h } else { y1 };

        let pad = 4.;
        let scale = Scale::uniform(label_h);
        let (text_w, _) = text_size(scale, font, text);
        let v_metrics = font.v_metrics(scale);
        let text_h = v_metrics.ascent - v_metrics.descent + v_metrics.line_gap;

        let rect = Rect::at(dx1 as i32, label_y as i32)
            .of_size((text_w.max(0) as f32 + pad * 2.) as u32, label_h.max(1.) as u32);
        draw_filled_rect_mut(img, rect, bg_color);

        let text_y = label_y + (label_h - text_h) / 2.;
        let text_color = if (bg_color[0] as i32 + bg_color[1] as i32 + bg_color[2] as i32) < 382 {
            Rgb([255u8, 255, 255])
        } else {
            Rgb([0u8, 0, 0])
        };
        draw_text_mut(img, text_color, (dx1 + pad) as i32, text_y as i32, scale, font, text);
    }

    /// 画像上にバウンディングボックスとラベルを描画します。
    ///
    /// # Args
    ///
    /// * `img` - バウンディングボックスとラベルを描画する画像 (in-place)
    /// * `d_result` - 検出結果の配列
    pub fn draw_bbox(&self, img: &mut RgbImage, d_result: &[DetectionData]) {
        // コンフィデンスの高いものを上に描く
        let mut sorted = d_result.to_vec();
        sorted.sort_by(|a, b| {
            a.confidence
                .partial_cmp(&b.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        for d in sorted.iter() {
            let color = class_color(d.class);

            let x1 = d.x1.round();
            let y1 = d.y1.round();
            let x2 = d.x2.round();
            let y2 = d.y2.round();

            draw_rect(img, x1, y1, x2, y2, self.line_thickness, color);
            self.draw_label(img, x1, y1, color, &d.label());
        }
    }
}
