//! カメラからフレームを取得するモジュール
//!
//! デバイス名で取得元を切り替えます。
//!
//! * `stub://<name>` - 動くテストパターンを生成する
//! * `file://<path>` - 静止画を `fps` で繰り返す
//! * それ以外 - V4L2デバイスのパス (`v4l2` feature が必要)

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use image::{Rgb, RgbImage};
use log::{debug, info};
use serde::Deserialize;

use crate::img_proc;

pub const DEFAULT_DEVICE: &str = "/dev/video0";

/// カメラのピクセルフォーマット
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum PixelFormat {
    #[default]
    Mjpg,
    Yuyv,
    Rgb3,
}

impl PixelFormat {
    pub fn fourcc(&self) -> [u8; 4] {
        match self {
            Self::Mjpg => *b"MJPG",
            Self::Yuyv => *b"YUYV",
            Self::Rgb3 => *b"RGB3",
        }
    }

    pub fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"MJPG" => Some(Self::Mjpg),
            b"YUYV" => Some(Self::Yuyv),
            b"RGB3" => Some(Self::Rgb3),
            _ => None,
        }
    }

    /// ドライバから受け取ったバッファをRGB画像に変換します。
    ///
    /// # Args
    /// * `data` - フレームのバッファ
    /// * `width`, `height` - フレームサイズ
    pub fn decode(&self, data: &[u8], width: u32, height: u32) -> Result<RgbImage> {
        match self {
            Self::Mjpg => Ok(image::load_from_memory(data)
                .context("failed to decode MJPG frame")?
                .to_rgb8()),
            Self::Yuyv => img_proc::yuyv_to_rgb(data, width, height),
            Self::Rgb3 => {
                let len = width as usize * height as usize * 3;
                let raw = data
                    .get(..len)
                    .with_context(|| format!("RGB3 frame too small: {} bytes", data.len()))?;
                RgbImage::from_raw(width, height, raw.to_vec()).context("RGB3 frame size mismatch")
            }
        }
    }
}

/// カメラの設定
#[derive(Debug, Clone, PartialEq)]
pub struct CameraConfig {
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub pixel_format: PixelFormat,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: DEFAULT_DEVICE.to_string(),
            width: 1920,
            height: 1080,
            fps: 30,
            pixel_format: PixelFormat::Mjpg,
        }
    }
}

impl CameraConfig {
    fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1. / self.fps.max(1) as f64)
    }
}

/// 一定間隔でフレームを出すためのタイマー
struct Pacer {
    interval: Duration,
    next: Instant,
}

impl Pacer {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    fn wait(&mut self) {
        let now = Instant::now();
        if self.next > now {
            thread::sleep(self.next - now);
        }
        self.next = Instant::now().max(self.next) + self.interval;
    }
}

/// テストパターンを生成します。
///
/// 斜めのグラデーションの上を白い正方形が横に動きます。
fn synthetic_frame(width: u32, height: u32, frame: u64) -> RgbImage {
    let mut img = RgbImage::from_fn(width, height, |x, y| {
        let v = ((x as u64 + y as u64 + frame) % 256) as u8;
        Rgb([v, v / 2, 255 - v])
    });
    let side = (width.min(height) / 4).max(1);
    let span = width.saturating_sub(side).max(1) as u64;
    let x0 = ((frame * 8) % span) as u32;
    let y0 = (height - side.min(height)) / 2;
    for y in y0..(y0 + side).min(height) {
        for x in x0..(x0 + side).min(width) {
            img.put_pixel(x, y, Rgb([255, 255, 255]));
        }
    }
    img
}

fn run_synthetic<F>(cfg: &CameraConfig, on_frame: &mut F) -> Result<()>
where
    F: FnMut(RgbImage) -> bool,
{
    info!("camera {}: synthetic {}x{} @ {} fps", cfg.device, cfg.width, cfg.height, cfg.fps);
    let mut pacer = Pacer::new(cfg.frame_interval());
    for frame in 0u64.. {
        pacer.wait();
        if !on_frame(synthetic_frame(cfg.width, cfg.height, frame)) {
            break;
        }
    }
    Ok(())
}

fn run_still<F>(cfg: &CameraConfig, path: &Path, on_frame: &mut F) -> Result<()>
where
    F: FnMut(RgbImage) -> bool,
{
    let img = image::open(path)
        .with_context(|| format!("failed to open still image {}", path.display()))?
        .to_rgb8();
    info!(
        "camera {}: still image {}x{} @ {} fps",
        cfg.device,
        img.width(),
        img.height(),
        cfg.fps
    );
    let mut pacer = Pacer::new(cfg.frame_interval());
    loop {
        pacer.wait();
        if !on_frame(img.clone()) {
            break;
        }
    }
    Ok(())
}

#[cfg(feature = "v4l2")]
fn run_v4l2<F>(cfg: &CameraConfig, on_frame: &mut F) -> Result<()>
where
    F: FnMut(RgbImage) -> bool,
{
    use log::warn;
    use v4l::buffer::Type;
    use v4l::io::{mmap::Stream, traits::CaptureStream};
    use v4l::video::Capture;
    use v4l::{Device, FourCC};

    // カメラデバイスをOpen
    let dev = Device::with_path(&cfg.device)
        .with_context(|| format!("failed to open camera {}", cfg.device))?;

    // カメラのフォーマットを設定 (ドライバが近い値に丸めることがある)
    let mut fmt = dev.format()?;
    fmt.width = cfg.width;
    fmt.height = cfg.height;
    fmt.fourcc = FourCC::new(&cfg.pixel_format.fourcc());
    let fmt = dev.set_format(&fmt)?;

    let pixel_format = PixelFormat::from_fourcc(&fmt.fourcc.repr)
        .with_context(|| format!("camera {} chose unsupported format {}", cfg.device, fmt.fourcc))?;
    if pixel_format != cfg.pixel_format {
        warn!("camera {} uses {} instead of the requested format", cfg.device, fmt.fourcc);
    }

    let mut params = dev.params()?;
    params.interval.numerator = 1;
    params.interval.denominator = cfg.fps.max(1);
    if let Err(e) = dev.set_params(&params) {
        warn!("camera {}: could not set frame rate: {}", cfg.device, e);
    }

    info!("camera {}: {}x{} [{}] @ {} fps", cfg.device, fmt.width, fmt.height, fmt.fourcc, cfg.fps);

    let mut stream = Stream::with_buffers(&dev, Type::VideoCapture, 4)
        .with_context(|| format!("failed to map buffers of {}", cfg.device))?;

    loop {
        let (buf, meta) = CaptureStream::next(&mut stream)?;
        let used = (meta.bytesused as usize).min(buf.len());
        let data = if used == 0 { buf } else { &buf[..used] };
        let img = pixel_format.decode(data, fmt.width, fmt.height)?;
        if !on_frame(img) {
            break;
        }
    }
    Ok(())
}

#[cfg(not(feature = "v4l2"))]
fn run_v4l2<F>(cfg: &CameraConfig, _on_frame: &mut F) -> Result<()>
where
    F: FnMut(RgbImage) -> bool,
{
    bail!(
        "camera {} needs V4L2 support, rebuild with `--features v4l2` or use stub:// / file://",
        cfg.device
    )
}

/// V4L2デバイスの情報 (QUERYCAP)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCaps {
    pub card: String,
    pub driver: String,
    pub bus: String,
}

impl std::fmt::Display for DeviceCaps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (driver {}, bus {})", self.card, self.driver, self.bus)
    }
}

/// V4L2デバイスのカード名とドライバ名を問い合わせます。
#[cfg(feature = "v4l2")]
pub fn query_device(device: &str) -> Result<DeviceCaps> {
    use v4l::Device;

    let dev = Device::with_path(device).with_context(|| format!("failed to open camera {}", device))?;
    let caps = dev
        .query_caps()
        .with_context(|| format!("failed to query capabilities of {}", device))?;
    Ok(DeviceCaps {
        card: caps.card,
        driver: caps.driver,
        bus: caps.bus,
    })
}

#[cfg(not(feature = "v4l2"))]
pub fn query_device(device: &str) -> Result<DeviceCaps> {
    bail!("cannot query {} without V4L2 support", device)
}

/// `on_frame` が `false` を返すかエラーになるまでフレームを取得し続けます。
///
/// # Args
/// * `cfg` - カメラの設定
/// * `on_frame` - フレームごとに呼ばれる関数。`false` で取得を終了する
pub fn run_capture<F>(cfg: &CameraConfig, mut on_frame: F) -> Result<()>
where
    F: FnMut(RgbImage) -> bool,
{
    if cfg.width == 0 || cfg.height == 0 {
        bail!("invalid frame size {}x{}", cfg.width, cfg.height);
    }
    debug!("starting capture from {}", cfg.device);
    if cfg.device.starts_with("stub://") {
        run_synthetic(cfg, &mut on_frame)
    } else if let Some(path) = cfg.device.strip_prefix("file://") {
        run_still(cfg, Path::new(path), &mut on_frame)
    } else {
        run_v4l2(cfg, &mut on_frame)
    }
}

/// 決まった枚数のフレームを取得します。
pub fn capture_frames(cfg: &CameraConfig, n: usize) -> Result<Vec<RgbImage>> {
    let mut frames = Vec::with_capacity(n);
    if n == 0 {
        return Ok(frames);
    }
    run_capture(cfg, |img| {
        frames.push(img);
        frames.len() < n
    })?;
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub(width: u32, height: u32) -> CameraConfig {
        CameraConfig {
            device: "stub://test".to_string(),
            width,
            height,
            fps: 500,
            pixel_format: PixelFormat::Mjpg,
        }
    }

    #[test]
    fn stub_camera_produces_requested_frames() {
        let frames = capture_frames(&stub(64, 48), 3).unwrap();
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.dimensions() == (64, 48)));
        // パターンは毎フレーム動く
        assert_ne!(frames[0], frames[1]);
    }

    #[test]
    fn zero_frames_does_not_open_the_camera() {
        let cfg = CameraConfig {
            device: "/dev/does-not-exist".to_string(),
            ..stub(8, 8)
        };
        assert!(capture_frames(&cfg, 0).unwrap().is_empty());
    }

    #[test]
    fn still_image_is_replayed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("still.png");
        RgbImage::from_pixel(20, 10, Rgb([1, 2, 3])).save(&path).unwrap();
        let cfg = CameraConfig {
            device: format!("file://{}", path.display()),
            ..stub(640, 480)
        };
        let frames = capture_frames(&cfg, 2).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].dimensions(), (20, 10));
        assert_eq!(frames[1].get_pixel(0, 0), &Rgb([1, 2, 3]));
    }

    #[test]
    fn missing_still_image_is_an_error() {
        let cfg = CameraConfig {
            device: "file:///nonexistent/frame.jpg".to_string(),
            ..stub(8, 8)
        };
        assert!(capture_frames(&cfg, 1).is_err());
    }

    #[test]
    fn zero_frame_size_is_rejected() {
        assert!(capture_frames(&stub(0, 10), 1).is_err());
    }

    #[test]
    fn rgb3_decoding_checks_length() {
        let data = vec![7u8; 2 * 2 * 3];
        let img = PixelFormat::Rgb3.decode(&data, 2, 2).unwrap();
        assert_eq!(img.get_pixel(1, 1), &Rgb([7, 7, 7]));
        assert!(PixelFormat::Rgb3.decode(&data[..5], 2, 2).is_err());
    }

    #[test]
    fn mjpg_decoding_reads_jpeg() {
        let mut jpeg = vec![];
        let src = RgbImage::from_pixel(16, 8, Rgb([128, 128, 128]));
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 90)
            .encode(src.as_raw(), 16, 8, image::ColorType::Rgb8)
            .unwrap();
        let img = PixelFormat::Mjpg.decode(&jpeg, 16, 8).unwrap();
        assert_eq!(img.dimensions(), (16, 8));
        assert!(PixelFormat::Mjpg.decode(b"not a jpeg", 16, 8).is_err());
    }

    #[test]
    fn fourcc_round_trip() {
        for f in [PixelFormat::Mjpg, PixelFormat::Yuyv, PixelFormat::Rgb3] {
            assert_eq!(PixelFormat::from_fourcc(&f.fourcc()), Some(f));
        }
        assert_eq!(PixelFormat::from_fourcc(b"H264"), None);
    }

    #[test]
    fn query_missing_device_is_an_error() {
        assert!(query_device("/nonexistent/video99").is_err());
    }

    #[test]
    fn device_caps_display() {
        let caps = DeviceCaps {
            card: "unicam".to_string(),
            driver: "unicam".to_string(),
            bus: "platform:fe801000.csi".to_string(),
        };
        assert_eq!(caps.to_string(), "unicam (driver unicam, bus platform:fe801000.csi)");
    }
}
