//! TOML設定ファイルの読み込み
//!
//! ```toml
//! [camera]
//! device = "/dev/video0"
//! width = 1920
//! height = 1080
//!
//! [model]
//! path = "/usr/share/hailo-models/yolov8s.onnx"
//! threshold = 0.5
//!
//! [output]
//! dir = "out"
//! save_interval = 30
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, ensure, Result};
use serde::Deserialize;

use crate::camera::{CameraConfig, PixelFormat, DEFAULT_DEVICE};
use crate::engine::{InputShape, TensorLayout};
use crate::img_proc::ResizeMode;
use crate::postprocess::{OutputLayout, PostProcessParams};

/// 設定ファイルのパスを指定する環境変数
pub const CONFIG_ENV: &str = "HAILO_PREVIEW_CONFIG";

const DEFAULT_WIDTH: u32 = 1920;
const DEFAULT_HEIGHT: u32 = 1080;
const DEFAULT_FPS: u32 = 30;
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_OUTPUT_DIR: &str = ".";
const DEFAULT_SAVE_INTERVAL: u64 = 30;
const DEFAULT_LATEST_INTERVAL_SECS: f64 = 2.0;
const DEFAULT_JPEG_QUALITY: u8 = 85;
const DEFAULT_FONT_SIZE: f32 = 20.0;
const DEFAULT_LINE_THICKNESS: f32 = 2.0;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PreviewConfigFile {
    camera: Option<CameraConfigFile>,
    model: Option<ModelConfigFile>,
    output: Option<OutputConfigFile>,
    overlay: Option<OverlayConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
    pixel_format: Option<PixelFormat>,
    rotation: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ModelConfigFile {
    path: Option<PathBuf>,
    layout: Option<OutputLayout>,
    input_size: Option<u32>,
    tensor_layout: Option<TensorLayout>,
    resize: Option<ResizeMode>,
    classes: Option<usize>,
    threshold: Option<f32>,
    nms_threshold: Option<f32>,
    nms: Option<bool>,
    max_detections: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct OutputConfigFile {
    dir: Option<PathBuf>,
    save_interval: Option<u64>,
    latest_interval_secs: Option<f64>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct OverlayConfigFile {
    font: Option<PathBuf>,
    font_size: Option<f32>,
    line_thickness: Option<f32>,
    status: Option<bool>,
}

/// モデルと後処理の設定
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    pub path: Option<PathBuf>,
    pub layout: OutputLayout,
    pub input_size: u32,
    pub tensor_layout: TensorLayout,
    pub resize: ResizeMode,
    pub classes: usize,
    pub threshold: f32,
    pub nms_threshold: f32,
    pub nms: bool,
    pub max_detections: usize,
}

impl ModelSettings {
    pub fn input_shape(&self) -> InputShape {
        InputShape::square(self.input_size, self.tensor_layout)
    }

    pub fn post_process_params(&self) -> PostProcessParams {
        PostProcessParams {
            cls_num: self.classes,
            obj_threshold: self.threshold,
            nms_threshold: self.nms_threshold,
            nms_enabled: self.nms,
            max_detections: self.max_detections,
        }
    }
}

/// 保存の設定
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSettings {
    pub dir: PathBuf,
    pub save_interval: u64,
    /// `latest_preview.jpg` を上書きする最短間隔 (秒)
    pub latest_interval_secs: f64,
    pub jpeg_quality: u8,
}

impl OutputSettings {
    /// `latest_preview.jpg` の更新間隔。`validate()` を通っていない値はゼロになります。
    pub fn latest_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.latest_interval_secs).unwrap_or_default()
    }
}

/// 描画の設定
#[derive(Debug, Clone, PartialEq)]
pub struct OverlaySettings {
    pub font: Option<PathBuf>,
    pub font_size: f32,
    pub line_thickness: f32,
    pub status: bool,
}

/// プレビューの設定
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewConfig {
    pub camera: CameraConfig,
    pub rotation: u32,
    pub model: ModelSettings,
    pub output: OutputSettings,
    pub overlay: OverlaySettings,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self::from_file(PreviewConfigFile::default())
    }
}

impl PreviewConfig {
    /// 設定を読み込みます。
    ///
    /// `path` が `None` の場合は環境変数 `HAILO_PREVIEW_CONFIG` を見て，
    /// それもなければ既定値を使います。
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let file_cfg = match path.or(env_path.as_deref()) {
            Some(path) => read_config_file(path)?,
            None => PreviewConfigFile::default(),
        };
        let cfg = Self::from_file(file_cfg);
        cfg.validate()?;
        Ok(cfg)
    }

    /// TOML文字列から設定を作成します。
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: PreviewConfigFile = toml::from_str(raw).map_err(|e| anyhow!("invalid config: {}", e))?;
        let cfg = Self::from_file(file);
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PreviewConfigFile) -> Self {
        let camera = file.camera.unwrap_or_default();
        let model = file.model.unwrap_or_default();
        let output = file.output.unwrap_or_default();
        let overlay = file.overlay.unwrap_or_default();
        let defaults = PostProcessParams::default();

        Self {
            camera: CameraConfig {
                device: camera.device.unwrap_or_else(|| DEFAULT_DEVICE.to_string()),
                width: camera.width.unwrap_or(DEFAULT_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_HEIGHT),
                fps: camera.fps.unwrap_or(DEFAULT_FPS),
                pixel_format: camera.pixel_format.unwrap_or_default(),
            },
            rotation: camera.rotation.unwrap_or(0),
            model: ModelSettings {
                path: model.path,
                layout: model.layout.unwrap_or_default(),
                input_size: model.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
                tensor_layout: model.tensor_layout.unwrap_or_default(),
                resize: model.resize.unwrap_or_default(),
                classes: model.classes.unwrap_or(defaults.cls_num),
                threshold: model.threshold.unwrap_or(defaults.obj_threshold),
                nms_threshold: model.nms_threshold.unwrap_or(defaults.nms_threshold),
                nms: model.nms.unwrap_or(defaults.nms_enabled),
                max_detections: model.max_detections.unwrap_or(defaults.max_detections),
            },
            output: OutputSettings {
                dir: output.dir.unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
                save_interval: output.save_interval.unwrap_or(DEFAULT_SAVE_INTERVAL),
                latest_interval_secs: output
                    .latest_interval_secs
                    .unwrap_or(DEFAULT_LATEST_INTERVAL_SECS),
                jpeg_quality: output.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            },
            overlay: OverlaySettings {
                font: overlay.font,
                font_size: overlay.font_size.unwrap_or(DEFAULT_FONT_SIZE),
                line_thickness: overlay.line_thickness.unwrap_or(DEFAULT_LINE_THICKNESS),
                status: overlay.status.unwrap_or(true),
            },
        }
    }

    /// 値の範囲を確認します。CLIで上書きした後にも呼び出してください。
    pub fn validate(&self) -> Result<()> {
        ensure!(
            (0.0..=1.0).contains(&self.model.threshold),
            "threshold must be within [0, 1], got {}",
            self.model.threshold
        );
        ensure!(
            (0.0..=1.0).contains(&self.model.nms_threshold),
            "nms_threshold must be within [0, 1], got {}",
            self.model.nms_threshold
        );
        ensure!(
            self.camera.width > 0 && self.camera.height > 0,
            "frame size must be non-zero, got {}x{}",
            self.camera.width,
            self.camera.height
        );
        ensure!(self.camera.fps > 0, "fps must be greater than zero");
        ensure!(
            matches!(self.rotation, 0 | 90 | 180 | 270),
            "rotation must be 0, 90, 180 or 270, got {}",
            self.rotation
        );
        ensure!(
            (1..=100).contains(&self.output.jpeg_quality),
            "jpeg_quality must be within 1..=100, got {}",
            self.output.jpeg_quality
        );
        let secs = self.output.latest_interval_secs;
        ensure!(
            secs >= 0. && Duration::try_from_secs_f64(secs).is_ok(),
            "latest_interval_secs must be a finite non-negative number, got {}",
            secs
        );
        ensure!(self.model.input_size > 0, "input_size must be greater than zero");
        ensure!(self.model.classes > 0, "classes must be greater than zero");
        ensure!(self.overlay.font_size > 0., "font_size must be positive");
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<PreviewConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
