//! # Raspberry Pi + Hailo-8 YOLO プレビューライブラリ
//!
//! このクレートは、Raspberry Piのカメラ画像に対してYOLOによる物体検出を行い、
//! 検出結果を描画して保存するためのRustライブラリです。
//!
//! ## 主な機能
//!
//! 1. **カメラ画像の取得**: V4L2デバイス，静止画，テストパターンからフレームを取得します。
//! 2. **推論**: [`engine::InferenceEngine`] を実装したエンジンでモデルを実行します。
//! 3. **後処理**: YOLOの出力をバウンディングボックスに変換します。
//! 4. **描画と保存**: 検出結果を描画し，JPEGで保存します。
//!
//! ## Example
//! ```no_run
//! use rpi_hailo_yolo::camera::{self, CameraConfig};
//! use rpi_hailo_yolo::img_proc::Overlay;
//!
//! let cfg = CameraConfig { device: "stub://demo".into(), ..Default::default() };
//! let overlay = Overlay::load(None, 20., 2.);
//! for mut frame in camera::capture_frames(&cfg, 5)? {
//!     overlay.draw_bbox(&mut frame, &[]);
//! }
//! # anyhow::Ok(())
//! ```

pub mod camera;
pub mod coco;
pub mod config;
pub mod detection_result;
pub mod detector;
pub mod device;
pub mod engine;
pub mod engines;
pub mod img_proc;
pub mod model;
pub mod pipeline;
pub mod postprocess;
pub mod snapshot;
pub mod stats;

mod nms;
