//! カメラ画像に検出結果を描画して保存するライブプレビュー
//!
//! 実行中は標準入力から `s` + Enter で現在のフレームを保存し，`q` + Enter で終了します。

use std::collections::BTreeSet;
use std::io::BufRead;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use image::RgbImage;
use log::{info, warn};

use rpi_hailo_yolo::config::{PreviewConfig, CONFIG_ENV};
use rpi_hailo_yolo::detector::Detector;
use rpi_hailo_yolo::img_proc::Overlay;
use rpi_hailo_yolo::model::{self, ModelInfo};
use rpi_hailo_yolo::pipeline::{FramePipeline, PipelineOptions};
use rpi_hailo_yolo::postprocess::OutputLayout;
use rpi_hailo_yolo::snapshot::SnapshotWriter;
use rpi_hailo_yolo::stats::{FpsCounter, RunSummary};

/// 何フレームごとにログを出すか
const REPORT_EVERY: u64 = 30;

#[derive(Parser, Debug)]
#[command(author, version, about = "Hailo-8 camera preview with YOLO overlays")]
struct Args {
    /// TOML config file.
    #[arg(long, env = CONFIG_ENV)]
    config: Option<PathBuf>,
    /// Model file (.hef or .onnx). Searched in the default locations when omitted.
    #[arg(long)]
    model: Option<PathBuf>,
    /// Confidence threshold.
    #[arg(long)]
    threshold: Option<f32>,
    /// IoU threshold for NMS.
    #[arg(long)]
    nms_threshold: Option<f32>,
    /// Raw output layout of the model.
    #[arg(long, value_enum)]
    layout: Option<OutputLayout>,
    /// Camera device (/dev/videoN, stub://name or file://path).
    #[arg(long)]
    device: Option<String>,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    #[arg(long)]
    fps: Option<u32>,
    /// Camera mounting angle (0, 90, 180, 270).
    #[arg(long)]
    rotation: Option<u32>,
    /// Directory for saved frames.
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// Save a frame every N frames (0 disables).
    #[arg(long)]
    save_interval: Option<u64>,
    /// Run for N seconds (0 = until stopped).
    #[arg(long, default_value_t = 0)]
    duration: u64,
    /// TrueType font for labels.
    #[arg(long)]
    font: Option<PathBuf>,
}

impl Args {
    /// コマンドライン引数で設定を上書きします。
    fn apply(&self, cfg: &mut PreviewConfig) {
        if let Some(model) = &self.model {
            cfg.model.path = Some(model.clone());
        }
        if let Some(v) = self.threshold {
            cfg.model.threshold = v;
        }
        if let Some(v) = self.nms_threshold {
            cfg.model.nms_threshold = v;
        }
        if let Some(v) = self.layout {
            cfg.model.layout = v;
        }
        if let Some(v) = &self.device {
            cfg.camera.device = v.clone();
        }
        if let Some(v) = self.width {
            cfg.camera.width = v;
        }
        if let Some(v) = self.height {
            cfg.camera.height = v;
        }
        if let Some(v) = self.fps {
            cfg.camera.fps = v;
        }
        if let Some(v) = self.rotation {
            cfg.rotation = v;
        }
        if let Some(v) = &self.output_dir {
            cfg.output.dir = v.clone();
        }
        if let Some(v) = self.save_interval {
            cfg.output.save_interval = v;
        }
        if let Some(v) = &self.font {
            cfg.overlay.font = Some(v.clone());
        }
    }
}

enum Command {
    Save,
    Quit,
}

/// 標準入力のコマンドを読むスレッド
fn spawn_stdin_reader(tx: Sender<Command>) {
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            let cmd = match line.trim() {
                "s" => Command::Save,
                "q" => Command::Quit,
                "" => continue,
                other => {
                    warn!("unknown command {:?} (s: save, q: quit)", other);
                    continue;
                }
            };
            if tx.send(cmd).is_err() {
                break;
            }
        }
    });
}

fn open_detector(cfg: &PreviewConfig) -> Result<Option<Detector>> {
    let path = match cfg.model.path.clone() {
        Some(path) => path,
        None => match model::find_model(&model::default_model_paths()) {
            Some(path) => {
                info!("using default model {}", path.display());
                path
            }
            None => {
                info!("no model found, running camera only");
                return Ok(None);
            }
        },
    };

    let info = match ModelInfo::probe(&path) {
        Ok(info) => info,
        Err(e) => {
            warn!("{:#}, running camera only", e);
            return Ok(None);
        }
    };
    let engine = model::open_engine(&info, cfg.model.input_shape())?;
    Ok(engine.map(|engine| {
        Detector::new(
            engine,
            cfg.model.post_process_params(),
            cfg.model.layout,
            cfg.model.resize,
        )
    }))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = PreviewConfig::load(args.config.as_deref())?;
    args.apply(&mut cfg);
    cfg.validate()?;

    println!("{}", "=".repeat(60));
    println!("     Hailo-8 Camera Preview");
    println!("{}", "=".repeat(60));

    let detector = open_detector(&cfg)?;
    let camera_only = detector.is_none();
    let overlay = Overlay::load(
        cfg.overlay.font.as_deref(),
        cfg.overlay.font_size,
        cfg.overlay.line_thickness,
    );
    let mut writer = SnapshotWriter::new(
        &cfg.output.dir,
        cfg.output.jpeg_quality,
        cfg.output.save_interval,
        cfg.output.latest_interval(),
    )?;

    let (cmd_tx, cmd_rx) = unbounded();
    let ctrlc_tx = cmd_tx.clone();
    ctrlc::set_handler(move || {
        let _ = ctrlc_tx.send(Command::Quit);
    })
    .context("error setting Ctrl-C handler")?;
    spawn_stdin_reader(cmd_tx);

    let options = PipelineOptions {
        rotation: cfg.rotation,
        draw_status: cfg.overlay.status,
        ..Default::default()
    };
    let mut pipeline = FramePipeline::spawn(cfg.camera.clone(), detector, overlay, options)?;

    info!(
        "camera {} {}x{} @ {} fps{}",
        cfg.camera.device,
        cfg.camera.width,
        cfg.camera.height,
        cfg.camera.fps,
        if camera_only { " (camera only)" } else { "" }
    );
    if cfg.output.save_interval > 0 {
        info!(
            "saving a frame every {} frames to {}",
            cfg.output.save_interval,
            writer.dir().display()
        );
    }
    println!("Capturing frames... (Ctrl+C or q + Enter to stop, s + Enter to save)");

    let deadline = (args.duration > 0).then(|| Instant::now() + Duration::from_secs(args.duration));
    let mut fps = FpsCounter::new();
    let mut last_frame: Option<RgbImage> = None;

    'main: loop {
        for cmd in cmd_rx.try_iter() {
            match cmd {
                Command::Quit => break 'main,
                Command::Save => match &last_frame {
                    Some(img) => match writer.save_timestamped("detection", img) {
                        Ok(path) => println!("Saved: {}", path.display()),
                        Err(e) => warn!("snapshot failed: {:#}", e),
                    },
                    None => warn!("no frame to save yet"),
                },
            }
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            info!("duration reached");
            break;
        }

        let frame = match pipeline.recv_timeout(Duration::from_millis(200)) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let count = fps.tick();
        if let Err(e) = writer.on_frame(count, &frame.image) {
            warn!("frame {} not saved: {:#}", count, e);
        }
        if fps.should_report(REPORT_EVERY) {
            let names: BTreeSet<_> = frame.detections.iter().map(|d| d.class_name()).collect();
            let names: Vec<_> = names.into_iter().collect();
            info!(
                "FPS: {:.1} | Detections: {} | inference {:.1} ms{}",
                fps.fps(),
                frame.detections.len(),
                frame.inference_time.as_secs_f64() * 1000.,
                if names.is_empty() {
                    String::new()
                } else {
                    format!(" | {}", names.join(", "))
                }
            );
        }
        last_frame = Some(frame.image);
    }

    let capture_result = pipeline.stop();
    let stats = pipeline.stats();
    if stats.capture_dropped + stats.result_dropped > 0 {
        info!(
            "dropped {} frames at capture, {} at output",
            stats.capture_dropped, stats.result_dropped
        );
    }
    if stats.inference_errors > 0 {
        warn!("{} frames failed inference", stats.inference_errors);
    }

    let summary = RunSummary {
        total_frames: fps.frames(),
        elapsed: fps.elapsed(),
        saved_frames: writer.saved(),
        failed_saves: writer.failed(),
    };
    println!();
    println!("{}", summary);
    println!("Preview stopped");

    capture_result
}
