//! カメラと推論を別スレッドで動かすパイプライン
//!
//! 推論中もカメラのバッファを更新し続けるため，取得と推論を2つのスレッドに分けます。
//! スレッド間のキューは長さ2で，いっぱいのときは新しいフレームを捨てます。

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use chrono::Local;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use image::{Rgb, RgbImage};
use log::{debug, error, info, warn};

use crate::camera::{self, CameraConfig};
use crate::detection_result::DetectionData;
use crate::detector::Detector;
use crate::img_proc::{self, Overlay};
use crate::stats::FpsCounter;

/// パイプラインの設定
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineOptions {
    /// カメラの取り付け角度
    pub rotation: u32,
    /// キューの長さ
    pub queue_depth: usize,
    /// ステータス行を描画するか
    pub draw_status: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            rotation: 0,
            queue_depth: 2,
            draw_status: true,
        }
    }
}

/// 推論と描画が終わったフレーム
#[derive(Debug, Clone)]
pub struct ProcessedFrame {
    /// 1から始まるフレーム番号
    pub index: u64,
    pub image: RgbImage,
    pub detections: Vec<DetectionData>,
    pub inference_time: Duration,
}

/// パイプラインの集計
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub captured: u64,
    pub capture_dropped: u64,
    pub processed: u64,
    pub result_dropped: u64,
    pub inference_errors: u64,
}

#[derive(Default)]
struct Counters {
    captured: AtomicU64,
    capture_dropped: AtomicU64,
    processed: AtomicU64,
    result_dropped: AtomicU64,
    inference_errors: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            captured: self.captured.load(Ordering::Relaxed),
            capture_dropped: self.capture_dropped.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            result_dropped: self.result_dropped.load(Ordering::Relaxed),
            inference_errors: self.inference_errors.load(Ordering::Relaxed),
        }
    }
}

/// 取得スレッドと推論スレッドを持つパイプライン
pub struct FramePipeline {
    stop: Arc<AtomicBool>,
    counters: Arc<Counters>,
    result_rx: Receiver<ProcessedFrame>,
    capture_handle: Option<thread::JoinHandle<Result<()>>>,
    inference_handle: Option<thread::JoinHandle<()>>,
}

impl FramePipeline {
    /// スレッドを起動します。
    ///
    /// # Args
    /// * `camera` - カメラの設定
    /// * `detector` - 物体検出器 (`None` ならカメラのみ)
    /// * `overlay` - 描画の設定
    /// * `options` - パイプラインの設定
    pub fn spawn(
        camera: CameraConfig,
        detector: Option<Detector>,
        overlay: Overlay,
        options: PipelineOptions,
    ) -> Result<Self> {
        let depth = options.queue_depth.max(1);
        let (frame_tx, frame_rx) = bounded::<(u64, RgbImage)>(depth);
        let (result_tx, result_rx) = bounded::<ProcessedFrame>(depth);
        let stop = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(Counters::default());

        let capture_handle = {
            let stop = stop.clone();
            let counters = counters.clone();
            thread::Builder::new()
                .name("capture".to_string())
                .spawn(move || capture_loop(&camera, options.rotation, frame_tx, &stop, &counters))?
        };

        let inference_handle = {
            let stop = stop.clone();
            let counters = counters.clone();
            thread::Builder::new().name("inference".to_string()).spawn(move || {
                inference_loop(detector, overlay, options, frame_rx, result_tx, &stop, &counters)
            })?
        };

        Ok(Self {
            stop,
            counters,
            result_rx,
            capture_handle: Some(capture_handle),
            inference_handle: Some(inference_handle),
        })
    }

    /// 処理済みのフレームがあれば受け取ります。
    pub fn try_recv(&self) -> Option<ProcessedFrame> {
        self.result_rx.try_recv().ok()
    }

    /// 処理済みのフレームを待ちます。
    ///
    /// 両方のスレッドが終了すると `Disconnected` になります。
    pub fn recv_timeout(&self, timeout: Duration) -> Result<ProcessedFrame, RecvTimeoutError> {
        self.result_rx.recv_timeout(timeout)
    }

    pub fn stats(&self) -> PipelineStats {
        self.counters.snapshot()
    }

    pub fn is_stopping(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// スレッドを停止します。取得スレッドのエラーはここで返します。
    pub fn stop(&mut self) -> Result<()> {
        self.stop.store(true, Ordering::SeqCst);

        let mut result = Ok(());
        if let Some(handle) = self.capture_handle.take() {
            match handle.join() {
                Ok(r) => result = r,
                Err(_) => result = Err(anyhow!("capture thread panicked")),
            }
        }
        if let Some(handle) = self.inference_handle.take() {
            if handle.join().is_err() {
                result = result.and(Err(anyhow!("inference thread panicked")));
            }
        }
        let s = self.stats();
        debug!(
            "pipeline stopped: captured {}, processed {}, dropped {}/{}",
            s.captured, s.processed, s.capture_dropped, s.result_dropped
        );
        result
    }
}

impl Drop for FramePipeline {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("{:#}", e);
        }
    }
}

fn capture_loop(
    camera: &CameraConfig,
    rotation: u32,
    frame_tx: Sender<(u64, RgbImage)>,
    stop: &AtomicBool,
    counters: &Counters,
) -> Result<()> {
    let mut index = 0u64;
    let result = camera::run_capture(camera, |img| {
        if stop.load(Ordering::SeqCst) {
            return false;
        }
        index += 1;
        Counters::bump(&counters.captured);
        let img = img_proc::rotate_img(img, rotation);
        match frame_tx.try_send((index, img)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                Counters::bump(&counters.capture_dropped);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    });
    if let Err(e) = &result {
        error!("capture stopped: {:#}", e);
    }
    result
}

fn inference_loop(
    mut detector: Option<Detector>,
    overlay: Overlay,
    options: PipelineOptions,
    frame_rx: Receiver<(u64, RgbImage)>,
    result_tx: Sender<ProcessedFrame>,
    stop: &AtomicBool,
    counters: &Counters,
) {
    if let Some(det) = detector.as_mut() {
        info!("inference engine: {}", det.engine_name());
        if let Err(e) = det.warm_up() {
            warn!("warm-up failed: {:#}", e);
        }
    }

    let mut fps = FpsCounter::new();
    while !stop.load(Ordering::SeqCst) {
        let (index, mut img) = match frame_rx.recv_timeout(Duration::from_secs(1)) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let start = Instant::now();
        let detections = match detector.as_mut() {
            Some(det) => det.start_with_img_proc(&img).unwrap_or_else(|e| {
                Counters::bump(&counters.inference_errors);
                warn!("inference failed on frame {}: {:#}", index, e);
                vec![]
            }),
            None => vec![],
        };
        let inference_time = start.elapsed();
        fps.tick();

        overlay.draw_bbox(&mut img, &detections);
        if options.draw_status {
            let mut lines = vec![(
                format!(
                    "Hailo-8 Preview | Frame: {} | {}",
                    index,
                    Local::now().format("%Y-%m-%d %H:%M:%S")
                ),
                Rgb([0u8, 255, 0]),
            )];
            lines.push((format!("FPS: {:.1}", fps.fps()), Rgb([255, 255, 0])));
            if detector.is_some() {
                lines.push((format!("Detections: {}", detections.len()), Rgb([0, 255, 0])));
            }
            overlay.draw_status(&mut img, &lines);
        }

        Counters::bump(&counters.processed);
        let frame = ProcessedFrame {
            index,
            image: img,
            detections,
            inference_time,
        };
        match result_tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => Counters::bump(&counters.result_dropped),
            Err(TrySendError::Disconnected(_)) => break,
        }
    }
}
