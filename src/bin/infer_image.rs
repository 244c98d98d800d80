//! 1枚の画像で推論し，出力テンソルと検出結果を表示する

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Parser;

use rpi_hailo_yolo::detector::Detector;
use rpi_hailo_yolo::engine::{InputShape, TensorLayout};
use rpi_hailo_yolo::img_proc::{self, Overlay, ResizeMode};
use rpi_hailo_yolo::model::{self, ModelInfo};
use rpi_hailo_yolo::postprocess::{OutputLayout, PostProcessParams};

#[derive(Parser, Debug)]
#[command(author, version, about = "Run a single image through a YOLO model")]
struct Args {
    /// Input image.
    image: PathBuf,
    /// Model file (.onnx).
    #[arg(long)]
    model: PathBuf,
    #[arg(long, value_enum, default_value_t = OutputLayout::Yolov8)]
    layout: OutputLayout,
    #[arg(long, default_value_t = 640)]
    input_size: u32,
    #[arg(long, value_enum, default_value_t = TensorLayout::Nchw)]
    tensor_layout: TensorLayout,
    #[arg(long, value_enum, default_value_t = ResizeMode::Stretch)]
    resize: ResizeMode,
    #[arg(long, default_value_t = 0.5)]
    threshold: f32,
    #[arg(long, default_value_t = 0.45)]
    nms_threshold: f32,
    /// Write the annotated image here.
    #[arg(long)]
    output: Option<PathBuf>,
    #[arg(long)]
    font: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let info = ModelInfo::probe(&args.model)?;
    println!("Model: {} ({:.1} MB)", info.path.display(), info.size_mb());

    let shape = InputShape::square(args.input_size, args.tensor_layout);
    let Some(engine) = model::open_engine(&info, shape)? else {
        bail!("{} cannot be run by this build", info.path.display());
    };
    let params = PostProcessParams {
        obj_threshold: args.threshold,
        nms_threshold: args.nms_threshold,
        ..Default::default()
    };
    let mut detector = Detector::new(engine, params, args.layout, args.resize);

    let mut img = image::open(&args.image)
        .with_context(|| format!("failed to open {}", args.image.display()))?
        .to_rgb8();
    let (w, h) = img.dimensions();
    println!("Image: {} ({}x{})", args.image.display(), w, h);
    println!("Input shape: {:?} ({:?})", shape.dims(), detector.resize_mode());

    let input = img_proc::preprocess(&img, detector.input_shape(), detector.resize_mode())?;
    let start = Instant::now();
    let outputs = detector.start_processing(&input)?;
    let t = start.elapsed().as_secs_f64() * 1000.0;
    println!("Processing time:{:.03}ms, {:.1}FPS", t, 1000. / t);

    for out in &outputs {
        let s = out.stats();
        println!(
            "Output {}: shape {:?}, min {:.4}, max {:.4}, mean {:.4}",
            out.name, out.shape, s.min, s.max, s.mean
        );
    }

    let detections = detector.decode(&outputs)?;
    let detections = detector.map_to_frame(&detections, w, h);
    println!("Detections above {:.2}: {}", args.threshold, detections.len());
    for d in detections.iter().take(5) {
        println!(
            "  {} at [{:.0}, {:.0}, {:.0}, {:.0}]",
            d.label(),
            d.x1,
            d.y1,
            d.x2,
            d.y2
        );
    }

    if let Some(path) = &args.output {
        let overlay = Overlay::load(args.font.as_deref(), 20., 2.);
        overlay.draw_bbox(&mut img, &detections);
        img.save(path)
            .with_context(|| format!("failed to save {}", path.display()))?;
        println!("Saved: {}", path.display());
    }
    Ok(())
}
