//! Hailoを使わずにカメラだけを確認する

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use image::Rgb;
use log::{error, info, warn};

use rpi_hailo_yolo::camera::{self, CameraConfig, PixelFormat, DEFAULT_DEVICE};
use rpi_hailo_yolo::img_proc::{self, Overlay};
use rpi_hailo_yolo::snapshot;

#[derive(Parser, Debug)]
#[command(author, version, about = "Capture a few frames to check the camera")]
struct Args {
    /// Camera device (/dev/videoN, stub://name or file://path).
    #[arg(long, default_value = DEFAULT_DEVICE)]
    device: String,
    #[arg(long, default_value_t = 1920)]
    width: u32,
    #[arg(long, default_value_t = 1080)]
    height: u32,
    #[arg(long, default_value_t = 30)]
    fps: u32,
    #[arg(long, value_enum, default_value_t = PixelFormat::Mjpg)]
    pixel_format: PixelFormat,
    /// Number of frames to capture.
    #[arg(long, default_value_t = 5)]
    frames: usize,
    /// Directory for test_capture_N.jpg.
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,
    /// TrueType font for the overlay.
    #[arg(long)]
    font: Option<PathBuf>,
}

fn print_troubleshooting(device: &str) {
    println!();
    println!("Troubleshooting:");
    println!("  1. Check the camera ribbon cable and that the camera is enabled");
    println!("  2. List devices with `v4l2-ctl --list-devices` ({} was requested)", device);
    println!("  3. Make sure no other process (e.g. rpicam-hello) holds the camera");
    println!("  4. Try --pixel-format yuyv if MJPG is not offered by the sensor");
    println!("  5. Use --device stub://test to check the rest of the pipeline");
}

fn run(args: &Args) -> Result<()> {
    std::fs::create_dir_all(&args.output_dir)?;
    let cfg = CameraConfig {
        device: args.device.clone(),
        width: args.width,
        height: args.height,
        fps: args.fps,
        pixel_format: args.pixel_format,
    };
    if !args.device.contains("://") {
        match camera::query_device(&args.device) {
            Ok(caps) => println!("Camera: {} {}", args.device, caps),
            Err(e) => warn!("{:#}", e),
        }
    }
    let overlay = Overlay::load(args.font.as_deref(), 32., 2.);

    let start = Instant::now();
    let frames = camera::capture_frames(&cfg, args.frames)?;
    let elapsed = start.elapsed().as_secs_f64();
    let fps = if elapsed > 0. { frames.len() as f64 / elapsed } else { 0. };
    println!("Captured {} frames in {:.2} s ({:.1} FPS)", frames.len(), elapsed, fps);

    for (i, mut frame) in frames.into_iter().enumerate() {
        let (w, h) = frame.dimensions();
        let brightness = img_proc::mean_brightness(&frame);
        println!("  frame {}: {}x{}, mean brightness {:.1}", i, w, h, brightness);

        let green = Rgb([0u8, 255, 0]);
        overlay.draw_status(
            &mut frame,
            &[
                (format!("FPS: {:.1}", fps), green),
                (format!("Resolution: {}x{}", w, h), green),
            ],
        );
        let path = args.output_dir.join(format!("test_capture_{}.jpg", i));
        snapshot::save_jpeg(&path, &frame, 85)?;
        info!("saved {}", path.display());
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    println!("{}", "=".repeat(60));
    println!("     Simple Camera Test (No Hailo)");
    println!("{}", "=".repeat(60));

    if let Err(e) = run(&args) {
        error!("camera test failed: {:#}", e);
        print_troubleshooting(&args.device);
        return Err(e);
    }
    println!("Camera test complete");
    Ok(())
}
