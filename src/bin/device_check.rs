//! Hailo-8 とカメラ，モデルの準備ができているか確認する

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::warn;

use rpi_hailo_yolo::device::{self, CheckItem, SetupReport, HAILO_DEVICE_PATH, RPI_CAMERA_ASSETS_DIR};
use rpi_hailo_yolo::{camera, model};

#[derive(Parser, Debug)]
#[command(author, version, about = "Check the Hailo-8 device, camera and model")]
struct Args {
    /// Model file to check. The default locations are searched when omitted.
    #[arg(long)]
    model: Option<PathBuf>,
    /// Hailo device node.
    #[arg(long, default_value = HAILO_DEVICE_PATH)]
    hailo_device: PathBuf,
    /// Directory holding the video device nodes.
    #[arg(long, default_value = "/dev")]
    dev_dir: PathBuf,
    /// Directory holding the post-process JSON files.
    #[arg(long, default_value = RPI_CAMERA_ASSETS_DIR)]
    assets_dir: PathBuf,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    println!("Hailo-8 Device Check");
    println!("====================");

    let mut report = SetupReport::default();
    report.push(device::check_path("hailo device", &args.hailo_device));

    let model_path = args.model.clone().or_else(|| model::find_model(&model::default_model_paths()));
    let model_item = match &model_path {
        Some(path) => device::check_model(path),
        None => CheckItem::new("model", false, "no model in the default locations"),
    };
    report.push(model_item);
    let required_ok = report.all_ok();

    match device::list_video_devices(&args.dev_dir) {
        Ok(devices) if !devices.is_empty() => {
            let names: Vec<_> = devices
                .iter()
                .map(|p| {
                    let path = p.display().to_string();
                    match camera::query_device(&path) {
                        Ok(caps) => format!("{} [{}]", path, caps),
                        Err(_) => path,
                    }
                })
                .collect();
            report.push(CheckItem::new("video devices", true, names.join(", ")));
        }
        Ok(_) => report.push(CheckItem::new("video devices", false, "none found")),
        Err(e) => report.push(CheckItem::new("video devices", false, format!("{:#}", e))),
    }

    match device::find_postprocess_configs(&args.assets_dir) {
        Ok(configs) => {
            let detail = if configs.is_empty() {
                "none".to_string()
            } else {
                configs
                    .iter()
                    .filter_map(|p| p.file_name())
                    .map(|n| n.to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            report.push(CheckItem::new("post-process configs", !configs.is_empty(), detail));
        }
        Err(e) => {
            warn!("{:#}", e);
            report.push(CheckItem::new("post-process configs", false, format!("{} not readable", args.assets_dir.display())));
        }
    }

    println!();
    print!("{}", report);
    println!();

    if !required_ok {
        println!("Hailo device or model is missing.");
        println!("  - Install the Hailo PCIe driver and reboot (expects {})", HAILO_DEVICE_PATH);
        println!("  - Download a model, e.g. yolov8s.hef, into one of:");
        for p in model::default_model_paths() {
            println!("      {}", p.display());
        }
        std::process::exit(1);
    }

    println!("Next steps:");
    println!("  1. camera_test              check the camera alone");
    println!("  2. hailo_preview            live preview with saved frames");
    println!("  3. infer_image <image>      run one image through an ONNX model");
    Ok(())
}
