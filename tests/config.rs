use std::fs;
use std::path::PathBuf;

use rpi_hailo_yolo::camera::PixelFormat;
use rpi_hailo_yolo::config::PreviewConfig;
use rpi_hailo_yolo::postprocess::OutputLayout;

#[test]
fn config_file_is_loaded_from_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("preview.toml");
    fs::write(
        &path,
        r#"
[camera]
device = "stub://front"
width = 1280
height = 720
pixel_format = "rgb3"

[model]
path = "/usr/share/hailo-models/yolov8s.hef"
layout = "yolov5"
nms = false

[output]
dir = "snapshots"
save_interval = 0
latest_interval_secs = 0.5

[overlay]
font_size = 14.0
"#,
    )
    .unwrap();

    let cfg = PreviewConfig::load(Some(path.as_path())).unwrap();
    assert_eq!(cfg.camera.device, "stub://front");
    assert_eq!((cfg.camera.width, cfg.camera.height), (1280, 720));
    assert_eq!(cfg.camera.pixel_format, PixelFormat::Rgb3);
    assert_eq!(
        cfg.model.path,
        Some(PathBuf::from("/usr/share/hailo-models/yolov8s.hef"))
    );
    assert_eq!(cfg.model.layout, OutputLayout::Yolov5);
    assert!(!cfg.model.post_process_params().nms_enabled);
    assert_eq!(cfg.output.dir, PathBuf::from("snapshots"));
    assert_eq!(cfg.output.save_interval, 0);
    assert_eq!(cfg.output.latest_interval().as_millis(), 500);
    assert_eq!(cfg.overlay.font_size, 14.0);
}

#[test]
fn broken_config_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    fs::write(&path, "[camera\nwidth = ").unwrap();
    assert!(PreviewConfig::load(Some(path.as_path())).is_err());
    assert!(PreviewConfig::load(Some(dir.path().join("missing.toml").as_path())).is_err());
}

#[test]
fn cli_style_override_is_revalidated() {
    let mut cfg = PreviewConfig::from_toml_str("").unwrap();
    cfg.model.threshold = -0.1;
    assert!(cfg.validate().is_err());
    cfg.model.threshold = 0.25;
    cfg.rotation = 180;
    assert!(cfg.validate().is_ok());
}
