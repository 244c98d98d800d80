//! 実行環境 (Hailoデバイス，カメラ，モデル) の確認

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::model::ModelInfo;

pub const HAILO_DEVICE_PATH: &str = "/dev/hailo0";
pub const RPI_CAMERA_ASSETS_DIR: &str = "/usr/share/rpi-camera-assets";

/// 確認項目1つ分の結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckItem {
    pub name: String,
    pub ok: bool,
    pub detail: String,
}

impl CheckItem {
    pub fn new(name: impl Into<String>, ok: bool, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ok,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for CheckItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mark = if self.ok { "OK" } else { "NG" };
        write!(f, "[{}] {}: {}", mark, self.name, self.detail)
    }
}

/// 確認結果のまとめ
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetupReport {
    pub items: Vec<CheckItem>,
}

impl SetupReport {
    pub fn push(&mut self, item: CheckItem) {
        self.items.push(item);
    }

    pub fn all_ok(&self) -> bool {
        self.items.iter().all(|i| i.ok)
    }
}

impl fmt::Display for SetupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for item in &self.items {
            writeln!(f, "{}", item)?;
        }
        Ok(())
    }
}

/// パスが存在するか確認します。
pub fn check_path<P: AsRef<Path>>(name: &str, path: P) -> CheckItem {
    let path = path.as_ref();
    if path.exists() {
        CheckItem::new(name, true, format!("found {}", path.display()))
    } else {
        CheckItem::new(name, false, format!("{} not found", path.display()))
    }
}

/// モデルファイルを確認し，サイズ (MB) を表示します。
pub fn check_model<P: AsRef<Path>>(path: P) -> CheckItem {
    let path = path.as_ref();
    match ModelInfo::probe(path) {
        Ok(info) => CheckItem::new(
            "model",
            true,
            format!("{} ({:.1} MB)", info.path.display(), info.size_mb()),
        ),
        Err(e) => CheckItem::new("model", false, format!("{:#}", e)),
    }
}

fn sorted_entries<F>(dir: &Path, filter: F) -> Result<Vec<PathBuf>>
where
    F: Fn(&str) -> bool,
{
    let mut found = vec![];
    for entry in std::fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let entry = entry?;
        let name = entry.file_name();
        if filter(&name.to_string_lossy()) {
            found.push(entry.path());
        }
    }
    found.sort();
    Ok(found)
}

/// `video*` というデバイスを列挙します。
///
/// # Args
/// * `dev_dir` - 通常は `/dev`
pub fn list_video_devices<P: AsRef<Path>>(dev_dir: P) -> Result<Vec<PathBuf>> {
    sorted_entries(dev_dir.as_ref(), |name| {
        name.strip_prefix("video")
            .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
    })
}

/// Hailoの後処理設定ファイル (`hailo*.json`) を列挙します。
pub fn find_postprocess_configs<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>> {
    sorted_entries(dir.as_ref(), |name| name.starts_with("hailo") && name.ends_with(".json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn check_path_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_path("dir", dir.path()).ok);
        let missing = check_path("hailo", dir.path().join("hailo0"));
        assert!(!missing.ok);
        assert!(missing.to_string().starts_with("[NG] hailo:"));
    }

    #[test]
    fn check_model_shows_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("yolov8s.hef");
        fs::write(&path, vec![0u8; 512 * 1024]).unwrap();
        let item = check_model(&path);
        assert!(item.ok);
        assert!(item.detail.ends_with("(0.5 MB)"));
        assert!(!check_model(dir.path().join("none.hef")).ok);
    }

    #[test]
    fn lists_only_numbered_video_devices() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["video10", "video0", "video", "videox", "media0"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        let found = list_video_devices(dir.path()).unwrap();
        let names: Vec<String> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["video0", "video10"]);
    }

    #[test]
    fn finds_hailo_postprocess_configs() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["hailo_yolov8_inference.json", "hailo_yolov6.json", "imx500.json", "hailo.txt"] {
            fs::write(dir.path().join(name), b"{}").unwrap();
        }
        let found = find_postprocess_configs(dir.path()).unwrap();
        assert_eq!(found.len(), 2);
        assert!(find_postprocess_configs(dir.path().join("missing")).is_err());
    }

    #[test]
    fn report_is_ok_only_when_every_item_is() {
        let mut r = SetupReport::default();
        r.push(CheckItem::new("a", true, "fine"));
        assert!(r.all_ok());
        r.push(CheckItem::new("b", false, "broken"));
        assert!(!r.all_ok());
        assert_eq!(r.to_string().lines().count(), 2);
    }
}
