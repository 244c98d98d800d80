//! モデルファイルの探索と推論エンジンの生成

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use log::warn;

use crate::engine::{InferenceEngine, InputShape};

/// モデルファイルの形式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
    /// Hailoのコンパイル済みモデル
    Hef,
    /// ONNX
    Onnx,
}

impl ModelFormat {
    /// 拡張子からモデル形式を判定します。
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("hef") => Ok(Self::Hef),
            Some("onnx") => Ok(Self::Onnx),
            _ => bail!("unknown model format: {}", path.display()),
        }
    }
}

/// モデルファイルの情報
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInfo {
    pub path: PathBuf,
    pub format: ModelFormat,
    pub size_bytes: u64,
}

impl ModelInfo {
    /// モデルファイルを調べます。
    ///
    /// # Args
    /// * `path` - モデルファイルのパス
    ///
    /// # Return
    /// * 存在しない場合や形式が不明な場合はエラー
    pub fn probe<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let meta = std::fs::metadata(path)
            .with_context(|| format!("model file not found: {}", path.display()))?;
        if !meta.is_file() {
            bail!("model path is not a file: {}", path.display());
        }
        let format = ModelFormat::from_path(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            format,
            size_bytes: meta.len(),
        })
    }

    pub fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / (1024. * 1024.)
    }
}

/// モデルを探す既定の場所
pub fn default_model_paths() -> Vec<PathBuf> {
    let mut paths = vec![];
    if let Some(home) = std::env::var_os("HOME") {
        let home = PathBuf::from(home);
        paths.push(home.join("yolov8n.hef"));
        paths.push(home.join("yolov8s.hef"));
    }
    paths.push(PathBuf::from("/usr/share/hailo-models/yolov8s.hef"));
    paths.push(PathBuf::from("./yolov8s.hef"));
    paths
}

/// 候補の中で最初に存在するモデルを返します。
pub fn find_model(candidates: &[PathBuf]) -> Option<PathBuf> {
    candidates.iter().find(|p| p.is_file()).cloned()
}

/// モデルに対応する推論エンジンを生成します。
///
/// HEFはこのビルドでは実行できないため，警告を出して `None` を返します。
/// 呼び出し側はカメラのみで処理を続けます。
///
/// # Args
/// * `info` - モデルファイルの情報
/// * `shape` - モデルの入力形状
pub fn open_engine(info: &ModelInfo, shape: InputShape) -> Result<Option<Box<dyn InferenceEngine>>> {
    match info.format {
        ModelFormat::Hef => {
            warn!(
                "{} is a HEF model but Hailo runtime bindings are not part of this build, running camera only",
                info.path.display()
            );
            Ok(None)
        }
        ModelFormat::Onnx => open_onnx(info, shape),
    }
}

#[cfg(feature = "tract")]
fn open_onnx(info: &ModelInfo, shape: InputShape) -> Result<Option<Box<dyn InferenceEngine>>> {
    let engine = crate::engines::TractEngine::load(&info.path, shape)?;
    log::info!("using tract engine for {} ({:.1} MB)", info.path.display(), info.size_mb());
    Ok(Some(Box::new(engine)))
}

#[cfg(not(feature = "tract"))]
fn open_onnx(info: &ModelInfo, _shape: InputShape) -> Result<Option<Box<dyn InferenceEngine>>> {
    warn!(
        "{} is an ONNX model but this build has no `tract` feature, running camera only",
        info.path.display()
    );
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TensorLayout;

    #[test]
    fn format_is_taken_from_extension() {
        assert_eq!(ModelFormat::from_path(Path::new("a/yolov8s.hef")).unwrap(), ModelFormat::Hef);
        assert_eq!(ModelFormat::from_path(Path::new("m.ONNX")).unwrap(), ModelFormat::Onnx);
        assert!(ModelFormat::from_path(Path::new("weights.tar.gz")).is_err());
        assert!(ModelFormat::from_path(Path::new("noext")).is_err());
    }

    #[test]
    fn probe_reports_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("yolov8s.hef");
        std::fs::write(&path, vec![0u8; 1024 * 1024]).unwrap();
        let info = ModelInfo::probe(&path).unwrap();
        assert_eq!(info.format, ModelFormat::Hef);
        assert!((info.size_mb() - 1.0).abs() < 1e-9);

        assert!(ModelInfo::probe(dir.path().join("missing.hef")).is_err());
        assert!(ModelInfo::probe(dir.path()).is_err());
    }

    #[test]
    fn find_model_returns_first_existing() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.hef");
        let b = dir.path().join("b.hef");
        std::fs::write(&b, b"x").unwrap();
        assert_eq!(find_model(&[a.clone(), b.clone()]), Some(b));
        assert_eq!(find_model(&[a]), None);
    }

    #[test]
    fn default_paths_end_with_working_directory() {
        let paths = default_model_paths();
        assert_eq!(paths.last(), Some(&PathBuf::from("./yolov8s.hef")));
        assert!(paths.contains(&PathBuf::from("/usr/share/hailo-models/yolov8s.hef")));
    }

    #[test]
    fn hef_model_falls_back_to_camera_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("yolov8n.hef");
        std::fs::write(&path, b"hef").unwrap();
        let info = ModelInfo::probe(&path).unwrap();
        let engine = open_engine(&info, InputShape::square(640, TensorLayout::Nchw)).unwrap();
        assert!(engine.is_none());
    }
}
