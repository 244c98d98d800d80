//! 描画済みフレームをJPEGで保存するモジュール

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{ensure, Context, Result};
use chrono::Local;
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, RgbImage};
use log::{debug, info};

/// 最新フレームのファイル名
pub const LATEST_FILE_NAME: &str = "latest_preview.jpg";

/// JPEGを保存します。
///
/// # Args
/// * `path` - 保存先
/// * `img` - 画像
/// * `quality` - JPEGの品質 (1〜100)
pub fn save_jpeg(path: &Path, img: &RgbImage, quality: u8) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    JpegEncoder::new_with_quality(&mut writer, quality)
        .encode(img.as_raw(), img.width(), img.height(), ColorType::Rgb8)
        .with_context(|| format!("failed to encode {}", path.display()))?;
    writer.flush()?;
    Ok(())
}

/// 一定間隔でフレームを保存するための構造体
pub struct SnapshotWriter {
    dir: PathBuf,
    jpeg_quality: u8,
    save_interval: u64,
    latest_interval: Duration,
    last_latest: Option<Instant>,
    saved: u64,
    failed: u64,
}

impl SnapshotWriter {
    /// 新しい `SnapshotWriter` を作成します。出力先ディレクトリがなければ作成します。
    ///
    /// # Args
    /// * `dir` - 出力先ディレクトリ
    /// * `jpeg_quality` - JPEGの品質 (1〜100)
    /// * `save_interval` - 何フレームごとに保存するか (0で保存しない)
    /// * `latest_interval` - `latest_preview.jpg` を上書きする最短間隔
    pub fn new<P: AsRef<Path>>(
        dir: P,
        jpeg_quality: u8,
        save_interval: u64,
        latest_interval: Duration,
    ) -> Result<Self> {
        ensure!((1..=100).contains(&jpeg_quality), "JPEG quality must be 1..=100, got {}", jpeg_quality);
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
        Ok(Self {
            dir,
            jpeg_quality,
            save_interval,
            latest_interval,
            last_latest: None,
            saved: 0,
            failed: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `on_frame` で保存した枚数
    pub fn saved(&self) -> u64 {
        self.saved
    }

    /// 保存に失敗した回数
    pub fn failed(&self) -> u64 {
        self.failed
    }

    fn write(&mut self, path: &Path, img: &RgbImage) -> Result<()> {
        let r = save_jpeg(path, img, self.jpeg_quality);
        if r.is_err() {
            self.failed += 1;
        }
        r
    }

    /// フレームごとに呼び出し，必要なら保存します。
    ///
    /// # Args
    /// * `index` - 1から始まるフレーム番号
    /// * `img` - 描画済みのフレーム
    ///
    /// # Return
    /// * 番号付きで保存した場合はそのパス
    pub fn on_frame(&mut self, index: u64, img: &RgbImage) -> Result<Option<PathBuf>> {
        let mut saved_path = None;
        if self.save_interval > 0 && index % self.save_interval == 0 {
            let path = self.dir.join(format!("preview_frame_{:06}.jpg", index));
            self.write(&path, img)?;
            self.saved += 1;
            info!("saved {}", path.display());
            saved_path = Some(path);
        }

        let due = self
            .last_latest
            .map_or(true, |t| t.elapsed() >= self.latest_interval);
        if due {
            let path = self.dir.join(LATEST_FILE_NAME);
            self.write(&path, img)?;
            self.last_latest = Some(Instant::now());
            debug!("updated {}", path.display());
        }
        Ok(saved_path)
    }

    /// 現在時刻の付いたファイル名で保存します (`{prefix}_%Y%m%d_%H%M%S.jpg`)。
    ///
    /// 同じ秒に保存済みのファイルがあれば `_1`, `_2`, ... を付けます。
    pub fn save_timestamped(&mut self, prefix: &str, img: &RgbImage) -> Result<PathBuf> {
        let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let mut path = self.dir.join(format!("{}_{}.jpg", prefix, stamp));
        let mut n = 1;
        while path.exists() {
            path = self.dir.join(format!("{}_{}_{}.jpg", prefix, stamp, n));
            n += 1;
        }
        self.write(&path, img)?;
        info!("saved {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn frame() -> RgbImage {
        RgbImage::from_pixel(32, 24, Rgb([90, 120, 200]))
    }

    #[test]
    fn saves_every_nth_frame() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = SnapshotWriter::new(dir.path().join("out"), 85, 3, Duration::from_secs(3600)).unwrap();
        let mut saved = vec![];
        for i in 1..=7 {
            if let Some(p) = w.on_frame(i, &frame()).unwrap() {
                saved.push(p);
            }
        }
        assert_eq!(w.saved(), 2);
        assert_eq!(saved[0].file_name().unwrap(), "preview_frame_000003.jpg");
        assert_eq!(saved[1].file_name().unwrap(), "preview_frame_000006.jpg");
        assert!(dir.path().join("out").join(LATEST_FILE_NAME).is_file());

        let decoded = image::open(&saved[0]).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 24));
    }

    #[test]
    fn zero_interval_only_updates_latest() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = SnapshotWriter::new(dir.path(), 85, 0, Duration::ZERO).unwrap();
        for i in 1..=3 {
            assert!(w.on_frame(i, &frame()).unwrap().is_none());
        }
        assert_eq!(w.saved(), 0);
        assert!(dir.path().join(LATEST_FILE_NAME).is_file());
    }

    #[test]
    fn timestamped_name_has_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = SnapshotWriter::new(dir.path(), 85, 30, Duration::from_secs(2)).unwrap();
        let p = w.save_timestamped("detection", &frame()).unwrap();
        let name = p.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("detection_"));
        assert!(name.ends_with(".jpg"));
        // detection_YYYYmmdd_HHMMSS.jpg
        assert_eq!(name.len(), "detection_".len() + 15 + 4);
    }

    #[test]
    fn invalid_quality_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SnapshotWriter::new(dir.path(), 0, 30, Duration::ZERO).is_err());
        assert!(SnapshotWriter::new(dir.path(), 101, 30, Duration::ZERO).is_err());
    }

    #[test]
    fn timestamped_saves_in_the_same_second_do_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = SnapshotWriter::new(dir.path(), 85, 30, Duration::from_secs(2)).unwrap();
        let paths: Vec<_> = (0..3)
            .map(|_| w.save_timestamped("detection", &frame()).unwrap())
            .collect();
        assert_ne!(paths[0], paths[1]);
        assert_ne!(paths[1], paths[2]);
        assert_ne!(paths[0], paths[2]);
        assert!(paths.iter().all(|p| p.is_file()));
    }

    #[test]
    fn failed_writes_are_counted_and_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let mut w = SnapshotWriter::new(&out, 85, 1, Duration::ZERO).unwrap();
        std::fs::remove_dir_all(&out).unwrap();

        assert!(w.on_frame(1, &frame()).is_err());
        assert!(w.save_timestamped("detection", &frame()).is_err());
        assert_eq!(w.failed(), 2);
        assert_eq!(w.saved(), 0);

        std::fs::create_dir_all(&out).unwrap();
        let p = w.on_frame(2, &frame()).unwrap().unwrap();
        assert_eq!(p.file_name().unwrap(), "preview_frame_000002.jpg");
        assert_eq!(w.saved(), 1);
        assert_eq!(w.failed(), 2);
    }
}
