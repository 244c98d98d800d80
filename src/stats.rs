//! FPSと実行結果の集計

use std::fmt;
use std::time::{Duration, Instant};

/// 開始からの累積フレーム数でFPSを計算するカウンタ
#[derive(Debug, Clone)]
pub struct FpsCounter {
    start: Instant,
    frames: u64,
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl FpsCounter {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            frames: 0,
        }
    }

    /// 1フレーム進めて，現在のフレーム数を返します。
    pub fn tick(&mut self) -> u64 {
        self.frames += 1;
        self.frames
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn fps(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0. {
            self.frames as f64 / secs
        } else {
            0.
        }
    }

    /// `every` フレームごとに `true` を返します。
    pub fn should_report(&self, every: u64) -> bool {
        every > 0 && self.frames > 0 && self.frames % every == 0
    }
}

/// 終了時に表示する集計
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    pub total_frames: u64,
    pub elapsed: Duration,
    pub saved_frames: u64,
    pub failed_saves: u64,
}

impl RunSummary {
    pub fn avg_fps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0. {
            self.total_frames as f64 / secs
        } else {
            0.
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(60);
        writeln!(f, "{}", rule)?;
        writeln!(f, "Preview Statistics:")?;
        writeln!(f, "  Total frames: {}", self.total_frames)?;
        writeln!(f, "  Total time: {:.1} seconds", self.elapsed.as_secs_f64())?;
        writeln!(f, "  Average FPS: {:.1}", self.avg_fps())?;
        writeln!(f, "  Saved frames: {}", self.saved_frames)?;
        if self.failed_saves > 0 {
            writeln!(f, "  Failed saves: {}", self.failed_saves)?;
        }
        write!(f, "{}", rule)
    }
}
