//! 推論エンジンを抽象化するモジュール
//!
//! Hailo-8 やCPU上のONNXランタイムなど，モデルを実行する部分は
//! [`InferenceEngine`] の実装として差し替えられるようにしています。

use anyhow::Result;
use serde::Deserialize;

/// 入力テンソルのメモリ配置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum TensorLayout {
    /// [1, 3, H, W]
    #[default]
    Nchw,
    /// [1, H, W, 3]
    Nhwc,
}

/// モデルの入力形状
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputShape {
    pub width: u32,
    pub height: u32,
    pub layout: TensorLayout,
}

impl InputShape {
    pub fn square(size: u32, layout: TensorLayout) -> Self {
        Self { width: size, height: size, layout }
    }

    /// バッチ1の入力要素数
    pub fn len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// テンソルの次元 (バッチ次元を含む)
    pub fn dims(&self) -> [usize; 4] {
        let (w, h) = (self.width as usize, self.height as usize);
        match self.layout {
            TensorLayout::Nchw => [1, 3, h, w],
            TensorLayout::Nhwc => [1, h, w, 3],
        }
    }
}

/// 推論結果の出力テンソル (f32に変換済み)
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// 出力テンソルの簡単な統計値
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TensorStats {
    pub min: f32,
    pub max: f32,
    pub mean: f32,
}

impl OutputTensor {
    pub fn new(name: impl Into<String>, shape: Vec<usize>, data: Vec<f32>) -> Self {
        Self { name: name.into(), shape, data }
    }

    /// 最小値・最大値・平均値を計算します。空のテンソルは全て0になります。
    pub fn stats(&self) -> TensorStats {
        if self.data.is_empty() {
            return TensorStats { min: 0., max: 0., mean: 0. };
        }
        let min = self.data.iter().copied().fold(f32::INFINITY, f32::min);
        let max = self.data.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let sum: f64 = self.data.iter().map(|&v| f64::from(v)).sum();
        TensorStats {
            min,
            max,
            mean: (sum / self.data.len() as f64) as f32,
        }
    }
}

/// 推論エンジンのトレイト
pub trait InferenceEngine: Send {
    /// エンジンの名前
    fn name(&self) -> &'static str;

    /// モデルの入力形状
    fn input_shape(&self) -> InputShape;

    /// 前処理済みの入力 ([`InputShape::dims`] の形状，0〜1に正規化済み) で推論します。
    fn infer(&mut self, input: &[f32]) -> Result<Vec<OutputTensor>>;

    /// 最初のフレームの前に一度だけ呼ばれます。
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dims_follow_layout() {
        let nchw = InputShape { width: 640, height: 480, layout: TensorLayout::Nchw };
        assert_eq!(nchw.dims(), [1, 3, 480, 640]);
        let nhwc = InputShape { layout: TensorLayout::Nhwc, ..nchw };
        assert_eq!(nhwc.dims(), [1, 480, 640, 3]);
        assert_eq!(nhwc.len(), 640 * 480 * 3);
    }

    #[test]
    fn stats_of_output_tensor() {
        let t = OutputTensor::new("out", vec![4], vec![-1., 0., 1., 4.]);
        let s = t.stats();
        assert_eq!(s.min, -1.);
        assert_eq!(s.max, 4.);
        assert!((s.mean - 1.0).abs() < 1e-6);

        let empty = OutputTensor::new("empty", vec![0], vec![]);
        assert_eq!(empty.stats().max, 0.);
    }
}
