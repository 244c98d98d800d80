use anyhow::{ensure, Result};

use crate::engine::{InferenceEngine, InputShape, OutputTensor, TensorLayout};

/// 何も出力しない推論エンジン
///
/// モデルがない場合でもカメラのみで同じ処理経路を通すために使います。
pub struct NullEngine {
    shape: InputShape,
}

impl NullEngine {
    pub fn new(shape: InputShape) -> Self {
        Self { shape }
    }
}

impl Default for NullEngine {
    fn default() -> Self {
        Self::new(InputShape::square(640, TensorLayout::Nchw))
    }
}

impl InferenceEngine for NullEngine {
    fn name(&self) -> &'static str {
        "null"
    }

    fn input_shape(&self) -> InputShape {
        self.shape
    }

    fn infer(&mut self, input: &[f32]) -> Result<Vec<OutputTensor>> {
        ensure!(
            input.len() == self.shape.len(),
            "input has {} values, expected {}",
            input.len(),
            self.shape.len()
        );
        Ok(vec![])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_engine_checks_input_and_returns_nothing() {
        let mut engine = NullEngine::new(InputShape::square(4, TensorLayout::Nhwc));
        assert!(engine.infer(&[0.; 48]).unwrap().is_empty());
        assert!(engine.infer(&[0.; 12]).is_err());
        assert_eq!(engine.name(), "null");
    }
}
