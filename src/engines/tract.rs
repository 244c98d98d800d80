//! tract によるCPU上のONNX推論

use std::path::Path;

use anyhow::{ensure, Context, Result};
use log::{debug, info};
use tract_onnx::prelude::*;

use crate::engine::{InferenceEngine, InputShape, OutputTensor};

/// ONNXモデルをCPUで実行する推論エンジン
pub struct TractEngine {
    model: TypedRunnableModel<TypedModel>,
    shape: InputShape,
    output_names: Vec<String>,
}

impl TractEngine {
    /// ONNXモデルを読み込み，入力形状を固定して最適化します。
    ///
    /// # Args
    /// * `path` - ONNXファイルのパス
    /// * `shape` - モデルの入力形状
    pub fn load<P: AsRef<Path>>(path: P, shape: InputShape) -> Result<Self> {
        let path = path.as_ref();
        let dims = shape.dims();
        let typed = tract_onnx::onnx()
            .model_for_path(path)
            .with_context(|| format!("failed to load ONNX model from {}", path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(dims[0], dims[1], dims[2], dims[3])),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?;

        let output_names = typed
            .output_outlets()?
            .iter()
            .map(|o| typed.node(o.node).name.clone())
            .collect::<Vec<_>>();
        debug!("ONNX outputs: {:?}", output_names);

        let model = typed
            .into_runnable()
            .context("failed to build runnable ONNX model")?;
        info!("loaded ONNX model {} (input {:?})", path.display(), dims);

        Ok(Self {
            model,
            shape,
            output_names,
        })
    }
}

impl InferenceEngine for TractEngine {
    fn name(&self) -> &'static str {
        "tract"
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
        let tensor = Tensor::from_shape(&self.shape.dims(), input)?;
        let outputs = self
            .model
            .run(tvec!(tensor.into()))
            .context("ONNX inference failed")?;

        outputs
            .iter()
            .enumerate()
            .map(|(i, out)| -> Result<OutputTensor> {
                let out = out.cast_to::<f32>()?;
                let view = out.to_array_view::<f32>()?;
                let name = self
                    .output_names
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| format!("output{}", i));
                Ok(OutputTensor::new(name, out.shape().to_vec(), view.iter().copied().collect()))
            })
            .collect()
    }

    fn warm_up(&mut self) -> Result<()> {
        let zeros = vec![0f32; self.shape.len()];
        self.infer(&zeros).map(|_| ())
    }
}
