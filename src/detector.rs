//! 推論エンジンと後処理をまとめて扱うモジュール

use anyhow::Result;
use image::RgbImage;

use crate::detection_result::DetectionData;
use crate::engine::{InferenceEngine, InputShape, OutputTensor};
use crate::img_proc::{self, ResizeMode};
use crate::postprocess::{self, OutputLayout, PostProcessParams};

/// 物体検出器
pub struct Detector {
    engine: Box<dyn InferenceEngine>,
    params: PostProcessParams,
    layout: OutputLayout,
    resize_mode: ResizeMode,
}

impl Detector {
    /// 新しい `Detector` を作成します。
    ///
    /// # Args
    /// * `engine` - 推論エンジン
    /// * `params` - 後処理のパラメータ
    /// * `layout` - 出力テンソルの並び
    /// * `resize_mode` - フレームをモデル入力に合わせる方法
    pub fn new(
        engine: Box<dyn InferenceEngine>,
        params: PostProcessParams,
        layout: OutputLayout,
        resize_mode: ResizeMode,
    ) -> Self {
        Self {
            engine,
            params,
            layout,
            resize_mode,
        }
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    pub fn input_shape(&self) -> InputShape {
        self.engine.input_shape()
    }

    pub fn params(&self) -> &PostProcessParams {
        &self.params
    }

    /// 推論エンジンを一度動かしておきます。
    pub fn warm_up(&mut self) -> Result<()> {
        self.engine.warm_up()
    }

    /// 入力データの処理を開始します。
    ///
    /// # Args
    /// * `input_data` - 前処理済みの入力
    ///
    /// # Return
    /// * 推論エンジンの出力テンソル
    pub fn start_processing(&mut self, input_data: &[f32]) -> Result<Vec<OutputTensor>> {
        self.engine.infer(input_data)
    }

    /// 入力データの処理を開始し，後処理まで行います。
    ///
    /// # Args
    /// * `input_data` - 前処理済みの入力
    ///
    /// # Return
    /// * 物体検出結果 (モデル入力の座標系)
    pub fn start(&mut self, input_data: &[f32]) -> Result<Vec<DetectionData>> {
        let outputs = self.start_processing(input_data)?;
        self.decode(&outputs)
    }

    /// 推論エンジンの出力 (先頭のテンソル) を後処理します。出力がなければ空です。
    pub fn decode(&self, outputs: &[OutputTensor]) -> Result<Vec<DetectionData>> {
        let Some(output) = outputs.first() else {
            return Ok(vec![]);
        };
        let shape = self.engine.input_shape();
        postprocess::post_process(output, self.layout, &self.params, shape.width, shape.height)
    }

    /// モデル入力の座標をフレームの座標に戻し，フレーム内に収めます。
    ///
    /// # Args
    /// * `detections` - モデル入力の座標系の検出結果
    /// * `width`, `height` - フレームのサイズ
    pub fn map_to_frame(&self, detections: &[DetectionData], width: u32, height: u32) -> Vec<DetectionData> {
        let shape = self.engine.input_shape();
        detections
            .iter()
            .map(|d| match self.resize_mode {
                ResizeMode::Stretch => d.scale(
                    width as f32 / shape.width as f32,
                    height as f32 / shape.height as f32,
                ),
                ResizeMode::Letterbox => d.reverse_transform(width, height, shape.width),
            })
            .map(|d| d.clamp(width, height))
            .collect()
    }

    /// 画像の処理を開始します。
    ///
    /// # Args
    /// * `img` - カメラのフレーム
    ///
    /// # Return
    /// * 物体検出結果 (フレームの座標系)
    pub fn start_with_img_proc(&mut self, img: &RgbImage) -> Result<Vec<DetectionData>> {
        let input_data = img_proc::preprocess(img, self.engine.input_shape(), self.resize_mode)?;
        let objs = self.start(&input_data)?;
        Ok(self.map_to_frame(&objs, img.width(), img.height()))
    }

    pub fn resize_mode(&self) -> ResizeMode {
        self.resize_mode
    }
}
