//! YOLO (You Only Look Once) 物体検出アルゴリズムの出力を後処理するためのモジュール
//!
//! エクスポート方法によって出力テンソルの並びが異なるため，[`OutputLayout`] で指定します。
//! ここで得られる座標はモデル入力画像のピクセル座標です。

use std::cmp::Ordering;

use anyhow::{bail, ensure, Result};
use serde::Deserialize;

use crate::detection_result::DetectionData;
use crate::engine::OutputTensor;
use crate::nms::nms_process;

/// 出力テンソルの並び
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum OutputLayout {
    /// [1, N, 5 + C]: (cx, cy, w, h, 物体確率, class確率...)
    Yolov5,
    /// [1, 4 + C, N]: (cx, cy, w, h, class確率...) 物体確率なし
    #[default]
    Yolov8,
    /// Hailoのチップ上NMS出力 (クラスごとに 個数, [y1, x1, y2, x2, score]...)
    HailoNms,
}

/// 後処理のパラメータ
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PostProcessParams {
    /// クラス数
    pub cls_num: usize,
    /// コンフィデンスの閾値
    pub obj_threshold: f32,
    /// NMSのIoU閾値
    pub nms_threshold: f32,
    /// NMSを行うか
    pub nms_enabled: bool,
    /// 1フレームあたりの最大検出数
    pub max_detections: usize,
}

impl Default for PostProcessParams {
    fn default() -> Self {
        Self {
            cls_num: 80,
            obj_threshold: 0.5,
            nms_threshold: 0.45,
            nms_enabled: true,
            max_detections: 100,
        }
    }
}

/// 最大値を持つ要素のインデックスと値を返します (同値の場合は先頭が優先)
fn argmax(scores: &[f32]) -> Option<(usize, f32)> {
    scores.iter().copied().enumerate().fold(None, |best, (i, v)| match best {
        Some((_, bv)) if bv >= v => best,
        _ => Some((i, v)),
    })
}

fn keep(confidence: f32, threshold: f32) -> bool {
    confidence > threshold && confidence <= 1.0
}

/// 先頭のバッチ次元を除いた2次元の形状 (行, 列) を取得します
fn matrix_dims(output: &OutputTensor) -> Result<(usize, usize)> {
    let dims: Vec<usize> = match output.shape.as_slice() {
        [1, rest @ ..] if rest.len() == 2 => rest.to_vec(),
        [r, c] => vec![*r, *c],
        other => bail!("unsupported output shape {:?} for {}", other, output.name),
    };
    ensure!(
        dims[0] * dims[1] == output.data.len(),
        "output {} has {} values but shape {:?}",
        output.name,
        output.data.len(),
        output.shape
    );
    Ok((dims[0], dims[1]))
}

/// YOLOv5形式の出力をデコードします
///
/// # Args
/// * `data` - 出力テンソル (行優先)
/// * `num_preds` - 候補の数
/// * `row_len` - 1候補あたりの値の数 (5 + クラス数)
/// * `threshold` - コンフィデンスの閾値
///
/// # Return
/// * 閾値を超えた検出結果 (モデル入力の座標系)
pub fn decode_yolov5(
    data: &[f32],
    num_preds: usize,
    row_len: usize,
    threshold: f32,
) -> Result<Vec<DetectionData>> {
    ensure!(row_len >= 6, "yolov5 rows need at least 6 values, got {}", row_len);
    ensure!(data.len() >= num_preds * row_len, "yolov5 output truncated");

    let mut out = vec![];
    for pred in data.chunks_exact(row_len).take(num_preds) {
        let Some((class_id, class_conf)) = argmax(&pred[5..]) else {
            continue;
        };
        // 物体確率 x クラス確率
        let confidence = pred[4] * class_conf;
        if !keep(confidence, threshold) {
            continue;
        }
        let Ok(class) = u8::try_from(class_id) else {
            continue;
        };
        out.push(DetectionData::from_center(pred[0], pred[1], pred[2], pred[3], class, confidence));
    }
    Ok(out)
}

/// YOLOv8形式 (チャネル優先) の出力をデコードします
///
/// # Args
/// * `data` - 出力テンソル [4 + C, N]
/// * `channels` - 4 + クラス数
/// * `num_preds` - 候補の数 N
/// * `threshold` - コンフィデンスの閾値
pub fn decode_yolov8(
    data: &[f32],
    channels: usize,
    num_preds: usize,
    threshold: f32,
) -> Result<Vec<DetectionData>> {
    ensure!(channels >= 5, "yolov8 output needs at least 5 channels, got {}", channels);
    ensure!(data.len() >= channels * num_preds, "yolov8 output truncated");

    let at = |c: usize, i: usize| data[c * num_preds + i];
    let mut scores = vec![0f32; channels - 4];
    let mut out = vec![];
    for i in 0..num_preds {
        for (c, s) in scores.iter_mut().enumerate() {
            *s = at(4 + c, i);
        }
        let Some((class_id, confidence)) = argmax(&scores) else {
            continue;
        };
        if !keep(confidence, threshold) {
            continue;
        }
        let Ok(class) = u8::try_from(class_id) else {
            continue;
        };
        out.push(DetectionData::from_center(at(0, i), at(1, i), at(2, i), at(3, i), class, confidence));
    }
    Ok(out)
}

/// HailoのNMS出力 (float32, クラスごと) をデコードします
///
/// 各クラスについて，検出数 k とそれに続く k 個の `[y_min, x_min, y_max, x_max, score]`
/// (0〜1に正規化) が並びます。
///
/// # Args
/// * `data` - 出力テンソル
/// * `cls_num` - クラス数
/// * `threshold` - コンフィデンスの閾値
/// * `input_w`, `input_h` - モデル入力のサイズ (正規化座標をピクセルに戻すため)
pub fn decode_hailo_nms(
    data: &[f32],
    cls_num: usize,
    threshold: f32,
    input_w: u32,
    input_h: u32,
) -> Result<Vec<DetectionData>> {
    let (w, h) = (input_w as f32, input_h as f32);
    let mut out = vec![];
    let mut pos = 0;
    for class_id in 0..cls_num {
        let Some(&count) = data.get(pos) else {
            bail!("hailo nms output ends before class {}", class_id);
        };
        ensure!(count >= 0. && count.fract() == 0., "invalid box count {} for class {}", count, class_id);
        pos += 1;
        // 残りの要素数で上限を確認してから整数にする
        let remaining = (data.len() - pos) / 5;
        ensure!(
            count <= remaining as f32,
            "hailo nms output truncated at class {}: {} boxes, {} left",
            class_id,
            count,
            remaining
        );
        let end = pos + count as usize * 5;

        for rec in data[pos..end].chunks_exact(5) {
            let score = rec[4];
            if !keep(score, threshold) {
                continue;
            }
            let Ok(class) = u8::try_from(class_id) else {
                continue;
            };
            out.push(DetectionData {
                class,
                x1: rec[1] * w,
                y1: rec[0] * h,
                x2: rec[3] * w,
                y2: rec[2] * h,
                confidence: score,
            });
        }
        pos = end;
    }
    Ok(out)
}

/// `post_process`関数は、YOLOの出力から物体検出を行います
///
/// # Args
/// * `output` - YOLOの出力テンソル
/// * `layout` - 出力の並び
/// * `params` - 後処理のパラメータ
/// * `input_w`, `input_h` - モデル入力のサイズ
///
/// # Return
/// * 検出された物体を表すDetectionDataのベクトル (コンフィデンスの高い順)
pub fn post_process(
    output: &OutputTensor,
    layout: OutputLayout,
    params: &PostProcessParams,
    input_w: u32,
    input_h: u32,
) -> Result<Vec<DetectionData>> {
    let threshold = params.obj_threshold;
    let boxes = match layout {
        OutputLayout::Yolov5 => {
            let (rows, cols) = matrix_dims(output)?;
            decode_yolov5(&output.data, rows, cols, threshold)?
        }
        OutputLayout::Yolov8 => {
            let (rows, cols) = matrix_dims(output)?;
            if rows > cols {
                // [N, 4 + C] でエクスポートされたもの
                transpose_decode(&output.data, rows, cols, threshold)?
            } else {
                decode_yolov8(&output.data, rows, cols, threshold)?
            }
        }
        OutputLayout::HailoNms => {
            decode_hailo_nms(&output.data, params.cls_num, threshold, input_w, input_h)?
        }
    };

    // Hailoの出力はチップ上でNMS済み
    let mut boxes = if params.nms_enabled && layout != OutputLayout::HailoNms {
        nms_process(&boxes, params.cls_num, threshold, params.nms_threshold)
    } else {
        boxes
    };

    boxes.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(Ordering::Equal));
    boxes.truncate(params.max_detections);
    Ok(boxes)
}

fn transpose_decode(data: &[f32], rows: usize, cols: usize, threshold: f32) -> Result<Vec<DetectionData>> {
    let mut transposed = vec![0f32; data.len()];
    for r in 0..rows {
        for c in 0..cols {
            transposed[c * rows + r] = data[r * cols + c];
        }
    }
    decode_yolov8(&transposed, cols, rows, threshold)
}
