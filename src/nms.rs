use std::cmp::Ordering;

use log::warn;

use crate::detection_result::DetectionData;

/// 2つのBBoxのIoU (Intersection over Union) を計算します
pub fn iou(a: &DetectionData, b: &DetectionData) -> f32 {
    let ix1 = a.x1.max(b.x1);
    let iy1 = a.y1.max(b.y1);
    let ix2 = a.x2.min(b.x2);
    let iy2 = a.y2.min(b.y2);

    if ix1 >= ix2 || iy1 >= iy2 {
        return 0.0;
    }
    let inter = (ix2 - ix1) * (iy2 - iy1);
    let union = a.area() + b.area() - inter;
    if union <= 0.0 {
        return 0.0;
    }
    inter / union
}

fn by_confidence_desc(a: &DetectionData, b: &DetectionData) -> Ordering {
    b.confidence
        .partial_cmp(&a.confidence)
        .unwrap_or(Ordering::Equal)
}

/// 貪欲法によるNMS。コンフィデンスの高い順に残し，重なりが閾値を超えるものを捨てる
pub fn nms(bb: &[DetectionData], nms_threshold: f32) -> Vec<DetectionData> {
    let mut sorted_bb = bb.to_vec();
    sorted_bb.sort_by(by_confidence_desc);

    let mut kept: Vec<DetectionData> = Vec::with_capacity(sorted_bb.len());
    for candidate in sorted_bb {
        if kept.iter().all(|k| iou(k, &candidate) <= nms_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

/// 閾値でフィルタしたあと，クラスごとにNMSを適用します
///
/// # Args
/// * `bb` - 検出結果
/// * `cls_num` - クラス数
/// * `obj_threshold` - コンフィデンスの閾値 (これより大きいものを残す)
/// * `nms_threshold` - NMSのIoU閾値
///
/// # Return
/// * クラスID順に並んだNMS後の検出結果
pub fn nms_process(
    bb: &[DetectionData],
    cls_num: usize,
    obj_threshold: f32,
    nms_threshold: f32,
) -> Vec<DetectionData> {
    // クラス別に分割
    let mut cls: Vec<Vec<DetectionData>> = vec![vec![]; cls_num];
    for &detection in bb {
        if !(detection.confidence > obj_threshold && detection.confidence <= 1.0) {
            continue;
        }
        match cls.get_mut(detection.class as usize) {
            Some(bucket) => bucket.push(detection),
            None => warn!("class id out of range ({} >= {}): {:?}", detection.class, cls_num, detection),
        }
    }

    cls.into_iter()
        .flat_map(|d| nms(&d, nms_threshold))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(class: u8, x1: f32, y1: f32, x2: f32, y2: f32, confidence: f32) -> DetectionData {
        DetectionData { class, x1, y1, x2, y2, confidence }
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let a = det(0, 0., 0., 10., 10., 0.9);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = det(0, 0., 0., 10., 10., 0.9);
        let b = det(0, 20., 20., 30., 30., 0.9);
        assert_eq!(iou(&a, &b), 0.0);
        // 辺が接しているだけなら重なりなし
        let c = det(0, 10., 0., 20., 10., 0.9);
        assert_eq!(iou(&a, &c), 0.0);
    }

    #[test]
    fn iou_of_half_overlap() {
        let a = det(0, 0., 0., 10., 10., 0.9);
        let b = det(0, 5., 0., 15., 10., 0.9);
        // 交差 50, 和 150
        assert!((iou(&a, &b) - 1. / 3.).abs() < 1e-6);
    }

    #[test]
    fn nms_keeps_highest_confidence_of_overlapping_boxes() {
        let boxes = [
            det(0, 0., 0., 10., 10., 0.6),
            det(0, 1., 1., 11., 11., 0.9),
            det(0, 50., 50., 60., 60., 0.7),
        ];
        let kept = nms(&boxes, 0.45);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].confidence, 0.7);
    }

    #[test]
    fn nms_process_runs_per_class_and_filters_threshold() {
        let boxes = [
            // 同じ位置でもクラスが違えば両方残る
            det(0, 0., 0., 10., 10., 0.9),
            det(2, 0., 0., 10., 10., 0.8),
            // 閾値ちょうどは捨てる
            det(1, 30., 30., 40., 40., 0.5),
            // 1.0 を超えるものは壊れた値として捨てる
            det(1, 30., 30., 40., 40., 1.5),
            // クラス数の範囲外
            det(9, 0., 0., 5., 5., 0.9),
        ];
        let kept = nms_process(&boxes, 3, 0.5, 0.45);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].class, 0);
        assert_eq!(kept[1].class, 2);
    }
}
