//! COCOデータセットのクラス名テーブル

use std::borrow::Cow;

/// COCOの80クラス名 (YOLOの学習済みモデルのクラスID順)
pub const COCO_NAMES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat",
    "dog", "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack",
    "umbrella", "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball",
    "kite", "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket",
    "bottle", "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple",
    "sandwich", "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake",
    "chair", "couch", "potted plant", "bed", "dining table", "toilet", "tv", "laptop",
    "mouse", "remote", "keyboard", "cell phone", "microwave", "oven", "toaster", "sink",
    "refrigerator", "book", "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// クラスIDからクラス名を取得します。
///
/// # Args
/// * `id` - クラスID
///
/// # Return
/// * クラス名。テーブル外のIDは `class_{id}` になります
pub fn class_name(id: usize) -> Cow<'static, str> {
    match COCO_NAMES.get(id) {
        Some(name) => Cow::Borrowed(name),
        None => Cow::Owned(format!("class_{}", id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_ids_resolve_to_coco_names() {
        assert_eq!(class_name(0), "person");
        assert_eq!(class_name(2), "car");
        assert_eq!(class_name(79), "toothbrush");
    }

    #[test]
    fn unknown_ids_fall_back_to_numbered_label() {
        assert_eq!(class_name(80), "class_80");
        assert_eq!(class_name(200), "class_200");
    }
}
