use crate::detection::Detection;

/// Overlap above which two boxes of the same class count as duplicates.
pub const NMS_IOU_THRESHOLD: f32 = 0.4;

/// Greedy non-max suppression.
///
/// Keeps the most confident box of every overlapping same-class cluster.
/// Boxes of different classes never suppress each other. The result is
/// ordered by confidence, highest first.
pub fn non_max_suppression(mut boxes: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    boxes.sort_by(|box1, box2| box2.confidence.total_cmp(&box1.confidence));
    let mut suppressed = vec![false; boxes.len()];
    let mut result: Vec<Detection> = Vec::new();

    for i in 0..boxes.len() {
        if suppressed[i] {
            continue;
        }
        let best = boxes[i];
        for j in (i + 1)..boxes.len() {
            if !suppressed[j]
                && boxes[j].class_id == best.class_id
                && best.bbox.iou(&boxes[j].bbox) > iou_threshold
            {
                suppressed[j] = true;
            }
        }
        result.push(best);
    }

    result
}
