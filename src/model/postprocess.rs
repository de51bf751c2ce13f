// 该文件是 Toukui （头盔） 项目的一部分。
// src/model/postprocess.rs - 检测后处理
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::cmp::Ordering;

use tracing::debug;

use crate::model::{DetectItem, ModelError};

/// 信箱缩放参数：原图等比缩放后居中放入正方形输入
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
  pub scale: f32,
  pub pad_x: f32,
  pub pad_y: f32,
  pub src_width: u32,
  pub src_height: u32,
}

impl Letterbox {
  pub fn new(src_width: u32, src_height: u32, target: u32) -> Self {
    let scale = (target as f32 / src_width as f32).min(target as f32 / src_height as f32);
    let (new_w, new_h) = Self::scaled(src_width, src_height, scale);
    Letterbox {
      scale,
      pad_x: (target.saturating_sub(new_w) / 2) as f32,
      pad_y: (target.saturating_sub(new_h) / 2) as f32,
      src_width,
      src_height,
    }
  }

  fn scaled(width: u32, height: u32, scale: f32) -> (u32, u32) {
    (
      ((width as f32 * scale).round() as u32).max(1),
      ((height as f32 * scale).round() as u32).max(1),
    )
  }

  /// 缩放后（不含填充）的尺寸
  pub fn resized(&self) -> (u32, u32) {
    Self::scaled(self.src_width, self.src_height, self.scale)
  }

  /// 将模型输入坐标系下的框映射回原图，并裁剪到图像范围内
  pub fn unmap(&self, bbox: [f32; 4]) -> [f32; 4] {
    let w = self.src_width as f32;
    let h = self.src_height as f32;
    [
      ((bbox[0] - self.pad_x) / self.scale).clamp(0.0, w),
      ((bbox[1] - self.pad_y) / self.scale).clamp(0.0, h),
      ((bbox[2] - self.pad_x) / self.scale).clamp(0.0, w),
      ((bbox[3] - self.pad_y) / self.scale).clamp(0.0, h),
    ]
  }
}

/// 解析 YOLOv8/11 风格的输出张量。
///
/// `shape` 为 `[1, a, b]`，其中一维为 `4 + 类别数`，另一维为候选框数量。
/// 每个候选框为 `cx, cy, w, h` 加上各类别得分。
pub fn decode_yolo(
  data: &[f32],
  shape: &[usize],
  threshold: f32,
  letterbox: &Letterbox,
) -> Result<Vec<DetectItem>, ModelError> {
  let (a, b) = match shape {
    [1, a, b] => (*a, *b),
    _ => {
      return Err(ModelError::InvalidOutput(format!(
        "期望形状 [1, N, M]，实际为 {:?}",
        shape
      )));
    }
  };
  if data.len() != a * b {
    return Err(ModelError::InvalidOutput(format!(
      "张量长度 {} 与形状 {:?} 不符",
      data.len(),
      shape
    )));
  }

  // 候选框数量总是远多于特征数量
  let features_major = a <= b;
  let (features, anchors) = if features_major { (a, b) } else { (b, a) };
  if features < 5 {
    return Err(ModelError::InvalidOutput(format!(
      "特征维度 {} 过小",
      features
    )));
  }
  let value = |feature: usize, anchor: usize| -> f32 {
    if features_major {
      data[feature * anchors + anchor]
    } else {
      data[anchor * features + feature]
    }
  };

  let mut items = Vec::new();
  for anchor in 0..anchors {
    let (class_id, score) = (4..features)
      .map(|f| (f - 4, value(f, anchor)))
      .fold((0usize, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

    if !score.is_finite() || score < threshold {
      continue;
    }

    let cx = value(0, anchor);
    let cy = value(1, anchor);
    let w = value(2, anchor);
    let h = value(3, anchor);
    let bbox = letterbox.unmap([cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0]);

    items.push(DetectItem {
      class_id: class_id as u32,
      score,
      bbox,
    });
  }

  debug!("{} 个候选框中有 {} 个超过阈值", anchors, items.len());
  Ok(items)
}

pub fn intersection_over_union(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let ix = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
  let iy = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
  let inter = ix * iy;
  let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
  let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
  let union = area_a + area_b - inter;
  if union <= 0.0 { 0.0 } else { inter / union }
}

/// 按类别的非极大值抑制，返回结果按置信度降序排列
pub fn non_maximum_suppression(mut items: Vec<DetectItem>, iou_threshold: f32) -> Vec<DetectItem> {
  items.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
  let mut removed = vec![false; items.len()];
  for current in 0..items.len() {
    if removed[current] {
      continue;
    }
    for other in current + 1..items.len() {
      if removed[other] || items[current].class_id != items[other].class_id {
        continue;
      }
      if intersection_over_union(&items[current].bbox, &items[other].bbox) > iou_threshold {
        removed[other] = true;
      }
    }
  }
  let mut drop_iter = removed.iter();
  items.retain(|_| !drop_iter.next().copied().unwrap_or(false));
  items
}

#[cfg(test)]
mod tests {
  use super::*;

  fn item(class_id: u32, score: f32, bbox: [f32; 4]) -> DetectItem {
    DetectItem {
      class_id,
      score,
      bbox,
    }
  }

  #[test]
  fn nms_no_overlap() {
    let items = vec![
      item(0, 0.6, [0.0, 0.0, 1.0, 1.0]),
      item(0, 0.7, [2.0, 2.0, 3.0, 3.0]),
    ];
    let kept = non_maximum_suppression(items, 0.45);
    assert_eq!(kept.len(), 2);
    assert_eq!(kept[0].score, 0.7);
  }

  #[test]
  fn nms_standard_usage() {
    let items = vec![
      item(0, 0.6, [0.0, 0.0, 4.0, 4.0]),
      item(0, 0.55, [0.0, 0.0, 5.0, 5.0]),
      item(0, 0.75, [6.0, 6.0, 10.0, 10.0]),
    ];
    let kept = non_maximum_suppression(items, 0.45);
    assert_eq!(
      kept,
      vec![
        item(0, 0.75, [6.0, 6.0, 10.0, 10.0]),
        item(0, 0.6, [0.0, 0.0, 4.0, 4.0]),
      ]
    );
  }

  #[test]
  fn nms_overlap_but_different_classes() {
    let items = vec![
      item(0, 0.6, [0.0, 0.0, 4.0, 4.0]),
      item(1, 0.55, [0.0, 0.0, 4.0, 4.0]),
    ];
    assert_eq!(non_maximum_suppression(items, 0.45).len(), 2);
  }

  #[test]
  fn suppressed_box_does_not_suppress_others() {
    // b 被 a 抑制；c 与 b 重叠但与 a 不重叠，应当保留
    let items = vec![
      item(0, 0.9, [0.0, 0.0, 10.0, 10.0]),
      item(0, 0.8, [3.0, 0.0, 13.0, 10.0]),
      item(0, 0.7, [9.0, 0.0, 19.0, 10.0]),
    ];
    let kept = non_maximum_suppression(items, 0.45);
    assert_eq!(kept.len(), 2);
    assert_eq!(kept[1].score, 0.7);
  }

  #[test]
  fn iou_of_identical_boxes_is_one() {
    let b = [1.0, 1.0, 3.0, 5.0];
    assert!((intersection_over_union(&b, &b) - 1.0).abs() < 1e-6);
    assert_eq!(intersection_over_union(&b, &[10.0, 10.0, 11.0, 11.0]), 0.0);
  }

  #[test]
  fn letterbox_round_trip_wide_image() {
    let lb = Letterbox::new(1280, 640, 640);
    assert_eq!(lb.scale, 0.5);
    assert_eq!(lb.resized(), (640, 320));
    assert_eq!(lb.pad_x, 0.0);
    assert_eq!(lb.pad_y, 160.0);
    let mapped = lb.unmap([100.0, 200.0, 300.0, 400.0]);
    assert_eq!(mapped, [200.0, 80.0, 600.0, 480.0]);
  }

  #[test]
  fn letterbox_clamps_to_source() {
    let lb = Letterbox::new(100, 100, 640);
    let mapped = lb.unmap([-50.0, -50.0, 700.0, 700.0]);
    assert_eq!(mapped, [0.0, 0.0, 100.0, 100.0]);
  }

  #[test]
  fn decode_features_major_layout() {
    // 2 个类别，8 个候选框，形状 [1, 6, 8]
    let lb = Letterbox::new(640, 640, 640);
    let mut data = vec![0.0f32; 6 * 8];
    let mut set = |anchor: usize, values: [f32; 6]| {
      for (feature, v) in values.into_iter().enumerate() {
        data[feature * 8 + anchor] = v;
      }
    };
    set(0, [100.0, 100.0, 20.0, 20.0, 0.9, 0.05]);
    set(1, [300.0, 300.0, 40.0, 40.0, 0.1, 0.8]);
    set(2, [500.0, 500.0, 60.0, 60.0, 0.2, 0.1]);

    let items = decode_yolo(&data, &[1, 6, 8], 0.25, &lb).unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].class_id, 0);
    assert_eq!(items[0].bbox, [90.0, 90.0, 110.0, 110.0]);
    assert_eq!(items[1].class_id, 1);
    assert_eq!(items[1].score, 0.8);
  }

  #[test]
  fn decode_transposed_layout() {
    let lb = Letterbox::new(640, 640, 640);
    let mut data = vec![0.0f32; 8 * 6];
    // 第 5 个候选框
    data[5 * 6..6 * 6].copy_from_slice(&[320.0, 320.0, 10.0, 10.0, 0.3, 0.6]);
    let items = decode_yolo(&data, &[1, 8, 6], 0.25, &lb).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].class_id, 1);
    assert_eq!(items[0].bbox, [315.0, 315.0, 325.0, 325.0]);
  }

  #[test]
  fn decode_rejects_bad_shape() {
    let lb = Letterbox::new(64, 64, 640);
    assert!(decode_yolo(&[0.0; 6], &[6], 0.25, &lb).is_err());
    assert!(decode_yolo(&[0.0; 5], &[1, 2, 3], 0.25, &lb).is_err());
    assert!(decode_yolo(&[0.0; 12], &[1, 4, 3], 0.25, &lb).is_err());
  }
}
