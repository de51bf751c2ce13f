// 该文件是 Toukui （头盔） 项目的一部分。
// src/summary.rs - 检测汇总
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

use serde::{Deserialize, Serialize};

use crate::detector::DetectionResult;
use crate::model::HelmetLabel;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DetectionSummary {
  pub total_subjects: usize,
  pub wearing: usize,
  pub missing: usize,
  pub total_infractions: usize,
  /// 百分制，保留一位小数
  pub average_confidence: f64,
}

/// 由检测列表计算汇总，每次请求都完整重算
pub fn summarize(detections: &[DetectionResult]) -> DetectionSummary {
  let mut wearing = 0;
  let mut missing = 0;
  for detection in detections {
    match HelmetLabel::from_label_str(&detection.class_name) {
      Some(HelmetLabel::Helmet) => wearing += 1,
      Some(HelmetLabel::NoHelmet) => missing += 1,
      None => {}
    }
  }

  let average_confidence = if detections.is_empty() {
    0.0
  } else {
    let mean = detections.iter().map(|d| d.confidence).sum::<f64>() / detections.len() as f64;
    (mean * 1000.0).round() / 10.0
  };

  DetectionSummary {
    total_subjects: wearing + missing,
    wearing,
    missing,
    total_infractions: missing,
    average_confidence,
  }
}
