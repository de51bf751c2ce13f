// 该文件是 Toukui （头盔） 项目的一部分。
// src/detector.rs - 检测适配器
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

use std::io::Cursor;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use image::{ImageReader, RgbImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

use crate::{
  model::{
    DetectItem, DetectResult, HelmetLabel, ModelError, SharedModel, WithLabel,
    postprocess::non_maximum_suppression,
  },
  output::{Draw, encode_image},
};

/// 置信度阈值
pub const CONFIDENCE_THRESHOLD: f32 = 0.25;
/// NMS IoU 阈值
pub const IOU_THRESHOLD: f32 = 0.45;
/// 单张图像最多返回的检测数
pub const MAX_DETECTIONS: usize = 1000;

/// 单个检测结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
  pub class_name: String,
  /// [0, 1]，保留三位小数
  pub confidence: f64,
  /// [x1, y1, x2, y2]，满足 x1 < x2 且 y1 < y2
  pub bbox: [i32; 4],
}

/// 一次推理的输出
#[derive(Debug, Clone)]
pub struct Inference {
  pub detections: Vec<DetectionResult>,
  pub annotated: Option<Vec<u8>>,
}

#[derive(Error, Debug)]
pub enum DetectorError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("无法识别的图像格式")]
  UnknownFormat,
  #[error("图像解码失败: {0}")]
  Decode(image::ImageError),
  #[error(transparent)]
  Model(#[from] ModelError),
  #[error("模型推理崩溃: {0}")]
  Panicked(String),
  #[error("标注图像编码失败: {0}")]
  Encode(image::ImageError),
}

pub struct Detector {
  model: SharedModel,
  draw: Draw,
}

impl Detector {
  pub fn new(model: SharedModel, draw: Draw) -> Self {
    Self { model, draw }
  }

  pub fn infer_file(&self, path: &Path, annotate: bool) -> Result<Inference, DetectorError> {
    let bytes = std::fs::read(path)?;
    self.infer_bytes(&bytes, annotate)
  }

  /// 解码图像并推理；`annotate` 为真时按上传格式编码一份标注图像
  pub fn infer_bytes(&self, bytes: &[u8], annotate: bool) -> Result<Inference, DetectorError> {
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    let format = reader.format().ok_or(DetectorError::UnknownFormat)?;
    let image = reader.decode().map_err(DetectorError::Decode)?.to_rgb8();
    debug!("输入图像 {}x{} {:?}", image.width(), image.height(), format);

    let raw = self.run_model(&image)?;
    let detections = if raw.is_empty() {
      debug!("模型未返回候选");
      Vec::new()
    } else {
      debug!("模型返回 {} 个候选", raw.len());
      postprocess(raw, image.width(), image.height())
    };

    let annotated = if annotate {
      let canvas = self.draw.draw_detections(&image, &detections);
      Some(encode_image(canvas, format).map_err(DetectorError::Encode)?)
    } else {
      None
    };

    Ok(Inference {
      detections,
      annotated,
    })
  }

  fn run_model(&self, image: &RgbImage) -> Result<DetectResult, DetectorError> {
    match panic::catch_unwind(AssertUnwindSafe(|| self.model.infer(image))) {
      Ok(result) => Ok(result?),
      Err(payload) => {
        let message = payload
          .downcast_ref::<&str>()
          .map(|s| s.to_string())
          .or_else(|| payload.downcast_ref::<String>().cloned())
          .unwrap_or_else(|| "unknown panic".to_string());
        error!("模型推理崩溃: {}", message);
        Err(DetectorError::Panicked(message))
      }
    }
  }
}

/// 阈值过滤、按类别 NMS、数量上限、取整。
pub fn postprocess(result: DetectResult, width: u32, height: u32) -> Vec<DetectionResult> {
  let candidates: Vec<DetectItem> = result
    .items
    .into_vec()
    .into_iter()
    .filter(|item| item.score.is_finite() && item.score >= CONFIDENCE_THRESHOLD)
    .filter(|item| HelmetLabel::from_label_id(item.class_id).is_some())
    .collect();

  non_maximum_suppression(candidates, IOU_THRESHOLD)
    .into_iter()
    .filter_map(|item| to_detection(&item, width, height))
    .take(MAX_DETECTIONS)
    .collect()
}

fn to_detection(item: &DetectItem, width: u32, height: u32) -> Option<DetectionResult> {
  let label = HelmetLabel::from_label_id(item.class_id)?;
  let (w, h) = (width as i32, height as i32);
  let bbox = [
    (item.bbox[0].round() as i32).clamp(0, w),
    (item.bbox[1].round() as i32).clamp(0, h),
    (item.bbox[2].round() as i32).clamp(0, w),
    (item.bbox[3].round() as i32).clamp(0, h),
  ];
  if bbox[0] >= bbox[2] || bbox[1] >= bbox[3] {
    return None;
  }

  Some(DetectionResult {
    class_name: label.to_label_str().to_string(),
    confidence: ((item.score as f64) * 1000.0).round() / 1000.0,
    bbox,
  })
}
