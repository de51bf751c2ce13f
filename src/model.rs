// 该文件是 Toukui （头盔） 项目的一部分。
// src/model.rs - 模型
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

use std::sync::Arc;

use image::RgbImage;
use thiserror::Error;
use url::Url;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 进程内共享的只读分类器句柄
pub type SharedModel =
  Arc<dyn Model<Input = RgbImage, Output = DetectResult, Error = ModelError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，原图像素坐标
}

#[derive(Debug, Clone, Default)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }
}

impl From<Vec<DetectItem>> for DetectResult {
  fn from(items: Vec<DetectItem>) -> Self {
    DetectResult {
      items: items.into_boxed_slice(),
    }
  }
}

pub trait WithLabel: Sized + std::fmt::Debug {
  fn to_label_str(&self) -> &'static str;
  fn from_label_id(id: u32) -> Option<Self>;
}

/// 安全帽两类标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HelmetLabel {
  /// 佩戴安全帽
  Helmet,
  /// 未佩戴安全帽
  NoHelmet,
}

impl HelmetLabel {
  pub const HELMET: &'static str = "helmet";
  pub const NO_HELMET: &'static str = "no_helmet";

  pub fn from_label_str(name: &str) -> Option<Self> {
    match name {
      Self::HELMET => Some(HelmetLabel::Helmet),
      Self::NO_HELMET => Some(HelmetLabel::NoHelmet),
      _ => None,
    }
  }
}

impl WithLabel for HelmetLabel {
  fn to_label_str(&self) -> &'static str {
    match self {
      HelmetLabel::Helmet => Self::HELMET,
      HelmetLabel::NoHelmet => Self::NO_HELMET,
    }
  }

  fn from_label_id(id: u32) -> Option<Self> {
    match id {
      0 => Some(HelmetLabel::Helmet),
      1 => Some(HelmetLabel::NoHelmet),
      _ => None,
    }
  }
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型加载失败: {0}")]
  ModelLoadFailure(String),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("推理失败: {0}")]
  Inference(String),
  #[error("模型输出无效: {0}")]
  InvalidOutput(String),
}

pub mod postprocess;

#[cfg(feature = "model_onnx")]
mod yolo_onnx;
#[cfg(feature = "model_onnx")]
pub use self::yolo_onnx::{YoloOnnx, YoloOnnxBuilder};

/// 根据 URL 方案加载模型，只在启动时调用一次
pub fn load_model(url: &Url) -> Result<SharedModel, ModelError> {
  #[cfg(feature = "model_onnx")]
  {
    use crate::{FromUrl, FromUrlWithScheme};

    if url.scheme() == YoloOnnxBuilder::SCHEME {
      let model = YoloOnnxBuilder::from_url(url)?.build()?;
      return Ok(Arc::new(model));
    }
  }
  Err(ModelError::ModelPathError(format!(
    "不支持的模型方案 '{}'",
    url.scheme()
  )))
}
