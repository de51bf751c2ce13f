// 该文件是 Toukui （头盔） 项目的一部分。
// src/model/yolo_onnx.rs - ONNX 格式的 YOLO 检测模型
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

use std::path::PathBuf;

use image::{Rgb, RgbImage, imageops::FilterType};
use tract_onnx::prelude::*;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{
    DetectResult, Model, ModelError,
    postprocess::{Letterbox, decode_yolo},
  },
};

const YOLO_DEFAULT_INPUT_SIZE: u32 = 640;
const YOLO_PAD_VALUE: u8 = 114;
const YOLO_SCORE_THRESH: f32 = 0.25;

type Plan = TypedRunnableModel<TypedModel>;

pub struct YoloOnnx {
  plan: Plan,
  input_size: u32,
}

pub struct YoloOnnxBuilder {
  model_path: PathBuf,
  input_size: u32,
}

impl FromUrlWithScheme for YoloOnnxBuilder {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for YoloOnnxBuilder {
  type Error = ModelError;

  /// `onnx:///models/best.onnx?size=640`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let mut input_size = YOLO_DEFAULT_INPUT_SIZE;
    for (k, v) in url.query_pairs() {
      if k == "size" {
        input_size = v
          .parse()
          .map_err(|_| ModelError::ModelPathError(format!("无效的输入尺寸: {}", v)))?;
      }
    }
    if input_size == 0 || input_size % 32 != 0 {
      return Err(ModelError::ModelPathError(format!(
        "输入尺寸 {} 必须是 32 的正整数倍",
        input_size
      )));
    }

    Ok(YoloOnnxBuilder {
      model_path: PathBuf::from(url.path()),
      input_size,
    })
  }
}

impl YoloOnnxBuilder {
  pub fn build(self) -> Result<YoloOnnx, ModelError> {
    info!("加载模型文件: {}", self.model_path.display());
    let size = self.input_size as usize;
    let load = |e: TractError| ModelError::ModelLoadFailure(format!("{}: {}", self.model_path.display(), e));

    let plan = tract_onnx::onnx()
      .model_for_path(&self.model_path)
      .map_err(load)?
      .with_input_fact(
        0,
        InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
      )
      .map_err(load)?
      .into_optimized()
      .map_err(load)?
      .into_runnable()
      .map_err(load)?;
    info!("模型加载完成，输入尺寸 {}x{}", size, size);

    Ok(YoloOnnx {
      plan,
      input_size: self.input_size,
    })
  }
}

impl YoloOnnx {
  fn build_input(&self, image: &RgbImage, letterbox: &Letterbox) -> Tensor {
    let size = self.input_size;
    let (new_w, new_h) = letterbox.resized();
    let resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let mut canvas = RgbImage::from_pixel(size, size, Rgb([YOLO_PAD_VALUE; 3]));
    image::imageops::replace(
      &mut canvas,
      &resized,
      letterbox.pad_x as i64,
      letterbox.pad_y as i64,
    );

    tract_ndarray::Array4::from_shape_fn(
      (1, 3, size as usize, size as usize),
      |(_, c, y, x)| canvas.get_pixel(x as u32, y as u32)[c] as f32 / 255.0,
    )
    .into_tensor()
  }
}

impl Model for YoloOnnx {
  type Input = RgbImage;
  type Output = DetectResult;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let letterbox = Letterbox::new(input.width(), input.height(), self.input_size);
    debug!("设置模型输入: {:?}", letterbox);
    let tensor = self.build_input(input, &letterbox);

    debug!("执行模型推理");
    let outputs = self
      .plan
      .run(tvec!(tensor.into()))
      .map_err(|e| ModelError::Inference(e.to_string()))?;

    let output = outputs
      .first()
      .ok_or_else(|| ModelError::InvalidOutput("模型没有输出".to_string()))?;
    let view = output
      .to_array_view::<f32>()
      .map_err(|e| ModelError::InvalidOutput(e.to_string()))?;
    let shape = view.shape().to_vec();
    let data: Vec<f32> = view.iter().copied().collect();
    debug!("模型输出形状: {:?}", shape);

    let items = decode_yolo(&data, &shape, YOLO_SCORE_THRESH, &letterbox)?;
    Ok(DetectResult::from(items))
  }
}
