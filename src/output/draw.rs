// 该文件是 Toukui （头盔） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use thiserror::Error;
use tracing::{info, warn};

use crate::detector::DetectionResult;
use crate::model::HelmetLabel;

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const BOX_THICKNESS: i32 = 2;
const COMPLIANT_COLOR: [u8; 3] = [0, 200, 0]; // 绿色
const NON_COMPLIANT_COLOR: [u8; 3] = [220, 0, 0]; // 红色
const OTHER_COLOR: [u8; 3] = [0, 0, 255]; // 蓝色

// 默认字体 DejaVu Sans，许可见 assets/LICENSE-DejaVu.txt
static EMBEDDED_FONT: &[u8] = include_bytes!("../../assets/font.ttf");

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("无效的字体文件: {0}")]
  InvalidFont(String),
}

pub struct Draw {
  font_size: f32,
  label_text_height: i32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
  font: Option<FontArc>,
}

impl Default for Draw {
  fn default() -> Self {
    let font = FontArc::try_from_slice(EMBEDDED_FONT)
      .map_err(|e| warn!("无法加载内置字体，标签将不含文字: {}", e))
      .ok();
    Self {
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
      font,
    }
  }
}

impl Draw {
  /// 用指定字体文件替换内置字体
  pub fn with_font_file(path: &Path) -> Result<Self, DrawError> {
    let data = std::fs::read(path)?;
    let font = FontArc::try_from_vec(data).map_err(|e| DrawError::InvalidFont(e.to_string()))?;
    info!("加载标签字体: {}", path.display());
    Ok(Self {
      font: Some(font),
      ..Self::default()
    })
  }

  fn color_of(class_name: &str) -> Rgb<u8> {
    match HelmetLabel::from_label_str(class_name) {
      Some(HelmetLabel::Helmet) => Rgb(COMPLIANT_COLOR),
      Some(HelmetLabel::NoHelmet) => Rgb(NON_COMPLIANT_COLOR),
      None => Rgb(OTHER_COLOR),
    }
  }

  // 在图像上绘制一个矩形边框，bbox 为像素坐标 [x_min, y_min, x_max, y_max]
  fn draw_bbox_with_label(&self, image: &mut RgbImage, detection: &DetectionResult) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let [x_min, y_min, x_max, y_max] = detection.bbox;
    let x_min = x_min.clamp(0, w - 1);
    let y_min = y_min.clamp(0, h - 1);
    let x_max = x_max.clamp(0, w - 1);
    let y_max = y_max.clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    let color = Self::color_of(&detection.class_name);

    // 绘制边框（向内加粗）
    for t in 0..BOX_THICKNESS {
      let width = x_max - x_min - 2 * t;
      let height = y_max - y_min - 2 * t;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32 + 1, height as u32 + 1);
      draw_hollow_rect_mut(image, rect, color);
    }

    // 创建标签文本
    let label = format!("{} {:.2}", detection.class_name, detection.confidence);

    // 估算文本大小（粗略估计）
    let text_width = (label.len() as f32 * self.label_char_width) as i32;
    let text_height = self.label_text_height;

    // 确定标签背景位置（在边框上方，空间不足时贴住图像顶部）
    let label_x = x_min;
    let label_y = (y_min - text_height).max(0);

    // 确保标签不超出图像边界
    let label_width = text_width.min(w - label_x).max(0) as u32;
    let label_height = text_height.min(h - label_y).max(0) as u32;

    if label_width > 0 && label_height > 0 {
      let rect = Rect::at(label_x, label_y).of_size(label_width, label_height);
      draw_filled_rect_mut(image, rect, color);

      if let Some(font) = &self.font {
        draw_text_mut(
          image,
          Rgb([255u8, 255u8, 255u8]),
          label_x,
          label_y + self.label_text_vertical_padding,
          PxScale::from(self.font_size),
          font,
          &label,
        );
      }
    }
  }

  /// 在图像副本上绘制检测结果，输出只取决于输入图像与检测列表
  pub fn draw_detections(&self, image: &RgbImage, detections: &[DetectionResult]) -> RgbImage {
    let mut canvas = image.clone();
    for detection in detections {
      self.draw_bbox_with_label(&mut canvas, detection);
    }
    canvas
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn detection(class_name: &str, bbox: [i32; 4]) -> DetectionResult {
    DetectionResult {
      class_name: class_name.to_string(),
      confidence: 0.9,
      bbox,
    }
  }

  #[test]
  fn draws_box_in_class_color() {
    let image = RgbImage::from_pixel(100, 100, Rgb([0, 0, 0]));
    let out = Draw::default().draw_detections(&image, &[detection("no_helmet", [20, 40, 60, 80])]);

    // 左边框
    assert_eq!(out.get_pixel(20, 60), &Rgb(NON_COMPLIANT_COLOR));
    // 框内部保持原样
    assert_eq!(out.get_pixel(40, 60), &Rgb([0, 0, 0]));
    // 原图未被修改
    assert_eq!(image.get_pixel(20, 60), &Rgb([0, 0, 0]));
  }

  fn without_font() -> Draw {
    Draw {
      font: None,
      ..Draw::default()
    }
  }

  #[test]
  fn label_bar_sits_above_box() {
    let image = RgbImage::from_pixel(200, 200, Rgb([0, 0, 0]));
    let out = without_font().draw_detections(&image, &[detection("helmet", [50, 100, 150, 180])]);
    let y = (100 - LABEL_TEXT_HEIGHT + 1) as u32;
    assert_eq!(out.get_pixel(52, y), &Rgb(COMPLIANT_COLOR));
  }

  #[test]
  fn label_text_is_drawn_with_builtin_font() {
    let draw = Draw::default();
    assert!(draw.font.is_some());

    let image = RgbImage::from_pixel(300, 200, Rgb([0, 0, 0]));
    let dets = [detection("helmet", [50, 100, 250, 180])];
    let with_text = draw.draw_detections(&image, &dets);
    let bar_only = without_font().draw_detections(&image, &dets);

    // 标签区域：x 50..171（11 个字符），y 76..100
    let top = (100 - LABEL_TEXT_HEIGHT) as u32;
    let changed = (50..171u32)
      .flat_map(|x| (top..100u32).map(move |y| (x, y)))
      .filter(|&(x, y)| with_text.get_pixel(x, y) != bar_only.get_pixel(x, y))
      .count();
    assert!(changed > 20, "{}", changed);
    // 框内部不受文字影响
    assert_eq!(with_text.get_pixel(150, 140), bar_only.get_pixel(150, 140));
  }

  #[test]
  fn drawing_is_deterministic() {
    let image = RgbImage::from_fn(64, 48, |x, y| Rgb([x as u8, y as u8, 7]));
    let dets = vec![
      detection("helmet", [1, 1, 30, 30]),
      detection("no_helmet", [20, 10, 63, 47]),
    ];
    let draw = Draw::default();
    assert_eq!(draw.draw_detections(&image, &dets), draw.draw_detections(&image, &dets));
  }

  #[test]
  fn out_of_bounds_boxes_are_clamped() {
    let image = RgbImage::new(10, 10);
    let out = Draw::default().draw_detections(&image, &[detection("helmet", [-5, -5, 50, 50])]);
    assert_eq!(out.dimensions(), (10, 10));
  }

  #[test]
  fn missing_font_file_is_error() {
    assert!(Draw::with_font_file(Path::new("/nonexistent/font.ttf")).is_err());
  }
}
