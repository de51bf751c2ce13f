// 该文件是 Toukui （头盔） 项目的一部分。
// src/report.rs - PDF 合规报告
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

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, dictionary};
use thiserror::Error;
use tracing::{debug, warn};

pub const REPORT_TITLE: &str = "Safety Compliance Report";
pub const IMAGES_HEADING: &str = "Inspection Images";

// 页面尺寸，单位 pt（US Letter）
const PAGE_WIDTH: i64 = 612;
const PAGE_HEIGHT: i64 = 792;
const SIDE_MARGIN: i64 = 54;
const TOP_MARGIN: i64 = 72;
const CONTENT_WIDTH: i64 = PAGE_WIDTH - 2 * SIDE_MARGIN;

// 每张图片的放置框 5in x 4in
const IMAGE_BOX_WIDTH: i64 = 360;
const IMAGE_BOX_HEIGHT: i64 = 288;
const IMAGE_GAP: i64 = 22;

const TITLE_SIZE: i64 = 24;
const HEADING_SIZE: i64 = 18;
const BODY_SIZE: i64 = 12;
const NOTICE_SIZE: i64 = 10;
// Helvetica 平均字宽约为字号的一半
const AVG_GLYPH_WIDTH: f32 = 0.52;
const MAX_NOTICE_CHARS: usize = 90;

const MAX_EMBED_PIXELS: u32 = 1200;

#[derive(Error, Debug)]
pub enum ReportError {
  #[error("缺少输入图像: {0}")]
  MissingInput(PathBuf),
  #[error("PDF 生成失败: {0}")]
  Pdf(#[from] lopdf::Error),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

pub trait ReportRenderer: Send + Sync {
  fn render(&self, original: &Path, annotated: &Path) -> Result<Vec<u8>, ReportError>;
}

/// 两页报告：标题页和检测图片页
pub struct PdfReport {
  max_embed_pixels: u32,
}

impl Default for PdfReport {
  fn default() -> Self {
    Self {
      max_embed_pixels: MAX_EMBED_PIXELS,
    }
  }
}

/// 解码后的 RGB 图像，准备嵌入为 XObject
struct Embedded {
  width: u32,
  height: u32,
  rgb: Vec<u8>,
}

fn int(value: i64) -> Object {
  Object::Integer(value)
}

fn ascii_only(text: &str) -> String {
  text
    .chars()
    .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '?' })
    .take(MAX_NOTICE_CHARS)
    .collect()
}

fn text_width(text: &str, size: i64) -> i64 {
  (text.len() as f32 * size as f32 * AVG_GLYPH_WIDTH) as i64
}

fn text_op(ops: &mut Vec<Operation>, font: &str, size: i64, x: i64, y: i64, text: &str) {
  ops.push(Operation::new("BT", vec![]));
  ops.push(Operation::new("Tf", vec![font.into(), int(size)]));
  ops.push(Operation::new("Td", vec![int(x), int(y)]));
  ops.push(Operation::new("Tj", vec![Object::string_literal(text)]));
  ops.push(Operation::new("ET", vec![]));
}

fn centered_text(ops: &mut Vec<Operation>, font: &str, size: i64, y: i64, text: &str) {
  let x = ((PAGE_WIDTH - text_width(text, size)) / 2).max(SIDE_MARGIN);
  text_op(ops, font, size, x, y, text);
}

/// 在 `box_w` x `box_h` 内保持宽高比缩放
fn fit(width: u32, height: u32, box_w: i64, box_h: i64) -> (i64, i64) {
  let scale = (box_w as f64 / width as f64).min(box_h as f64 / height as f64);
  let w = ((width as f64 * scale).round() as i64).max(1);
  let h = ((height as f64 * scale).round() as i64).max(1);
  (w, h)
}

impl PdfReport {
  pub fn with_max_embed_pixels(mut self, pixels: u32) -> Self {
    self.max_embed_pixels = pixels.max(1);
    self
  }

  fn load(&self, path: &Path) -> Result<Embedded, image::ImageError> {
    let mut image = image::open(path)?;
    if image.width() > self.max_embed_pixels || image.height() > self.max_embed_pixels {
      image = image.resize(self.max_embed_pixels, self.max_embed_pixels, FilterType::Triangle);
    }
    let rgb = image.to_rgb8();
    Ok(Embedded {
      width: rgb.width(),
      height: rgb.height(),
      rgb: rgb.into_raw(),
    })
  }

  fn add_page(
    doc: &mut Document,
    pages_id: ObjectId,
    resources: Dictionary,
    ops: Vec<Operation>,
  ) -> Result<ObjectId, ReportError> {
    let content = Content { operations: ops };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
    let resources_id = doc.add_object(resources);
    Ok(doc.add_object(dictionary! {
      "Type" => "Page",
      "Parent" => pages_id,
      "Contents" => content_id,
      "Resources" => resources_id,
    }))
  }

  fn build(&self, images: [&Path; 2], generated_on: &str) -> Result<Vec<u8>, ReportError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let regular = doc.add_object(dictionary! {
      "Type" => "Font",
      "Subtype" => "Type1",
      "BaseFont" => "Helvetica",
    });
    let bold = doc.add_object(dictionary! {
      "Type" => "Font",
      "Subtype" => "Type1",
      "BaseFont" => "Helvetica-Bold",
    });
    let fonts = dictionary! {
      "F1" => regular,
      "F2" => bold,
    };

    // 标题页
    let mut ops = Vec::new();
    let title_y = PAGE_HEIGHT - TOP_MARGIN - TITLE_SIZE;
    centered_text(&mut ops, "F2", TITLE_SIZE, title_y, REPORT_TITLE);
    centered_text(
      &mut ops,
      "F1",
      BODY_SIZE,
      title_y - 2 * TITLE_SIZE,
      &format!("Generated on: {}", generated_on),
    );
    let title_page = Self::add_page(
      &mut doc,
      pages_id,
      dictionary! { "Font" => fonts.clone() },
      ops,
    )?;

    // 图片页
    let mut ops = Vec::new();
    let mut xobjects = Dictionary::new();
    let mut cursor = PAGE_HEIGHT - TOP_MARGIN - HEADING_SIZE;
    text_op(&mut ops, "F2", HEADING_SIZE, SIDE_MARGIN, cursor, IMAGES_HEADING);
    cursor -= HEADING_SIZE + IMAGE_GAP;

    for (index, path) in images.iter().enumerate() {
      let number = index + 1;
      match self.load(path) {
        Ok(embedded) => {
          let (w, h) = fit(embedded.width, embedded.height, IMAGE_BOX_WIDTH, IMAGE_BOX_HEIGHT);
          let x = SIDE_MARGIN + (CONTENT_WIDTH - w) / 2;
          let y = cursor - h;
          let name = format!("Im{}", number);
          let image_id = doc.add_object(Stream::new(
            dictionary! {
              "Type" => "XObject",
              "Subtype" => "Image",
              "Width" => embedded.width as i64,
              "Height" => embedded.height as i64,
              "ColorSpace" => "DeviceRGB",
              "BitsPerComponent" => 8i64,
            },
            embedded.rgb,
          ));
          xobjects.set(name.as_str(), image_id);

          ops.push(Operation::new("q", vec![]));
          ops.push(Operation::new(
            "cm",
            vec![int(w), int(0), int(0), int(h), int(x), int(y)],
          ));
          ops.push(Operation::new("Do", vec![name.as_str().into()]));
          ops.push(Operation::new("Q", vec![]));
          debug!("嵌入图像 {}: {}x{} -> {}x{} pt", number, embedded.width, embedded.height, w, h);
          cursor = y - IMAGE_GAP;
        }
        Err(e) => {
          warn!("报告图像 {} 无法加载 {}: {}", number, path.display(), e);
          let notice = ascii_only(&format!("Error loading image {}: {}", number, e));
          cursor -= NOTICE_SIZE;
          text_op(&mut ops, "F1", NOTICE_SIZE, SIDE_MARGIN, cursor, &notice);
          cursor -= IMAGE_GAP;
        }
      }
    }

    let mut resources = dictionary! { "Font" => fonts };
    if !xobjects.is_empty() {
      resources.set("XObject", xobjects);
    }
    let images_page = Self::add_page(&mut doc, pages_id, resources, ops)?;

    let kids = vec![Object::Reference(title_page), Object::Reference(images_page)];
    let pages = dictionary! {
      "Type" => "Pages",
      "Count" => kids.len() as i64,
      "Kids" => kids,
      "MediaBox" => vec![int(0), int(0), int(PAGE_WIDTH), int(PAGE_HEIGHT)],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let catalog_id = doc.add_object(dictionary! {
      "Type" => "Catalog",
      "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)?;
    Ok(bytes)
  }
}

impl ReportRenderer for PdfReport {
  fn render(&self, original: &Path, annotated: &Path) -> Result<Vec<u8>, ReportError> {
    for path in [original, annotated] {
      if !path.exists() {
        return Err(ReportError::MissingInput(path.to_path_buf()));
      }
    }

    let generated_on = chrono::Local::now().format("%B %d, %Y").to_string();
    let bytes = self.build([original, annotated], &generated_on)?;
    debug!("报告生成完成: {} 字节", bytes.len());
    Ok(bytes)
  }
}
