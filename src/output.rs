// 该文件是 Toukui （头盔） 项目的一部分。
// src/output.rs - 输出定义
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

use image::{DynamicImage, ImageFormat, RgbImage};

pub mod draw;

pub use self::draw::{Draw, DrawError};

/// 按给定格式编码图像
pub fn encode_image(image: RgbImage, format: ImageFormat) -> Result<Vec<u8>, image::ImageError> {
  let mut buf = Cursor::new(Vec::new());
  DynamicImage::ImageRgb8(image).write_to(&mut buf, format)?;
  Ok(buf.into_inner())
}
