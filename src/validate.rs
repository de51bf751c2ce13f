// 该文件是 Toukui （头盔） 项目的一部分。
// src/validate.rs - 上传图像校验
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

use image::{ImageFormat, ImageReader};
use thiserror::Error;
use tracing::debug;

/// 允许上传的扩展名（小写，含点）
pub const ALLOWED_EXTENSIONS: [&str; 4] = [".png", ".jpg", ".jpeg", ".webp"];

/// 上传大小上限：10 MiB
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidateError {
  #[error("Unsupported file type.")]
  UnsupportedType,
  #[error("File size exceeds 10MB limit.")]
  TooLarge,
  #[error("Invalid or corrupted image: {0}")]
  CorruptImage(String),
}

/// 提取文件名的扩展名（最后一个点之后，转小写，含点）。
///
/// 开头的点不算分隔符，`.png` 这样的隐藏文件名没有扩展名。
pub fn extension_of(filename: &str) -> Option<String> {
  let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
  let stem = name.trim_start_matches('.');
  let dot = stem.rfind('.')?;
  let ext = &stem[dot..];
  if ext.len() <= 1 {
    return None;
  }
  Some(ext.to_ascii_lowercase())
}

/// 只检查扩展名，可在读取内容之前调用
pub fn check_extension(filename: &str) -> Result<String, ValidateError> {
  extension_of(filename)
    .filter(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
    .ok_or(ValidateError::UnsupportedType)
}

/// 校验上传的图像，成功时返回规范化后的扩展名。
///
/// 检查顺序固定：扩展名、大小、结构完整性，廉价的检查先行。
pub fn validate(bytes: &[u8], filename: &str) -> Result<String, ValidateError> {
  let extension = check_extension(filename)?;

  if bytes.len() > MAX_UPLOAD_BYTES {
    return Err(ValidateError::TooLarge);
  }

  verify_structure(bytes)?;
  debug!("图像校验通过: {} ({} 字节)", filename, bytes.len());

  Ok(extension)
}

// 只解析文件头，不解码像素
fn verify_structure(bytes: &[u8]) -> Result<(), ValidateError> {
  let reader = ImageReader::new(Cursor::new(bytes))
    .with_guessed_format()
    .map_err(|e| ValidateError::CorruptImage(e.to_string()))?;

  match reader.format() {
    Some(ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::WebP) => {}
    Some(other) => {
      return Err(ValidateError::CorruptImage(format!(
        "unexpected container {:?}",
        other
      )));
    }
    None => {
      return Err(ValidateError::CorruptImage(
        "unrecognized image container".to_string(),
      ));
    }
  }

  let (width, height) = reader
    .into_dimensions()
    .map_err(|e| ValidateError::CorruptImage(e.to_string()))?;
  if width == 0 || height == 0 {
    return Err(ValidateError::CorruptImage(format!(
      "empty image {}x{}",
      width, height
    )));
  }

  Ok(())
}
