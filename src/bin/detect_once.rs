// 该文件是 Toukui （头盔） 项目的一部分。
// src/bin/detect_once.rs - 单张图像检测工具
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

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use tracing::info;
use url::Url;

use toukui::{
  detector::Detector,
  model::load_model,
  output::Draw,
  report::{PdfReport, ReportRenderer},
  summary::summarize,
  validate::validate,
};

/// 不启动服务，直接检测一张图像
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入图像
  #[arg(long, value_name = "IMAGE")]
  pub input: PathBuf,
  /// 标注图像输出路径，格式与输入一致
  #[arg(long, value_name = "OUTPUT")]
  pub output: PathBuf,
  /// 同时生成 PDF 报告
  #[arg(long, value_name = "PDF")]
  pub report: Option<PathBuf>,
  /// 标注文字字体
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  info!("模型地址: {}", args.model);
  info!("输入图像: {}", args.input.display());

  let bytes = std::fs::read(&args.input)
    .with_context(|| format!("无法读取 {}", args.input.display()))?;
  let filename = args
    .input
    .file_name()
    .and_then(|n| n.to_str())
    .unwrap_or_default();
  validate(&bytes, filename)?;

  let model = load_model(&args.model)?;
  let draw = match &args.font {
    Some(path) => Draw::with_font_file(path)?,
    None => Draw::default(),
  };
  let detector = Detector::new(model, draw);

  let now = std::time::Instant::now();
  let inference = detector.infer_bytes(&bytes, true)?;
  info!("推理完成，耗时: {:.2?}", now.elapsed());

  let summary = summarize(&inference.detections);
  let output = json!({
    "summary": summary,
    "detections": inference.detections,
  });
  println!("{}", serde_json::to_string_pretty(&output)?);

  if let Some(annotated) = &inference.annotated {
    std::fs::write(&args.output, annotated)
      .with_context(|| format!("无法写入 {}", args.output.display()))?;
    info!("标注图像: {}", args.output.display());
  }

  if let Some(report) = &args.report {
    let pdf = PdfReport::default().render(&args.input, &args.output)?;
    std::fs::write(report, pdf).with_context(|| format!("无法写入 {}", report.display()))?;
    info!("报告: {}", report.display());
  }

  Ok(())
}
