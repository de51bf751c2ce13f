// 该文件是 Toukui （头盔） 项目的一部分。
// src/main.rs - 检测服务主程序
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

mod args;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use toukui::{
  api,
  detector::Detector,
  model::load_model,
  output::Draw,
  report::PdfReport,
  service::DetectionService,
  session::{DirSessionStore, SessionStore},
  task::SweepTask,
};

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    tracing::error!("无法监听中断信号: {}", e);
    std::future::pending::<()>().await;
  }
  info!("收到中断信号，准备退出...");
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = args::Args::parse();
  info!("模型地址: {}", args.model);
  info!("监听地址: {}", args.listen);

  let model = load_model(&args.model).with_context(|| format!("无法加载模型 {}", args.model))?;
  let draw = match &args.font {
    Some(path) => Draw::with_font_file(path).with_context(|| format!("无法加载字体 {}", path.display()))?,
    None => Draw::default(),
  };

  let session_root = args.session_root();
  let store: Arc<dyn SessionStore> = Arc::new(
    DirSessionStore::open(&session_root)
      .with_context(|| format!("无法创建会话目录 {}", session_root.display()))?,
  );

  let sweeper = args.sweep_max_age().map(|max_age| {
    tokio::spawn(
      SweepTask::default()
        .with_max_age(max_age)
        .with_interval((max_age / 4).max(std::time::Duration::from_secs(1)))
        .run(store.clone()),
    )
  });

  let service = Arc::new(DetectionService::new(
    store,
    Arc::new(Detector::new(model, draw)),
    Arc::new(PdfReport::default()),
    args.service_settings(),
  ));

  let listener = tokio::net::TcpListener::bind(args.listen)
    .await
    .with_context(|| format!("无法监听 {}", args.listen))?;
  info!("服务已启动: http://{}", args.listen);

  axum::serve(listener, api::router(service))
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("服务异常退出")?;

  if let Some(sweeper) = sweeper {
    sweeper.abort();
  }
  info!("服务已退出");
  Ok(())
}
