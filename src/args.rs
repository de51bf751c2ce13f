// 该文件是 Toukui （头盔） 项目的一部分。
// src/args.rs - 服务参数配置
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

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use url::Url;

use toukui::service::ServiceSettings;

/// Toukui 安全帽检测服务
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 监听地址
  #[arg(long, env = "TOUKUI_LISTEN", default_value = "0.0.0.0:8000")]
  pub listen: SocketAddr,

  /// 模型地址，例如 onnx:///models/best.onnx?size=640
  #[arg(long, env = "TOUKUI_MODEL", default_value = "onnx:///models/best.onnx")]
  pub model: Url,

  /// 会话目录，默认为系统临时目录下的 ppe_sessions
  #[arg(long, env = "TOUKUI_SESSION_ROOT", value_name = "DIR")]
  pub session_root: Option<PathBuf>,

  /// 标注文字使用的 TTF/OTF 字体，不指定时使用内置 DejaVu Sans
  #[arg(long, env = "TOUKUI_FONT", value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// 单次推理超时（秒）
  #[arg(long, env = "TOUKUI_INFERENCE_TIMEOUT", default_value = "30")]
  pub inference_timeout_secs: u64,

  /// 未完成会话的保留时间（秒），0 表示不清理
  #[arg(long, env = "TOUKUI_SWEEP_MAX_AGE", default_value = "3600")]
  pub sweep_max_age_secs: u64,
}

impl Args {
  pub fn session_root(&self) -> PathBuf {
    self
      .session_root
      .clone()
      .unwrap_or_else(|| std::env::temp_dir().join("ppe_sessions"))
  }

  pub fn service_settings(&self) -> ServiceSettings {
    ServiceSettings {
      inference_timeout: Duration::from_secs(self.inference_timeout_secs.max(1)),
    }
  }

  pub fn sweep_max_age(&self) -> Option<Duration> {
    (self.sweep_max_age_secs > 0).then(|| Duration::from_secs(self.sweep_max_age_secs))
  }
}
