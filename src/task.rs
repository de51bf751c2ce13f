// 该文件是 Toukui （头盔） 项目的一部分。
// src/task.rs - 后台任务
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
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::session::SessionStore;

/// 定期清理没有走完报告流程的会话
#[derive(Debug, Clone)]
pub struct SweepTask {
  interval: Duration,
  max_age: Duration,
}

impl Default for SweepTask {
  fn default() -> Self {
    Self {
      interval: Duration::from_secs(300),
      max_age: Duration::from_secs(3600),
    }
  }
}

impl SweepTask {
  pub fn with_interval(mut self, interval: Duration) -> Self {
    self.interval = interval.max(Duration::from_millis(1));
    self
  }

  pub fn with_max_age(mut self, max_age: Duration) -> Self {
    self.max_age = max_age;
    self
  }

  /// 循环执行，直到所在任务被取消
  pub async fn run(self, store: Arc<dyn SessionStore>) {
    info!(
      "启动会话清理任务: 间隔 {:?}, 过期时间 {:?}",
      self.interval, self.max_age
    );
    let mut ticker = tokio::time::interval(self.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
      ticker.tick().await;
      let store = store.clone();
      let max_age = self.max_age;
      match tokio::task::spawn_blocking(move || store.sweep(max_age)).await {
        Ok(Ok(removed)) => debug!("本轮清理 {} 个会话", removed),
        Ok(Err(e)) => warn!("会话清理失败: {}", e),
        Err(e) => warn!("会话清理任务异常: {}", e),
      }
    }
  }
}
