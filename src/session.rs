// 该文件是 Toukui （头盔） 项目的一部分。
// src/session.rs - 会话存储
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

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

mod dir;
pub use self::dir::DirSessionStore;

/// 会话标识：随机 128 位令牌
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
  pub fn generate() -> Self {
    SessionId(Uuid::new_v4())
  }

  /// 只接受标准的带连字符小写形式，其他输入一律视为不存在
  pub fn parse(text: &str) -> Option<Self> {
    let id = Uuid::try_parse(text).ok()?;
    let canonical = SessionId(id);
    (canonical.to_string() == text).then_some(canonical)
  }
}

impl fmt::Display for SessionId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0.hyphenated())
  }
}

/// 会话中的产物种类，每种最多一个
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
  Original,
  Annotated,
  Report,
}

impl ArtifactKind {
  pub fn stem(&self) -> &'static str {
    match self {
      ArtifactKind::Original => "original",
      ArtifactKind::Annotated => "annotated",
      ArtifactKind::Report => "ppe_report",
    }
  }
}

#[derive(Error, Debug)]
pub enum SessionError {
  #[error("会话不存在: {0}")]
  NotFound(SessionId),
  #[error("产物不存在: {0} {1:?}")]
  ArtifactNotFound(SessionId, ArtifactKind),
  #[error("无效的扩展名: {0}")]
  InvalidExtension(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

pub trait SessionStore: Send + Sync {
  /// 创建一个新的空会话
  fn create(&self) -> Result<SessionId, SessionError>;

  /// 写入产物，`extension` 含点（如 `.png`）。会话不存在时失败，不会重新创建。
  fn put(
    &self,
    id: &SessionId,
    kind: ArtifactKind,
    extension: &str,
    bytes: &[u8],
  ) -> Result<PathBuf, SessionError>;

  fn get_path(&self, id: &SessionId, kind: ArtifactKind) -> Result<PathBuf, SessionError>;

  fn exists(&self, id: &SessionId) -> bool;

  fn remove_artifact(&self, id: &SessionId, kind: ArtifactKind) -> Result<(), SessionError>;

  /// 删除会话及其全部产物；会话不存在时视为成功
  fn delete(&self, id: &SessionId) -> Result<(), SessionError>;

  /// 删除最后修改时间早于 `max_age` 的会话，返回删除数量
  fn sweep(&self, max_age: Duration) -> Result<usize, SessionError>;
}

/// 尽力删除会话，失败只记录日志
pub fn discard(store: &dyn SessionStore, id: &SessionId) {
  match store.delete(id) {
    Ok(()) => debug!("会话已清理: {}", id),
    Err(e) => warn!("会话清理失败 {}: {}", id, e),
  }
}

/// 响应体释放后才执行的会话清理。
///
/// 持有者被丢弃时（响应体发送完毕或客户端断开）在阻塞线程池中删除会话。
pub struct DeferredCleanup {
  store: Arc<dyn SessionStore>,
  id: SessionId,
}

impl DeferredCleanup {
  pub fn new(store: Arc<dyn SessionStore>, id: SessionId) -> Self {
    Self { store, id }
  }

  pub fn session_id(&self) -> &SessionId {
    &self.id
  }
}

impl Drop for DeferredCleanup {
  fn drop(&mut self) {
    let store = self.store.clone();
    let id = self.id;
    match tokio::runtime::Handle::try_current() {
      Ok(handle) => {
        handle.spawn_blocking(move || discard(store.as_ref(), &id));
      }
      Err(_) => discard(store.as_ref(), &id),
    }
  }
}
