// 该文件是 Toukui （头盔） 项目的一部分。
// src/session/dir.rs - 基于目录的会话存储
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

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use crate::session::{ArtifactKind, SessionError, SessionId, SessionStore};

const TRASH_PREFIX: &str = ".trash-";
const TEMP_PREFIX: &str = ".tmp-";

/// `<root>/<session_id>/<artifact>` 布局的会话存储
pub struct DirSessionStore {
  root: PathBuf,
}

impl DirSessionStore {
  pub fn open(root: impl Into<PathBuf>) -> Result<Self, SessionError> {
    let root = root.into();
    fs::create_dir_all(&root)?;
    info!("会话目录: {}", root.display());
    Ok(Self { root })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn session_dir(&self, id: &SessionId) -> PathBuf {
    self.root.join(id.to_string())
  }

  fn find_artifact(dir: &Path, kind: ArtifactKind) -> std::io::Result<Option<PathBuf>> {
    for entry in fs::read_dir(dir)? {
      let entry = entry?;
      let name = entry.file_name();
      let Some(name) = name.to_str() else {
        continue;
      };
      if name.starts_with('.') {
        continue;
      }
      if Path::new(name).file_stem().and_then(|s| s.to_str()) == Some(kind.stem()) {
        return Ok(Some(entry.path()));
      }
    }
    Ok(None)
  }

  fn check_extension(extension: &str) -> Result<(), SessionError> {
    let valid = extension
      .strip_prefix('.')
      .map(|rest| !rest.is_empty() && rest.len() <= 8 && rest.chars().all(|c| c.is_ascii_alphanumeric()))
      .unwrap_or(false);
    if valid {
      Ok(())
    } else {
      Err(SessionError::InvalidExtension(extension.to_string()))
    }
  }
}

impl SessionStore for DirSessionStore {
  fn create(&self) -> Result<SessionId, SessionError> {
    loop {
      let id = SessionId::generate();
      match fs::create_dir(self.session_dir(&id)) {
        Ok(()) => {
          debug!("创建会话: {}", id);
          return Ok(id);
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
        Err(e) => return Err(e.into()),
      }
    }
  }

  fn put(
    &self,
    id: &SessionId,
    kind: ArtifactKind,
    extension: &str,
    bytes: &[u8],
  ) -> Result<PathBuf, SessionError> {
    Self::check_extension(extension)?;
    let dir = self.session_dir(id);
    if !dir.is_dir() {
      return Err(SessionError::NotFound(*id));
    }

    let target = dir.join(format!("{}{}", kind.stem(), extension));
    let temp = dir.join(format!("{}{}{}", TEMP_PREFIX, kind.stem(), extension));
    if let Err(e) = fs::write(&temp, bytes) {
      if let Err(cleanup) = fs::remove_file(&temp) {
        if cleanup.kind() != ErrorKind::NotFound {
          warn!("无法删除临时文件 {}: {}", temp.display(), cleanup);
        }
      }
      return Err(match e.kind() {
        ErrorKind::NotFound => SessionError::NotFound(*id),
        _ => e.into(),
      });
    }

    if let Some(existing) = Self::find_artifact(&dir, kind)? {
      if existing != target {
        fs::remove_file(&existing)?;
      }
    }
    fs::rename(&temp, &target).map_err(|e| match e.kind() {
      ErrorKind::NotFound => SessionError::NotFound(*id),
      _ => e.into(),
    })?;

    debug!("写入产物 {}: {} ({} 字节)", id, target.display(), bytes.len());
    Ok(target)
  }

  fn get_path(&self, id: &SessionId, kind: ArtifactKind) -> Result<PathBuf, SessionError> {
    let dir = self.session_dir(id);
    if !dir.is_dir() {
      return Err(SessionError::NotFound(*id));
    }
    Self::find_artifact(&dir, kind)?.ok_or(SessionError::ArtifactNotFound(*id, kind))
  }

  fn exists(&self, id: &SessionId) -> bool {
    self.session_dir(id).is_dir()
  }

  fn remove_artifact(&self, id: &SessionId, kind: ArtifactKind) -> Result<(), SessionError> {
    let dir = self.session_dir(id);
    if !dir.is_dir() {
      return Ok(());
    }
    if let Some(path) = Self::find_artifact(&dir, kind)? {
      fs::remove_file(&path)?;
      debug!("删除产物 {}: {}", id, path.display());
    }
    Ok(())
  }

  fn delete(&self, id: &SessionId) -> Result<(), SessionError> {
    let dir = self.session_dir(id);
    let trash = self.root.join(format!("{}{}", TRASH_PREFIX, id));

    // 先整体改名，读者要么看到完整会话，要么看不到
    match fs::rename(&dir, &trash) {
      Ok(()) => {}
      Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
      Err(e) => return Err(e.into()),
    }
    fs::remove_dir_all(&trash)?;
    Ok(())
  }

  fn sweep(&self, max_age: Duration) -> Result<usize, SessionError> {
    let now = SystemTime::now();
    let mut removed = 0;

    for entry in fs::read_dir(&self.root)? {
      let entry = entry?;
      let name = entry.file_name();
      let Some(name) = name.to_str() else {
        continue;
      };

      if name.starts_with(TRASH_PREFIX) {
        if let Err(e) = fs::remove_dir_all(entry.path()) {
          warn!("无法删除残留目录 {}: {}", name, e);
        }
        continue;
      }

      let Some(id) = SessionId::parse(name) else {
        continue;
      };
      let modified = match entry.metadata().and_then(|m| m.modified()) {
        Ok(modified) => modified,
        Err(e) => {
          warn!("无法读取会话时间 {}: {}", id, e);
          continue;
        }
      };
      let age = now.duration_since(modified).unwrap_or_default();
      if age > max_age {
        match self.delete(&id) {
          Ok(()) => removed += 1,
          Err(e) => warn!("清理过期会话失败 {}: {}", id, e),
        }
      }
    }

    if removed > 0 {
      info!("清理过期会话 {} 个", removed);
    }
    Ok(removed)
  }
}
