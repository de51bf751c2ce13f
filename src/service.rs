// 该文件是 Toukui （头盔） 项目的一部分。
// src/service.rs - 请求编排
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
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
  detector::{DetectionResult, Detector, Inference},
  report::ReportRenderer,
  session::{ArtifactKind, DeferredCleanup, SessionError, SessionId, SessionStore, discard},
  summary::{DetectionSummary, summarize},
  validate::{ValidateError, validate},
};

pub const ANNOTATED_URL_PREFIX: &str = "/detection/annotated/";
pub const REPORT_EXTENSION: &str = ".pdf";

#[derive(Debug, Clone)]
pub struct ServiceSettings {
  pub inference_timeout: Duration,
}

impl Default for ServiceSettings {
  fn default() -> Self {
    Self {
      inference_timeout: Duration::from_secs(30),
    }
  }
}

#[derive(Error, Debug)]
pub enum ServiceError {
  #[error(transparent)]
  Rejected(#[from] ValidateError),
  #[error("Detection failed: {0}")]
  DetectionFailure(String),
  #[error("Report generation failed: {0}")]
  ReportRenderFailure(String),
  #[error("Session not found.")]
  SessionNotFound,
  #[error("Required images missing.")]
  IncompleteSession,
  #[error("File not found.")]
  FileNotFound,
  #[error("Bad request: {0}")]
  BadRequest(String),
}

impl ServiceError {
  /// 错误分类名，用于响应体的 `error` 字段
  pub fn kind(&self) -> &'static str {
    match self {
      ServiceError::Rejected(ValidateError::UnsupportedType) => "UnsupportedType",
      ServiceError::Rejected(ValidateError::TooLarge) => "TooLarge",
      ServiceError::Rejected(ValidateError::CorruptImage(_)) => "CorruptImage",
      ServiceError::DetectionFailure(_) => "DetectionFailure",
      ServiceError::ReportRenderFailure(_) => "ReportRenderFailure",
      ServiceError::SessionNotFound => "SessionNotFound",
      ServiceError::IncompleteSession => "IncompleteSession",
      ServiceError::FileNotFound => "FileNotFound",
      ServiceError::BadRequest(_) => "BadRequest",
    }
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectResponse {
  pub session_id: String,
  pub annotated_image_url: String,
  pub summary: DetectionSummary,
  pub detections: Vec<DetectionResult>,
}

/// 生成好的报告。`cleanup` 被丢弃时会话随之删除，应与响应体同生命周期。
pub struct ReportArtifact {
  pub bytes: Vec<u8>,
  pub cleanup: DeferredCleanup,
}

pub struct DetectionService {
  store: Arc<dyn SessionStore>,
  detector: Arc<Detector>,
  reporter: Arc<dyn ReportRenderer>,
  settings: ServiceSettings,
}

impl DetectionService {
  pub fn new(
    store: Arc<dyn SessionStore>,
    detector: Arc<Detector>,
    reporter: Arc<dyn ReportRenderer>,
    settings: ServiceSettings,
  ) -> Self {
    Self {
      store,
      detector,
      reporter,
      settings,
    }
  }

  pub fn store(&self) -> &Arc<dyn SessionStore> {
    &self.store
  }

  /// 校验 -> 保存原图 -> 推理 -> 保存标注图 -> 汇总
  pub async fn detect(&self, filename: &str, bytes: &[u8]) -> Result<DetectResponse, ServiceError> {
    let extension = validate(bytes, filename)?;

    let id = self.store.create().map_err(|e| {
      error!("无法创建会话: {}", e);
      ServiceError::DetectionFailure(e.to_string())
    })?;
    let original = match self.store.put(&id, ArtifactKind::Original, &extension, bytes) {
      Ok(path) => path,
      Err(e) => {
        error!("会话 {} 原图保存失败: {}", id, e);
        discard(self.store.as_ref(), &id);
        return Err(ServiceError::DetectionFailure(e.to_string()));
      }
    };

    let Inference {
      detections,
      annotated,
    } = match self.infer(original).await {
      Ok(inference) => inference,
      Err(cause) => {
        error!("会话 {} 推理失败: {}", id, cause);
        discard(self.store.as_ref(), &id);
        return Err(ServiceError::DetectionFailure(cause));
      }
    };

    let persisted = annotated
      .ok_or_else(|| "annotated image missing".to_string())
      .and_then(|bytes| {
        self
          .store
          .put(&id, ArtifactKind::Annotated, &extension, &bytes)
          .map_err(|e| e.to_string())
      });
    if let Err(cause) = persisted {
      error!("会话 {} 标注图像保存失败: {}", id, cause);
      discard(self.store.as_ref(), &id);
      return Err(ServiceError::DetectionFailure(cause));
    }

    let summary = summarize(&detections);
    info!(
      "会话 {} 检测完成: {} 人, {} 未戴安全帽",
      id, summary.total_subjects, summary.missing
    );
    Ok(DetectResponse {
      session_id: id.to_string(),
      annotated_image_url: format!("{}{}{}", ANNOTATED_URL_PREFIX, id, extension),
      summary,
      detections,
    })
  }

  async fn infer(&self, path: PathBuf) -> Result<Inference, String> {
    let detector = self.detector.clone();
    let timeout = self.settings.inference_timeout;
    let now = Instant::now();
    let job = tokio::task::spawn_blocking(move || detector.infer_file(&path, true));

    let result = match tokio::time::timeout(timeout, job).await {
      Err(_) => Err(format!("inference timed out after {:?}", timeout)),
      Ok(Err(join)) => Err(join.to_string()),
      Ok(Ok(result)) => result.map_err(|e| e.to_string()),
    };
    info!("推理耗时: {:.2?}", now.elapsed());
    result
  }

  /// 按 `<session_id><ext>` 查找标注图像
  pub fn annotated(&self, file: &str) -> Result<PathBuf, ServiceError> {
    let (id, extension) = file
      .split_once('.')
      .ok_or(ServiceError::FileNotFound)?;
    let id = SessionId::parse(id).ok_or(ServiceError::FileNotFound)?;
    let path = self
      .store
      .get_path(&id, ArtifactKind::Annotated)
      .map_err(|_| ServiceError::FileNotFound)?;

    let stored = path.extension().and_then(|e| e.to_str());
    if stored != Some(extension) {
      return Err(ServiceError::FileNotFound);
    }
    Ok(path)
  }

  /// 渲染报告并写入会话。会话在返回的 `ReportArtifact` 被丢弃后删除。
  pub async fn generate_report(&self, session_id: &str) -> Result<ReportArtifact, ServiceError> {
    let id = SessionId::parse(session_id).ok_or(ServiceError::SessionNotFound)?;
    if !self.store.exists(&id) {
      return Err(ServiceError::SessionNotFound);
    }

    let locate = |kind| {
      self.store.get_path(&id, kind).map_err(|e| match e {
        SessionError::NotFound(_) => ServiceError::SessionNotFound,
        _ => ServiceError::IncompleteSession,
      })
    };
    let original = locate(ArtifactKind::Original)?;
    let annotated = locate(ArtifactKind::Annotated)?;

    let reporter = self.reporter.clone();
    let rendered = tokio::task::spawn_blocking(move || reporter.render(&original, &annotated))
      .await
      .map_err(|e| e.to_string())
      .and_then(|result| result.map_err(|e| e.to_string()))
      .and_then(|bytes| {
        self
          .store
          .put(&id, ArtifactKind::Report, REPORT_EXTENSION, &bytes)
          .map(|_| bytes)
          .map_err(|e| e.to_string())
      });

    match rendered {
      Ok(bytes) => {
        info!("会话 {} 报告生成完成", id);
        Ok(ReportArtifact {
          bytes,
          cleanup: DeferredCleanup::new(self.store.clone(), id),
        })
      }
      Err(cause) => {
        error!("会话 {} 报告生成失败: {}", id, cause);
        if let Err(e) = self.store.remove_artifact(&id, ArtifactKind::Report) {
          warn!("无法删除残缺报告 {}: {}", id, e);
        }
        Err(ServiceError::ReportRenderFailure(cause))
      }
    }
  }
}
