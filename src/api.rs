// 该文件是 Toukui （头盔） 项目的一部分。
// src/api.rs - HTTP 接口
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

use std::convert::Infallible;
use std::path::Path as FsPath;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
  Json, Router,
  body::{Body, Bytes},
  extract::{DefaultBodyLimit, Multipart, Path, State, multipart::MultipartError},
  http::{StatusCode, header},
  response::{IntoResponse, Response},
  routing::{get, post},
};
use futures_util::Stream;
use serde_json::{Value, json};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, warn};

use crate::{
  service::{DetectResponse, DetectionService, ReportArtifact, ServiceError},
  session::DeferredCleanup,
  validate::{MAX_UPLOAD_BYTES, ValidateError, check_extension},
};

/// 比上传上限多留 1 MiB 给 multipart 封装，超限文件交给校验器报告
pub const BODY_LIMIT: usize = MAX_UPLOAD_BYTES + 1024 * 1024;
pub const REPORT_FILENAME: &str = "ppe_safety_report.pdf";
const REPORT_CHUNK: usize = 64 * 1024;

pub fn router(service: Arc<DetectionService>) -> Router {
  Router::new()
    .route("/", get(root))
    .route("/detection/detect", post(detect))
    .route("/detection/annotated/:file", get(annotated))
    .route("/detection/generate-report/:session_id", post(generate_report))
    .layer(DefaultBodyLimit::max(BODY_LIMIT))
    .layer(CorsLayer::permissive())
    .layer(TraceLayer::new_for_http())
    .with_state(service)
}

impl IntoResponse for ServiceError {
  fn into_response(self) -> Response {
    let status = match &self {
      ServiceError::Rejected(_) | ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ServiceError::SessionNotFound | ServiceError::FileNotFound => StatusCode::NOT_FOUND,
      _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = json!({
      "error": self.kind(),
      "detail": self.to_string(),
    });
    (status, Json(body)).into_response()
  }
}

async fn root() -> Json<Value> {
  Json(json!({ "message": "Hello, World!" }))
}

async fn detect(
  State(service): State<Arc<DetectionService>>,
  mut multipart: Multipart,
) -> Result<Json<DetectResponse>, ServiceError> {
  let read_error = |e: MultipartError| {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
      ServiceError::Rejected(ValidateError::TooLarge)
    } else {
      ServiceError::BadRequest(e.body_text())
    }
  };

  let mut upload = None;
  while let Some(mut field) = multipart.next_field().await.map_err(read_error)? {
    if field.name() != Some("file") && field.file_name().is_none() {
      continue;
    }
    let filename = field.file_name().unwrap_or_default().to_string();
    check_extension(&filename)?;

    // 边读边计数，超过上限立即拒绝
    let mut data = Vec::new();
    while let Some(chunk) = field.chunk().await.map_err(read_error)? {
      if data.len() + chunk.len() > MAX_UPLOAD_BYTES {
        return Err(ValidateError::TooLarge.into());
      }
      data.extend_from_slice(&chunk);
    }
    upload = Some((filename, data));
    break;
  }

  let (filename, data) =
    upload.ok_or_else(|| ServiceError::BadRequest("missing file part".to_string()))?;
  debug!("收到上传 {} ({} 字节)", filename, data.len());
  Ok(Json(service.detect(&filename, &data).await?))
}

fn content_type_of(path: &FsPath) -> &'static str {
  match path.extension().and_then(|e| e.to_str()) {
    Some("png") => "image/png",
    Some("jpg") | Some("jpeg") => "image/jpeg",
    Some("webp") => "image/webp",
    _ => "application/octet-stream",
  }
}

async fn annotated(
  State(service): State<Arc<DetectionService>>,
  Path(file): Path<String>,
) -> Result<Response, ServiceError> {
  let path = service.annotated(&file)?;
  let bytes = tokio::fs::read(&path).await.map_err(|e| {
    warn!("读取标注图像失败 {}: {}", path.display(), e);
    ServiceError::FileNotFound
  })?;
  Ok(([(header::CONTENT_TYPE, content_type_of(&path))], bytes).into_response())
}

/// 报告响应体。持有会话清理句柄，响应体被释放时会话才被删除。
struct ReportBody {
  remaining: Bytes,
  _cleanup: DeferredCleanup,
}

impl ReportBody {
  fn new(artifact: ReportArtifact) -> Self {
    Self {
      remaining: Bytes::from(artifact.bytes),
      _cleanup: artifact.cleanup,
    }
  }
}

impl Stream for ReportBody {
  type Item = Result<Bytes, Infallible>;

  fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    if self.remaining.is_empty() {
      return Poll::Ready(None);
    }
    let at = self.remaining.len().min(REPORT_CHUNK);
    Poll::Ready(Some(Ok(self.remaining.split_to(at))))
  }
}

async fn generate_report(
  State(service): State<Arc<DetectionService>>,
  Path(session_id): Path<String>,
) -> Result<Response, ServiceError> {
  let artifact = service.generate_report(&session_id).await?;
  let disposition = format!("attachment; filename=\"{}\"", REPORT_FILENAME);
  let body = Body::from_stream(ReportBody::new(artifact));
  Ok(
    (
      [
        (header::CONTENT_TYPE, "application/pdf".to_string()),
        (header::CONTENT_DISPOSITION, disposition),
      ],
      body,
    )
      .into_response(),
  )
}
