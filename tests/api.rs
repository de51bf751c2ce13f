// 该文件是 Toukui （头盔） 项目的一部分。
// tests/api.rs - HTTP 接口测试
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
use std::sync::Arc;
use std::time::Duration;

use axum::{
  Router,
  body::{Body, to_bytes},
  http::{Request, StatusCode, header},
  response::Response,
};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::Value;
use tower::ServiceExt;

use toukui::{
  api::router,
  detector::Detector,
  model::{DetectItem, DetectResult, Model, ModelError},
  output::Draw,
  report::PdfReport,
  service::{DetectionService, ServiceSettings},
  session::DirSessionStore,
};

const BOUNDARY: &str = "toukui-test-boundary";

struct FakeModel(Result<Vec<DetectItem>, String>);

impl Model for FakeModel {
  type Input = RgbImage;
  type Output = DetectResult;
  type Error = ModelError;

  fn infer(&self, _input: &RgbImage) -> Result<DetectResult, ModelError> {
    match &self.0 {
      Ok(items) => Ok(DetectResult::from(items.clone())),
      Err(cause) => Err(ModelError::Inference(cause.clone())),
    }
  }
}

struct TestApp {
  root: tempfile::TempDir,
  router: Router,
}

impl TestApp {
  fn new(model: FakeModel) -> Self {
    let root = tempfile::tempdir().unwrap();
    let store = Arc::new(DirSessionStore::open(root.path()).unwrap());
    let detector = Arc::new(Detector::new(Arc::new(model), Draw::default()));
    let service = DetectionService::new(
      store,
      detector,
      Arc::new(PdfReport::default()),
      ServiceSettings::default(),
    );
    Self {
      root,
      router: router(Arc::new(service)),
    }
  }

  fn sessions(&self) -> usize {
    std::fs::read_dir(self.root.path()).unwrap().count()
  }

  fn session_exists(&self, id: &str) -> bool {
    self.root.path().join(id).is_dir()
  }

  async fn send(&self, request: Request<Body>) -> Response {
    self.router.clone().oneshot(request).await.unwrap()
  }

  async fn upload(&self, filename: &str, bytes: &[u8]) -> Response {
    self.send(multipart_request(filename, bytes)).await
  }
}

fn encode(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
  let image = RgbImage::from_fn(width, height, |x, y| Rgb([(x * 7) as u8, (y * 5) as u8, 128]));
  let mut buf = Cursor::new(Vec::new());
  DynamicImage::ImageRgb8(image)
    .write_to(&mut buf, format)
    .unwrap();
  buf.into_inner()
}

fn multipart_request(filename: &str, bytes: &[u8]) -> Request<Body> {
  let mut body = Vec::new();
  body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
  body.extend_from_slice(
    format!(
      "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
      filename
    )
    .as_bytes(),
  );
  body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
  body.extend_from_slice(bytes);
  body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

  Request::builder()
    .method("POST")
    .uri("/detection/detect")
    .header(
      header::CONTENT_TYPE,
      format!("multipart/form-data; boundary={}", BOUNDARY),
    )
    .body(Body::from(body))
    .unwrap()
}

fn get(uri: &str) -> Request<Body> {
  Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str) -> Request<Body> {
  Request::builder()
    .method("POST")
    .uri(uri)
    .body(Body::empty())
    .unwrap()
}

async fn body_bytes(response: Response) -> Vec<u8> {
  to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
}

async fn json_body(response: Response) -> Value {
  serde_json::from_slice(&body_bytes(response).await).unwrap()
}

#[tokio::test]
async fn root_says_hello() {
  let app = TestApp::new(FakeModel(Ok(vec![])));
  let response = app.send(get("/")).await;
  assert_eq!(response.status(), StatusCode::OK);
  assert_eq!(json_body(response).await["message"], "Hello, World!");
}

#[tokio::test]
async fn jpeg_without_subjects_has_empty_summary() {
  let app = TestApp::new(FakeModel(Ok(vec![])));
  let jpeg = encode(32, 32, ImageFormat::Jpeg);
  assert!(jpeg.len() < 10 * 1024);

  let response = app.upload("yard.jpg", &jpeg).await;
  assert_eq!(response.status(), StatusCode::OK);
  let json = json_body(response).await;

  assert_eq!(json["detections"], Value::Array(vec![]));
  let summary = &json["summary"];
  assert_eq!(summary["total_subjects"], 0);
  assert_eq!(summary["wearing"], 0);
  assert_eq!(summary["missing"], 0);
  assert_eq!(summary["total_infractions"], 0);
  assert_eq!(summary["average_confidence"].as_f64(), Some(0.0));

  let id = json["session_id"].as_str().unwrap();
  assert_eq!(
    json["annotated_image_url"],
    format!("/detection/annotated/{}.jpg", id)
  );
}

#[tokio::test]
async fn png_with_one_helmet() {
  let app = TestApp::new(FakeModel(Ok(vec![DetectItem {
    class_id: 0,
    score: 0.8,
    bbox: [10.0, 10.0, 50.0, 60.0],
  }])));
  let response = app.upload("crew.png", &encode(96, 96, ImageFormat::Png)).await;
  assert_eq!(response.status(), StatusCode::OK);
  let json = json_body(response).await;

  let summary = &json["summary"];
  assert_eq!(summary["total_subjects"], 1);
  assert_eq!(summary["wearing"], 1);
  assert_eq!(summary["missing"], 0);
  assert_eq!(summary["total_infractions"], 0);
  assert_eq!(summary["average_confidence"].as_f64(), Some(80.0));

  let detection = &json["detections"][0];
  assert_eq!(detection["class_name"], "helmet");
  assert_eq!(detection["bbox"], serde_json::json!([10, 10, 50, 60]));

  let url = json["annotated_image_url"].as_str().unwrap();
  let response = app.send(get(url)).await;
  assert_eq!(response.status(), StatusCode::OK);
  assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
  let annotated = body_bytes(response).await;
  assert_eq!(image::guess_format(&annotated).unwrap(), ImageFormat::Png);
}

#[tokio::test]
async fn report_for_unknown_session_is_not_found() {
  let app = TestApp::new(FakeModel(Ok(vec![])));
  app.upload("a.png", &encode(16, 16, ImageFormat::Png)).await;
  assert_eq!(app.sessions(), 1);

  let response = app
    .send(post(
      "/detection/generate-report/6f1c1f7e-2a7b-4c1e-9d0a-3b5e8f2a1c4d",
    ))
    .await;
  assert_eq!(response.status(), StatusCode::NOT_FOUND);
  let json = json_body(response).await;
  assert_eq!(json["error"], "SessionNotFound");
  assert_eq!(json["detail"], "Session not found.");
  assert_eq!(app.sessions(), 1);
}

#[tokio::test]
async fn detector_failure_cleans_up() {
  let app = TestApp::new(FakeModel(Err("out of memory".to_string())));
  let response = app.upload("a.png", &encode(16, 16, ImageFormat::Png)).await;
  assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
  let json = json_body(response).await;
  assert_eq!(json["error"], "DetectionFailure");
  assert!(json["detail"].as_str().unwrap().starts_with("Detection failed: "));
  assert_eq!(app.sessions(), 0);

  let response = app
    .send(get(
      "/detection/annotated/6f1c1f7e-2a7b-4c1e-9d0a-3b5e8f2a1c4d.png",
    ))
    .await;
  assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn rejects_bad_uploads() {
  let app = TestApp::new(FakeModel(Ok(vec![])));

  let response = app.upload("notes.txt", b"plain text").await;
  assert_eq!(response.status(), StatusCode::BAD_REQUEST);
  assert_eq!(json_body(response).await["error"], "UnsupportedType");

  let response = app.upload("broken.png", b"definitely not a png").await;
  assert_eq!(response.status(), StatusCode::BAD_REQUEST);
  assert_eq!(json_body(response).await["error"], "CorruptImage");

  let oversized = vec![0u8; 10 * 1024 * 1024 + 1];
  let response = app.upload("huge.png", &oversized).await;
  assert_eq!(response.status(), StatusCode::BAD_REQUEST);
  let json = json_body(response).await;
  assert_eq!(json["error"], "TooLarge");
  assert_eq!(json["detail"], "File size exceeds 10MB limit.");

  assert_eq!(app.sessions(), 0);
}

#[tokio::test]
async fn upload_beyond_body_limit_is_too_large() {
  let app = TestApp::new(FakeModel(Ok(vec![])));

  let oversized = vec![0u8; 12 * 1024 * 1024];
  let response = app.upload("huge.png", &oversized).await;
  assert_eq!(response.status(), StatusCode::BAD_REQUEST);
  let json = json_body(response).await;
  assert_eq!(json["error"], "TooLarge");
  assert_eq!(json["detail"], "File size exceeds 10MB limit.");

  let response = app.upload(".png", &encode(8, 8, ImageFormat::Png)).await;
  assert_eq!(response.status(), StatusCode::BAD_REQUEST);
  assert_eq!(json_body(response).await["error"], "UnsupportedType");

  assert_eq!(app.sessions(), 0);
}

#[tokio::test]
async fn report_download_removes_session() {
  let app = TestApp::new(FakeModel(Ok(vec![DetectItem {
    class_id: 1,
    score: 0.7,
    bbox: [4.0, 4.0, 40.0, 40.0],
  }])));
  let response = app.upload("site.webp", &encode(64, 64, ImageFormat::WebP)).await;
  assert_eq!(response.status(), StatusCode::OK);
  let json = json_body(response).await;
  let id = json["session_id"].as_str().unwrap().to_string();
  assert!(app.session_exists(&id));

  let response = app
    .send(post(&format!("/detection/generate-report/{}", id)))
    .await;
  assert_eq!(response.status(), StatusCode::OK);
  assert_eq!(response.headers()[header::CONTENT_TYPE], "application/pdf");
  assert_eq!(
    response.headers()[header::CONTENT_DISPOSITION],
    "attachment; filename=\"ppe_safety_report.pdf\""
  );
  let pdf = body_bytes(response).await;
  assert!(pdf.starts_with(b"%PDF-"));
  assert_eq!(lopdf::Document::load_mem(&pdf).unwrap().get_pages().len(), 2);

  for _ in 0..100 {
    if !app.session_exists(&id) {
      break;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  assert!(!app.session_exists(&id));

  let response = app
    .send(post(&format!("/detection/generate-report/{}", id)))
    .await;
  assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_session_ids_are_not_found() {
  let app = TestApp::new(FakeModel(Ok(vec![])));
  let response = app.send(post("/detection/generate-report/not-a-session")).await;
  assert_eq!(response.status(), StatusCode::NOT_FOUND);
  let response = app.send(get("/detection/annotated/nothing")).await;
  assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
