// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
use std::io::Cursor;
use std::path::Path;

use anyhow::Result;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use clap::Parser;
use http_body_util::BodyExt;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use ndarray::{Array, IxDyn};
use tempfile::TempDir;
use tower::ServiceExt;

use yolov8_counter::server::{self, AppState};
use yolov8_counter::{Args, Bbox, CountingPipeline, DetectionResult, Model};

const BOUNDARY: &str = "XCOUNTERBOUNDARY";

/// 固定返回一个框的桩模型
struct StubModel {
    names: Vec<String>,
    fail: bool,
}

impl Model for StubModel {
    fn preprocess(&mut self, _images: &[DynamicImage]) -> Result<Vec<Array<f32, IxDyn>>> {
        if self.fail {
            anyhow::bail!("engine unavailable");
        }
        Ok(vec![])
    }

    fn run(&mut self, xs: Vec<Array<f32, IxDyn>>, _profile: bool) -> Result<Vec<Array<f32, IxDyn>>> {
        Ok(xs)
    }

    fn postprocess(&self, _xs: Vec<Array<f32, IxDyn>>, _xs0: &[DynamicImage]) -> Result<Vec<DetectionResult>> {
        Ok(vec![DetectionResult::new(Some(vec![Bbox::new(100., 100., 50., 80., 0, 0.9)]))])
    }

    fn names(&self) -> &[String] {
        &self.names
    }

    fn summary(&self) {}
}

fn app(dir: &TempDir, fail: bool) -> Router {
    let uploads = dir.path().join("uploads");
    let output = dir.path().join("output");
    std::fs::create_dir_all(&uploads).unwrap();
    std::fs::create_dir_all(&output).unwrap();
    build_app(&uploads, &output, fail)
}

fn build_app(uploads: &Path, output: &Path, fail: bool) -> Router {
    let config = Args::try_parse_from([
        "yolov8-counter",
        "--upload-folder",
        uploads.to_str().unwrap(),
        "--output-folder",
        output.to_str().unwrap(),
        "--target-width",
        "640",
        "--target-height",
        "480",
    ])
    .unwrap()
    .into_config()
    .unwrap();

    let model = StubModel {
        names: vec!["person".to_string()],
        fail,
    };
    let pipeline = CountingPipeline::from_config(Box::new(model), &config).unwrap();
    server::router(AppState::new(config, pipeline))
}

fn multipart_request(field: &str, filename: &str, data: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/")
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(body))
        .unwrap()
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([90, 120, 200])));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn processed_files(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect()
}

#[tokio::test]
async fn test_index_serves_upload_form() {
    let dir = TempDir::new().unwrap();
    let response = app(&dir, false)
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("enctype=\"multipart/form-data\""));
    assert!(body.contains("name=\"file\""));
}

#[tokio::test]
async fn test_missing_file_redirects_home() {
    let dir = TempDir::new().unwrap();
    let response = app(&dir, false)
        .oneshot(multipart_request("other", "a.png", b"ignored"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers()[header::LOCATION], "/");
}

#[tokio::test]
async fn test_empty_filename_redirects_home() {
    let dir = TempDir::new().unwrap();
    let response = app(&dir, false)
        .oneshot(multipart_request("file", "", b"ignored"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
}

#[tokio::test]
async fn test_undecodable_upload_is_rejected() {
    let dir = TempDir::new().unwrap();
    let response = app(&dir, false)
        .oneshot(multipart_request("file", "broken.jpg", b"definitely not an image"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_string(response).await, "Error loading image");

    // 原图先落盘
    assert!(dir.path().join("uploads/broken.jpg").exists());
    assert!(processed_files(&dir.path().join("output")).is_empty());
}

#[tokio::test]
async fn test_upload_is_processed_and_served() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir, false);

    let response = app
        .clone()
        .oneshot(multipart_request("file", "street.png", &png_bytes(1920, 1080)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("/uploads/street.png"));
    assert!(body.contains("/output/processed_image_"));

    let outputs = processed_files(&dir.path().join("output"));
    assert_eq!(outputs.len(), 1);
    assert!(outputs[0].starts_with("processed_image_") && outputs[0].ends_with(".jpg"));

    let processed = image::open(dir.path().join("output").join(&outputs[0])).unwrap();
    assert_eq!((processed.width(), processed.height()), (640, 480));

    let response = app
        .clone()
        .oneshot(Request::get("/uploads/street.png").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(Request::get(format!("/output/{}", outputs[0])).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_upload_path_components_are_stripped() {
    let dir = TempDir::new().unwrap();
    let response = app(&dir, false)
        .oneshot(multipart_request("file", "../../escape.png", &png_bytes(32, 32)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(dir.path().join("uploads/escape.png").exists());
    assert!(!dir.path().join("escape.png").exists());
}

#[tokio::test]
async fn test_inference_failure_is_server_error() {
    let dir = TempDir::new().unwrap();
    let response = app(&dir, true)
        .oneshot(multipart_request("file", "ok.png", &png_bytes(64, 48)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_unwritable_output_is_server_error() {
    let dir = TempDir::new().unwrap();
    let uploads = dir.path().join("uploads");
    std::fs::create_dir_all(&uploads).unwrap();
    // 结果目录不存在
    let app = build_app(&uploads, &dir.path().join("missing/output"), false);

    let response = app
        .oneshot(multipart_request("file", "ok.png", &png_bytes(64, 48)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_string(response).await, "Failed to save image");
}

#[tokio::test]
async fn test_upload_name_is_percent_encoded_in_page() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir, false);

    let response = app
        .clone()
        .oneshot(multipart_request("file", "a#b c.png", &png_bytes(32, 32)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("/uploads/a%23b%20c.png"));

    let response = app
        .oneshot(Request::get("/uploads/a%23b%20c.png").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_missing_static_file_is_not_found() {
    let dir = TempDir::new().unwrap();
    let response = app(&dir, false)
        .oneshot(Request::get("/output/nope.jpg").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
