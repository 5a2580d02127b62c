// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! HTTP 路由
//!
//! - `GET /`                 上传页面
//! - `POST /`                multipart 字段 `file`, 处理后展示原图与结果图
//! - `GET /uploads/<name>`   原图
//! - `GET /output/<name>`    结果图

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::counting::ClassCount;
use crate::pipeline::{CountingPipeline, PipelineError};
use crate::gen_time_string;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pipeline: Arc<Mutex<CountingPipeline>>,
}

impl AppState {
    pub fn new(config: AppConfig, pipeline: CountingPipeline) -> Self {
        Self {
            config: Arc::new(config),
            pipeline: Arc::new(Mutex::new(pipeline)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Error loading image")]
    LoadImage,

    #[error("Failed to save image")]
    SaveImage(#[source] image::ImageError),

    #[error("Failed to store upload")]
    StoreUpload(#[source] std::io::Error),

    #[error("Inference failed")]
    Inference(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error(transparent)]
    Multipart(#[from] MultipartError),

    #[error("Worker task failed")]
    Join(#[from] tokio::task::JoinError),
}

impl From<PipelineError> for AppError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::InvalidImage(e) => {
                warn!("Rejecting image: {}", e);
                AppError::LoadImage
            }
            PipelineError::Inference(e) => AppError::Inference(e.into()),
        }
    }
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::LoadImage => StatusCode::BAD_REQUEST,
            AppError::Multipart(e) => e.status(),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            match std::error::Error::source(&self) {
                Some(source) => error!("{}: {}", self, source),
                None => error!("{}", self),
            }
        }
        (status, self.to_string()).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    let uploads = ServeDir::new(&state.config.upload_dir);
    let output = ServeDir::new(&state.config.output_dir);
    let body_limit = state.config.max_upload_bytes;

    Router::new()
        .route("/", get(index).post(upload))
        .nest_service("/uploads", uploads)
        .nest_service("/output", output)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(UPLOAD_HTML)
}

/// 单次处理的结果摘要, 用于渲染页面
struct Outcome {
    processed_filename: String,
    in_count: u32,
    out_count: u32,
    per_class: Vec<(String, ClassCount)>,
}

async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> Result<Response, AppError> {
    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().and_then(sanitize_filename);
        let data = field.bytes().await?;
        upload = filename.map(|name| (name, data));
        break;
    }
    let Some((filename, data)) = upload else {
        return Ok(Redirect::to("/").into_response());
    };

    let original_path = state.config.upload_dir.join(&filename);
    tokio::fs::write(&original_path, &data)
        .await
        .map_err(AppError::StoreUpload)?;
    info!("Saved upload {} ({} bytes)", original_path.display(), data.len());

    let pipeline = Arc::clone(&state.pipeline);
    let output_dir = state.config.output_dir.clone();
    let outcome = tokio::task::spawn_blocking(move || -> Result<Outcome, AppError> {
        let image = image::load_from_memory(&data).map_err(|e| {
            warn!("Failed to decode upload: {}", e);
            AppError::LoadImage
        })?;

        // 局部作用域: 写文件前释放锁
        let (processed, per_class) = {
            let mut pipeline = pipeline.lock().unwrap_or_else(PoisonError::into_inner);
            let processed = pipeline.process(&image)?;
            let names = pipeline.names();
            let per_class = processed
                .counts
                .per_class
                .iter()
                .map(|(id, c)| (names.get(*id).cloned().unwrap_or_else(|| id.to_string()), *c))
                .collect::<Vec<_>>();
            (processed, per_class)
        };

        let processed_filename = format!("processed_image_{}.jpg", gen_time_string("-"));
        let processed_path = output_dir.join(&processed_filename);
        processed.image.save(&processed_path).map_err(AppError::SaveImage)?;
        info!("Saved result {}", processed_path.display());

        Ok(Outcome {
            processed_filename,
            in_count: processed.counts.in_count,
            out_count: processed.counts.out_count,
            per_class,
        })
    })
    .await??;

    Ok(Html(render_display(&filename, &outcome)).into_response())
}

/// 只保留文件名部分, 防止路径穿越
fn sanitize_filename(raw: &str) -> Option<String> {
    let name = Path::new(raw).file_name()?.to_str()?;
    (!name.is_empty()).then(|| name.to_string())
}

/// URL 路径段中保留的字符
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'.').remove(b'-').remove(b'_').remove(b'~');

/// 文件名 → `src` 属性中的 URL 路径段
fn url_segment(name: &str) -> String {
    escape_html(&utf8_percent_encode(name, PATH_SEGMENT).to_string())
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn render_display(original: &str, outcome: &Outcome) -> String {
    let original = url_segment(original);
    let processed = url_segment(&outcome.processed_filename);
    let rows: String = outcome
        .per_class
        .iter()
        .map(|(name, c)| {
            format!(
                "      <li>{}: in {} / out {}</li>\n",
                escape_html(name),
                c.in_count,
                c.out_count
            )
        })
        .collect();

    format!(
        r#"<!doctype html>
<html>
  <head><meta charset="utf-8"><title>Counting result</title></head>
  <body>
    <h1>Counting result</h1>
    <p>In: {in_count} &nbsp; Out: {out_count}</p>
    <ul>
{rows}    </ul>
    <h2>Original</h2>
    <img src="/uploads/{original}" alt="original">
    <h2>Processed</h2>
    <img src="/output/{processed}" alt="processed">
    <p><a href="/">Upload another image</a></p>
  </body>
</html>
"#,
        in_count = outcome.in_count,
        out_count = outcome.out_count,
    )
}

const UPLOAD_HTML: &str = r#"<!doctype html>
<html>
  <head><meta charset="utf-8"><title>Object counting</title></head>
  <body>
    <h1>Upload an image</h1>
    <form method="post" action="/" enctype="multipart/form-data">
      <input type="file" name="file" accept="image/*">
      <input type="submit" value="Upload">
    </form>
  </body>
</html>
"#;
