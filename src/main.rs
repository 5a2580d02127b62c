// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 目标计数 Web 服务
///
/// 启动流程:
/// 1. 读取 .env 与命令行参数
/// 2. 定位/下载模型, 创建常驻流水线
/// 3. 启动 HTTP 服务, Ctrl-C 优雅退出
use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use yolov8_counter::models::hub;
use yolov8_counter::server::{self, AppState};
use yolov8_counter::{Args, CountingPipeline, Model, YOLOv8};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    // .env 不存在时忽略
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    if let Ok(path) = dotenv {
        info!("Loaded environment from {}", path.display());
    }

    let config = Args::parse().into_config()?;

    for dir in [&config.upload_dir, &config.output_dir] {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    // 模型下载与 session 创建都是阻塞操作
    let mut model_config = config.model.clone();
    let model_url = config.model_url.clone();
    let model = tokio::task::spawn_blocking(move || -> Result<YOLOv8> {
        model_config.model = hub::resolve_model(&model_config.model, model_url.as_deref())?;
        info!("🔍 加载检测模型 {}", model_config.model.display());
        YOLOv8::new(model_config)
    })
    .await??;
    model.summary();

    let pipeline = CountingPipeline::from_config(Box::new(model), &config)?;

    let addr = format!("0.0.0.0:{}", config.port);
    let app = server::router(AppState::new(config, pipeline));
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("🚀 Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
