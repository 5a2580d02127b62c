// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 模型文件定位: 本地路径优先, 否则从 URL 下载到缓存目录

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::info;

/// 缓存目录: `~/.cache/yolov8-counter/models` (各平台对应位置)
pub fn cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("yolov8-counter")
        .join("models")
}

/// 返回可用的模型文件路径
///
/// 1. `model` 存在 → 直接使用
/// 2. 缓存目录中已有同名文件 → 使用缓存
/// 3. 提供了 `url` → 下载到缓存目录
pub fn resolve_model(model: &Path, url: Option<&str>) -> Result<PathBuf> {
    if model.exists() {
        return Ok(model.to_path_buf());
    }

    let Some(file_name) = model.file_name() else {
        bail!("Invalid model path: {}", model.display());
    };
    let cached = cache_dir().join(file_name);
    if cached.exists() {
        info!("📦 使用缓存模型: {}", cached.display());
        return Ok(cached);
    }

    match url {
        Some(url) => {
            download(url, &cached)?;
            Ok(cached)
        }
        None => bail!(
            "Model not found: {} (set --model-url to download it)",
            model.display()
        ),
    }
}

/// 下载到临时文件后重命名
fn download(url: &str, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create cache directory {}", dir.display()))?;
    }

    info!("⬇️  下载模型 {} → {}", url, path.display());
    let response = ureq::get(url)
        .call()
        .with_context(|| format!("Failed to download {}", url))?;

    let bytes = save_atomically(&mut response.into_reader(), path)?;

    info!("✅ 下载完成: {} bytes", bytes);
    Ok(())
}

/// 先写临时文件再重命名, 失败时删除临时文件
fn save_atomically(reader: &mut impl io::Read, path: &Path) -> Result<u64> {
    let temp_path = path.with_extension("tmp");
    let result = write_then_rename(reader, &temp_path, path);
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn write_then_rename(reader: &mut impl io::Read, temp_path: &Path, path: &Path) -> Result<u64> {
    let mut file = fs::File::create(temp_path)
        .with_context(|| format!("Failed to create {}", temp_path.display()))?;
    let bytes = io::copy(reader, &mut file).context("Download interrupted")?;
    drop(file);
    fs::rename(temp_path, path).with_context(|| format!("Failed to move model to {}", path.display()))?;
    Ok(bytes)
}
