// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 跟踪器配置 - 通过JSON文件调整参数

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

/// ByteTrack + 卡尔曼滤波参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    // === ByteTrack参数 ===
    pub max_lost_frames: u32,      // 最大丢失帧数
    pub high_score_threshold: f32, // 高分阈值
    pub low_score_threshold: f32,  // 低分阈值 (救援用)
    pub high_iou_threshold: f32,   // 高分匹配IOU阈值
    pub low_iou_threshold: f32,    // 低分匹配IOU阈值
    pub max_trajectory: usize,     // 轨迹点上限

    // === 卡尔曼滤波参数 ===
    pub kalman_process_noise: f32,        // 过程噪声 q
    pub kalman_obs_noise: f32,            // 观测噪声 r
    pub kalman_velocity_decay: f32,       // 速度衰减
    pub kalman_stationary_threshold: f32, // 静止判定阈值(像素)
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_lost_frames: 60,
            high_score_threshold: 0.4,
            low_score_threshold: 0.1,
            high_iou_threshold: 0.4,
            low_iou_threshold: 0.3,
            max_trajectory: 50,

            kalman_process_noise: 0.1,
            kalman_obs_noise: 0.5,
            kalman_velocity_decay: 0.95,
            kalman_stationary_threshold: 2.0,
        }
    }
}

impl TrackerConfig {
    /// 从JSON文件加载配置, 缺失字段取默认值
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("Failed to read tracker config {}", path.display()))?;
        let config: Self = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse tracker config {}", path.display()))?;
        info!("✅ 跟踪器配置已从 {} 加载", path.display());
        Ok(config)
    }
}
