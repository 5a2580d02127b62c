// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 目标追踪 (Tracking)
///
/// - KalmanBoxFilter: 边界框平滑与预测
/// - ByteTracker:     高低分两轮 IoU 关联
///
/// 轨迹状态跨请求保留, 连续上传的图片被视为连续帧
pub mod bytetrack;
pub mod config;
pub mod kalman;

pub use bytetrack::{ByteTracker, Track};
pub use config::TrackerConfig;
pub use kalman::KalmanBoxFilter;
