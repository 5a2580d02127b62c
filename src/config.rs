// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 服务配置参数: 命令行参数, 未给出时回落到环境变量 (.env 文件已在 main 中加载)

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Result};
use clap::Parser;

use crate::counting::Region;
use crate::letterbox::TargetSize;
use crate::models::YOLOv8Config;
use crate::tracking::TrackerConfig;
use crate::OrtEP;

/// 默认计数区域: 画面下方 75%~84% 高度的横带
pub const DEFAULT_REGION: &str = "0.03,0.75;0.97,0.75;0.97,0.84;0.03,0.84";

/// 归一化坐标点列表, 格式 `x,y;x,y;...`
#[derive(Debug, Clone, PartialEq)]
pub struct RegionPoints(pub Vec<(f32, f32)>);

impl FromStr for RegionPoints {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut points = Vec::new();
        for pair in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((x, y)) = pair.split_once(',') else {
                return Err(format!("expected `x,y`, got `{}`", pair));
            };
            let x: f32 = x.trim().parse().map_err(|e| format!("bad x in `{}`: {}", pair, e))?;
            let y: f32 = y.trim().parse().map_err(|e| format!("bad y in `{}`: {}", pair, e))?;
            points.push((x, y));
        }
        Ok(Self(points))
    }
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "YOLOv8 目标计数 Web 服务", long_about = None)]
pub struct Args {
    /// 监听端口
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// 上传图片目录
    #[arg(long, env = "UPLOAD_FOLDER", default_value = "uploads")]
    pub upload_folder: PathBuf,

    /// 结果图片目录
    #[arg(long, env = "OUTPUT_FOLDER", default_value = "output")]
    pub output_folder: PathBuf,

    /// 输出宽度
    #[arg(long, env = "TARGET_WIDTH", default_value_t = 640)]
    pub target_width: u32,

    /// 输出高度
    #[arg(long, env = "TARGET_HEIGHT", default_value_t = 480)]
    pub target_height: u32,

    /// ONNX 模型路径
    #[arg(long, env = "MODEL", default_value = "yolov8n.onnx")]
    pub model: PathBuf,

    /// 本地没有模型时的下载地址
    #[arg(long, env = "MODEL_URL")]
    pub model_url: Option<String>,

    /// 模型输入尺寸
    #[arg(long, default_value_t = 640)]
    pub model_size: u32,

    /// 置信度阈值
    #[arg(long, default_value_t = 0.25)]
    pub conf: f32,

    /// NMS IOU阈值
    #[arg(long, default_value_t = 0.45)]
    pub iou: f32,

    /// 参与计数的类别ID (逗号分隔)
    #[arg(long, env = "CLASSES", value_delimiter = ',', default_value = "0")]
    pub classes: Vec<usize>,

    /// 所有类别都参与计数
    #[arg(long)]
    pub all_classes: bool,

    /// 计数区域, 归一化坐标 `x,y;x,y;...` (两点为线, 三点以上为多边形)
    #[arg(long, env = "REGION", default_value = DEFAULT_REGION)]
    pub region: RegionPoints,

    /// 线宽
    #[arg(long, default_value_t = 2)]
    pub line_thickness: u32,

    /// 标签字体 (TTF/OTF), 不指定则不绘制文字
    #[arg(long, env = "FONT")]
    pub font: Option<PathBuf>,

    /// 跟踪器参数 JSON 文件
    #[arg(long, env = "TRACKER_CONFIG")]
    pub tracker_config: Option<PathBuf>,

    /// using CUDA EP
    #[arg(long)]
    pub cuda: bool,

    /// using TensorRT EP
    #[arg(long)]
    pub trt: bool,

    /// using TensorRT EP FP16
    #[arg(long)]
    pub fp16: bool,

    /// device id
    #[arg(long, default_value_t = 0)]
    pub device_id: i32,

    /// 打印各阶段耗时
    #[arg(long)]
    pub profile: bool,

    /// 上传大小上限 (MB)
    #[arg(long, default_value_t = 16)]
    pub max_upload_mb: usize,
}

/// 校验后的运行配置, 显式传入路由状态
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    pub target: TargetSize,
    pub region: Vec<(f32, f32)>,
    pub line_thickness: u32,
    pub font: Option<PathBuf>,
    pub tracker: TrackerConfig,
    pub model: YOLOv8Config,
    pub model_url: Option<String>,
    pub max_upload_bytes: usize,
}

impl Args {
    pub fn into_config(self) -> Result<AppConfig> {
        let target = TargetSize::new(self.target_width, self.target_height);
        if target.width == 0 || target.height == 0 {
            bail!("Target size must be non-zero, got {}x{}", target.width, target.height);
        }
        if !(0.0..=1.0).contains(&self.conf) || !(0.0..=1.0).contains(&self.iou) {
            bail!("conf/iou must be within [0, 1], got {} / {}", self.conf, self.iou);
        }
        if self.model_size == 0 {
            bail!("Model size must be non-zero");
        }
        Region::from_normalized(&self.region.0, target)?;

        let tracker = match &self.tracker_config {
            Some(path) => TrackerConfig::load(path)?,
            None => TrackerConfig::default(),
        };

        let ep = if self.trt {
            OrtEP::Trt(self.device_id)
        } else if self.cuda {
            OrtEP::CUDA(self.device_id)
        } else {
            OrtEP::CPU
        };

        Ok(AppConfig {
            port: self.port,
            upload_dir: self.upload_folder,
            output_dir: self.output_folder,
            target,
            region: self.region.0,
            line_thickness: self.line_thickness,
            font: self.font,
            tracker,
            model: YOLOv8Config {
                model: self.model,
                ep,
                fp16: self.fp16,
                size: self.model_size,
                conf: self.conf,
                iou: self.iou,
                classes: if self.all_classes { Vec::new() } else { self.classes },
                profile: self.profile,
            },
            model_url: self.model_url,
            max_upload_bytes: self.max_upload_mb * 1024 * 1024,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["yolov8-counter"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_region_points_parse() {
        let points: RegionPoints = "0.1,0.2; 0.3 ,0.4;".parse().unwrap();
        assert_eq!(points.0, vec![(0.1, 0.2), (0.3, 0.4)]);
        assert!("0.1;0.2".parse::<RegionPoints>().is_err());
        assert!("a,b".parse::<RegionPoints>().is_err());
    }

    #[test]
    fn test_flags_override() {
        let config = parse(&[
            "--port",
            "9000",
            "--target-width",
            "320",
            "--target-height",
            "240",
            "--classes",
            "0,2",
            "--region",
            "0,0.5;1,0.5",
            "--cuda",
        ])
        .into_config()
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.target, TargetSize::new(320, 240));
        assert_eq!(config.model.classes, vec![0, 2]);
        assert_eq!(config.region.len(), 2);
        assert_eq!(config.model.ep, OrtEP::CUDA(0));
    }

    #[test]
    fn test_all_classes_clears_filter() {
        let config = parse(&["--all-classes"]).into_config().unwrap();
        assert!(config.model.classes.is_empty());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(parse(&["--target-width", "0"]).into_config().is_err());
        assert!(parse(&["--conf", "1.5"]).into_config().is_err());
        assert!(parse(&["--region", "0.5,0.5"]).into_config().is_err());
        assert!(parse(&["--region", "0,0;2,2"]).into_config().is_err());
    }
}
