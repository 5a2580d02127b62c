// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// ONNX Runtime 推理引擎封装

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use ndarray::{Array, IxDyn};
use ort::execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use regex::Regex;
use tracing::{debug, info, warn};

/// 执行后端 (Execution Provider)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrtEP {
    CPU,
    CUDA(i32),
    Trt(i32),
}

#[derive(Debug, Clone)]
pub struct OrtConfig {
    pub f: PathBuf,
    pub ep: OrtEP,
    pub trt_fp16: bool,
    /// (height, width)
    pub image_size: (u32, u32),
}

pub struct OrtBackend {
    session: Session,
    ep: OrtEP,
    height: u32,
    width: u32,
    names: Option<Vec<String>>,
    producer: Option<String>,
}

impl OrtBackend {
    pub fn build(args: OrtConfig) -> Result<Self> {
        let mut builder = Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

        builder = match args.ep {
            OrtEP::CPU => builder,
            OrtEP::CUDA(device_id) => builder.with_execution_providers([CUDAExecutionProvider::default()
                .with_device_id(device_id)
                .build()])?,
            OrtEP::Trt(device_id) => builder.with_execution_providers([
                TensorRTExecutionProvider::default()
                    .with_device_id(device_id)
                    .with_fp16(args.trt_fp16)
                    .build(),
                // TensorRT 不可用时回落到 CUDA
                CUDAExecutionProvider::default().with_device_id(device_id).build(),
            ])?,
        };

        let session = builder
            .commit_from_file(&args.f)
            .with_context(|| format!("Failed to load onnx model: {}", args.f.display()))?;

        let (names, producer) = match session.metadata() {
            Ok(metadata) => {
                let names = metadata
                    .custom("names")
                    .ok()
                    .flatten()
                    .map(|s| parse_names(&s))
                    .filter(|names| !names.is_empty());
                (names, metadata.producer().ok())
            }
            Err(e) => {
                warn!("⚠️  读取模型元数据失败: {}", e);
                (None, None)
            }
        };

        info!("✅ 模型加载成功: {}", args.f.display());

        Ok(Self {
            session,
            ep: args.ep,
            height: args.image_size.0,
            width: args.image_size.1,
            names,
            producer,
        })
    }

    /// 单输入前向, 返回全部 f32 输出
    pub fn run(&mut self, xs: Array<f32, IxDyn>, profile: bool) -> Result<Vec<Array<f32, IxDyn>>> {
        let t = Instant::now();
        let input = Tensor::from_array(xs)?;
        let outputs = self.session.run(ort::inputs![input])?;
        if profile {
            debug!("[ORT run]: {:?}", t.elapsed());
        }

        let mut ys = Vec::new();
        for value in outputs.values() {
            let (shape, data) = value.try_extract_tensor::<f32>()?;
            let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
            ys.push(Array::from_shape_vec(IxDyn(&dims), data.to_vec())?);
        }
        Ok(ys)
    }

    pub fn ep(&self) -> &OrtEP {
        &self.ep
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn names(&self) -> Option<Vec<String>> {
        self.names.clone()
    }

    pub fn producer(&self) -> Option<&str> {
        self.producer.as_deref()
    }
}

/// 解析 ultralytics 导出的 `names` 元数据: `{0: 'person', 1: 'bicycle', ...}`
pub fn parse_names(raw: &str) -> Vec<String> {
    let Ok(re) = Regex::new(r#"(\d+)\s*:\s*['"]([^'"]*)['"]"#) else {
        return Vec::new();
    };
    let mut pairs: Vec<(usize, String)> = re
        .captures_iter(raw)
        .filter_map(|c| Some((c[1].parse().ok()?, c[2].to_string())))
        .collect();
    pairs.sort_by_key(|(id, _)| *id);
    pairs.into_iter().map(|(_, name)| name).collect()
}
