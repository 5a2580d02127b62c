// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// YOLOv8 检测模型实现
// 包含: 模型加载、预处理、推理、后处理

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Result};
use image::{DynamicImage, GenericImageView};
use ndarray::{s, Array, Axis, IxDyn};
use tracing::{debug, info};

use crate::{non_max_suppression, Bbox, DetectionResult, OrtBackend, OrtConfig, OrtEP};

const CXYWH_OFFSET: usize = 4;

/// COCO 80 类, 模型元数据缺少 `names` 时使用
pub const COCO_NAMES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

/// YOLOv8 加载参数
#[derive(Debug, Clone)]
pub struct YOLOv8Config {
    pub model: PathBuf,
    pub ep: OrtEP,
    pub fp16: bool,
    /// 模型输入尺寸 (正方形)
    pub size: u32,
    pub conf: f32,
    pub iou: f32,
    /// 只保留这些类别, 为空表示全部
    pub classes: Vec<usize>,
    pub profile: bool,
}

/// YOLOv8 检测模型
pub struct YOLOv8 {
    engine: OrtBackend,
    postprocessor: YOLOv8Postprocessor,
    height: u32,
    width: u32,
    names: Vec<String>,
    profile: bool,
}

impl YOLOv8 {
    /// 从配置创建 YOLOv8 模型
    pub fn new(config: YOLOv8Config) -> Result<Self> {
        let engine = OrtBackend::build(OrtConfig {
            f: config.model,
            ep: config.ep,
            trt_fp16: config.fp16,
            image_size: (config.size, config.size),
        })?;

        let names = engine
            .names()
            .unwrap_or_else(|| COCO_NAMES.iter().map(|s| s.to_string()).collect());

        let postprocessor = YOLOv8Postprocessor::new(PostprocessConfig {
            width: engine.width(),
            height: engine.height(),
            conf: config.conf,
            iou: config.iou,
            classes: config.classes,
        });

        Ok(Self {
            height: engine.height(),
            width: engine.width(),
            engine,
            postprocessor,
            names,
            profile: config.profile,
        })
    }

    fn scale_wh(&self, w0: f32, h0: f32, w1: f32, h1: f32) -> (f32, f32, f32) {
        let r = (w1 / w0).min(h1 / h0);
        (r, (w0 * r).round(), (h0 * r).round())
    }

    /// 等比缩放后贴在左上角, 其余填充 144/255
    pub fn preprocess_batch(&self, xs: &[DynamicImage]) -> Result<Array<f32, IxDyn>> {
        let mut ys = Array::ones((xs.len(), 3, self.height as usize, self.width as usize)).into_dyn();
        ys.fill(144.0 / 255.0);
        for (idx, x) in xs.iter().enumerate() {
            let (w0, h0) = x.dimensions();
            let (_, w_new, h_new) =
                self.scale_wh(w0 as f32, h0 as f32, self.width as f32, self.height as f32);
            let img = x.resize_exact(
                (w_new as u32).max(1),
                (h_new as u32).max(1),
                image::imageops::FilterType::Triangle,
            );

            for (x, y, rgb) in img.pixels() {
                let x = x as usize;
                let y = y as usize;
                let [r, g, b, _] = rgb.0;
                ys[[idx, 0, y, x]] = (r as f32) / 255.0;
                ys[[idx, 1, y, x]] = (g as f32) / 255.0;
                ys[[idx, 2, y, x]] = (b as f32) / 255.0;
            }
        }

        Ok(ys)
    }

}

impl super::Model for YOLOv8 {
    fn preprocess(&mut self, images: &[DynamicImage]) -> Result<Vec<Array<f32, IxDyn>>> {
        Ok(vec![self.preprocess_batch(images)?])
    }

    fn run(&mut self, xs: Vec<Array<f32, IxDyn>>, profile: bool) -> Result<Vec<Array<f32, IxDyn>>> {
        let Some(x) = xs.into_iter().next() else {
            bail!("No input tensor");
        };
        self.engine.run(x, profile)
    }

    fn postprocess(&self, xs: Vec<Array<f32, IxDyn>>, xs0: &[DynamicImage]) -> Result<Vec<DetectionResult>> {
        self.postprocessor.postprocess(xs, xs0)
    }

    fn forward(&mut self, images: &[DynamicImage]) -> Result<Vec<DetectionResult>> {
        let t_pre = Instant::now();
        let xs = super::Model::preprocess(self, images)?;
        if self.profile {
            debug!("[Model Preprocess]: {:?}", t_pre.elapsed());
        }

        let t_run = Instant::now();
        let ys = super::Model::run(self, xs, self.profile)?;
        if self.profile {
            debug!("[Model Inference]: {:?}", t_run.elapsed());
        }

        let t_post = Instant::now();
        let ys = self.postprocessor.postprocess(ys, images)?;
        if self.profile {
            debug!("[Model Postprocess]: {:?}", t_post.elapsed());
        }

        Ok(ys)
    }

    fn names(&self) -> &[String] {
        &self.names
    }

    fn summary(&self) {
        info!(
            "Summary: EP: {:?}{} | Producer: {} | Input: {}x{} | nc: {} | conf: {} | iou: {} | classes: {:?}",
            self.engine.ep(),
            if let OrtEP::CPU = self.engine.ep() {
                ""
            } else {
                " (May still fall back to CPU)"
            },
            self.engine.producer().unwrap_or("unknown"),
            self.width,
            self.height,
            self.names.len(),
            self.postprocessor.config.conf,
            self.postprocessor.config.iou,
            self.postprocessor.config.classes,
        );
    }
}

/// 后处理参数
#[derive(Debug, Clone)]
pub struct PostprocessConfig {
    /// 模型输入宽高
    pub width: u32,
    pub height: u32,
    pub conf: f32,
    pub iou: f32,
    pub classes: Vec<usize>,
}

/// YOLOv8 后处理器, 不依赖推理引擎
pub struct YOLOv8Postprocessor {
    config: PostprocessConfig,
}

impl YOLOv8Postprocessor {
    pub fn new(config: PostprocessConfig) -> Self {
        Self { config }
    }

    /// 解码 `[batch, 4 + nc, anchors]` 输出
    pub fn postprocess(&self, xs: Vec<Array<f32, IxDyn>>, xs0: &[DynamicImage]) -> Result<Vec<DetectionResult>> {
        let Some(preds) = xs.first() else {
            bail!("Model produced no outputs");
        };
        if preds.ndim() != 3 || preds.shape()[1] <= CXYWH_OFFSET {
            bail!("Unexpected YOLOv8 output shape: {:?}", preds.shape());
        }

        let mut ys = Vec::new();
        for (idx, anchor) in preds.axis_iter(Axis(0)).enumerate() {
            let Some(x0) = xs0.get(idx) else {
                break;
            };
            let width_original = x0.width() as f32;
            let height_original = x0.height() as f32;
            let ratio = (self.config.width as f32 / width_original)
                .min(self.config.height as f32 / height_original);

            let mut data: Vec<Bbox> = Vec::new();
            for pred in anchor.axis_iter(Axis(1)) {
                let bbox = pred.slice(s![0..CXYWH_OFFSET]);
                let clss = pred.slice(s![CXYWH_OFFSET..]);

                let (id, confidence) = clss
                    .iter()
                    .copied()
                    .enumerate()
                    .fold((0, f32::MIN), |max, x| if x.1 > max.1 { x } else { max });

                if confidence < self.config.conf {
                    continue;
                }
                if !self.config.classes.is_empty() && !self.config.classes.contains(&id) {
                    continue;
                }

                let cx = bbox[0] / ratio;
                let cy = bbox[1] / ratio;
                let w = bbox[2] / ratio;
                let h = bbox[3] / ratio;
                let x = (cx - w / 2.).max(0.0f32).min(width_original);
                let y = (cy - h / 2.).max(0.0f32).min(height_original);
                let w = w.min(width_original - x);
                let h = h.min(height_original - y);
                data.push(Bbox::new(x, y, w, h, id, confidence));
            }

            non_max_suppression(&mut data, self.config.iou);

            ys.push(DetectionResult::new(if data.is_empty() { None } else { Some(data) }));
        }

        Ok(ys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn postprocessor(classes: Vec<usize>) -> YOLOv8Postprocessor {
        YOLOv8Postprocessor::new(PostprocessConfig {
            width: 640,
            height: 640,
            conf: 0.25,
            iou: 0.45,
            classes,
        })
    }

    /// 构造 [1, 4 + nc, anchors] 输出, 每个 anchor: (cx, cy, w, h, scores...)
    fn output(anchors: &[[f32; 6]]) -> Array<f32, IxDyn> {
        let mut xs = Array::zeros((1, 6, anchors.len())).into_dyn();
        for (i, a) in anchors.iter().enumerate() {
            for (c, v) in a.iter().enumerate() {
                xs[[0, c, i]] = *v;
            }
        }
        xs
    }

    #[test]
    fn test_postprocess_scales_back_to_input() {
        // 输入 320x240, 模型 640x640 → ratio = 2
        let img = DynamicImage::ImageRgb8(RgbImage::new(320, 240));
        let ys = output(&[[200., 100., 40., 80., 0.9, 0.1]]);
        let results = postprocessor(vec![]).postprocess(vec![ys], &[img]).unwrap();

        let bboxes = results[0].bboxes.as_ref().unwrap();
        assert_eq!(bboxes.len(), 1);
        let b = &bboxes[0];
        assert_eq!(b.id(), 0);
        assert!((b.xmin() - 90.).abs() < 1e-4);
        assert!((b.ymin() - 30.).abs() < 1e-4);
        assert!((b.width() - 20.).abs() < 1e-4);
        assert!((b.height() - 40.).abs() < 1e-4);
    }

    #[test]
    fn test_postprocess_filters_conf_class_and_overlap() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(640, 640));
        let ys = output(&[
            [100., 100., 50., 50., 0.9, 0.0],
            [102., 101., 50., 50., 0.8, 0.0], // 与第一个重叠, 被 NMS 去掉
            [400., 400., 50., 50., 0.1, 0.0], // 置信度过低
            [300., 300., 50., 50., 0.0, 0.7], // 类别 1, 被过滤
        ]);
        let results = postprocessor(vec![0]).postprocess(vec![ys], &[img]).unwrap();
        let bboxes = results[0].bboxes.as_ref().unwrap();
        assert_eq!(bboxes.len(), 1);
        assert!((bboxes[0].confidence() - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_postprocess_empty_and_bad_shape() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(64, 64));
        let ys = output(&[[10., 10., 5., 5., 0.01, 0.01]]);
        let results = postprocessor(vec![])
            .postprocess(vec![ys], std::slice::from_ref(&img))
            .unwrap();
        assert!(results[0].bboxes.is_none());

        let bad = Array::zeros((1, 4)).into_dyn();
        assert!(postprocessor(vec![]).postprocess(vec![bad], &[img]).is_err());
        assert!(postprocessor(vec![]).postprocess(vec![], &[]).is_err());
    }
}
