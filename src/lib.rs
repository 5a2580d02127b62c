// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
#![allow(clippy::type_complexity)]
pub mod annotate; // 计数结果绘制
pub mod config; // 服务配置参数
pub mod counting; // 区域计数
pub mod letterbox; // 等比缩放 + 填充
pub mod models; // 模型接口与具体实现
pub mod ort_backend; // ONNX Runtime 推理引擎
pub mod pipeline; // 检测 → 追踪 → 计数 流水线
pub mod server; // HTTP 路由
pub mod tracking; // 目标追踪

pub use crate::config::{AppConfig, Args};
pub use crate::letterbox::{InvalidImageError, Letterbox, LetterboxInfo, TargetSize};
pub use crate::models::{Model, YOLOv8};
pub use crate::ort_backend::{OrtBackend, OrtConfig, OrtEP};
pub use crate::pipeline::{CountingPipeline, PipelineError, Processed};

/// 贪心 NMS: 按置信度降序, 丢弃与已保留框 IoU 超过阈值的框
pub fn non_max_suppression(xs: &mut Vec<Bbox>, iou_threshold: f32) {
    xs.sort_by(|b1, b2| b2.confidence().total_cmp(&b1.confidence()));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            let iou = xs[prev_index].iou(&xs[index]);
            if iou > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}

/// 本地时间戳, 例如 `gen_time_string("-")` → `20240131-235959`
pub fn gen_time_string(delimiter: &str) -> String {
    let t_now = chrono::Local::now();
    let fmt = format!("%Y%m%d{}%H%M%S", delimiter);
    t_now.format(&fmt).to_string()
}

#[derive(Clone, PartialEq, Default, Debug)]
pub struct DetectionResult {
    // 单张图片的检测结果
    pub bboxes: Option<Vec<Bbox>>,
}

impl DetectionResult {
    pub fn new(bboxes: Option<Vec<Bbox>>) -> Self {
        Self { bboxes }
    }

    pub fn into_bboxes(self) -> Vec<Bbox> {
        self.bboxes.unwrap_or_default()
    }
}

#[derive(Debug, PartialEq, Clone, Copy, Default)]
pub struct Point2 {
    x: f32,
    y: f32,
}

impl Point2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn x(&self) -> f32 {
        self.x
    }

    pub fn y(&self) -> f32 {
        self.y
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Bbox {
    // a bounding box around an object
    xmin: f32,
    ymin: f32,
    width: f32,
    height: f32,
    id: usize,
    confidence: f32,
}

impl Bbox {
    pub fn new(xmin: f32, ymin: f32, width: f32, height: f32, id: usize, confidence: f32) -> Self {
        Self {
            xmin,
            ymin,
            width,
            height,
            id,
            confidence,
        }
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    pub fn xmin(&self) -> f32 {
        self.xmin
    }

    pub fn ymin(&self) -> f32 {
        self.ymin
    }

    pub fn xmax(&self) -> f32 {
        self.xmin + self.width
    }

    pub fn ymax(&self) -> f32 {
        self.ymin + self.height
    }

    pub fn cxcy(&self) -> Point2 {
        Point2::new(self.xmin + self.width / 2., self.ymin + self.height / 2.)
    }

    /// 类别ID
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn intersection_area(&self, another: &Bbox) -> f32 {
        let l = self.xmin.max(another.xmin);
        let r = self.xmax().min(another.xmax());
        let t = self.ymin.max(another.ymin);
        let b = self.ymax().min(another.ymax());
        (r - l).max(0.) * (b - t).max(0.)
    }

    pub fn union(&self, another: &Bbox) -> f32 {
        self.area() + another.area() - self.intersection_area(another)
    }

    pub fn iou(&self, another: &Bbox) -> f32 {
        let union = self.union(another);
        if union <= 0. {
            return 0.;
        }
        self.intersection_area(another) / union
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou_identical_and_disjoint() {
        let a = Bbox::new(10., 10., 20., 20., 0, 0.9);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);

        let b = Bbox::new(100., 100., 5., 5., 0, 0.9);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_nms_keeps_highest_confidence() {
        let mut xs = vec![
            Bbox::new(0., 0., 10., 10., 0, 0.6),
            Bbox::new(1., 1., 10., 10., 0, 0.9),
            Bbox::new(50., 50., 10., 10., 0, 0.3),
        ];
        non_max_suppression(&mut xs, 0.45);
        assert_eq!(xs.len(), 2);
        assert_eq!(xs[0].confidence(), 0.9);
        assert_eq!(xs[1].confidence(), 0.3);
    }

    #[test]
    fn test_time_string_layout() {
        let s = gen_time_string("-");
        assert_eq!(s.len(), 15);
        assert_eq!(&s[8..9], "-");
        assert!(s.chars().filter(|c| *c != '-').all(|c| c.is_ascii_digit()));
    }
}
