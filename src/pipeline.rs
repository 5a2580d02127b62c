// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 计数流水线 (Counting Pipeline)
///
/// 职责: 原图 → 等比缩放填充 → 检测 → 追踪 → 区域计数 → 绘制
///
/// 流水线常驻, 追踪器与计数器状态跨请求保留
use std::time::Instant;

use anyhow::Result;
use image::{DynamicImage, RgbImage};
use tracing::{debug, info, warn};

use crate::annotate::{self, Annotator};
use crate::config::AppConfig;
use crate::counting::{Counts, ObjectCounter, Region};
use crate::letterbox::{InvalidImageError, Letterbox};
use crate::models::Model;
use crate::tracking::ByteTracker;
use crate::{Bbox, DetectionResult};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    InvalidImage(#[from] InvalidImageError),

    #[error(transparent)]
    Inference(#[from] anyhow::Error),
}

/// 单帧处理结果
#[derive(Debug, Clone)]
pub struct Processed {
    /// 绘制后的输出图, 尺寸等于目标尺寸
    pub image: RgbImage,
    pub counts: Counts,
    pub detections: usize,
    pub tracks: usize,
}

pub struct CountingPipeline {
    letterbox: Letterbox,
    model: Box<dyn Model>,
    tracker: ByteTracker,
    counter: ObjectCounter,
    annotator: Annotator,
}

impl CountingPipeline {
    pub fn new(model: Box<dyn Model>, letterbox: Letterbox, tracker: ByteTracker, region: Region, annotator: Annotator) -> Self {
        Self {
            letterbox,
            model,
            tracker,
            counter: ObjectCounter::new(region),
            annotator,
        }
    }

    /// 按运行配置组装: 区域按目标尺寸缩放
    ///
    /// 指定的字体必须可用; 未指定时尝试系统字体, 都没有则只绘制图形
    pub fn from_config(model: Box<dyn Model>, config: &AppConfig) -> Result<Self> {
        let region = Region::from_normalized(&config.region, config.target)?;
        let mut annotator = Annotator::new(config.line_thickness);
        match &config.font {
            Some(font) => annotator = annotator.with_font_file(font)?,
            None => {
                if let Some(font) = annotate::find_font(annotate::SYSTEM_FONTS.iter().copied()) {
                    match Annotator::new(config.line_thickness).with_font_file(&font) {
                        Ok(a) => {
                            info!("Using system font {}", font.display());
                            annotator = a;
                        }
                        Err(e) => warn!("Skipping system font: {:#}", e),
                    }
                }
            }
        }
        if !annotator.has_font() {
            warn!("No usable font (set --font), labels and counts are not drawn on the output image");
        }
        Ok(Self::new(
            model,
            Letterbox::new(config.target),
            ByteTracker::new(config.tracker.clone()),
            region,
            annotator,
        ))
    }

    pub fn process(&mut self, image: &DynamicImage) -> Result<Processed, PipelineError> {
        let t0 = Instant::now();
        let (canvas, info) = self.letterbox.apply(image)?;
        debug!(
            "letterbox {}x{} → {}x{} pad t{} b{} l{} r{}",
            image.width(),
            image.height(),
            info.new_width,
            info.new_height,
            info.top,
            info.bottom,
            info.left,
            info.right
        );

        // 检测在输出画布上进行, 坐标即输出图坐标
        let frame = DynamicImage::ImageRgb8(canvas);
        let t1 = Instant::now();
        let detections: Vec<Bbox> = self
            .model
            .forward(std::slice::from_ref(&frame))?
            .into_iter()
            .next()
            .map(DetectionResult::into_bboxes)
            .unwrap_or_default();
        let t_infer = t1.elapsed();

        let tracks = self.tracker.update(&detections);
        let counts = self.counter.update(tracks).clone();

        let mut canvas = frame.into_rgb8();
        self.annotator
            .annotate(&mut canvas, tracks, self.counter.region(), &counts, self.model.names());

        let n_tracks = tracks.iter().filter(|t| t.is_matched()).count();
        info!(
            "Processed frame: {} detections, {} tracks, in {} / out {} (infer {:?}, total {:?})",
            detections.len(),
            n_tracks,
            counts.in_count,
            counts.out_count,
            t_infer,
            t0.elapsed()
        );

        Ok(Processed {
            image: canvas,
            counts,
            detections: detections.len(),
            tracks: n_tracks,
        })
    }

    pub fn names(&self) -> &[String] {
        self.model.names()
    }
}
