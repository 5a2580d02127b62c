// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 等比缩放 + 常量填充 (Letterbox)
// 输入任意尺寸图片, 输出固定 (W, H), 原图居中, 其余区域填黑

use image::{imageops, DynamicImage, Rgb, RgbImage};

/// 目标画布尺寸
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetSize {
    pub width: u32,
    pub height: u32,
}

impl TargetSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InvalidImageError {
    #[error("invalid image dimensions {width}x{height}")]
    ZeroSource { width: u32, height: u32 },

    #[error("invalid target box {width}x{height}")]
    ZeroTarget { width: u32, height: u32 },
}

/// 一次 letterbox 的几何参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LetterboxInfo {
    pub new_width: u32,
    pub new_height: u32,
    pub top: u32,
    pub bottom: u32,
    pub left: u32,
    pub right: u32,
}

impl LetterboxInfo {
    /// 计算缩放尺寸与四边填充
    ///
    /// - aspect > 1 (横图): 宽度贴满, 高度按比例
    /// - aspect <= 1 (竖图/正方形): 高度贴满, 宽度按比例
    ///
    /// 贴满的一边若导致另一边超出画布, 则改为贴满受限的那一边
    pub fn compute(width: u32, height: u32, target: TargetSize) -> Result<Self, InvalidImageError> {
        if width == 0 || height == 0 {
            return Err(InvalidImageError::ZeroSource { width, height });
        }
        if target.width == 0 || target.height == 0 {
            return Err(InvalidImageError::ZeroTarget {
                width: target.width,
                height: target.height,
            });
        }

        let aspect = width as f64 / height as f64;
        let tw = target.width as f64;
        let th = target.height as f64;

        let width_anchored = || (target.width, (tw / aspect).round() as u32);
        let height_anchored = || ((th * aspect).round() as u32, target.height);

        let (mut new_width, mut new_height) = if aspect > 1.0 {
            width_anchored()
        } else {
            height_anchored()
        };
        if new_height > target.height {
            (new_width, new_height) = height_anchored();
        } else if new_width > target.width {
            (new_width, new_height) = width_anchored();
        }

        // 极端长宽比下 round 可能得到 0
        let new_width = new_width.clamp(1, target.width);
        let new_height = new_height.clamp(1, target.height);

        let dw = target.width - new_width;
        let dh = target.height - new_height;

        Ok(Self {
            new_width,
            new_height,
            top: dh / 2,
            bottom: dh - dh / 2,
            left: dw / 2,
            right: dw - dw / 2,
        })
    }
}

/// Letterbox 归一化器
#[derive(Debug, Clone)]
pub struct Letterbox {
    target: TargetSize,
    fill: Rgb<u8>,
    filter: imageops::FilterType,
}

impl Letterbox {
    pub fn new(target: TargetSize) -> Self {
        Self {
            target,
            fill: Rgb([0, 0, 0]),
            filter: imageops::FilterType::Triangle,
        }
    }

    /// 缩放并填充到目标尺寸, 返回 RGB 画布和所用的几何参数
    pub fn apply(&self, image: &DynamicImage) -> Result<(RgbImage, LetterboxInfo), InvalidImageError> {
        let info = LetterboxInfo::compute(image.width(), image.height(), self.target)?;

        let resized = imageops::resize(&image.to_rgb8(), info.new_width, info.new_height, self.filter);
        let mut canvas = RgbImage::from_pixel(self.target.width, self.target.height, self.fill);
        imageops::replace(&mut canvas, &resized, info.left as i64, info.top as i64);

        Ok((canvas, info))
    }
}
