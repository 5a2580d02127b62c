// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 计数结果绘制: 区域、检测框、轨迹、计数文字

use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::counting::{Counts, Region};
use crate::tracking::Track;
use crate::Point2;

const REGION_COLOR: Rgb<u8> = Rgb([255, 0, 255]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const PANEL_COLOR: Rgb<u8> = Rgb([32, 32, 32]);

/// 未指定 `--font` 时依次尝试的系统字体
pub const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// 候选列表中第一个存在的文件
pub fn find_font<'a>(candidates: impl IntoIterator<Item = &'a str>) -> Option<PathBuf> {
    candidates.into_iter().map(PathBuf::from).find(|p| p.is_file())
}

pub struct Annotator {
    font: Option<FontVec>,
    line_thickness: u32,
    font_scale: PxScale,
}

impl Annotator {
    /// 不加载字体时只绘制几何图形
    pub fn new(line_thickness: u32) -> Self {
        Self {
            font: None,
            line_thickness: line_thickness.max(1),
            font_scale: PxScale::from(16.0),
        }
    }

    pub fn with_font_file(mut self, path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("Failed to read font {}", path.display()))?;
        let font = FontVec::try_from_vec(bytes).with_context(|| format!("Invalid font {}", path.display()))?;
        self.font = Some(font);
        Ok(self)
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// 绘制完整一帧
    pub fn annotate(&self, img: &mut RgbImage, tracks: &[Track], region: &Region, counts: &Counts, names: &[String]) {
        self.draw_region(img, region);
        for track in tracks.iter().filter(|t| t.is_matched()) {
            self.draw_track(img, track, names);
        }
        self.draw_counts(img, counts, names);
    }

    fn draw_region(&self, img: &mut RgbImage, region: &Region) {
        let points = region.points();
        let closed = matches!(region, Region::Polygon(_));
        let n = points.len();
        let segments = if closed { n } else { n - 1 };
        for i in 0..segments {
            self.thick_line(img, points[i], points[(i + 1) % n], REGION_COLOR);
        }
    }

    fn draw_track(&self, img: &mut RgbImage, track: &Track, names: &[String]) {
        let color = Rgb([track.color.0, track.color.1, track.color.2]);
        let b = &track.bbox;

        for t in 0..self.line_thickness {
            let w = b.width() as i32 - 2 * t as i32;
            let h = b.height() as i32 - 2 * t as i32;
            if w <= 0 || h <= 0 {
                break;
            }
            let rect = Rect::at(b.xmin() as i32 + t as i32, b.ymin() as i32 + t as i32).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(img, rect, color);
        }

        // 轨迹
        for pair in track.trajectory.windows(2) {
            self.thick_line(img, pair[0], pair[1], color);
        }

        let name = names.get(track.class_id()).map(String::as_str).unwrap_or("unknown");
        let label = format!("#{} {} {:.2}", track.id, name, b.confidence());
        self.label(img, &label, b.xmin() as i32, b.ymin() as i32, color);
    }

    fn draw_counts(&self, img: &mut RgbImage, counts: &Counts, names: &[String]) {
        let mut lines = vec![format!("In: {}  Out: {}", counts.in_count, counts.out_count)];
        for (class_id, c) in &counts.per_class {
            let name = names.get(*class_id).map(String::as_str).unwrap_or("unknown");
            lines.push(format!("{}: {} / {}", name, c.in_count, c.out_count));
        }

        let mut y = 4;
        for line in &lines {
            y += self.text_line(img, line, 4, y, PANEL_COLOR) + 2;
        }
    }

    /// 框上方的标签, 贴不下时放在框内
    fn label(&self, img: &mut RgbImage, text: &str, x: i32, y: i32, background: Rgb<u8>) {
        let Some(font) = &self.font else {
            return;
        };
        let (_, h) = text_size(self.font_scale, font, text);
        let top = if y - h as i32 - 4 >= 0 { y - h as i32 - 4 } else { y };
        self.text_line(img, text, x, top, background);
    }

    /// 带底色的一行文字, 返回行高
    fn text_line(&self, img: &mut RgbImage, text: &str, x: i32, y: i32, background: Rgb<u8>) -> i32 {
        let Some(font) = &self.font else {
            return 0;
        };
        let (w, h) = text_size(self.font_scale, font, text);
        draw_filled_rect_mut(img, Rect::at(x, y).of_size(w + 4, h + 4), background);
        draw_text_mut(img, TEXT_COLOR, x + 2, y + 2, self.font_scale, font, text);
        h as i32 + 4
    }

    fn thick_line(&self, img: &mut RgbImage, a: Point2, b: Point2, color: Rgb<u8>) {
        let half = (self.line_thickness / 2) as f32;
        let steep = (b.y() - a.y()).abs() > (b.x() - a.x()).abs();
        for t in 0..self.line_thickness {
            let offset = t as f32 - half;
            let (dx, dy) = if steep { (offset, 0.) } else { (0., offset) };
            draw_line_segment_mut(img, (a.x() + dx, a.y() + dy), (b.x() + dx, b.y() + dy), color);
        }
    }
}
