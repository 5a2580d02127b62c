// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 区域计数 (Region Counting)
//!
//! 两点为计数线, 三点以上为计数多边形; 每个轨迹ID最多计数一次

use std::collections::{BTreeMap, HashSet};

use crate::letterbox::TargetSize;
use crate::tracking::Track;
use crate::Point2;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegionError {
    #[error("region needs at least 2 points, got {0}")]
    TooFewPoints(usize),

    #[error("region point ({0}, {1}) is outside the normalized range [0, 1]")]
    OutOfRange(f32, f32),
}

/// 计数区域 (输出图片像素坐标)
#[derive(Debug, Clone, PartialEq)]
pub enum Region {
    Line(Point2, Point2),
    Polygon(Vec<Point2>),
}

impl Region {
    /// 由归一化坐标构造, 按实际输出尺寸缩放
    pub fn from_normalized(points: &[(f32, f32)], size: TargetSize) -> Result<Self, RegionError> {
        if points.len() < 2 {
            return Err(RegionError::TooFewPoints(points.len()));
        }
        if let Some(&(x, y)) = points
            .iter()
            .find(|(x, y)| !(0.0..=1.0).contains(x) || !(0.0..=1.0).contains(y))
        {
            return Err(RegionError::OutOfRange(x, y));
        }

        let mut scaled: Vec<Point2> = points
            .iter()
            .map(|&(x, y)| Point2::new(x * size.width as f32, y * size.height as f32))
            .collect();
        // 闭合多边形的末点与首点重复时去掉
        if scaled.len() > 3 && scaled.first() == scaled.last() {
            scaled.pop();
        }

        Ok(match scaled.as_slice() {
            [a, b] => Region::Line(*a, *b),
            _ => Region::Polygon(scaled),
        })
    }

    pub fn points(&self) -> Vec<Point2> {
        match self {
            Region::Line(a, b) => vec![*a, *b],
            Region::Polygon(points) => points.clone(),
        }
    }

    /// 外接矩形窄而高时, 以水平移动方向区分进出
    fn is_vertical(&self) -> bool {
        let points = self.points();
        let (min_x, max_x, min_y, max_y) = points.iter().fold(
            (f32::MAX, f32::MIN, f32::MAX, f32::MIN),
            |(x0, x1, y0, y1), p| (x0.min(p.x()), x1.max(p.x()), y0.min(p.y()), y1.max(p.y())),
        );
        max_x - min_x < max_y - min_y
    }

    /// 顶点均值
    pub fn centroid(&self) -> Point2 {
        let points = self.points();
        let n = points.len() as f32;
        let (sx, sy) = points.iter().fold((0., 0.), |(sx, sy), p| (sx + p.x(), sy + p.y()));
        Point2::new(sx / n, sy / n)
    }

    /// 本帧移动 prev → cur 的方向, `Some(true)` 为进, 无法判定时为 `None`
    ///
    /// - 多边形: 沿判定轴的位移与指向区域中心的方向同号为进
    /// - 计数线: 终点所在一侧; 竖线右侧为进, 其余下侧为进
    fn direction(&self, prev: Point2, cur: Point2) -> Option<bool> {
        let vertical = self.is_vertical();
        match self {
            Region::Polygon(_) => {
                let c = self.centroid();
                let (motion, toward) = if vertical {
                    (cur.x() - prev.x(), c.x() - prev.x())
                } else {
                    (cur.y() - prev.y(), c.y() - prev.y())
                };
                if motion == 0. {
                    return None;
                }
                Some(motion * toward > 0.)
            }
            Region::Line(a, b) => {
                let reference = if vertical {
                    Point2::new(a.x() + 1., a.y())
                } else {
                    Point2::new(a.x(), a.y() + 1.)
                };
                let in_side = cross(*a, *b, reference).signum();
                let side = match cross(*a, *b, cur) {
                    s if s != 0. => s,
                    // 终点恰在线上时取起点的对侧
                    _ => -cross(*a, *b, prev),
                };
                if side == 0. {
                    return None;
                }
                Some(side.signum() == in_side)
            }
        }
    }

    /// 射线法判断点是否在多边形内, 计数线恒为 false
    pub fn contains(&self, p: Point2) -> bool {
        let Region::Polygon(points) = self else {
            return false;
        };
        let mut inside = false;
        let mut j = points.len() - 1;
        for i in 0..points.len() {
            let (pi, pj) = (points[i], points[j]);
            if (pi.y() > p.y()) != (pj.y() > p.y())
                && p.x() < (pj.x() - pi.x()) * (p.y() - pi.y()) / (pj.y() - pi.y()) + pi.x()
            {
                inside = !inside;
            }
            j = i;
        }
        inside
    }

    /// 本帧移动 prev → cur 是否触发计数
    fn is_hit(&self, prev: Point2, cur: Point2) -> bool {
        match self {
            Region::Line(a, b) => segments_intersect(prev, cur, *a, *b),
            Region::Polygon(_) => self.contains(cur),
        }
    }
}

fn cross(o: Point2, a: Point2, b: Point2) -> f32 {
    (a.x() - o.x()) * (b.y() - o.y()) - (a.y() - o.y()) * (b.x() - o.x())
}

/// 线段 p1p2 与 q1q2 是否相交 (含端点)
pub fn segments_intersect(p1: Point2, p2: Point2, q1: Point2, q2: Point2) -> bool {
    let on_segment = |a: Point2, b: Point2, c: Point2| {
        c.x() >= a.x().min(b.x())
            && c.x() <= a.x().max(b.x())
            && c.y() >= a.y().min(b.y())
            && c.y() <= a.y().max(b.y())
    };

    let d1 = cross(q1, q2, p1);
    let d2 = cross(q1, q2, p2);
    let d3 = cross(p1, p2, q1);
    let d4 = cross(p1, p2, q2);

    if ((d1 > 0. && d2 < 0.) || (d1 < 0. && d2 > 0.)) && ((d3 > 0. && d4 < 0.) || (d3 < 0. && d4 > 0.)) {
        return true;
    }
    (d1 == 0. && on_segment(q1, q2, p1))
        || (d2 == 0. && on_segment(q1, q2, p2))
        || (d3 == 0. && on_segment(p1, p2, q1))
        || (d4 == 0. && on_segment(p1, p2, q2))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassCount {
    pub in_count: u32,
    pub out_count: u32,
}

/// 累计计数
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Counts {
    pub in_count: u32,
    pub out_count: u32,
    /// 类别ID → 计数
    pub per_class: BTreeMap<usize, ClassCount>,
}

impl Counts {
    fn record(&mut self, class_id: usize, inward: bool) {
        let class = self.per_class.entry(class_id).or_default();
        if inward {
            self.in_count += 1;
            class.in_count += 1;
        } else {
            self.out_count += 1;
            class.out_count += 1;
        }
    }
}

/// 区域计数器
#[derive(Debug, Clone)]
pub struct ObjectCounter {
    region: Region,
    counted_ids: HashSet<u32>,
    counts: Counts,
}

impl ObjectCounter {
    pub fn new(region: Region) -> Self {
        Self {
            region,
            counted_ids: HashSet::new(),
            counts: Counts::default(),
        }
    }

    /// 用本帧已匹配的轨迹更新计数
    ///
    /// 窄高区域: 向右为进, 其余: 向下为进
    pub fn update(&mut self, tracks: &[Track]) -> &Counts {
        // 追踪器已删除的ID不会再出现
        self.counted_ids.retain(|id| tracks.iter().any(|t| t.id == *id));

        for track in tracks.iter().filter(|t| t.is_matched()) {
            if self.counted_ids.contains(&track.id) {
                continue;
            }
            let Some(prev) = track.previous_center() else {
                continue;
            };
            let cur = track.center();
            if !self.region.is_hit(prev, cur) {
                continue;
            }
            let Some(inward) = self.region.direction(prev, cur) else {
                continue;
            };

            self.counted_ids.insert(track.id);
            self.counts.record(track.class_id(), inward);
        }
        &self.counts
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn counts(&self) -> &Counts {
        &self.counts
    }
}
