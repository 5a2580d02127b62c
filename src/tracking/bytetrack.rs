// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! ByteTrack 算法实现
//!
//! 核心思想:
//! 1. 高低分检测框分开处理
//! 2. 高分框优先匹配 (IOU)
//! 3. 低分框救援丢失的轨迹
//! 4. 纯运动模型,无需外观特征

use super::config::TrackerConfig;
use super::kalman::KalmanBoxFilter;
use crate::{Bbox, Point2};

/// 预定义颜色表
const COLOR_PALETTE: [(u8, u8, u8); 10] = [
    (255, 64, 64),
    (64, 255, 64),
    (64, 64, 255),
    (255, 255, 64),
    (255, 64, 255),
    (64, 255, 255),
    (255, 128, 0),
    (128, 0, 255),
    (255, 128, 192),
    (128, 255, 128),
];

/// 跟踪对象
#[derive(Clone, Debug)]
pub struct Track {
    /// 唯一跟踪ID
    pub id: u32,

    /// 当前边界框 (卡尔曼滤波平滑后)
    pub bbox: Bbox,

    /// 历史轨迹 (中心点)
    pub trajectory: Vec<Point2>,

    /// 连续丢失帧数
    pub frames_lost: u32,

    /// 显示颜色
    pub color: (u8, u8, u8),

    /// 总共被跟踪的帧数
    pub total_frames: u32,

    kalman: KalmanBoxFilter,
}

impl Track {
    fn new(id: u32, bbox: &Bbox, config: &TrackerConfig) -> Self {
        let kalman = KalmanBoxFilter::new(
            bbox,
            config.kalman_process_noise,
            config.kalman_obs_noise,
            config.kalman_velocity_decay,
            config.kalman_stationary_threshold,
        );
        let smoothed = kalman.state_bbox(bbox.id(), bbox.confidence());

        Self {
            id,
            trajectory: vec![smoothed.cxcy()],
            bbox: smoothed,
            frames_lost: 0,
            color: COLOR_PALETTE[id as usize % COLOR_PALETTE.len()],
            total_frames: 1,
            kalman,
        }
    }

    pub fn class_id(&self) -> usize {
        self.bbox.id()
    }

    pub fn center(&self) -> Point2 {
        self.bbox.cxcy()
    }

    /// 本帧之前的轨迹点, 新轨迹没有
    pub fn previous_center(&self) -> Option<Point2> {
        let n = self.trajectory.len();
        (n >= 2).then(|| self.trajectory[n - 2])
    }

    /// 本帧是否有检测框匹配
    pub fn is_matched(&self) -> bool {
        self.frames_lost == 0
    }

    fn predict(&mut self) {
        self.kalman.predict();
        self.bbox = self.kalman.state_bbox(self.bbox.id(), self.bbox.confidence());
    }

    fn update(&mut self, bbox: &Bbox, max_trajectory: usize) {
        self.kalman.update(bbox);
        self.bbox = self.kalman.state_bbox(bbox.id(), bbox.confidence());
        self.frames_lost = 0;
        self.total_frames += 1;

        self.trajectory.push(self.bbox.cxcy());
        if self.trajectory.len() > max_trajectory {
            let excess = self.trajectory.len() - max_trajectory;
            self.trajectory.drain(..excess);
        }
    }

    fn mark_lost(&mut self) {
        self.frames_lost += 1;
    }
}

/// ByteTrack 追踪器
pub struct ByteTracker {
    tracks: Vec<Track>,
    next_id: u32,
    config: TrackerConfig,
}

impl ByteTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            tracks: Vec::new(),
            next_id: 1,
            config,
        }
    }

    /// 更新跟踪 (ByteTrack 三步匹配)
    pub fn update(&mut self, detections: &[Bbox]) -> &[Track] {
        // 1. 所有轨迹先预测
        for track in &mut self.tracks {
            track.predict();
        }

        // 2. 分离高低分检测框
        let mut high_dets: Vec<usize> = Vec::new();
        let mut low_dets: Vec<usize> = Vec::new();
        for (idx, det) in detections.iter().enumerate() {
            if det.confidence() >= self.config.high_score_threshold {
                high_dets.push(idx);
            } else if det.confidence() >= self.config.low_score_threshold {
                low_dets.push(idx);
            }
        }

        // 3. 第一轮匹配: 高分检测 + 所有轨迹
        let mut matched_det = vec![false; detections.len()];
        let mut matched_track = vec![false; self.tracks.len()];

        let all_tracks: Vec<usize> = (0..self.tracks.len()).collect();
        let assignments = self.match_detections_to_tracks(
            detections,
            &high_dets,
            &all_tracks,
            self.config.high_iou_threshold,
        );
        for (det_idx, track_idx) in assignments {
            matched_det[det_idx] = true;
            matched_track[track_idx] = true;
            self.tracks[track_idx].update(&detections[det_idx], self.config.max_trajectory);
        }

        // 4. 第二轮匹配: 低分检测 + 未匹配的轨迹 (救援)
        let unmatched_tracks: Vec<usize> = (0..self.tracks.len())
            .filter(|&idx| !matched_track[idx])
            .collect();
        let low_assignments = self.match_detections_to_tracks(
            detections,
            &low_dets,
            &unmatched_tracks,
            self.config.low_iou_threshold,
        );
        for (det_idx, track_idx) in low_assignments {
            matched_det[det_idx] = true;
            matched_track[track_idx] = true;
            self.tracks[track_idx].update(&detections[det_idx], self.config.max_trajectory);
        }

        // 5. 未匹配的轨迹 → 标记丢失
        for (track_idx, &matched) in matched_track.iter().enumerate() {
            if !matched {
                self.tracks[track_idx].mark_lost();
            }
        }

        // 6. 未匹配的高分检测 → 新建轨迹
        for &det_idx in &high_dets {
            if !matched_det[det_idx] {
                self.tracks.push(Track::new(self.next_id, &detections[det_idx], &self.config));
                self.next_id += 1;
            }
        }

        // 7. 删除丢失太久的轨迹
        let max_lost = self.config.max_lost_frames;
        self.tracks.retain(|t| t.frames_lost <= max_lost);

        &self.tracks
    }

    /// IOU 贪心匹配, 返回 (检测下标, 轨迹下标)
    fn match_detections_to_tracks(
        &self,
        detections: &[Bbox],
        det_indices: &[usize],
        track_indices: &[usize],
        iou_threshold: f32,
    ) -> Vec<(usize, usize)> {
        if det_indices.is_empty() || track_indices.is_empty() {
            return Vec::new();
        }

        let mut candidates = Vec::new();
        for &det_idx in det_indices {
            for &track_idx in track_indices {
                let predicted = self.tracks[track_idx].kalman.predicted_bbox();
                let iou = detections[det_idx].iou(&predicted);
                if iou >= iou_threshold {
                    candidates.push((1.0 - iou, det_idx, track_idx));
                }
            }
        }

        // 按代价排序
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut assignments = Vec::new();
        let mut used_det = vec![false; detections.len()];
        let mut used_track = vec![false; self.tracks.len()];
        for (_, det_idx, track_idx) in candidates {
            if !used_det[det_idx] && !used_track[track_idx] {
                assignments.push((det_idx, track_idx));
                used_det[det_idx] = true;
                used_track[track_idx] = true;
            }
        }

        assignments
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }
}

impl Default for ByteTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f32, y: f32, conf: f32) -> Bbox {
        Bbox::new(x, y, 40., 80., 0, conf)
    }

    #[test]
    fn test_new_tracks_for_high_score_only() {
        let mut tracker = ByteTracker::default();
        let tracks = tracker.update(&[det(0., 0., 0.9), det(200., 0., 0.2)]);
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].id, 1);
        assert!(tracks[0].previous_center().is_none());
    }

    #[test]
    fn test_id_is_stable_across_frames() {
        let mut tracker = ByteTracker::default();
        tracker.update(&[det(0., 0., 0.9), det(300., 0., 0.9)]);
        let tracks = tracker.update(&[det(302., 1., 0.9), det(3., 2., 0.9)]);
        assert_eq!(tracks.len(), 2);

        let left = tracks.iter().find(|t| t.center().x() < 100.).unwrap();
        let right = tracks.iter().find(|t| t.center().x() > 100.).unwrap();
        assert_eq!(left.id, 1);
        assert_eq!(right.id, 2);
        assert!(left.previous_center().is_some());
        assert_eq!(tracker.tracks().iter().map(|t| t.id).max(), Some(2));
    }

    #[test]
    fn test_low_score_detection_rescues_track() {
        let mut tracker = ByteTracker::default();
        tracker.update(&[det(0., 0., 0.9)]);
        let tracks = tracker.update(&[det(2., 0., 0.2)]);
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].id, 1);
        assert!(tracks[0].is_matched());
    }

    #[test]
    fn test_lost_tracks_are_dropped() {
        let mut tracker = ByteTracker::new(TrackerConfig {
            max_lost_frames: 2,
            ..Default::default()
        });
        tracker.update(&[det(0., 0., 0.9)]);
        for _ in 0..2 {
            let tracks = tracker.update(&[]);
            assert_eq!(tracks.len(), 1);
            assert!(!tracks[0].is_matched());
        }
        assert!(tracker.update(&[]).is_empty());
    }

    #[test]
    fn test_trajectory_is_bounded() {
        let mut tracker = ByteTracker::new(TrackerConfig {
            max_trajectory: 3,
            ..Default::default()
        });
        for i in 0..10 {
            tracker.update(&[det(i as f32 * 2., 0., 0.9)]);
        }
        assert_eq!(tracker.tracks().len(), 1);
        assert_eq!(tracker.tracks()[0].trajectory.len(), 3);
        assert_eq!(tracker.tracks()[0].total_frames, 10);
    }
}
