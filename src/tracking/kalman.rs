// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//! 简化卡尔曼滤波器 (单个边界框的位置和尺寸平滑)
//!
//! 状态向量: [cx, cy, w, h, vx, vy, vw, vh], 协方差简化为对角阵

use crate::Bbox;

#[derive(Clone, Debug)]
pub struct KalmanBoxFilter {
    state: [f32; 8],
    p: [f32; 8],
    /// 过程噪声
    q: f32,
    /// 观测噪声
    r: f32,
    velocity_decay: f32,
    stationary_threshold: f32,
    stationary_count: u32,
}

impl KalmanBoxFilter {
    /// - `q`: 过程噪声 (0.1-1.0, 越小越平滑)
    /// - `r`: 观测噪声 (越大越信任预测)
    pub fn new(bbox: &Bbox, q: f32, r: f32, velocity_decay: f32, stationary_threshold: f32) -> Self {
        let c = bbox.cxcy();
        Self {
            state: [c.x(), c.y(), bbox.width(), bbox.height(), 0.0, 0.0, 0.0, 0.0],
            p: [10.0; 8],
            q,
            r,
            velocity_decay,
            stationary_threshold,
            stationary_count: 0,
        }
    }

    /// 匀速运动模型 + 速度衰减
    pub fn predict(&mut self) {
        let speed = (self.state[4] * self.state[4] + self.state[5] * self.state[5]).sqrt();
        let is_stationary = speed < self.stationary_threshold;

        if is_stationary {
            self.stationary_count += 1;
            // 连续静止3帧后大幅衰减
            let decay = if self.stationary_count > 3 {
                0.7
            } else {
                self.velocity_decay
            };
            for v in &mut self.state[4..] {
                *v *= decay;
            }
        } else {
            self.stationary_count = 0;
            self.state[4] *= self.velocity_decay;
            self.state[5] *= self.velocity_decay;
            self.state[6] *= 0.98;
            self.state[7] *= 0.98;
        }

        for i in 0..4 {
            self.state[i] += self.state[i + 4];
        }

        let q_factor = if is_stationary { 0.5 } else { 1.0 };
        for p in &mut self.p {
            *p += self.q * q_factor;
        }
    }

    /// 融合观测值, 残差越大越信任预测
    pub fn update(&mut self, bbox: &Bbox) {
        let c = bbox.cxcy();
        let y = [
            c.x() - self.state[0],
            c.y() - self.state[1],
            bbox.width() - self.state[2],
            bbox.height() - self.state[3],
        ];

        let residual_norm = (y[0] * y[0] + y[1] * y[1]).sqrt();
        let adaptive_r = if residual_norm < self.stationary_threshold {
            self.r * 0.3
        } else if residual_norm < 10.0 {
            self.r
        } else {
            self.r * 3.0
        };

        // K = P / (P + R), 速度分量的观测噪声放大10倍
        let mut k = [0.0f32; 8];
        for i in 0..8 {
            let r = if i < 4 { adaptive_r } else { adaptive_r * 10.0 };
            k[i] = self.p[i] / (self.p[i] + r);
        }

        for i in 0..4 {
            self.state[i] += k[i] * y[i];
        }

        let velocity_gain = if residual_norm < self.stationary_threshold {
            0.3
        } else {
            1.0
        };
        for i in 0..4 {
            self.state[i + 4] += k[i + 4] * y[i] * velocity_gain;
        }

        for i in 0..8 {
            self.p[i] *= 1.0 - k[i];
        }

        if residual_norm >= self.stationary_threshold {
            self.stationary_count = 0;
        }
    }

    pub fn state_bbox(&self, class_id: usize, confidence: f32) -> Bbox {
        let w = self.state[2].max(1.0);
        let h = self.state[3].max(1.0);
        Bbox::new(self.state[0] - w / 2.0, self.state[1] - h / 2.0, w, h, class_id, confidence)
    }

    /// 下一帧预测框 (用于匹配)
    pub fn predicted_bbox(&self) -> Bbox {
        let cx = self.state[0] + self.state[4];
        let cy = self.state[1] + self.state[5];
        let w = (self.state[2] + self.state[6]).max(1.0);
        let h = (self.state[3] + self.state[7]).max(1.0);
        Bbox::new(cx - w / 2.0, cy - h / 2.0, w, h, 0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_matches_box() {
        let b = Bbox::new(10., 20., 30., 40., 0, 0.9);
        let kf = KalmanBoxFilter::new(&b, 0.1, 0.5, 0.95, 2.0);
        let s = kf.state_bbox(0, 0.9);
        assert!((s.xmin() - 10.).abs() < 1e-4);
        assert!((s.ymax() - 60.).abs() < 1e-4);
    }

    #[test]
    fn test_update_moves_towards_observation() {
        let b = Bbox::new(0., 0., 10., 10., 0, 0.9);
        let mut kf = KalmanBoxFilter::new(&b, 0.1, 0.5, 0.95, 2.0);
        kf.predict();
        kf.update(&Bbox::new(20., 0., 10., 10., 0, 0.9));
        let cx = kf.state_bbox(0, 1.0).cxcy().x();
        assert!(cx > 5. && cx <= 25.);
        // 学到了向右的速度
        assert!(kf.predicted_bbox().cxcy().x() > cx);
    }
}
