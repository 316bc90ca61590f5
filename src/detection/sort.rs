// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! SORT 风格的 IoU 跟踪器
//! SORT-style IoU tracker
//!
//! 核心流程:
//! 1. 每条已有轨迹按顺序与未使用的检测框做 IoU 匹配 (贪心, 或匈牙利最优分配)
//! 2. 匹配成功: 采用检测框, hits+1, age=0
//! 3. 匹配失败: age+1, 超过最大丢失帧数则删除
//! 4. 未被认领的检测框生成新轨迹 (新ID)

use munkres::{solve_assignment, WeightMatrix};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::tracker::{compute_iou, KalmanBoxFilter, Track, TrackIdAllocator, Tracker};
use super::types::{BBox, Detection};
use crate::error::{Error, Result};

/// 关联算法
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Association {
    /// 贪心: 按轨迹顺序取最大IoU
    #[default]
    Greedy,
    /// 匈牙利算法: 全局最小 (1 - IoU)
    Hungarian,
}

/// 运动模型
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MotionModel {
    /// 直接使用上一帧的框
    #[default]
    None,
    /// 匀速卡尔曼预测
    Kalman,
}

/// 跟踪器参数
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SortConfig {
    pub match_iou_threshold: f32, // 匹配IOU阈值
    pub max_age: u32,             // 最大连续丢失帧数
    pub association: Association,
    pub motion: MotionModel,
    pub kalman_process_noise: f32,     // 过程噪声 q
    pub kalman_measurement_noise: f32, // 观测噪声 r
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            match_iou_threshold: 0.3,
            max_age: 2,
            association: Association::Greedy,
            motion: MotionModel::None,
            kalman_process_noise: 0.1,
            kalman_measurement_noise: 1.0,
        }
    }
}

impl SortConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.match_iou_threshold) {
            return Err(Error::Config(format!(
                "tracker.match_iou_threshold must be in [0, 1), got {}",
                self.match_iou_threshold
            )));
        }
        if self.max_age == 0 {
            return Err(Error::Config("tracker.max_age must be >= 1".into()));
        }
        if self.kalman_process_noise < 0.0 || self.kalman_measurement_noise <= 0.0 {
            return Err(Error::Config("tracker kalman noise must be positive".into()));
        }
        Ok(())
    }
}

/// SORT 追踪器
pub struct SortTracker {
    config: SortConfig,

    /// 当前轨迹 (已有轨迹按创建顺序, 新轨迹按检测顺序)
    tracks: Vec<Track>,

    /// ID分配器
    ids: TrackIdAllocator,
}

impl Default for SortTracker {
    fn default() -> Self {
        Self::new(SortConfig::default())
    }
}

impl SortTracker {
    pub fn new(config: SortConfig) -> Self {
        Self::with_allocator(config, TrackIdAllocator::new())
    }

    /// 使用外部ID分配器 (多个会话共享ID空间)
    pub fn with_allocator(config: SortConfig, ids: TrackIdAllocator) -> Self {
        Self {
            config,
            tracks: Vec::new(),
            ids,
        }
    }

    pub fn config(&self) -> &SortConfig {
        &self.config
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn allocator(&self) -> &TrackIdAllocator {
        &self.ids
    }

    /// 清空轨迹并把ID计数器归位
    pub fn reinitialize(&mut self) {
        self.tracks.clear();
        self.ids.reinitialize();
    }

    fn new_filter(&self, bbox: &BBox) -> Option<KalmanBoxFilter> {
        match self.config.motion {
            MotionModel::None => None,
            MotionModel::Kalman => Some(KalmanBoxFilter::new(
                bbox,
                self.config.kalman_process_noise,
                self.config.kalman_measurement_noise,
            )),
        }
    }
}

impl Tracker for SortTracker {
    fn update(&mut self, detections: &[Detection]) -> &[Track] {
        // 1. 每条轨迹的参考框 (启用运动模型时先预测)
        let reference: Vec<BBox> = self
            .tracks
            .iter_mut()
            .map(|t| match t.kalman.as_mut() {
                Some(kf) => {
                    kf.predict();
                    kf.bbox()
                }
                None => t.bbox,
            })
            .collect();

        // 2. 关联
        let threshold = self.config.match_iou_threshold;
        let assignment = match self.config.association {
            Association::Greedy => greedy_match(&reference, detections, threshold),
            Association::Hungarian => hungarian_match(&reference, detections, threshold),
        };

        // 3. 更新/老化
        let mut claimed = vec![false; detections.len()];
        let mut live = Vec::with_capacity(self.tracks.len() + detections.len());
        for (mut track, matched) in self.tracks.drain(..).zip(assignment) {
            match matched {
                Some(j) => {
                    let det = &detections[j];
                    claimed[j] = true;
                    track.bbox = det.bbox;
                    track.class_id = det.class_id;
                    track.confidence = det.confidence;
                    track.hits += 1;
                    track.age = 0;
                    if let Some(kf) = track.kalman.as_mut() {
                        kf.update(&det.bbox);
                    }
                    live.push(track);
                }
                None => {
                    track.age += 1;
                    if track.age >= self.config.max_age {
                        debug!("track {} dropped after {} misses", track.id, track.age);
                        continue;
                    }
                    if let Some(kf) = track.kalman.as_ref() {
                        track.bbox = kf.bbox();
                    }
                    live.push(track);
                }
            }
        }

        // 4. 新轨迹
        for (det, _) in detections.iter().zip(&claimed).filter(|(_, c)| !**c) {
            let kalman = self.new_filter(&det.bbox);
            live.push(Track::spawn(self.ids.next_id(), det, kalman));
        }

        self.tracks = live;
        &self.tracks
    }

    fn reset(&mut self) {
        self.tracks.clear();
    }

    fn track_count(&self) -> usize {
        self.tracks.len()
    }
}

/// 贪心匹配: 按轨迹顺序选取未使用检测中 IoU 最大者 (严格大于, 并列取先出现的)
///
/// 返回每条轨迹匹配到的检测下标
pub fn greedy_match(
    tracks: &[BBox],
    detections: &[Detection],
    threshold: f32,
) -> Vec<Option<usize>> {
    let mut used = vec![false; detections.len()];
    tracks
        .iter()
        .map(|t| {
            let mut best_iou = 0.0;
            let mut best = None;
            for (j, det) in detections.iter().enumerate() {
                if used[j] {
                    continue;
                }
                let iou = compute_iou(t, &det.bbox);
                if iou > best_iou {
                    best_iou = iou;
                    best = Some(j);
                }
            }
            match best {
                Some(j) if best_iou > threshold => {
                    used[j] = true;
                    Some(j)
                }
                _ => None,
            }
        })
        .collect()
}

/// 匈牙利匹配: 代价矩阵为 1 - IoU, 补齐为方阵; 只接受 IoU 超过阈值的配对
pub fn hungarian_match(
    tracks: &[BBox],
    detections: &[Detection],
    threshold: f32,
) -> Vec<Option<usize>> {
    let mut result = vec![None; tracks.len()];
    if tracks.is_empty() || detections.is_empty() {
        return result;
    }

    let ious: Vec<Vec<f32>> = tracks
        .iter()
        .map(|t| detections.iter().map(|d| compute_iou(t, &d.bbox)).collect())
        .collect();

    let n = tracks.len().max(detections.len());
    let mut mat = WeightMatrix::from_fn(n, |(r, c)| {
        if r < tracks.len() && c < detections.len() {
            1.0 - ious[r][c] as f64
        } else {
            100000.0
        }
    });

    match solve_assignment(&mut mat) {
        Ok(positions) => {
            for p in positions {
                if p.row >= tracks.len() || p.column >= detections.len() {
                    continue;
                }
                if ious[p.row][p.column] > threshold {
                    result[p.row] = Some(p.column);
                }
            }
            result
        }
        Err(e) => {
            warn!("⚠️ assignment could not be solved ({:?}), falling back to greedy", e);
            greedy_match(tracks, detections, threshold)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x1: f32, y1: f32, x2: f32, y2: f32) -> Detection {
        Detection::new(BBox::new(x1, y1, x2, y2), 0.9, 0)
    }

    fn ids(tracks: &[Track]) -> Vec<u32> {
        tracks.iter().map(|t| t.id).collect()
    }

    #[test]
    fn single_object_lifecycle() {
        let mut tracker = SortTracker::default();

        let out = tracker.update(&[det(10.0, 10.0, 50.0, 50.0)]);
        assert_eq!(ids(out), vec![1]);
        assert_eq!(out[0].bbox, BBox::new(10.0, 10.0, 50.0, 50.0));

        let out = tracker.update(&[det(12.0, 11.0, 52.0, 51.0)]);
        assert_eq!(ids(out), vec![1]);
        assert_eq!(out[0].bbox, BBox::new(12.0, 11.0, 52.0, 51.0));
        assert_eq!(out[0].hits, 2);

        // 丢失一帧: 保留上一帧的框
        let out = tracker.update(&[]);
        assert_eq!(ids(out), vec![1]);
        assert_eq!(out[0].bbox, BBox::new(12.0, 11.0, 52.0, 51.0));
        assert_eq!(out[0].age, 1);

        // 连续丢失两帧: 删除
        assert!(tracker.update(&[]).is_empty());
    }

    #[test]
    fn two_disjoint_objects_keep_their_ids() {
        let mut tracker = SortTracker::default();
        let frame = [det(0.0, 0.0, 10.0, 10.0), det(100.0, 100.0, 110.0, 110.0)];
        assert_eq!(ids(tracker.update(&frame)), vec![1, 2]);
        let out = tracker.update(&frame);
        assert_eq!(ids(out), vec![1, 2]);
        assert_eq!(out[1].bbox, BBox::new(100.0, 100.0, 110.0, 110.0));
    }

    #[test]
    fn far_jump_spawns_fresh_id() {
        let mut tracker = SortTracker::default();
        tracker.update(&[det(0.0, 0.0, 10.0, 10.0)]);
        let out = tracker.update(&[det(200.0, 200.0, 210.0, 210.0)]);
        // 旧轨迹老化保留, 新轨迹排在后面
        assert_eq!(ids(out), vec![1, 2]);
        assert_eq!(out[0].age, 1);
        assert_eq!(out[1].age, 0);
        assert_eq!(out[1].hits, 1);
    }

    #[test]
    fn ids_are_never_reused_after_reset() {
        let mut tracker = SortTracker::default();
        tracker.update(&[det(0.0, 0.0, 10.0, 10.0)]);
        tracker.reset();
        assert_eq!(tracker.track_count(), 0);
        assert_eq!(ids(tracker.update(&[det(0.0, 0.0, 10.0, 10.0)])), vec![2]);

        tracker.reinitialize();
        assert_eq!(ids(tracker.update(&[det(0.0, 0.0, 10.0, 10.0)])), vec![1]);
    }

    #[test]
    fn equal_iou_prefers_first_detection() {
        let mut tracker = SortTracker::default();
        tracker.update(&[det(0.0, 0.0, 10.0, 10.0)]);
        let out = tracker.update(&[det(2.0, 0.0, 12.0, 10.0), det(-2.0, 0.0, 8.0, 10.0)]);
        assert_eq!(ids(out), vec![1, 2]);
        assert_eq!(out[0].bbox, BBox::new(2.0, 0.0, 12.0, 10.0));
        assert_eq!(out[1].bbox, BBox::new(-2.0, 0.0, 8.0, 10.0));
    }

    #[test]
    fn iou_below_threshold_does_not_match() {
        // IoU = 1/3
        let config = SortConfig {
            match_iou_threshold: 0.34,
            ..Default::default()
        };
        let mut tracker = SortTracker::new(config);
        tracker.update(&[det(0.0, 0.0, 10.0, 10.0)]);
        let out = tracker.update(&[det(5.0, 0.0, 15.0, 10.0)]);
        assert_eq!(ids(out), vec![1, 2]);
    }

    #[test]
    fn hungarian_resolves_crossing_that_greedy_splits() {
        let first = [det(0.0, 0.0, 10.0, 10.0), det(5.0, 0.0, 15.0, 10.0)];
        let second = [det(3.0, 0.0, 13.0, 10.0), det(-4.0, 0.0, 6.0, 10.0)];

        let mut greedy = SortTracker::default();
        greedy.update(&first);
        let out = greedy.update(&second);
        assert_eq!(ids(out), vec![1, 2, 3]);
        assert_eq!(out[0].bbox, BBox::new(3.0, 0.0, 13.0, 10.0));
        assert_eq!(out[1].age, 1);

        let mut hungarian = SortTracker::new(SortConfig {
            association: Association::Hungarian,
            ..Default::default()
        });
        hungarian.update(&first);
        let out = hungarian.update(&second);
        assert_eq!(ids(out), vec![1, 2]);
        assert_eq!(out[0].bbox, BBox::new(-4.0, 0.0, 6.0, 10.0));
        assert_eq!(out[1].bbox, BBox::new(3.0, 0.0, 13.0, 10.0));
    }

    #[test]
    fn hungarian_handles_more_detections_than_tracks() {
        let mut tracker = SortTracker::new(SortConfig {
            association: Association::Hungarian,
            ..Default::default()
        });
        tracker.update(&[det(0.0, 0.0, 10.0, 10.0)]);
        let out = tracker.update(&[
            det(50.0, 50.0, 60.0, 60.0),
            det(1.0, 0.0, 11.0, 10.0),
        ]);
        assert_eq!(ids(out), vec![1, 2]);
        assert_eq!(out[0].bbox, BBox::new(1.0, 0.0, 11.0, 10.0));
    }

    #[test]
    fn kalman_keeps_identity_when_object_speeds_up() {
        let frames: Vec<f32> = vec![0.0, 10.0, 20.0, 30.0, 40.0, 65.0];
        let run = |motion| {
            let mut tracker = SortTracker::new(SortConfig {
                motion,
                ..Default::default()
            });
            let mut last = Vec::new();
            for x in &frames {
                last = ids(tracker.update(&[det(*x, 0.0, x + 40.0, 80.0)]));
            }
            last
        };
        assert_eq!(run(MotionModel::Kalman), vec![1]);
        assert_eq!(run(MotionModel::None), vec![1, 2]);
    }

    #[test]
    fn kalman_track_coasts_when_missed() {
        let mut tracker = SortTracker::new(SortConfig {
            motion: MotionModel::Kalman,
            ..Default::default()
        });
        for x in [0.0f32, 10.0, 20.0, 30.0, 40.0] {
            tracker.update(&[det(x, 0.0, x + 40.0, 80.0)]);
        }
        let out = tracker.update(&[]);
        assert_eq!(out.len(), 1);
        assert!(out[0].bbox.x1 > 40.0);
    }

    #[test]
    fn config_validation() {
        assert!(SortConfig::default().validate().is_ok());
        let bad = SortConfig {
            max_age: 0,
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(Error::Config(_))));
    }
}
