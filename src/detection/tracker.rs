// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 多目标跟踪公共组件
//! Common components for multi-object tracking

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use super::types::{BBox, Detection, TrackBox};

// ========== 公共数据结构 ==========

/// 跟踪对象 (跨帧持久身份)
#[derive(Clone, Debug)]
pub struct Track {
    /// 唯一跟踪ID (单调递增, 永不复用)
    pub id: u32,

    /// 当前边界框
    pub bbox: BBox,

    /// 连续丢失帧数 (0 = 本帧已匹配)
    pub age: u32,

    /// 累计匹配次数
    pub hits: u32,

    /// 最近一次匹配检测的类别/置信度
    pub class_id: u32,
    pub confidence: f32,

    /// 运动模型 (仅在启用卡尔曼时存在)
    pub(crate) kalman: Option<KalmanBoxFilter>,
}

impl Track {
    pub(crate) fn spawn(id: u32, det: &Detection, kalman: Option<KalmanBoxFilter>) -> Self {
        Self {
            id,
            bbox: det.bbox,
            age: 0,
            hits: 1,
            class_id: det.class_id,
            confidence: det.confidence,
            kalman,
        }
    }

    /// 获取中心点
    pub fn center(&self) -> (f32, f32) {
        self.bbox.center()
    }

    /// 运动模型的预测框 (未启用时为当前框)
    pub fn predicted_bbox(&self) -> BBox {
        match &self.kalman {
            Some(kf) => kf.bbox(),
            None => self.bbox,
        }
    }

    pub fn to_box(&self) -> TrackBox {
        TrackBox {
            id: self.id,
            x1: self.bbox.x1,
            y1: self.bbox.y1,
            x2: self.bbox.x2,
            y2: self.bbox.y2,
        }
    }
}

/// 跟踪ID分配器
///
/// 由跟踪器持有, 不使用全局状态。克隆后共享同一个计数器,
/// 可让多个会话拿到全局唯一的ID。
#[derive(Clone, Debug)]
pub struct TrackIdAllocator {
    next: Arc<AtomicU32>,
}

impl Default for TrackIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackIdAllocator {
    pub fn new() -> Self {
        Self {
            next: Arc::new(AtomicU32::new(1)),
        }
    }

    pub fn next_id(&self) -> u32 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// 下一个将被分配的ID
    pub fn peek(&self) -> u32 {
        self.next.load(Ordering::Relaxed)
    }

    /// 计数器归位到 1
    pub fn reinitialize(&self) {
        self.next.store(1, Ordering::Relaxed);
    }
}

// ========== 卡尔曼滤波器 ==========

/// 匀速模型的边界框滤波器 (协方差简化为对角阵)
/// 状态向量: [cx, cy, w, h, vx, vy, vw, vh]
#[derive(Clone, Debug)]
pub struct KalmanBoxFilter {
    state: [f32; 8],
    p: [f32; 8],
    /// 过程噪声
    q: f32,
    /// 观测噪声
    r: f32,
}

impl KalmanBoxFilter {
    pub fn new(bbox: &BBox, q: f32, r: f32) -> Self {
        let (cx, cy) = bbox.center();
        Self {
            state: [cx, cy, bbox.width(), bbox.height(), 0.0, 0.0, 0.0, 0.0],
            p: [10.0; 8],
            q,
            r,
        }
    }

    /// 预测下一帧: x += v
    pub fn predict(&mut self) {
        for i in 0..4 {
            self.state[i] += self.state[i + 4];
            self.p[i] += self.p[i + 4] + self.q;
            self.p[i + 4] += self.q;
        }
    }

    /// 融合观测值
    pub fn update(&mut self, bbox: &BBox) {
        let (cx, cy) = bbox.center();
        let z = [cx, cy, bbox.width(), bbox.height()];
        for i in 0..4 {
            let residual = z[i] - self.state[i];
            let s = self.p[i] + self.r;
            let k = self.p[i] / s;
            let kv = self.p[i + 4] / s;
            self.state[i] += k * residual;
            self.state[i + 4] += kv * residual;
            self.p[i] *= 1.0 - k;
            self.p[i + 4] *= 1.0 - kv;
        }
    }

    /// 当前状态对应的边界框
    pub fn bbox(&self) -> BBox {
        BBox::from_cxcywh(
            self.state[0],
            self.state[1],
            self.state[2].max(1.0),
            self.state[3].max(1.0),
        )
    }

    /// 获取速度向量
    pub fn velocity(&self) -> (f32, f32) {
        (self.state[4], self.state[5])
    }
}

// ========== 跟踪器统一接口 ==========

/// 多目标跟踪器 Trait
///
/// 每处理一帧调用一次 `update`, 跨帧保持状态
pub trait Tracker: Send {
    /// 关联本帧检测, 返回当前所有活跃轨迹 (已有轨迹在前, 新轨迹按检测顺序在后)
    fn update(&mut self, detections: &[Detection]) -> &[Track];

    /// 重置跟踪器 (清除所有跟踪, ID计数器不回退)
    fn reset(&mut self);

    /// 获取当前跟踪数量
    fn track_count(&self) -> usize;
}

// ========== 工具函数 ==========

const IOU_EPS: f32 = 1e-6;

/// 计算两个边界框的IOU: inter / (union + 1e-6)
pub fn compute_iou(a: &BBox, b: &BBox) -> f32 {
    let iw = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let ih = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let inter = iw * ih;
    let union = a.area() + b.area() - inter;
    inter / (union + IOU_EPS)
}

/// 根据ID生成不同颜色 (黄金角度采样)
pub fn id_to_color(id: u32) -> [u8; 3] {
    let hue = (id as f32 * 137.508) % 360.0;
    hsv_to_rgb(hue, 0.8, 0.9)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> [u8; 3] {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;
    let (r, g, b) = match (h / 60.0) as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    [
        ((r + m) * 255.0) as u8,
        ((g + m) * 255.0) as u8,
        ((b + m) * 255.0) as u8,
    ]
}
