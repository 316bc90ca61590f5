// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 检测与跟踪数据模型 (Detection & Tracking)
///
/// - types:   边界框 / 检测结果 / 帧缓冲区
/// - tracker: 轨迹、跟踪器接口、IoU、卡尔曼滤波
/// - sort:    SORT 风格 IoU 跟踪器 (贪心 / 匈牙利)
pub mod sort;
pub mod tracker;
pub mod types;

pub use sort::{Association, MotionModel, SortConfig, SortTracker};
pub use tracker::{compute_iou, Track, TrackIdAllocator, Tracker};
pub use types::{BBox, Detection, PixelBuffer, PixelFormat, TrackBox};
