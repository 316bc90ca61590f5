// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod config; // 管线配置参数
pub mod detection; // 检测/跟踪数据模型与跟踪器
pub mod error;
pub mod models; // 检测器接口与具体实现
pub mod ort_backend;
pub mod pipeline; // 帧循环
pub mod renderer; // 叠加层渲染
pub mod telemetry; // 轨迹上报

pub use crate::config::{Options, PipelineConfig};
pub use crate::detection::{
    compute_iou, BBox, Detection, PixelBuffer, PixelFormat, SortConfig, SortTracker, Track,
    TrackBox, Tracker,
};
pub use crate::error::{Error, Result};
pub use crate::models::{build_detector, Detector, DetectorConfig, OnnxDetector, StubDetector};
pub use crate::pipeline::{FrameEvent, FrameLoop, ImageSequenceSource, LoopStatus, VideoSource};
pub use crate::telemetry::{HttpSink, JobReporter, TrackSink};

/// 非极大值抑制 (按置信度降序, 与已保留框的 IoU 都低于阈值才保留)
pub fn non_max_suppression(xs: &mut Vec<Detection>, iou_threshold: f32) {
    xs.sort_by(|b1, b2| b2.confidence.total_cmp(&b1.confidence));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            let iou = compute_iou(&xs[prev_index].bbox, &xs[index].bbox);
            if iou >= iou_threshold {
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
