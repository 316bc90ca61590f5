// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 检测器统一接口与实现
///
/// # 架构说明
///
/// - **OnnxDetector**: 真实模型 (预处理 → 推理 → 后处理 + NMS), 文件: `yolo.rs`
/// - **StubDetector**: 固定合成框, 无需模型, 文件: `stub.rs`
///
/// 两者实现同一个 [`Detector`] trait, 由 `Options::use_stub_detection` 选择。
///
/// ## 核心流程
/// ```text
/// 帧缓冲区 → preprocess (缩放到640×640, /255, NCHW)
///          ↓
///     推理引擎 run (进程级共享模型)
///          ↓
///     原始输出 → decode (sigmoid, obj×cls, 阈值) → NMS → 映射回原始帧坐标
/// ```
pub mod stub;
pub mod yolo;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::Options;
use crate::detection::types::{Detection, PixelBuffer, INF_SIZE};
use crate::error::{Error, Result};

pub use stub::StubDetector;
pub use yolo::{decode_predictions, DecodeParams, OnnxDetector};

/// 检测器能力: 帧 → 检测框列表
pub trait Detector: Send {
    /// 检测单帧, 不修改输入缓冲区
    fn detect(&mut self, frame: &PixelBuffer) -> Result<Vec<Detection>>;

    /// 检测器名称 (日志用)
    fn name(&self) -> &str;
}

/// 模型输出布局
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputLayout {
    /// `[1, N, 5+nc]`
    #[default]
    CandidatesMajor,
    /// `[1, 5+nc, N]`
    AttributesMajor,
}

/// 推理后端
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ExecutionProvider {
    #[default]
    Cpu,
    Cuda {
        device_id: i32,
    },
    TensorRt {
        device_id: i32,
    },
}

/// 模型输入边长上限
pub const MAX_INPUT_SIZE: u32 = 4096;

/// 检测参数配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub model_path: PathBuf,
    pub input_size: u32,      // 模型输入尺寸 (正方形)
    pub conf_threshold: f32,  // 检测置信度阈值
    pub nms_threshold: f32,   // NMS IOU阈值
    pub classes: Vec<u32>,    // 类别白名单, 空 = 全部
    pub layout: OutputLayout, // 输出布局
    pub apply_sigmoid: bool,  // 对 obj/cls 做 sigmoid
    pub normalized_boxes: bool, // 坐标为 [0,1] 归一化
    pub execution_provider: ExecutionProvider,
    pub intra_threads: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/yolov8n.onnx"),
            input_size: INF_SIZE,
            conf_threshold: 0.4,
            nms_threshold: 0.45,
            classes: Vec::new(),
            layout: OutputLayout::CandidatesMajor,
            apply_sigmoid: true,
            normalized_boxes: true,
            execution_provider: ExecutionProvider::Cpu,
            intra_threads: 4,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.input_size == 0 || self.input_size > MAX_INPUT_SIZE {
            return Err(Error::Config(format!(
                "detector.input_size must be in 1..={}, got {}",
                MAX_INPUT_SIZE, self.input_size
            )));
        }
        for (name, v) in [
            ("conf_threshold", self.conf_threshold),
            ("nms_threshold", self.nms_threshold),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(Error::Config(format!(
                    "detector.{} must be in [0, 1], got {}",
                    name, v
                )));
            }
        }
        Ok(())
    }

    /// 只保留人 (COCO class 0)
    pub fn person_only(mut self) -> Self {
        self.classes = vec![0];
        self
    }
}

/// 根据选项构建检测器
pub fn build_detector(config: &DetectorConfig, options: &Options) -> Box<dyn Detector> {
    if options.use_stub_detection {
        tracing::info!("🎯 检测器: stub (固定合成框)");
        Box::new(StubDetector::new())
    } else {
        tracing::info!("🎯 检测器: onnx ({})", config.model_path.display());
        Box::new(OnnxDetector::new(config.clone()))
    }
}
