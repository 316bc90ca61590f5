// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! YOLO 风格 ONNX 检测器
//!
//! 输出每个候选为 `[cx, cy, w, h, obj, cls_0 .. cls_{n-1}]`

use std::sync::Arc;
use std::time::Instant;

use fast_image_resize as fr;
use ndarray::ArrayView2;
use tracing::{debug, error};

use super::{Detector, DetectorConfig, OutputLayout};
use crate::detection::types::{BBox, Detection, PixelBuffer, PixelFormat};
use crate::error::{Error, Result};
use crate::non_max_suppression;
use crate::ort_backend::{self, LoadedModel};

const CXYWHO_OFFSET: usize = 5;

/// 解码参数
#[derive(Clone, Copy, Debug)]
pub struct DecodeParams {
    pub conf_threshold: f32,
    pub apply_sigmoid: bool,
    pub normalized_boxes: bool,
    pub input_size: f32,
}

impl From<&DetectorConfig> for DecodeParams {
    fn from(cfg: &DetectorConfig) -> Self {
        Self {
            conf_threshold: cfg.conf_threshold,
            apply_sigmoid: cfg.apply_sigmoid,
            normalized_boxes: cfg.normalized_boxes,
            input_size: cfg.input_size as f32,
        }
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// 解码原始预测 (每行一个候选) → 模型输入空间的检测框
///
/// 置信度 = obj × max(cls), 严格大于阈值才保留
pub fn decode_predictions(preds: ArrayView2<f32>, params: &DecodeParams) -> Vec<Detection> {
    let act = |v: f32| if params.apply_sigmoid { sigmoid(v) } else { v };
    let scale = if params.normalized_boxes {
        params.input_size
    } else {
        1.0
    };

    let mut detections = Vec::new();
    for pred in preds.rows() {
        if pred.len() <= CXYWHO_OFFSET {
            continue;
        }

        // 找到置信度最高的类别 (并列取第一个)
        let mut class_id = 0;
        let mut class_score = f32::NEG_INFINITY;
        for (i, &s) in pred.iter().skip(CXYWHO_OFFSET).enumerate() {
            if s > class_score {
                class_score = s;
                class_id = i;
            }
        }

        let confidence = act(pred[4]) * act(class_score);
        if !(confidence > params.conf_threshold) {
            continue;
        }

        let bbox = BBox::from_cxcywh(
            pred[0] * scale,
            pred[1] * scale,
            pred[2] * scale,
            pred[3] * scale,
        );
        if !bbox.is_valid() {
            continue;
        }
        detections.push(Detection::new(bbox, confidence, class_id as u32));
    }
    detections
}

/// 把模型输出整理成 (候选数 × 属性数) 的视图
pub fn prediction_matrix<'a>(
    shape: &[usize],
    data: &'a [f32],
    layout: OutputLayout,
) -> Result<ArrayView2<'a, f32>> {
    let (rows, cols) = match shape {
        [1, a, b] | [a, b] => (*a, *b),
        _ => {
            return Err(Error::inference(format!(
                "unexpected output shape {:?}",
                shape
            )))
        }
    };
    let view = ArrayView2::from_shape((rows, cols), data).map_err(Error::inference)?;
    let view = match layout {
        OutputLayout::CandidatesMajor => view,
        OutputLayout::AttributesMajor => view.reversed_axes(),
    };
    if view.ncols() <= CXYWHO_OFFSET {
        return Err(Error::inference(format!(
            "output has {} attributes per candidate, need > {}",
            view.ncols(),
            CXYWHO_OFFSET
        )));
    }
    Ok(view)
}

/// 模型输入空间 → 原始帧坐标, 并裁剪到帧内
pub fn rescale_to_frame(
    detections: Vec<Detection>,
    input_size: u32,
    frame_width: u32,
    frame_height: u32,
) -> Vec<Detection> {
    let sx = frame_width as f32 / input_size as f32;
    let sy = frame_height as f32 / input_size as f32;
    detections
        .into_iter()
        .filter_map(|mut d| {
            d.bbox = d
                .bbox
                .scale(sx, sy)
                .clamp(frame_width as f32, frame_height as f32);
            d.bbox.is_valid().then_some(d)
        })
        .collect()
}

/// ONNX 检测器 (模型在首次检测时懒加载)
pub struct OnnxDetector {
    config: DetectorConfig,
    model: Option<Arc<LoadedModel>>,

    /// 本周期内模型加载失败过, 不再重试
    unavailable: bool,

    resizer: fr::Resizer,
}

impl OnnxDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            model: None,
            unavailable: false,
            resizer: fr::Resizer::new(),
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn is_unavailable(&self) -> bool {
        self.unavailable
    }

    fn model(&mut self) -> Result<Arc<LoadedModel>> {
        if let Some(model) = &self.model {
            return Ok(model.clone());
        }
        let model = ort_backend::shared_model(
            &self.config.model_path,
            &self.config.execution_provider,
            self.config.intra_threads,
        )?;
        self.model = Some(model.clone());
        Ok(model)
    }

    /// 预处理: 拉伸缩放到 input_size × input_size, /255, RGB 平面排列 (CHW)
    pub fn preprocess(&mut self, frame: &PixelBuffer) -> Result<Vec<f32>> {
        frame.validate()?;
        let size = self.config.input_size;
        let pixel_type = match frame.format {
            PixelFormat::Rgba8 => fr::PixelType::U8x4,
            PixelFormat::Rgb8 => fr::PixelType::U8x3,
        };

        let src = fr::images::ImageRef::new(frame.width, frame.height, &frame.data, pixel_type)
            .map_err(|e| Error::InvalidFrame(e.to_string()))?;
        let mut dst = fr::images::Image::new(size, size, pixel_type);
        self.resizer
            .resize(
                &src,
                &mut dst,
                &fr::ResizeOptions::new()
                    .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear)),
            )
            .map_err(Error::inference)?;

        let area = size as usize * size as usize;
        let mut input = vec![0.0f32; 3 * area];
        for (i, px) in dst.buffer().chunks_exact(frame.format.channels()).enumerate() {
            input[i] = px[0] as f32 / 255.0;
            input[area + i] = px[1] as f32 / 255.0;
            input[2 * area + i] = px[2] as f32 / 255.0;
        }
        Ok(input)
    }

    /// 解码 + 类别过滤 + NMS + 映射回原始帧
    pub fn postprocess(
        &self,
        shape: &[usize],
        data: &[f32],
        frame_width: u32,
        frame_height: u32,
    ) -> Result<Vec<Detection>> {
        let preds = prediction_matrix(shape, data, self.config.layout)?;
        let mut detections = decode_predictions(preds, &DecodeParams::from(&self.config));
        if !self.config.classes.is_empty() {
            detections.retain(|d| self.config.classes.contains(&d.class_id));
        }
        non_max_suppression(&mut detections, self.config.nms_threshold);
        Ok(rescale_to_frame(
            detections,
            self.config.input_size,
            frame_width,
            frame_height,
        ))
    }
}

impl Detector for OnnxDetector {
    fn detect(&mut self, frame: &PixelBuffer) -> Result<Vec<Detection>> {
        frame.validate()?;
        if self.unavailable {
            return Ok(Vec::new());
        }

        let model = match self.model() {
            Ok(model) => model,
            Err(e) => {
                error!("❌ 检测模型不可用: {}", e);
                self.unavailable = true;
                return Err(e);
            }
        };

        let t = Instant::now();
        let input = self.preprocess(frame)?;
        let preprocess_ms = t.elapsed().as_secs_f64() * 1000.0;

        let t = Instant::now();
        let size = self.config.input_size as usize;
        let (shape, data) = model.run([1, 3, size, size], input)?;
        let inference_ms = t.elapsed().as_secs_f64() * 1000.0;

        let t = Instant::now();
        let detections = self.postprocess(&shape, &data, frame.width, frame.height)?;
        debug!(
            "detect: {} boxes (pre {:.1} ms, infer {:.1} ms, post {:.1} ms)",
            detections.len(),
            preprocess_ms,
            inference_ms,
            t.elapsed().as_secs_f64() * 1000.0
        );
        Ok(detections)
    }

    fn name(&self) -> &str {
        "onnx"
    }
}
