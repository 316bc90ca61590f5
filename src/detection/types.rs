// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 检测/跟踪数据结构定义
//! Data structures shared by the detector, tracker and overlay

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ========== 公共常量 ==========

/// 推理输入尺寸
pub const INF_SIZE: u32 = 640;

// ========== 数据结构 ==========

/// 轴对齐边界框 (像素坐标, x1<x2, y1<y2)
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// 从中心点+宽高构造
    pub fn from_cxcywh(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self {
            x1: cx - w / 2.0,
            y1: cy - h / 2.0,
            x2: cx + w / 2.0,
            y2: cy + h / 2.0,
        }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// 获取中心点
    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// 非空且坐标有限
    pub fn is_valid(&self) -> bool {
        [self.x1, self.y1, self.x2, self.y2]
            .iter()
            .all(|v| v.is_finite())
            && self.x1 < self.x2
            && self.y1 < self.y2
    }

    /// 按比例缩放 (模型输入空间 → 原始帧空间)
    pub fn scale(&self, sx: f32, sy: f32) -> Self {
        Self {
            x1: self.x1 * sx,
            y1: self.y1 * sy,
            x2: self.x2 * sx,
            y2: self.y2 * sy,
        }
    }

    /// 限制在 [0,w]×[0,h] 内
    pub fn clamp(&self, w: f32, h: f32) -> Self {
        Self {
            x1: self.x1.clamp(0.0, w),
            y1: self.y1.clamp(0.0, h),
            x2: self.x2.clamp(0.0, w),
            y2: self.y2.clamp(0.0, h),
        }
    }
}

/// 单帧检测结果 (每帧重新生成, 关联后丢弃)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BBox,
    pub confidence: f32,
    pub class_id: u32,
}

impl Detection {
    pub fn new(bbox: BBox, confidence: f32, class_id: u32) -> Self {
        Self {
            bbox,
            confidence,
            class_id,
        }
    }
}

/// 上报/渲染用的轨迹投影 `{id, x1, y1, x2, y2}`
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackBox {
    pub id: u32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl TrackBox {
    pub fn bbox(&self) -> BBox {
        BBox::new(self.x1, self.y1, self.x2, self.y2)
    }
}

/// 像素格式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba8,
    Rgb8,
}

impl PixelFormat {
    pub fn channels(&self) -> usize {
        match self {
            PixelFormat::Rgba8 => 4,
            PixelFormat::Rgb8 => 3,
        }
    }
}

/// 帧缓冲区 (使用Arc共享数据,避免复制)
#[derive(Clone, Debug)]
pub struct PixelBuffer {
    pub data: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl PixelBuffer {
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            data: Arc::new(data),
            width,
            height,
            format,
        }
    }

    pub fn from_rgba(img: image::RgbaImage) -> Self {
        let (w, h) = img.dimensions();
        Self::new(img.into_raw(), w, h, PixelFormat::Rgba8)
    }

    /// 检查尺寸与数据长度是否一致
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::InvalidFrame(format!(
                "empty frame {}x{}",
                self.width, self.height
            )));
        }
        let expected = self.width as usize * self.height as usize * self.format.channels();
        if self.data.len() != expected {
            return Err(Error::InvalidFrame(format!(
                "buffer holds {} bytes, {}x{} {:?} needs {}",
                self.data.len(),
                self.width,
                self.height,
                self.format,
                expected
            )));
        }
        Ok(())
    }

    /// 转为 RGBA 图像 (用于叠加合成/保存)
    pub fn to_rgba_image(&self) -> Result<image::RgbaImage> {
        self.validate()?;
        let rgba = match self.format {
            PixelFormat::Rgba8 => self.data.as_ref().clone(),
            PixelFormat::Rgb8 => {
                let mut out = Vec::with_capacity(self.width as usize * self.height as usize * 4);
                for px in self.data.chunks_exact(3) {
                    out.extend_from_slice(&[px[0], px[1], px[2], 255]);
                }
                out
            }
        };
        image::RgbaImage::from_raw(self.width, self.height, rgba)
            .ok_or_else(|| Error::InvalidFrame("rgba conversion failed".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_empty_and_short_buffers() {
        let empty = PixelBuffer::new(vec![], 0, 0, PixelFormat::Rgba8);
        assert!(matches!(empty.validate(), Err(Error::InvalidFrame(_))));

        let short = PixelBuffer::new(vec![0; 10], 2, 2, PixelFormat::Rgba8);
        assert!(matches!(short.validate(), Err(Error::InvalidFrame(_))));

        let ok = PixelBuffer::new(vec![0; 12], 2, 2, PixelFormat::Rgb8);
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn rgb_frames_expand_to_opaque_rgba() {
        let frame = PixelBuffer::new(vec![1, 2, 3, 4, 5, 6], 2, 1, PixelFormat::Rgb8);
        let img = frame.to_rgba_image().unwrap();
        assert_eq!(img.get_pixel(1, 0).0, [4, 5, 6, 255]);
    }

    #[test]
    fn bbox_helpers() {
        let b = BBox::from_cxcywh(20.0, 30.0, 10.0, 20.0);
        assert_eq!(b, BBox::new(15.0, 20.0, 25.0, 40.0));
        assert_eq!(b.area(), 200.0);
        assert!(b.is_valid());
        assert!(!BBox::new(5.0, 5.0, 5.0, 9.0).is_valid());
        assert_eq!(
            BBox::new(-4.0, 2.0, 700.0, 50.0).clamp(640.0, 480.0),
            BBox::new(0.0, 2.0, 640.0, 50.0)
        );
    }
}
