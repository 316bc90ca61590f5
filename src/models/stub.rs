// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 合成检测器: 每帧输出一个固定比例的框, 用于无模型环境下联调

use super::Detector;
use crate::detection::types::{BBox, Detection, PixelBuffer};
use crate::error::Result;

#[derive(Debug, Default)]
pub struct StubDetector;

impl StubDetector {
    pub fn new() -> Self {
        Self
    }
}

impl Detector for StubDetector {
    fn detect(&mut self, frame: &PixelBuffer) -> Result<Vec<Detection>> {
        frame.validate()?;
        let (w, h) = (frame.width as f32, frame.height as f32);
        let bbox = BBox::new(0.3 * w, 0.3 * h, 0.6 * w, 0.7 * h);
        Ok(vec![Detection::new(bbox, 1.0, 0)])
    }

    fn name(&self) -> &str {
        "stub"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::types::PixelFormat;
    use crate::error::Error;

    #[test]
    fn box_scales_with_frame() {
        let frame = PixelBuffer::new(vec![0; 100 * 50 * 4], 100, 50, PixelFormat::Rgba8);
        let dets = StubDetector::new().detect(&frame).unwrap();
        assert_eq!(dets.len(), 1);
        let b = dets[0].bbox;
        for (got, want) in [(b.x1, 30.0), (b.y1, 15.0), (b.x2, 60.0), (b.y2, 35.0)] {
            assert!((got - want).abs() < 1e-3, "{got} != {want}");
        }
        assert_eq!(dets[0].class_id, 0);
    }

    #[test]
    fn rejects_invalid_frame() {
        let frame = PixelBuffer::new(vec![], 0, 0, PixelFormat::Rgba8);
        assert!(matches!(
            StubDetector::new().detect(&frame),
            Err(Error::InvalidFrame(_))
        ));
    }
}
