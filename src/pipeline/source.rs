// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 视频源
//!
//! 视频按时钟播放: 每次取样画面都前进一帧, 被跳过的取样也一样。
//! 帧循环只在需要处理时读取当前帧。

use std::fs;
use std::path::{Path, PathBuf};

use crate::detection::types::PixelBuffer;
use crate::error::{Error, Result};

/// 视频源: 按需提供当前解码帧
pub trait VideoSource: Send {
    /// 读取当前帧并前进; 读取失败返回 `InvalidFrame`
    fn read_frame(&mut self) -> Result<PixelBuffer>;

    /// 取样被跳过时调用, 丢弃当前帧
    ///
    /// 实时画面自己会前进, 默认什么都不做
    fn skip_frame(&mut self) {}

    /// 视频是否已结束
    fn is_finished(&self) -> bool;
}

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

/// 图片序列源 (目录下的帧图片, 按文件名排序)
pub struct ImageSequenceSource {
    files: Vec<PathBuf>,
    cursor: usize,
}

impl ImageSequenceSource {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let mut files: Vec<PathBuf> = fs::read_dir(dir.as_ref())?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();
        Ok(Self::from_files(files))
    }

    pub fn from_files(files: Vec<PathBuf>) -> Self {
        Self { files, cursor: 0 }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// 下一次 read_frame 将读取的文件
    pub fn current_path(&self) -> Option<&Path> {
        self.files.get(self.cursor).map(PathBuf::as_path)
    }
}

impl VideoSource for ImageSequenceSource {
    fn read_frame(&mut self) -> Result<PixelBuffer> {
        let path = self
            .files
            .get(self.cursor)
            .cloned()
            .ok_or_else(|| Error::InvalidFrame("end of sequence".into()))?;
        self.cursor += 1;

        let img = image::open(&path)
            .map_err(|e| Error::InvalidFrame(format!("{}: {}", path.display(), e)))?;
        Ok(PixelBuffer::from_rgba(img.to_rgba8()))
    }

    fn skip_frame(&mut self) {
        if self.cursor < self.files.len() {
            self.cursor += 1;
        }
    }

    fn is_finished(&self) -> bool {
        self.cursor >= self.files.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn reads_images_in_name_order_and_skips_other_files() {
        let dir = tempfile::tempdir().unwrap();
        RgbaImage::from_pixel(4, 2, Rgba([1, 2, 3, 255]))
            .save(dir.path().join("frame_002.png"))
            .unwrap();
        RgbaImage::from_pixel(2, 2, Rgba([9, 9, 9, 255]))
            .save(dir.path().join("frame_001.png"))
            .unwrap();
        fs::write(dir.path().join("notes.txt"), "not a frame").unwrap();

        let mut source = ImageSequenceSource::open(dir.path()).unwrap();
        assert_eq!(source.len(), 2);

        let first = source.read_frame().unwrap();
        assert_eq!((first.width, first.height), (2, 2));
        let second = source.read_frame().unwrap();
        assert_eq!((second.width, second.height), (4, 2));
        assert_eq!(&second.data[..4], &[1, 2, 3, 255]);
        assert!(source.is_finished());
        assert!(matches!(source.read_frame(), Err(Error::InvalidFrame(_))));
    }

    #[test]
    fn skipped_frames_are_not_read_later() {
        let dir = tempfile::tempdir().unwrap();
        for v in 1..=4u8 {
            RgbaImage::from_pixel(2, 2, Rgba([v, v, v, 255]))
                .save(dir.path().join(format!("frame_{:03}.png", v)))
                .unwrap();
        }
        let mut source = ImageSequenceSource::open(dir.path()).unwrap();

        source.skip_frame();
        assert_eq!(source.read_frame().unwrap().data[0], 2);
        source.skip_frame();
        assert!(source.current_path().unwrap().ends_with("frame_004.png"));
        assert_eq!(source.read_frame().unwrap().data[0], 4);
        assert!(source.is_finished());

        // 结束后继续跳过不会越界
        source.skip_frame();
        assert!(source.is_finished());
        assert!(source.current_path().is_none());
    }

    #[test]
    fn unreadable_image_is_an_invalid_frame() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("broken.png");
        fs::write(&bad, b"garbage").unwrap();
        let mut source = ImageSequenceSource::from_files(vec![bad]);
        assert!(matches!(source.read_frame(), Err(Error::InvalidFrame(_))));
        assert!(source.is_finished());
    }
}
