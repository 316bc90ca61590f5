// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 管线配置 - 通过JSON文件调整参数

use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::detection::sort::SortConfig;
use crate::error::{Error, Result};
use crate::models::DetectorConfig;
use crate::pipeline::LoopConfig;
use crate::renderer::OverlayStyle;
use crate::telemetry::TelemetryConfig;

/// 全部参数 (检测 / 跟踪 / 帧循环 / 上报 / 叠加层)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub detector: DetectorConfig,
    pub tracker: SortConfig,
    #[serde(rename = "loop")]
    pub frame_loop: LoopConfig,
    pub telemetry: TelemetryConfig,
    pub overlay: OverlayStyle,
}

impl PipelineConfig {
    /// 从JSON文件加载配置 (文件不存在或格式错误都返回错误)
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = serde_json::from_str(&json)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        info!("✅ 配置已从 {} 加载", path.display());
        Ok(config)
    }

    /// 加载配置, 文件不存在时写入默认配置; 解析失败时使用默认值
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            info!("📝 配置文件不存在,创建默认配置...");
            let config = Self::default();
            if let Err(e) = config.save(path) {
                warn!("❌ 保存配置失败: {}", e);
            }
            return config;
        }
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!("⚠️  配置文件解析失败: {:#}, 使用默认值", e);
                Self::default()
            }
        }
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json)?;
        info!("💾 配置已保存到 {}", path.as_ref().display());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.detector.validate()?;
        self.tracker.validate()?;
        self.frame_loop.validate()?;
        Ok(())
    }

    /// 打印当前配置
    pub fn log_summary(&self) {
        info!("🎛️  当前管线配置:");
        info!(
            "  检测: conf {:.2} / nms {:.2} / 输入 {}",
            self.detector.conf_threshold, self.detector.nms_threshold, self.detector.input_size
        );
        info!(
            "  跟踪: iou {:.2} / 最大丢失 {} / {:?} / {:?}",
            self.tracker.match_iou_threshold,
            self.tracker.max_age,
            self.tracker.association,
            self.tracker.motion
        );
        info!("  跳帧: {}", self.frame_loop.frame_skip);
    }
}

/// 单次启动的选项
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Options {
    /// 使用合成检测器代替模型
    pub use_stub_detection: bool,
    /// 覆盖配置中的跳帧间隔
    pub frame_skip: Option<u32>,
}

impl Options {
    pub fn stub() -> Self {
        Self {
            use_stub_detection: true,
            ..Default::default()
        }
    }

    /// 实际生效的跳帧间隔
    pub fn effective_frame_skip(&self, config: &LoopConfig) -> Result<u32> {
        match self.frame_skip.unwrap_or(config.frame_skip) {
            0 => Err(Error::Config("frame_skip must be >= 1".into())),
            n => Ok(n),
        }
    }
}
