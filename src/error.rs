// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 错误类型 (Error taxonomy)
//!
//! 只有 `ModelLoad` 会暴露给用户, 其余错误都在单帧内降级处理, 循环继续运行。

use std::path::PathBuf;

/// 管线错误
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// 模型文件无法获取或初始化
    #[error("model load failed ({path}): {reason}")]
    ModelLoad { path: PathBuf, reason: String },

    /// 推理计算失败 (或超时)
    #[error("inference failed: {0}")]
    Inference(String),

    /// 遥测上报失败 (只记录, 不传播)
    #[error("telemetry failed: {0}")]
    Telemetry(String),

    /// 帧缓冲区不可用 (尺寸为0 / 长度不匹配 / 读取失败)
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// 配置非法
    #[error("invalid config: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn model_load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::ModelLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn inference(reason: impl ToString) -> Self {
        Error::Inference(reason.to_string())
    }

    /// 是否为用户可见错误
    pub fn is_user_visible(&self) -> bool {
        matches!(self, Error::ModelLoad { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_model_load_is_user_visible() {
        assert!(Error::model_load("m.onnx", "missing").is_user_visible());
        assert!(!Error::inference("boom").is_user_visible());
        assert!(!Error::Telemetry("503".into()).is_user_visible());
        assert!(!Error::InvalidFrame("0x0".into()).is_user_visible());
    }

    #[test]
    fn model_load_message_names_the_path() {
        let msg = Error::model_load("models/yolov8n.onnx", "not found").to_string();
        assert!(msg.contains("models/yolov8n.onnx"));
        assert!(msg.contains("not found"));
    }
}
