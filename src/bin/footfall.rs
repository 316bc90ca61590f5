// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 客流检测 (Footfall)
///
/// 读取帧图片目录, 按给定帧率驱动检测+跟踪, 把叠加层合成后的帧写入输出目录,
/// 并可选地把每帧轨迹上报到热力图任务。
///
/// 系统架构:
/// 1. 主线程:   时钟 + 消费事件 + 保存结果
/// 2. 循环线程: 跳帧 / 读帧 / 跟踪 / 渲染 / 上报
/// 3. 检测线程: 模型推理
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use ab_glyph::FontArc;
use anyhow::{bail, Context, Result};
use clap::Parser;
use mimalloc::MiMalloc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use retailsense_rs::detection::{Association, MotionModel};
use retailsense_rs::models::ExecutionProvider;
use retailsense_rs::renderer::composite;
use retailsense_rs::{FrameEvent, FrameLoop, ImageSequenceSource, Options, PipelineConfig};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// 客流检测参数
#[derive(Parser, Debug)]
#[command(author, version, about = "客流检测 - 人员检测与跟踪", long_about = None)]
struct Args {
    /// 帧图片目录
    #[arg(short, long)]
    frames: PathBuf,

    /// 输出目录 (合成后的帧)
    #[arg(short, long, default_value = "output")]
    output: PathBuf,

    /// 检测模型路径 (覆盖配置文件)
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// 配置文件 (不存在时自动创建)
    #[arg(short, long, default_value = "retailsense.json")]
    config: PathBuf,

    /// 热力图任务ID (不设置则不上报)
    #[arg(long)]
    job_id: Option<String>,

    /// 任务服务地址
    #[arg(long)]
    api_base: Option<String>,

    /// 取样帧率
    #[arg(long, default_value_t = 30.0)]
    fps: f64,

    /// 每N次取样处理一帧
    #[arg(long)]
    frame_skip: Option<u32>,

    /// 使用合成检测器 (无需模型)
    #[arg(long, default_value_t = false)]
    stub: bool,

    /// 只保留人 (COCO class 0)
    #[arg(long, default_value_t = false)]
    person_only: bool,

    /// 标签字体 (TTF/OTF)
    #[arg(long)]
    font: Option<PathBuf>,

    /// 使用 CUDA 设备
    #[arg(long)]
    cuda: Option<i32>,

    /// 使用匈牙利算法关联
    #[arg(long, default_value_t = false)]
    hungarian: bool,

    /// 启用卡尔曼运动预测
    #[arg(long, default_value_t = false)]
    kalman: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("retailsense_rs=info,footfall=info,ort=warn")),
        )
        .init();

    let args = Args::parse();
    if !(args.fps > 0.0) {
        bail!("--fps must be positive, got {}", args.fps);
    }

    // ========== 配置 ==========
    let mut config = PipelineConfig::load_or_default(&args.config);
    if let Some(model) = &args.model {
        config.detector.model_path = model.clone();
    }
    if args.person_only {
        config.detector.classes = vec![0];
    }
    if let Some(device_id) = args.cuda {
        config.detector.execution_provider = ExecutionProvider::Cuda { device_id };
    }
    if let Some(api_base) = &args.api_base {
        config.telemetry.api_base = api_base.clone();
    }
    if args.hungarian {
        config.tracker.association = Association::Hungarian;
    }
    if args.kalman {
        config.tracker.motion = MotionModel::Kalman;
    }
    // 批处理: 每个处理过的帧都要写出, 不丢事件
    config.frame_loop.wait_for_consumer = true;
    config.validate().context("invalid configuration")?;
    config.log_summary();

    let options = Options {
        use_stub_detection: args.stub,
        frame_skip: args.frame_skip,
    };

    fs::create_dir_all(&args.output)
        .with_context(|| format!("creating output dir {}", args.output.display()))?;

    let source = ImageSequenceSource::open(&args.frames)
        .with_context(|| format!("opening frames dir {}", args.frames.display()))?;
    if source.is_empty() {
        bail!("no frame images found in {}", args.frames.display());
    }
    info!("📹 帧目录: {} ({} 帧)", args.frames.display(), source.len());

    // ========== 启动帧循环 ==========
    let mut frame_loop = FrameLoop::new(config);
    if let Some(path) = &args.font {
        let bytes = fs::read(path).with_context(|| format!("reading font {}", path.display()))?;
        let font = FontArc::try_from_vec(bytes)
            .with_context(|| format!("parsing font {}", path.display()))?;
        frame_loop = frame_loop.with_font(font);
    }

    let clock = crossbeam_channel::tick(Duration::from_secs_f64(1.0 / args.fps));
    let events = frame_loop.start(Box::new(source), clock, args.job_id.clone(), options)?;

    // ========== 消费事件 ==========
    let mut saved = 0u64;
    for event in events.iter() {
        match event {
            FrameEvent::Processed(processed) => {
                let mut image = processed.frame.to_rgba_image()?;
                composite(&mut image, &processed.overlay);
                let path = args
                    .output
                    .join(format!("frame_{:06}.png", processed.frame_index));
                image
                    .save(&path)
                    .with_context(|| format!("saving {}", path.display()))?;
                saved += 1;
                info!(
                    "🎯 frame {}: {} tracks",
                    processed.frame_index,
                    processed.tracks.len()
                );
            }
            FrameEvent::ModelUnavailable(message) => {
                warn!("⚠️ 检测模型不可用, 继续运行但不会有检测结果: {}", message);
            }
            FrameEvent::Finished => break,
        }
    }

    frame_loop.stop();
    info!("✅ 完成, 共保存 {} 帧到 {}", saved, args.output.display());
    Ok(())
}
