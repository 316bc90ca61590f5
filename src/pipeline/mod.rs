// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 帧循环 (Frame Loop Driver)
///
/// 双线程架构:
/// - Loop:     取样 → 跳帧 → 读帧 → 检测 → 跟踪 → 渲染 → 上报 (独立线程)
/// - Detector: 模型推理 (独立线程, 见 `worker.rs`)
///
/// 时钟由外部提供 (`crossbeam_channel::tick` 或测试中手动驱动的通道),
/// 每个时钟信号即一次取样。同一时刻最多只有一帧在处理中。
///
/// 状态: Idle → Running (start) → Stopping (stop / drop) → Idle
pub mod source;
pub mod worker;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use ab_glyph::FontArc;
use crossbeam_channel::{bounded, select, Receiver, Sender};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::{Options, PipelineConfig};
use crate::detection::sort::SortTracker;
use crate::detection::tracker::{Track, TrackIdAllocator, Tracker};
use crate::detection::types::{PixelBuffer, TrackBox};
use crate::error::{Error, Result};
use crate::models::{build_detector, Detector, DetectorConfig};
use crate::renderer::{self, OverlayStyle};
use crate::telemetry::{HttpSink, JobReporter, TrackSink};

pub use source::{ImageSequenceSource, VideoSource};
pub use worker::DetectorWorker;

/// 帧循环参数
///
/// 实时显示时消费者落后就丢弃事件; 批处理 (写出每一帧) 时打开 `wait_for_consumer`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub frame_skip: u32,                // 每N次取样处理一帧
    pub detect_timeout_ms: Option<u64>, // 单帧检测超时, None = 不限
    pub event_capacity: usize,          // 事件队列容量
    pub wait_for_consumer: bool,        // 队列满时等待消费者 (批处理), 否则丢弃
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            frame_skip: 2,
            detect_timeout_ms: None,
            event_capacity: 8,
            wait_for_consumer: false,
        }
    }
}

impl LoopConfig {
    pub fn validate(&self) -> Result<()> {
        if self.frame_skip == 0 {
            return Err(Error::Config("loop.frame_skip must be >= 1".into()));
        }
        if self.detect_timeout_ms == Some(0) {
            return Err(Error::Config("loop.detect_timeout_ms must be > 0".into()));
        }
        Ok(())
    }
}

/// 循环状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum LoopStatus {
    Idle = 0,
    Running = 1,
    Stopping = 2,
}

impl LoopStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => LoopStatus::Running,
            2 => LoopStatus::Stopping,
            _ => LoopStatus::Idle,
        }
    }
}

#[derive(Clone, Debug, Default)]
struct StatusCell(Arc<AtomicU8>);

impl StatusCell {
    fn get(&self) -> LoopStatus {
        LoopStatus::from_u8(self.0.load(Ordering::SeqCst))
    }

    fn set(&self, status: LoopStatus) {
        self.0.store(status as u8, Ordering::SeqCst);
    }
}

/// 处理完成的一帧 (循环线程 → 调用方)
#[derive(Clone, Debug)]
pub struct ProcessedFrame {
    /// 取样序号 (从1开始, 含被跳过的取样)
    pub frame_index: u64,
    pub frame: PixelBuffer,
    pub tracks: Vec<TrackBox>,
    /// 透明叠加层, 与帧同尺寸
    pub overlay: RgbaImage,
}

/// 循环事件
#[derive(Clone, Debug)]
pub enum FrameEvent {
    Processed(ProcessedFrame),
    /// 模型不可用 (每个周期最多一次, 唯一对用户可见的错误)
    ModelUnavailable(String),
    /// 视频源已结束 (总会送达, 除非循环被停止)
    Finished,
}

/// 事件投递结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Delivery {
    Sent,
    Dropped,
    Stopped,
}

/// 检测器工厂
pub type DetectorFactory =
    Arc<dyn Fn(&DetectorConfig, &Options) -> Box<dyn Detector> + Send + Sync>;

/// 帧循环
pub struct FrameLoop {
    config: PipelineConfig,
    sink: Arc<dyn TrackSink>,
    font: Option<FontArc>,
    detector_factory: DetectorFactory,

    /// 跨启动周期共享, ID 不会在周期之间重复
    ids: TrackIdAllocator,

    status: StatusCell,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl FrameLoop {
    pub fn new(config: PipelineConfig) -> Self {
        let sink: Arc<dyn TrackSink> = Arc::new(HttpSink::new(&config.telemetry));
        Self {
            config,
            sink,
            font: None,
            detector_factory: Arc::new(build_detector),
            ids: TrackIdAllocator::new(),
            status: StatusCell::default(),
            stop_tx: None,
            handle: None,
        }
    }

    /// 替换上报端
    pub fn with_sink(mut self, sink: Arc<dyn TrackSink>) -> Self {
        self.sink = sink;
        self
    }

    /// 标签字体 (未设置时只画底板)
    pub fn with_font(mut self, font: FontArc) -> Self {
        self.font = Some(font);
        self
    }

    pub fn with_detector_factory(mut self, factory: DetectorFactory) -> Self {
        self.detector_factory = factory;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn status(&self) -> LoopStatus {
        self.status.get()
    }

    /// 下一个周期的轨迹ID从1重新开始
    pub fn reinitialize_ids(&self) {
        self.ids.reinitialize();
    }

    /// 启动循环; 已在运行时先停止再重新启动
    ///
    /// 返回事件接收端
    pub fn start(
        &mut self,
        source: Box<dyn VideoSource>,
        clock: Receiver<Instant>,
        job_id: Option<String>,
        options: Options,
    ) -> Result<Receiver<FrameEvent>> {
        self.config.validate()?;
        let frame_skip = options.effective_frame_skip(&self.config.frame_loop)?;

        if self.status() != LoopStatus::Idle || self.handle.is_some() {
            self.stop();
        }

        let detector = (self.detector_factory)(&self.config.detector, &options);
        let timeout = self.config.frame_loop.detect_timeout_ms.map(Duration::from_millis);
        let worker = DetectorWorker::spawn(detector, timeout)?;

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (events_tx, events_rx) = bounded(self.config.frame_loop.event_capacity.max(1));

        let ctx = LoopContext {
            source,
            clock,
            stop_rx,
            events: events_tx,
            worker,
            tracker: SortTracker::with_allocator(self.config.tracker.clone(), self.ids.clone()),
            reporter: JobReporter::new(self.sink.clone(), self.config.telemetry.queue_capacity),
            job_id,
            frame_skip,
            wait_for_consumer: self.config.frame_loop.wait_for_consumer,
            style: self.config.overlay.clone(),
            font: self.font.clone(),
            status: self.status.clone(),
        };

        info!(
            "🚀 帧循环启动 (跳帧 {}, 检测器 {})",
            frame_skip,
            if options.use_stub_detection { "stub" } else { "onnx" }
        );
        self.status.set(LoopStatus::Running);
        let handle = thread::Builder::new()
            .name("frame-loop".into())
            .spawn(move || ctx.run());
        match handle {
            Ok(handle) => {
                self.stop_tx = Some(stop_tx);
                self.handle = Some(handle);
                Ok(events_rx)
            }
            Err(e) => {
                self.status.set(LoopStatus::Idle);
                Err(e.into())
            }
        }
    }

    /// 停止循环并等待线程退出 (同步)
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if self.status() == LoopStatus::Running {
                self.status.set(LoopStatus::Stopping);
            }
            // 释放发送端即发出停止信号
            self.stop_tx.take();
            if handle.join().is_err() {
                error!("❌ 帧循环线程异常退出");
            }
            info!("🛑 帧循环已停止");
        }
        self.status.set(LoopStatus::Idle);
    }
}

impl Drop for FrameLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

/// 循环线程持有的全部状态
struct LoopContext {
    source: Box<dyn VideoSource>,
    clock: Receiver<Instant>,
    stop_rx: Receiver<()>,
    events: Sender<FrameEvent>,
    worker: DetectorWorker,
    tracker: SortTracker,
    reporter: JobReporter,
    job_id: Option<String>,
    frame_skip: u32,
    wait_for_consumer: bool,
    style: OverlayStyle,
    font: Option<FontArc>,
    status: StatusCell,
}

/// 吞吐统计 (约每秒输出一次)
struct LoopStats {
    processed: u64,
    detect_ms: f64,
    track_ms: f64,
    last: Instant,
}

impl LoopStats {
    fn new() -> Self {
        Self {
            processed: 0,
            detect_ms: 0.0,
            track_ms: 0.0,
            last: Instant::now(),
        }
    }

    fn record(&mut self, detect_ms: f64, track_ms: f64) {
        self.processed += 1;
        self.detect_ms += detect_ms;
        self.track_ms += track_ms;
        let elapsed = self.last.elapsed().as_secs_f64();
        if elapsed >= 1.0 {
            let n = self.processed as f64;
            debug!(
                "📊 {:.1} fps | detect {:.1} ms | track {:.2} ms",
                n / elapsed,
                self.detect_ms / n,
                self.track_ms / n
            );
            *self = Self::new();
        }
    }
}

impl LoopContext {
    /// 投递事件; 等待模式下阻塞到消费者取走或收到停止信号
    fn emit(&self, event: FrameEvent, wait: bool) -> Delivery {
        if !wait {
            return match self.events.try_send(event) {
                Ok(()) => Delivery::Sent,
                Err(_) => Delivery::Dropped,
            };
        }
        select! {
            send(self.events, event) -> res => match res {
                Ok(()) => Delivery::Sent,
                Err(_) => Delivery::Dropped,
            },
            recv(self.stop_rx) -> _ => Delivery::Stopped,
        }
    }

    fn run(mut self) {
        let mut sample: u64 = 0;
        let mut dropped: u64 = 0;
        let mut stats = LoopStats::new();

        loop {
            // 等待下一次取样或停止信号
            select! {
                recv(self.stop_rx) -> _ => break,
                recv(self.clock) -> tick => if tick.is_err() {
                    debug!("clock closed");
                    break;
                },
            }
            if self.status.get() != LoopStatus::Running {
                break;
            }

            sample += 1;
            if self.source.is_finished() {
                info!("📼 视频源已结束");
                if self.emit(FrameEvent::Finished, true) != Delivery::Sent {
                    debug!("finished event not delivered");
                }
                break;
            }

            // 画面照常播放, 跳过的取样同样消耗一帧
            if sample % self.frame_skip as u64 != 0 {
                self.source.skip_frame();
                continue;
            }

            let frame = match self.source.read_frame().and_then(|f| f.validate().map(|_| f)) {
                Ok(frame) => frame,
                Err(e) => {
                    debug!("sample {} skipped: {}", sample, e);
                    continue;
                }
            };

            let t = Instant::now();
            let detections = match self.worker.detect(frame.clone(), &self.stop_rx) {
                None => break,
                Some(Ok(detections)) => detections,
                Some(Err(e @ Error::ModelLoad { .. })) => {
                    error!("❌ {}", e);
                    let event = FrameEvent::ModelUnavailable(e.to_string());
                    match self.emit(event, self.wait_for_consumer) {
                        Delivery::Stopped => break,
                        Delivery::Dropped => dropped += 1,
                        Delivery::Sent => {}
                    }
                    Vec::new()
                }
                Some(Err(Error::InvalidFrame(reason))) => {
                    debug!("sample {} skipped: {}", sample, reason);
                    continue;
                }
                Some(Err(e)) => {
                    warn!("⚠️ sample {}: {}", sample, e);
                    Vec::new()
                }
            };
            let detect_ms = t.elapsed().as_secs_f64() * 1000.0;

            // 检测期间被要求停止: 丢弃结果
            if self.status.get() != LoopStatus::Running {
                break;
            }

            let t = Instant::now();
            let tracks: Vec<TrackBox> = self
                .tracker
                .update(&detections)
                .iter()
                .map(Track::to_box)
                .collect();
            let track_ms = t.elapsed().as_secs_f64() * 1000.0;

            let mut overlay = RgbaImage::new(frame.width, frame.height);
            renderer::render(&tracks, &mut overlay, &self.style, self.font.as_ref());

            self.reporter.report(self.job_id.as_deref(), &tracks);

            let event = FrameEvent::Processed(ProcessedFrame {
                frame_index: sample,
                frame,
                tracks,
                overlay,
            });
            match self.emit(event, self.wait_for_consumer) {
                Delivery::Sent => {}
                Delivery::Dropped => {
                    dropped += 1;
                    debug!("event queue full, frame {} dropped", sample);
                }
                Delivery::Stopped => break,
            }
            stats.record(detect_ms, track_ms);
        }

        if dropped > 0 {
            warn!("⚠️ 事件队列已满, 共丢弃 {} 个事件", dropped);
        }
        self.status.set(LoopStatus::Idle);
    }
}
