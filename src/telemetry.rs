// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 遥测上报 (fire-and-forget)
//!
//! `POST {api_base}/heatmap_jobs/{job_id}/detections`
//! body: `{"detections":[{"id","x1","y1","x2","y2"}, ...]}`
//!
//! 上报在后台线程执行, 失败只记录 debug 日志, 不重试, 不阻塞帧循环。

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::detection::types::TrackBox;
use crate::error::{Error, Result};

/// 上报参数配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub api_base: String,
    pub timeout_ms: u64,
    pub queue_capacity: usize, // 待发送队列, 满则丢弃
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:5000/api".to_string(),
            timeout_ms: 2000,
            queue_capacity: 16,
        }
    }
}

/// 上报负载
#[derive(Debug, Serialize)]
pub struct DetectionsPayload<'a> {
    pub detections: &'a [TrackBox],
}

/// 轨迹数据接收端
pub trait TrackSink: Send + Sync {
    fn send(&self, job_id: &str, tracks: &[TrackBox]) -> Result<()>;
}

/// HTTP 上报
pub struct HttpSink {
    agent: ureq::Agent,
    api_base: String,
}

impl HttpSink {
    pub fn new(config: &TelemetryConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build();
        Self {
            agent,
            api_base: config.api_base.trim_end_matches('/').to_string(),
        }
    }

    pub fn endpoint(&self, job_id: &str) -> String {
        format!("{}/heatmap_jobs/{}/detections", self.api_base, job_id)
    }
}

impl TrackSink for HttpSink {
    fn send(&self, job_id: &str, tracks: &[TrackBox]) -> Result<()> {
        let body = serde_json::to_string(&DetectionsPayload { detections: tracks })?;
        self.agent
            .post(&self.endpoint(job_id))
            .set("Content-Type", "application/json")
            .send_string(&body)
            .map_err(|e| Error::Telemetry(e.to_string()))?;
        Ok(())
    }
}

struct Report {
    job_id: String,
    tracks: Vec<TrackBox>,
}

/// 后台上报器
///
/// `report` 只做 `try_send`; 队列满时丢弃本帧。发送线程在上报器
/// 释放后把剩余队列发完自行退出, 不被等待。
pub struct JobReporter {
    tx: Sender<Report>,
}

impl JobReporter {
    pub fn new(sink: Arc<dyn TrackSink>, queue_capacity: usize) -> Self {
        let (tx, rx) = bounded::<Report>(queue_capacity.max(1));
        let spawned = thread::Builder::new()
            .name("telemetry".into())
            .spawn(move || {
                for report in rx {
                    if let Err(e) = sink.send(&report.job_id, &report.tracks) {
                        debug!("telemetry dropped for job {}: {}", report.job_id, e);
                    }
                }
            });
        if let Err(e) = spawned {
            debug!("telemetry thread not started: {}", e);
        }
        Self { tx }
    }

    /// 提交一帧轨迹; 返回是否入队
    ///
    /// 没有 job id 或轨迹为空时不上报
    pub fn report(&self, job_id: Option<&str>, tracks: &[TrackBox]) -> bool {
        let Some(job_id) = job_id else {
            return false;
        };
        if tracks.is_empty() {
            return false;
        }
        match self.tx.try_send(Report {
            job_id: job_id.to_string(),
            tracks: tracks.to_vec(),
        }) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                trace!("telemetry queue full, frame dropped");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::Receiver;

    struct Recording(Sender<(String, Vec<TrackBox>)>);

    impl TrackSink for Recording {
        fn send(&self, job_id: &str, tracks: &[TrackBox]) -> Result<()> {
            let _ = self.0.send((job_id.to_string(), tracks.to_vec()));
            Ok(())
        }
    }

    fn recording() -> (Arc<dyn TrackSink>, Receiver<(String, Vec<TrackBox>)>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Arc::new(Recording(tx)), rx)
    }

    fn one_track() -> Vec<TrackBox> {
        vec![TrackBox {
            id: 7,
            x1: 1.0,
            y1: 2.0,
            x2: 3.0,
            y2: 4.0,
        }]
    }

    #[test]
    fn payload_matches_wire_format() {
        let tracks = one_track();
        let json = serde_json::to_value(DetectionsPayload { detections: &tracks }).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"detections":[{"id":7,"x1":1.0,"y1":2.0,"x2":3.0,"y2":4.0}]})
        );
    }

    #[test]
    fn endpoint_joins_base_and_job() {
        let sink = HttpSink::new(&TelemetryConfig {
            api_base: "http://host:5000/api/".into(),
            ..Default::default()
        });
        assert_eq!(
            sink.endpoint("job-42"),
            "http://host:5000/api/heatmap_jobs/job-42/detections"
        );
    }

    #[test]
    fn skips_without_job_or_tracks() {
        let (sink, rx) = recording();
        let reporter = JobReporter::new(sink, 4);
        assert!(!reporter.report(None, &one_track()));
        assert!(!reporter.report(Some("j"), &[]));
        assert!(reporter.report(Some("j"), &one_track()));

        let (job, tracks) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(job, "j");
        assert_eq!(tracks, one_track());
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn unreachable_endpoint_is_a_telemetry_error() {
        let sink = HttpSink::new(&TelemetryConfig {
            api_base: "http://127.0.0.1:9".into(),
            timeout_ms: 200,
            ..Default::default()
        });
        assert!(matches!(
            sink.send("j", &one_track()),
            Err(Error::Telemetry(_))
        ));
    }
}
