// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 检测工作线程
//! 职责: 接收帧 → 检测 → 返回结果 (每次只处理一帧)
//!
//! 帧循环等待结果、停止信号或超时三者中最先到达的一个。
//! 被放弃的结果按序号丢弃; 工作线程还在处理被放弃的帧时拒绝新帧。

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{after, bounded, never, select, Receiver, Sender, TrySendError};
use tracing::{debug, warn};

use crate::detection::types::{Detection, PixelBuffer};
use crate::error::{Error, Result};
use crate::models::Detector;

type Job = (u64, PixelBuffer);
type Outcome = (u64, Result<Vec<Detection>>);

pub struct DetectorWorker {
    req_tx: Option<Sender<Job>>,
    res_rx: Receiver<Outcome>,
    handle: Option<JoinHandle<()>>,
    timeout: Option<Duration>,
    seq: u64,

    /// 已放弃但工作线程仍在处理的请求序号
    abandoned: Option<u64>,
}

impl DetectorWorker {
    pub fn spawn(mut detector: Box<dyn Detector>, timeout: Option<Duration>) -> Result<Self> {
        let (req_tx, req_rx) = bounded::<Job>(1);
        let (res_tx, res_rx) = bounded::<Outcome>(1);

        let name = detector.name().to_string();
        let handle = thread::Builder::new()
            .name(format!("detector-{}", name))
            .spawn(move || {
                debug!("🔍 检测线程启动 ({})", detector.name());
                for (seq, frame) in req_rx {
                    let result = detector.detect(&frame);
                    if res_tx.send((seq, result)).is_err() {
                        break;
                    }
                }
                debug!("检测线程退出");
            })?;

        Ok(Self {
            req_tx: Some(req_tx),
            res_rx,
            handle: Some(handle),
            timeout,
            seq: 0,
            abandoned: None,
        })
    }

    /// 检测一帧
    ///
    /// 返回 `None` 表示等待期间收到停止信号, 结果被丢弃
    pub fn detect(
        &mut self,
        frame: PixelBuffer,
        stop: &Receiver<()>,
    ) -> Option<Result<Vec<Detection>>> {
        // 清理迟到的结果
        while let Ok((seq, _)) = self.res_rx.try_recv() {
            if self.abandoned == Some(seq) {
                debug!("discarding late detection result #{}", seq);
                self.abandoned = None;
            }
        }
        if let Some(seq) = self.abandoned {
            return Some(Err(Error::inference(format!(
                "detector still busy with abandoned frame #{}",
                seq
            ))));
        }

        self.seq += 1;
        let seq = self.seq;
        let Some(req_tx) = self.req_tx.as_ref() else {
            return Some(Err(Error::inference("detector worker closed")));
        };
        match req_tx.try_send((seq, frame)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                return Some(Err(Error::inference("detector busy")));
            }
            Err(TrySendError::Disconnected(_)) => {
                return Some(Err(Error::inference("detector worker exited")));
            }
        }

        let deadline = match self.timeout {
            Some(t) => after(t),
            None => never(),
        };
        loop {
            select! {
                recv(self.res_rx) -> msg => match msg {
                    Ok((got, result)) if got == seq => return Some(result),
                    Ok(_) => continue,
                    Err(_) => return Some(Err(Error::inference("detector worker exited"))),
                },
                recv(stop) -> _ => {
                    self.abandoned = Some(seq);
                    return None;
                },
                recv(deadline) -> _ => {
                    self.abandoned = Some(seq);
                    warn!("⚠️ detection #{} timed out", seq);
                    return Some(Err(Error::inference(format!(
                        "detection timed out after {:?}",
                        self.timeout.unwrap_or_default()
                    ))));
                },
            }
        }
    }
}

impl Drop for DetectorWorker {
    /// 关闭请求通道并等待进行中的检测完成
    fn drop(&mut self) {
        self.req_tx.take();
        // 同一时刻最多一个请求, 排空后结果通道一定有空位
        while self.res_rx.try_recv().is_ok() {}
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
