// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! ONNX Runtime 后端
//!
//! 模型按 (路径, 执行后端, 线程数) 在进程内只加载一次。并发的首次调用不会重复加载:
//! 一个线程负责加载, 其余线程等待并复用同一实例。加载失败不缓存,
//! 下一个启动周期可以重试。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use once_cell::sync::{Lazy, OnceCell};
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, ExecutionProviderDispatch,
    TensorRTExecutionProvider,
};
use ort::session::{builder::GraphOptimizationLevel, Session};
use tracing::info;

use crate::error::{Error, Result};
use crate::models::ExecutionProvider;

/// 已加载的模型 (只读; ort 的 run 需要独占 session, 所以加锁)
pub struct LoadedModel {
    session: Mutex<Session>,
    input_name: String,
    path: PathBuf,
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("path", &self.path)
            .field("input_name", &self.input_name)
            .finish()
    }
}

impl LoadedModel {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn input_name(&self) -> &str {
        &self.input_name
    }

    /// 执行一次前向传播, 返回第一个输出的 (shape, data)
    pub fn run(&self, shape: [usize; 4], input: Vec<f32>) -> Result<(Vec<usize>, Vec<f32>)> {
        let value = ort::value::Value::from_array((shape.as_slice(), input.into_boxed_slice()))
            .map_err(Error::inference)?;

        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => value])
            .map_err(Error::inference)?;
        let (out_shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(Error::inference)?;

        Ok((
            out_shape.iter().map(|&d| d.max(0) as usize).collect(),
            data.to_vec(),
        ))
    }
}

type Slot = Arc<OnceCell<Arc<LoadedModel>>>;

/// 同一路径换了执行后端或线程数需要新的 session
type ModelKey = (PathBuf, ExecutionProvider, usize);

static REGISTRY: Lazy<Mutex<HashMap<ModelKey, Slot>>> = Lazy::new(|| Mutex::new(HashMap::new()));

fn slot(path: &Path, ep: &ExecutionProvider, intra_threads: usize) -> Slot {
    let mut registry = REGISTRY.lock().unwrap_or_else(PoisonError::into_inner);
    registry
        .entry((path.to_path_buf(), ep.clone(), intra_threads))
        .or_default()
        .clone()
}

/// 获取 (必要时加载) 进程级共享模型
pub fn shared_model(
    path: &Path,
    ep: &ExecutionProvider,
    intra_threads: usize,
) -> Result<Arc<LoadedModel>> {
    slot(path, ep, intra_threads)
        .get_or_try_init(|| load(path, ep, intra_threads).map(Arc::new))
        .cloned()
}

/// 模型是否已在进程内加载 (任一执行后端)
pub fn is_loaded(path: &Path) -> bool {
    let registry = REGISTRY.lock().unwrap_or_else(PoisonError::into_inner);
    registry
        .iter()
        .any(|((p, _, _), slot)| p == path && slot.get().is_some())
}

fn providers(ep: &ExecutionProvider) -> Vec<ExecutionProviderDispatch> {
    match ep {
        ExecutionProvider::Cpu => vec![CPUExecutionProvider::default().build()],
        ExecutionProvider::Cuda { device_id } => vec![
            CUDAExecutionProvider::default()
                .with_device_id(*device_id)
                .build(),
            CPUExecutionProvider::default().build(),
        ],
        ExecutionProvider::TensorRt { device_id } => vec![
            TensorRTExecutionProvider::default()
                .with_device_id(*device_id)
                .build(),
            CUDAExecutionProvider::default()
                .with_device_id(*device_id)
                .build(),
            CPUExecutionProvider::default().build(),
        ],
    }
}

fn load(path: &Path, ep: &ExecutionProvider, intra_threads: usize) -> Result<LoadedModel> {
    if !path.is_file() {
        return Err(Error::model_load(path, "file not found"));
    }

    info!("📦 加载模型: {} ({:?})", path.display(), ep);
    let t = Instant::now();

    let session = Session::builder()
        .map_err(|e| Error::model_load(path, e))?
        .with_execution_providers(providers(ep))
        .map_err(|e| Error::model_load(path, e))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| Error::model_load(path, e))?
        .with_intra_threads(intra_threads.max(1))
        .map_err(|e| Error::model_load(path, e))?
        .commit_from_file(path)
        .map_err(|e| Error::model_load(path, e))?;

    let input_name = session
        .inputs
        .first()
        .map(|i| i.name.clone())
        .ok_or_else(|| Error::model_load(path, "model has no inputs"))?;

    info!(
        "✅ 模型加载成功: input={} ({:.1} ms)",
        input_name,
        t.elapsed().as_secs_f64() * 1000.0
    );

    Ok(LoadedModel {
        session: Mutex::new(session),
        input_name,
        path: path.to_path_buf(),
    })
}
