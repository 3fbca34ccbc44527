// 该文件是 Laobao （劳保） 项目的一部分。
// src/task.rs - 合规检测流水线
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{
  path::PathBuf,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
};

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  compliance::{ComplianceEngine, Evaluation},
  frame::Frame,
  input::{SourceDescriptor, VideoIo},
  label::RequiredItems,
  model::{DetectorAdapter, Model},
  output::Annotator,
};

mod session;
pub use self::session::StreamSession;

/// 协作式停止标志，每帧开始前检查一次
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn stop(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_stopped(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("视频文件不存在: {}\n- 请检查路径是否正确", .path.display())]
  SourceNotFound { path: PathBuf },
  #[error("无法打开{origin}: {reason}\n- {hint}")]
  SourceOpen {
    origin: String,
    reason: String,
    hint: &'static str,
  },
  #[error("{origin} 没有产出任何帧\n- 请确认视频未损坏且包含画面")]
  EmptyStream { origin: String },
  #[error("无法创建导出视频 {}: {reason}\n- 请确认目录可写且编码器可用", .path.display())]
  ExportInit { path: PathBuf, reason: String },
  #[error("写入导出视频 {} 失败: {reason}", .path.display())]
  ExportWrite { path: PathBuf, reason: String },
  #[error("推理失败: {0}")]
  Inference(String),
}

/// 流水线每处理一帧产出的结果
#[derive(Debug, Clone)]
pub struct ProcessedFrame {
  /// 已标注的 RGB 图像
  pub image: RgbImage,
  /// 本帧推理的瞬时帧率
  pub fps: f32,
  /// 帧序号，从 1 开始
  pub index: u64,
  pub evaluation: Evaluation,
}

/// 合规检测任务：模型、判定规则、绘制方式与采集设施
pub struct ComplianceTask<M, V> {
  detector: DetectorAdapter<M>,
  engine: ComplianceEngine,
  annotator: Annotator,
  io: V,
  max_frames: Option<u64>,
}

impl<M: Model, V: VideoIo> ComplianceTask<M, V> {
  pub fn new(model: M, required: RequiredItems, io: V) -> Self {
    Self {
      detector: DetectorAdapter::new(model),
      engine: ComplianceEngine::new(required),
      annotator: Annotator::default(),
      io,
      max_frames: None,
    }
  }

  pub fn with_annotator(mut self, annotator: Annotator) -> Self {
    self.annotator = annotator;
    self
  }

  /// 处理指定帧数后结束，`None` 表示不限制
  pub fn with_max_frames(mut self, max_frames: Option<u64>) -> Self {
    self.max_frames = max_frames.filter(|n| *n > 0);
    self
  }

  pub fn engine(&self) -> &ComplianceEngine {
    &self.engine
  }

  pub fn io(&self) -> &V {
    &self.io
  }

  /// 创建新的检测流；视频源在第一次调用 `next` 时才打开
  pub fn run(
    &self,
    source: SourceDescriptor,
    export: Option<PathBuf>,
    stop: StopFlag,
  ) -> DetectionStream<'_, M, V> {
    DetectionStream {
      task: self,
      stop,
      origin: source.to_string(),
      state: StreamState::Idle { source, export },
    }
  }

  fn process(
    &self,
    session: &mut StreamSession<V::Capture, V::Writer>,
    mut frame: Frame,
  ) -> Result<ProcessedFrame, TaskError> {
    let inference = self
      .detector
      .infer(&frame)
      .map_err(|e| TaskError::Inference(e.to_string()))?;
    let fps = inference.fps();
    let evaluation = self.engine.evaluate(&inference.detections);
    self.annotator.annotate(&mut frame, &evaluation);
    session.write_frame(&frame)?;

    let index = session.advance(fps);
    debug!(
      "第 {} 帧: {} 名工人, {} 名不合规, {} 个物品, {:.1} FPS",
      index,
      evaluation.workers.len(),
      evaluation.unsafe_count(),
      evaluation.items.len(),
      fps
    );

    Ok(ProcessedFrame {
      image: frame.into_display(),
      fps,
      index,
      evaluation,
    })
  }
}

enum StreamState<V: VideoIo> {
  Idle {
    source: SourceDescriptor,
    export: Option<PathBuf>,
  },
  Running(StreamSession<V::Capture, V::Writer>),
  Closed,
}

/// 逐帧产出标注结果的有限流
///
/// 读取失败时：尚未产出任何帧则返回 [`TaskError::EmptyStream`]，否则视为正常结束。
/// 提前丢弃流等同于取消，所有资源随之释放。
pub struct DetectionStream<'a, M: Model, V: VideoIo> {
  task: &'a ComplianceTask<M, V>,
  stop: StopFlag,
  origin: String,
  state: StreamState<V>,
}

impl<M: Model, V: VideoIo> DetectionStream<'_, M, V> {
  pub fn stop_flag(&self) -> &StopFlag {
    &self.stop
  }

  pub fn is_closed(&self) -> bool {
    matches!(self.state, StreamState::Closed)
  }

  fn close(&mut self) {
    let state = std::mem::replace(&mut self.state, StreamState::Closed);
    if let StreamState::Running(mut session) = state {
      session.close();
    }
  }

  fn step(&mut self) -> Option<Result<ProcessedFrame, TaskError>> {
    let task = self.task;
    let StreamState::Running(session) = &mut self.state else {
      return None;
    };

    if self.stop.is_stopped() {
      info!("收到停止请求，结束处理");
      self.close();
      return None;
    }

    if let Some(max_frames) = task.max_frames
      && session.frames() >= max_frames
    {
      info!("达到指定帧数 {}, 结束处理", max_frames);
      self.close();
      return None;
    }

    let frame = match session.read_frame() {
      Ok(Some(frame)) => Some(frame),
      Ok(None) => None,
      Err(e) => {
        warn!("读取帧失败: {}", e);
        None
      }
    };

    let Some(frame) = frame else {
      let frames = session.frames();
      self.close();
      if frames == 0 {
        return Some(Err(TaskError::EmptyStream {
          origin: self.origin.clone(),
        }));
      }
      info!("视频流结束");
      return None;
    };

    match task.process(session, frame) {
      Ok(processed) => Some(Ok(processed)),
      Err(e) => {
        self.close();
        Some(Err(e))
      }
    }
  }
}

impl<M: Model, V: VideoIo> Iterator for DetectionStream<'_, M, V> {
  type Item = Result<ProcessedFrame, TaskError>;

  fn next(&mut self) -> Option<Self::Item> {
    let state = std::mem::replace(&mut self.state, StreamState::Closed);
    match state {
      StreamState::Idle { source, export } => {
        match StreamSession::open(&self.task.io, source, export) {
          Ok(session) => {
            self.state = StreamState::Running(session);
            self.step()
          }
          Err(e) => Some(Err(e)),
        }
      }
      running @ StreamState::Running(_) => {
        self.state = running;
        self.step()
      }
      StreamState::Closed => None,
    }
  }
}

impl<M: Model, V: VideoIo> Drop for DetectionStream<'_, M, V> {
  fn drop(&mut self) {
    if matches!(self.state, StreamState::Running(_)) {
      info!("检测流被提前丢弃，释放资源");
    }
    self.close();
  }
}
