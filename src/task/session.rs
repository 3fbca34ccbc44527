// 该文件是 Laobao （劳保） 项目的一部分。
// src/task/session.rs - 单次运行持有的资源
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
  io::Write,
  path::{Path, PathBuf},
};

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::{
  frame::Frame,
  input::{CameraBackend, Capture, CaptureError, SourceDescriptor, VideoIo},
  output::{FrameWriter, VideoSpec},
  task::TaskError,
};

const CAMERA_HINT: &str = "请确认摄像头已连接、编号正确且未被其他程序占用";
const FILE_HINT: &str = "请确认文件为可解码的视频或图像 (mp4/avi/mkv/webm/png/jpg)";
const UPLOAD_PREFIX: &str = "laobao-upload-";

/// 一次运行持有的采集句柄、输出写入器与临时文件
///
/// [`StreamSession::close`] 可重复调用，资源只释放一次；
/// 未显式关闭时在销毁时释放。
pub struct StreamSession<C: Capture, W: FrameWriter> {
  capture: Option<C>,
  writer: Option<W>,
  export_path: Option<PathBuf>,
  upload: Option<NamedTempFile>,
  frames: u64,
  fps: f32,
}

impl<C: Capture, W: FrameWriter> StreamSession<C, W> {
  /// 打开视频源，需要时创建输出写入器
  pub fn open<V>(io: &V, source: SourceDescriptor, export: Option<PathBuf>) -> Result<Self, TaskError>
  where
    V: VideoIo<Capture = C, Writer = W>,
  {
    info!("打开视频源: {}", source);
    let (capture, upload) = match source {
      SourceDescriptor::Camera(index) => (open_camera(io, index)?, None),
      SourceDescriptor::File(path) => {
        if !path.exists() {
          return Err(TaskError::SourceNotFound { path });
        }
        let capture = io.open_file(&path).map_err(|e| TaskError::SourceOpen {
          origin: format!("视频文件 {}", path.display()),
          reason: e.to_string(),
          hint: FILE_HINT,
        })?;
        (capture, None)
      }
      SourceDescriptor::Bytes { data, file_name } => {
        let (capture, upload) = open_upload(io, &data, file_name.as_deref())?;
        (capture, Some(upload))
      }
    };
    info!(
      "视频源已打开: {}x{}, 帧率 {}",
      capture.width(),
      capture.height(),
      capture
        .fps()
        .map_or("未知".to_string(), |fps| format!("{:.2}", fps))
    );

    let mut session = Self {
      capture: Some(capture),
      writer: None,
      export_path: None,
      upload,
      frames: 0,
      fps: 0.0,
    };

    // 失败时 session 被销毁，已打开的源随之释放
    if let Some(path) = export {
      session.attach_writer(io, path)?;
    }
    Ok(session)
  }

  fn attach_writer<V>(&mut self, io: &V, path: PathBuf) -> Result<(), TaskError>
  where
    V: VideoIo<Capture = C, Writer = W>,
  {
    let export_error = |reason: String| TaskError::ExportInit {
      path: path.clone(),
      reason,
    };

    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent).map_err(|e| export_error(e.to_string()))?;
    }

    let Some(capture) = self.capture.as_ref() else {
      return Err(export_error("视频源已关闭".to_string()));
    };
    let spec = VideoSpec::new(capture.width(), capture.height(), capture.fps());
    let writer = io
      .create_writer(&path, spec)
      .map_err(|e| export_error(e.to_string()))?;
    info!(
      "导出视频: {} ({}x{} @ {:.2} fps)",
      path.display(),
      spec.width,
      spec.height,
      spec.fps
    );

    self.writer = Some(writer);
    self.export_path = Some(path);
    Ok(())
  }

  /// `Ok(None)` 表示流已结束或已关闭
  pub fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
    match self.capture.as_mut() {
      Some(capture) => capture.read_frame(),
      None => Ok(None),
    }
  }

  pub fn write_frame(&mut self, frame: &Frame) -> Result<(), TaskError> {
    let Some(writer) = self.writer.as_mut() else {
      return Ok(());
    };
    writer.write_frame(frame).map_err(|e| TaskError::ExportWrite {
      path: self.export_path.clone().unwrap_or_default(),
      reason: e.to_string(),
    })
  }

  /// 记录一帧处理完成，返回帧序号（从 1 开始）
  pub fn advance(&mut self, fps: f32) -> u64 {
    self.frames += 1;
    self.fps = fps;
    self.frames
  }

  pub fn frames(&self) -> u64 {
    self.frames
  }

  pub fn fps(&self) -> f32 {
    self.fps
  }

  pub fn export_path(&self) -> Option<&Path> {
    self.export_path.as_deref()
  }

  pub fn upload_path(&self) -> Option<&Path> {
    self.upload.as_ref().map(NamedTempFile::path)
  }

  pub fn is_closed(&self) -> bool {
    self.capture.is_none() && self.writer.is_none() && self.upload.is_none()
  }

  /// 依次释放采集句柄、完成输出、删除临时文件；失败只记录日志
  pub fn close(&mut self) {
    if self.is_closed() {
      return;
    }

    if let Some(capture) = self.capture.take()
      && let Err(e) = capture.release()
    {
      warn!("释放视频源失败: {}", e);
    }

    if let Some(writer) = self.writer.take() {
      match writer.finish() {
        Ok(()) => {
          if let Some(path) = self.export_path.as_ref() {
            info!("视频已导出: {}", path.display());
          }
        }
        Err(e) => warn!("完成视频导出失败: {}", e),
      }
    }

    if let Some(upload) = self.upload.take() {
      let path = upload.path().to_path_buf();
      match upload.close() {
        Ok(()) => debug!("已删除临时文件: {}", path.display()),
        Err(e) => warn!("删除临时文件 {} 失败: {}", path.display(), e),
      }
    }

    info!("会话结束，共处理 {} 帧", self.frames);
  }
}

impl<C: Capture, W: FrameWriter> Drop for StreamSession<C, W> {
  fn drop(&mut self) {
    self.close();
  }
}

fn open_camera<V: VideoIo>(io: &V, index: u32) -> Result<V::Capture, TaskError> {
  match io.open_camera(index, CameraBackend::Preferred) {
    Ok(capture) => Ok(capture),
    Err(e) => {
      warn!("首选后端无法打开摄像头 {}: {}，尝试默认后端", index, e);
      io.open_camera(index, CameraBackend::Default)
        .map_err(|e| TaskError::SourceOpen {
          origin: format!("摄像头 {}", index),
          reason: e.to_string(),
          hint: CAMERA_HINT,
        })
    }
  }
}

/// 上传数据写入临时文件后打开，任何失败都会删除临时文件
fn open_upload<V: VideoIo>(
  io: &V,
  data: &[u8],
  file_name: Option<&str>,
) -> Result<(V::Capture, NamedTempFile), TaskError> {
  let suffix = SourceDescriptor::upload_suffix(file_name);
  let open_error = |reason: String| TaskError::SourceOpen {
    origin: format!("上传的 {} 文件", suffix),
    reason,
    hint: FILE_HINT,
  };

  let mut upload = tempfile::Builder::new()
    .prefix(UPLOAD_PREFIX)
    .suffix(&suffix)
    .tempfile()
    .map_err(|e| open_error(e.to_string()))?;
  upload
    .write_all(data)
    .and_then(|_| upload.flush())
    .map_err(|e| open_error(e.to_string()))?;
  debug!("上传数据已写入临时文件: {}", upload.path().display());

  let capture = io
    .open_file(upload.path())
    .map_err(|e| open_error(e.to_string()))?;
  Ok((capture, upload))
}
