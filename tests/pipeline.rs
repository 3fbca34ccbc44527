// 该文件是 Laobao （劳保） 项目的一部分。
// tests/pipeline.rs - 检测流水线的资源与状态测试
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
  io,
  path::{Path, PathBuf},
  sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
  },
};

use image::Rgb;
use laobao::{
  color::Color,
  compliance::ComplianceVerdict,
  frame::{ChannelOrder, Frame},
  input::{CameraBackend, Capture, CaptureError, SourceDescriptor, VideoIo},
  label::{PpeItem, RequiredItems},
  model::{Detection, Model},
  output::{Annotator, FrameWriter, VideoSpec},
  task::{ComplianceTask, StopFlag, TaskError},
};

const WIDTH: u32 = 64;
const HEIGHT: u32 = 48;

#[derive(Debug, Default)]
struct Stats {
  released: usize,
  finished: usize,
  written: usize,
  camera_attempts: Vec<CameraBackend>,
  opened_files: Vec<PathBuf>,
  writer_spec: Option<VideoSpec>,
}

type SharedStats = Arc<Mutex<Stats>>;

struct FakeCapture {
  total: usize,
  fail_at: Option<usize>,
  reads: usize,
  stats: SharedStats,
}

impl Capture for FakeCapture {
  fn width(&self) -> u32 {
    WIDTH
  }

  fn height(&self) -> u32 {
    HEIGHT
  }

  fn fps(&self) -> Option<f64> {
    None
  }

  fn read_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
    self.reads += 1;
    if self.fail_at == Some(self.reads) {
      return Err(CaptureError::Read("decoder error".to_string()));
    }
    if self.reads > self.total {
      return Ok(None);
    }
    Ok(Some(Frame::blank(WIDTH, HEIGHT, ChannelOrder::Bgr)))
  }

  fn release(self) -> Result<(), CaptureError> {
    self.stats.lock().unwrap().released += 1;
    Ok(())
  }
}

struct FakeWriter {
  fail_at: Option<usize>,
  attempts: usize,
  stats: SharedStats,
}

impl FrameWriter for FakeWriter {
  type Error = io::Error;

  fn write_frame(&mut self, _frame: &Frame) -> Result<(), Self::Error> {
    self.attempts += 1;
    if self.fail_at == Some(self.attempts) {
      return Err(io::Error::other("disk full"));
    }
    self.stats.lock().unwrap().written += 1;
    Ok(())
  }

  fn finish(self) -> Result<(), Self::Error> {
    self.stats.lock().unwrap().finished += 1;
    Ok(())
  }
}

#[derive(Default)]
struct FakeIo {
  stats: SharedStats,
  total: usize,
  fail_at: Option<usize>,
  preferred_camera_broken: bool,
  default_camera_broken: bool,
  files_broken: bool,
  writer_broken: bool,
  writer_fails_at: Option<usize>,
}

impl FakeIo {
  fn with_frames(total: usize) -> Self {
    Self {
      total,
      ..Default::default()
    }
  }

  fn capture(&self) -> FakeCapture {
    FakeCapture {
      total: self.total,
      fail_at: self.fail_at,
      reads: 0,
      stats: self.stats.clone(),
    }
  }

  fn stats(&self) -> std::sync::MutexGuard<'_, Stats> {
    self.stats.lock().unwrap()
  }
}

impl VideoIo for FakeIo {
  type Capture = FakeCapture;
  type Writer = FakeWriter;

  fn open_camera(&self, _index: u32, backend: CameraBackend) -> Result<FakeCapture, CaptureError> {
    self.stats().camera_attempts.push(backend);
    let broken = match backend {
      CameraBackend::Preferred => self.preferred_camera_broken,
      CameraBackend::Default => self.default_camera_broken,
    };
    if broken {
      return Err(CaptureError::Open("device busy".to_string()));
    }
    Ok(self.capture())
  }

  fn open_file(&self, path: &Path) -> Result<FakeCapture, CaptureError> {
    self.stats().opened_files.push(path.to_path_buf());
    if self.files_broken || !path.is_file() {
      return Err(CaptureError::Open(format!("cannot decode {}", path.display())));
    }
    Ok(self.capture())
  }

  fn create_writer(&self, _path: &Path, spec: VideoSpec) -> Result<FakeWriter, io::Error> {
    if self.writer_broken {
      return Err(io::Error::other("encoder unavailable"));
    }
    self.stats().writer_spec = Some(spec);
    Ok(FakeWriter {
      fail_at: self.writer_fails_at,
      attempts: 0,
      stats: self.stats.clone(),
    })
  }
}

/// 每帧返回一名戴安全帽的工人，`fail_at` 指定第几次推理失败
#[derive(Default)]
struct FakeModel {
  calls: Arc<AtomicUsize>,
  fail_at: Option<usize>,
}

impl Model for FakeModel {
  type Error = io::Error;

  fn infer(&self, _frame: &Frame) -> Result<Vec<Detection>, Self::Error> {
    let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
    if self.fail_at == Some(call) {
      return Err(io::Error::other("accelerator lost"));
    }
    Ok(vec![
      Detection::new([4.0, 4.0, 40.0, 40.0], "worker", 0.9),
      Detection::new([10.0, 6.0, 30.0, 16.0], "helmet", 0.8),
    ])
  }
}

fn task(io: FakeIo) -> ComplianceTask<FakeModel, FakeIo> {
  ComplianceTask::new(
    FakeModel::default(),
    RequiredItems::new([PpeItem::Helmet]),
    io,
  )
  .with_annotator(Annotator::without_text())
}

#[test]
fn opening_is_deferred_until_first_pull() {
  let task = task(FakeIo::with_frames(3));
  let stream = task.run(SourceDescriptor::Camera(0), None, StopFlag::new());
  assert!(task.io().stats().camera_attempts.is_empty());
  drop(stream);
  assert_eq!(task.io().stats().released, 0);
}

#[test]
fn frames_carry_annotated_rgb_image_and_verdicts() {
  let task = task(FakeIo::with_frames(2));
  let frames: Vec<_> = task
    .run(SourceDescriptor::Camera(0), None, StopFlag::new())
    .collect::<Result<_, _>>()
    .unwrap();

  assert_eq!(frames.len(), 2);
  assert_eq!(frames[0].index, 1);
  assert_eq!(frames[1].index, 2);
  let frame = &frames[0];
  assert_eq!(frame.evaluation.workers[0].1, ComplianceVerdict::Safe);
  assert_eq!(frame.image.get_pixel(4, 20), &Rgb(Color::SAFE.rgb()));
  assert!(frame.fps >= 0.0);
  assert_eq!(task.io().stats().released, 1);
}

#[test]
fn read_failure_after_frames_drains_normally() {
  let io = FakeIo {
    fail_at: Some(3),
    ..FakeIo::with_frames(10)
  };
  let task = task(io);
  let dir = tempfile::tempdir().unwrap();
  let export = dir.path().join("out.mp4");

  let results: Vec<_> = task
    .run(SourceDescriptor::Camera(0), Some(export), StopFlag::new())
    .collect();

  assert_eq!(results.len(), 2);
  assert!(results.iter().all(Result::is_ok));
  let stats = task.io().stats();
  assert_eq!(stats.released, 1);
  assert_eq!(stats.finished, 1);
  assert_eq!(stats.written, 2);
}

#[test]
fn zero_frames_is_an_empty_stream_error() {
  let task = task(FakeIo::with_frames(0));
  let mut stream = task.run(SourceDescriptor::Camera(0), None, StopFlag::new());

  assert!(matches!(stream.next(), Some(Err(TaskError::EmptyStream { .. }))));
  assert!(stream.next().is_none());
  assert!(stream.is_closed());
  drop(stream);
  assert_eq!(task.io().stats().released, 1);
}

#[test]
fn read_error_on_first_frame_is_an_empty_stream_error() {
  let io = FakeIo {
    fail_at: Some(1),
    ..FakeIo::with_frames(10)
  };
  let task = task(io);
  let mut stream = task.run(SourceDescriptor::Camera(0), None, StopFlag::new());
  assert!(matches!(stream.next(), Some(Err(TaskError::EmptyStream { .. }))));
}

#[test]
fn stop_flag_ends_stream_before_next_frame() {
  let task = task(FakeIo::with_frames(10));
  let dir = tempfile::tempdir().unwrap();
  let stop = StopFlag::new();
  let mut stream = task.run(
    SourceDescriptor::Camera(0),
    Some(dir.path().join("out.mp4")),
    stop.clone(),
  );

  assert_eq!(stream.next().unwrap().unwrap().index, 1);
  assert_eq!(stream.next().unwrap().unwrap().index, 2);
  stop.stop();
  assert!(stream.next().is_none());
  assert!(stream.next().is_none());
  drop(stream);

  let stats = task.io().stats();
  assert_eq!(stats.released, 1);
  assert_eq!(stats.finished, 1);
  assert_eq!(stats.written, 2);
}

#[test]
fn dropping_the_stream_releases_resources() {
  let task = task(FakeIo::with_frames(10));
  let dir = tempfile::tempdir().unwrap();
  {
    let mut stream = task.run(
      SourceDescriptor::Camera(0),
      Some(dir.path().join("out.mp4")),
      StopFlag::new(),
    );
    assert!(stream.next().unwrap().is_ok());
  }

  let stats = task.io().stats();
  assert_eq!(stats.released, 1);
  assert_eq!(stats.finished, 1);
}

#[test]
fn max_frames_limits_the_run() {
  let task = task(FakeIo::with_frames(10)).with_max_frames(Some(3));
  let count = task
    .run(SourceDescriptor::Camera(0), None, StopFlag::new())
    .filter(Result::is_ok)
    .count();
  assert_eq!(count, 3);
  assert_eq!(task.io().stats().released, 1);
}

#[test]
fn writer_receives_one_frame_per_yielded_frame() {
  let task = task(FakeIo::with_frames(5));
  let dir = tempfile::tempdir().unwrap();
  let export = dir.path().join("nested").join("site.mkv");

  let yielded = task
    .run(SourceDescriptor::Camera(0), Some(export.clone()), StopFlag::new())
    .filter(Result::is_ok)
    .count();

  assert_eq!(yielded, 5);
  assert!(export.parent().unwrap().is_dir());
  let stats = task.io().stats();
  assert_eq!(stats.written, 5);
  let spec = stats.writer_spec.unwrap();
  assert_eq!((spec.width, spec.height, spec.fps), (WIDTH, HEIGHT, 30.0));
}

#[test]
fn export_init_failure_aborts_before_any_frame() {
  let io = FakeIo {
    writer_broken: true,
    ..FakeIo::with_frames(5)
  };
  let model = FakeModel::default();
  let calls = model.calls.clone();
  let task = ComplianceTask::new(model, RequiredItems::new([PpeItem::Helmet]), io)
    .with_annotator(Annotator::without_text());
  let dir = tempfile::tempdir().unwrap();

  let mut stream = task.run(
    SourceDescriptor::Camera(0),
    Some(dir.path().join("out.mp4")),
    StopFlag::new(),
  );
  match stream.next() {
    Some(Err(TaskError::ExportInit { path, .. })) => assert!(path.ends_with("out.mp4")),
    other => panic!("unexpected result: {:?}", other.map(|r| r.map(|f| f.index))),
  }
  assert!(stream.next().is_none());
  drop(stream);

  assert_eq!(calls.load(Ordering::SeqCst), 0);
  assert_eq!(task.io().stats().released, 1);
}

#[test]
fn missing_file_is_source_not_found() {
  let task = task(FakeIo::with_frames(5));
  let mut stream = task.run(
    SourceDescriptor::File(PathBuf::from("/nonexistent/site.mp4")),
    None,
    StopFlag::new(),
  );
  let err = stream.next().unwrap().unwrap_err();
  assert!(matches!(err, TaskError::SourceNotFound { .. }));
  assert!(err.to_string().contains("/nonexistent/site.mp4"));
  assert!(task.io().stats().opened_files.is_empty());
}

#[test]
fn camera_falls_back_to_default_backend() {
  let io = FakeIo {
    preferred_camera_broken: true,
    ..FakeIo::with_frames(2)
  };
  let task = task(io);
  let count = task
    .run(SourceDescriptor::Camera(1), None, StopFlag::new())
    .filter(Result::is_ok)
    .count();

  assert_eq!(count, 2);
  assert_eq!(
    task.io().stats().camera_attempts,
    vec![CameraBackend::Preferred, CameraBackend::Default]
  );
}

#[test]
fn unavailable_camera_names_the_camera() {
  let io = FakeIo {
    preferred_camera_broken: true,
    default_camera_broken: true,
    ..FakeIo::with_frames(2)
  };
  let task = task(io);
  let err = task
    .run(SourceDescriptor::Camera(7), None, StopFlag::new())
    .next()
    .unwrap()
    .unwrap_err();
  assert!(matches!(err, TaskError::SourceOpen { .. }));
  assert!(err.to_string().contains('7'));
}

#[test]
fn uploaded_bytes_use_a_temporary_file_that_is_removed() {
  let complete = task(FakeIo::with_frames(10));
  let interrupted = task(FakeIo {
    fail_at: Some(3),
    ..FakeIo::with_frames(10)
  });

  for task in [&complete, &interrupted] {
    let source = SourceDescriptor::bytes(b"fake video".to_vec(), Some("site.avi".to_string()));
    let frames = task
      .run(source, None, StopFlag::new())
      .filter(Result::is_ok)
      .count();
    assert!(frames > 0);

    let stats = task.io().stats();
    let opened = stats.opened_files.last().unwrap();
    assert_eq!(opened.extension().unwrap(), "avi");
    assert!(!opened.exists());
    assert_eq!(stats.released, 1);
  }
}

#[test]
fn undecodable_upload_is_removed_and_reported() {
  let io = FakeIo {
    files_broken: true,
    ..FakeIo::with_frames(2)
  };
  let task = task(io);
  let source = SourceDescriptor::bytes(b"garbage".to_vec(), None);
  let err = task
    .run(source, None, StopFlag::new())
    .next()
    .unwrap()
    .unwrap_err();

  assert!(matches!(err, TaskError::SourceOpen { .. }));
  assert!(err.to_string().contains(".mp4"));
  let stats = task.io().stats();
  let opened = stats.opened_files.last().unwrap();
  assert!(!opened.exists());
  assert_eq!(stats.released, 0);
}

#[test]
fn inference_failure_mid_run_releases_everything() {
  let model = FakeModel {
    fail_at: Some(2),
    ..FakeModel::default()
  };
  let task = ComplianceTask::new(
    model,
    RequiredItems::new([PpeItem::Helmet]),
    FakeIo::with_frames(10),
  )
  .with_annotator(Annotator::without_text());
  let dir = tempfile::tempdir().unwrap();
  let source = SourceDescriptor::bytes(b"fake video".to_vec(), Some("site.mkv".to_string()));
  let mut stream = task.run(source, Some(dir.path().join("out.mp4")), StopFlag::new());

  assert_eq!(stream.next().unwrap().unwrap().index, 1);
  match stream.next() {
    Some(Err(TaskError::Inference(reason))) => assert!(reason.contains("accelerator lost")),
    other => panic!("unexpected result: {:?}", other.map(|r| r.map(|f| f.index))),
  }
  assert!(stream.next().is_none());
  assert!(stream.is_closed());

  let stats = task.io().stats();
  assert_eq!(stats.released, 1);
  assert_eq!(stats.finished, 1);
  assert_eq!(stats.written, 1);
  assert!(!stats.opened_files.last().unwrap().exists());
}

#[test]
fn export_write_failure_mid_run_releases_everything() {
  let io = FakeIo {
    writer_fails_at: Some(2),
    ..FakeIo::with_frames(10)
  };
  let task = task(io);
  let dir = tempfile::tempdir().unwrap();
  let export = dir.path().join("out.mp4");
  let source = SourceDescriptor::bytes(b"fake video".to_vec(), Some("site.avi".to_string()));
  let mut stream = task.run(source, Some(export.clone()), StopFlag::new());

  assert!(stream.next().unwrap().is_ok());
  match stream.next() {
    Some(Err(TaskError::ExportWrite { path, reason })) => {
      assert_eq!(path, export);
      assert!(reason.contains("disk full"));
    }
    other => panic!("unexpected result: {:?}", other.map(|r| r.map(|f| f.index))),
  }
  assert!(stream.next().is_none());
  drop(stream);

  let stats = task.io().stats();
  assert_eq!(stats.released, 1);
  assert_eq!(stats.finished, 1);
  assert_eq!(stats.written, 1);
  assert!(!stats.opened_files.last().unwrap().exists());
}
