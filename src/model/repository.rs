// 该文件是 Laobao （劳保） 项目的一部分。
// src/model/repository.rs - 模型权重目录
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

use std::{io, path::Path};

use tracing::debug;

pub const MODEL_EXTENSION: &str = "onnx";

/// 列出目录中的模型文件名（已排序），目录不存在时返回空列表
pub fn list_models(dir: &Path) -> io::Result<Vec<String>> {
  if !dir.is_dir() {
    debug!("模型目录不存在: {}", dir.display());
    return Ok(Vec::new());
  }

  let mut models = Vec::new();
  for entry in std::fs::read_dir(dir)? {
    let path = entry?.path();
    let is_model = path
      .extension()
      .is_some_and(|ext| ext.eq_ignore_ascii_case(MODEL_EXTENSION));
    if is_model
      && path.is_file()
      && let Some(name) = path.file_name().and_then(|n| n.to_str())
    {
      models.push(name.to_string());
    }
  }
  models.sort();
  Ok(models)
}
