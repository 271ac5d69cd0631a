// 该文件是 Segcap （分割采集） 项目的一部分。
// src/output.rs - 输出定义
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

/// 按名称寻址的字节输出
///
/// `write` 要么完整写入，要么不留下任何内容；同名内容直接覆盖。
pub trait ByteSink {
  fn write(&self, name: &str, bytes: &[u8]) -> std::io::Result<()>;

  /// 删除已写入的内容，不存在时视为成功
  fn remove(&self, name: &str) -> std::io::Result<()>;
}

impl<S: ByteSink + ?Sized> ByteSink for &S {
  fn write(&self, name: &str, bytes: &[u8]) -> std::io::Result<()> {
    (**self).write(name, bytes)
  }

  fn remove(&self, name: &str) -> std::io::Result<()> {
    (**self).remove(name)
  }
}

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError};
