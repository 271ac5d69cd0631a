// 该文件是 Segcap （分割采集） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, error};

use crate::{FromUrl, FromUrlWithScheme, decode_url_path, output::ByteSink};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("输出名称无效: '{0}'")]
  InvalidName(String),
  #[error("目录 {0} 不可写: {1}")]
  Unwritable(PathBuf, std::io::Error),
}

/// 将记录写入目录
///
/// 每次写入先落到同目录下的临时文件，成功后再重命名为目标文件名。
#[derive(Debug, Clone)]
pub struct DirectoryRecordOutput {
  directory: PathBuf,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }
    Self::new(decode_url_path(uri))
  }
}

impl DirectoryRecordOutput {
  /// 创建目录并确认可写；目录不可写时整个采集无法进行
  pub fn new(directory: impl Into<PathBuf>) -> Result<Self, DirectoryRecordOutputError> {
    let directory = directory.into();
    let unwritable = |e| DirectoryRecordOutputError::Unwritable(directory.clone(), e);

    std::fs::create_dir_all(&directory).map_err(unwritable)?;
    NamedTempFile::new_in(&directory)
      .and_then(|probe| probe.close())
      .map_err(|e| {
        error!("输出目录不可写: {}", directory.display());
        unwritable(e)
      })?;

    debug!("输出目录: {}", directory.display());
    Ok(Self { directory })
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  fn path_of(&self, name: &str) -> std::io::Result<PathBuf> {
    if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
      return Err(std::io::Error::new(
        std::io::ErrorKind::InvalidInput,
        DirectoryRecordOutputError::InvalidName(name.to_string()),
      ));
    }
    Ok(self.directory.join(name))
  }
}

impl ByteSink for DirectoryRecordOutput {
  fn write(&self, name: &str, bytes: &[u8]) -> std::io::Result<()> {
    let path = self.path_of(name)?;
    let mut file = NamedTempFile::new_in(&self.directory)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(&path).map_err(|e| e.error)?;
    debug!("写入 {} ({} 字节)", path.display(), bytes.len());
    Ok(())
  }

  fn remove(&self, name: &str) -> std::io::Result<()> {
    let path = self.path_of(name)?;
    match std::fs::remove_file(&path) {
      Ok(()) => {
        debug!("删除 {}", path.display());
        Ok(())
      }
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(e),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn entries(dir: &Path) -> Vec<String> {
    let mut names = std::fs::read_dir(dir)
      .unwrap()
      .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
      .collect::<Vec<_>>();
    names.sort();
    names
  }

  #[test]
  fn creates_missing_directory() {
    let root = tempfile::tempdir().unwrap();
    let target = root.path().join("nested").join("captures");
    let output = DirectoryRecordOutput::new(&target).unwrap();
    assert!(target.is_dir());
    assert_eq!(output.directory(), target.as_path());
  }

  #[test]
  fn write_leaves_only_target_file() {
    let root = tempfile::tempdir().unwrap();
    let output = DirectoryRecordOutput::new(root.path()).unwrap();
    output.write("a.bin", &[1, 2, 3]).unwrap();
    assert_eq!(entries(root.path()), vec!["a.bin".to_string()]);
    assert_eq!(std::fs::read(root.path().join("a.bin")).unwrap(), vec![1, 2, 3]);
  }

  #[test]
  fn rewrite_overwrites_previous_content() {
    let root = tempfile::tempdir().unwrap();
    let output = DirectoryRecordOutput::new(root.path()).unwrap();
    output.write("a.bin", &[1, 2, 3]).unwrap();
    output.write("a.bin", &[9]).unwrap();
    assert_eq!(std::fs::read(root.path().join("a.bin")).unwrap(), vec![9]);
  }

  #[test]
  fn remove_is_idempotent() {
    let root = tempfile::tempdir().unwrap();
    let output = DirectoryRecordOutput::new(root.path()).unwrap();
    output.write("a.bin", &[1]).unwrap();
    output.remove("a.bin").unwrap();
    output.remove("a.bin").unwrap();
    assert!(entries(root.path()).is_empty());
  }

  #[test]
  fn rejects_names_outside_directory() {
    let root = tempfile::tempdir().unwrap();
    let output = DirectoryRecordOutput::new(root.path()).unwrap();
    let err = output.write("../escape.bin", &[1]).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
  }

  #[test]
  fn file_in_place_of_directory_is_fatal() {
    let root = tempfile::tempdir().unwrap();
    let blocker = root.path().join("blocker");
    std::fs::write(&blocker, b"x").unwrap();
    assert!(matches!(
      DirectoryRecordOutput::new(blocker.join("captures")),
      Err(DirectoryRecordOutputError::Unwritable(..))
    ));
  }

  #[test]
  fn url_scheme_is_checked() {
    let url = url::Url::parse("image:///tmp/out").unwrap();
    assert!(matches!(
      DirectoryRecordOutput::from_url(&url),
      Err(DirectoryRecordOutputError::SchemeMismatch)
    ));
  }
}
