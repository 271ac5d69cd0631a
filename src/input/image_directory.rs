// 该文件是 Segcap （分割采集） 项目的一部分。
// src/input/image_directory.rs - 图像目录输入
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

use std::path::PathBuf;

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, decode_url_path, input::ImageSource};

const DEFAULT_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum ImageDirectoryError {
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{actual}'")]
  SchemeMismatch {
    expected: &'static str,
    actual: String,
  },
  #[error("图像标识无效: '{0}'")]
  InvalidId(String),
  #[error("找不到图像 '{id}'（已尝试 {tried:?}）")]
  NotFound { id: String, tried: Vec<PathBuf> },
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像解码错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// 以 `{directory}/{image_id}.{ext}` 组织的图像目录
#[derive(Debug, Clone)]
pub struct ImageDirectory {
  directory: PathBuf,
  extensions: Vec<String>,
}

impl FromUrlWithScheme for ImageDirectory {
  const SCHEME: &'static str = "images";
}

impl FromUrl for ImageDirectory {
  type Error = ImageDirectoryError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageDirectoryError::SchemeMismatch {
        expected: Self::SCHEME,
        actual: url.scheme().to_string(),
      });
    }

    let extensions = url
      .query_pairs()
      .filter(|(k, _)| k == "ext")
      .map(|(_, v)| v.trim_start_matches('.').to_string())
      .collect::<Vec<_>>();

    let directory = Self::new(decode_url_path(url));
    Ok(if extensions.is_empty() {
      directory
    } else {
      directory.with_extensions(extensions)
    })
  }
}

impl ImageDirectory {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      directory: directory.into(),
      extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
    }
  }

  /// 按顺序尝试的扩展名
  pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.extensions = extensions.into_iter().map(Into::into).collect();
    self
  }

  fn locate(&self, image_id: &str) -> Result<PathBuf, ImageDirectoryError> {
    if image_id.is_empty()
      || image_id.contains(['/', '\\'])
      || image_id == "."
      || image_id == ".."
    {
      return Err(ImageDirectoryError::InvalidId(image_id.to_string()));
    }

    let tried = self
      .extensions
      .iter()
      .map(|ext| self.directory.join(format!("{}.{}", image_id, ext)))
      .collect::<Vec<_>>();

    match tried.iter().find(|path| path.is_file()) {
      Some(path) => Ok(path.clone()),
      None => Err(ImageDirectoryError::NotFound {
        id: image_id.to_string(),
        tried,
      }),
    }
  }
}

impl ImageSource for ImageDirectory {
  type Error = ImageDirectoryError;

  fn resolve(&self, image_id: &str) -> Result<RgbImage, Self::Error> {
    let path = self.locate(image_id)?;
    debug!("读取图像文件: {}", path.display());
    let image = ImageReader::open(&path)?.with_guessed_format()?.decode()?;
    Ok(image.to_rgb8())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn resolves_first_matching_extension() {
    let dir = tempfile::tempdir().unwrap();
    RgbImage::from_pixel(6, 4, Rgb([1, 2, 3]))
      .save(dir.path().join("a.png"))
      .unwrap();

    let source = ImageDirectory::new(dir.path());
    let image = source.resolve("a").unwrap();
    assert_eq!(image.dimensions(), (6, 4));
    assert_eq!(*image.get_pixel(0, 0), Rgb([1, 2, 3]));
  }

  #[test]
  fn missing_image_lists_tried_paths() {
    let dir = tempfile::tempdir().unwrap();
    let source = ImageDirectory::new(dir.path()).with_extensions(["png"]);
    match source.resolve("missing") {
      Err(ImageDirectoryError::NotFound { id, tried }) => {
        assert_eq!(id, "missing");
        assert_eq!(tried, vec![dir.path().join("missing.png")]);
      }
      other => panic!("unexpected result: {:?}", other.map(|i| i.dimensions())),
    }
  }

  #[test]
  fn rejects_path_like_ids() {
    let source = ImageDirectory::new("/tmp");
    for id in ["", "..", "../etc/passwd", "a/b"] {
      assert!(matches!(
        source.resolve(id),
        Err(ImageDirectoryError::InvalidId(_))
      ));
    }
  }

  #[test]
  fn url_selects_directory_and_extensions() {
    let url = Url::parse("images:///data/val%20images?ext=.png&ext=jpg").unwrap();
    let source = ImageDirectory::from_url(&url).unwrap();
    assert_eq!(source.directory, PathBuf::from("/data/val images"));
    assert_eq!(source.extensions, vec!["png".to_string(), "jpg".to_string()]);

    let url = Url::parse("folder:///data").unwrap();
    assert!(matches!(
      ImageDirectory::from_url(&url),
      Err(ImageDirectoryError::SchemeMismatch { .. })
    ));
  }
}
