// 该文件是 Renhai （人海） 项目的一部分。
// src/output/density_map.rs - 密度图编码
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

use std::io::Cursor;

use image::{GrayImage, ImageFormat, imageops::FilterType};
use thiserror::Error;
use tracing::debug;

use crate::density::DensityMatrix;

/// 默认缩放滤波器：双线性
pub const DEFAULT_RESIZE_FILTER: FilterType = FilterType::Triangle;

#[derive(Error, Debug)]
pub enum EncodeError {
  #[error("目标尺寸无效: {width}x{height}")]
  InvalidTargetSize { width: u32, height: u32 },
  #[error("密度矩阵过大: {width}x{height}")]
  TooLarge { width: usize, height: usize },
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
}

/// 把密度矩阵编码为可显示的 8 位灰度 PNG。
///
/// 相同的矩阵与目标尺寸总是得到逐字节相同的输出：PNG 中不写入时间戳等元数据，
/// 缩放使用固定的滤波器。
#[derive(Debug, Clone, Copy)]
pub struct DensityMapEncoder {
  filter: FilterType,
}

impl Default for DensityMapEncoder {
  fn default() -> Self {
    Self {
      filter: DEFAULT_RESIZE_FILTER,
    }
  }
}

impl DensityMapEncoder {
  pub fn with_filter(mut self, filter: FilterType) -> Self {
    self.filter = filter;
    self
  }

  pub fn filter(&self) -> FilterType {
    self.filter
  }

  /// `target_size` 为 (宽, 高)；与矩阵原始尺寸不同时才缩放
  pub fn encode(
    &self,
    matrix: &DensityMatrix,
    target_size: Option<(u32, u32)>,
  ) -> Result<Vec<u8>, EncodeError> {
    let mut image = normalize_to_gray(matrix)?;

    if let Some((width, height)) = target_size {
      if width == 0 || height == 0 {
        return Err(EncodeError::InvalidTargetSize { width, height });
      }
      if image.dimensions() != (width, height) {
        debug!(
          "缩放密度图: {}x{} -> {}x{}",
          image.width(),
          image.height(),
          width,
          height
        );
        image = image::imageops::resize(&image, width, height, self.filter);
      }
    }

    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
  }
}

/// 最小-最大归一化到 0..=255。所有值相等时整幅图为 0，避免除零。
pub fn normalize_to_gray(matrix: &DensityMatrix) -> Result<GrayImage, EncodeError> {
  let too_large = || EncodeError::TooLarge {
    width: matrix.width(),
    height: matrix.height(),
  };
  let width = u32::try_from(matrix.width()).map_err(|_| too_large())?;
  let height = u32::try_from(matrix.height()).map_err(|_| too_large())?;

  let (min, max) = matrix.range();
  let pixels: Vec<u8> = if max > min {
    let (min, range) = (min as f64, max as f64 - min as f64);
    matrix
      .values()
      .iter()
      .map(|&v| (255.0 * (v as f64 - min) / range).round().clamp(0.0, 255.0) as u8)
      .collect()
  } else {
    vec![0; matrix.values().len()]
  };

  GrayImage::from_raw(width, height, pixels).ok_or_else(too_large)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn decode(bytes: &[u8]) -> GrayImage {
    image::load_from_memory_with_format(bytes, ImageFormat::Png)
      .unwrap()
      .to_luma8()
  }

  #[test]
  fn extremes_map_to_full_range() {
    let matrix = DensityMatrix::from_rows(vec![
      vec![0.5, 0.0, 0.25],
      vec![1.0, 0.125, 0.75],
    ])
    .unwrap();

    let image = decode(&DensityMapEncoder::default().encode(&matrix, None).unwrap());
    assert_eq!(image.dimensions(), (3, 2));
    assert_eq!(image.get_pixel(1, 0).0[0], 0);
    assert_eq!(image.get_pixel(0, 1).0[0], 255);
    // 0.5 * 255 = 127.5 -> 128
    assert_eq!(image.get_pixel(0, 0).0[0], 128);
  }

  #[test]
  fn uniform_matrix_is_black() {
    for value in [0.0, 3.25] {
      let matrix = DensityMatrix::filled(4, 3, value).unwrap();
      let image = decode(&DensityMapEncoder::default().encode(&matrix, None).unwrap());
      assert!(image.pixels().all(|p| p.0[0] == 0));
    }
  }

  #[test]
  fn resizes_to_target_size() {
    let matrix = DensityMatrix::from_rows(vec![vec![0.0, 1.0], vec![2.0, 3.0]]).unwrap();
    let encoder = DensityMapEncoder::default();

    let image = decode(&encoder.encode(&matrix, Some((17, 9))).unwrap());
    assert_eq!(image.dimensions(), (17, 9));

    let image = decode(&encoder.encode(&matrix, Some((2, 2))).unwrap());
    assert_eq!(image.dimensions(), (2, 2));
    assert_eq!(image.get_pixel(1, 1).0[0], 255);
  }

  #[test]
  fn nearest_filter_keeps_levels() {
    let matrix = DensityMatrix::from_rows(vec![vec![0.0, 1.0]]).unwrap();
    let encoder = DensityMapEncoder::default().with_filter(FilterType::Nearest);
    let image = decode(&encoder.encode(&matrix, Some((4, 2))).unwrap());
    assert!(image.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
  }

  #[test]
  fn encoding_is_deterministic() {
    let matrix = DensityMatrix::from_rows(vec![
      vec![0.01, 0.02, 0.5],
      vec![0.0, 1.25, 0.3],
    ])
    .unwrap();
    let encoder = DensityMapEncoder::default();

    let a = encoder.encode(&matrix, Some((40, 30))).unwrap();
    let b = encoder.encode(&matrix, Some((40, 30))).unwrap();
    assert_eq!(a, b);
  }

  #[test]
  fn rejects_zero_target() {
    let matrix = DensityMatrix::filled(2, 2, 1.0).unwrap();
    let err = DensityMapEncoder::default()
      .encode(&matrix, Some((0, 10)))
      .unwrap_err();
    assert!(matches!(
      err,
      EncodeError::InvalidTargetSize {
        width: 0,
        height: 10
      }
    ));
  }
}
