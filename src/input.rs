// 该文件是 Renhai （人海） 项目的一部分。
// src/input.rs - 上传图像输入
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

mod scratch;
pub use self::scratch::{ScratchError, ScratchFile, ScratchStore};

const FALLBACK_FILENAME: &str = "upload";

/// 清理后文件名的最大长度，与记录中图像字段的宽度一致
pub const MAX_FILENAME_CHARS: usize = 100;
/// 超过此长度的后缀不视为扩展名
const MAX_EXTENSION_CHARS: usize = 16;

/// 只保留文件名的最后一段，并把非 `[A-Za-z0-9._-]` 字符替换为下划线。
/// 过长的文件名截短主干，保留扩展名。
pub fn sanitize_filename(name: &str) -> String {
  let last = name
    .rsplit(['/', '\\'])
    .next()
    .unwrap_or_default()
    .trim();

  let cleaned: String = last
    .chars()
    .map(|c| {
      if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
        c
      } else {
        '_'
      }
    })
    .collect();

  if cleaned.trim_matches('.').is_empty() {
    FALLBACK_FILENAME.to_string()
  } else {
    truncate_stem(cleaned)
  }
}

// 输入只含 ASCII，按字节切分是安全的
fn truncate_stem(name: String) -> String {
  if name.len() <= MAX_FILENAME_CHARS {
    return name;
  }
  let extension = match name.rfind('.') {
    Some(dot) if dot > 0 && name.len() - dot <= MAX_EXTENSION_CHARS => &name[dot..],
    _ => "",
  };
  let stem = &name[..MAX_FILENAME_CHARS - extension.len()];
  format!("{}{}", stem, extension)
}

/// 根据文件名后缀判断是否为支持的图像文件
pub fn is_image_file(name: &str) -> bool {
  let lower = name.to_lowercase();
  lower.ends_with(".jpg")
    || lower.ends_with(".jpeg")
    || lower.ends_with(".png")
    || lower.ends_with(".bmp")
    || lower.ends_with(".gif")
    || lower.ends_with(".webp")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn sanitize_keeps_last_component() {
    assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
    assert_eq!(sanitize_filename(r"C:\photos\march.JPG"), "march.JPG");
    assert_eq!(sanitize_filename("crowd shot (1).png"), "crowd_shot__1_.png");
  }

  #[test]
  fn sanitize_falls_back_for_empty_names() {
    assert_eq!(sanitize_filename(""), "upload");
    assert_eq!(sanitize_filename("photos/"), "upload");
    assert_eq!(sanitize_filename(".."), "upload");
  }

  #[test]
  fn sanitize_caps_long_names_and_keeps_extension() {
    let long = format!("{}.jpeg", "a".repeat(300));
    let cleaned = sanitize_filename(&long);
    assert_eq!(cleaned.len(), MAX_FILENAME_CHARS);
    assert!(cleaned.ends_with(".jpeg"));
    assert!(cleaned.starts_with("aaaa"));

    let no_extension = "b".repeat(300);
    assert_eq!(sanitize_filename(&no_extension), "b".repeat(MAX_FILENAME_CHARS));

    let exact = format!("{}.png", "c".repeat(MAX_FILENAME_CHARS - 4));
    assert_eq!(sanitize_filename(&exact), exact);
  }

  #[test]
  fn detects_image_suffixes() {
    assert!(is_image_file("a.JPEG"));
    assert!(is_image_file("b.webp"));
    assert!(!is_image_file("notes.txt"));
  }
}
