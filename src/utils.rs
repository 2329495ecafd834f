use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail, ensure};
use indicatif::ProgressStyle;
use opencv::core::{Mat, Size, Vector};
use opencv::imgcodecs;
use opencv::imgproc;
use opencv::prelude::*;
use regex::Regex;
use walkdir::WalkDir;

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .unwrap()
        .progress_chars("#>-")
}

/// 由逗号分隔的后缀列表构造大小写不敏感的匹配规则
pub fn suffix_regex(suffix: &str) -> Result<Regex> {
    let re = format!("(?i)^({})$", suffix.replace(',', "|"));
    Regex::new(&re).with_context(|| format!("无效的后缀列表: {}", suffix))
}

/// 列出目录下（不递归）后缀匹配的图片，按文件名字典序排列
pub fn scan_images(dir: &Path, re_suf: &Regex) -> Result<Vec<PathBuf>> {
    ensure!(dir.is_dir(), "找不到图片目录: {}", dir.display());
    let mut entries = vec![];
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(ext) = path.extension() {
            if re_suf.is_match(&ext.to_string_lossy()) {
                entries.push(path.to_path_buf());
            }
        }
    }
    Ok(entries)
}

/// 以三通道彩色模式读取图片
pub fn imread(path: &Path) -> Result<Mat> {
    let filename = path.to_str().ok_or_else(|| anyhow!("无效的路径: {}", path.display()))?;
    let img = imgcodecs::imread(filename, imgcodecs::IMREAD_COLOR)?;
    if img.empty() {
        bail!("无法解码图片: {}", path.display());
    }
    Ok(img)
}

pub fn imwrite(path: &Path, img: &Mat, params: &[i32]) -> Result<()> {
    let filename = path.to_str().ok_or_else(|| anyhow!("无效的路径: {}", path.display()))?;
    let params = Vector::<i32>::from_slice(params);
    if !imgcodecs::imwrite(filename, img, &params)? {
        bail!("无法写入图片: {}", path.display());
    }
    Ok(())
}

/// 等比缩小使最长边不超过 `max_side`，较小的图片保持不变
pub fn fit_within(img: &Mat, max_side: i32, interpolation: i32) -> Result<Mat> {
    let longest = img.cols().max(img.rows());
    if longest <= max_side {
        return Ok(img.try_clone()?);
    }
    let scale = max_side as f64 / longest as f64;
    let width = ((img.cols() as f64 * scale).round() as i32).max(1);
    let height = ((img.rows() as f64 * scale).round() as i32).max(1);
    let mut output = Mat::default();
    imgproc::resize(img, &mut output, Size::new(width, height), 0., 0., interpolation)?;
    Ok(output)
}

/// 文件名（含后缀）
pub fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("无效的文件名: {}", path.display()))
}

/// 缩略图的相对路径：`<prefix>/<stem>.<ext>`
pub fn thumb_path(path: &Path, prefix: &str, ext: &str) -> Result<String> {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("无效的文件名: {}", path.display()))?;
    Ok(format!("{}/{}.{}", prefix.trim_end_matches('/'), stem, ext))
}
