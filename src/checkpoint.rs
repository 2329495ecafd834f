use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use log::info;
use serde::{Deserialize, Serialize};

/// 一张图片的特征记录，字段名与下游布局工具约定一致
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FeatureRecord {
    pub id: String,
    #[serde(rename = "highress_path")]
    pub high_res_path: String,
    pub thumb_path: String,
    pub vector: Vec<f32>,
}

/// 一次运行中累积的特征记录，只追加不删除
#[derive(Debug, Default)]
pub struct Database {
    records: Vec<FeatureRecord>,
    ids: HashSet<String>,
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从已有的检查点恢复
    pub fn from_records(records: Vec<FeatureRecord>) -> Self {
        let ids = records.iter().map(|r| r.id.clone()).collect();
        Self { records, ids }
    }

    pub fn push(&mut self, record: FeatureRecord) {
        self.ids.insert(record.id.clone());
        self.records.push(record);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn records(&self) -> &[FeatureRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// 读取检查点文件
pub fn load_records(path: &Path) -> Result<Vec<FeatureRecord>> {
    let file = File::open(path).with_context(|| format!("无法打开 {}", path.display()))?;
    let records = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("无法解析 {}", path.display()))?;
    Ok(records)
}

/// 将全部记录写入 `path`
///
/// 先写入同目录下的 `<name>*.tmp` 临时文件再重命名覆盖，中断时不会留下截断的文件。
/// 任何一步失败时临时文件都会被删除。
pub fn write_records(path: &Path, records: &[FeatureRecord]) -> Result<()> {
    let name = path.file_name().ok_or_else(|| anyhow!("无效的输出路径: {}", path.display()))?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let mut tmp = tempfile::Builder::new()
        .prefix(name)
        .suffix(".tmp")
        .tempfile_in(dir)
        .with_context(|| format!("无法在 {} 中创建临时文件", dir.display()))?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        serde_json::to_writer(&mut writer, records)?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;

    tmp.persist(path).with_context(|| format!("无法写入 {}", path.display()))?;
    Ok(())
}

/// 定期将数据库完整写入磁盘
pub struct CheckpointWriter {
    path: PathBuf,
    interval: usize,
    count_since_save: usize,
}

impl CheckpointWriter {
    /// `interval` 为两次自动保存之间成功处理的图片数量，0 表示只在结束时保存
    pub fn new(path: impl Into<PathBuf>, interval: usize) -> Self {
        Self { path: path.into(), interval, count_since_save: 0 }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 记录一次成功处理，达到间隔时写入检查点，返回是否写入
    pub fn record(&mut self, db: &Database) -> Result<bool> {
        self.count_since_save += 1;
        if self.interval == 0 || self.count_since_save < self.interval {
            return Ok(false);
        }
        self.flush(db)?;
        info!("已保存检查点: {} 条记录", db.len());
        Ok(true)
    }

    /// 无条件写入全部记录并重置计数
    pub fn flush(&mut self, db: &Database) -> Result<()> {
        write_records(&self.path, db.records())?;
        self.count_since_save = 0;
        Ok(())
    }
}
