//! 结果落盘（JSON Lines，追加写）
//!
//! 每条记录先在内存中完整序列化为一行，再以单次 `write_all` 追加并 `sync_all`，
//! 行本身即为自定界单元，多次运行之间不会互相破坏。
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::SinkError;
use crate::types::FoundRecord;

/// 命中结果的持久化边界
pub trait ResultSink: Send + Sync {
    fn persist(&self, record: &FoundRecord) -> Result<(), SinkError>;
}

pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResultSink for JsonlSink {
    fn persist(&self, record: &FoundRecord) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(&line)?;
        file.sync_all()?;
        Ok(())
    }
}

/// 读取结果文件中的全部记录；文件不存在时返回空列表
pub fn read_records(path: &Path) -> Result<Vec<FoundRecord>, SinkError> {
    let file = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut out = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let rec = serde_json::from_str(&line).map_err(|source| SinkError::Decode { line: idx + 1, source })?;
        out.push(rec);
    }
    Ok(out)
}
