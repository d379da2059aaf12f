//! 错误类型
use std::path::PathBuf;
use thiserror::Error;

use crate::types::FoundRecord;

/// 余额查询错误（均为可重试的瞬时错误）
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OracleError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("failed to encode entropy as mnemonic: {0}")]
    Mnemonic(#[from] bip39::Error),
}

#[derive(Debug, Error)]
pub enum DeriveError {
    #[error("invalid mnemonic: {0}")]
    Mnemonic(#[from] bip39::Error),
    #[error("bip32 derivation failed: {0}")]
    Bip32(#[from] bitcoin::bip32::Error),
}

/// 结果落盘错误：对本次运行是致命的
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("corrupt record at line {line}: {source}")]
    Decode { line: usize, source: serde_json::Error },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid option: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to build balance oracle: {0}")]
    Oracle(#[from] OracleError),
    #[error("worker pool failure: {0}")]
    WorkerPool(String),
    /// 命中已发生但未能落盘；记录随错误一起返回，由调用方负责展示
    #[error("failed to persist found record: {source}")]
    Persist { record: Box<FoundRecord>, source: SinkError },
}
