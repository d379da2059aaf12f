//! 配置文件加载（TOML）
//!
//! 所有字段均可省略；未出现的字段保留 `ScanOptions::default()` 的取值，
//! 命令行参数最后覆盖。
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::options::{DerivationScheme, OracleEndpoint, ScanOptions};

/// 配置文件顶层结构
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub addresses: Option<usize>,
    #[serde(default)]
    pub queue_capacity: Option<usize>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub retry_delay_ms: Option<u64>,
    #[serde(default)]
    pub max_retry_delay_ms: Option<u64>,
    #[serde(default)]
    pub produce_delay_ms: Option<u64>,
    #[serde(default)]
    pub status_interval_ms: Option<u64>,
    /// "12" / "24" / "mixed"
    #[serde(default)]
    pub words: Option<String>,
    /// "bip44" / "bip49" / "bip84"，也可写成逗号分隔的列表或 "all"
    #[serde(default)]
    pub scheme: Option<String>,
    /// 与 `scheme` 二选一
    #[serde(default)]
    pub schemes: Option<Vec<String>>,
    #[serde(default)]
    pub output: Option<PathBuf>,
    /// 单个端点：服务名、`格式=URL` 或裸 URL
    #[serde(default)]
    pub endpoint: Option<String>,
    /// 按顺序回退的端点列表；与 `endpoint` 二选一
    #[serde(default)]
    pub endpoints: Option<Vec<String>>,
    #[serde(default)]
    pub limit: Option<u64>,
}

impl FileConfig {
    /// 将文件中出现的字段写入选项
    pub fn apply(self, opts: &mut ScanOptions) -> Result<(), ConfigError> {
        if let Some(w) = self.workers {
            opts.workers = w;
            // 队列容量未显式给出时跟随 worker 数
            if self.queue_capacity.is_none() {
                opts.queue_capacity = w.saturating_mul(2);
            }
        }
        if let Some(k) = self.addresses { opts.addresses_per_candidate = k; }
        if let Some(c) = self.queue_capacity { opts.queue_capacity = c; }
        if let Some(t) = self.timeout_secs { opts.oracle_timeout = Duration::from_secs(t); }
        if let Some(r) = self.max_attempts { opts.max_attempts = r; }
        if let Some(ms) = self.retry_delay_ms { opts.retry_delay = Duration::from_millis(ms); }
        if let Some(ms) = self.max_retry_delay_ms { opts.max_retry_delay = Duration::from_millis(ms); }
        if let Some(ms) = self.produce_delay_ms { opts.produce_delay = Duration::from_millis(ms); }
        if let Some(ms) = self.status_interval_ms { opts.status_interval = Duration::from_millis(ms); }
        if let Some(words) = self.words { opts.words = words.parse()?; }
        match (self.scheme, self.schemes) {
            (Some(_), Some(_)) => return Err(ConfigError::Invalid("use either `scheme` or `schemes`, not both".into())),
            (Some(one), None) => opts.schemes = DerivationScheme::parse_list(&[one])?,
            (None, Some(list)) => opts.schemes = DerivationScheme::parse_list(&list)?,
            (None, None) => {}
        }
        if let Some(out) = self.output { opts.output = out; }
        match (self.endpoint, self.endpoints) {
            (Some(_), Some(_)) => return Err(ConfigError::Invalid("use either `endpoint` or `endpoints`, not both".into())),
            (Some(one), None) => opts.endpoints = vec![one.parse()?],
            (None, Some(list)) => opts.endpoints = OracleEndpoint::parse_list(&list)?,
            (None, None) => {}
        }
        if self.limit.is_some() { opts.limit = self.limit; }
        Ok(())
    }
}

/// 读取并解析 TOML 配置文件
pub fn load_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let txt = std::fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
    parse_config(&txt)
}

pub(crate) fn parse_config(txt: &str) -> Result<FileConfig, ConfigError> {
    Ok(toml::from_str(txt)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{Provider, WordCount};

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg = parse_config("workers = 3\nwords = \"24\"\nscheme = \"bip84\"\n").unwrap();
        let mut opts = ScanOptions::default();
        let endpoints = opts.endpoints.clone();
        cfg.apply(&mut opts).unwrap();
        assert_eq!(opts.workers, 3);
        assert_eq!(opts.queue_capacity, 6);
        assert_eq!(opts.words, WordCount::TwentyFour);
        assert_eq!(opts.schemes, vec![DerivationScheme::Bip84]);
        assert_eq!(opts.endpoints, endpoints);
        assert_eq!(opts.addresses_per_candidate, 10);
    }

    #[test]
    fn explicit_capacity_wins_over_worker_default() {
        let cfg = parse_config("workers = 4\nqueue_capacity = 1\nretry_delay_ms = 5\nlimit = 100\n").unwrap();
        let mut opts = ScanOptions::default();
        cfg.apply(&mut opts).unwrap();
        assert_eq!(opts.queue_capacity, 1);
        assert_eq!(opts.retry_delay, Duration::from_millis(5));
        assert_eq!(opts.limit, Some(100));
    }

    #[test]
    fn retry_cap_schemes_and_endpoint_lists() {
        let cfg = parse_config(
            "max_retry_delay_ms = 250\nschemes = [\"bip44\", \"native\"]\nendpoints = [\"blockstream\", \"blockchain\"]\n",
        )
        .unwrap();
        let mut opts = ScanOptions::default();
        cfg.apply(&mut opts).unwrap();
        assert_eq!(opts.max_retry_delay, Duration::from_millis(250));
        assert_eq!(opts.schemes, vec![DerivationScheme::Bip44, DerivationScheme::Bip84]);
        assert_eq!(opts.endpoints.len(), 2);
        assert_eq!(opts.endpoints[0].provider, Provider::Esplora);
        assert_eq!(opts.endpoints[1], OracleEndpoint::default());
    }

    #[test]
    fn single_and_list_forms_are_exclusive() {
        let cfg = parse_config("scheme = \"bip44\"\nschemes = [\"bip84\"]\n").unwrap();
        assert!(matches!(cfg.apply(&mut ScanOptions::default()), Err(ConfigError::Invalid(_))));
        let cfg = parse_config("endpoint = \"blockchain\"\nendpoints = [\"mempool\"]\n").unwrap();
        assert!(matches!(cfg.apply(&mut ScanOptions::default()), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_unknown_keys_and_bad_values() {
        assert!(matches!(parse_config("threads = 2\n"), Err(ConfigError::Parse(_))));
        let cfg = parse_config("words = \"15\"\n").unwrap();
        let mut opts = ScanOptions::default();
        assert!(matches!(cfg.apply(&mut opts), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_config(Path::new("/nonexistent/seedscan.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
