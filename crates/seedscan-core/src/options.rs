//! 扫描选项（模块）
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// 默认的余额查询端点（blockchain.info 批量查询，地址以 `|` 拼接）
pub const DEFAULT_ENDPOINT: &str = "https://blockchain.info/balance?active=";
const BLOCKSTREAM_ENDPOINT: &str = "https://blockstream.info/api/address/";
const MEMPOOL_ENDPOINT: &str = "https://mempool.space/api/address/";
const BLOCKCYPHER_ENDPOINT: &str = "https://api.blockcypher.com/v1/btc/main/addrs/";
const BLOCKCHAIR_ENDPOINT: &str = "https://api.blockchair.com/bitcoin/dashboards/address/";

/// 助记词长度
/// - Twelve：128 位熵
/// - TwentyFour：256 位熵
/// - Mixed：每个候选随机选择 12 或 24 词
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordCount {
    Twelve,
    TwentyFour,
    Mixed,
}

impl FromStr for WordCount {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "12" => Ok(Self::Twelve),
            "24" => Ok(Self::TwentyFour),
            "mixed" | "both" => Ok(Self::Mixed),
            other => Err(ConfigError::Invalid(format!("word count must be 12, 24 or mixed, got {other:?}"))),
        }
    }
}

/// 派生方案（BIP 编号即路径中的 purpose）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivationScheme {
    /// m/44'/0'/0'，P2PKH 传统地址
    Bip44,
    /// m/49'/0'/0'，P2SH-P2WPKH 嵌套隔离见证
    Bip49,
    /// m/84'/0'/0'，P2WPKH 原生隔离见证
    Bip84,
}

impl DerivationScheme {
    pub fn purpose(self) -> u32 {
        match self {
            Self::Bip44 => 44,
            Self::Bip49 => 49,
            Self::Bip84 => 84,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Bip44 => "bip44",
            Self::Bip49 => "bip49",
            Self::Bip84 => "bip84",
        }
    }
}

impl fmt::Display for DerivationScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for DerivationScheme {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bip44" | "legacy" => Ok(Self::Bip44),
            "bip49" | "nested" => Ok(Self::Bip49),
            "bip84" | "native" => Ok(Self::Bip84),
            other => Err(ConfigError::Invalid(format!("unknown derivation scheme {other:?}"))),
        }
    }
}

impl DerivationScheme {
    pub const ALL: [Self; 3] = [Self::Bip44, Self::Bip49, Self::Bip84];

    /// 解析方案列表：每项可以是逗号分隔的多个方案，"all" 表示全部；重复项只保留第一次出现
    pub fn parse_list<S: AsRef<str>>(items: &[S]) -> Result<Vec<Self>, ConfigError> {
        let mut out = Vec::new();
        for item in items {
            for part in item.as_ref().split(',').map(str::trim).filter(|p| !p.is_empty()) {
                let parsed = if part.eq_ignore_ascii_case("all") { Self::ALL.to_vec() } else { vec![part.parse()?] };
                for scheme in parsed {
                    if !out.contains(&scheme) {
                        out.push(scheme);
                    }
                }
            }
        }
        if out.is_empty() {
            return Err(ConfigError::Invalid("at least one derivation scheme is required".into()));
        }
        Ok(out)
    }
}

/// 余额接口的响应格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    /// blockchain.info `balance?active=a|b`，一次请求查询全部地址
    BlockchainInfo,
    /// Esplora（blockstream.info、mempool.space）`/api/address/<addr>`
    Esplora,
    /// BlockCypher `/v1/btc/main/addrs/<addr>/balance`
    BlockCypher,
    /// Blockchair `/bitcoin/dashboards/address/<addr>`
    Blockchair,
}

impl Provider {
    pub fn label(self) -> &'static str {
        match self {
            Self::BlockchainInfo => "blockchain",
            Self::Esplora => "esplora",
            Self::BlockCypher => "blockcypher",
            Self::Blockchair => "blockchair",
        }
    }
}

/// 一个余额查询端点：响应格式 + URL 前缀
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleEndpoint {
    pub provider: Provider,
    pub base: String,
}

impl OracleEndpoint {
    pub fn new(provider: Provider, base: impl Into<String>) -> Self {
        Self { provider, base: base.into() }
    }
}

impl Default for OracleEndpoint {
    fn default() -> Self {
        Self::new(Provider::BlockchainInfo, DEFAULT_ENDPOINT)
    }
}

impl fmt::Display for OracleEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.provider.label(), self.base)
    }
}

/// 接受三种写法：
/// - 服务名：`blockchain`、`blockstream`、`mempool`、`blockcypher`、`blockchair`
/// - `格式=URL 前缀`：如 `esplora=http://127.0.0.1:3000/address/`
/// - 裸 URL：按 blockchain.info 批量格式处理
impl FromStr for OracleEndpoint {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ConfigError::Invalid("oracle endpoint is empty".into()));
        }
        if s.starts_with("http://") || s.starts_with("https://") {
            return Ok(Self::new(Provider::BlockchainInfo, s));
        }
        if let Some((kind, base)) = s.split_once('=') {
            let provider = match kind.trim().to_ascii_lowercase().as_str() {
                "blockchain" => Provider::BlockchainInfo,
                "esplora" => Provider::Esplora,
                "blockcypher" => Provider::BlockCypher,
                "blockchair" => Provider::Blockchair,
                other => return Err(ConfigError::Invalid(format!("unknown endpoint format {other:?}"))),
            };
            let base = base.trim();
            if base.is_empty() {
                return Err(ConfigError::Invalid(format!("endpoint {s:?} has no URL")));
            }
            return Ok(Self::new(provider, base));
        }
        match s.to_ascii_lowercase().as_str() {
            "blockchain" | "blockchain.info" => Ok(Self::default()),
            "blockstream" => Ok(Self::new(Provider::Esplora, BLOCKSTREAM_ENDPOINT)),
            "mempool" => Ok(Self::new(Provider::Esplora, MEMPOOL_ENDPOINT)),
            "blockcypher" => Ok(Self::new(Provider::BlockCypher, BLOCKCYPHER_ENDPOINT)),
            "blockchair" => Ok(Self::new(Provider::Blockchair, BLOCKCHAIR_ENDPOINT)),
            other => Err(ConfigError::Invalid(format!("unknown oracle endpoint {other:?}"))),
        }
    }
}

impl OracleEndpoint {
    /// 逐项解析端点列表，保持顺序（即回退顺序）
    pub fn parse_list<S: AsRef<str>>(items: &[S]) -> Result<Vec<Self>, ConfigError> {
        items.iter().map(|s| s.as_ref().parse()).collect()
    }
}

/// 扫描选项（启动时固定，运行期间不变）
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// worker 数量 W；默认等于 CPU 核数
    pub workers: usize,
    /// 每个候选派生的地址数 K（外部链/找零链交替）
    pub addresses_per_candidate: usize,
    /// 有界队列容量 C
    pub queue_capacity: usize,
    /// 单次 oracle 调用超时 T
    pub oracle_timeout: Duration,
    /// 每次余额检查的最大尝试次数 R（含首次）
    pub max_attempts: u32,
    /// 首次重试前的等待，之后每次翻倍
    pub retry_delay: Duration,
    /// 重试等待的上限（包括第一次等待）
    pub max_retry_delay: Duration,
    /// 生产者两次入队之间的节流间隔 D
    pub produce_delay: Duration,
    /// 状态行刷新间隔（固定时间间隔策略）
    pub status_interval: Duration,
    pub words: WordCount,
    /// 派生方案；多个方案时每个方案各派生 K 个地址，合并查询
    pub schemes: Vec<DerivationScheme>,
    /// 结果文件（JSON Lines，追加写）
    pub output: PathBuf,
    /// 余额端点，按顺序回退；一轮全部失败才算一次失败的尝试
    pub endpoints: Vec<OracleEndpoint>,
    /// 最多生成的候选数；None 表示无限
    pub limit: Option<u64>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        let workers = num_cpus::get().max(1);
        Self {
            workers,
            addresses_per_candidate: 10,
            queue_capacity: workers * 2,
            oracle_timeout: Duration::from_secs(10),
            max_attempts: 3,
            retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(30),
            produce_delay: Duration::from_millis(10),
            status_interval: Duration::from_millis(1000),
            words: WordCount::Twelve,
            schemes: vec![DerivationScheme::Bip44],
            output: PathBuf::from("./found.jsonl"),
            endpoints: vec![OracleEndpoint::default()],
            limit: None,
        }
    }
}

impl ScanOptions {
    /// 校验参数组合；任何为零的容量类参数都会导致扫描无法推进
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.addresses_per_candidate == 0 {
            return Err(ConfigError::Invalid("addresses per candidate must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue capacity must be at least 1".into()));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max attempts must be at least 1".into()));
        }
        if self.status_interval.is_zero() {
            return Err(ConfigError::Invalid("status interval must be non-zero".into()));
        }
        if self.schemes.is_empty() {
            return Err(ConfigError::Invalid("at least one derivation scheme is required".into()));
        }
        if self.endpoints.is_empty() {
            return Err(ConfigError::Invalid("at least one oracle endpoint is required".into()));
        }
        if self.endpoints.iter().any(|ep| ep.base.trim().is_empty()) {
            return Err(ConfigError::Invalid("oracle endpoint is empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let opts = ScanOptions::default();
        assert!(opts.validate().is_ok());
        assert!(opts.workers >= 1);
        assert_eq!(opts.queue_capacity, opts.workers * 2);
        assert_eq!(opts.addresses_per_candidate, 10);
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let mut opts = ScanOptions::default();
        opts.queue_capacity = 0;
        assert!(matches!(opts.validate(), Err(ConfigError::Invalid(_))));

        let mut opts = ScanOptions::default();
        opts.max_attempts = 0;
        assert!(opts.validate().is_err());

        let mut opts = ScanOptions::default();
        opts.workers = 0;
        assert!(opts.validate().is_err());
    }

    #[test]
    fn parses_word_counts_and_schemes() {
        assert_eq!("12".parse::<WordCount>().unwrap(), WordCount::Twelve);
        assert_eq!("Mixed".parse::<WordCount>().unwrap(), WordCount::Mixed);
        assert!("13".parse::<WordCount>().is_err());
        assert_eq!("bip84".parse::<DerivationScheme>().unwrap(), DerivationScheme::Bip84);
        assert_eq!(DerivationScheme::Bip49.purpose(), 49);
        assert!("bip32".parse::<DerivationScheme>().is_err());
    }

    #[test]
    fn scheme_lists_expand_and_dedupe() {
        let all = DerivationScheme::parse_list(&["all"]).unwrap();
        assert_eq!(all, DerivationScheme::ALL.to_vec());
        let picked = DerivationScheme::parse_list(&["bip84,legacy", "bip84"]).unwrap();
        assert_eq!(picked, vec![DerivationScheme::Bip84, DerivationScheme::Bip44]);
        assert!(DerivationScheme::parse_list::<&str>(&[]).is_err());
        assert!(DerivationScheme::parse_list(&["bip44,bip32"]).is_err());
    }

    #[test]
    fn endpoints_parse_names_pairs_and_urls() {
        let eps = OracleEndpoint::parse_list(&[
            "blockstream",
            "blockcypher=http://127.0.0.1:8080/addrs/",
            "https://example.invalid/balance?active=",
        ])
        .unwrap();
        assert_eq!(eps[0], OracleEndpoint::new(Provider::Esplora, BLOCKSTREAM_ENDPOINT));
        assert_eq!(eps[1], OracleEndpoint::new(Provider::BlockCypher, "http://127.0.0.1:8080/addrs/"));
        assert_eq!(eps[2].provider, Provider::BlockchainInfo);
        assert_eq!("blockchain".parse::<OracleEndpoint>().unwrap(), OracleEndpoint::default());
        assert!("esplora=".parse::<OracleEndpoint>().is_err());
        assert!("electrum=tcp://x".parse::<OracleEndpoint>().is_err());
        assert!("nowhere".parse::<OracleEndpoint>().is_err());
    }

    #[test]
    fn empty_scheme_or_endpoint_lists_are_rejected() {
        let mut opts = ScanOptions::default();
        opts.schemes.clear();
        assert!(opts.validate().is_err());

        let mut opts = ScanOptions::default();
        opts.endpoints.clear();
        assert!(opts.validate().is_err());
    }
}
