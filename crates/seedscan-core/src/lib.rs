//! 助记词空间扫描核心库
//!
//! 设计要点：
//! - 单生产者 → 有界队列 → 固定大小 worker 池；队列容量即唯一的背压点。
//! - 共享状态（found 标志、取消标志、统计计数器）集中在 `ScanState`，由协调器持有并以句柄形式传给 worker。
//! - found 标志只允许一次 false→true 的 CAS 转换，赢家 worker 独占唯一一次结果落盘。
//! - 余额查询失败（重试耗尽）与“确认为零”分开计数与记录日志，均不终止扫描。
//! - 派生地址、余额查询、结果落盘均以 trait 作为边界，便于替换与测试；多端点回退本身也是一个 oracle。

mod config;
mod derive;
mod error;
mod generator;
mod oracle;
mod options;
mod scan;
mod sink;
mod state;
mod stats;
mod types;
mod worker;

pub use config::{load_config, FileConfig};
pub use derive::{AddressDeriver, Bip44Deriver};
pub use error::{ConfigError, DeriveError, GenerateError, OracleError, ScanError, SinkError};
pub use generator::{CandidateSource, MnemonicGenerator};
pub use oracle::{
    check_balances, parse_address_balance, parse_balance_response, BalanceOracle, CheckOutcome, FallbackOracle, HttpOracle,
    RetryPolicy,
};
pub use options::{DerivationScheme, OracleEndpoint, Provider, ScanOptions, WordCount, DEFAULT_ENDPOINT};
pub use scan::{CancelHandle, ScanSummary, Scanner, StopReason};
pub use sink::{read_records, JsonlSink, ResultSink};
pub use state::ScanState;
pub use stats::{Reporter, StatsAggregator, StatsSnapshot};
pub use types::{format_scaled, AddressSet, BalanceReading, Candidate, FoundRecord, FundedAddress, SCALE};
