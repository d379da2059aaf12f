//! 余额查询（HTTP 接口 + 多端点回退 + 重试/退避）
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::debug;

use crate::error::OracleError;
use crate::options::{OracleEndpoint, Provider};
use crate::state::ScanState;
use crate::types::BalanceReading;

/// 余额来源：地址集合 → 每个地址的整数余额（最小单位）
///
/// 响应中缺失的地址按余额 0 处理。
pub trait BalanceOracle: Send + Sync {
    fn query_balances(&self, addresses: &[String]) -> Result<HashMap<String, u64>, OracleError>;
}

/// 单个端点的 HTTP 客户端
///
/// blockchain.info 格式一次请求查询全部地址；其他格式逐个地址请求。
pub struct HttpOracle {
    client: Client,
    endpoint: OracleEndpoint,
}

impl HttpOracle {
    pub fn new(endpoint: OracleEndpoint, timeout: Duration) -> Result<Self, OracleError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("seedscan/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| OracleError::Transport(e.to_string()))?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &OracleEndpoint {
        &self.endpoint
    }

    /// 批量查询的 URL：`<base>a1|a2|...`
    fn batch_url(&self, addresses: &[String]) -> String {
        format!("{}{}", self.endpoint.base, addresses.join("|"))
    }

    /// 单地址查询的 URL
    fn address_url(&self, address: &str) -> String {
        match self.endpoint.provider {
            Provider::BlockCypher => format!("{}{}/balance", self.endpoint.base, address),
            _ => format!("{}{}", self.endpoint.base, address),
        }
    }

    fn get(&self, url: &str) -> Result<String, OracleError> {
        let resp = self.client.get(url).send().map_err(|e| OracleError::Transport(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(OracleError::Status(status.as_u16()));
        }
        resp.text().map_err(|e| OracleError::Transport(e.to_string()))
    }
}

impl BalanceOracle for HttpOracle {
    fn query_balances(&self, addresses: &[String]) -> Result<HashMap<String, u64>, OracleError> {
        if self.endpoint.provider == Provider::BlockchainInfo {
            return parse_balance_response(&self.get(&self.batch_url(addresses))?);
        }
        let mut balances = HashMap::with_capacity(addresses.len());
        for address in addresses {
            let body = self.get(&self.address_url(address))?;
            let balance = parse_address_balance(self.endpoint.provider, address, &body)?;
            balances.insert(address.clone(), balance);
        }
        Ok(balances)
    }
}

/// 按顺序尝试多个 oracle，返回第一个成功的结果
///
/// 整轮只对应一次 `query_balances` 调用，因此在重试逻辑中只算一次尝试；
/// 全部失败时返回最后一个错误。
pub struct FallbackOracle {
    oracles: Vec<Arc<dyn BalanceOracle>>,
}

impl FallbackOracle {
    pub fn new(oracles: Vec<Arc<dyn BalanceOracle>>) -> Self {
        Self { oracles }
    }

    /// 每个端点各建一个客户端，顺序即回退顺序
    pub fn from_endpoints(endpoints: &[OracleEndpoint], timeout: Duration) -> Result<Self, OracleError> {
        let mut oracles: Vec<Arc<dyn BalanceOracle>> = Vec::with_capacity(endpoints.len());
        for ep in endpoints {
            oracles.push(Arc::new(HttpOracle::new(ep.clone(), timeout)?));
        }
        Ok(Self::new(oracles))
    }

    pub fn len(&self) -> usize {
        self.oracles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.oracles.is_empty()
    }
}

impl BalanceOracle for FallbackOracle {
    fn query_balances(&self, addresses: &[String]) -> Result<HashMap<String, u64>, OracleError> {
        let mut last_error = OracleError::Transport("no oracle endpoints configured".into());
        for (i, oracle) in self.oracles.iter().enumerate() {
            match oracle.query_balances(addresses) {
                Ok(balances) => return Ok(balances),
                Err(e) => {
                    debug!(endpoint = i, error = %e, "oracle endpoint failed, trying next");
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }
}

/// 响应中单个地址的条目（只关心最终余额）
#[derive(Debug, Deserialize)]
struct AddressEntry {
    final_balance: u64,
}

/// 解析 `{"<addr>": {"final_balance": n, ...}, ...}` 格式的响应
pub fn parse_balance_response(body: &str) -> Result<HashMap<String, u64>, OracleError> {
    let parsed: HashMap<String, AddressEntry> =
        serde_json::from_str(body).map_err(|e| OracleError::Malformed(e.to_string()))?;
    Ok(parsed.into_iter().map(|(addr, entry)| (addr, entry.final_balance)).collect())
}

#[derive(Debug, Deserialize)]
struct EsploraAddress {
    chain_stats: EsploraStats,
}

#[derive(Debug, Deserialize)]
struct EsploraStats {
    funded_txo_sum: u64,
    spent_txo_sum: u64,
}

#[derive(Debug, Deserialize)]
struct BlockchairResponse {
    data: HashMap<String, BlockchairDashboard>,
}

#[derive(Debug, Deserialize)]
struct BlockchairDashboard {
    address: BlockchairAddress,
}

#[derive(Debug, Deserialize)]
struct BlockchairAddress {
    balance: u64,
}

/// 解析单地址接口的响应（只计已确认余额）
pub fn parse_address_balance(provider: Provider, address: &str, body: &str) -> Result<u64, OracleError> {
    let malformed = |e: serde_json::Error| OracleError::Malformed(e.to_string());
    match provider {
        Provider::BlockchainInfo => Ok(parse_balance_response(body)?.get(address).copied().unwrap_or(0)),
        Provider::Esplora => {
            let parsed: EsploraAddress = serde_json::from_str(body).map_err(malformed)?;
            Ok(parsed.chain_stats.funded_txo_sum.saturating_sub(parsed.chain_stats.spent_txo_sum))
        }
        Provider::BlockCypher => {
            let parsed: AddressEntry = serde_json::from_str(body).map_err(malformed)?;
            Ok(parsed.final_balance)
        }
        Provider::Blockchair => {
            let parsed: BlockchairResponse = serde_json::from_str(body).map_err(malformed)?;
            parsed
                .data
                .get(address)
                .map(|d| d.address.balance)
                .ok_or_else(|| OracleError::Malformed(format!("address {address} missing from response")))
        }
    }
}

/// 重试策略：共 `max_attempts` 次尝试，间隔从 `delay` 开始翻倍，每次等待都不超过 `max_delay`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration, max_delay: Duration) -> Self {
        Self { max_attempts, delay, max_delay }
    }
}

/// 一次余额检查的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// oracle 成功响应；读数与地址顺序一致
    Confirmed(Vec<BalanceReading>),
    /// 重试耗尽（或被停止信号打断），余额未知
    Unknown { attempts: u32, last_error: Option<OracleError> },
}

/// 带重试的批量余额检查
///
/// 退避等待可被停止信号打断；已经发出的请求只受客户端超时约束。
pub fn check_balances(oracle: &dyn BalanceOracle, addresses: &[String], policy: &RetryPolicy, state: &ScanState) -> CheckOutcome {
    let mut delay = policy.delay.min(policy.max_delay);
    let mut last_error = None;
    let mut attempts = 0;

    while attempts < policy.max_attempts {
        attempts += 1;
        match oracle.query_balances(addresses) {
            Ok(balances) => {
                let readings = addresses
                    .iter()
                    .map(|a| BalanceReading::confirmed(a.clone(), balances.get(a).copied().unwrap_or(0)))
                    .collect();
                return CheckOutcome::Confirmed(readings);
            }
            Err(e) => {
                debug!(attempt = attempts, max = policy.max_attempts, error = %e, "balance query failed");
                last_error = Some(e);
            }
        }
        if attempts < policy.max_attempts {
            if !state.pause(delay) {
                break;
            }
            delay = (delay * 2).min(policy.max_delay);
        }
    }

    CheckOutcome::Unknown { attempts, last_error }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// 前 `failures` 次调用失败，之后返回固定余额
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    impl BalanceOracle for Flaky {
        fn query_balances(&self, addresses: &[String]) -> Result<HashMap<String, u64>, OracleError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(OracleError::Status(429));
            }
            Ok(addresses.iter().map(|a| (a.clone(), 7)).collect())
        }
    }

    fn policy(r: u32) -> RetryPolicy {
        RetryPolicy::new(r, Duration::from_millis(1), Duration::from_millis(4))
    }

    fn addrs() -> Vec<String> {
        vec!["a".into(), "b".into()]
    }

    #[test]
    fn succeeds_after_r_minus_one_failures() {
        let oracle = Flaky { failures: 2, calls: AtomicU32::new(0) };
        let state = ScanState::new();
        let out = check_balances(&oracle, &addrs(), &policy(3), &state);
        assert_eq!(
            out,
            CheckOutcome::Confirmed(vec![BalanceReading::confirmed("a", 7), BalanceReading::confirmed("b", 7)])
        );
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn r_failures_yield_unknown() {
        let oracle = Flaky { failures: 3, calls: AtomicU32::new(0) };
        let state = ScanState::new();
        let out = check_balances(&oracle, &addrs(), &policy(3), &state);
        assert_eq!(out, CheckOutcome::Unknown { attempts: 3, last_error: Some(OracleError::Status(429)) });
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn cancellation_cuts_retries_short() {
        let oracle = Flaky { failures: u32::MAX, calls: AtomicU32::new(0) };
        let state = ScanState::new();
        state.cancel();
        let out = check_balances(&oracle, &addrs(), &policy(5), &state);
        assert!(matches!(out, CheckOutcome::Unknown { attempts: 1, .. }));
    }

    #[test]
    fn parses_batched_response_and_defaults_missing() {
        let body = r#"{
            "1LqBGSKuX5yYUonjxT5qGfpUsXKYYWeabA": {"final_balance": 50000, "n_tx": 2, "total_received": 90000},
            "1Ak8PffB2meyfYnbXZR9EGfLfFZVpzJvQP": {"final_balance": 0, "n_tx": 0, "total_received": 0}
        }"#;
        let map = parse_balance_response(body).unwrap();
        assert_eq!(map.get("1LqBGSKuX5yYUonjxT5qGfpUsXKYYWeabA"), Some(&50_000));
        assert_eq!(map.get("1Ak8PffB2meyfYnbXZR9EGfLfFZVpzJvQP"), Some(&0));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn malformed_response_is_distinguished() {
        assert!(matches!(parse_balance_response("<html>rate limited</html>"), Err(OracleError::Malformed(_))));
        assert!(matches!(parse_balance_response(r#"{"a": {"balance": 1}}"#), Err(OracleError::Malformed(_))));
    }

    #[test]
    fn batched_url_joins_with_pipe() {
        let ep = OracleEndpoint::new(Provider::BlockchainInfo, "https://example.invalid/balance?active=");
        let oracle = HttpOracle::new(ep, Duration::from_secs(1)).unwrap();
        assert_eq!(oracle.batch_url(&addrs()), "https://example.invalid/balance?active=a|b");
    }

    #[test]
    fn per_address_urls_follow_provider() {
        let esplora = HttpOracle::new("blockstream".parse().unwrap(), Duration::from_secs(1)).unwrap();
        assert_eq!(esplora.address_url("bc1qx"), "https://blockstream.info/api/address/bc1qx");
        let cypher = HttpOracle::new("blockcypher".parse().unwrap(), Duration::from_secs(1)).unwrap();
        assert_eq!(cypher.address_url("1abc"), "https://api.blockcypher.com/v1/btc/main/addrs/1abc/balance");
    }

    #[test]
    fn parses_single_address_formats() {
        let esplora = r#"{"address":"bc1q","chain_stats":{"funded_txo_sum":90000,"spent_txo_sum":40000,"tx_count":3},
            "mempool_stats":{"funded_txo_sum":7,"spent_txo_sum":0,"tx_count":1}}"#;
        assert_eq!(parse_address_balance(Provider::Esplora, "bc1q", esplora).unwrap(), 50_000);

        let cypher = r#"{"address":"1abc","balance":1200,"final_balance":1000,"n_tx":4}"#;
        assert_eq!(parse_address_balance(Provider::BlockCypher, "1abc", cypher).unwrap(), 1000);

        let chair = r#"{"data":{"1abc":{"address":{"type":"pubkeyhash","balance":321}}},"context":{"code":200}}"#;
        assert_eq!(parse_address_balance(Provider::Blockchair, "1abc", chair).unwrap(), 321);
        assert!(matches!(
            parse_address_balance(Provider::Blockchair, "1other", chair),
            Err(OracleError::Malformed(_))
        ));
        assert!(matches!(parse_address_balance(Provider::Esplora, "x", "Too Many Requests"), Err(OracleError::Malformed(_))));
    }

    /// 永远失败并统计调用次数
    struct Refusing(AtomicU32);

    impl BalanceOracle for Refusing {
        fn query_balances(&self, _: &[String]) -> Result<HashMap<String, u64>, OracleError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(OracleError::Status(503))
        }
    }

    #[test]
    fn fallback_uses_next_endpoint_on_failure() {
        let first = Arc::new(Refusing(AtomicU32::new(0)));
        let second = Arc::new(Flaky { failures: 0, calls: AtomicU32::new(0) });
        let oracle = FallbackOracle::new(vec![first.clone() as Arc<dyn BalanceOracle>, second.clone()]);
        let state = ScanState::new();

        let out = check_balances(&oracle, &addrs(), &policy(3), &state);
        assert!(matches!(out, CheckOutcome::Confirmed(_)));
        assert_eq!(first.0.load(Ordering::SeqCst), 1);
        assert_eq!(second.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn full_failed_pass_counts_as_one_attempt() {
        let first = Arc::new(Refusing(AtomicU32::new(0)));
        let second = Arc::new(Refusing(AtomicU32::new(0)));
        let oracle = FallbackOracle::new(vec![first.clone() as Arc<dyn BalanceOracle>, second.clone()]);
        let state = ScanState::new();

        let out = check_balances(&oracle, &addrs(), &policy(2), &state);
        assert_eq!(out, CheckOutcome::Unknown { attempts: 2, last_error: Some(OracleError::Status(503)) });
        assert_eq!(first.0.load(Ordering::SeqCst), 2);
        assert_eq!(second.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unreachable_endpoint_falls_through_to_the_next() {
        let dead = OracleEndpoint::new(Provider::BlockchainInfo, "http://127.0.0.1:9/balance?active=");
        let live = Arc::new(Flaky { failures: 0, calls: AtomicU32::new(0) });
        let dead: Arc<dyn BalanceOracle> = Arc::new(HttpOracle::new(dead, Duration::from_secs(2)).unwrap());
        let oracle = FallbackOracle::new(vec![dead, live.clone()]);
        let balances = oracle.query_balances(&addrs()).unwrap();
        assert_eq!(balances.get("a"), Some(&7));
        assert_eq!(live.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_fallback_reports_transport_error() {
        let oracle = FallbackOracle::new(Vec::new());
        assert!(oracle.is_empty());
        assert!(matches!(oracle.query_balances(&addrs()), Err(OracleError::Transport(_))));
    }

    #[test]
    fn first_retry_wait_is_capped_by_max_delay() {
        let oracle = Flaky { failures: 2, calls: AtomicU32::new(0) };
        let state = ScanState::new();
        let policy = RetryPolicy::new(3, Duration::from_secs(30), Duration::from_millis(20));
        let started = std::time::Instant::now();
        let out = check_balances(&oracle, &addrs(), &policy, &state);
        assert!(matches!(out, CheckOutcome::Confirmed(_)));
        assert!(started.elapsed() < Duration::from_secs(5), "waited {:?}", started.elapsed());
    }
}
