//! 公共类型（对外暴露）
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 最小单位 → 展示单位的换算倍数（1 BTC = 1e8 satoshi）
pub const SCALE: u64 = 100_000_000;

/// 候选秘密：一条随机生成的助记词
///
/// 生成后不可变，只会被一个 worker 消费一次。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    phrase: String,
}

impl Candidate {
    pub fn new(phrase: impl Into<String>) -> Self {
        Self { phrase: phrase.into() }
    }

    pub fn phrase(&self) -> &str {
        &self.phrase
    }

    pub fn word_count(&self) -> usize {
        self.phrase.split_whitespace().count()
    }

    /// 状态行展示用的预览：前三个词 + "..."
    pub fn preview(&self) -> String {
        let head: Vec<&str> = self.phrase.split_whitespace().take(3).collect();
        format!("{}...", head.join(" "))
    }
}

/// 由单个候选派生出的有序地址序列
///
/// 多方案派生时每个地址带有方案标签；`new` 构造的集合不带标签。
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AddressSet {
    addresses: Vec<String>,
    schemes: Vec<String>,
}

impl AddressSet {
    pub fn new(addresses: Vec<String>) -> Self {
        Self { addresses, schemes: Vec::new() }
    }

    /// 追加一组同一方案的地址
    pub fn extend_labeled(&mut self, addresses: impl IntoIterator<Item = String>, scheme: &str) {
        for address in addresses {
            self.addresses.push(address);
            self.schemes.push(scheme.to_string());
        }
    }

    /// 第 i 个地址的方案标签
    pub fn scheme_of(&self, i: usize) -> Option<&str> {
        self.schemes.get(i).map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.addresses
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.addresses.iter()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.addresses
    }
}

/// 单个地址的余额读数
/// - `confirmed = true`：余额来自 oracle 的成功响应
/// - `confirmed = false`：查询失败，余额未知（按 0 处理但不可与“确认为零”混淆）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceReading {
    pub address: String,
    pub balance: u64,
    pub confirmed: bool,
}

impl BalanceReading {
    pub fn confirmed(address: impl Into<String>, balance: u64) -> Self {
        Self { address: address.into(), balance, confirmed: true }
    }

    pub fn unknown(address: impl Into<String>) -> Self {
        Self { address: address.into(), balance: 0, confirmed: false }
    }

    pub fn is_funded(&self) -> bool {
        self.confirmed && self.balance > 0
    }
}

/// 命中记录中单个有余额的地址
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundedAddress {
    pub address: String,
    pub balance: u64,
    pub scaled: String,
    /// 派生该地址的方案
    #[serde(default)]
    pub scheme: String,
}

/// 落盘单元：一次命中的完整描述（JSON Lines 中的一行）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoundRecord {
    pub phrase: String,
    pub word_count: usize,
    pub scheme: String,
    pub addresses: Vec<String>,
    pub funded: Vec<FundedAddress>,
    pub total_balance: u64,
    pub total_scaled: String,
    pub discovered_at: DateTime<Utc>,
}

impl FoundRecord {
    /// 从读数构建命中记录；没有任何非零余额时返回 None
    ///
    /// `readings` 与 `addresses` 顺序一致；地址没有方案标签时使用 `scheme`。
    pub fn from_readings(candidate: &Candidate, addresses: &AddressSet, readings: &[BalanceReading], scheme: &str) -> Option<Self> {
        let funded: Vec<FundedAddress> = readings
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_funded())
            .map(|(i, r)| FundedAddress {
                address: r.address.clone(),
                balance: r.balance,
                scaled: format_scaled(r.balance),
                scheme: addresses.scheme_of(i).unwrap_or(scheme).to_string(),
            })
            .collect();
        if funded.is_empty() {
            return None;
        }
        let total_balance = funded.iter().fold(0u64, |acc, f| acc.saturating_add(f.balance));
        Some(Self {
            phrase: candidate.phrase().to_string(),
            word_count: candidate.word_count(),
            scheme: scheme.to_string(),
            addresses: addresses.as_slice().to_vec(),
            funded,
            total_balance,
            total_scaled: format_scaled(total_balance),
            discovered_at: Utc::now(),
        })
    }
}

/// 以 8 位小数展示最小单位金额（整数运算，无浮点误差）
pub fn format_scaled(amount: u64) -> String {
    format!("{}.{:08}", amount / SCALE, amount % SCALE)
}
