//! 地址派生（BIP39 助记词 → BIP32 账户 → 地址）
use bip39::{Language, Mnemonic};
use bitcoin::bip32::{ChildNumber, Xpriv, Xpub};
use bitcoin::secp256k1::{self, All, Secp256k1};
use bitcoin::{Address, CompressedPublicKey, Network};

use crate::error::DeriveError;
use crate::options::DerivationScheme;
use crate::types::{AddressSet, Candidate};

/// 纯函数式的派生边界：相同输入必须得到相同的地址序列
pub trait AddressDeriver: Send + Sync {
    fn derive(&self, candidate: &Candidate, count: usize) -> Result<AddressSet, DeriveError>;

    /// 写入命中记录的派生方案名
    fn scheme_label(&self) -> &str {
        "custom"
    }
}

/// 第 i 个地址 → (链, 地址索引)：偶数为外部链，奇数为找零链
pub(crate) fn slot(i: usize) -> (u32, u32) {
    ((i % 2) as u32, (i / 2) as u32)
}

/// 比特币主网 BIP44/49/84 派生器
///
/// 账户级 xpub（m/purpose'/0'/0'）每个候选每个方案只派生一次，其后的链与索引均为非硬化派生。
/// 选择多个方案时每个方案各派生 `count` 个地址，按方案顺序拼接，每个地址带有方案标签。
pub struct Bip44Deriver {
    schemes: Vec<DerivationScheme>,
    label: String,
    network: Network,
    secp: Secp256k1<All>,
}

impl Bip44Deriver {
    pub fn new(scheme: DerivationScheme) -> Self {
        Self::with_schemes(vec![scheme])
    }

    /// 多方案派生；空列表按 BIP44 处理
    pub fn with_schemes(mut schemes: Vec<DerivationScheme>) -> Self {
        if schemes.is_empty() {
            schemes.push(DerivationScheme::Bip44);
        }
        let label = schemes.iter().map(|s| s.label()).collect::<Vec<_>>().join("+");
        Self { schemes, label, network: Network::Bitcoin, secp: Secp256k1::new() }
    }

    pub fn schemes(&self) -> &[DerivationScheme] {
        &self.schemes
    }

    fn account_xpub(&self, master: &Xpriv, scheme: DerivationScheme) -> Result<Xpub, DeriveError> {
        let path = [
            ChildNumber::from_hardened_idx(scheme.purpose())?,
            ChildNumber::from_hardened_idx(0)?,
            ChildNumber::from_hardened_idx(0)?,
        ];
        let account = master.derive_priv(&self.secp, &path)?;
        Ok(Xpub::from_priv(&self.secp, &account))
    }

    fn encode(&self, scheme: DerivationScheme, pk: secp256k1::PublicKey) -> String {
        let pk = CompressedPublicKey(pk);
        let addr = match scheme {
            DerivationScheme::Bip44 => Address::p2pkh(pk.pubkey_hash(), self.network),
            DerivationScheme::Bip49 => Address::p2shwpkh(&pk, self.network),
            DerivationScheme::Bip84 => Address::p2wpkh(&pk, self.network),
        };
        addr.to_string()
    }

    fn derive_scheme(&self, master: &Xpriv, scheme: DerivationScheme, count: usize) -> Result<Vec<String>, DeriveError> {
        let account = self.account_xpub(master, scheme)?;
        let chains = [
            account.derive_pub(&self.secp, &[ChildNumber::from_normal_idx(0)?])?,
            account.derive_pub(&self.secp, &[ChildNumber::from_normal_idx(1)?])?,
        ];

        let mut out = Vec::with_capacity(count);
        for i in 0..count {
            let (chain, index) = slot(i);
            let child = chains[chain as usize].derive_pub(&self.secp, &[ChildNumber::from_normal_idx(index)?])?;
            out.push(self.encode(scheme, child.public_key));
        }
        Ok(out)
    }
}

impl AddressDeriver for Bip44Deriver {
    fn derive(&self, candidate: &Candidate, count: usize) -> Result<AddressSet, DeriveError> {
        let mnemonic = Mnemonic::parse_in_normalized(Language::English, candidate.phrase())?;
        let seed = mnemonic.to_seed_normalized("");
        let master = Xpriv::new_master(self.network, &seed)?;

        let mut set = AddressSet::default();
        for &scheme in &self.schemes {
            set.extend_labeled(self.derive_scheme(&master, scheme, count)?, scheme.label());
        }
        Ok(set)
    }

    fn scheme_label(&self) -> &str {
        &self.label
    }
}
