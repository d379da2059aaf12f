//! 候选生成器
use bip39::{Language, Mnemonic};
use rand::rngs::OsRng;
use rand::{Rng, RngCore};

use crate::error::GenerateError;
use crate::options::WordCount;
use crate::types::Candidate;

/// 惰性、无限、不可重启的候选序列
///
/// 只由生产者线程调用，因此只要求 `Send`。
pub trait CandidateSource: Send {
    fn next_candidate(&mut self) -> Result<Candidate, GenerateError>;
}

/// 随机 BIP39 助记词生成器
///
/// 每次调用都直接从操作系统 RNG 取新熵，不存在可被复用的内部种子状态。
pub struct MnemonicGenerator {
    words: WordCount,
    rng: OsRng,
}

impl MnemonicGenerator {
    pub fn new(words: WordCount) -> Self {
        Self { words, rng: OsRng }
    }

    fn pick_words(&mut self) -> usize {
        match self.words {
            WordCount::Twelve => 12,
            WordCount::TwentyFour => 24,
            WordCount::Mixed => if self.rng.gen_bool(0.5) { 12 } else { 24 },
        }
    }
}

/// 词数 → 熵字节数（每 3 个词对应 32 位熵）
fn entropy_len(words: usize) -> usize {
    words / 3 * 4
}

impl CandidateSource for MnemonicGenerator {
    fn next_candidate(&mut self) -> Result<Candidate, GenerateError> {
        let words = self.pick_words();
        let mut entropy = [0u8; 32];
        let len = entropy_len(words);
        self.rng.fill_bytes(&mut entropy[..len]);
        let mnemonic = Mnemonic::from_entropy_in(Language::English, &entropy[..len])?;
        Ok(Candidate::new(mnemonic.to_string()))
    }
}
