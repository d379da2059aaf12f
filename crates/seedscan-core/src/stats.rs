//! 统计聚合与状态报告线程
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel as channel;

use crate::state::ScanState;

/// 线程安全的计数器集合
///
/// `attempts` 统计已完成检查的候选（不区分结果），其余计数器按结果分类。
/// 生成失败不是一次检查，只计入 `generation_failures`。
#[derive(Debug)]
pub struct StatsAggregator {
    attempts: AtomicU64,
    empty: AtomicU64,
    unknown: AtomicU64,
    skipped: AtomicU64,
    hits: AtomicU64,
    generation_failures: AtomicU64,
    started: Mutex<Instant>,
    last_candidate: Mutex<String>,
}

/// 某一时刻的统计快照（不可变）
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub attempts: u64,
    pub empty: u64,
    pub unknown: u64,
    pub skipped: u64,
    pub hits: u64,
    pub generation_failures: u64,
    pub elapsed: Duration,
    /// 每秒检查的候选数
    pub rate: f64,
    pub last_candidate: String,
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self {
            attempts: AtomicU64::new(0),
            empty: AtomicU64::new(0),
            unknown: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            generation_failures: AtomicU64::new(0),
            started: Mutex::new(Instant::now()),
            last_candidate: Mutex::new(String::new()),
        }
    }

    /// 清零所有计数器并把起始时刻重新设为现在；每次运行开始时调用
    pub fn reset(&self) {
        for counter in [&self.attempts, &self.empty, &self.unknown, &self.skipped, &self.hits, &self.generation_failures] {
            counter.store(0, Ordering::Relaxed);
        }
        *self.started.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
        self.last_candidate.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// 记录当前正在处理的候选（仅用于展示）
    pub fn observe(&self, preview: String) {
        let mut slot = self.last_candidate.lock().unwrap_or_else(|e| e.into_inner());
        *slot = preview;
    }

    pub fn record_empty(&self) {
        self.empty.fetch_add(1, Ordering::Relaxed);
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unknown(&self) {
        self.unknown.fetch_add(1, Ordering::Relaxed);
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// 生成器报错，候选未产生
    pub fn record_generation_failure(&self) {
        self.generation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.lock().unwrap_or_else(|e| e.into_inner()).elapsed()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let attempts = self.attempts.load(Ordering::Relaxed);
        let elapsed = self.elapsed();
        let secs = elapsed.as_secs_f64();
        let rate = if secs > 0.0 { attempts as f64 / secs } else { 0.0 };
        let last_candidate = self.last_candidate.lock().unwrap_or_else(|e| e.into_inner()).clone();
        StatsSnapshot {
            attempts,
            empty: self.empty.load(Ordering::Relaxed),
            unknown: self.unknown.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            generation_failures: self.generation_failures.load(Ordering::Relaxed),
            elapsed,
            rate,
            last_candidate,
        }
    }
}

/// 专用报告线程：按固定时间间隔读取快照并交给渲染回调
///
/// 只有这一个线程调用渲染回调，因此终端输出不会交错。
pub struct Reporter {
    stop: channel::Sender<()>,
    handle: JoinHandle<()>,
}

impl Reporter {
    pub fn spawn<F>(state: Arc<ScanState>, interval: Duration, mut render: F) -> std::io::Result<Self>
    where
        F: FnMut(&StatsSnapshot) + Send + 'static,
    {
        let (stop, stop_rx) = channel::bounded::<()>(0);
        let handle = std::thread::Builder::new().name("seedscan-reporter".into()).spawn(move || {
            let ticker = channel::tick(interval);
            loop {
                channel::select! {
                    recv(ticker) -> _ => render(&state.stats().snapshot()),
                    // 发送端被丢弃即视为停止
                    recv(stop_rx) -> _ => break,
                }
            }
        })?;
        Ok(Self { stop, handle })
    }

    /// 停止报告线程并等待其退出
    pub fn finish(self) {
        drop(self.stop);
        let _ = self.handle.join();
    }
}
