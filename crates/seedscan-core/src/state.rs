//! 进程内共享的扫描状态
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::SinkError;
use crate::stats::StatsAggregator;
use crate::types::FoundRecord;

/// 可中断休眠的切片长度
const PAUSE_SLICE: Duration = Duration::from_millis(25);

/// 扫描状态：found 标志、取消标志与统计计数器
///
/// found 只会从 false 变为 true 一次，且运行期间不会复位；
/// 只有下一次运行开始时（`begin_run`）才清除上一次运行留下的标志。
#[derive(Debug, Default)]
pub struct ScanState {
    found: AtomicBool,
    cancelled: AtomicBool,
    ran: AtomicBool,
    stats: StatsAggregator,
    fatal: Mutex<Option<(FoundRecord, SinkError)>>,
}

impl ScanState {
    pub fn new() -> Self {
        Self::default()
    }

    /// 运行开始：统计从零计时；若此前已运行过，同时清除 found、取消与致命错误
    ///
    /// 首次运行前发出的取消保持有效。
    pub(crate) fn begin_run(&self) {
        if self.ran.swap(true, Ordering::AcqRel) {
            self.found.store(false, Ordering::Release);
            self.cancelled.store(false, Ordering::Release);
            self.fatal.lock().unwrap_or_else(|e| e.into_inner()).take();
        }
        self.stats.reset();
    }

    /// 原子 test-and-set：只有第一个调用者得到 true
    pub fn try_claim_hit(&self) -> bool {
        self.found.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    pub fn is_found(&self) -> bool {
        self.found.load(Ordering::Acquire)
    }

    /// 请求停止（幂等）
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn should_stop(&self) -> bool {
        self.is_found() || self.is_cancelled()
    }

    pub fn stats(&self) -> &StatsAggregator {
        &self.stats
    }

    /// 休眠 `dur`，期间一旦需要停止立即返回；完整睡满返回 true
    pub fn pause(&self, dur: Duration) -> bool {
        let deadline = Instant::now() + dur;
        loop {
            if self.should_stop() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(PAUSE_SLICE.min(deadline - now));
        }
    }

    /// 记录落盘失败（致命），并让整个扫描停止
    pub(crate) fn record_fatal(&self, record: FoundRecord, err: SinkError) {
        let mut slot = self.fatal.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            *slot = Some((record, err));
        }
        drop(slot);
        self.cancel();
    }

    pub(crate) fn take_fatal(&self) -> Option<(FoundRecord, SinkError)> {
        self.fatal.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}
