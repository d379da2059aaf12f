//! worker：出队 → 派生 → 查余额 → 分类
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, error, info, warn};

use crate::derive::AddressDeriver;
use crate::oracle::{check_balances, BalanceOracle, CheckOutcome, RetryPolicy};
use crate::sink::ResultSink;
use crate::state::ScanState;
use crate::types::{Candidate, FoundRecord};

/// 出队等待上限；超时后重新检查停止条件
pub(crate) const POLL: Duration = Duration::from_millis(50);

/// 单个候选的处理结论
#[derive(Debug)]
pub(crate) enum Verdict {
    Empty,
    Unknown,
    Skipped,
    Hit(FoundRecord),
}

/// worker 运行期间共享的只读上下文
pub(crate) struct WorkerContext<'a> {
    pub(crate) state: &'a ScanState,
    pub(crate) deriver: &'a dyn AddressDeriver,
    pub(crate) oracle: &'a dyn BalanceOracle,
    pub(crate) sink: &'a dyn ResultSink,
    pub(crate) addresses_per_candidate: usize,
    pub(crate) retry: RetryPolicy,
}

/// 处理单个候选；不做任何共享状态写入以外的副作用
pub(crate) fn process_candidate(ctx: &WorkerContext<'_>, candidate: &Candidate) -> Verdict {
    let addresses = match ctx.deriver.derive(candidate, ctx.addresses_per_candidate) {
        Ok(set) => set,
        Err(e) => {
            error!(error = %e, "address derivation failed, candidate skipped");
            return Verdict::Skipped;
        }
    };

    match check_balances(ctx.oracle, addresses.as_slice(), &ctx.retry, ctx.state) {
        CheckOutcome::Confirmed(readings) => {
            match FoundRecord::from_readings(candidate, &addresses, &readings, ctx.deriver.scheme_label()) {
                Some(record) => Verdict::Hit(record),
                None => {
                    debug!(addresses = addresses.len(), "confirmed empty");
                    Verdict::Empty
                }
            }
        }
        CheckOutcome::Unknown { attempts, last_error } => {
            match last_error {
                Some(e) => warn!(attempts, error = %e, "balance unknown after retries, candidate skipped"),
                None => warn!(attempts, "balance unknown, candidate skipped"),
            }
            Verdict::Unknown
        }
    }
}

/// worker 主循环；返回本 worker 赢得并成功落盘的记录（至多一条）
///
/// 当前候选总是处理完毕后才重新检查停止条件。
pub(crate) fn run_worker(id: usize, rx: &Receiver<Candidate>, ctx: &WorkerContext<'_>) -> Option<FoundRecord> {
    debug!(worker = id, "worker started");
    let stats = ctx.state.stats();
    let mut won = None;

    loop {
        if ctx.state.should_stop() {
            break;
        }
        let candidate = match rx.recv_timeout(POLL) {
            Ok(c) => c,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        stats.observe(candidate.preview());

        match process_candidate(ctx, &candidate) {
            Verdict::Empty => stats.record_empty(),
            Verdict::Unknown => stats.record_unknown(),
            Verdict::Skipped => stats.record_skipped(),
            Verdict::Hit(record) => {
                stats.record_hit();
                if !ctx.state.try_claim_hit() {
                    info!(worker = id, "secondary hit discarded, another worker already claimed the run");
                    break;
                }
                match ctx.sink.persist(&record) {
                    Ok(()) => {
                        info!(worker = id, total = %record.total_scaled, "hit persisted");
                        won = Some(record);
                    }
                    Err(e) => {
                        error!(worker = id, error = %e, "FAILED TO PERSIST HIT");
                        ctx.state.record_fatal(record, e);
                    }
                }
                break;
            }
        }
    }

    debug!(worker = id, "worker exiting");
    won
}
