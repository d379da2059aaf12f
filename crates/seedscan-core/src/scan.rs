//! 扫描主流程与并行调度
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{self as channel, SendTimeoutError, Sender};
use tracing::{debug, info, warn};

use crate::derive::{AddressDeriver, Bip44Deriver};
use crate::error::ScanError;
use crate::generator::CandidateSource;
use crate::oracle::{BalanceOracle, FallbackOracle, RetryPolicy};
use crate::options::ScanOptions;
use crate::sink::{JsonlSink, ResultSink};
use crate::state::ScanState;
use crate::stats::{Reporter, StatsSnapshot};
use crate::types::{Candidate, FoundRecord};
use crate::worker::{run_worker, WorkerContext, POLL};

/// 生成失败后的最短等待，即使节流间隔为零
const GENERATE_BACKOFF: Duration = Duration::from_millis(10);
/// 连续生成失败时每隔多少次打一条 warn，其余降为 debug
const GENERATE_WARN_EVERY: u64 = 100;

/// 扫描结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// 某个 worker 赢得 found 标志
    Found,
    /// 外部取消（Ctrl+C 或 `CancelHandle::cancel`）
    Cancelled,
    /// 达到候选数上限且队列已处理完
    Exhausted,
}

/// 扫描结果汇总（便于 CLI 打印）
#[derive(Debug, Clone)]
pub struct ScanSummary {
    pub stats: StatsSnapshot,
    pub found: Option<FoundRecord>,
    pub reason: StopReason,
}

/// 可跨线程传递的取消句柄
#[derive(Clone)]
pub struct CancelHandle(Arc<ScanState>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.cancel();
    }
}

/// 扫描协调器：持有共享状态、队列与 worker 池
pub struct Scanner {
    opts: ScanOptions,
    state: Arc<ScanState>,
    deriver: Arc<dyn AddressDeriver>,
    oracle: Arc<dyn BalanceOracle>,
    sink: Arc<dyn ResultSink>,
}

impl Scanner {
    pub fn new(
        opts: ScanOptions,
        deriver: Arc<dyn AddressDeriver>,
        oracle: Arc<dyn BalanceOracle>,
        sink: Arc<dyn ResultSink>,
    ) -> Result<Self, ScanError> {
        opts.validate()?;
        Ok(Self { opts, state: Arc::new(ScanState::new()), deriver, oracle, sink })
    }

    /// 按选项组装默认协作者：BIP44/49/84 派生、按顺序回退的 HTTP 端点、JSON Lines 落盘
    pub fn from_options(opts: ScanOptions) -> Result<Self, ScanError> {
        let deriver = Arc::new(Bip44Deriver::with_schemes(opts.schemes.clone()));
        let oracle = Arc::new(FallbackOracle::from_endpoints(&opts.endpoints, opts.oracle_timeout)?);
        let sink = Arc::new(JsonlSink::new(opts.output.clone()));
        Self::new(opts, deriver, oracle, sink)
    }

    pub fn options(&self) -> &ScanOptions {
        &self.opts
    }

    pub fn state(&self) -> &ScanState {
        &self.state
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.state))
    }

    /// 运行扫描直到命中、取消或达到上限
    ///
    /// 同一个 `Scanner` 可以多次运行：每次运行的统计从零开始，上一次运行的 found/取消标志被清除。
    pub fn run(&self, source: &mut dyn CandidateSource) -> Result<ScanSummary, ScanError> {
        self.state.begin_run();
        self.run_inner(source, None)
    }

    /// 同 `run`，并由专用报告线程按 `status_interval` 调用 `render`
    pub fn run_with_status<F>(&self, source: &mut dyn CandidateSource, render: F) -> Result<ScanSummary, ScanError>
    where
        F: FnMut(&StatsSnapshot) + Send + 'static,
    {
        self.state.begin_run();
        let reporter = Reporter::spawn(Arc::clone(&self.state), self.opts.status_interval, render)
            .map_err(|e| ScanError::WorkerPool(format!("spawn reporter: {e}")))?;
        self.run_inner(source, Some(reporter))
    }

    fn run_inner(&self, source: &mut dyn CandidateSource, reporter: Option<Reporter>) -> Result<ScanSummary, ScanError> {
        let workers = self.opts.workers;
        info!(
            workers,
            addresses = self.opts.addresses_per_candidate,
            queue = self.opts.queue_capacity,
            "scan started"
        );

        // 有界队列：生产者 → worker；容量即背压点
        let (tx, rx) = channel::bounded::<Candidate>(self.opts.queue_capacity);
        // worker → 协调器：回传赢得的记录
        let (done_tx, done_rx) = channel::unbounded::<Option<FoundRecord>>();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("seedscan-worker-{i}"))
            .build()
            .map_err(|e| ScanError::WorkerPool(e.to_string()))?;

        let state = Arc::clone(&self.state);
        let deriver = Arc::clone(&self.deriver);
        let oracle = Arc::clone(&self.oracle);
        let sink = Arc::clone(&self.sink);
        let addresses_per_candidate = self.opts.addresses_per_candidate;
        let retry = RetryPolicy::new(self.opts.max_attempts, self.opts.retry_delay, self.opts.max_retry_delay);

        // worker 池在后台线程中运行；生产者留在当前线程
        let pool_thread = std::thread::Builder::new()
            .name("seedscan-pool".into())
            .spawn(move || {
                let ctx = WorkerContext {
                    state: state.as_ref(),
                    deriver: deriver.as_ref(),
                    oracle: oracle.as_ref(),
                    sink: sink.as_ref(),
                    addresses_per_candidate,
                    retry,
                };
                pool.scope(|s| {
                    for id in 0..workers {
                        let rx = rx.clone();
                        let done_tx = done_tx.clone();
                        let ctx = &ctx;
                        s.spawn(move |_| {
                            let won = run_worker(id, &rx, ctx);
                            let _ = done_tx.send(won);
                        });
                    }
                });
                // 结束后 Sender 全部被丢弃，Receiver 将收到关闭信号
            })
            .map_err(|e| ScanError::WorkerPool(format!("spawn pool thread: {e}")))?;

        let producer_reason = self.produce(source, &tx);
        // 关闭队列：剩余候选在停止后被放弃，否则由 worker 处理完
        drop(tx);

        let joined = pool_thread.join();
        if let Some(r) = reporter {
            r.finish();
        }
        if joined.is_err() {
            return Err(ScanError::WorkerPool("worker pool panicked".into()));
        }

        if let Some((record, source)) = self.state.take_fatal() {
            return Err(ScanError::Persist { record: Box::new(record), source });
        }

        let found = done_rx.try_iter().flatten().next();
        let reason = if self.state.is_found() { StopReason::Found } else { producer_reason };
        let stats = self.state.stats().snapshot();
        info!(
            attempts = stats.attempts,
            generation_failures = stats.generation_failures,
            elapsed_secs = stats.elapsed.as_secs_f64(),
            ?reason,
            "scan finished"
        );

        Ok(ScanSummary { stats, found, reason })
    }

    /// 生产者循环：生成候选并阻塞入队，直到需要停止
    ///
    /// `limit` 限制的是生成次数，失败的生成也算一次；失败后至少等待 `GENERATE_BACKOFF`。
    fn produce(&self, source: &mut dyn CandidateSource, tx: &Sender<Candidate>) -> StopReason {
        let mut produced: u64 = 0;
        let mut failures: u64 = 0;
        loop {
            if self.state.is_found() {
                return StopReason::Found;
            }
            if self.state.is_cancelled() {
                return StopReason::Cancelled;
            }
            if self.opts.limit.is_some_and(|limit| produced >= limit) {
                return StopReason::Exhausted;
            }

            let next = source.next_candidate();
            produced += 1;
            let candidate = match next {
                Ok(c) => c,
                Err(e) => {
                    failures += 1;
                    self.state.stats().record_generation_failure();
                    if failures % GENERATE_WARN_EVERY == 1 {
                        warn!(error = %e, failures, "candidate generation failed");
                    } else {
                        debug!(error = %e, failures, "candidate generation failed");
                    }
                    self.state.pause(self.opts.produce_delay.max(GENERATE_BACKOFF));
                    continue;
                }
            };

            if !self.enqueue(tx, candidate) {
                continue;
            }
            if !self.opts.produce_delay.is_zero() {
                self.state.pause(self.opts.produce_delay);
            }
        }
    }

    /// 队列满时阻塞等待，同时定期检查停止条件；候选被放弃时返回 false
    fn enqueue(&self, tx: &Sender<Candidate>, mut candidate: Candidate) -> bool {
        loop {
            match tx.send_timeout(candidate, POLL) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(back)) => {
                    if self.state.should_stop() {
                        return false;
                    }
                    candidate = back;
                }
                Err(SendTimeoutError::Disconnected(_)) => {
                    // 所有 worker 已退出，不可能再有消费者
                    self.state.cancel();
                    return false;
                }
            }
        }
    }
}
