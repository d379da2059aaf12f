use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use seedscan_core::{
    load_config, read_records, DerivationScheme, FoundRecord, MnemonicGenerator, OracleEndpoint, ScanError,
    ScanOptions, Scanner, StatsSnapshot, StopReason, WordCount,
};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

/// 命令行入口（基于 clap）
#[derive(Parser, Debug)]
#[command(name = "seedscan", version, about = "随机助记词余额扫描器")]
struct Cli {
    /// 同时把日志追加写入该文件（不带颜色）
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 持续生成助记词并查询派生地址余额，直到命中或 Ctrl+C
    Scan(ScanArgs),
    /// 列出结果文件中已保存的命中记录
    Show {
        #[arg(long, default_value = "./found.jsonl")]
        output: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
struct ScanArgs {
    /// 配置文件（TOML）；命令行参数优先
    #[arg(long)]
    config: Option<PathBuf>,

    /// 线程数（"auto"=CPU 核心数）
    #[arg(long)]
    threads: Option<String>,

    /// 每个助记词派生的地址数（外部链/找零链交替）
    #[arg(long)]
    addresses: Option<usize>,

    /// 候选队列容量
    #[arg(long)]
    queue: Option<usize>,

    /// 单次余额查询超时（秒）
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// 每次余额检查的最大尝试次数（含首次）
    #[arg(long)]
    retries: Option<u32>,

    /// 首次重试前等待（毫秒），之后翻倍
    #[arg(long)]
    retry_delay_ms: Option<u64>,

    /// 重试等待上限（毫秒）
    #[arg(long)]
    max_retry_delay_ms: Option<u64>,

    /// 生产者节流间隔（毫秒）
    #[arg(long)]
    delay_ms: Option<u64>,

    /// 状态行刷新间隔（毫秒）
    #[arg(long)]
    status_ms: Option<u64>,

    /// 助记词长度：12、24 或 mixed
    #[arg(long, value_parser = ["12", "24", "mixed"])]
    words: Option<String>,

    /// 派生方案：bip44、bip49、bip84 或 all；可重复或逗号分隔
    #[arg(long = "scheme", value_name = "SCHEME")]
    schemes: Vec<String>,

    /// 结果文件（JSON Lines，追加写）
    #[arg(long)]
    output: Option<PathBuf>,

    /// 余额查询端点，可重复，按顺序回退
    /// （blockchain、blockstream、mempool、blockcypher、blockchair，或 格式=URL，或 blockchain.info 格式的 URL）
    #[arg(long = "endpoint", value_name = "ENDPOINT")]
    endpoints: Vec<String>,

    /// 最多生成的候选数
    #[arg(long)]
    limit: Option<u64>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    // 初始化日志（支持通过 RUST_LOG 控制等级，例如 info、debug）；guard 存活期间文件日志持续刷新
    let _log_guard = init_tracing(cli.log_file.as_deref())?;

    match cli.command {
        Commands::Scan(args) => {
            let opts = build_options(args)?;
            run_scan(opts)?;
        }
        Commands::Show { output } => show(&output)?,
    }

    Ok(())
}

fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let (writer, guard) = tracing_appender::non_blocking(open_log_file(path)?);
            let layer = fmt::layer().with_target(true).with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    let console_layer = fmt::layer().with_writer(std::io::stderr);

    let _ = tracing_subscriber::registry().with(env_filter).with(file_layer).with(console_layer).try_init();
    Ok(guard)
}

/// 以追加方式打开日志文件，必要时创建父目录
fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("create log directory {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open log file {}", path.display()))
}

/// 默认值 → 配置文件 → 命令行，逐层覆盖
fn build_options(args: ScanArgs) -> Result<ScanOptions> {
    let mut opts = ScanOptions::default();
    if let Some(path) = &args.config {
        load_config(path).context("load config")?.apply(&mut opts).context("apply config")?;
    }

    if let Some(n) = args.threads.as_deref().and_then(parse_threads) {
        opts.workers = n;
        if args.queue.is_none() {
            opts.queue_capacity = n.saturating_mul(2);
        }
    }
    if let Some(k) = args.addresses { opts.addresses_per_candidate = k; }
    if let Some(c) = args.queue { opts.queue_capacity = c; }
    if let Some(t) = args.timeout_secs { opts.oracle_timeout = Duration::from_secs(t); }
    if let Some(r) = args.retries { opts.max_attempts = r; }
    if let Some(ms) = args.retry_delay_ms { opts.retry_delay = Duration::from_millis(ms); }
    if let Some(ms) = args.max_retry_delay_ms { opts.max_retry_delay = Duration::from_millis(ms); }
    if let Some(ms) = args.delay_ms { opts.produce_delay = Duration::from_millis(ms); }
    if let Some(ms) = args.status_ms { opts.status_interval = Duration::from_millis(ms); }
    if let Some(w) = args.words { opts.words = w.parse::<WordCount>()?; }
    if !args.schemes.is_empty() { opts.schemes = DerivationScheme::parse_list(&args.schemes)?; }
    if let Some(out) = args.output { opts.output = out; }
    if !args.endpoints.is_empty() { opts.endpoints = OracleEndpoint::parse_list(&args.endpoints)?; }
    if args.limit.is_some() { opts.limit = args.limit; }

    opts.validate().context("invalid options")?;
    Ok(opts)
}

/// 解析线程参数："auto" 表示自动（等于 CPU 核数）
fn parse_threads(s: &str) -> Option<usize> {
    if s.eq_ignore_ascii_case("auto") { return None; }
    match s.parse::<usize>() {
        Ok(n) if n >= 1 => Some(n),
        _ => None,
    }
}

fn run_scan(opts: ScanOptions) -> Result<()> {
    let output = opts.output.clone();
    let words = opts.words;
    let schemes: Vec<&str> = opts.schemes.iter().map(|s| s.label()).collect();
    let endpoints: Vec<String> = opts.endpoints.iter().map(ToString::to_string).collect();
    info!(?output, workers = opts.workers, ?schemes, ?endpoints, "starting scan");
    eprintln!("Results will be saved to {}", output.display());
    eprintln!("Press Ctrl+C to stop\n");

    let scanner = Scanner::from_options(opts).context("build scanner")?;
    let cancel = scanner.cancel_handle();
    ctrlc::set_handler(move || cancel.cancel()).context("install Ctrl+C handler")?;

    let mut generator = MnemonicGenerator::new(words);
    match scanner.run_with_status(&mut generator, render_status) {
        Ok(summary) => {
            eprintln!();
            if let Some(record) = &summary.found {
                print_hit(record, Some(&output));
            }
            print_final(&summary.stats, summary.reason);
            Ok(())
        }
        Err(ScanError::Persist { record, source }) => {
            eprintln!();
            error!(error = %source, path = ?output, "HIT COULD NOT BE SAVED, copy the record below now");
            print_hit(&record, None);
            print_final(&scanner.state().stats().snapshot(), StopReason::Found);
            Err(anyhow!("failed to persist found record: {source}"))
        }
        Err(e) => Err(e).context("scan failed"),
    }
}

/// 单行状态（\r 覆盖），只由报告线程调用
fn render_status(snap: &StatsSnapshot) {
    let mut err = std::io::stderr().lock();
    let _ = write!(
        err,
        "\rChecked: {:>10} | {:>8.2}/s | unknown {:>6} | {:<28}",
        snap.attempts, snap.rate, snap.unknown, snap.last_candidate
    );
    let _ = err.flush();
}

fn print_hit(record: &FoundRecord, saved_to: Option<&Path>) {
    let bar = "=".repeat(60);
    println!("{bar}");
    println!("FOUND WALLET WITH BALANCE");
    println!("{bar}");
    println!("Mnemonic : {}", record.phrase);
    println!("Scheme   : {} ({} words)", record.scheme, record.word_count);
    for f in &record.funded {
        println!("Funded   : {}  {} BTC  [{}]", f.address, f.scaled, f.scheme);
    }
    println!("Total    : {} BTC", record.total_scaled);
    println!("Found at : {}", record.discovered_at.to_rfc3339());
    if let Some(path) = saved_to {
        println!("Saved to : {}", path.display());
    }
    println!("WARNING: the mnemonic above controls these funds. Treat it as a secret.");
    println!("{bar}");
}

fn print_final(stats: &StatsSnapshot, reason: StopReason) {
    let why = match reason {
        StopReason::Found => "hit found",
        StopReason::Cancelled => "stopped by user",
        StopReason::Exhausted => "candidate limit reached",
    };
    println!("Scanning stopped ({why}).");
    println!(
        "Attempts: {} | elapsed {:.1}s | {:.2}/s | empty {} | unknown {} | skipped {}",
        stats.attempts,
        stats.elapsed.as_secs_f64(),
        stats.rate,
        stats.empty,
        stats.unknown,
        stats.skipped
    );
    if stats.generation_failures > 0 {
        println!("Generation failures: {}", stats.generation_failures);
    }
}

fn show(path: &Path) -> Result<()> {
    let records = read_records(path).with_context(|| format!("read {}", path.display()))?;
    if records.is_empty() {
        println!("No records in {}", path.display());
        return Ok(());
    }
    for (i, r) in records.iter().enumerate() {
        println!("#{} {} {} BTC ({} funded of {} addresses)", i + 1, r.discovered_at.to_rfc3339(), r.total_scaled, r.funded.len(), r.addresses.len());
        println!("   {}", r.phrase);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> ScanArgs {
        let mut argv = vec!["seedscan", "scan"];
        argv.extend_from_slice(extra);
        match Cli::parse_from(argv).command {
            Commands::Scan(a) => a,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn threads_auto_or_number() {
        assert_eq!(parse_threads("auto"), None);
        assert_eq!(parse_threads("AUTO"), None);
        assert_eq!(parse_threads("6"), Some(6));
        assert_eq!(parse_threads("0"), None);
        assert_eq!(parse_threads("x"), None);
    }

    #[test]
    fn cli_flags_override_defaults() {
        let opts = build_options(args(&["--threads", "3", "--words", "24", "--scheme", "bip84", "--retries", "5"])).unwrap();
        assert_eq!(opts.workers, 3);
        assert_eq!(opts.queue_capacity, 6);
        assert_eq!(opts.words, WordCount::TwentyFour);
        assert_eq!(opts.schemes, vec![DerivationScheme::Bip84]);
        assert_eq!(opts.max_attempts, 5);
    }

    #[test]
    fn schemes_endpoints_and_retry_cap_flags() {
        let opts = build_options(args(&[
            "--scheme",
            "bip44,bip49",
            "--scheme",
            "native",
            "--endpoint",
            "blockstream",
            "--endpoint",
            "https://example.invalid/balance?active=",
            "--max-retry-delay-ms",
            "250",
        ]))
        .unwrap();
        assert_eq!(opts.schemes, DerivationScheme::ALL.to_vec());
        assert_eq!(opts.endpoints.len(), 2);
        assert_eq!(opts.endpoints[1].base, "https://example.invalid/balance?active=");
        assert_eq!(opts.max_retry_delay, Duration::from_millis(250));

        assert!(build_options(args(&["--scheme", "bip32"])).is_err());
        assert!(build_options(args(&["--endpoint", "nowhere"])).is_err());
    }

    #[test]
    fn log_file_flag_is_global() {
        let cli = Cli::parse_from(["seedscan", "show", "--log-file", "/tmp/seedscan.log"]);
        assert_eq!(cli.log_file.as_deref(), Some(Path::new("/tmp/seedscan.log")));
        let cli = Cli::parse_from(["seedscan", "--log-file", "run.log", "scan", "--limit", "1"]);
        assert_eq!(cli.log_file.as_deref(), Some(Path::new("run.log")));
    }

    #[test]
    fn log_file_is_created_and_appended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("seedscan.log");
        open_log_file(&path).unwrap().write_all(b"first\n").unwrap();
        open_log_file(&path).unwrap().write_all(b"second\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn invalid_combination_is_rejected() {
        assert!(build_options(args(&["--addresses", "0"])).is_err());
    }
}
