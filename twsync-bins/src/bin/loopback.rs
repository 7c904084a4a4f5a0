//! Loopback demo
//!
//! Drives the request core against the in-process loopback broker:
//! - N caller threads issue order placements, contract lookups,
//!   market-data snapshots and clock requests, blocking on each result
//! - One callback thread answers them through the repository and cache
//! - `--drop-every` makes the broker ignore requests so callers time out

use anyhow::{anyhow, Result};
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use twsync_bins::common::{init_logging, print_stats, CommonArgs};
use twsync_core::testing::{BrokerRequest, LoopbackBroker, LoopbackConfig};
use twsync_core::{
    ConnectionFlag, Contract, EntityCache, EventKind, ListPromise, Order, OrderState, Promise,
    RequestError, RequestRepository, Side, TickSnapshot,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Blocking request/response demo over a loopback broker")]
struct LoopbackArgs {
    /// Requests issued per caller thread
    #[arg(short, long, default_value = "100")]
    requests: u32,

    /// Caller threads
    #[arg(short, long, default_value = "4")]
    threads: u32,

    /// Per-request timeout in milliseconds (overrides the configuration)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Broker ignores every Nth request
    #[arg(long)]
    drop_every: Option<u64>,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Default)]
struct Outcomes {
    ok: AtomicU64,
    timed_out: AtomicU64,
    failed: AtomicU64,
}

impl Outcomes {
    fn record<T>(&self, result: Result<T, RequestError>) {
        match result {
            Ok(_) => self.ok.fetch_add(1, Ordering::Relaxed),
            Err(err) if err.is_timeout() => self.timed_out.fetch_add(1, Ordering::Relaxed),
            Err(err) => {
                tracing::debug!("Request failed: {}", err);
                self.failed.fetch_add(1, Ordering::Relaxed)
            }
        };
    }
}

struct Client {
    repo: RequestRepository,
    broker: Arc<LoopbackBroker>,
    timeout: Duration,
}

impl Client {
    fn place_order(&self, order_id: i32, symbol: &str) -> Result<OrderState, RequestError> {
        let order = Order::limit(
            order_id,
            Contract::stock(265598, symbol),
            if order_id % 2 == 0 { Side::Buy } else { Side::Sell },
            Decimal::from(100),
            Decimal::new(18950, 2),
        );
        let broker = self.broker.clone();
        let promise: Promise<OrderState> = self.repo.register_single(EventKind::OrderPlace, Some(order_id), move || {
            broker.submit(BrokerRequest::PlaceOrder(order))
        })?;
        promise.get_timeout(self.timeout)
    }

    fn contract_details(&self, req_id: i32, symbol: &str) -> Result<Vec<Contract>, RequestError> {
        let broker = self.broker.clone();
        let symbol = symbol.to_string();
        let list: ListPromise<Contract> = self.repo.register_list(EventKind::ContractDetails, Some(req_id), move || {
            broker.submit(BrokerRequest::ContractDetails { req_id, symbol })
        })?;
        list.get_timeout(self.timeout)
    }

    fn snapshot(&self, ticker_id: i32) -> Result<TickSnapshot, RequestError> {
        let broker = self.broker.clone();
        let promise: Promise<TickSnapshot> = self.repo.register_single(EventKind::MarketDataSnapshot, Some(ticker_id), move || {
            broker.submit(BrokerRequest::MarketDataSnapshot {
                ticker_id,
                con_id: 8314,
            })
        })?;
        promise.get_timeout(self.timeout)
    }

    fn current_time(&self) -> Result<i64, RequestError> {
        let broker = self.broker.clone();
        let promise: Promise<i64> = self
            .repo
            .register_single(EventKind::CurrentTime, None, move || broker.submit(BrokerRequest::CurrentTime))?;
        promise.get_timeout(self.timeout)
    }
}

const SYMBOLS: [&str; 5] = ["AAPL", "IBM", "MSFT", "TSLA", "UNKNOWN"];

/// Request id for the `i`-th request of `worker`, unique across workers
fn request_id(worker: u32, requests: u32, i: u32) -> Option<i32> {
    let id = worker.checked_mul(requests)?.checked_add(i)?.checked_add(1)?;
    i32::try_from(id).ok()
}

fn main() -> Result<()> {
    // Parse CLI arguments
    let args = LoopbackArgs::parse();
    let last_id = match (args.threads.checked_sub(1), args.requests.checked_sub(1)) {
        (Some(worker), Some(i)) => Some(request_id(worker, args.requests, i)),
        _ => None,
    };
    if last_id == Some(None) {
        LoopbackArgs::command()
            .error(
                ErrorKind::ValueValidation,
                format!(
                    "--threads {} x --requests {} exceeds the request id range ({})",
                    args.threads,
                    args.requests,
                    i32::MAX
                ),
            )
            .exit();
    }
    let config = args.common.load_config()?;
    if args.common.print_config {
        println!("{}", config.to_json_pretty()?);
        return Ok(());
    }

    // Initialize logging
    init_logging(&config)?;

    let timeout = args
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| config.request_timeout());

    tracing::info!("=== twsync: loopback demo ===");
    tracing::info!(
        "Threads: {}, requests per thread: {}, timeout: {:?}, drop every: {:?}",
        args.threads,
        args.requests,
        timeout,
        args.drop_every
    );

    // Stop issuing on Ctrl-C; in-flight requests still resolve
    let stop = Arc::new(AtomicBool::new(false));
    let stop_handler = stop.clone();
    ctrlc::set_handler(move || {
        tracing::warn!("Interrupt received, stopping after in-flight requests");
        stop_handler.store(true, Ordering::SeqCst);
    })?;

    let flag = ConnectionFlag::new();
    let repo = RequestRepository::with_timeout(flag.clone(), timeout);
    let cache = Arc::new(EntityCache::with_config(config.cache_config()));
    let broker = Arc::new(LoopbackBroker::start(
        repo.clone(),
        cache.clone(),
        flag,
        LoopbackConfig {
            drop_every: args.drop_every,
            latency: Duration::ZERO,
        },
    )?);

    let outcomes = Arc::new(Outcomes::default());
    let started = Instant::now();

    let workers: Vec<_> = (0..args.threads)
        .map(|worker| {
            let client = Client {
                repo: repo.clone(),
                broker: broker.clone(),
                timeout,
            };
            let outcomes = outcomes.clone();
            let stop = stop.clone();
            let requests = args.requests;
            thread::Builder::new()
                .name(format!("caller-{}", worker))
                .spawn(move || {
                    for i in 0..requests {
                        if stop.load(Ordering::SeqCst) {
                            break;
                        }
                        // Ids are unique across workers so no request is a duplicate
                        let Some(id) = request_id(worker, requests, i) else {
                            break;
                        };
                        let symbol = SYMBOLS[(i as usize) % SYMBOLS.len()];
                        match i % 4 {
                            0 => outcomes.record(client.place_order(id, symbol)),
                            1 => outcomes.record(client.contract_details(id, symbol)),
                            2 => outcomes.record(client.snapshot(id)),
                            // Id-less request: concurrent callers may collide as duplicates
                            _ => outcomes.record(client.current_time()),
                        }
                    }
                })
                .map_err(|err| anyhow!("Failed to spawn caller thread: {}", err))
        })
        .collect::<Result<_>>()?;

    for worker in workers {
        if worker.join().is_err() {
            tracing::error!("Caller thread panicked");
        }
    }
    let elapsed = started.elapsed();

    let evicted = cache.evict_orphans(Instant::now());
    broker.shutdown();

    tracing::info!("=== Run Summary ===");
    tracing::info!("Elapsed: {:?}", elapsed);
    tracing::info!("Succeeded: {}", outcomes.ok.load(Ordering::Relaxed));
    tracing::info!("Timed out: {}", outcomes.timed_out.load(Ordering::Relaxed));
    tracing::info!("Failed: {}", outcomes.failed.load(Ordering::Relaxed));
    tracing::info!(
        "Orders cached: {}, orphan buffers: {}, evicted: {}",
        cache.order_count(),
        cache.orphan_count(),
        evicted
    );
    tracing::info!("Broker: {:?}", broker.stats());
    print_stats(&repo.stats());

    Ok(())
}
