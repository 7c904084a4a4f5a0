//! In-process broker for tests, benches and the demo binary
//!
//! Requests submitted from caller threads are queued on a crossbeam channel
//! and answered on a single callback thread, the same shape as a real
//! connection's reader thread: answers go through the repository's
//! `complete_*` / `append_to_list` / `fail` calls and the cache mutators.
//!
//! Order placement reports the `Submitted` status before the order itself,
//! so every placement exercises the orphan status path of the cache.

use crate::cache::EntityCache;
use crate::core::{
    Contract, ContractId, EventKind, Order, OrderId, OrderState, OrderStatusUpdate, PortfolioLine,
    Position, PriceField, RequestError, SizeField, TickerId,
};
use crate::repository::RequestRepository;
use crate::resilience::{ConnectionFlag, ConnectionStatus};
use anyhow::{anyhow, bail, Result};
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Broker error code for an unknown symbol
pub const NO_SECURITY_DEFINITION: i32 = 200;

/// Broker error code for cancelling an unknown order
pub const ORDER_NOT_FOUND: i32 = 10147;

const KNOWN_CONTRACTS: [(ContractId, &str); 4] = [
    (265598, "AAPL"),
    (8314, "IBM"),
    (272093, "MSFT"),
    (76792991, "TSLA"),
];

/// Requests a caller can send to the loopback broker
#[derive(Debug, Clone)]
pub enum BrokerRequest {
    PlaceOrder(Order),
    CancelOrder(OrderId),
    ContractDetails { req_id: i32, symbol: String },
    OpenOrders,
    Positions,
    CurrentTime,
    MarketDataSnapshot { ticker_id: TickerId, con_id: ContractId },
}

/// Unsolicited events the broker pushes through the callback thread
#[derive(Debug, Clone)]
pub enum BrokerEvent {
    OrderStatus(OrderStatusUpdate),
    Position(Position),
    Portfolio(PortfolioLine),
}

enum Command {
    Request(BrokerRequest),
    Event(BrokerEvent),
    Shutdown,
}

/// Behaviour knobs
#[derive(Debug, Clone, Default)]
pub struct LoopbackConfig {
    /// Silently ignore every Nth request (callers then hit their timeout)
    pub drop_every: Option<u64>,
    /// Delay before each answer
    pub latency: Duration,
}

/// Counters kept by the callback thread
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopbackStats {
    pub received: u64,
    pub answered: u64,
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    answered: AtomicU64,
    dropped: AtomicU64,
}

pub struct LoopbackBroker {
    sender: Sender<Command>,
    worker: Mutex<Option<JoinHandle<()>>>,
    connection: ConnectionFlag,
    repository: RequestRepository,
    counters: Arc<Counters>,
}

impl LoopbackBroker {
    /// Start the callback thread
    ///
    /// `connection` should be the flag `repository` was built with.
    pub fn start(
        repository: RequestRepository,
        cache: Arc<EntityCache>,
        connection: ConnectionFlag,
        config: LoopbackConfig,
    ) -> Result<Self> {
        let (sender, receiver) = unbounded();
        let counters = Arc::new(Counters::default());

        let callback = Callback {
            repository: repository.clone(),
            cache,
            config,
            counters: counters.clone(),
        };
        let worker = thread::Builder::new()
            .name("loopback-callback".to_string())
            .spawn(move || callback.run(receiver))
            .map_err(|err| anyhow!("Failed to spawn loopback callback thread: {}", err))?;

        connection.set_connected(true);
        info!("Loopback broker started");

        Ok(Self {
            sender,
            worker: Mutex::new(Some(worker)),
            connection,
            repository,
            counters,
        })
    }

    /// Queue a request; use as the `issue` action of a registration
    pub fn submit(&self, request: BrokerRequest) -> Result<()> {
        if !self.connection.is_connected() {
            bail!("loopback broker is disconnected");
        }
        self.sender
            .send(Command::Request(request))
            .map_err(|_| anyhow!("loopback callback thread has stopped"))
    }

    /// Push an unsolicited event through the callback thread
    pub fn push_event(&self, event: BrokerEvent) -> Result<()> {
        self.sender
            .send(Command::Event(event))
            .map_err(|_| anyhow!("loopback callback thread has stopped"))
    }

    /// Drop the connection and release every waiter
    pub fn disconnect(&self) -> usize {
        if self.connection.set_connected(false) {
            warn!("Loopback broker disconnected");
        }
        self.repository.fail_all(RequestError::Disconnected)
    }

    pub fn reconnect(&self) {
        self.connection.set_connected(true);
    }

    pub fn stats(&self) -> LoopbackStats {
        LoopbackStats {
            received: self.counters.received.load(Ordering::Relaxed),
            answered: self.counters.answered.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Stop the callback thread after it drains queued commands
    pub fn shutdown(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            // Fails only if the thread already exited
            let _ = self.sender.send(Command::Shutdown);
            if worker.join().is_err() {
                warn!("Loopback callback thread panicked");
            }
            info!("Loopback broker stopped");
        }
    }
}

impl Drop for LoopbackBroker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Callback {
    repository: RequestRepository,
    cache: Arc<EntityCache>,
    config: LoopbackConfig,
    counters: Arc<Counters>,
}

impl Callback {
    fn run(self, receiver: Receiver<Command>) {
        for command in receiver.iter() {
            match command {
                Command::Request(request) => self.handle_request(request),
                Command::Event(event) => self.handle_event(event),
                Command::Shutdown => break,
            }
        }
        debug!("Loopback callback thread exiting");
    }

    fn handle_request(&self, request: BrokerRequest) {
        let seq = self.counters.received.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(every) = self.config.drop_every {
            if every > 0 && seq % every == 0 {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Dropping request #{}: {:?}", seq, request);
                return;
            }
        }
        if !self.config.latency.is_zero() {
            thread::sleep(self.config.latency);
        }

        match request {
            BrokerRequest::PlaceOrder(order) => self.place_order(order),
            BrokerRequest::CancelOrder(order_id) => self.cancel_order(order_id),
            BrokerRequest::ContractDetails { req_id, symbol } => self.contract_details(req_id, &symbol),
            BrokerRequest::OpenOrders => {
                for order in self.cache.open_orders() {
                    self.repository.append_to_list(EventKind::OpenOrders, None, order);
                }
                self.repository.complete_list(EventKind::OpenOrders, None);
            }
            BrokerRequest::Positions => {
                for position in self.cache.positions() {
                    self.repository.append_to_list(EventKind::Positions, None, position);
                }
                self.repository.complete_list(EventKind::Positions, None);
            }
            BrokerRequest::CurrentTime => {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|elapsed| elapsed.as_secs() as i64)
                    .unwrap_or_default();
                self.repository.complete_single(EventKind::CurrentTime, None, now);
            }
            BrokerRequest::MarketDataSnapshot { ticker_id, con_id } => {
                let base = Decimal::from(con_id % 1000) + Decimal::ONE_HUNDRED;
                let snapshot = self.cache.update_tick(ticker_id, |tick| {
                    tick.set_price(PriceField::Bid, base - Decimal::new(5, 2));
                    tick.set_price(PriceField::Ask, base + Decimal::new(5, 2));
                    tick.set_size(SizeField::Bid, Decimal::ONE_HUNDRED);
                    tick.set_size(SizeField::Ask, Decimal::ONE_HUNDRED);
                });
                self.repository
                    .complete_single(EventKind::MarketDataSnapshot, Some(ticker_id), snapshot);
            }
        }
        self.counters.answered.fetch_add(1, Ordering::Relaxed);
    }

    fn place_order(&self, order: Order) {
        let order_id = order.order_id;
        let remaining = order.quantity;
        self.cache
            .add_status(OrderStatusUpdate::new(order_id, OrderState::Submitted, remaining));
        if !self.cache.add_order(order) {
            self.repository
                .fail(order_id, RequestError::broker(103, "Duplicate order id"));
            return;
        }
        self.repository
            .complete_single(EventKind::OrderPlace, Some(order_id), OrderState::Submitted);
    }

    fn cancel_order(&self, order_id: OrderId) {
        match self.cache.order(order_id) {
            Some(order) if !order.is_done() => {
                self.cache.add_status(OrderStatusUpdate::new(
                    order_id,
                    OrderState::Cancelled,
                    order.quantity,
                ));
                self.repository
                    .complete_single(EventKind::OrderCancel, Some(order_id), OrderState::Cancelled);
            }
            _ => {
                self.repository.fail(
                    order_id,
                    RequestError::broker(
                        ORDER_NOT_FOUND,
                        format!("OrderId {} that needs to be cancelled is not found", order_id),
                    ),
                );
            }
        }
    }

    fn contract_details(&self, req_id: i32, symbol: &str) {
        let found = KNOWN_CONTRACTS
            .iter()
            .find(|(_, known)| known.eq_ignore_ascii_case(symbol));
        match found {
            Some((con_id, known)) => {
                self.repository
                    .append_to_list(EventKind::ContractDetails, Some(req_id), Contract::stock(*con_id, known));
                self.repository.complete_list(EventKind::ContractDetails, Some(req_id));
            }
            None => {
                self.repository.fail(
                    req_id,
                    RequestError::broker(
                        NO_SECURITY_DEFINITION,
                        "No security definition has been found for the request",
                    ),
                );
            }
        }
    }

    fn handle_event(&self, event: BrokerEvent) {
        match event {
            BrokerEvent::OrderStatus(status) => {
                self.cache.add_status(status);
            }
            BrokerEvent::Position(position) => self.cache.update_position(position),
            BrokerEvent::Portfolio(line) => self.cache.update_portfolio(line),
        }
    }
}
