//! Concurrent entity cache fed by the callback thread
//!
//! Holds orders, positions, portfolio lines and market-data snapshots.
//! Readers always get clones, never references into the maps.
//!
//! ## Orphan statuses
//!
//! The broker may report an order status before the order itself. Such
//! statuses are buffered per order id and merged when the order arrives.
//! `add_order` and `add_status` both lock the order's slot in the order map
//! before touching the orphan buffer (always in that order), so a status
//! racing with the creation of its order either lands in the order or in
//! the buffer the creation drains, never neither.
//!
//! Orders that never arrive would leave their statuses behind forever, so
//! the buffer is bounded: entries older than `orphan_ttl` are dropped by
//! [`EntityCache::evict_orphans`], and exceeding `max_orphan_orders` evicts
//! the oldest entry immediately. Buffering order is tracked in a queue so
//! capacity eviction does not scan the buffer; queue entries left behind by
//! merged or expired ids are skipped and pruned lazily. The queue lock is
//! never taken while an orphan entry is held.

use crate::core::{
    CacheError, ContractId, Order, OrderId, OrderStatusUpdate, PortfolioLine, Position, TickSnapshot,
    TickerId, UNRESOLVED_CONTRACT,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Bounds for the orphan status buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Age after which buffered statuses are dropped
    pub orphan_ttl: Duration,
    /// Maximum number of order ids with buffered statuses
    pub max_orphan_orders: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            orphan_ttl: Duration::from_secs(300),
            max_orphan_orders: 1024,
        }
    }
}

/// Result of [`EntityCache::add_status`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOutcome {
    /// Merged into a known order; `changed` is false for a replayed status
    Applied { changed: bool },
    /// Order not known yet, status held in the orphan buffer
    Buffered,
}

#[derive(Debug)]
struct OrphanStatuses {
    statuses: Vec<OrderStatusUpdate>,
    first_seen: Instant,
    // Distinguishes a re-buffered id from its stale queue entry
    generation: u64,
}

pub struct EntityCache {
    config: CacheConfig,
    orders: DashMap<OrderId, Order>,
    orphans: DashMap<OrderId, OrphanStatuses>,
    orphan_queue: Mutex<VecDeque<(OrderId, u64)>>,
    next_generation: AtomicU64,
    positions: DashMap<(String, ContractId), Position>,
    portfolio: DashMap<ContractId, PortfolioLine>,
    ticks: DashMap<TickerId, TickSnapshot>,
}

impl EntityCache {
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    pub fn with_config(config: CacheConfig) -> Self {
        Self {
            config,
            orders: DashMap::new(),
            orphans: DashMap::new(),
            orphan_queue: Mutex::new(VecDeque::new()),
            next_generation: AtomicU64::new(0),
            positions: DashMap::new(),
            portfolio: DashMap::new(),
            ticks: DashMap::new(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    // ---- orders ----

    /// Insert a newly created order
    ///
    /// Returns false, leaving the cache untouched, if the id is already
    /// known. Statuses buffered for the id are merged into the new order.
    pub fn add_order(&self, mut order: Order) -> bool {
        let order_id = order.order_id;
        match self.orders.entry(order_id) {
            Entry::Occupied(_) => {
                debug!("Order {} already known, ignoring duplicate creation", order_id);
                false
            }
            Entry::Vacant(vacant) => {
                if let Some((_, orphans)) = self.orphans.remove(&order_id) {
                    debug!(
                        "Merging {} buffered status(es) into order {}",
                        orphans.statuses.len(),
                        order_id
                    );
                    for status in orphans.statuses {
                        order.merge_status(status);
                    }
                }
                vacant.insert(order);
                true
            }
        }
    }

    /// Record a status update for an order
    pub fn add_status(&self, status: OrderStatusUpdate) -> StatusOutcome {
        let order_id = status.order_id;
        let outcome = match self.orders.entry(order_id) {
            Entry::Occupied(mut occupied) => StatusOutcome::Applied {
                changed: occupied.get_mut().merge_status(status),
            },
            Entry::Vacant(_slot) => {
                // `_slot` keeps the order's shard locked until buffered
                let created = match self.orphans.entry(order_id) {
                    Entry::Occupied(mut occupied) => {
                        let orphans = occupied.get_mut();
                        if !orphans.statuses.contains(&status) {
                            orphans.statuses.push(status);
                        }
                        None
                    }
                    Entry::Vacant(vacant) => {
                        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                        vacant.insert(OrphanStatuses {
                            statuses: vec![status],
                            first_seen: Instant::now(),
                            generation,
                        });
                        Some(generation)
                    }
                };
                if let Some(generation) = created {
                    self.track_orphan(order_id, generation);
                }
                debug!("Status for unknown order {} buffered", order_id);
                StatusOutcome::Buffered
            }
        };

        if outcome == StatusOutcome::Buffered {
            self.enforce_orphan_capacity();
        }
        outcome
    }

    /// Snapshot of one order
    pub fn order(&self, order_id: OrderId) -> Option<Order> {
        self.orders.get(&order_id).map(|order| order.clone())
    }

    /// Snapshot of all orders, by id
    pub fn orders(&self) -> Vec<Order> {
        let mut orders: Vec<Order> = self.orders.iter().map(|entry| entry.value().clone()).collect();
        orders.sort_by_key(|order| order.order_id);
        orders
    }

    /// Orders whose latest status is not terminal
    pub fn open_orders(&self) -> Vec<Order> {
        let mut open: Vec<Order> = self
            .orders
            .iter()
            .filter(|entry| !entry.value().is_done())
            .map(|entry| entry.value().clone())
            .collect();
        open.sort_by_key(|order| order.order_id);
        open
    }

    pub fn remove_order(&self, order_id: OrderId) -> Option<Order> {
        self.orders.remove(&order_id).map(|(_, order)| order)
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    // ---- orphan buffer ----

    /// Number of order ids with buffered statuses
    pub fn orphan_count(&self) -> usize {
        self.orphans.len()
    }

    /// Statuses buffered for an order id that is not known yet
    pub fn orphan_statuses(&self, order_id: OrderId) -> Vec<OrderStatusUpdate> {
        self.orphans
            .get(&order_id)
            .map(|orphans| orphans.statuses.clone())
            .unwrap_or_default()
    }

    /// Drop buffered statuses first seen more than `orphan_ttl` before `now`
    ///
    /// Returns the number of order ids evicted.
    pub fn evict_orphans(&self, now: Instant) -> usize {
        let ttl = self.config.orphan_ttl;
        let before = self.orphans.len();
        self.orphans.retain(|order_id, orphans| {
            let expired = now.saturating_duration_since(orphans.first_seen) >= ttl;
            if expired {
                warn!(
                    "Evicting {} status(es) for order {} never created within {:?}",
                    orphans.statuses.len(),
                    order_id,
                    ttl
                );
            }
            !expired
        });
        let evicted = before.saturating_sub(self.orphans.len());
        if evicted > 0 {
            self.prune_orphan_queue();
        }
        evicted
    }

    fn track_orphan(&self, order_id: OrderId, generation: u64) {
        let backlog = {
            let mut queue = self.orphan_queue.lock();
            queue.push_back((order_id, generation));
            queue.len()
        };
        // Merged ids leave stale entries behind
        if backlog > self.config.max_orphan_orders.saturating_mul(2) {
            self.prune_orphan_queue();
        }
    }

    fn is_live_orphan(&self, order_id: OrderId, generation: u64) -> bool {
        self.orphans
            .get(&order_id)
            .map_or(false, |orphans| orphans.generation == generation)
    }

    fn prune_orphan_queue(&self) {
        let mut queue = self.orphan_queue.lock();
        queue.retain(|(order_id, generation)| self.is_live_orphan(*order_id, *generation));
    }

    fn enforce_orphan_capacity(&self) {
        while self.orphans.len() > self.config.max_orphan_orders {
            let oldest = self.orphan_queue.lock().pop_front();
            let Some((order_id, generation)) = oldest else {
                break;
            };
            if let Some((_, orphans)) = self
                .orphans
                .remove_if(&order_id, |_, orphans| orphans.generation == generation)
            {
                warn!(
                    "Orphan buffer full ({} orders), evicting {} status(es) for order {}",
                    self.config.max_orphan_orders,
                    orphans.statuses.len(),
                    order_id
                );
            }
        }
    }

    /// Order ids in the orphan buffering queue, including stale ones
    #[cfg(test)]
    fn orphan_backlog(&self) -> usize {
        self.orphan_queue.lock().len()
    }

    // ---- positions and portfolio ----

    /// Last-write-wins upsert keyed by (account, contract id)
    pub fn update_position(&self, position: Position) {
        let key = (position.account.clone(), position.contract.con_id);
        self.positions.insert(key, position);
    }

    pub fn position(&self, account: &str, con_id: ContractId) -> Result<Option<Position>, CacheError> {
        check_contract(con_id)?;
        Ok(self
            .positions
            .get(&(account.to_string(), con_id))
            .map(|position| position.clone()))
    }

    pub fn positions(&self) -> Vec<Position> {
        let mut positions: Vec<Position> =
            self.positions.iter().map(|entry| entry.value().clone()).collect();
        positions.sort_by(|a, b| {
            (a.account.as_str(), a.contract.con_id).cmp(&(b.account.as_str(), b.contract.con_id))
        });
        positions
    }

    /// Last-write-wins upsert keyed by contract id
    pub fn update_portfolio(&self, line: PortfolioLine) {
        self.portfolio.insert(line.contract.con_id, line);
    }

    pub fn portfolio_line(&self, con_id: ContractId) -> Result<Option<PortfolioLine>, CacheError> {
        check_contract(con_id)?;
        Ok(self.portfolio.get(&con_id).map(|line| line.clone()))
    }

    pub fn portfolio(&self) -> Vec<PortfolioLine> {
        let mut lines: Vec<PortfolioLine> =
            self.portfolio.iter().map(|entry| entry.value().clone()).collect();
        lines.sort_by_key(|line| line.contract.con_id);
        lines
    }

    // ---- market data ----

    /// Apply `mutate` to the snapshot for `ticker_id`, creating it if needed
    ///
    /// The mutation is atomic per ticker. Returns the updated snapshot.
    pub fn update_tick<F>(&self, ticker_id: TickerId, mutate: F) -> TickSnapshot
    where
        F: FnOnce(&mut TickSnapshot),
    {
        let mut snapshot = self
            .ticks
            .entry(ticker_id)
            .or_insert_with(|| TickSnapshot::new(ticker_id));
        mutate(&mut snapshot);
        snapshot.clone()
    }

    pub fn tick(&self, ticker_id: TickerId) -> Option<TickSnapshot> {
        self.ticks.get(&ticker_id).map(|tick| tick.clone())
    }

    pub fn ticks(&self) -> Vec<TickSnapshot> {
        let mut ticks: Vec<TickSnapshot> = self.ticks.iter().map(|entry| entry.value().clone()).collect();
        ticks.sort_by_key(|tick| tick.ticker_id);
        ticks
    }

    pub fn remove_tick(&self, ticker_id: TickerId) -> Option<TickSnapshot> {
        self.ticks.remove(&ticker_id).map(|(_, tick)| tick)
    }

    /// Forget everything, e.g. before the broker replays state on reconnect
    pub fn clear(&self) {
        self.orders.clear();
        self.orphans.clear();
        self.orphan_queue.lock().clear();
        self.positions.clear();
        self.portfolio.clear();
        self.ticks.clear();
        debug!("Entity cache cleared");
    }
}

impl Default for EntityCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EntityCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityCache")
            .field("orders", &self.orders.len())
            .field("orphans", &self.orphans.len())
            .field("positions", &self.positions.len())
            .field("portfolio", &self.portfolio.len())
            .field("ticks", &self.ticks.len())
            .finish()
    }
}

fn check_contract(con_id: ContractId) -> Result<(), CacheError> {
    if con_id == UNRESOLVED_CONTRACT {
        return Err(CacheError::InvalidArgument(
            "contract id 0 does not identify a contract".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Contract, OrderState, PriceField, Side, SizeField};
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use std::thread;

    fn order(id: OrderId) -> Order {
        Order::limit(id, Contract::stock(265598, "AAPL"), Side::Buy, dec!(100), dec!(189.50))
    }

    fn submitted(id: OrderId) -> OrderStatusUpdate {
        OrderStatusUpdate::new(id, OrderState::Submitted, dec!(100))
    }

    #[test]
    fn test_duplicate_order_rejected() {
        let cache = EntityCache::new();
        assert!(cache.add_order(order(1)));
        assert!(!cache.add_order(order(1)));
        assert_eq!(cache.order_count(), 1);
    }

    #[test]
    fn test_status_for_known_order() {
        let cache = EntityCache::new();
        cache.add_order(order(1));

        assert_eq!(
            cache.add_status(submitted(1)),
            StatusOutcome::Applied { changed: true }
        );
        assert_eq!(
            cache.add_status(submitted(1)),
            StatusOutcome::Applied { changed: false }
        );
        assert_eq!(cache.order(1).unwrap().statuses().len(), 1);
    }

    #[test]
    fn test_orphan_status_merged_on_creation() {
        let cache = EntityCache::new();
        assert_eq!(cache.add_status(submitted(5)), StatusOutcome::Buffered);
        // Same content twice stays one entry
        assert_eq!(cache.add_status(submitted(5)), StatusOutcome::Buffered);
        assert_eq!(cache.orphan_statuses(5).len(), 1);

        assert!(cache.add_order(order(5)));
        let merged = cache.order(5).unwrap();
        assert_eq!(merged.statuses(), &[submitted(5)]);
        assert_eq!(cache.orphan_count(), 0);
    }

    #[test]
    fn test_orphans_evicted_by_age() {
        let cache = EntityCache::with_config(CacheConfig {
            orphan_ttl: Duration::from_secs(60),
            max_orphan_orders: 16,
        });
        cache.add_status(submitted(1));
        cache.add_status(submitted(2));

        assert_eq!(cache.evict_orphans(Instant::now()), 0);
        assert_eq!(cache.evict_orphans(Instant::now() + Duration::from_secs(61)), 2);
        assert_eq!(cache.orphan_count(), 0);
    }

    #[test]
    fn test_orphans_bounded_by_capacity() {
        let cache = EntityCache::with_config(CacheConfig {
            orphan_ttl: Duration::from_secs(60),
            max_orphan_orders: 2,
        });
        cache.add_status(submitted(1));
        thread::sleep(Duration::from_millis(2));
        cache.add_status(submitted(2));
        thread::sleep(Duration::from_millis(2));
        cache.add_status(submitted(3));

        assert_eq!(cache.orphan_count(), 2);
        // Oldest went first
        assert!(cache.orphan_statuses(1).is_empty());
        assert_eq!(cache.orphan_statuses(3).len(), 1);
    }

    #[test]
    fn test_capacity_eviction_skips_merged_ids() {
        let cache = EntityCache::with_config(CacheConfig {
            orphan_ttl: Duration::from_secs(60),
            max_orphan_orders: 2,
        });
        cache.add_status(submitted(1));
        cache.add_status(submitted(2));
        // Order 1 arrives, its queue entry goes stale
        cache.add_order(order(1));
        cache.add_status(submitted(3));
        assert_eq!(cache.orphan_count(), 2);

        cache.add_status(submitted(4));
        assert_eq!(cache.orphan_count(), 2);
        assert!(cache.orphan_statuses(2).is_empty());
        assert_eq!(cache.orphan_statuses(3).len(), 1);
        assert_eq!(cache.orphan_statuses(4).len(), 1);
        assert_eq!(cache.order(1).unwrap().statuses().len(), 1);
    }

    #[test]
    fn test_rebuffered_id_not_evicted_by_stale_entry() {
        let cache = EntityCache::with_config(CacheConfig {
            orphan_ttl: Duration::from_secs(60),
            max_orphan_orders: 2,
        });
        cache.add_status(submitted(1));
        cache.add_order(order(1));
        cache.remove_order(1);
        // Same id buffered again, after 2
        cache.add_status(submitted(2));
        cache.add_status(submitted(1));
        cache.add_status(submitted(3));

        assert_eq!(cache.orphan_count(), 2);
        assert!(cache.orphan_statuses(2).is_empty());
        assert_eq!(cache.orphan_statuses(1).len(), 1);
        assert_eq!(cache.orphan_statuses(3).len(), 1);
    }

    #[test]
    fn test_orphan_queue_pruned() {
        let cache = EntityCache::with_config(CacheConfig {
            orphan_ttl: Duration::from_secs(60),
            max_orphan_orders: 4,
        });
        for order_id in 0..100 {
            cache.add_status(submitted(order_id));
            cache.add_order(order(order_id));
        }
        assert_eq!(cache.orphan_count(), 0);
        assert!(cache.orphan_backlog() <= 8);

        cache.add_status(submitted(500));
        cache.evict_orphans(Instant::now() + Duration::from_secs(61));
        assert_eq!(cache.orphan_backlog(), 0);
    }

    #[test]
    fn test_contract_zero_is_invalid() {
        let cache = EntityCache::new();
        assert!(matches!(
            cache.position("DU12345", 0),
            Err(CacheError::InvalidArgument(_))
        ));
        assert!(matches!(
            cache.position("", 0),
            Err(CacheError::InvalidArgument(_))
        ));
        assert!(matches!(
            cache.portfolio_line(0),
            Err(CacheError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_position_last_write_wins() {
        let cache = EntityCache::new();
        let mut position = Position {
            account: "DU12345".to_string(),
            contract: Contract::stock(265598, "AAPL"),
            quantity: dec!(100),
            avg_cost: dec!(180.25),
        };
        cache.update_position(position.clone());
        position.quantity = dec!(150);
        cache.update_position(position.clone());

        assert_eq!(cache.position("DU12345", 265598).unwrap(), Some(position));
        assert_eq!(cache.position("DU99999", 265598).unwrap(), None);
        assert_eq!(cache.positions().len(), 1);
    }

    #[test]
    fn test_portfolio_last_write_wins() {
        let cache = EntityCache::new();
        let mut line = PortfolioLine {
            account: "DU12345".to_string(),
            contract: Contract::stock(8314, "IBM"),
            position: dec!(10),
            market_price: dec!(140),
            market_value: dec!(1400),
            average_cost: dec!(130),
            unrealized_pnl: dec!(100),
            realized_pnl: dec!(0),
        };
        cache.update_portfolio(line.clone());
        line.market_price = dec!(141);
        cache.update_portfolio(line.clone());

        assert_eq!(cache.portfolio_line(8314).unwrap(), Some(line));
        assert_eq!(cache.portfolio().len(), 1);
    }

    #[test]
    fn test_tick_updates_in_place() {
        let cache = EntityCache::new();
        cache.update_tick(3, |tick| tick.set_price(PriceField::Bid, dec!(99.5)));
        let snapshot = cache.update_tick(3, |tick| {
            tick.set_price(PriceField::Ask, dec!(100.5));
            tick.set_size(SizeField::Volume, dec!(1200));
        });

        assert_eq!(snapshot.mid(), Some(dec!(100)));
        assert_eq!(snapshot.updates, 3);
        assert_eq!(cache.tick(3), Some(snapshot));
        assert!(cache.remove_tick(3).is_some());
        assert!(cache.tick(3).is_none());
    }

    #[test]
    fn test_snapshots_are_detached() {
        let cache = EntityCache::new();
        cache.add_order(order(1));
        let before = cache.order(1).unwrap();
        cache.add_status(submitted(1));
        assert!(before.statuses().is_empty());
    }

    #[test]
    fn test_clear_forgets_everything() {
        let cache = EntityCache::new();
        cache.add_order(order(1));
        cache.add_status(submitted(2));
        cache.update_tick(1, |tick| tick.set_price(PriceField::Last, dec!(1)));
        cache.clear();
        assert_eq!(cache.order_count(), 0);
        assert_eq!(cache.orphan_count(), 0);
        assert!(cache.ticks().is_empty());
    }

    #[test]
    fn test_status_never_lost_racing_creation() {
        for round in 0..200 {
            let cache = Arc::new(EntityCache::new());
            let creator = {
                let cache = cache.clone();
                thread::spawn(move || cache.add_order(order(round)))
            };
            let reporter = {
                let cache = cache.clone();
                thread::spawn(move || cache.add_status(submitted(round)))
            };
            creator.join().unwrap();
            reporter.join().unwrap();

            assert_eq!(cache.order(round).unwrap().statuses().len(), 1);
            assert_eq!(cache.orphan_count(), 0);
        }
    }
}
