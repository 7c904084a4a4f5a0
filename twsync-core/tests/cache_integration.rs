//! Entity cache behaviour under the callback thread and concurrent readers

use anyhow::Result;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use twsync_core::testing::{BrokerEvent, BrokerRequest, LoopbackBroker, LoopbackConfig};
use twsync_core::{
    CacheConfig, CacheError, ConnectionFlag, Contract, CoreConfig, EntityCache, EventKind,
    ListPromise, Order, OrderState, OrderStatusUpdate, PortfolioLine, Position, RequestRepository,
    Side, StatusOutcome,
};

fn aapl_order(order_id: i32) -> Order {
    Order::limit(order_id, Contract::stock(265598, "AAPL"), Side::Sell, dec!(50), dec!(201.10))
}

#[test]
fn test_statuses_before_order_are_merged_once() {
    let cache = EntityCache::new();
    let pending = OrderStatusUpdate::new(9, OrderState::PreSubmitted, dec!(50));
    let submitted = OrderStatusUpdate::new(9, OrderState::Submitted, dec!(50));

    assert_eq!(cache.add_status(pending.clone()), StatusOutcome::Buffered);
    assert_eq!(cache.add_status(submitted.clone()), StatusOutcome::Buffered);
    assert_eq!(cache.add_status(pending.clone()), StatusOutcome::Buffered);
    assert_eq!(cache.orphan_count(), 1);

    assert!(cache.add_order(aapl_order(9)));
    let order = cache.order(9).unwrap();
    assert_eq!(order.statuses(), &[pending.clone(), submitted]);

    // Replays after creation are recognised
    assert_eq!(
        cache.add_status(pending),
        StatusOutcome::Applied { changed: false }
    );
}

#[test]
fn test_many_racing_creations_lose_no_status() {
    let cache = Arc::new(EntityCache::new());

    let creators: Vec<_> = (0..4)
        .map(|worker| {
            let cache = cache.clone();
            thread::spawn(move || {
                for order_id in (worker..400).step_by(4) {
                    cache.add_order(aapl_order(order_id));
                }
            })
        })
        .collect();
    let reporters: Vec<_> = (0..4)
        .map(|worker| {
            let cache = cache.clone();
            thread::spawn(move || {
                for order_id in (worker..400).step_by(4) {
                    cache.add_status(OrderStatusUpdate::new(order_id, OrderState::Submitted, dec!(50)));
                }
            })
        })
        .collect();

    for handle in creators.into_iter().chain(reporters) {
        handle.join().unwrap();
    }

    assert_eq!(cache.order_count(), 400);
    assert_eq!(cache.orphan_count(), 0);
    for order in cache.orders() {
        assert_eq!(order.statuses().len(), 1, "order {} lost its status", order.order_id);
    }
}

#[test]
fn test_orphan_bounds_from_config() {
    let config = CoreConfig {
        orphan_ttl_secs: 1,
        max_orphan_orders: 3,
        ..CoreConfig::default()
    };
    let cache = EntityCache::with_config(config.cache_config());
    assert_eq!(
        *cache.config(),
        CacheConfig {
            orphan_ttl: Duration::from_secs(1),
            max_orphan_orders: 3
        }
    );

    for order_id in 0..10 {
        cache.add_status(OrderStatusUpdate::new(order_id, OrderState::Submitted, dec!(1)));
    }
    assert_eq!(cache.orphan_count(), 3);

    let evicted = cache.evict_orphans(Instant::now() + Duration::from_secs(2));
    assert_eq!(evicted, 3);
    assert_eq!(cache.orphan_count(), 0);
}

#[test]
fn test_unresolved_contract_lookups_rejected() {
    let cache = EntityCache::new();
    cache.update_position(Position {
        account: "DU111".to_string(),
        contract: Contract::stock(0, "???"),
        quantity: dec!(1),
        avg_cost: dec!(1),
    });

    assert!(matches!(
        cache.position("DU111", 0),
        Err(CacheError::InvalidArgument(_))
    ));
    assert!(matches!(
        cache.portfolio_line(0),
        Err(CacheError::InvalidArgument(_))
    ));
}

#[test]
fn test_unsolicited_events_and_positions_request() -> Result<()> {
    let flag = ConnectionFlag::new();
    let repo = RequestRepository::new(flag.clone());
    let cache = Arc::new(EntityCache::new());
    let broker = Arc::new(LoopbackBroker::start(
        repo.clone(),
        cache.clone(),
        flag,
        LoopbackConfig::default(),
    )?);

    for (account, qty) in [("DU222", dec!(100)), ("DU111", dec!(-20))] {
        broker.push_event(BrokerEvent::Position(Position {
            account: account.to_string(),
            contract: Contract::stock(272093, "MSFT"),
            quantity: qty,
            avg_cost: dec!(410.5),
        }))?;
    }
    broker.push_event(BrokerEvent::Portfolio(PortfolioLine {
        account: "DU222".to_string(),
        contract: Contract::stock(272093, "MSFT"),
        position: dec!(100),
        market_price: dec!(415),
        market_value: dec!(41500),
        average_cost: dec!(410.5),
        unrealized_pnl: dec!(450),
        realized_pnl: dec!(0),
    }))?;

    // The list request is answered after the events queued before it
    let submit = broker.clone();
    let positions: ListPromise<Position> = repo
        .register_list(EventKind::Positions, None, move || {
            submit.submit(BrokerRequest::Positions)
        })?;
    let positions = positions.get_timeout(Duration::from_secs(5))?;
    let accounts: Vec<&str> = positions.iter().map(|p| p.account.as_str()).collect();
    assert_eq!(accounts, vec!["DU111", "DU222"]);

    let line = cache.portfolio_line(272093)?.expect("portfolio line cached");
    assert_eq!(line.unrealized_pnl, dec!(450));
    assert_eq!(cache.position("DU111", 272093)?.map(|p| p.quantity), Some(dec!(-20)));
    Ok(())
}
