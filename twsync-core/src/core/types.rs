//! Broker entities held by the entity cache
//!
//! Everything here is a plain value: the cache owns the live copy and hands
//! out clones, so no reader ever observes a half-applied update.

use rust_decimal::Decimal;
use std::fmt;
use std::time::Instant;

/// Broker-assigned order id
pub type OrderId = i32;

/// Broker contract id (`0` means the contract was never resolved)
pub type ContractId = i32;

/// Request id of a market-data subscription
pub type TickerId = i32;

/// Contract id sentinel for "unresolved contract"
pub const UNRESOLVED_CONTRACT: ContractId = 0;

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
}

/// Order state as reported by the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderState {
    PendingSubmit,
    PreSubmitted,
    Submitted,
    PendingCancel,
    Cancelled,
    ApiCancelled,
    Filled,
    Inactive,
}

impl OrderState {
    /// No further status updates are expected for the order
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderState::Cancelled | OrderState::ApiCancelled | OrderState::Filled | OrderState::Inactive
        )
    }
}

/// Tradable instrument
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Contract {
    pub con_id: ContractId,
    pub symbol: String,
    pub sec_type: String,
    pub exchange: String,
    pub currency: String,
}

impl Contract {
    /// Stock contract routed through SMART
    pub fn stock(con_id: ContractId, symbol: &str) -> Self {
        Self {
            con_id,
            symbol: symbol.to_string(),
            sec_type: "STK".to_string(),
            exchange: "SMART".to_string(),
            currency: "USD".to_string(),
        }
    }
}

/// One order status notification
///
/// Two updates with identical content are the same update; the cache relies
/// on this to ignore replays.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderStatusUpdate {
    pub order_id: OrderId,
    pub state: OrderState,
    pub filled: Decimal,
    pub remaining: Decimal,
    pub avg_fill_price: Decimal,
    pub last_fill_price: Decimal,
    pub perm_id: i64,
    pub why_held: String,
}

impl OrderStatusUpdate {
    /// Status without fill information
    pub fn new(order_id: OrderId, state: OrderState, remaining: Decimal) -> Self {
        Self {
            order_id,
            state,
            filled: Decimal::ZERO,
            remaining,
            avg_fill_price: Decimal::ZERO,
            last_fill_price: Decimal::ZERO,
            perm_id: 0,
            why_held: String::new(),
        }
    }
}

/// An order known to the broker, with every distinct status seen for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub order_id: OrderId,
    pub contract: Contract,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub limit_price: Option<Decimal>,
    pub account: String,
    statuses: Vec<OrderStatusUpdate>,
}

impl Order {
    pub fn new(
        order_id: OrderId,
        contract: Contract,
        side: Side,
        order_type: OrderType,
        quantity: Decimal,
    ) -> Self {
        Self {
            order_id,
            contract,
            side,
            order_type,
            quantity,
            limit_price: None,
            account: String::new(),
            statuses: Vec::new(),
        }
    }

    /// Limit order helper
    pub fn limit(order_id: OrderId, contract: Contract, side: Side, quantity: Decimal, price: Decimal) -> Self {
        let mut order = Self::new(order_id, contract, side, OrderType::Limit, quantity);
        order.limit_price = Some(price);
        order
    }

    /// Merge a status update, ignoring one whose content was already seen
    ///
    /// Returns true if the status set changed.
    pub fn merge_status(&mut self, status: OrderStatusUpdate) -> bool {
        if self.statuses.contains(&status) {
            return false;
        }
        self.statuses.push(status);
        true
    }

    /// Distinct statuses in arrival order
    pub fn statuses(&self) -> &[OrderStatusUpdate] {
        &self.statuses
    }

    /// Most recently received status
    pub fn last_status(&self) -> Option<&OrderStatusUpdate> {
        self.statuses.last()
    }

    /// Whether the latest status is terminal
    pub fn is_done(&self) -> bool {
        self.last_status().map_or(false, |s| s.state.is_terminal())
    }
}

/// Position in one contract for one account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub account: String,
    pub contract: Contract,
    pub quantity: Decimal,
    pub avg_cost: Decimal,
}

/// Portfolio line from account updates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortfolioLine {
    pub account: String,
    pub contract: Contract,
    pub position: Decimal,
    pub market_price: Decimal,
    pub market_value: Decimal,
    pub average_cost: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
}

/// Price fields of a market-data tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceField {
    Bid,
    Ask,
    Last,
    High,
    Low,
    Close,
}

/// Size fields of a market-data tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeField {
    Bid,
    Ask,
    Last,
    Volume,
}

/// Market-data snapshot for one ticker, mutated field by field
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TickSnapshot {
    pub ticker_id: TickerId,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub last: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub close: Option<Decimal>,
    pub bid_size: Decimal,
    pub ask_size: Decimal,
    pub last_size: Decimal,
    pub volume: Decimal,
    pub updates: u64,
    pub last_update: Option<Instant>,
}

impl TickSnapshot {
    pub fn new(ticker_id: TickerId) -> Self {
        Self {
            ticker_id,
            ..Default::default()
        }
    }

    pub fn set_price(&mut self, field: PriceField, price: Decimal) {
        let slot = match field {
            PriceField::Bid => &mut self.bid,
            PriceField::Ask => &mut self.ask,
            PriceField::Last => &mut self.last,
            PriceField::High => &mut self.high,
            PriceField::Low => &mut self.low,
            PriceField::Close => &mut self.close,
        };
        *slot = Some(price);
        self.touch();
    }

    pub fn set_size(&mut self, field: SizeField, size: Decimal) {
        match field {
            SizeField::Bid => self.bid_size = size,
            SizeField::Ask => self.ask_size = size,
            SizeField::Last => self.last_size = size,
            SizeField::Volume => self.volume = size,
        }
        self.touch();
    }

    /// Mid price when both sides are quoted
    pub fn mid(&self) -> Option<Decimal> {
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        }
    }

    fn touch(&mut self) {
        self.updates += 1;
        self.last_update = Some(Instant::now());
    }
}
