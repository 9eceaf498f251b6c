// src/domain/models.rs
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Order side, normalized across exchanges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "Buy",
            Side::Sell => "Sell",
        }
    }

    /// The side that closes a position opened on this side
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Local order status with a checked transition table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Filled,
    Canceled,
    Expired,
    Closed,
    Deleted,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }

    /// Legal transitions. Statuses never regress toward `Pending`;
    /// a filled order may still move to `Closed` when its position closes.
    pub fn can_transition(&self, to: OrderStatus) -> bool {
        if *self == to {
            return true;
        }
        match self {
            OrderStatus::Pending => matches!(
                to,
                OrderStatus::Filled
                    | OrderStatus::Canceled
                    | OrderStatus::Expired
                    | OrderStatus::Deleted
            ),
            OrderStatus::Filled => matches!(to, OrderStatus::Closed),
            _ => false,
        }
    }

    /// Fixed mapping from exchange order-status strings.
    /// Unknown strings map to `Pending` so a later run can re-resolve them.
    pub fn from_exchange(raw: &str) -> OrderStatus {
        match raw.to_uppercase().as_str() {
            "NEW" | "ACTIVE" | "OPEN" | "PENDING" => OrderStatus::Pending,
            "FILLED" => OrderStatus::Filled,
            "CANCELED" | "CANCELLED" => OrderStatus::Canceled,
            "EXPIRED" => OrderStatus::Expired,
            _ => OrderStatus::Pending,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            OrderStatus::Pending => write!(f, "pending"),
            OrderStatus::Filled => write!(f, "filled"),
            OrderStatus::Canceled => write!(f, "canceled"),
            OrderStatus::Expired => write!(f, "expired"),
            OrderStatus::Closed => write!(f, "closed"),
            OrderStatus::Deleted => write!(f, "deleted"),
        }
    }
}

/// A local record of an intended exchange order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    /// Exchange order id, set once the exchange acknowledges the order
    pub order_id: Option<String>,
    pub user_id: i64,
    pub exchange_id: i64,
    pub is_demo: bool,
    pub symbol: String,
    pub side: Side,
    pub entry_price: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub amount: Decimal,
    pub status: OrderStatus,
    /// Expiry window relative to `created_at`
    pub expire_minutes: Option<i64>,
    /// Price trigger at which a still-pending order is canceled
    pub cancel_price: Option<Decimal>,
    /// Protects the order from non-terminal mutation
    pub is_locked: bool,
    pub created_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expire_minutes {
            Some(minutes) => now >= self.created_at + Duration::minutes(minutes),
            None => false,
        }
    }

    /// Whether the mark price has crossed the cancel trigger
    pub fn cancel_triggered(&self, mark_price: Decimal) -> bool {
        match (self.cancel_price, self.side) {
            (Some(trigger), Side::Buy) => mark_price <= trigger,
            (Some(trigger), Side::Sell) => mark_price >= trigger,
            (None, _) => false,
        }
    }
}

/// Verification state of a trade against exchange closed-PnL history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
    /// Not yet checked against the exchange
    Unverified,
    /// Matched to exchange closed-PnL history
    Verified,
    /// Full history window searched, no match found
    VerifiedAbsent,
}

impl SyncState {
    /// Only `Unverified -> Verified` and `Unverified -> VerifiedAbsent`
    /// are legal; verification never regresses.
    pub fn can_advance(&self, to: SyncState) -> bool {
        *self == to || matches!(self, SyncState::Unverified)
    }
}

/// A local record of one fill-to-close position cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: i64,
    pub user_id: i64,
    pub exchange_id: i64,
    pub is_demo: bool,
    pub symbol: String,
    pub side: Side,
    pub order_type: String,
    pub leverage: Decimal,
    pub qty: Decimal,
    pub avg_entry_price: Decimal,
    pub avg_exit_price: Option<Decimal>,
    pub pnl: Option<Decimal>,
    /// Exchange order id of the originating order
    pub order_id: Option<String>,
    pub closed_at: Option<DateTime<Utc>>,
    pub synchronized: SyncState,
    pub created_at: DateTime<Utc>,
}

impl Trade {
    pub fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }
}

/// Spot order status, single case convention.
/// Parsing accepts the legacy lowercase spellings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpotOrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl SpotOrderStatus {
    pub fn parse(raw: &str) -> Option<SpotOrderStatus> {
        match raw {
            "New" | "NEW" | "new" => Some(SpotOrderStatus::New),
            "PartiallyFilled" | "PARTIALLY_FILLED" => Some(SpotOrderStatus::PartiallyFilled),
            "Filled" | "FILLED" | "filled" => Some(SpotOrderStatus::Filled),
            "Cancelled" | "CANCELED" | "CANCELLED" | "cancelled" => Some(SpotOrderStatus::Cancelled),
            "Rejected" | "REJECTED" | "rejected" => Some(SpotOrderStatus::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SpotOrderStatus::Filled | SpotOrderStatus::Cancelled | SpotOrderStatus::Rejected
        )
    }
}

/// Spot market analog of `Order`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotOrder {
    pub id: i64,
    pub order_id: Option<String>,
    pub user_id: i64,
    pub exchange_id: i64,
    pub is_demo: bool,
    pub symbol: String,
    pub side: Side,
    pub price: Option<Decimal>,
    pub qty: Decimal,
    pub status: SpotOrderStatus,
    pub created_at: DateTime<Utc>,
}

/// Supported exchanges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExchangeKind {
    Bybit,
    Binance,
    BingX,
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExchangeKind::Bybit => write!(f, "bybit"),
            ExchangeKind::Binance => write!(f, "binance"),
            ExchangeKind::BingX => write!(f, "bingx"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionMode {
    OneWay,
    Hedge,
}

/// One exchange account credential set for one user.
/// Every reconciliation operation is scoped to exactly one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserExchange {
    pub id: i64,
    pub user_id: i64,
    pub exchange: ExchangeKind,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub demo_api_key: Option<String>,
    pub demo_api_secret: Option<String>,
    pub futures_access: bool,
    pub spot_access: bool,
    pub is_demo_active: bool,
    pub future_strict_mode: bool,
    pub position_mode: PositionMode,
    pub selected_market: String,
}

impl UserExchange {
    /// Whether the account has usable credentials for the given mode
    pub fn has_credentials(&self, demo: bool) -> bool {
        if demo {
            self.demo_api_key.is_some() && self.demo_api_secret.is_some()
        } else {
            self.api_key.is_some() && self.api_secret.is_some()
        }
    }
}

/// Live position, normalized across exchanges
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub leverage: Decimal,
    pub mark_price: Option<Decimal>,
    /// Exchange-reported unrealized PnL ratio, when available
    pub upl_ratio: Option<Decimal>,
}

/// Closed-PnL event, normalized across exchanges
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedPnlEvent {
    pub order_id: Option<String>,
    pub symbol: String,
    pub side: Side,
    pub qty: Decimal,
    pub avg_entry_price: Decimal,
    pub avg_exit_price: Decimal,
    pub realized_pnl: Decimal,
    pub closed_at: DateTime<Utc>,
}

/// Open or historical exchange order, normalized across exchanges
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeOrder {
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub qty: Decimal,
    pub price: Decimal,
    pub status: String,
    pub reduce_only: bool,
    pub close_on_trigger: bool,
    pub trigger_price: Option<Decimal>,
    pub stop_order_type: Option<String>,
    pub created_at_ms: i64,
}

impl ExchangeOrder {
    /// System-generated protective orders (reduce-only close legs, trigger
    /// stops) are never adopted as primary orders by the lifecycle pass.
    pub fn is_system_generated(&self) -> bool {
        self.reduce_only
            || self.close_on_trigger
            || (self.trigger_price.is_some() && self.stop_order_type.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn terminal_status_never_regresses() {
        for terminal in [
            OrderStatus::Canceled,
            OrderStatus::Expired,
            OrderStatus::Closed,
            OrderStatus::Deleted,
        ] {
            assert!(!terminal.can_transition(OrderStatus::Pending));
            assert!(!terminal.can_transition(OrderStatus::Filled));
        }
        assert!(!OrderStatus::Filled.can_transition(OrderStatus::Pending));
    }

    #[test]
    fn filled_may_close() {
        assert!(OrderStatus::Filled.can_transition(OrderStatus::Closed));
        assert!(OrderStatus::Pending.can_transition(OrderStatus::Filled));
        assert!(OrderStatus::Pending.can_transition(OrderStatus::Expired));
    }

    #[test]
    fn exchange_status_mapping_table() {
        assert_eq!(OrderStatus::from_exchange("NEW"), OrderStatus::Pending);
        assert_eq!(OrderStatus::from_exchange("Active"), OrderStatus::Pending);
        assert_eq!(OrderStatus::from_exchange("FILLED"), OrderStatus::Filled);
        assert_eq!(OrderStatus::from_exchange("CANCELED"), OrderStatus::Canceled);
        assert_eq!(OrderStatus::from_exchange("CANCELLED"), OrderStatus::Canceled);
        assert_eq!(OrderStatus::from_exchange("EXPIRED"), OrderStatus::Expired);
        assert_eq!(OrderStatus::from_exchange("???"), OrderStatus::Pending);
    }

    #[test]
    fn sync_state_never_regresses() {
        assert!(SyncState::Unverified.can_advance(SyncState::Verified));
        assert!(SyncState::Unverified.can_advance(SyncState::VerifiedAbsent));
        assert!(!SyncState::Verified.can_advance(SyncState::Unverified));
        assert!(!SyncState::VerifiedAbsent.can_advance(SyncState::Verified));
    }

    #[test]
    fn spot_status_accepts_legacy_casing() {
        assert_eq!(
            SpotOrderStatus::parse("cancelled"),
            Some(SpotOrderStatus::Cancelled)
        );
        assert_eq!(SpotOrderStatus::parse("New"), Some(SpotOrderStatus::New));
        assert_eq!(SpotOrderStatus::parse("bogus"), None);
    }

    #[test]
    fn cancel_trigger_respects_side() {
        let mut order = Order {
            id: 1,
            order_id: None,
            user_id: 1,
            exchange_id: 1,
            is_demo: false,
            symbol: "BTCUSDT".to_string(),
            side: Side::Buy,
            entry_price: dec!(50000),
            stop_loss: None,
            take_profit: None,
            amount: dec!(1),
            status: OrderStatus::Pending,
            expire_minutes: None,
            cancel_price: Some(dec!(48000)),
            is_locked: false,
            created_at: Utc::now(),
            filled_at: None,
            closed_at: None,
        };
        assert!(order.cancel_triggered(dec!(47999)));
        assert!(!order.cancel_triggered(dec!(49000)));

        order.side = Side::Sell;
        order.cancel_price = Some(dec!(52000));
        assert!(order.cancel_triggered(dec!(52001)));
        assert!(!order.cancel_triggered(dec!(51000)));
    }

    #[test]
    fn system_generated_order_detection() {
        let base = ExchangeOrder {
            order_id: "1".to_string(),
            symbol: "BTCUSDT".to_string(),
            side: Side::Sell,
            qty: dec!(1),
            price: dec!(50000),
            status: "New".to_string(),
            reduce_only: false,
            close_on_trigger: false,
            trigger_price: None,
            stop_order_type: None,
            created_at_ms: 0,
        };
        assert!(!base.is_system_generated());

        let reduce = ExchangeOrder {
            reduce_only: true,
            ..base.clone()
        };
        assert!(reduce.is_system_generated());

        let stop = ExchangeOrder {
            trigger_price: Some(dec!(49000)),
            stop_order_type: Some("StopLoss".to_string()),
            ..base
        };
        assert!(stop.is_system_generated());
    }
}
