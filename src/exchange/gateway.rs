// src/exchange/gateway.rs
use crate::domain::errors::ExchangeResult;
use crate::domain::models::{
    ClosedPnlEvent, ExchangeOrder, Position, PositionMode, Side,
};
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Order placement parameters, the union of what the supported exchanges
/// accept. Fields the target exchange does not use are ignored by its
/// adapter.
#[derive(Debug, Clone)]
pub struct OrderParams {
    pub category: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderKind,
    pub qty: Decimal,
    pub price: Option<Decimal>,
    pub trigger_price: Option<Decimal>,
    pub reduce_only: bool,
    pub close_on_trigger: bool,
    pub position_idx: i32,
    pub time_in_force: String,
    pub order_link_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderKind {
    Market,
    Limit,
}

impl OrderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::Market => "Market",
            OrderKind::Limit => "Limit",
        }
    }
}

impl OrderParams {
    /// Market trigger order used for stop-loss placement
    pub fn market_stop(
        symbol: &str,
        side: Side,
        qty: Decimal,
        trigger_price: Decimal,
        position_idx: i32,
    ) -> Self {
        Self {
            category: "linear".to_string(),
            symbol: symbol.to_string(),
            side,
            order_type: OrderKind::Market,
            qty,
            price: None,
            trigger_price: Some(trigger_price),
            reduce_only: true,
            close_on_trigger: true,
            position_idx,
            time_in_force: "GTC".to_string(),
            order_link_id: None,
        }
    }

    /// Limit reduce-only order used for take-profit placement
    pub fn limit_reduce_only(
        symbol: &str,
        side: Side,
        qty: Decimal,
        price: Decimal,
        position_idx: i32,
    ) -> Self {
        Self {
            category: "linear".to_string(),
            symbol: symbol.to_string(),
            side,
            order_type: OrderKind::Limit,
            qty,
            price: Some(price),
            trigger_price: None,
            reduce_only: true,
            close_on_trigger: false,
            position_idx,
            time_in_force: "GTC".to_string(),
            order_link_id: None,
        }
    }
}

/// Acknowledgement returned by the exchange for a newly created order
#[derive(Debug, Clone)]
pub struct OrderAck {
    pub order_id: String,
}

/// Price/quantity scale for a traded instrument
#[derive(Debug, Clone, Copy)]
pub struct InstrumentPrecision {
    pub price_scale: u32,
    pub qty_scale: u32,
}

/// Uniform capability set over one exchange account.
///
/// One instance is bound to a single account's credentials and demo/real
/// mode. Implementations are unreliable, rate-limited remote services;
/// callers treat every method as fallible and skip-and-continue on error.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// List open orders, optionally filtered by symbol
    async fn get_open_orders(&self, symbol: Option<&str>) -> ExchangeResult<Vec<ExchangeOrder>>;

    /// List live positions, optionally filtered by symbol
    async fn get_positions(&self, symbol: Option<&str>) -> ExchangeResult<Vec<Position>>;

    /// Order history since `start_time_ms`, newest first
    async fn get_order_history(
        &self,
        symbol: Option<&str>,
        limit: u32,
        start_time_ms: i64,
    ) -> ExchangeResult<Vec<ExchangeOrder>>;

    /// Realized-PnL events for a symbol
    async fn get_closed_pnl(
        &self,
        symbol: &str,
        limit: u32,
        start_time_ms: Option<i64>,
    ) -> ExchangeResult<Vec<ClosedPnlEvent>>;

    /// Cancel an order by exchange id
    async fn cancel_order(&self, order_id: &str, symbol: &str) -> ExchangeResult<()>;

    /// Create a new order
    async fn create_order(&self, params: &OrderParams) -> ExchangeResult<OrderAck>;

    /// Market-close (part of) a position opened on `side`
    async fn close_position(&self, symbol: &str, side: Side, qty: Decimal) -> ExchangeResult<()>;

    /// Untriggered conditional (stop/take-profit trigger) orders for a symbol
    async fn get_conditional_orders(&self, symbol: &str) -> ExchangeResult<Vec<ExchangeOrder>>;

    /// Price/qty precision for a symbol
    async fn get_instrument_precision(&self, symbol: &str) -> ExchangeResult<InstrumentPrecision>;
}

/// Hedge-mode leg index for a position; one-way accounts always use 0.
pub fn position_idx(position: &Position, mode: PositionMode) -> i32 {
    match mode {
        PositionMode::OneWay => 0,
        PositionMode::Hedge => match position.side {
            Side::Buy => 1,
            Side::Sell => 2,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn position(side: Side) -> Position {
        Position {
            symbol: "BTCUSDT".to_string(),
            side,
            size: dec!(1),
            entry_price: dec!(50000),
            unrealized_pnl: dec!(0),
            leverage: dec!(10),
            mark_price: None,
            upl_ratio: None,
        }
    }

    #[test]
    fn hedge_mode_leg_index() {
        assert_eq!(position_idx(&position(Side::Buy), PositionMode::OneWay), 0);
        assert_eq!(position_idx(&position(Side::Buy), PositionMode::Hedge), 1);
        assert_eq!(position_idx(&position(Side::Sell), PositionMode::Hedge), 2);
    }

    #[test]
    fn market_stop_params() {
        let params = OrderParams::market_stop("ETHUSDT", Side::Sell, dec!(1), dec!(2900), 0);
        assert_eq!(params.order_type, OrderKind::Market);
        assert_eq!(params.trigger_price, Some(dec!(2900)));
        assert!(params.reduce_only);
        assert!(params.close_on_trigger);
        assert!(params.price.is_none());
    }

    #[test]
    fn limit_reduce_only_params() {
        let params = OrderParams::limit_reduce_only("ETHUSDT", Side::Sell, dec!(2), dec!(3100), 1);
        assert_eq!(params.order_type, OrderKind::Limit);
        assert_eq!(params.price, Some(dec!(3100)));
        assert!(params.reduce_only);
        assert!(!params.close_on_trigger);
        assert_eq!(params.position_idx, 1);
    }
}
