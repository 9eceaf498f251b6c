// src/ledger/mod.rs
// Local ledger: repository interfaces over Order and Trade rows, plus an
// in-memory implementation. Status transitions go through the checked
// table in the domain layer; illegal ones are errors, never silent
// overwrites.

use crate::domain::errors::{LedgerError, LedgerResult};
use crate::domain::models::{Order, OrderStatus, Side, SyncState, Trade};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::RwLock;

/// One (user, exchange-account, demo/real) ledger scope. Every query and
/// mutation is bounded to a single scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountScope {
    pub user_id: i64,
    pub exchange_id: i64,
    pub is_demo: bool,
}

impl AccountScope {
    fn matches_order(&self, order: &Order) -> bool {
        order.user_id == self.user_id
            && order.exchange_id == self.exchange_id
            && order.is_demo == self.is_demo
    }

    fn matches_trade(&self, trade: &Trade) -> bool {
        trade.user_id == self.user_id
            && trade.exchange_id == self.exchange_id
            && trade.is_demo == self.is_demo
    }
}

/// Repository interface for local orders
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Orders not yet in a resolved state (pending, or filled with an
    /// open position cycle)
    async fn unresolved_orders(&self, scope: AccountScope) -> Vec<Order>;

    async fn pending_orders(&self, scope: AccountScope) -> Vec<Order>;

    async fn find_by_exchange_id(&self, scope: AccountScope, order_id: &str) -> Option<Order>;

    async fn find(&self, id: i64) -> Option<Order>;

    async fn insert(&self, order: Order) -> Order;

    /// Apply a status transition. Locked orders only accept terminal
    /// targets; illegal transitions are rejected.
    async fn update_status(&self, id: i64, to: OrderStatus) -> LedgerResult<Order>;

    async fn set_filled(&self, id: i64, filled_at: DateTime<Utc>) -> LedgerResult<Order>;

    /// Oldest `created_at` among unresolved orders, used to bound the
    /// history window
    async fn oldest_unresolved_created_at(&self, scope: AccountScope) -> Option<DateTime<Utc>>;
}

/// Repository interface for local trades
#[async_trait]
pub trait TradeRepository: Send + Sync {
    async fn open_trades(&self, scope: AccountScope) -> Vec<Trade>;

    async fn find_open(&self, scope: AccountScope, symbol: &str, side: Side) -> Option<Trade>;

    async fn find_by_order_id(&self, scope: AccountScope, order_id: &str) -> Option<Trade>;

    async fn insert(&self, trade: Trade) -> Trade;

    /// Update mutable fields of an open trade (qty/price self-healing,
    /// live pnl, leverage)
    async fn update(&self, trade: Trade) -> LedgerResult<Trade>;

    /// Close a trade, recording exit price, realized pnl and verification
    /// state. Sync state may not regress.
    async fn close(
        &self,
        id: i64,
        avg_exit_price: Option<Decimal>,
        pnl: Option<Decimal>,
        closed_at: DateTime<Utc>,
        synchronized: SyncState,
    ) -> LedgerResult<Trade>;
}

/// In-memory ledger backing both repositories
#[derive(Default)]
pub struct InMemoryLedger {
    orders: RwLock<Vec<Order>>,
    trades: RwLock<Vec<Trade>>,
    next_order_id: AtomicI64,
    next_trade_id: AtomicI64,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            orders: RwLock::new(Vec::new()),
            trades: RwLock::new(Vec::new()),
            next_order_id: AtomicI64::new(1),
            next_trade_id: AtomicI64::new(1),
        }
    }

    pub async fn all_orders(&self) -> Vec<Order> {
        self.orders.read().await.clone()
    }

    pub async fn all_trades(&self) -> Vec<Trade> {
        self.trades.read().await.clone()
    }
}

#[async_trait]
impl OrderRepository for InMemoryLedger {
    async fn unresolved_orders(&self, scope: AccountScope) -> Vec<Order> {
        let orders = self.orders.read().await;
        orders
            .iter()
            .filter(|o| scope.matches_order(o))
            .filter(|o| matches!(o.status, OrderStatus::Pending | OrderStatus::Filled))
            .cloned()
            .collect()
    }

    async fn pending_orders(&self, scope: AccountScope) -> Vec<Order> {
        let orders = self.orders.read().await;
        orders
            .iter()
            .filter(|o| scope.matches_order(o) && o.status == OrderStatus::Pending)
            .cloned()
            .collect()
    }

    async fn find_by_exchange_id(&self, scope: AccountScope, order_id: &str) -> Option<Order> {
        let orders = self.orders.read().await;
        orders
            .iter()
            .find(|o| scope.matches_order(o) && o.order_id.as_deref() == Some(order_id))
            .cloned()
    }

    async fn find(&self, id: i64) -> Option<Order> {
        let orders = self.orders.read().await;
        orders.iter().find(|o| o.id == id).cloned()
    }

    async fn insert(&self, mut order: Order) -> Order {
        if order.id == 0 {
            order.id = self.next_order_id.fetch_add(1, Ordering::SeqCst);
        }
        self.orders.write().await.push(order.clone());
        order
    }

    async fn update_status(&self, id: i64, to: OrderStatus) -> LedgerResult<Order> {
        let mut orders = self.orders.write().await;
        let order = orders
            .iter_mut()
            .find(|o| o.id == id)
            .ok_or(LedgerError::OrderNotFound(id))?;

        if order.is_locked && !to.is_terminal() {
            return Err(LedgerError::Locked(id));
        }
        if !order.status.can_transition(to) {
            return Err(LedgerError::IllegalTransition {
                order_id: id,
                from: order.status.to_string(),
                to: to.to_string(),
            });
        }

        order.status = to;
        if to == OrderStatus::Closed && order.closed_at.is_none() {
            order.closed_at = Some(Utc::now());
        }
        Ok(order.clone())
    }

    async fn set_filled(&self, id: i64, filled_at: DateTime<Utc>) -> LedgerResult<Order> {
        let mut orders = self.orders.write().await;
        let order = orders
            .iter_mut()
            .find(|o| o.id == id)
            .ok_or(LedgerError::OrderNotFound(id))?;

        if !order.status.can_transition(OrderStatus::Filled) {
            return Err(LedgerError::IllegalTransition {
                order_id: id,
                from: order.status.to_string(),
                to: OrderStatus::Filled.to_string(),
            });
        }

        order.status = OrderStatus::Filled;
        order.filled_at = Some(filled_at);
        Ok(order.clone())
    }

    async fn oldest_unresolved_created_at(&self, scope: AccountScope) -> Option<DateTime<Utc>> {
        let orders = self.orders.read().await;
        orders
            .iter()
            .filter(|o| scope.matches_order(o))
            .filter(|o| matches!(o.status, OrderStatus::Pending | OrderStatus::Filled))
            .map(|o| o.created_at)
            .min()
    }
}

#[async_trait]
impl TradeRepository for InMemoryLedger {
    async fn open_trades(&self, scope: AccountScope) -> Vec<Trade> {
        let trades = self.trades.read().await;
        trades
            .iter()
            .filter(|t| scope.matches_trade(t) && t.is_open())
            .cloned()
            .collect()
    }

    async fn find_open(&self, scope: AccountScope, symbol: &str, side: Side) -> Option<Trade> {
        let trades = self.trades.read().await;
        trades
            .iter()
            .find(|t| {
                scope.matches_trade(t) && t.is_open() && t.symbol == symbol && t.side == side
            })
            .cloned()
    }

    async fn find_by_order_id(&self, scope: AccountScope, order_id: &str) -> Option<Trade> {
        let trades = self.trades.read().await;
        trades
            .iter()
            .find(|t| scope.matches_trade(t) && t.order_id.as_deref() == Some(order_id))
            .cloned()
    }

    async fn insert(&self, mut trade: Trade) -> Trade {
        if trade.id == 0 {
            trade.id = self.next_trade_id.fetch_add(1, Ordering::SeqCst);
        }
        self.trades.write().await.push(trade.clone());
        trade
    }

    async fn update(&self, trade: Trade) -> LedgerResult<Trade> {
        let mut trades = self.trades.write().await;
        let existing = trades
            .iter_mut()
            .find(|t| t.id == trade.id)
            .ok_or(LedgerError::TradeNotFound(trade.id))?;

        if !existing.synchronized.can_advance(trade.synchronized) {
            return Err(LedgerError::SyncRegression(trade.id));
        }

        *existing = trade.clone();
        Ok(trade)
    }

    async fn close(
        &self,
        id: i64,
        avg_exit_price: Option<Decimal>,
        pnl: Option<Decimal>,
        closed_at: DateTime<Utc>,
        synchronized: SyncState,
    ) -> LedgerResult<Trade> {
        let mut trades = self.trades.write().await;
        let trade = trades
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(LedgerError::TradeNotFound(id))?;

        if !trade.synchronized.can_advance(synchronized) {
            return Err(LedgerError::SyncRegression(id));
        }

        trade.avg_exit_price = avg_exit_price.or(trade.avg_exit_price);
        trade.pnl = pnl.or(trade.pnl);
        trade.closed_at = Some(closed_at);
        trade.synchronized = synchronized;
        Ok(trade.clone())
    }
}

#[cfg(test)]
pub mod testutil {
    use super::*;
    use rust_decimal_macros::dec;

    pub fn scope() -> AccountScope {
        AccountScope {
            user_id: 1,
            exchange_id: 1,
            is_demo: false,
        }
    }

    pub fn order(id: i64, symbol: &str, side: Side, price: Decimal, amount: Decimal) -> Order {
        Order {
            id,
            order_id: None,
            user_id: 1,
            exchange_id: 1,
            is_demo: false,
            symbol: symbol.to_string(),
            side,
            entry_price: price,
            stop_loss: None,
            take_profit: None,
            amount,
            status: OrderStatus::Pending,
            expire_minutes: None,
            cancel_price: None,
            is_locked: false,
            created_at: Utc::now(),
            filled_at: None,
            closed_at: None,
        }
    }

    pub fn trade(id: i64, symbol: &str, side: Side, qty: Decimal, entry: Decimal) -> Trade {
        Trade {
            id,
            user_id: 1,
            exchange_id: 1,
            is_demo: false,
            symbol: symbol.to_string(),
            side,
            order_type: "Limit".to_string(),
            leverage: dec!(1),
            qty,
            avg_entry_price: entry,
            avg_exit_price: None,
            pnl: None,
            order_id: None,
            closed_at: None,
            synchronized: SyncState::Unverified,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn terminal_status_is_immutable() {
        let ledger = InMemoryLedger::new();
        let order =
            OrderRepository::insert(&ledger, order(0, "BTCUSDT", Side::Buy, dec!(50000), dec!(1)))
                .await;

        ledger
            .update_status(order.id, OrderStatus::Canceled)
            .await
            .unwrap();

        let err = ledger
            .update_status(order.id, OrderStatus::Pending)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::IllegalTransition { .. }));

        let err = ledger
            .update_status(order.id, OrderStatus::Filled)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::IllegalTransition { .. }));
    }

    #[tokio::test]
    async fn locked_order_only_accepts_terminal() {
        let ledger = InMemoryLedger::new();
        let mut o = order(0, "BTCUSDT", Side::Buy, dec!(50000), dec!(1));
        o.is_locked = true;
        let o = OrderRepository::insert(&ledger, o).await;

        // Terminal target is fine even when locked
        ledger
            .update_status(o.id, OrderStatus::Expired)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn sync_state_regression_is_rejected() {
        let ledger = InMemoryLedger::new();
        let t =
            TradeRepository::insert(&ledger, trade(0, "ETHUSDT", Side::Buy, dec!(1), dec!(3000)))
                .await;

        ledger
            .close(t.id, Some(dec!(3100)), Some(dec!(100)), Utc::now(), SyncState::Verified)
            .await
            .unwrap();

        let err = ledger
            .close(t.id, None, None, Utc::now(), SyncState::VerifiedAbsent)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::SyncRegression(_)));
    }

    #[tokio::test]
    async fn open_trade_lookup_is_scoped() {
        let ledger = InMemoryLedger::new();
        TradeRepository::insert(&ledger, trade(0, "ETHUSDT", Side::Buy, dec!(1), dec!(3000)))
            .await;

        assert!(ledger
            .find_open(scope(), "ETHUSDT", Side::Buy)
            .await
            .is_some());

        let demo_scope = AccountScope {
            is_demo: true,
            ..scope()
        };
        assert!(ledger
            .find_open(demo_scope, "ETHUSDT", Side::Buy)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn oldest_unresolved_bound() {
        let ledger = InMemoryLedger::new();
        let mut older = order(0, "BTCUSDT", Side::Buy, dec!(50000), dec!(1));
        older.created_at = Utc::now() - chrono::Duration::hours(2);
        let older = OrderRepository::insert(&ledger, older).await;
        OrderRepository::insert(&ledger, order(0, "BTCUSDT", Side::Sell, dec!(50000), dec!(1)))
            .await;

        assert_eq!(
            ledger.oldest_unresolved_created_at(scope()).await,
            Some(older.created_at)
        );
    }
}
