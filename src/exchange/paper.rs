// src/exchange/paper.rs
// In-memory gateway used for offline runs and tests. Mutations are applied
// to the seeded state and recorded so callers can assert on issued calls.

use crate::domain::errors::{ExchangeError, ExchangeResult};
use crate::domain::models::{ClosedPnlEvent, ExchangeOrder, Position, Side, UserExchange};
use crate::exchange::gateway::{ExchangeGateway, InstrumentPrecision, OrderAck, OrderParams};
use crate::recon::orchestrator::GatewayFactory;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

#[derive(Default)]
pub struct PaperGateway {
    open_orders: RwLock<Vec<ExchangeOrder>>,
    conditional_orders: RwLock<Vec<ExchangeOrder>>,
    positions: RwLock<Vec<Position>>,
    order_history: RwLock<Vec<ExchangeOrder>>,
    closed_pnl: RwLock<Vec<ClosedPnlEvent>>,
    canceled: RwLock<Vec<String>>,
    created: RwLock<Vec<OrderParams>>,
    closed: RwLock<Vec<(String, Side, Decimal)>>,
    next_id: AtomicU64,
    fail: AtomicBool,
}

impl PaperGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_open_orders(&self, orders: Vec<ExchangeOrder>) {
        *self.open_orders.write().await = orders;
    }

    pub async fn seed_conditional_orders(&self, orders: Vec<ExchangeOrder>) {
        *self.conditional_orders.write().await = orders;
    }

    pub async fn seed_positions(&self, positions: Vec<Position>) {
        *self.positions.write().await = positions;
    }

    pub async fn seed_order_history(&self, orders: Vec<ExchangeOrder>) {
        *self.order_history.write().await = orders;
    }

    pub async fn seed_closed_pnl(&self, events: Vec<ClosedPnlEvent>) {
        *self.closed_pnl.write().await = events;
    }

    /// Make every subsequent call fail (transient-error simulation)
    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    pub async fn canceled_order_ids(&self) -> Vec<String> {
        self.canceled.read().await.clone()
    }

    pub async fn created_orders(&self) -> Vec<OrderParams> {
        self.created.read().await.clone()
    }

    pub async fn closed_positions(&self) -> Vec<(String, Side, Decimal)> {
        self.closed.read().await.clone()
    }

    fn check_failing(&self) -> ExchangeResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ExchangeError::Request("paper gateway failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ExchangeGateway for PaperGateway {
    async fn get_open_orders(&self, symbol: Option<&str>) -> ExchangeResult<Vec<ExchangeOrder>> {
        self.check_failing()?;
        let orders = self.open_orders.read().await;
        Ok(orders
            .iter()
            .filter(|o| symbol.map_or(true, |s| o.symbol == s))
            .cloned()
            .collect())
    }

    async fn get_positions(&self, symbol: Option<&str>) -> ExchangeResult<Vec<Position>> {
        self.check_failing()?;
        let positions = self.positions.read().await;
        Ok(positions
            .iter()
            .filter(|p| symbol.map_or(true, |s| p.symbol == s))
            .cloned()
            .collect())
    }

    async fn get_order_history(
        &self,
        symbol: Option<&str>,
        limit: u32,
        start_time_ms: i64,
    ) -> ExchangeResult<Vec<ExchangeOrder>> {
        self.check_failing()?;
        let history = self.order_history.read().await;
        Ok(history
            .iter()
            .filter(|o| symbol.map_or(true, |s| o.symbol == s))
            .filter(|o| o.created_at_ms >= start_time_ms)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn get_closed_pnl(
        &self,
        symbol: &str,
        limit: u32,
        start_time_ms: Option<i64>,
    ) -> ExchangeResult<Vec<ClosedPnlEvent>> {
        self.check_failing()?;
        let events = self.closed_pnl.read().await;
        Ok(events
            .iter()
            .filter(|e| e.symbol == symbol)
            .filter(|e| {
                start_time_ms.map_or(true, |start| e.closed_at.timestamp_millis() >= start)
            })
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn cancel_order(&self, order_id: &str, _symbol: &str) -> ExchangeResult<()> {
        self.check_failing()?;
        self.canceled.write().await.push(order_id.to_string());
        self.open_orders
            .write()
            .await
            .retain(|o| o.order_id != order_id);
        self.conditional_orders
            .write()
            .await
            .retain(|o| o.order_id != order_id);
        Ok(())
    }

    async fn create_order(&self, params: &OrderParams) -> ExchangeResult<OrderAck> {
        self.check_failing()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let order_id = format!("paper-{}", id);
        self.created.write().await.push(params.clone());

        let order = ExchangeOrder {
            order_id: order_id.clone(),
            symbol: params.symbol.clone(),
            side: params.side,
            qty: params.qty,
            price: params.price.unwrap_or(Decimal::ZERO),
            status: "New".to_string(),
            reduce_only: params.reduce_only,
            close_on_trigger: params.close_on_trigger,
            trigger_price: params.trigger_price,
            stop_order_type: params.trigger_price.map(|_| "StopLoss".to_string()),
            created_at_ms: chrono::Utc::now().timestamp_millis(),
        };

        if params.trigger_price.is_some() {
            self.conditional_orders.write().await.push(order);
        } else {
            self.open_orders.write().await.push(order);
        }

        Ok(OrderAck { order_id })
    }

    async fn close_position(&self, symbol: &str, side: Side, qty: Decimal) -> ExchangeResult<()> {
        self.check_failing()?;
        self.closed
            .write()
            .await
            .push((symbol.to_string(), side, qty));
        self.positions
            .write()
            .await
            .retain(|p| !(p.symbol == symbol && p.side == side));
        Ok(())
    }

    async fn get_conditional_orders(&self, symbol: &str) -> ExchangeResult<Vec<ExchangeOrder>> {
        self.check_failing()?;
        let orders = self.conditional_orders.read().await;
        Ok(orders
            .iter()
            .filter(|o| o.symbol == symbol)
            .cloned()
            .collect())
    }

    async fn get_instrument_precision(&self, _symbol: &str) -> ExchangeResult<InstrumentPrecision> {
        self.check_failing()?;
        Ok(InstrumentPrecision {
            price_scale: 4,
            qty_scale: 6,
        })
    }
}

/// Gateway factory over paper gateways, one per account. Used when no
/// real exchange adapters are wired in (local runs, tests).
#[derive(Default)]
pub struct PaperGatewayFactory {
    gateways: Mutex<HashMap<i64, Arc<PaperGateway>>>,
}

impl PaperGatewayFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or fetch) the gateway for one account id
    pub fn gateway(&self, account_id: i64) -> Arc<PaperGateway> {
        let mut gateways = self.gateways.lock().unwrap_or_else(|e| e.into_inner());
        gateways
            .entry(account_id)
            .or_insert_with(|| Arc::new(PaperGateway::new()))
            .clone()
    }
}

impl GatewayFactory for PaperGatewayFactory {
    fn gateway_for(&self, account: &UserExchange, _demo: bool) -> Option<Arc<dyn ExchangeGateway>> {
        Some(self.gateway(account.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn cancel_removes_and_records() {
        let gateway = PaperGateway::new();
        gateway
            .seed_open_orders(vec![ExchangeOrder {
                order_id: "x-1".to_string(),
                symbol: "BTCUSDT".to_string(),
                side: Side::Buy,
                qty: dec!(1),
                price: dec!(50000),
                status: "New".to_string(),
                reduce_only: false,
                close_on_trigger: false,
                trigger_price: None,
                stop_order_type: None,
                created_at_ms: 0,
            }])
            .await;

        gateway.cancel_order("x-1", "BTCUSDT").await.unwrap();
        assert!(gateway.get_open_orders(None).await.unwrap().is_empty());
        assert_eq!(gateway.canceled_order_ids().await, vec!["x-1".to_string()]);
    }

    #[tokio::test]
    async fn create_routes_trigger_orders_to_conditional() {
        let gateway = PaperGateway::new();
        let params = OrderParams::market_stop("ETHUSDT", Side::Sell, dec!(1), dec!(2900), 0);
        gateway.create_order(&params).await.unwrap();

        assert!(gateway.get_open_orders(None).await.unwrap().is_empty());
        let conditional = gateway.get_conditional_orders("ETHUSDT").await.unwrap();
        assert_eq!(conditional.len(), 1);
        assert_eq!(conditional[0].trigger_price, Some(dec!(2900)));
    }

    #[tokio::test]
    async fn failing_mode_errors() {
        let gateway = PaperGateway::new();
        gateway.set_failing(true);
        assert!(gateway.get_positions(None).await.is_err());
    }
}
