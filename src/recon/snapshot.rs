// src/recon/snapshot.rs
use crate::domain::errors::ExchangeResult;
use crate::domain::models::{ExchangeOrder, Position, Side};
use crate::exchange::gateway::ExchangeGateway;

/// One consistent view of an account's live exchange state, fetched once
/// per run so the passes never act on diverging snapshots.
#[derive(Debug, Clone, Default)]
pub struct AccountSnapshot {
    pub open_orders: Vec<ExchangeOrder>,
    pub positions: Vec<Position>,
}

impl AccountSnapshot {
    pub async fn fetch(gateway: &dyn ExchangeGateway) -> ExchangeResult<Self> {
        let open_orders = gateway.get_open_orders(None).await?;
        let positions = gateway.get_positions(None).await?;
        Ok(Self {
            open_orders,
            positions,
        })
    }

    pub fn position(&self, symbol: &str, side: Side) -> Option<&Position> {
        self.positions
            .iter()
            .find(|p| p.symbol == symbol && p.side == side)
    }

    pub fn order(&self, order_id: &str) -> Option<&ExchangeOrder> {
        self.open_orders.iter().find(|o| o.order_id == order_id)
    }
}
