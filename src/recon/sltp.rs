// src/recon/sltp.rs
// SL/TP sync: make sure every open trade with registered stop-loss /
// take-profit levels has the matching protective orders live on the
// exchange, replacing stale ones.

use crate::domain::errors::ReconResult;
use crate::domain::models::{ExchangeOrder, Side};
use crate::exchange::gateway::{position_idx, OrderParams};
use crate::recon::policy;
use crate::recon::snapshot::AccountSnapshot;
use crate::recon::unit::ReconciliationUnit;
use rust_decimal::Decimal;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct SltpReport {
    pub stops_created: usize,
    pub take_profits_created: usize,
    pub stale_canceled: usize,
}

/// Per-symbol conditional-order cache for one run. Invalidated after
/// creating a stop so the next trade on the symbol sees the new order.
struct ConditionalCache {
    entries: HashMap<String, Vec<ExchangeOrder>>,
}

impl ConditionalCache {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    async fn get(
        &mut self,
        unit: &ReconciliationUnit<'_>,
        symbol: &str,
    ) -> Option<Vec<ExchangeOrder>> {
        if let Some(cached) = self.entries.get(symbol) {
            return Some(cached.clone());
        }
        match unit.gateway.get_conditional_orders(symbol).await {
            Ok(orders) => {
                self.entries.insert(symbol.to_string(), orders.clone());
                Some(orders)
            }
            Err(e) => {
                log::warn!("Conditional-order fetch failed for {}: {}", symbol, e);
                None
            }
        }
    }

    fn invalidate(&mut self, symbol: &str) {
        self.entries.remove(symbol);
    }
}

/// Round an order quantity to the instrument's scale. Falls back to the
/// raw quantity when the precision lookup fails.
async fn sized_qty(
    unit: &ReconciliationUnit<'_>,
    precisions: &mut HashMap<String, u32>,
    symbol: &str,
    qty: Decimal,
) -> Decimal {
    if let Some(scale) = precisions.get(symbol) {
        return qty.round_dp(*scale);
    }
    match unit.gateway.get_instrument_precision(symbol).await {
        Ok(precision) => {
            precisions.insert(symbol.to_string(), precision.qty_scale);
            qty.round_dp(precision.qty_scale)
        }
        Err(e) => {
            log::warn!("Precision lookup failed for {}: {}", symbol, e);
            qty
        }
    }
}

pub async fn run(
    unit: &ReconciliationUnit<'_>,
    snapshot: &AccountSnapshot,
) -> ReconResult<SltpReport> {
    let mut report = SltpReport::default();
    let mut cache = ConditionalCache::new();
    let mut precisions = HashMap::new();

    for trade in unit.trades.open_trades(unit.scope).await {
        let position = match snapshot.position(&trade.symbol, trade.side) {
            Some(position) => position,
            None => continue,
        };

        let origin = match &trade.order_id {
            Some(id) => match unit.orders.find_by_exchange_id(unit.scope, id).await {
                Some(origin) => origin,
                None => continue,
            },
            None => continue,
        };

        let close_side = trade.side.opposite();
        let idx = position_idx(position, unit.account.position_mode);
        let qty = sized_qty(unit, &mut precisions, &trade.symbol, position.size).await;

        if let Some(sl) = origin.stop_loss {
            sync_stop_loss(unit, &mut cache, &trade.symbol, close_side, sl, qty, idx, &mut report)
                .await;
        }

        if let Some(tp) = origin.take_profit {
            sync_take_profit(unit, snapshot, &trade.symbol, close_side, tp, qty, idx, &mut report)
                .await;
        }
    }

    Ok(report)
}

#[allow(clippy::too_many_arguments)]
async fn sync_stop_loss(
    unit: &ReconciliationUnit<'_>,
    cache: &mut ConditionalCache,
    symbol: &str,
    close_side: Side,
    sl: Decimal,
    qty: Decimal,
    idx: i32,
    report: &mut SltpReport,
) {
    let conditionals = match cache.get(unit, symbol).await {
        Some(conditionals) => conditionals,
        None => return,
    };

    let exists = conditionals.iter().any(|o| {
        o.reduce_only
            && o.side == close_side
            && o.trigger_price
                .map_or(false, |t| policy::within_abs(t, sl, unit.config.price_tolerance))
    });
    if exists {
        return;
    }

    // Replace stale stops for this side before placing the fresh one
    for stale in conditionals
        .iter()
        .filter(|o| o.side == close_side && o.reduce_only && o.trigger_price.is_some())
    {
        match unit.gateway.cancel_order(&stale.order_id, symbol).await {
            Ok(()) => report.stale_canceled += 1,
            Err(e) => log::warn!("Stale stop cancel failed for {}: {}", stale.order_id, e),
        }
    }

    let params = OrderParams::market_stop(symbol, close_side, qty, sl, idx);
    match unit.gateway.create_order(&params).await {
        Ok(ack) => {
            report.stops_created += 1;
            cache.invalidate(symbol);
            log::info!("Placed stop-loss {} @ {} for {} ({})", close_side, sl, symbol, ack.order_id);
        }
        Err(e) => log::warn!("Stop-loss creation failed for {}: {}", symbol, e),
    }
}

#[allow(clippy::too_many_arguments)]
async fn sync_take_profit(
    unit: &ReconciliationUnit<'_>,
    snapshot: &AccountSnapshot,
    symbol: &str,
    close_side: Side,
    tp: Decimal,
    qty: Decimal,
    idx: i32,
    report: &mut SltpReport,
) {
    let exists = snapshot.open_orders.iter().any(|o| {
        o.symbol == symbol
            && o.side == close_side
            && o.reduce_only
            && o.trigger_price.is_none()
            && policy::within_abs(o.price, tp, unit.config.price_tolerance)
    });
    if exists {
        return;
    }

    for stale in snapshot.open_orders.iter().filter(|o| {
        o.symbol == symbol && o.side == close_side && o.reduce_only && o.trigger_price.is_none()
    }) {
        match unit.gateway.cancel_order(&stale.order_id, symbol).await {
            Ok(()) => report.stale_canceled += 1,
            Err(e) => log::warn!("Stale take-profit cancel failed for {}: {}", stale.order_id, e),
        }
    }

    let params = OrderParams::limit_reduce_only(symbol, close_side, qty, tp, idx);
    match unit.gateway.create_order(&params).await {
        Ok(ack) => {
            report.take_profits_created += 1;
            log::info!(
                "Placed take-profit {} @ {} for {} ({})",
                close_side,
                tp,
                symbol,
                ack.order_id
            );
        }
        Err(e) => log::warn!("Take-profit creation failed for {}: {}", symbol, e),
    }
}
