// src/recon/lifecycle.rs
// Lifecycle sync: pull order history, reclassify local orders through the
// status table, create trades for fills, and verify trades against live
// positions and closed-PnL history.

use crate::domain::errors::ReconResult;
use crate::domain::models::{Order, OrderStatus, Side, SyncState, Trade};
use crate::recon::policy;
use crate::recon::snapshot::AccountSnapshot;
use crate::recon::unit::ReconciliationUnit;
use chrono::{Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use std::collections::HashSet;

const HISTORY_LIMIT: u32 = 200;
const CLOSED_PNL_LIMIT: u32 = 100;

#[derive(Debug, Default)]
pub struct LifecycleReport {
    pub orders_updated: usize,
    pub trades_created: usize,
    pub orders_expired: usize,
    pub orders_cancel_triggered: usize,
    pub trades_refreshed: usize,
    pub trades_verified: usize,
    pub trades_unmatched: usize,
    pub trades_deduped: usize,
}

pub async fn run(
    unit: &ReconciliationUnit<'_>,
    snapshot: &AccountSnapshot,
) -> ReconResult<LifecycleReport> {
    let mut report = LifecycleReport::default();

    sync_order_statuses(unit, &mut report).await;
    expire_stale_orders(unit, &mut report).await;
    apply_cancel_triggers(unit, snapshot, &mut report).await;
    dedupe_open_trades(unit, &mut report).await;
    reconcile_trades(unit, snapshot, &mut report).await;

    Ok(report)
}

/// Start of the history window: oldest unresolved local order minus a
/// safety margin against clock skew and late status propagation.
async fn history_start_ms(unit: &ReconciliationUnit<'_>) -> i64 {
    let margin = Duration::minutes(unit.config.history_margin_minutes);
    let oldest = unit
        .orders
        .oldest_unresolved_created_at(unit.scope)
        .await
        .unwrap_or_else(Utc::now);
    (oldest - margin).timestamp_millis()
}

async fn sync_order_statuses(unit: &ReconciliationUnit<'_>, report: &mut LifecycleReport) {
    let start_ms = history_start_ms(unit).await;

    let history = match unit
        .gateway
        .get_order_history(None, HISTORY_LIMIT, start_ms)
        .await
    {
        Ok(history) => history,
        Err(e) => {
            log::warn!(
                "Order history fetch failed for user {}: {}; skipping status sync",
                unit.scope.user_id,
                e
            );
            return;
        }
    };

    for exchange_order in history {
        // Protective close legs are never adopted as primary orders
        if exchange_order.is_system_generated() {
            continue;
        }

        let local = match unit
            .orders
            .find_by_exchange_id(unit.scope, &exchange_order.order_id)
            .await
        {
            Some(local) => local,
            None => continue,
        };

        let target = OrderStatus::from_exchange(&exchange_order.status);
        if target == local.status {
            continue;
        }
        if local.is_locked && !target.is_terminal() {
            log::debug!("Order {} is locked; skipping non-terminal update", local.id);
            continue;
        }
        if !local.status.can_transition(target) {
            log::debug!(
                "Order {}: ignoring {} -> {} from exchange history",
                local.id,
                local.status,
                target
            );
            continue;
        }

        match target {
            OrderStatus::Filled => {
                let filled_at = Utc
                    .timestamp_millis_opt(exchange_order.created_at_ms)
                    .single()
                    .unwrap_or_else(Utc::now);
                match unit.orders.set_filled(local.id, filled_at).await {
                    Ok(updated) => {
                        report.orders_updated += 1;
                        ensure_trade(unit, &updated, exchange_order.qty, exchange_order.price, report)
                            .await;
                    }
                    Err(e) => log::warn!("Order {}: fill update rejected: {}", local.id, e),
                }
            }
            _ => match unit.orders.update_status(local.id, target).await {
                Ok(_) => {
                    report.orders_updated += 1;
                    log::info!("Order {} reclassified {} -> {}", local.id, local.status, target);
                }
                Err(e) => log::warn!("Order {}: status update rejected: {}", local.id, e),
            },
        }
    }
}

/// Create the open trade for a newly filled order, or refresh the one
/// already recorded for that exchange order id.
async fn ensure_trade(
    unit: &ReconciliationUnit<'_>,
    order: &Order,
    fill_qty: Decimal,
    fill_price: Decimal,
    report: &mut LifecycleReport,
) {
    let exchange_id = match &order.order_id {
        Some(id) => id.clone(),
        None => return,
    };

    let entry_price = if fill_price.is_zero() {
        order.entry_price
    } else {
        fill_price
    };
    let qty = if fill_qty.is_zero() { order.amount } else { fill_qty };

    if let Some(mut existing) = unit.trades.find_by_order_id(unit.scope, &exchange_id).await {
        existing.qty = qty;
        existing.avg_entry_price = entry_price;
        if let Err(e) = unit.trades.update(existing).await {
            log::warn!("Trade refresh for order {} rejected: {}", exchange_id, e);
        }
        return;
    }

    let trade = Trade {
        id: 0,
        user_id: unit.scope.user_id,
        exchange_id: unit.scope.exchange_id,
        is_demo: unit.scope.is_demo,
        symbol: order.symbol.clone(),
        side: order.side,
        order_type: "Limit".to_string(),
        leverage: Decimal::ONE,
        qty,
        avg_entry_price: entry_price,
        avg_exit_price: None,
        pnl: None,
        order_id: Some(exchange_id),
        closed_at: None,
        synchronized: SyncState::Unverified,
        created_at: Utc::now(),
    };
    unit.trades.insert(trade).await;
    report.trades_created += 1;
}

/// Cancel and expire pending orders past their expiry window. The
/// exchange cancel is issued first; a failed cancel leaves the local row
/// untouched for the next run.
async fn expire_stale_orders(unit: &ReconciliationUnit<'_>, report: &mut LifecycleReport) {
    let now = Utc::now();
    for order in unit.orders.pending_orders(unit.scope).await {
        if !order.is_expired(now) {
            continue;
        }

        if let Some(exchange_id) = &order.order_id {
            if let Err(e) = unit.gateway.cancel_order(exchange_id, &order.symbol).await {
                log::warn!("Expiry cancel failed for order {}: {}", order.id, e);
                continue;
            }
        }

        match unit.orders.update_status(order.id, OrderStatus::Expired).await {
            Ok(_) => {
                report.orders_expired += 1;
                log::info!("Order {} expired after {:?} minutes", order.id, order.expire_minutes);
            }
            Err(e) => log::warn!("Order {}: expiry update rejected: {}", order.id, e),
        }
    }
}

/// Cancel pending orders whose cancel-price trigger has been crossed by
/// the snapshot's mark price.
async fn apply_cancel_triggers(
    unit: &ReconciliationUnit<'_>,
    snapshot: &AccountSnapshot,
    report: &mut LifecycleReport,
) {
    for order in unit.orders.pending_orders(unit.scope).await {
        if order.cancel_price.is_none() {
            continue;
        }

        let mark = snapshot
            .positions
            .iter()
            .find(|p| p.symbol == order.symbol)
            .and_then(|p| p.mark_price);
        let mark = match mark {
            Some(mark) => mark,
            None => continue,
        };

        if !order.cancel_triggered(mark) {
            continue;
        }

        if let Some(exchange_id) = &order.order_id {
            if let Err(e) = unit.gateway.cancel_order(exchange_id, &order.symbol).await {
                log::warn!("Cancel-price cancel failed for order {}: {}", order.id, e);
                continue;
            }
        }

        match unit.orders.update_status(order.id, OrderStatus::Canceled).await {
            Ok(_) => {
                report.orders_cancel_triggered += 1;
                log::info!("Order {} canceled at trigger price (mark {})", order.id, mark);
            }
            Err(e) => log::warn!("Order {}: cancel update rejected: {}", order.id, e),
        }
    }
}

/// Collapse duplicate open trades: at most one open cycle may exist per
/// (symbol, side) within a scope. The oldest trade survives; younger
/// duplicates are closed at entry with no realized PnL.
async fn dedupe_open_trades(unit: &ReconciliationUnit<'_>, report: &mut LifecycleReport) {
    let mut trades = unit.trades.open_trades(unit.scope).await;
    trades.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

    let mut seen: HashSet<(String, Side)> = HashSet::new();
    for trade in trades {
        if seen.insert((trade.symbol.clone(), trade.side)) {
            continue;
        }
        let result = unit
            .trades
            .close(
                trade.id,
                Some(trade.avg_entry_price),
                Some(Decimal::ZERO),
                Utc::now(),
                SyncState::Unverified,
            )
            .await;
        match result {
            Ok(_) => {
                report.trades_deduped += 1;
                log::warn!(
                    "Trade {} ({} {}): duplicate open cycle closed",
                    trade.id,
                    trade.symbol,
                    trade.side
                );
            }
            Err(e) => log::warn!("Trade {}: dedupe close rejected: {}", trade.id, e),
        }
    }
}

/// Refresh open trades against live positions, and resolve trades whose
/// position has disappeared by matching exchange closed-PnL history.
async fn reconcile_trades(
    unit: &ReconciliationUnit<'_>,
    snapshot: &AccountSnapshot,
    report: &mut LifecycleReport,
) {
    let margin = Duration::minutes(unit.config.history_margin_minutes);

    for trade in unit.trades.open_trades(unit.scope).await {
        // Any live position on the trade's leg keeps the trade open.
        // An exact (entry, qty) match refreshes bookkeeping; a drifted
        // position is left untouched for enforcement to heal.
        if let Some(position) = snapshot.position(&trade.symbol, trade.side) {
            if position.entry_price == trade.avg_entry_price && position.size == trade.qty {
                let mut updated = trade.clone();
                updated.pnl = Some(position.unrealized_pnl);
                updated.leverage = position.leverage;
                match unit.trades.update(updated).await {
                    Ok(_) => report.trades_refreshed += 1,
                    Err(e) => log::warn!("Trade {}: refresh rejected: {}", trade.id, e),
                }
            }
            continue;
        }

        // No live position: the cycle has ended somewhere. Verify against
        // closed-PnL history.
        let start_ms = (trade.created_at - margin).timestamp_millis();
        let events = match unit
            .gateway
            .get_closed_pnl(&trade.symbol, CLOSED_PNL_LIMIT, Some(start_ms))
            .await
        {
            Ok(events) => events,
            Err(e) => {
                log::warn!(
                    "Closed-PnL fetch failed for trade {} ({}): {}; retrying next run",
                    trade.id,
                    trade.symbol,
                    e
                );
                continue;
            }
        };

        match policy::match_closed_pnl(&trade, &events, unit.config) {
            Some(matched) => {
                let result = unit
                    .trades
                    .close(
                        trade.id,
                        Some(matched.avg_exit_price),
                        Some(matched.realized_pnl),
                        matched.closed_at,
                        SyncState::Verified,
                    )
                    .await;
                match result {
                    Ok(_) => {
                        report.trades_verified += 1;
                        log::info!(
                            "Trade {} verified closed: exit {} pnl {}",
                            trade.id,
                            matched.avg_exit_price,
                            matched.realized_pnl
                        );
                    }
                    Err(e) => log::warn!("Trade {}: close rejected: {}", trade.id, e),
                }
            }
            None => {
                // Full window searched, nothing matched. Close for
                // bookkeeping and surface the degraded state.
                let result = unit
                    .trades
                    .close(
                        trade.id,
                        Some(trade.avg_entry_price),
                        Some(Decimal::ZERO),
                        Utc::now(),
                        SyncState::VerifiedAbsent,
                    )
                    .await;
                match result {
                    Ok(_) => {
                        report.trades_unmatched += 1;
                        log::warn!(
                            "Trade {} ({}): no closed-PnL match in window; marked verified-absent",
                            trade.id,
                            trade.symbol
                        );
                    }
                    Err(e) => log::warn!("Trade {}: close rejected: {}", trade.id, e),
                }
            }
        }
    }
}
