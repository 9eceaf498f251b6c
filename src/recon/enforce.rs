// src/recon/enforce.rs
// Strict-mode enforcement: five ordered sub-passes over one snapshot.
// Every close issues the exchange call first and only then writes the
// local closed state, so a crash leaves at most one in-flight action
// inconsistent and the next run repairs it.

use crate::domain::models::{Order, OrderStatus, Position, SyncState, Trade};
use crate::domain::errors::ReconResult;
use crate::recon::policy;
use crate::recon::snapshot::AccountSnapshot;
use crate::recon::unit::ReconciliationUnit;
use chrono::Utc;
use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct EnforceReport {
    pub positions_closed: usize,
    pub orders_canceled: usize,
    pub orders_deleted: usize,
    pub trades_healed: usize,
}

pub async fn run(
    unit: &ReconciliationUnit<'_>,
    snapshot: &AccountSnapshot,
) -> ReconResult<EnforceReport> {
    let mut report = EnforceReport::default();

    pnl_stop(unit, snapshot, &mut report).await;
    pending_drift(unit, snapshot, &mut report).await;
    filled_drift(unit, snapshot, &mut report).await;
    foreign_order_purge(unit, snapshot, &mut report).await;
    other_symbol_purge(unit, snapshot, &mut report).await;

    Ok(report)
}

/// Close the live position and mark the trade closed. Exchange first.
async fn force_close(
    unit: &ReconciliationUnit<'_>,
    trade: &Trade,
    position: &Position,
    reason: &str,
    report: &mut EnforceReport,
) {
    if let Err(e) = unit
        .gateway
        .close_position(&position.symbol, position.side, position.size)
        .await
    {
        log::warn!(
            "Force-close failed for trade {} ({}): {}",
            trade.id,
            position.symbol,
            e
        );
        return;
    }

    let exit = position.mark_price.unwrap_or(position.entry_price);
    let result = unit
        .trades
        .close(
            trade.id,
            Some(exit),
            Some(position.unrealized_pnl),
            Utc::now(),
            SyncState::Unverified,
        )
        .await;
    match result {
        Ok(_) => {
            report.positions_closed += 1;
            log::info!(
                "Closed {} {} position ({}): {}",
                position.symbol,
                position.side,
                position.size,
                reason
            );
        }
        Err(e) => log::warn!("Trade {}: local close rejected: {}", trade.id, e),
    }
}

/// Sub-pass 1: independent PnL stop. Loss at or past the cut ratio is
/// closed unconditionally; profit at or past the guard ratio is closed
/// unless a reduce-only take-profit beyond break-even already protects it.
async fn pnl_stop(
    unit: &ReconciliationUnit<'_>,
    snapshot: &AccountSnapshot,
    report: &mut EnforceReport,
) {
    for trade in unit.trades.open_trades(unit.scope).await {
        let position = match snapshot.position(&trade.symbol, trade.side) {
            Some(position) => position,
            None => continue,
        };
        let ratio = match policy::pnl_ratio(position) {
            Some(ratio) => ratio,
            None => continue,
        };

        if ratio <= unit.config.loss_cut_ratio {
            force_close(unit, &trade, position, "loss cut", report).await;
        } else if ratio >= unit.config.profit_guard_ratio {
            let symbol_orders: Vec<_> = snapshot
                .open_orders
                .iter()
                .filter(|o| o.symbol == trade.symbol)
                .cloned()
                .collect();
            if !policy::has_profit_guard(&symbol_orders, &trade) {
                force_close(unit, &trade, position, "unprotected profit", report).await;
            }
        }
    }
}

/// Sub-pass 2: a pending order whose live counterpart was modified beyond
/// tolerance is no longer trustworthy; cancel on exchange and delete
/// locally. An order absent from the snapshot is left alone — only
/// lifecycle may reclassify it.
async fn pending_drift(
    unit: &ReconciliationUnit<'_>,
    snapshot: &AccountSnapshot,
    report: &mut EnforceReport,
) {
    for order in unit.orders.pending_orders(unit.scope).await {
        let exchange_id = match &order.order_id {
            Some(id) => id.clone(),
            None => continue,
        };
        let remote = match snapshot.order(&exchange_id) {
            Some(remote) => remote,
            None => continue,
        };

        if !policy::pending_order_drifted(&order, remote, unit.config) {
            continue;
        }

        if let Err(e) = unit.gateway.cancel_order(&exchange_id, &order.symbol).await {
            log::warn!("Drift cancel failed for order {}: {}", order.id, e);
            continue;
        }
        match unit.orders.update_status(order.id, OrderStatus::Deleted).await {
            Ok(_) => {
                report.orders_deleted += 1;
                log::info!(
                    "Order {} deleted: externally modified (price {} qty {} vs {} {})",
                    order.id,
                    remote.price,
                    remote.qty,
                    order.entry_price,
                    order.amount
                );
            }
            Err(e) => log::warn!("Order {}: delete rejected: {}", order.id, e),
        }
    }
}

/// Sub-pass 3: filled orders vs live positions. Loss stop applies again;
/// otherwise the position is compared to the originating order's baseline
/// with a relative tolerance — beyond it the position is closed, within
/// it minor drift is healed into the trade.
async fn filled_drift(
    unit: &ReconciliationUnit<'_>,
    snapshot: &AccountSnapshot,
    report: &mut EnforceReport,
) {
    for trade in unit.trades.open_trades(unit.scope).await {
        let position = match snapshot.position(&trade.symbol, trade.side) {
            Some(position) => position,
            None => continue,
        };

        if let Some(ratio) = policy::pnl_ratio(position) {
            if ratio <= unit.config.loss_cut_ratio {
                force_close(unit, &trade, position, "loss cut", report).await;
                continue;
            }
        }

        let origin = match origin_order(unit, &trade).await {
            Some(origin) => origin,
            None => continue,
        };

        let size_ok =
            policy::within_rel(position.size, origin.amount, unit.config.drift_tolerance);
        let price_ok = policy::within_rel(
            position.entry_price,
            origin.entry_price,
            unit.config.drift_tolerance,
        );

        if !size_ok || !price_ok {
            force_close(unit, &trade, position, "position drifted beyond tolerance", report)
                .await;
            continue;
        }

        if position.size != trade.qty || position.entry_price != trade.avg_entry_price {
            let mut healed = trade.clone();
            healed.qty = position.size;
            healed.avg_entry_price = position.entry_price;
            match unit.trades.update(healed).await {
                Ok(_) => {
                    report.trades_healed += 1;
                    log::debug!(
                        "Trade {} healed to exchange values ({} @ {})",
                        trade.id,
                        position.size,
                        position.entry_price
                    );
                }
                Err(e) => log::warn!("Trade {}: heal rejected: {}", trade.id, e),
            }
        }
    }
}

async fn origin_order(unit: &ReconciliationUnit<'_>, trade: &Trade) -> Option<Order> {
    let exchange_id = trade.order_id.as_ref()?;
    unit.orders.find_by_exchange_id(unit.scope, exchange_id).await
}

/// Sub-pass 4: cancel exchange orders we do not track, sparing legitimate
/// protective orders. Non-selected symbols are only touched when the
/// purge toggle is on.
async fn foreign_order_purge(
    unit: &ReconciliationUnit<'_>,
    snapshot: &AccountSnapshot,
    report: &mut EnforceReport,
) {
    let tracked: HashSet<String> = unit
        .orders
        .unresolved_orders(unit.scope)
        .await
        .into_iter()
        .filter_map(|o| o.order_id)
        .collect();

    let open_trades = unit.trades.open_trades(unit.scope).await;
    let selected = &unit.account.selected_market;

    for exchange_order in &snapshot.open_orders {
        if tracked.contains(&exchange_order.order_id) {
            continue;
        }
        // The snapshot predates the earlier sub-passes; an order we
        // resolved this run (or any other locally known order) is not
        // foreign.
        if unit
            .orders
            .find_by_exchange_id(unit.scope, &exchange_order.order_id)
            .await
            .is_some()
        {
            continue;
        }

        if exchange_order.symbol != *selected {
            if !unit.config.purge_other_symbols {
                continue;
            }
        } else {
            // Protective order for one of our open trades?
            let mut legitimate = false;
            for trade in &open_trades {
                if trade.symbol != exchange_order.symbol {
                    continue;
                }
                if let Some(origin) = origin_order(unit, trade).await {
                    if policy::is_valid_tp_sl(exchange_order, trade, &origin, unit.config) {
                        legitimate = true;
                        break;
                    }
                }
            }
            if legitimate {
                continue;
            }
        }

        match unit
            .gateway
            .cancel_order(&exchange_order.order_id, &exchange_order.symbol)
            .await
        {
            Ok(()) => {
                report.orders_canceled += 1;
                log::info!(
                    "Canceled foreign order {} on {}",
                    exchange_order.order_id,
                    exchange_order.symbol
                );
            }
            Err(e) => log::warn!(
                "Foreign-order cancel failed for {}: {}",
                exchange_order.order_id,
                e
            ),
        }
    }
}

/// Sub-pass 5: toggle-gated purge of positions outside the account's
/// selected market, with the locally tracked trades closed alongside.
async fn other_symbol_purge(
    unit: &ReconciliationUnit<'_>,
    snapshot: &AccountSnapshot,
    report: &mut EnforceReport,
) {
    if !unit.config.purge_other_symbols {
        return;
    }
    let selected = &unit.account.selected_market;

    for position in &snapshot.positions {
        if position.symbol == *selected {
            continue;
        }

        if let Err(e) = unit
            .gateway
            .close_position(&position.symbol, position.side, position.size)
            .await
        {
            log::warn!("Other-symbol close failed for {}: {}", position.symbol, e);
            continue;
        }
        report.positions_closed += 1;
        log::info!(
            "Closed off-market {} {} position ({})",
            position.symbol,
            position.side,
            position.size
        );

        if let Some(trade) = unit
            .trades
            .find_open(unit.scope, &position.symbol, position.side)
            .await
        {
            let exit = position.mark_price.unwrap_or(position.entry_price);
            if let Err(e) = unit
                .trades
                .close(
                    trade.id,
                    Some(exit),
                    Some(position.unrealized_pnl),
                    Utc::now(),
                    SyncState::Unverified,
                )
                .await
            {
                log::warn!("Trade {}: local close rejected: {}", trade.id, e);
            }
        }
    }
}
