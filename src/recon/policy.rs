// src/recon/policy.rs
// Stateless decision functions used by the reconciliation passes. All
// tolerances come from the caller's ReconConfig; nothing here touches the
// environment or the ledger.

use crate::config::ReconConfig;
use crate::domain::models::{ClosedPnlEvent, ExchangeOrder, Order, Position, Side, Trade};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Unrealized PnL ratio of a live position as a signed fraction.
///
/// Prefers the exchange-reported ratio; values whose magnitude suggests
/// percentage units (> 2) are scaled down. Falls back to deriving from
/// mark vs entry price, signed by side. Returns `None` when neither is
/// available, never a guess.
pub fn pnl_ratio(position: &Position) -> Option<Decimal> {
    let two = Decimal::from(2);
    let hundred = Decimal::from(100);

    if let Some(ratio) = position.upl_ratio {
        if ratio.abs() > two {
            return Some(ratio / hundred);
        }
        return Some(ratio);
    }

    let mark = position.mark_price?;
    if position.entry_price.is_zero() {
        return None;
    }
    let raw = (mark - position.entry_price) / position.entry_price;
    Some(match position.side {
        Side::Buy => raw,
        Side::Sell => -raw,
    })
}

/// Absolute-difference tolerance check
pub fn within_abs(a: Decimal, b: Decimal, tolerance: Decimal) -> bool {
    (a - b).abs() <= tolerance
}

/// Relative tolerance check against a baseline
pub fn within_rel(actual: Decimal, baseline: Decimal, tolerance: Decimal) -> bool {
    if baseline.is_zero() {
        return actual.is_zero();
    }
    (actual - baseline).abs() <= baseline.abs() * tolerance
}

/// Whether a live counterpart of a pending order has been modified beyond
/// tolerance. Within both tolerances the order must not be touched.
pub fn pending_order_drifted(local: &Order, remote: &ExchangeOrder, config: &ReconConfig) -> bool {
    !within_abs(remote.price, local.entry_price, config.price_tolerance)
        || !within_abs(remote.qty, local.amount, config.qty_tolerance)
}

/// Whether an untracked exchange order is a legitimate protective order
/// for one of our open trades: reduce-only, sized to the trade, priced at
/// the trade's registered SL or TP, on the closing side.
pub fn is_valid_tp_sl(
    exchange_order: &ExchangeOrder,
    trade: &Trade,
    origin: &Order,
    config: &ReconConfig,
) -> bool {
    if !exchange_order.reduce_only {
        return false;
    }
    if exchange_order.side != trade.side.opposite() {
        return false;
    }
    if !within_abs(exchange_order.qty, trade.qty, config.qty_tolerance) {
        return false;
    }

    let effective_price = exchange_order
        .trigger_price
        .unwrap_or(exchange_order.price);

    let matches_sl = origin
        .stop_loss
        .map_or(false, |sl| within_abs(effective_price, sl, config.tp_sl_price_tolerance));
    let matches_tp = origin
        .take_profit
        .map_or(false, |tp| within_abs(effective_price, tp, config.tp_sl_price_tolerance));

    matches_sl || matches_tp
}

/// Whether any order in the list is a reduce-only take-profit beyond the
/// trade's break-even, i.e. realizing it would lock in profit.
pub fn has_profit_guard(orders: &[ExchangeOrder], trade: &Trade) -> bool {
    orders.iter().any(|o| {
        if !o.reduce_only || o.side != trade.side.opposite() {
            return false;
        }
        let price = o.trigger_price.unwrap_or(o.price);
        match trade.side {
            Side::Buy => price > trade.avg_entry_price,
            Side::Sell => price < trade.avg_entry_price && !price.is_zero(),
        }
    })
}

/// Outcome of matching a trade against closed-PnL history
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedMatch {
    pub avg_exit_price: Decimal,
    pub realized_pnl: Decimal,
    pub closed_at: DateTime<Utc>,
}

fn combine(events: &[&ClosedPnlEvent]) -> Option<ClosedMatch> {
    let total_qty: Decimal = events.iter().map(|e| e.qty).sum();
    if total_qty.is_zero() {
        return None;
    }
    let weighted: Decimal = events.iter().map(|e| e.qty * e.avg_exit_price).sum();
    let pnl: Decimal = events.iter().map(|e| e.realized_pnl).sum();
    let closed_at = events.iter().map(|e| e.closed_at).max()?;
    Some(ClosedMatch {
        avg_exit_price: weighted / total_qty,
        realized_pnl: pnl,
        closed_at,
    })
}

/// Match a trade with no live position against closed-PnL history.
///
/// Tries, in order: exact match by originating order id; field equality on
/// (symbol, qty, avg entry price); split-closure reconstruction summing
/// candidates that share the entry price; and finally a pairwise-sum
/// search for exchanges that report a close as two partial events.
pub fn match_closed_pnl(
    trade: &Trade,
    events: &[ClosedPnlEvent],
    config: &ReconConfig,
) -> Option<ClosedMatch> {
    // Matching is by symbol and quantities only: some exchanges report a
    // close event under the closing order's side, not the position's.
    let candidates: Vec<&ClosedPnlEvent> = events
        .iter()
        .filter(|e| e.symbol == trade.symbol)
        .collect();

    // 1. Order id
    if let Some(order_id) = &trade.order_id {
        if let Some(event) = candidates
            .iter()
            .find(|e| e.order_id.as_ref() == Some(order_id))
        {
            return combine(&[event]);
        }
    }

    // 2. Field equality
    if let Some(event) = candidates.iter().find(|e| {
        e.qty == trade.qty && e.avg_entry_price == trade.avg_entry_price
    }) {
        return combine(&[event]);
    }

    // 3. Sum of events sharing the trade's entry price
    let same_entry: Vec<&ClosedPnlEvent> = candidates
        .iter()
        .filter(|e| e.avg_entry_price == trade.avg_entry_price)
        .copied()
        .collect();
    if same_entry.len() > 1 {
        let total: Decimal = same_entry.iter().map(|e| e.qty).sum();
        if within_abs(total, trade.qty, config.split_sum_tolerance) {
            return combine(&same_entry);
        }
    }

    // 4. Pairwise-sum search over all candidates
    for (i, a) in candidates.iter().enumerate() {
        for b in candidates.iter().skip(i + 1) {
            if within_abs(a.qty + b.qty, trade.qty, config.split_sum_tolerance) {
                return combine(&[a, b]);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::SyncState;
    use rust_decimal_macros::dec;

    fn position(side: Side, entry: Decimal, mark: Decimal) -> Position {
        Position {
            symbol: "ETHUSDT".to_string(),
            side,
            size: dec!(1),
            entry_price: entry,
            unrealized_pnl: dec!(0),
            leverage: dec!(10),
            mark_price: Some(mark),
            upl_ratio: None,
        }
    }

    fn trade(side: Side, qty: Decimal, entry: Decimal) -> Trade {
        Trade {
            id: 1,
            user_id: 1,
            exchange_id: 1,
            is_demo: false,
            symbol: "ETHUSDT".to_string(),
            side,
            order_type: "Limit".to_string(),
            leverage: dec!(1),
            qty,
            avg_entry_price: entry,
            avg_exit_price: None,
            pnl: None,
            order_id: Some("origin-1".to_string()),
            closed_at: None,
            synchronized: SyncState::Unverified,
            created_at: Utc::now(),
        }
    }

    fn event(qty: Decimal, entry: Decimal, exit: Decimal, pnl: Decimal) -> ClosedPnlEvent {
        ClosedPnlEvent {
            order_id: None,
            symbol: "ETHUSDT".to_string(),
            side: Side::Buy,
            qty,
            avg_entry_price: entry,
            avg_exit_price: exit,
            realized_pnl: pnl,
            closed_at: Utc::now(),
        }
    }

    #[test]
    fn derived_ratio_is_signed_by_side() {
        let long = position(Side::Buy, dec!(100), dec!(90));
        assert_eq!(pnl_ratio(&long), Some(dec!(-0.10)));

        let short = position(Side::Sell, dec!(100), dec!(90));
        assert_eq!(pnl_ratio(&short), Some(dec!(0.10)));
    }

    #[test]
    fn exchange_ratio_is_preferred_and_percentage_normalized() {
        let mut p = position(Side::Buy, dec!(100), dec!(90));
        p.upl_ratio = Some(dec!(0.05));
        assert_eq!(pnl_ratio(&p), Some(dec!(0.05)));

        // Magnitude > 2 means the exchange reported percentage units
        p.upl_ratio = Some(dec!(-15));
        assert_eq!(pnl_ratio(&p), Some(dec!(-0.15)));
    }

    #[test]
    fn ratio_requires_mark_or_reported_value() {
        let mut p = position(Side::Buy, dec!(100), dec!(90));
        p.mark_price = None;
        assert_eq!(pnl_ratio(&p), None);
    }

    #[test]
    fn pending_drift_noop_boundary() {
        let config = ReconConfig::default();
        let local = crate::ledger::testutil::order(1, "BTCUSDT", Side::Buy, dec!(100), dec!(1));
        let mut remote = ExchangeOrder {
            order_id: "X".to_string(),
            symbol: "BTCUSDT".to_string(),
            side: Side::Buy,
            qty: dec!(1.0000005),
            price: dec!(100.00005),
            status: "New".to_string(),
            reduce_only: false,
            close_on_trigger: false,
            trigger_price: None,
            stop_order_type: None,
            created_at_ms: 0,
        };
        // Within both tolerances: must not be flagged
        assert!(!pending_order_drifted(&local, &remote, &config));

        remote.price = dec!(100.001);
        assert!(pending_order_drifted(&local, &remote, &config));

        remote.price = dec!(100);
        remote.qty = dec!(1.00001);
        assert!(pending_order_drifted(&local, &remote, &config));
    }

    #[test]
    fn valid_tp_sl_predicate() {
        let config = ReconConfig::default();
        let t = trade(Side::Buy, dec!(1), dec!(3000));
        let mut origin = crate::ledger::testutil::order(1, "ETHUSDT", Side::Buy, dec!(3000), dec!(1));
        origin.stop_loss = Some(dec!(2900));
        origin.take_profit = Some(dec!(3200));

        let sl = ExchangeOrder {
            order_id: "sl-1".to_string(),
            symbol: "ETHUSDT".to_string(),
            side: Side::Sell,
            qty: dec!(1),
            price: dec!(0),
            status: "Untriggered".to_string(),
            reduce_only: true,
            close_on_trigger: true,
            trigger_price: Some(dec!(2900.005)),
            stop_order_type: Some("StopLoss".to_string()),
            created_at_ms: 0,
        };
        assert!(is_valid_tp_sl(&sl, &t, &origin, &config));

        // Wrong side
        let wrong_side = ExchangeOrder {
            side: Side::Buy,
            ..sl.clone()
        };
        assert!(!is_valid_tp_sl(&wrong_side, &t, &origin, &config));

        // Not reduce-only
        let not_reduce = ExchangeOrder {
            reduce_only: false,
            ..sl.clone()
        };
        assert!(!is_valid_tp_sl(&not_reduce, &t, &origin, &config));

        // Price matches neither SL nor TP
        let off_price = ExchangeOrder {
            trigger_price: Some(dec!(2800)),
            ..sl
        };
        assert!(!is_valid_tp_sl(&off_price, &t, &origin, &config));
    }

    #[test]
    fn profit_guard_requires_beyond_break_even() {
        let t = trade(Side::Buy, dec!(1), dec!(3000));
        let tp = ExchangeOrder {
            order_id: "tp-1".to_string(),
            symbol: "ETHUSDT".to_string(),
            side: Side::Sell,
            qty: dec!(1),
            price: dec!(3100),
            status: "New".to_string(),
            reduce_only: true,
            close_on_trigger: false,
            trigger_price: None,
            stop_order_type: None,
            created_at_ms: 0,
        };
        assert!(has_profit_guard(&[tp.clone()], &t));

        let below_entry = ExchangeOrder {
            price: dec!(2950),
            ..tp
        };
        assert!(!has_profit_guard(&[below_entry], &t));
    }

    #[test]
    fn closed_pnl_match_by_order_id() {
        let config = ReconConfig::default();
        let t = trade(Side::Buy, dec!(1), dec!(3000));
        let mut e = event(dec!(1), dec!(3000), dec!(3100), dec!(100));
        e.order_id = Some("origin-1".to_string());

        let matched = match_closed_pnl(&t, &[e], &config).unwrap();
        assert_eq!(matched.avg_exit_price, dec!(3100));
        assert_eq!(matched.realized_pnl, dec!(100));
    }

    #[test]
    fn split_closure_weighted_average() {
        let config = ReconConfig::default();
        let t = trade(Side::Buy, dec!(1.0), dec!(3000));
        let events = vec![
            event(dec!(0.5), dec!(3000), dec!(3100), dec!(50)),
            event(dec!(0.5), dec!(3000), dec!(3300), dec!(150)),
        ];

        let matched = match_closed_pnl(&t, &events, &config).unwrap();
        assert_eq!(matched.avg_exit_price, dec!(3200));
        assert_eq!(matched.realized_pnl, dec!(200));
    }

    #[test]
    fn pairwise_sum_search_handles_mixed_entries() {
        let config = ReconConfig::default();
        let t = trade(Side::Buy, dec!(1.0), dec!(3000));
        // Entry prices differ from the trade's, so only the pairwise
        // search can reconstruct the closure
        let events = vec![
            event(dec!(0.3), dec!(2990), dec!(3100), dec!(33)),
            event(dec!(0.2), dec!(2995), dec!(3050), dec!(11)),
            event(dec!(0.7), dec!(3010), dec!(3200), dec!(133)),
        ];

        let matched = match_closed_pnl(&t, &events, &config).unwrap();
        // 0.3 @ 3100 + 0.7 @ 3200
        assert_eq!(matched.avg_exit_price, dec!(3170));
        assert_eq!(matched.realized_pnl, dec!(166));
    }

    #[test]
    fn no_match_returns_none() {
        let config = ReconConfig::default();
        let t = trade(Side::Buy, dec!(1.0), dec!(3000));
        let events = vec![event(dec!(0.4), dec!(2990), dec!(3100), dec!(44))];
        assert!(match_closed_pnl(&t, &events, &config).is_none());
    }
}
