// src/exchange/normalize.rs
// Per-exchange field mapping from raw API payloads into the common shapes
// consumed by the reconciliation passes. Records with unknown sides or
// unparseable numeric fields are logged and skipped, never guessed.

use crate::domain::models::{ClosedPnlEvent, ExchangeKind, ExchangeOrder, Position, Side};
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

/// Collapse the side spellings the exchanges use onto the two we keep
pub fn parse_side(raw: &str) -> Option<Side> {
    match raw.to_uppercase().as_str() {
        "BUY" | "LONG" => Some(Side::Buy),
        "SELL" | "SHORT" => Some(Side::Sell),
        _ => None,
    }
}

fn str_field<'a>(raw: &'a Value, key: &str) -> Option<&'a str> {
    raw.get(key).and_then(|v| v.as_str())
}

/// Numeric fields arrive as JSON strings on some exchanges and as numbers
/// on others; accept both.
fn decimal_field(raw: &Value, key: &str) -> Option<Decimal> {
    match raw.get(key) {
        Some(Value::String(s)) => Decimal::from_str(s).ok(),
        Some(Value::Number(n)) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

fn first_decimal(raw: &Value, keys: &[&str]) -> Option<Decimal> {
    keys.iter().find_map(|k| decimal_field(raw, k))
}

fn bool_field(raw: &Value, key: &str) -> bool {
    match raw.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s == "true" || s == "1",
        _ => false,
    }
}

fn millis_field(raw: &Value, keys: &[&str]) -> Option<i64> {
    for key in keys {
        match raw.get(*key) {
            Some(Value::String(s)) => {
                if let Ok(ms) = s.parse::<i64>() {
                    return Some(ms);
                }
            }
            Some(Value::Number(n)) => {
                if let Some(ms) = n.as_i64() {
                    return Some(ms);
                }
            }
            _ => {}
        }
    }
    None
}

fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

/// Normalize one raw position payload
pub fn normalize_position(kind: ExchangeKind, raw: &Value) -> Option<Position> {
    let symbol = str_field(raw, "symbol")?.to_string();

    let (side, size) = match kind {
        // Binance reports a signed positionAmt instead of a side field
        ExchangeKind::Binance => {
            let amt = decimal_field(raw, "positionAmt")?;
            if amt.is_zero() {
                return None;
            }
            let side = if amt > Decimal::ZERO { Side::Buy } else { Side::Sell };
            (side, amt.abs())
        }
        _ => {
            let side_key = match kind {
                ExchangeKind::Bybit => "side",
                _ => "positionSide",
            };
            let raw_side = str_field(raw, side_key)?;
            let side = match parse_side(raw_side) {
                Some(side) => side,
                None => {
                    log::warn!("Skipping {} position with unknown side '{}'", symbol, raw_side);
                    return None;
                }
            };
            let size = first_decimal(raw, &["size", "positionAmt", "availableAmt"])?;
            (side, size)
        }
    };

    let entry_price = first_decimal(raw, &["avgPrice", "entryPrice", "avgEntryPrice"])?;

    Some(Position {
        symbol,
        side,
        size,
        entry_price,
        unrealized_pnl: first_decimal(raw, &["unrealisedPnl", "unRealizedProfit", "unrealizedProfit", "upl"])
            .unwrap_or(Decimal::ZERO),
        leverage: decimal_field(raw, "leverage").unwrap_or(Decimal::ONE),
        mark_price: decimal_field(raw, "markPrice"),
        upl_ratio: first_decimal(raw, &["uplRatio", "pnlRatio", "roe"]),
    })
}

/// Normalize one raw open/historical order payload
pub fn normalize_order(kind: ExchangeKind, raw: &Value) -> Option<ExchangeOrder> {
    let symbol = str_field(raw, "symbol")?.to_string();
    let order_id = match raw.get("orderId") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return None,
    };

    let raw_side = str_field(raw, "side")?;
    let side = match parse_side(raw_side) {
        Some(side) => side,
        None => {
            log::warn!(
                "Skipping {} order {} with unknown side '{}'",
                symbol,
                order_id,
                raw_side
            );
            return None;
        }
    };

    let status_key = match kind {
        ExchangeKind::Bybit => "orderStatus",
        _ => "status",
    };

    let trigger_price =
        first_decimal(raw, &["triggerPrice", "stopPrice"]).filter(|p| !p.is_zero());

    // Bybit labels the stop type explicitly; the others encode it in the
    // order type string
    let stop_order_type = match kind {
        ExchangeKind::Bybit => str_field(raw, "stopOrderType")
            .filter(|s| !s.is_empty() && *s != "UNKNOWN")
            .map(|s| s.to_string()),
        _ => str_field(raw, "type")
            .filter(|t| t.contains("STOP") || t.contains("TAKE_PROFIT"))
            .map(|s| s.to_string()),
    };

    Some(ExchangeOrder {
        order_id,
        symbol,
        side,
        qty: first_decimal(raw, &["qty", "origQty", "quantity"])?,
        price: decimal_field(raw, "price").unwrap_or(Decimal::ZERO),
        status: str_field(raw, status_key).unwrap_or("").to_string(),
        reduce_only: bool_field(raw, "reduceOnly"),
        close_on_trigger: bool_field(raw, "closeOnTrigger") || bool_field(raw, "closePosition"),
        trigger_price,
        stop_order_type,
        created_at_ms: millis_field(raw, &["createdTime", "time", "createTime"]).unwrap_or(0),
    })
}

/// Normalize one raw closed-PnL event payload
pub fn normalize_closed_pnl(kind: ExchangeKind, raw: &Value) -> Option<ClosedPnlEvent> {
    let symbol = str_field(raw, "symbol")?.to_string();

    let side_key = match kind {
        ExchangeKind::BingX => "positionSide",
        _ => "side",
    };
    let raw_side = str_field(raw, side_key)?;
    let side = match parse_side(raw_side) {
        Some(side) => side,
        None => {
            log::warn!(
                "Skipping {} closed-PnL event with unknown side '{}'",
                symbol,
                raw_side
            );
            return None;
        }
    };

    let order_id = match raw.get("orderId") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };

    let closed_at_ms = millis_field(raw, &["updatedTime", "time", "closeTime"])?;

    Some(ClosedPnlEvent {
        order_id,
        symbol,
        side,
        qty: first_decimal(raw, &["qty", "closedSize", "closePositionAmt"])?,
        avg_entry_price: first_decimal(raw, &["avgEntryPrice", "entryPrice", "avgPrice"])?,
        avg_exit_price: first_decimal(raw, &["avgExitPrice", "exitPrice", "price"])?,
        realized_pnl: first_decimal(raw, &["closedPnl", "realizedPnl", "netProfit"])
            .unwrap_or(Decimal::ZERO),
        closed_at: millis_to_utc(closed_at_ms),
    })
}

/// Normalize a raw list payload, skipping records that fail to map
pub fn normalize_positions(kind: ExchangeKind, list: &[Value]) -> Vec<Position> {
    list.iter()
        .filter_map(|raw| normalize_position(kind, raw))
        .collect()
}

pub fn normalize_orders(kind: ExchangeKind, list: &[Value]) -> Vec<ExchangeOrder> {
    list.iter()
        .filter_map(|raw| normalize_order(kind, raw))
        .collect()
}

pub fn normalize_closed_pnls(kind: ExchangeKind, list: &[Value]) -> Vec<ClosedPnlEvent> {
    list.iter()
        .filter_map(|raw| normalize_closed_pnl(kind, raw))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn side_collapse() {
        assert_eq!(parse_side("LONG"), Some(Side::Buy));
        assert_eq!(parse_side("buy"), Some(Side::Buy));
        assert_eq!(parse_side("SHORT"), Some(Side::Sell));
        assert_eq!(parse_side("Sell"), Some(Side::Sell));
        assert_eq!(parse_side("BOTH"), None);
    }

    #[test]
    fn bybit_position() {
        let raw = json!({
            "symbol": "ETHUSDT",
            "side": "Buy",
            "size": "1.5",
            "avgPrice": "3000.5",
            "unrealisedPnl": "-12.3",
            "leverage": "10",
            "markPrice": "2990.1"
        });
        let position = normalize_position(ExchangeKind::Bybit, &raw).unwrap();
        assert_eq!(position.side, Side::Buy);
        assert_eq!(position.size, dec!(1.5));
        assert_eq!(position.entry_price, dec!(3000.5));
        assert_eq!(position.mark_price, Some(dec!(2990.1)));
    }

    #[test]
    fn binance_position_signed_amount() {
        let raw = json!({
            "symbol": "BTCUSDT",
            "positionAmt": "-0.25",
            "entryPrice": "50000",
            "unRealizedProfit": "4.2",
            "leverage": "5",
            "markPrice": "49900"
        });
        let position = normalize_position(ExchangeKind::Binance, &raw).unwrap();
        assert_eq!(position.side, Side::Sell);
        assert_eq!(position.size, dec!(0.25));

        let flat = json!({"symbol": "BTCUSDT", "positionAmt": "0", "entryPrice": "0"});
        assert!(normalize_position(ExchangeKind::Binance, &flat).is_none());
    }

    #[test]
    fn unknown_side_is_skipped() {
        let raw = json!({
            "symbol": "ETHUSDT",
            "side": "BOTH",
            "size": "1",
            "avgPrice": "3000"
        });
        assert!(normalize_position(ExchangeKind::Bybit, &raw).is_none());
    }

    #[test]
    fn bybit_order_with_stop_type() {
        let raw = json!({
            "symbol": "ETHUSDT",
            "orderId": "abc-1",
            "side": "Sell",
            "qty": "1",
            "price": "0",
            "orderStatus": "Untriggered",
            "reduceOnly": true,
            "closeOnTrigger": true,
            "triggerPrice": "2900",
            "stopOrderType": "StopLoss",
            "createdTime": "1700000000000"
        });
        let order = normalize_order(ExchangeKind::Bybit, &raw).unwrap();
        assert!(order.reduce_only);
        assert!(order.close_on_trigger);
        assert_eq!(order.trigger_price, Some(dec!(2900)));
        assert!(order.is_system_generated());
    }

    #[test]
    fn binance_order_numeric_id() {
        let raw = json!({
            "symbol": "BTCUSDT",
            "orderId": 123456,
            "side": "BUY",
            "origQty": "0.5",
            "price": "50000",
            "status": "NEW",
            "type": "LIMIT",
            "time": 1700000000000i64
        });
        let order = normalize_order(ExchangeKind::Binance, &raw).unwrap();
        assert_eq!(order.order_id, "123456");
        assert_eq!(order.qty, dec!(0.5));
        assert!(!order.is_system_generated());
    }

    #[test]
    fn bybit_closed_pnl() {
        let raw = json!({
            "symbol": "ETHUSDT",
            "orderId": "abc-2",
            "side": "Buy",
            "qty": "1",
            "avgEntryPrice": "3000",
            "avgExitPrice": "3100",
            "closedPnl": "100",
            "updatedTime": "1700000000000"
        });
        let event = normalize_closed_pnl(ExchangeKind::Bybit, &raw).unwrap();
        assert_eq!(event.realized_pnl, dec!(100));
        assert_eq!(event.order_id.as_deref(), Some("abc-2"));
    }

    #[test]
    fn malformed_record_is_skipped_in_batch() {
        let list = vec![
            json!({"symbol": "ETHUSDT", "side": "Buy", "size": "1", "avgPrice": "3000"}),
            json!({"symbol": "ETHUSDT"}),
        ];
        let positions = normalize_positions(ExchangeKind::Bybit, &list);
        assert_eq!(positions.len(), 1);
    }
}
