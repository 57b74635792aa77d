//! Fill model: immutable execution events reported by the exchange.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of a fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "BUY" => Some(Side::Buy),
            "SELL" => Some(Side::Sell),
            _ => None,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw exchange fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    /// Exchange trade id
    pub id: String,

    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub price: Decimal,

    /// Commission in quote units; a base-asset commission is already netted out of `quantity`
    pub fee: Decimal,

    /// Order this fill belongs to; several fills may share one order
    pub order_id: String,

    pub timestamp: DateTime<Utc>,
}

impl Fill {
    /// Quote value of the fill.
    pub fn notional(&self) -> Decimal {
        self.quantity * self.price
    }
}

/// Fills of one order collapsed into a quantity-weighted record.
#[derive(Debug, Clone, PartialEq)]
pub struct LogicalFill {
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub avg_price: Decimal,
    pub fee: Decimal,

    /// Time of the earliest fill of the order
    pub timestamp: DateTime<Utc>,
}

impl LogicalFill {
    /// A single fill treated as its own order.
    pub fn from_fill(fill: &Fill) -> Self {
        Self {
            order_id: fill.order_id.clone(),
            symbol: fill.symbol.clone(),
            side: fill.side,
            quantity: fill.quantity,
            avg_price: fill.price,
            fee: fill.fee,
            timestamp: fill.timestamp,
        }
    }

    fn absorb(&mut self, fill: &Fill) {
        let total_qty = self.quantity + fill.quantity;
        if !total_qty.is_zero() {
            self.avg_price = (self.avg_price * self.quantity + fill.price * fill.quantity) / total_qty;
        }
        self.quantity = total_qty;
        self.fee += fill.fee;
        self.timestamp = self.timestamp.min(fill.timestamp);
    }
}

/// Group fills by order id, preserving the arrival order of each order's first fill.
pub fn group_by_order(fills: &[Fill]) -> Vec<LogicalFill> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut grouped: Vec<LogicalFill> = Vec::new();

    for fill in fills {
        match index.get(fill.order_id.as_str()) {
            Some(&i) => grouped[i].absorb(fill),
            None => {
                index.insert(fill.order_id.as_str(), grouped.len());
                grouped.push(LogicalFill::from_fill(fill));
            }
        }
    }

    grouped
}

#[cfg(test)]
pub(crate) fn make_fill(
    id: &str,
    order_id: &str,
    side: Side,
    quantity: Decimal,
    price: Decimal,
    fee: Decimal,
) -> Fill {
    Fill {
        id: id.to_string(),
        symbol: "XRPUSDT".to_string(),
        side,
        quantity,
        price,
        fee,
        order_id: order_id.to_string(),
        timestamp: Utc::now(),
    }
}
