//! FIFO lot matching: realized P&L and win/loss counts from account fills.
//!
//! Fills are grouped by order id first. All buys are queued in arrival order,
//! then each sell consumes lots from the head of the queue. A sell's fee is
//! charged once per sell, never per matched lot.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::{group_by_order, Fill, LogicalFill, Side};

/// Remaining inventory from one buy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuyLot {
    pub quantity: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
}

/// One sell's consumption of one lot.
#[derive(Debug, Clone, PartialEq)]
pub struct LotMatch {
    pub quantity: Decimal,
    pub buy_price: Decimal,
    pub sell_price: Decimal,
}

impl LotMatch {
    pub fn pnl(&self) -> Decimal {
        self.quantity * (self.sell_price - self.buy_price)
    }

    /// A match wins only if it sold above the lot's price.
    pub fn is_win(&self) -> bool {
        self.sell_price > self.buy_price
    }
}

/// Realized outcome of one sell.
#[derive(Debug, Clone, PartialEq)]
pub struct RealizedPnLRecord {
    pub order_id: String,
    pub timestamp: DateTime<Utc>,

    /// Quantity the sell asked to match
    pub quantity: Decimal,

    pub matches: Vec<LotMatch>,

    /// Part of the sell with no inventory left to match against
    pub unmatched: Decimal,

    /// Sum of match P&L minus the sell fee
    pub pnl: Decimal,
}

impl RealizedPnLRecord {
    #[cfg(test)]
    pub fn matched_quantity(&self) -> Decimal {
        self.matches.iter().map(|m| m.quantity).sum()
    }
}

/// Queue of open buy lots, consumed from the front.
#[derive(Debug, Default)]
pub struct FifoMatcher {
    lots: VecDeque<BuyLot>,
}

impl FifoMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_buy(&mut self, buy: &LogicalFill) {
        if buy.quantity > Decimal::ZERO {
            self.lots.push_back(BuyLot {
                quantity: buy.quantity,
                price: buy.avg_price,
                fee: buy.fee,
            });
        }
    }

    /// Consume lots for one sell. Exhausted lots are dropped; a partly used
    /// lot stays at the head with its remainder.
    pub fn match_sell(&mut self, sell: &LogicalFill) -> RealizedPnLRecord {
        let mut remaining = sell.quantity;
        let mut matches = Vec::new();

        while remaining > Decimal::ZERO {
            let Some(lot) = self.lots.front_mut() else {
                break;
            };

            let quantity = remaining.min(lot.quantity);
            matches.push(LotMatch {
                quantity,
                buy_price: lot.price,
                sell_price: sell.avg_price,
            });
            remaining -= quantity;
            lot.quantity -= quantity;

            if lot.quantity.is_zero() {
                self.lots.pop_front();
            }
        }

        if remaining > Decimal::ZERO {
            warn!(
                order_id = %sell.order_id,
                unmatched = %remaining,
                "Sell exceeds open inventory"
            );
        }

        let pnl = matches.iter().map(LotMatch::pnl).sum::<Decimal>() - sell.fee;

        RealizedPnLRecord {
            order_id: sell.order_id.clone(),
            timestamp: sell.timestamp,
            quantity: sell.quantity,
            matches,
            unmatched: remaining,
            pnl,
        }
    }

    /// Queue all buys, then match every sell in arrival order.
    pub fn realize(logical: &[LogicalFill]) -> (Vec<RealizedPnLRecord>, Vec<BuyLot>) {
        let mut matcher = Self::new();
        for buy in logical.iter().filter(|f| f.side == Side::Buy) {
            matcher.push_buy(buy);
        }

        let records = logical
            .iter()
            .filter(|f| f.side == Side::Sell)
            .map(|sell| matcher.match_sell(sell))
            .collect();

        (records, matcher.lots.into_iter().collect())
    }
}

/// Realized P&L over a set of fills.
#[derive(Debug, Clone, Default)]
pub struct PnlReport {
    pub total: Decimal,

    /// Realized P&L keyed by sell order id
    pub per_fill: HashMap<String, Decimal>,

    pub records: Vec<RealizedPnLRecord>,

    /// Inventory left after all sells
    pub remaining: Vec<BuyLot>,
}

impl PnlReport {
    fn from_logical(logical: &[LogicalFill]) -> Self {
        let (records, remaining) = FifoMatcher::realize(logical);

        let mut per_fill = HashMap::new();
        for record in &records {
            *per_fill.entry(record.order_id.clone()).or_insert(Decimal::ZERO) += record.pnl;
        }

        Self {
            total: records.iter().map(|r| r.pnl).sum(),
            per_fill,
            records,
            remaining,
        }
    }
}

/// Wins divided by losses, unbounded when nothing lost.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WinLossRatio {
    Finite(f64),
    Infinite,
}

impl WinLossRatio {
    pub fn new(wins: u32, losses: u32) -> Self {
        if losses == 0 {
            WinLossRatio::Infinite
        } else {
            WinLossRatio::Finite(wins as f64 / losses as f64)
        }
    }
}

impl std::fmt::Display for WinLossRatio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WinLossRatio::Finite(r) => write!(f, "{:.2}", r),
            WinLossRatio::Infinite => f.write_str("∞"),
        }
    }
}

/// Per-match win/loss tally.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WinLoss {
    pub wins: u32,
    pub losses: u32,
    pub ratio: WinLossRatio,
}

/// FIFO realized P&L for raw fills, grouped by order id first.
pub fn compute_pnl(fills: &[Fill]) -> PnlReport {
    PnlReport::from_logical(&group_by_order(fills))
}

/// FIFO realized P&L treating every raw fill as its own order.
#[cfg(test)]
pub fn compute_pnl_ungrouped(fills: &[Fill]) -> PnlReport {
    let logical: Vec<LogicalFill> = fills.iter().map(LogicalFill::from_fill).collect();
    PnlReport::from_logical(&logical)
}

/// Win/loss counts classified per lot match, not per sell.
pub fn compute_win_loss(fills: &[Fill]) -> WinLoss {
    let (records, _) = FifoMatcher::realize(&group_by_order(fills));

    let (mut wins, mut losses) = (0u32, 0u32);
    for m in records.iter().flat_map(|r| &r.matches) {
        if m.is_win() {
            wins += 1;
        } else {
            losses += 1;
        }
    }

    WinLoss {
        wins,
        losses,
        ratio: WinLossRatio::new(wins, losses),
    }
}
