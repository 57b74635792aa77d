//! API response types for the Binance spot REST API.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::GatewayError;
use crate::models::{Bar, Fill, Side};

/// Error body returned alongside non-2xx statuses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub code: i64,
    pub msg: String,
}

/// Response from /v3/ticker/price.
#[derive(Debug, Clone, Deserialize)]
pub struct TickerPrice {
    pub symbol: String,
    pub price: Decimal,
}

/// One asset balance from /v3/account.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetBalance {
    pub asset: String,
    pub free: Decimal,
    #[serde(default)]
    pub locked: Decimal,
}

/// Response from /v3/account.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountInfo {
    #[serde(default)]
    pub balances: Vec<AssetBalance>,
}

/// Symbol filter from /v3/exchangeInfo. Only LOT_SIZE carries a step size.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolFilter {
    pub filter_type: String,
    #[serde(default)]
    pub step_size: Option<Decimal>,
}

/// Symbol entry from /v3/exchangeInfo.
#[derive(Debug, Clone, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    #[serde(default)]
    pub filters: Vec<SymbolFilter>,
}

impl SymbolInfo {
    /// Decimal places allowed by the LOT_SIZE step, e.g. "0.10000000" -> 1.
    pub fn quantity_precision(&self) -> Option<u32> {
        self.filters
            .iter()
            .find(|f| f.filter_type == "LOT_SIZE")
            .and_then(|f| f.step_size)
            .map(|step| step.normalize().scale())
    }
}

/// Response from /v3/exchangeInfo.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfo {
    #[serde(default)]
    pub symbols: Vec<SymbolInfo>,
}

/// A fill reported inside an order response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFill {
    pub price: Decimal,
    pub qty: Decimal,
    pub commission: Decimal,
    #[serde(default)]
    pub commission_asset: String,
    #[serde(default)]
    pub trade_id: i64,
}

/// Response from POST /v3/order with newOrderRespType=FULL.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub symbol: String,
    pub order_id: i64,
    #[serde(default)]
    pub client_order_id: String,
    pub transact_time: i64,
    pub executed_qty: Decimal,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub fills: Vec<OrderFill>,
}

/// Where an exchange commission was charged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommissionAsset {
    Base,
    Quote,
    /// A third asset such as BNB; not deducted from either leg
    Other,
}

impl CommissionAsset {
    /// Classify `asset` against a concatenated spot symbol like "XRPUSDT".
    pub fn classify(symbol: &str, asset: &str) -> Self {
        if asset.is_empty() || symbol.ends_with(asset) {
            CommissionAsset::Quote
        } else if symbol.starts_with(asset) {
            CommissionAsset::Base
        } else {
            CommissionAsset::Other
        }
    }
}

/// Quantity actually received or given up, and the commission in quote units.
///
/// A base-asset commission on a buy is taken out of the bought quantity, so
/// the holding is the net amount. Third-asset commissions are not priced.
pub fn settle_commission(
    symbol: &str,
    side: Side,
    quantity: Decimal,
    price: Decimal,
    commission: Decimal,
    asset: &str,
) -> (Decimal, Decimal) {
    match CommissionAsset::classify(symbol, asset) {
        CommissionAsset::Quote => (quantity, commission),
        CommissionAsset::Base => {
            let held = if side == Side::Buy { quantity - commission } else { quantity };
            (held, commission * price)
        }
        CommissionAsset::Other => {
            debug!(symbol = %symbol, asset = %asset, commission = %commission, "Commission paid in a third asset");
            (quantity, Decimal::ZERO)
        }
    }
}

impl OrderResponse {
    /// Expand into one `Fill` per execution, commissions settled to quote.
    pub fn to_fills(&self, side: Side) -> Vec<Fill> {
        let timestamp = millis_to_datetime(self.transact_time);
        self.fills
            .iter()
            .map(|f| {
                let (quantity, fee) =
                    settle_commission(&self.symbol, side, f.qty, f.price, f.commission, &f.commission_asset);
                Fill {
                    id: f.trade_id.to_string(),
                    symbol: self.symbol.clone(),
                    side,
                    quantity,
                    price: f.price,
                    fee,
                    order_id: self.order_id.to_string(),
                    timestamp,
                }
            })
            .collect()
    }
}

/// Account trade from /v3/myTrades.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountTrade {
    pub symbol: String,
    pub id: i64,
    pub order_id: i64,
    pub price: Decimal,
    pub qty: Decimal,
    pub commission: Decimal,
    #[serde(default)]
    pub commission_asset: String,
    pub time: i64,
    pub is_buyer: bool,
}

impl From<AccountTrade> for Fill {
    fn from(t: AccountTrade) -> Self {
        let side = if t.is_buyer { Side::Buy } else { Side::Sell };
        let (quantity, fee) = settle_commission(&t.symbol, side, t.qty, t.price, t.commission, &t.commission_asset);
        Fill {
            id: t.id.to_string(),
            symbol: t.symbol,
            side,
            quantity,
            price: t.price,
            fee,
            order_id: t.order_id.to_string(),
            timestamp: millis_to_datetime(t.time),
        }
    }
}

/// Convert epoch milliseconds to UTC, clamping garbage to the epoch.
pub fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// False for the still-forming candle, whose close time lies ahead of `now_ms`.
pub fn kline_is_closed(row: &[Value], now_ms: i64) -> bool {
    row.get(6)
        .and_then(Value::as_i64)
        .map_or(true, |close_time| close_time < now_ms)
}

/// Parse one kline row: `[openTime, "open", "high", "low", "close", "volume", closeTime, ...]`.
pub fn parse_kline(row: &[Value]) -> Result<Bar, GatewayError> {
    fn number(row: &[Value], idx: usize) -> Result<f64, GatewayError> {
        match row.get(idx) {
            Some(Value::String(s)) => s
                .parse()
                .map_err(|_| GatewayError::Decode(format!("kline field {} is not numeric: {}", idx, s))),
            Some(Value::Number(n)) => n
                .as_f64()
                .ok_or_else(|| GatewayError::Decode(format!("kline field {} out of range", idx))),
            _ => Err(GatewayError::Decode(format!("kline field {} missing", idx))),
        }
    }

    let open_time = row
        .first()
        .and_then(Value::as_i64)
        .ok_or_else(|| GatewayError::Decode("kline open time missing".to_string()))?;

    Ok(Bar {
        open_time: millis_to_datetime(open_time),
        open: number(row, 1)?,
        high: number(row, 2)?,
        low: number(row, 3)?,
        close: number(row, 4)?,
        volume: number(row, 5)?,
    })
}
